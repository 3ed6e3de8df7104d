// prism3d viewer: a lit cube you can spin with WASD.

use std::sync::Arc;
use std::time::Instant;

use glam::{Quat, Vec2, Vec3, Vec4};
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowBuilder;

use prism3d::logging::init_logging;
use prism3d::scene::camera::{Camera, Viewport};
use prism3d::scene::node::{Drawable, Node, NodeKey, NodeKind};
use prism3d::{
    AmbientLight, Engine, EngineConfig, Geometry, Light, Scene, SceneRenderer, Shader, WgpuContext,
};

const CONFIG_PATH: &str = "prism3d.toml";
const LIT_SHADER: &str = include_str!("shaders/lit.wgsl");
const ROTATION_SPEED: f32 = 2.0 * 0.016;

#[derive(Default)]
struct KeyboardState {
    w: bool,
    a: bool,
    s: bool,
    d: bool,
}

impl KeyboardState {
    fn handle(&mut self, event: &KeyEvent) {
        if let PhysicalKey::Code(keycode) = event.physical_key {
            let is_pressed = event.state == ElementState::Pressed;
            match keycode {
                KeyCode::KeyW => self.w = is_pressed,
                KeyCode::KeyA => self.a = is_pressed,
                KeyCode::KeyS => self.s = is_pressed,
                KeyCode::KeyD => self.d = is_pressed,
                _ => {}
            }
        }
    }

    fn any(&self) -> bool {
        self.w || self.a || self.s || self.d
    }
}

fn load_config() -> prism3d::Result<EngineConfig> {
    if !std::path::Path::new(CONFIG_PATH).exists() {
        return Ok(EngineConfig::default());
    }
    EngineConfig::load(CONFIG_PATH)
}

/// Camera, lit cube, one sun and a solid ambient term.
fn build_scene(viewport: Viewport) -> prism3d::Result<(Scene, NodeKey)> {
    let mut scene = Scene::new();
    let root = scene.root();

    let shader = scene.add_shader(Shader::new("lit", LIT_SHADER, LIT_SHADER));

    let camera = Camera::perspective(45f32.to_radians(), 0.1, 100.0, viewport);
    scene.spawn(
        root,
        Node::new("camera", NodeKind::Camera(camera)).with_position(Vec3::new(0.0, 0.0, 3.0)),
    );

    let cube = scene.spawn(
        root,
        Node::new("cube", NodeKind::Drawable(Drawable::mesh(Geometry::cube(0.5), shader))),
    );

    let sun = scene.spawn(
        root,
        Node::new("sun", NodeKind::Light(Light::directional(Vec4::ONE, 0.8)))
            .with_position(Vec3::new(2.0, 3.0, 4.0)),
    );
    scene.set_ambient(Some(AmbientLight::default()));

    scene.update_world(false);
    scene.look_at(sun, Vec3::ZERO)?;
    Ok((scene, cube))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A bad config still gets a logger, built from the defaults.
    let loaded = load_config();
    let config = loaded.as_ref().cloned().unwrap_or_default();
    init_logging(&config.logging);
    if let Err(e) = &loaded {
        log::warn!("ignoring {CONFIG_PATH}: {e}");
    }

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(config.window.title.as_str())
            .with_inner_size(winit::dpi::PhysicalSize::new(config.window.width, config.window.height))
            .build(&event_loop)?,
    );

    let context = WgpuContext::new(Arc::clone(&window)).await?;
    let size = window.inner_size();
    let (scene, cube) = build_scene(Viewport::new(size.width.max(1), size.height.max(1)))?;
    let renderer = SceneRenderer::new(context, scene)
        .with_clear_color(Vec4::from_array(config.render.clear_color));

    let mut engine = Engine::from_config(renderer, &config.driver);
    engine.start();

    let start_time = Instant::now();
    let mut keys = KeyboardState::default();
    let mut cube_rotation = Vec2::ZERO;

    event_loop.run(move |event, target| {
        target.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent {
                window_id,
                event: WindowEvent::CloseRequested,
            } if window_id == window.id() => {
                if let Some(mut renderer) = engine.dispose() {
                    renderer.dispose();
                }
                target.exit();
            }
            Event::WindowEvent {
                event: WindowEvent::Resized(size),
                window_id,
            } if window_id == window.id() => {
                if size.width == 0 || size.height == 0 {
                    return;
                }
                if let Some(renderer) = engine.source_mut() {
                    renderer.resize(size.width, size.height);
                }
            }
            Event::WindowEvent {
                event: WindowEvent::KeyboardInput { event, .. },
                window_id,
            } if window_id == window.id() => keys.handle(&event),
            Event::AboutToWait => window.request_redraw(),
            Event::WindowEvent {
                event: WindowEvent::RedrawRequested,
                window_id,
            } if window_id == window.id() => {
                if keys.any() {
                    if keys.w {
                        cube_rotation.x -= ROTATION_SPEED;
                    }
                    if keys.s {
                        cube_rotation.x += ROTATION_SPEED;
                    }
                    if keys.a {
                        cube_rotation.y -= ROTATION_SPEED;
                    }
                    if keys.d {
                        cube_rotation.y += ROTATION_SPEED;
                    }
                } else {
                    cube_rotation.y = start_time.elapsed().as_secs_f32();
                }

                let cube = engine
                    .source_mut()
                    .and_then(|renderer| renderer.scene_mut().node_mut(cube));
                if let Some(cube) = cube {
                    cube.set_rotation(
                        Quat::from_rotation_y(cube_rotation.y) * Quat::from_rotation_x(cube_rotation.x),
                    );
                }

                if let Err(e) = engine.poll(Instant::now()) {
                    log::error!("frame failed: {e}");
                    target.exit();
                }
            }
            _ => {}
        }
    })?;
    Ok(())
}
