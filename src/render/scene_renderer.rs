//! Per-frame orchestration: transforms, camera, render list, lighting and
//! draw submission.

use glam::{Mat3, Mat4, Vec4};

use crate::engine::FrameSource;
use crate::error::Result;
use crate::render::context::{DrawCall, GraphicsContext, ProgramId};
use crate::render::list::{RenderItem, RenderList};
use crate::render::state::StateCache;
use crate::scene::camera::{Camera, Viewport};
use crate::scene::node::{DrawableKind, Node, NodeKey, NodeKind};
use crate::scene::{Scene, Visit};
use crate::shader::ShaderKey;

/// Counters for the last rendered frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_id: u64,
    pub draws: u32,
    pub program_switches: u32,
}

/// Everything one draw needs, copied out of the scene so the shader can
/// be borrowed mutably.
struct DrawJob {
    model: Mat4,
    normal: Mat3,
    shader: ShaderKey,
    kind: DrawableKind,
    source: DrawSource,
}

/// Where the job's geometry lives.
#[derive(Clone, Copy)]
enum DrawSource {
    Background,
    Node(NodeKey),
}

pub struct SceneRenderer<C: GraphicsContext> {
    context: C,
    scene: Scene,
    list: RenderList,
    state_cache: StateCache,
    camera: Option<NodeKey>,
    current_program: Option<ProgramId>,
    clear_color: Vec4,
    stats: FrameStats,
}

impl<C: GraphicsContext> SceneRenderer<C> {
    pub fn new(context: C, scene: Scene) -> Self {
        Self {
            context,
            scene,
            list: RenderList::new(),
            state_cache: StateCache::new(),
            camera: None,
            current_program: None,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            stats: FrameStats::default(),
        }
    }

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// Active camera. When unset, the first camera met during traversal is
    /// adopted.
    pub fn camera(&self) -> Option<NodeKey> {
        self.camera
    }

    pub fn set_camera(&mut self, camera: Option<NodeKey>) {
        self.camera = camera;
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// Updates the active camera's viewport. Height is clamped to 1.
    pub fn resize(&mut self, width: u32, height: u32) {
        let viewport = Viewport::new(width.max(1), height.max(1));
        let camera = self
            .camera
            .and_then(|key| self.scene.node_mut(key))
            .and_then(Node::camera_mut);
        if let Some(camera) = camera {
            camera.set_viewport(viewport);
        }
        log::debug!("resized to {}x{}", viewport.width, viewport.height);
    }

    pub fn render(&mut self, frame_id: u64) -> Result<()> {
        self.stats = FrameStats {
            frame_id,
            ..FrameStats::default()
        };
        self.context.clear(self.clear_color);
        self.scene.begin_frame();
        self.scene.update_world(false);
        self.refresh_camera();

        if let Some(camera) = self.active_camera() {
            if let Some(background) = self.scene.background() {
                let job = DrawJob {
                    model: Mat4::IDENTITY,
                    normal: Mat3::IDENTITY,
                    shader: background.shader,
                    kind: background.kind,
                    source: DrawSource::Background,
                };
                self.draw(&camera, &job, false)?;
            }
        }

        let adopted = self.collect();
        self.list.order();
        if adopted {
            self.refresh_camera();
        }

        let Some(camera) = self.active_camera() else {
            log::trace!("frame {frame_id}: no camera, nothing drawn");
            return self.context.present();
        };
        self.context.viewport(camera.viewport());

        let jobs: Vec<DrawJob> = self
            .list
            .iter()
            .filter_map(|item| self.scene.node(item.node).and_then(|node| Self::job_for(item.node, node)))
            .collect();
        // Light state settles on the last lit draw; unlit draws never sync.
        let tail = jobs.iter().rposition(|job| job.kind.is_lit());
        for (index, job) in jobs.iter().enumerate() {
            self.draw(&camera, job, tail == Some(index))?;
        }
        self.context.present()
    }

    fn job_for(key: NodeKey, node: &Node) -> Option<DrawJob> {
        let drawable = node.drawable()?;
        Some(DrawJob {
            model: *node.world_matrix(),
            normal: *node.normal_matrix(),
            shader: drawable.shader,
            kind: drawable.kind,
            source: DrawSource::Node(key),
        })
    }

    fn active_camera(&self) -> Option<Camera> {
        self.camera
            .and_then(|key| self.scene.node(key))
            .and_then(Node::camera)
            .cloned()
    }

    fn refresh_camera(&mut self) {
        let Some(key) = self.camera else {
            return;
        };
        let Some(node) = self.scene.node_mut(key) else {
            log::debug!("active camera left the scene");
            self.camera = None;
            return;
        };
        let world = *node.world_matrix();
        if let Some(camera) = node.camera_mut() {
            camera.update(&world);
        }
    }

    /// Rebuilds the render list. Returns `true` if a camera was adopted.
    fn collect(&mut self) -> bool {
        self.list.reset();
        let scene = &self.scene;
        let list = &mut self.list;
        let camera = &mut self.camera;
        let had_camera = camera.is_some();

        scene.traverse(scene.root(), |key, node| {
            if !node.visible {
                return Visit::SkipChildren;
            }
            match &node.kind {
                NodeKind::Camera(_) if camera.is_none() => {
                    log::debug!("adopting camera `{}`", node.name);
                    *camera = Some(key);
                }
                NodeKind::Drawable(drawable) => {
                    let transparent = scene
                        .shader(drawable.shader)
                        .is_some_and(|s| s.render_state.transparent);
                    list.submit(
                        RenderItem {
                            node: key,
                            render_order: drawable.render_order,
                        },
                        transparent,
                    );
                }
                _ => {}
            }
            Visit::Continue
        });
        !had_camera && self.camera.is_some()
    }

    fn draw(&mut self, camera: &Camera, job: &DrawJob, tail: bool) -> Result<()> {
        let Some(shader) = self.scene.shader_mut(job.shader) else {
            log::warn!("drawable references a shader that is not in the library");
            return Ok(());
        };
        camera.upload_uniforms(shader, &job.model, &job.normal);
        if job.kind.is_lit() {
            self.scene.sync_lighting(job.shader, tail);
        }

        let Some(shader) = self.scene.shader_mut(job.shader) else {
            return Ok(());
        };
        let program = shader.prepare(&mut self.context)?;
        if self.current_program != Some(program) {
            self.context.use_program(program);
            self.current_program = Some(program);
            self.stats.program_switches += 1;
        }
        shader.upload_uniforms(&mut self.context);

        let state = shader.render_state;
        self.state_cache.apply(&mut self.context, &state);

        let geometry = match job.source {
            DrawSource::Background => self.scene.background().map(|d| &d.geometry),
            DrawSource::Node(key) => self
                .scene
                .node(key)
                .and_then(Node::drawable)
                .map(|d| &d.geometry),
        };
        let Some(geometry) = geometry else {
            return Ok(());
        };
        self.context.draw(
            &DrawCall {
                program,
                mode: state.primitive,
                count: geometry.element_count(),
                indexed: geometry.is_indexed(),
            },
            geometry,
        );
        self.stats.draws += 1;
        Ok(())
    }

    /// Releases GPU programs and the scene graph. The context itself is
    /// dropped with the renderer.
    pub fn dispose(&mut self) {
        for shader in self.scene.shaders_mut() {
            shader.dispose(&mut self.context);
        }
        let root = self.scene.root();
        self.scene.dispose(root);
        self.scene.set_background(None);
        self.camera = None;
        self.current_program = None;
        self.state_cache.invalidate();
        self.list.reset();
    }
}

impl<C: GraphicsContext> FrameSource for SceneRenderer<C> {
    fn render(&mut self, frame_id: u64) -> Result<()> {
        SceneRenderer::render(self, frame_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::render::headless::{Command, HeadlessContext};
    use crate::render::state::RenderState;
    use crate::scene::node::Drawable;
    use crate::shader::Shader;

    const VERTEX: &str = "attribute vec3 a_position;
uniform mat4 u_model_view_projection;
void main() { gl_Position = u_model_view_projection * vec4(a_position, 1.0); }
";
    const FRAGMENT: &str = "void main() { gl_FragColor = vec4(1.0); }\n";

    fn renderer() -> SceneRenderer<HeadlessContext> {
        let mut scene = Scene::new();
        let root = scene.root();
        scene.spawn(
            root,
            Node::new(
                "camera",
                NodeKind::Camera(Camera::perspective(1.0, 0.1, 100.0, Viewport::new(640, 480))),
            ),
        );
        SceneRenderer::new(HeadlessContext::new(), scene)
    }

    fn add_drawable(renderer: &mut SceneRenderer<HeadlessContext>, shader: ShaderKey, order: i32) -> NodeKey {
        let scene = renderer.scene_mut();
        let root = scene.root();
        scene.spawn(
            root,
            Node::new(
                format!("quad{order}"),
                NodeKind::Drawable(
                    Drawable::mesh(Geometry::quad(1.0), shader)
                        .with_kind(DrawableKind::Sprite)
                        .with_render_order(order),
                ),
            ),
        )
    }

    #[test]
    fn test_adopts_first_camera_and_draws() {
        let mut renderer = renderer();
        let shader = renderer.scene_mut().add_shader(Shader::new("flat", VERTEX, FRAGMENT));
        add_drawable(&mut renderer, shader, 0);

        renderer.render(0).unwrap();
        assert!(renderer.camera().is_some());
        assert_eq!(renderer.frame_stats().draws, 1);

        let commands = renderer.context().commands();
        assert!(matches!(commands.first(), Some(Command::Clear(_))));
        assert!(matches!(commands.last(), Some(Command::Present)));
        assert!(commands.contains(&Command::Viewport(Viewport::new(640, 480))));
    }

    #[test]
    fn test_no_camera_draws_nothing() {
        let mut renderer = SceneRenderer::new(HeadlessContext::new(), Scene::new());
        let shader = renderer.scene_mut().add_shader(Shader::new("flat", VERTEX, FRAGMENT));
        add_drawable(&mut renderer, shader, 0);
        renderer.render(0).unwrap();
        assert_eq!(renderer.frame_stats().draws, 0);
        assert!(renderer.context().draws().is_empty());
    }

    #[test]
    fn test_invisible_subtrees_are_skipped() {
        let mut renderer = renderer();
        let shader = renderer.scene_mut().add_shader(Shader::new("flat", VERTEX, FRAGMENT));
        let quad = add_drawable(&mut renderer, shader, 0);
        renderer.scene_mut().node_mut(quad).unwrap().visible = false;
        renderer.render(0).unwrap();
        assert_eq!(renderer.frame_stats().draws, 0);
    }

    #[test]
    fn test_program_bound_once_for_shared_shader() {
        let mut renderer = renderer();
        let shader = renderer.scene_mut().add_shader(Shader::new("flat", VERTEX, FRAGMENT));
        add_drawable(&mut renderer, shader, 0);
        add_drawable(&mut renderer, shader, 1);

        renderer.render(0).unwrap();
        assert_eq!(renderer.frame_stats().draws, 2);
        assert_eq!(renderer.frame_stats().program_switches, 1);
    }

    #[test]
    fn test_transparent_drawn_after_opaque() {
        let mut renderer = renderer();
        let opaque = renderer.scene_mut().add_shader(Shader::new("opaque", VERTEX, FRAGMENT));
        let glass = renderer.scene_mut().add_shader(
            Shader::new("glass", VERTEX, FRAGMENT).with_render_state(RenderState {
                transparent: true,
                ..RenderState::default()
            }),
        );
        add_drawable(&mut renderer, glass, 5);
        add_drawable(&mut renderer, opaque, 9);

        renderer.render(0).unwrap();
        let draws = renderer.context().draws();
        let opaque_program = renderer.scene().shader(opaque).unwrap();
        assert_eq!(draws.len(), 2);
        assert_eq!(
            renderer.context().program(draws[0].program).unwrap().label,
            opaque_program.name()
        );
    }

    #[test]
    fn test_resize_clamps_height() {
        let mut renderer = renderer();
        renderer.render(0).unwrap();
        renderer.resize(800, 0);
        let camera = renderer.camera().unwrap();
        let viewport = renderer.scene().node(camera).unwrap().camera().unwrap().viewport();
        assert_eq!(viewport, Viewport::new(800, 1));
    }

    #[test]
    fn test_dispose_releases_programs() {
        let mut renderer = renderer();
        let shader = renderer.scene_mut().add_shader(Shader::new("flat", VERTEX, FRAGMENT));
        add_drawable(&mut renderer, shader, 0);
        renderer.render(0).unwrap();
        assert_eq!(renderer.context().live_programs(), 1);

        renderer.dispose();
        assert_eq!(renderer.context().live_programs(), 0);
        assert_eq!(renderer.scene().len(), 1);
    }
}
