//! `wgpu` backed graphics context.
//!
//! Programs are WGSL modules validated on the device and reflected with
//! naga. Draws are recorded during the frame together with a snapshot of the
//! program's uniform values, then replayed into a single render pass when
//! the frame is presented. Pipelines are built lazily per program, fixed
//! function state and vertex layout, and cached. Geometry is uploaded once
//! per [`Geometry::id`].

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec4;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::error::{Error, Result, ShaderStage};
use crate::geometry::Geometry;
use crate::render::context::{DrawCall, GraphicsContext, ProgramId};
use crate::render::state::{
    BlendComponent, BlendEquation, BlendFactor, BlendState, CompareFunc, CullFace, DepthState,
    FrontFace, PolygonOffset, PrimitiveMode,
};
use crate::scene::camera::Viewport;
use crate::shader::reflect::{self, BindingResource, BufferLayout, ResourceBinding, VertexInput};
use crate::shader::source::ShaderTarget;
use crate::shader::uniform::UniformValue;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// Frames an uploaded geometry may go undrawn before its buffers are freed.
const GEOMETRY_TTL: u64 = 300;

/// Fixed-function state accumulated for the next pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub primitive: wgpu::PrimitiveState,
    pub blend: Option<wgpu::BlendState>,
    pub depth: wgpu::DepthStencilState,
    pub alpha_to_coverage: bool,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            primitive: wgpu::PrimitiveState::default(),
            blend: None,
            depth: wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            },
            alpha_to_coverage: false,
        }
    }
}

struct CachedPipeline {
    state: PipelineState,
    /// `(shader location, components)` per vertex buffer slot.
    vertex: Vec<(u32, u32)>,
    /// `None` when creation failed validation; the draw is skipped.
    pipeline: Option<wgpu::RenderPipeline>,
}

/// Bind groups holding one set of uniform values.
struct UniformSnapshot {
    groups: Vec<wgpu::BindGroup>,
    _buffers: Vec<wgpu::Buffer>,
}

struct GpuProgram {
    label: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    vertex_entry: String,
    fragment_entry: String,
    vertex_inputs: Vec<VertexInput>,
    bindings: Vec<ResourceBinding>,
    group_layouts: Vec<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: Vec<CachedPipeline>,
    values: HashMap<String, UniformValue>,
    snapshots: Vec<UniformSnapshot>,
    values_changed: bool,
}

struct GpuAttribute {
    name: String,
    components: u32,
    buffer: wgpu::Buffer,
}

struct GpuGeometry {
    attributes: Vec<GpuAttribute>,
    index: Option<wgpu::Buffer>,
    last_used: u64,
}

struct PendingDraw {
    program: ProgramId,
    pipeline: usize,
    snapshot: usize,
    geometry: u64,
    /// Index into the geometry's attributes for each vertex buffer slot.
    slots: Vec<usize>,
    count: u32,
    indexed: bool,
}

/// Resources bound where a program samples a texture the engine has not
/// uploaded.
struct Fallbacks {
    white: wgpu::TextureView,
    white_cube: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

pub struct WgpuContext {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    depth: wgpu::TextureView,
    fallbacks: Fallbacks,
    programs: HashMap<ProgramId, GpuProgram>,
    geometries: HashMap<u64, GpuGeometry>,
    pending: Vec<PendingDraw>,
    next_program: u32,
    current_program: Option<ProgramId>,
    clear_color: wgpu::Color,
    state: PipelineState,
    frame: u64,
}

impl WgpuContext {
    pub async fn new(window: Arc<Window>) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| Error::ContextUnavailable(format!("surface: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| Error::ContextUnavailable("no suitable adapter".into()))?;
        log::info!("using adapter {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("prism3d device"),
                    required_features: wgpu::Features::default(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| Error::ContextUnavailable(format!("device: {e}")))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| Error::ContextUnavailable("surface reports no formats".into()))?;

        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: caps.present_modes.first().copied().unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let depth = create_depth_view(&device, config.width, config.height);
        let fallbacks = Fallbacks {
            white: create_white_texture(&device, &queue, 1),
            white_cube: create_white_texture(&device, &queue, 6),
            sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("fallback sampler"),
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            }),
        };

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            depth,
            fallbacks,
            programs: HashMap::new(),
            geometries: HashMap::new(),
            pending: Vec::new(),
            next_program: 1,
            current_program: None,
            clear_color: wgpu::Color::BLACK,
            state: PipelineState::default(),
            frame: 0,
        })
    }

    fn reconfigure(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.depth = create_depth_view(&self.device, width, height);
    }

    fn compile_module(&self, label: &str, stage: ShaderStage, source: &str) -> Result<wgpu::ShaderModule> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(Error::ShaderCompile {
                shader: label.to_string(),
                stage,
                log: error.to_string(),
            }),
            None => Ok(module),
        }
    }

    fn upload_geometry(&mut self, geometry: &Geometry) {
        let frame = self.frame;
        if let Some(uploaded) = self.geometries.get_mut(&geometry.id()) {
            uploaded.last_used = frame;
            return;
        }
        let attributes = geometry
            .attributes()
            .map(|(name, attribute)| GpuAttribute {
                name: name.to_string(),
                components: attribute.components,
                buffer: self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(name),
                    contents: bytemuck::cast_slice(&attribute.data),
                    usage: wgpu::BufferUsages::VERTEX,
                }),
            })
            .collect();
        let index = geometry.indices().map(|indices| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("index buffer"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });
        self.geometries.insert(
            geometry.id(),
            GpuGeometry {
                attributes,
                index,
                last_used: frame,
            },
        );
    }

    /// Drops per-frame draws and everything only they referenced.
    fn end_frame(&mut self) {
        self.pending.clear();
        for program in self.programs.values_mut() {
            // The last snapshot still matches the program's values.
            if let Some(last) = program.snapshots.pop() {
                program.snapshots.clear();
                program.snapshots.push(last);
            }
        }
        let frame = self.frame;
        self.geometries
            .retain(|_, geometry| frame.saturating_sub(geometry.last_used) <= GEOMETRY_TTL);
        self.frame += 1;
    }
}

impl GraphicsContext for WgpuContext {
    fn shader_target(&self) -> ShaderTarget {
        ShaderTarget::Wgsl
    }

    fn viewport(&mut self, viewport: Viewport) {
        if viewport.width != self.config.width || viewport.height != self.config.height {
            self.reconfigure(viewport.width, viewport.height);
        }
    }

    fn clear(&mut self, color: Vec4) {
        self.clear_color = wgpu::Color {
            r: f64::from(color.x),
            g: f64::from(color.y),
            b: f64::from(color.z),
            a: f64::from(color.w),
        };
    }

    fn compile_program(&mut self, label: &str, vertex: &str, fragment: &str) -> Result<ProgramId> {
        let reflect_stage = |stage: ShaderStage, source: &str| {
            reflect::reflect_source(source).map_err(|log| Error::ShaderCompile {
                shader: label.to_string(),
                stage,
                log,
            })
        };
        let vertex_info = reflect_stage(ShaderStage::Vertex, vertex)?;
        let fragment_info = reflect_stage(ShaderStage::Fragment, fragment)?;
        let missing_entry = |stage: ShaderStage| Error::ShaderCompile {
            shader: label.to_string(),
            stage,
            log: "no entry point for this stage".into(),
        };
        let vertex_entry = vertex_info
            .vertex_entry
            .clone()
            .ok_or_else(|| missing_entry(ShaderStage::Vertex))?;
        let fragment_entry = fragment_info
            .fragment_entry
            .clone()
            .ok_or_else(|| missing_entry(ShaderStage::Fragment))?;

        let vertex_module = self.compile_module(label, ShaderStage::Vertex, vertex)?;
        let fragment_module = self.compile_module(label, ShaderStage::Fragment, fragment)?;

        let mut bindings = vertex_info.bindings;
        for binding in fragment_info.bindings {
            if !bindings
                .iter()
                .any(|b| b.group == binding.group && b.binding == binding.binding)
            {
                bindings.push(binding);
            }
        }
        let group_layouts = create_group_layouts(&self.device, label, &bindings);
        let layout_refs: Vec<&wgpu::BindGroupLayout> = group_layouts.iter().collect();
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

        let id = ProgramId(self.next_program);
        self.next_program += 1;
        self.programs.insert(
            id,
            GpuProgram {
                label: label.to_string(),
                vertex: vertex_module,
                fragment: fragment_module,
                vertex_entry,
                fragment_entry,
                vertex_inputs: vertex_info.vertex_inputs,
                bindings,
                group_layouts,
                pipeline_layout,
                pipelines: Vec::new(),
                values: HashMap::new(),
                snapshots: Vec::new(),
                values_changed: true,
            },
        );
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(removed) = self.programs.remove(&program) {
            log::debug!("released program `{}`", removed.label);
        }
        self.pending.retain(|draw| draw.program != program);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
    }

    fn upload_uniform(&mut self, program: ProgramId, name: &str, value: &UniformValue) {
        let Some(target) = self.programs.get_mut(&program) else {
            log::warn!("uniform `{name}` uploaded to unknown program {program:?}");
            return;
        };
        target.values.insert(name.to_string(), value.clone());
        target.values_changed = true;
    }

    fn set_front_face(&mut self, face: FrontFace) {
        self.state.primitive.front_face = match face {
            FrontFace::Ccw => wgpu::FrontFace::Ccw,
            FrontFace::Cw => wgpu::FrontFace::Cw,
        };
    }

    fn set_cull_face(&mut self, cull: Option<CullFace>) {
        self.state.primitive.cull_mode = cull.and_then(|cull| match cull {
            CullFace::Front => Some(wgpu::Face::Front),
            CullFace::Back => Some(wgpu::Face::Back),
            // wgpu cannot cull both; nothing would be drawn anyway.
            CullFace::FrontAndBack => None,
        });
    }

    fn set_blend(&mut self, blend: Option<BlendState>) {
        self.state.blend = blend.map(to_wgpu_blend);
    }

    fn set_depth(&mut self, depth: DepthState) {
        self.state.depth.depth_write_enabled = depth.test && depth.write;
        self.state.depth.depth_compare = if depth.test {
            to_wgpu_compare(depth.func)
        } else {
            wgpu::CompareFunction::Always
        };
    }

    fn set_polygon_offset(&mut self, offset: Option<PolygonOffset>) {
        self.state.depth.bias = match offset {
            Some(offset) => wgpu::DepthBiasState {
                constant: offset.units as i32,
                slope_scale: offset.factor,
                clamp: 0.0,
            },
            None => wgpu::DepthBiasState::default(),
        };
    }

    fn set_alpha_to_coverage(&mut self, enabled: bool) {
        self.state.alpha_to_coverage = enabled;
    }

    fn draw(&mut self, call: &DrawCall, geometry: &Geometry) {
        if self.current_program != Some(call.program) {
            log::warn!("draw with {:?} while {:?} is bound", call.program, self.current_program);
        }
        if call.count == 0 {
            return;
        }
        self.upload_geometry(geometry);

        let mut state = self.state.clone();
        state.primitive.topology = to_wgpu_topology(call.mode);
        state.primitive.strip_index_format = (call.indexed
            && state.primitive.topology == wgpu::PrimitiveTopology::LineStrip)
            .then_some(wgpu::IndexFormat::Uint32);

        let format = self.config.format;
        let Some(program) = self.programs.get_mut(&call.program) else {
            log::warn!("draw with unknown program {:?}", call.program);
            return;
        };
        let Some(uploaded) = self.geometries.get(&geometry.id()) else {
            return;
        };

        let mut vertex = Vec::with_capacity(program.vertex_inputs.len());
        let mut slots = Vec::with_capacity(program.vertex_inputs.len());
        for input in &program.vertex_inputs {
            let Some(index) = uploaded.attributes.iter().position(|a| a.name == input.name) else {
                log::warn!(
                    "`{}` reads attribute `{}` that the geometry does not have",
                    program.label,
                    input.name
                );
                return;
            };
            vertex.push((input.location, uploaded.attributes[index].components));
            slots.push(index);
        }

        let pipeline = match program
            .pipelines
            .iter()
            .position(|p| p.state == state && p.vertex == vertex)
        {
            Some(index) => index,
            None => {
                let created = create_pipeline(&self.device, program, &state, &vertex, format);
                program.pipelines.push(CachedPipeline {
                    state,
                    vertex,
                    pipeline: created,
                });
                program.pipelines.len() - 1
            }
        };

        if program.values_changed || program.snapshots.is_empty() {
            let snapshot = create_snapshot(&self.device, &self.fallbacks, program);
            program.snapshots.push(snapshot);
            program.values_changed = false;
        }

        self.pending.push(PendingDraw {
            program: call.program,
            pipeline,
            snapshot: program.snapshots.len() - 1,
            geometry: geometry.id(),
            slots,
            count: call.count,
            indexed: call.indexed,
        });
    }

    fn present(&mut self) -> Result<()> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = self.window.inner_size();
                self.reconfigure(size.width, size.height);
                self.end_frame();
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(Error::ContextUnavailable("surface out of memory".into()));
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("surface timed out, frame skipped");
                self.end_frame();
                return Ok(());
            }
        };

        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame encoder"),
        });
        let mut submitted = 0;
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            for draw in &self.pending {
                let Some(program) = self.programs.get(&draw.program) else {
                    continue;
                };
                let Some(pipeline) = program.pipelines[draw.pipeline].pipeline.as_ref() else {
                    continue;
                };
                let Some(geometry) = self.geometries.get(&draw.geometry) else {
                    continue;
                };
                pass.set_pipeline(pipeline);
                for (group, bind_group) in program.snapshots[draw.snapshot].groups.iter().enumerate() {
                    pass.set_bind_group(group as u32, bind_group, &[]);
                }
                for (slot, attribute) in draw.slots.iter().enumerate() {
                    pass.set_vertex_buffer(slot as u32, geometry.attributes[*attribute].buffer.slice(..));
                }
                match (&geometry.index, draw.indexed) {
                    (Some(index), true) => {
                        pass.set_index_buffer(index.slice(..), wgpu::IndexFormat::Uint32);
                        pass.draw_indexed(0..draw.count, 0, 0..1);
                    }
                    _ => pass.draw(0..draw.count, 0..1),
                }
                submitted += 1;
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();

        log::trace!("presented frame with {submitted} draws");
        self.end_frame();
        Ok(())
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("depth"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

/// 1x1 opaque white texture with `layers` layers; six layers make a cube.
fn create_white_texture(device: &wgpu::Device, queue: &wgpu::Queue, layers: u32) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width: 1,
        height: 1,
        depth_or_array_layers: layers,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("white"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &[255u8; 4].repeat(layers as usize),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        size,
    );
    texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(if layers == 6 {
            wgpu::TextureViewDimension::Cube
        } else {
            wgpu::TextureViewDimension::D2
        }),
        ..Default::default()
    })
}

/// One layout per bind group index up to the highest used; gaps get empty
/// layouts.
fn create_group_layouts(
    device: &wgpu::Device,
    label: &str,
    bindings: &[ResourceBinding],
) -> Vec<wgpu::BindGroupLayout> {
    let groups = bindings.iter().map(|b| b.group + 1).max().unwrap_or(0);
    (0..groups)
        .map(|group| {
            let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
                .iter()
                .filter(|b| b.group == group)
                .map(|b| wgpu::BindGroupLayoutEntry {
                    binding: b.binding,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: binding_type(b.resource),
                    count: None,
                })
                .collect();
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            })
        })
        .collect()
}

fn binding_type(resource: BindingResource) -> wgpu::BindingType {
    match resource {
        BindingResource::Buffer(_) => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingResource::Texture { cube } => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: if cube {
                wgpu::TextureViewDimension::Cube
            } else {
                wgpu::TextureViewDimension::D2
            },
            multisampled: false,
        },
        BindingResource::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
    }
}

fn create_snapshot(device: &wgpu::Device, fallbacks: &Fallbacks, program: &GpuProgram) -> UniformSnapshot {
    let mut buffers: Vec<(u32, u32, wgpu::Buffer)> = Vec::new();
    for binding in &program.bindings {
        if let BindingResource::Buffer(layout) = binding.resource {
            let contents = match program.values.get(&binding.name) {
                Some(value) => encode_uniform(value, &layout),
                None => vec![0; padded_size(&layout)],
            };
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&binding.name),
                contents: &contents,
                usage: wgpu::BufferUsages::UNIFORM,
            });
            buffers.push((binding.group, binding.binding, buffer));
        }
    }

    let groups = program
        .group_layouts
        .iter()
        .enumerate()
        .map(|(group, layout)| {
            let group = group as u32;
            let entries: Vec<wgpu::BindGroupEntry> = program
                .bindings
                .iter()
                .filter(|b| b.group == group)
                .filter_map(|b| {
                    let resource = match b.resource {
                        BindingResource::Buffer(_) => buffers
                            .iter()
                            .find(|(g, n, _)| *g == group && *n == b.binding)
                            .map(|(_, _, buffer)| buffer.as_entire_binding())?,
                        BindingResource::Texture { cube: false } => {
                            wgpu::BindingResource::TextureView(&fallbacks.white)
                        }
                        BindingResource::Texture { cube: true } => {
                            wgpu::BindingResource::TextureView(&fallbacks.white_cube)
                        }
                        BindingResource::Sampler => wgpu::BindingResource::Sampler(&fallbacks.sampler),
                    };
                    Some(wgpu::BindGroupEntry {
                        binding: b.binding,
                        resource,
                    })
                })
                .collect();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&program.label),
                layout,
                entries: &entries,
            })
        })
        .collect();

    UniformSnapshot {
        groups,
        _buffers: buffers.into_iter().map(|(_, _, buffer)| buffer).collect(),
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    program: &GpuProgram,
    state: &PipelineState,
    vertex: &[(u32, u32)],
    format: wgpu::TextureFormat,
) -> Option<wgpu::RenderPipeline> {
    let attributes: Vec<[wgpu::VertexAttribute; 1]> = vertex
        .iter()
        .map(|(location, components)| {
            [wgpu::VertexAttribute {
                offset: 0,
                shader_location: *location,
                format: vertex_format(*components),
            }]
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout> = vertex
        .iter()
        .zip(&attributes)
        .map(|((_, components), attributes)| wgpu::VertexBufferLayout {
            array_stride: u64::from(*components) * 4,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes,
        })
        .collect();

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&program.label),
        layout: Some(&program.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &program.vertex,
            entry_point: &program.vertex_entry,
            buffers: &buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module: &program.fragment,
            entry_point: &program.fragment_entry,
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: state.blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: state.primitive,
        depth_stencil: Some(state.depth.clone()),
        // Single-sampled targets cannot use alpha to coverage.
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => {
            log::error!("pipeline for `{}` rejected: {error}", program.label);
            None
        }
        None => Some(pipeline),
    }
}

fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

/// Uniform buffers are allocated in 16 byte steps.
fn padded_size(layout: &BufferLayout) -> usize {
    (layout.size.max(1) as usize).next_multiple_of(16)
}

/// Bytes of `value` laid out for a uniform buffer binding: vector elements
/// of arrays and matrix columns are padded to their WGSL stride.
pub fn encode_uniform(value: &UniformValue, layout: &BufferLayout) -> Vec<u8> {
    let words: Vec<[u8; 4]> = match value {
        UniformValue::Int(v) => vec![v.to_ne_bytes()],
        UniformValue::IntArray(values) => values.iter().map(|v| v.to_ne_bytes()).collect(),
        UniformValue::Texture(_) => Vec::new(),
        other => other.to_f32_vec().iter().map(|v| v.to_ne_bytes()).collect(),
    };
    let mut bytes = reflect::scatter_words(&words, layout);
    bytes.resize(padded_size(layout), 0);
    bytes
}

fn to_wgpu_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::SrcAlphaSaturate => wgpu::BlendFactor::SrcAlphaSaturated,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn to_wgpu_component(component: BlendComponent) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: to_wgpu_factor(component.src),
        dst_factor: to_wgpu_factor(component.dst),
        operation: match component.equation {
            BlendEquation::Add => wgpu::BlendOperation::Add,
            BlendEquation::Subtract => wgpu::BlendOperation::Subtract,
            BlendEquation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        },
    }
}

pub fn to_wgpu_blend(blend: BlendState) -> wgpu::BlendState {
    wgpu::BlendState {
        color: to_wgpu_component(blend.color),
        alpha: to_wgpu_component(blend.alpha),
    }
}

pub fn to_wgpu_compare(func: CompareFunc) -> wgpu::CompareFunction {
    match func {
        CompareFunc::Never => wgpu::CompareFunction::Never,
        CompareFunc::Less => wgpu::CompareFunction::Less,
        CompareFunc::Equal => wgpu::CompareFunction::Equal,
        CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunc::Greater => wgpu::CompareFunction::Greater,
        CompareFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunc::Always => wgpu::CompareFunction::Always,
    }
}

pub fn to_wgpu_topology(mode: PrimitiveMode) -> wgpu::PrimitiveTopology {
    match mode {
        PrimitiveMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveMode::Lines => wgpu::PrimitiveTopology::LineList,
        PrimitiveMode::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveMode::Points => wgpu::PrimitiveTopology::PointList,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::state::{Blending, RenderState};
    use glam::{Mat3, Mat4, Vec3};

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn test_normal_blend_translation() {
        let state = RenderState {
            transparent: true,
            blending: Blending::Normal,
            ..RenderState::default()
        };
        let blend = to_wgpu_blend(state.blend().unwrap());
        assert_eq!(blend.color.src_factor, wgpu::BlendFactor::SrcAlpha);
        assert_eq!(blend.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
        assert_eq!(blend.alpha.src_factor, wgpu::BlendFactor::One);
        assert_eq!(blend.color.operation, wgpu::BlendOperation::Add);
    }

    #[test]
    fn test_encode_pads_light_arrays() {
        // array<vec3<f32>, 2>
        let layout = BufferLayout { size: 32, chunk: 3, stride: 16 };
        let mut packed = vec![0.0; 30];
        packed[..6].copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let bytes = encode_uniform(&UniformValue::FloatArray(packed), &layout);
        assert_eq!(floats(&bytes), [1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0]);
    }

    #[test]
    fn test_encode_pads_mat3_columns() {
        let layout = BufferLayout { size: 48, chunk: 3, stride: 16 };
        let bytes = encode_uniform(&UniformValue::Mat3(Mat3::IDENTITY), &layout);
        assert_eq!(
            floats(&bytes),
            [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_encode_rounds_small_values_up() {
        let layout = BufferLayout { size: 12, chunk: 3, stride: 12 };
        let bytes = encode_uniform(&UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0)), &layout);
        assert_eq!(floats(&bytes), [1.0, 2.0, 3.0, 0.0]);

        let layout = BufferLayout { size: 64, chunk: 4, stride: 16 };
        let bytes = encode_uniform(&UniformValue::Mat4(Mat4::IDENTITY), &layout);
        assert_eq!(bytes.len(), 64);
        assert_eq!(
            encode_uniform(&UniformValue::Int(-1), &BufferLayout { size: 4, chunk: 1, stride: 4 })[..4],
            (-1i32).to_ne_bytes()
        );
    }

    #[test]
    fn test_lit_shader_layout_matches_engine_values() {
        let source = include_str!("../shaders/lit.wgsl")
            .replace("#ifdef DIRECT_LIGHT_COUNT\n", "")
            .replace("#endif\n", "")
            .replace("DIRECT_LIGHT_COUNT", "1");
        let reflection = reflect::reflect_source(&source).unwrap();
        assert_eq!(reflection.vertex_entry.as_deref(), Some("vs_main"));
        assert_eq!(reflection.fragment_entry.as_deref(), Some("fs_main"));
        let normal = reflection
            .bindings
            .iter()
            .find(|b| b.name == "u_normal")
            .unwrap();
        assert_eq!(
            normal.resource,
            BindingResource::Buffer(BufferLayout { size: 48, chunk: 3, stride: 16 })
        );
        let inputs: Vec<&str> = reflection.vertex_inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(inputs, [crate::geometry::POSITION, crate::geometry::NORMAL]);
    }

    #[test]
    fn test_topology() {
        assert_eq!(to_wgpu_topology(PrimitiveMode::LineStrip), wgpu::PrimitiveTopology::LineStrip);
        assert_eq!(to_wgpu_compare(CompareFunc::LessEqual), wgpu::CompareFunction::LessEqual);
        assert_eq!(vertex_format(2), wgpu::VertexFormat::Float32x2);
    }
}
