//! WGSL reflection.
//!
//! Parses a module with naga and extracts what the engine needs from it:
//! declared uniforms, resource bindings with their buffer layouts, vertex
//! inputs and entry point names.

use crate::shader::uniform::{UniformDecl, UniformKind};

/// How a uniform value is laid out in its buffer. Values are written as
/// `chunk` consecutive 4-byte words every `stride` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub size: u32,
    pub chunk: u32,
    pub stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingResource {
    Buffer(BufferLayout),
    Texture { cube: bool },
    Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub resource: BindingResource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexInput {
    pub name: String,
    pub location: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleReflection {
    pub uniforms: Vec<UniformDecl>,
    pub bindings: Vec<ResourceBinding>,
    pub vertex_inputs: Vec<VertexInput>,
    pub vertex_entry: Option<String>,
    pub fragment_entry: Option<String>,
}

/// Parses WGSL, returning the rendered parse error on failure.
pub fn parse(source: &str) -> Result<naga::Module, String> {
    naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))
}

pub fn reflect_source(source: &str) -> Result<ModuleReflection, String> {
    parse(source).map(|module| reflect_module(&module))
}

pub fn reflect_module(module: &naga::Module) -> ModuleReflection {
    let mut reflection = ModuleReflection::default();
    let gctx = module.to_ctx();

    for (_, global) in module.global_variables.iter() {
        let Some(name) = global.name.clone() else {
            continue;
        };
        let ty = &module.types[global.ty].inner;

        let resource = match ty {
            naga::TypeInner::Sampler { .. } => Some(BindingResource::Sampler),
            naga::TypeInner::Image { dim, .. } => Some(BindingResource::Texture {
                cube: *dim == naga::ImageDimension::Cube,
            }),
            _ if global.space == naga::AddressSpace::Uniform => {
                Some(BindingResource::Buffer(buffer_layout(module, ty, ty.size(gctx))))
            }
            _ => None,
        };
        let Some(resource) = resource else {
            continue;
        };

        if !matches!(resource, BindingResource::Sampler) {
            let (kind, is_array) = uniform_kind(module, ty);
            reflection.uniforms.push(UniformDecl {
                name: name.clone(),
                kind,
                is_array,
            });
        }
        if let Some(binding) = &global.binding {
            reflection.bindings.push(ResourceBinding {
                name,
                group: binding.group,
                binding: binding.binding,
                resource,
            });
        }
    }

    for entry in &module.entry_points {
        match entry.stage {
            naga::ShaderStage::Vertex if reflection.vertex_entry.is_none() => {
                reflection.vertex_entry = Some(entry.name.clone());
                collect_vertex_inputs(module, &entry.function, &mut reflection.vertex_inputs);
            }
            naga::ShaderStage::Fragment if reflection.fragment_entry.is_none() => {
                reflection.fragment_entry = Some(entry.name.clone());
            }
            _ => {}
        }
    }
    reflection
}

fn collect_vertex_inputs(module: &naga::Module, function: &naga::Function, inputs: &mut Vec<VertexInput>) {
    for argument in &function.arguments {
        match (&argument.binding, &module.types[argument.ty].inner) {
            (Some(naga::Binding::Location { location, .. }), _) => {
                if let Some(name) = &argument.name {
                    inputs.push(VertexInput {
                        name: name.clone(),
                        location: *location,
                    });
                }
            }
            (None, naga::TypeInner::Struct { members, .. }) => {
                for member in members {
                    if let (Some(naga::Binding::Location { location, .. }), Some(name)) =
                        (&member.binding, &member.name)
                    {
                        inputs.push(VertexInput {
                            name: name.clone(),
                            location: *location,
                        });
                    }
                }
            }
            _ => {}
        }
    }
}

fn uniform_kind(module: &naga::Module, ty: &naga::TypeInner) -> (UniformKind, bool) {
    let kind = match ty {
        naga::TypeInner::Array { base, .. } => {
            return (uniform_kind(module, &module.types[*base].inner).0, true);
        }
        naga::TypeInner::Scalar(scalar) => match scalar.kind {
            naga::ScalarKind::Float => UniformKind::Float,
            _ => UniformKind::Int,
        },
        naga::TypeInner::Vector { size, .. } => match size {
            naga::VectorSize::Bi => UniformKind::Vec2,
            naga::VectorSize::Tri => UniformKind::Vec3,
            naga::VectorSize::Quad => UniformKind::Vec4,
        },
        naga::TypeInner::Matrix {
            columns: naga::VectorSize::Tri,
            rows: naga::VectorSize::Tri,
            ..
        } => UniformKind::Mat3,
        naga::TypeInner::Matrix {
            columns: naga::VectorSize::Quad,
            rows: naga::VectorSize::Quad,
            ..
        } => UniformKind::Mat4,
        naga::TypeInner::Image { dim, .. } => match dim {
            naga::ImageDimension::D2 => UniformKind::Sampler2D,
            naga::ImageDimension::Cube => UniformKind::SamplerCube,
            _ => UniformKind::Unknown,
        },
        _ => UniformKind::Unknown,
    };
    (kind, false)
}

/// Column stride of a matrix with `rows` rows in the uniform address space.
fn column_stride(rows: naga::VectorSize) -> u32 {
    match rows {
        naga::VectorSize::Bi => 8,
        _ => 16,
    }
}

fn buffer_layout(module: &naga::Module, ty: &naga::TypeInner, size: u32) -> BufferLayout {
    let (chunk, stride) = match ty {
        naga::TypeInner::Scalar(_) => (1, 4),
        naga::TypeInner::Vector { size, .. } => (*size as u32, *size as u32 * 4),
        naga::TypeInner::Matrix { rows, .. } => (*rows as u32, column_stride(*rows)),
        naga::TypeInner::Array { base, stride, .. } => match &module.types[*base].inner {
            naga::TypeInner::Vector { size, .. } => (*size as u32, *stride),
            naga::TypeInner::Matrix { rows, .. } => (*rows as u32, column_stride(*rows)),
            _ => (1, *stride),
        },
        _ => (size / 4, size),
    };
    BufferLayout { size, chunk, stride }
}

/// Writes 4-byte `words` into a zeroed buffer following `layout`. Words
/// beyond the buffer are dropped.
pub fn scatter_words(words: &[[u8; 4]], layout: &BufferLayout) -> Vec<u8> {
    let mut bytes = vec![0u8; layout.size as usize];
    let chunk = layout.chunk.max(1) as usize;
    for (index, word) in words.iter().enumerate() {
        let offset = (index / chunk) * layout.stride as usize + (index % chunk) * 4;
        if let Some(slot) = bytes.get_mut(offset..offset + 4) {
            slot.copy_from_slice(word);
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "
// the model var, set per draw
@group(0) @binding(0) var<uniform> u_model: mat4x4<f32>;
@group(0) @binding(1) var<uniform> u_normal: mat3x3<f32>;
@group(1) @binding(0) var<uniform> u_direct_light_color: array<vec3<f32>, 2>;
@group(1) @binding(1) var<uniform> u_ambient_diffuse_intensity: f32;
@group(2) @binding(0) var u_texture_0: texture_2d<f32>;
@group(2) @binding(1) var u_sampler: sampler;
var<private> scratch: f32;

struct VertexInput {
    @location(0) a_position: vec3<f32>,
    @location(2) a_uv: vec2<f32>,
}

@vertex
fn vs_main(input: VertexInput, @location(1) a_normal: vec3<f32>) -> @builtin(position) vec4<f32> {
    return u_model * vec4<f32>(input.a_position + a_normal * 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(u_direct_light_color[0], u_ambient_diffuse_intensity);
}
";

    #[test]
    fn test_uniforms_survive_comments_mentioning_var() {
        let reflection = reflect_source(SOURCE).unwrap();
        let names: Vec<&str> = reflection.uniforms.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            ["u_model", "u_normal", "u_direct_light_color", "u_ambient_diffuse_intensity", "u_texture_0"]
        );
        assert_eq!(reflection.uniforms[1].kind, UniformKind::Mat3);
        assert_eq!(reflection.uniforms[2].kind, UniformKind::Vec3);
        assert!(reflection.uniforms[2].is_array);
        assert_eq!(reflection.uniforms[4].kind, UniformKind::Sampler2D);
    }

    #[test]
    fn test_buffer_layouts_follow_uniform_rules() {
        let reflection = reflect_source(SOURCE).unwrap();
        let layout = |name: &str| {
            reflection
                .bindings
                .iter()
                .find(|b| b.name == name)
                .map(|b| b.resource)
                .unwrap()
        };
        assert_eq!(
            layout("u_normal"),
            BindingResource::Buffer(BufferLayout { size: 48, chunk: 3, stride: 16 })
        );
        assert_eq!(
            layout("u_direct_light_color"),
            BindingResource::Buffer(BufferLayout { size: 32, chunk: 3, stride: 16 })
        );
        assert_eq!(layout("u_texture_0"), BindingResource::Texture { cube: false });
        assert_eq!(layout("u_sampler"), BindingResource::Sampler);
        assert_eq!(reflection.bindings.len(), 6);
    }

    #[test]
    fn test_entry_points_and_vertex_inputs() {
        let reflection = reflect_source(SOURCE).unwrap();
        assert_eq!(reflection.vertex_entry.as_deref(), Some("vs_main"));
        assert_eq!(reflection.fragment_entry.as_deref(), Some("fs_main"));
        let inputs: Vec<(&str, u32)> = reflection
            .vertex_inputs
            .iter()
            .map(|input| (input.name.as_str(), input.location))
            .collect();
        assert_eq!(inputs, [("a_position", 0), ("a_uv", 2), ("a_normal", 1)]);
    }

    #[test]
    fn test_scatter_pads_vec3_elements() {
        let layout = BufferLayout { size: 32, chunk: 3, stride: 16 };
        let words: Vec<[u8; 4]> = (1..=6).map(|v| (v as f32).to_ne_bytes()).collect();
        let bytes = scatter_words(&words, &layout);
        let floats: Vec<f32> = bytes
            .chunks(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(floats, [1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0]);
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(reflect_source("fn broken( {").is_err());
    }
}
