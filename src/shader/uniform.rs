//! Uniform values and the per-shader uniform store.

use std::collections::HashMap;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Binding names the pipeline writes into every shader.
pub mod names {
    pub const MODEL: &str = "u_model";
    pub const VIEW: &str = "u_view";
    pub const PROJECTION: &str = "u_projection";
    pub const VIEW_PROJECTION: &str = "u_view_projection";
    pub const MODEL_VIEW_PROJECTION: &str = "u_model_view_projection";
    pub const NORMAL: &str = "u_normal";
    pub const CAMERA_POSITION: &str = "u_camera_position";
    pub const TEXTURE_0: &str = "u_texture_0";

    pub const DIRECT_LIGHT_COLOR: &str = "u_direct_light_color";
    pub const DIRECT_LIGHT_DIRECTION: &str = "u_direct_light_direction";
    pub const POINT_LIGHT_COLOR: &str = "u_point_light_color";
    pub const POINT_LIGHT_POSITION: &str = "u_point_light_position";
    pub const POINT_LIGHT_DISTANCE: &str = "u_point_light_distance";

    pub const AMBIENT_DIFFUSE: &str = "u_ambient_diffuse";
    pub const AMBIENT_SH: &str = "u_ambient_sh";
    pub const AMBIENT_DIFFUSE_INTENSITY: &str = "u_ambient_diffuse_intensity";
    pub const AMBIENT_SPECULAR_SAMPLER: &str = "u_ambient_specular_sampler";
    pub const AMBIENT_SPECULAR_INTENSITY: &str = "u_ambient_specular_intensity";
    pub const AMBIENT_MIP_LEVEL: &str = "u_ambient_mip_level";

    pub const ALL: [&str; 19] = [
        MODEL,
        VIEW,
        PROJECTION,
        VIEW_PROJECTION,
        MODEL_VIEW_PROJECTION,
        NORMAL,
        CAMERA_POSITION,
        TEXTURE_0,
        DIRECT_LIGHT_COLOR,
        DIRECT_LIGHT_DIRECTION,
        POINT_LIGHT_COLOR,
        POINT_LIGHT_POSITION,
        POINT_LIGHT_DISTANCE,
        AMBIENT_DIFFUSE,
        AMBIENT_SH,
        AMBIENT_DIFFUSE_INTENSITY,
        AMBIENT_SPECULAR_SAMPLER,
        AMBIENT_SPECULAR_INTENSITY,
        AMBIENT_MIP_LEVEL,
    ];

    /// Whether `name` belongs to the pipeline-supplied vocabulary.
    pub fn is_builtin(name: &str) -> bool {
        ALL.contains(&name)
    }
}

/// Opaque reference to a texture owned by the graphics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureRef {
    pub id: u32,
    pub mip_count: u32,
}

impl TextureRef {
    /// The 1x1 white texture every context provides.
    pub const WHITE: TextureRef = TextureRef { id: 0, mip_count: 1 };
}

/// Declared type of a uniform, as reflected from shader source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Sampler2D,
    SamplerCube,
    Unknown,
}

impl UniformKind {
    pub fn is_sampler(self) -> bool {
        matches!(self, UniformKind::Sampler2D | UniformKind::SamplerCube)
    }
}

/// A uniform declared by a compiled program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub kind: UniformKind,
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
    FloatArray(Vec<f32>),
    IntArray(Vec<i32>),
    Texture(TextureRef),
}

impl UniformValue {
    /// Zero value for a declared uniform. Samplers bind the white texture.
    pub fn default_for(decl: &UniformDecl) -> Option<Self> {
        if decl.is_array && !decl.kind.is_sampler() {
            return Some(match decl.kind {
                UniformKind::Int => UniformValue::IntArray(Vec::new()),
                _ => UniformValue::FloatArray(Vec::new()),
            });
        }
        Some(match decl.kind {
            UniformKind::Float => UniformValue::Float(0.0),
            UniformKind::Int => UniformValue::Int(0),
            UniformKind::Vec2 => UniformValue::Vec2(Vec2::ZERO),
            UniformKind::Vec3 => UniformValue::Vec3(Vec3::ZERO),
            UniformKind::Vec4 => UniformValue::Vec4(Vec4::ZERO),
            UniformKind::Mat3 => UniformValue::Mat3(Mat3::IDENTITY),
            UniformKind::Mat4 => UniformValue::Mat4(Mat4::IDENTITY),
            UniformKind::Sampler2D | UniformKind::SamplerCube => {
                UniformValue::Texture(TextureRef::WHITE)
            }
            UniformKind::Unknown => return None,
        })
    }

    /// Flattened float view, for contexts that upload raw bytes.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            UniformValue::Float(v) => vec![*v],
            UniformValue::Int(v) => vec![*v as f32],
            UniformValue::Vec2(v) => v.to_array().to_vec(),
            UniformValue::Vec3(v) => v.to_array().to_vec(),
            UniformValue::Vec4(v) => v.to_array().to_vec(),
            UniformValue::Mat3(m) => m.to_cols_array().to_vec(),
            UniformValue::Mat4(m) => m.to_cols_array().to_vec(),
            UniformValue::FloatArray(values) => values.clone(),
            UniformValue::IntArray(values) => values.iter().map(|v| *v as f32).collect(),
            UniformValue::Texture(texture) => vec![texture.id as f32],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformSlot {
    pub value: Option<UniformValue>,
    pub needs_upload: bool,
}

/// Uniform values of one shader, keyed by binding name.
///
/// Values survive program switches; the `needs_upload` bit tracks whether
/// the currently bound program has seen the latest value.
#[derive(Debug, Default)]
pub struct UniformStore {
    slots: HashMap<String, UniformSlot>,
}

impl UniformStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates slots for newly declared uniforms. Existing slots keep their values.
    pub fn declare(&mut self, decls: &[UniformDecl]) {
        for decl in decls {
            if self.slots.contains_key(&decl.name) {
                continue;
            }
            let value = UniformValue::default_for(decl);
            // Samplers start out bound to the white texture already.
            let needs_upload = !decl.kind.is_sampler();
            self.slots.insert(
                decl.name.clone(),
                UniformSlot {
                    value,
                    needs_upload,
                },
            );
        }
    }

    /// Writes a value. Returns `false` when the slot had to be created.
    pub fn set(&mut self, name: &str, value: UniformValue) -> bool {
        match self.slots.get_mut(name) {
            Some(slot) => {
                slot.value = Some(value);
                slot.needs_upload = true;
                true
            }
            None => {
                self.slots.insert(
                    name.to_string(),
                    UniformSlot {
                        value: Some(value),
                        needs_upload: true,
                    },
                );
                false
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.slots.get(name).and_then(|slot| slot.value.as_ref())
    }

    pub fn slot(&self, name: &str) -> Option<&UniformSlot> {
        self.slots.get(name)
    }

    pub fn slot_mut(&mut self, name: &str) -> Option<&mut UniformSlot> {
        self.slots.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn mark_all_stale(&mut self) {
        for slot in self.slots.values_mut() {
            slot.needs_upload = true;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
