//! Scene-wide ambient lighting.

use glam::Vec3;

use crate::shader::macros::ShaderMacro;
use crate::shader::uniform::{names, TextureRef, UniformValue};
use crate::shader::Shader;

pub const USE_SH: &str = "USE_SH";
pub const USE_SPECULAR_ENV: &str = "USE_SPECULAR_ENV";
pub const USE_TEX_LOD: &str = "USE_TEX_LOD";
pub const DECODE_ENV_RGBM: &str = "DECODE_ENV_RGBM";

/// Irradiance convolution kernel times the SH basis constant, per
/// coefficient of a third-order spherical harmonic.
const SH_IRRADIANCE_SCALE: [f32; 9] = [
    0.886227, -1.023327, 1.023327, -1.023327, 0.858086, -0.858086, 0.247708, -0.858086, 0.429042,
];

#[derive(Debug, Clone, PartialEq)]
pub enum AmbientDiffuse {
    SolidColor(Vec3),
    /// Nine RGB coefficients of a third-order spherical harmonic.
    SphericalHarmonics([Vec3; 9]),
}

impl Default for AmbientDiffuse {
    fn default() -> Self {
        AmbientDiffuse::SolidColor(Vec3::new(0.212, 0.227, 0.259))
    }
}

/// Ambient state pushed into lit shaders. Shares the aggregator's rule:
/// pushes happen only while `needs_update` is set, and only the tail
/// drawable clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct AmbientLight {
    diffuse: AmbientDiffuse,
    diffuse_intensity: f32,
    specular: Option<TextureRef>,
    specular_intensity: f32,
    decode_rgbm: bool,
    needs_update: bool,
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self {
            diffuse: AmbientDiffuse::default(),
            diffuse_intensity: 1.0,
            specular: None,
            specular_intensity: 1.0,
            decode_rgbm: false,
            needs_update: true,
        }
    }
}

impl AmbientLight {
    pub fn new(diffuse: AmbientDiffuse) -> Self {
        Self {
            diffuse,
            ..Self::default()
        }
    }

    pub fn diffuse(&self) -> &AmbientDiffuse {
        &self.diffuse
    }

    pub fn set_diffuse(&mut self, diffuse: AmbientDiffuse) {
        self.diffuse = diffuse;
        self.needs_update = true;
    }

    pub fn diffuse_intensity(&self) -> f32 {
        self.diffuse_intensity
    }

    pub fn set_diffuse_intensity(&mut self, intensity: f32) {
        self.diffuse_intensity = intensity;
        self.needs_update = true;
    }

    pub fn specular(&self) -> Option<TextureRef> {
        self.specular
    }

    pub fn set_specular(&mut self, texture: Option<TextureRef>) {
        self.specular = texture;
        self.needs_update = true;
    }

    pub fn specular_intensity(&self) -> f32 {
        self.specular_intensity
    }

    pub fn set_specular_intensity(&mut self, intensity: f32) {
        self.specular_intensity = intensity;
        self.needs_update = true;
    }

    pub fn set_decode_rgbm(&mut self, decode: bool) {
        self.decode_rgbm = decode;
        self.needs_update = true;
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update
    }

    pub fn mark_needs_update(&mut self) {
        self.needs_update = true;
    }

    pub fn sync(&mut self, shader: &mut Shader, tail: bool) {
        if !self.needs_update {
            return;
        }

        match &self.diffuse {
            AmbientDiffuse::SolidColor(color) => {
                shader.update_uniform(names::AMBIENT_DIFFUSE, UniformValue::Vec3(*color));
                shader.remove_macro(USE_SH);
            }
            AmbientDiffuse::SphericalHarmonics(coefficients) => {
                shader.update_uniform(
                    names::AMBIENT_SH,
                    UniformValue::FloatArray(precompute_sh(coefficients)),
                );
                shader.add_macro(&ShaderMacro::flag(USE_SH));
            }
        }
        shader.update_uniform(
            names::AMBIENT_DIFFUSE_INTENSITY,
            UniformValue::Float(self.diffuse_intensity),
        );

        match self.specular {
            Some(texture) => {
                shader.update_uniform(names::AMBIENT_SPECULAR_SAMPLER, UniformValue::Texture(texture));
                shader.update_uniform(
                    names::AMBIENT_MIP_LEVEL,
                    UniformValue::Float(texture.mip_count.saturating_sub(1) as f32),
                );
                shader.update_uniform(
                    names::AMBIENT_SPECULAR_INTENSITY,
                    UniformValue::Float(self.specular_intensity),
                );
                shader.add_macro(&ShaderMacro::flag(USE_SPECULAR_ENV));
                shader.add_macro(&ShaderMacro::flag(USE_TEX_LOD));
            }
            None => {
                shader.remove_macro(USE_SPECULAR_ENV);
                shader.remove_macro(USE_TEX_LOD);
            }
        }

        if self.decode_rgbm {
            shader.add_macro(&ShaderMacro::flag(DECODE_ENV_RGBM));
        } else {
            shader.remove_macro(DECODE_ENV_RGBM);
        }

        if tail {
            self.needs_update = false;
        }
    }
}

/// Folds the cosine-lobe convolution into the coefficients so shaders can
/// evaluate irradiance with a plain basis dot product. Output is 27 floats.
pub fn precompute_sh(coefficients: &[Vec3; 9]) -> Vec<f32> {
    coefficients
        .iter()
        .zip(SH_IRRADIANCE_SCALE)
        .flat_map(|(c, scale)| (*c * scale).to_array())
        .collect()
}
