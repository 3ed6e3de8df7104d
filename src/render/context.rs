//! The graphics-context seam: everything the engine needs from a GPU API.

use glam::Vec4;

use crate::error::Result;
use crate::geometry::Geometry;
use crate::render::state::{BlendState, CullFace, DepthState, FrontFace, PolygonOffset, PrimitiveMode};
use crate::scene::camera::Viewport;
use crate::shader::source::ShaderTarget;
use crate::shader::uniform::UniformValue;

/// Handle of a compiled program, issued by the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// A single draw submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub mode: PrimitiveMode,
    /// Index count when `indexed`, vertex count otherwise.
    pub count: u32,
    pub indexed: bool,
}

/// Synchronous wrapper over a graphics API.
///
/// Calls have no effect beyond GPU state. Compilation failures are fatal
/// and surface as errors.
pub trait GraphicsContext {
    /// Shading language the context compiles.
    fn shader_target(&self) -> ShaderTarget;

    fn viewport(&mut self, viewport: Viewport);

    /// Clears color and depth targets.
    fn clear(&mut self, color: Vec4);

    fn compile_program(&mut self, label: &str, vertex: &str, fragment: &str) -> Result<ProgramId>;

    fn delete_program(&mut self, program: ProgramId);

    fn use_program(&mut self, program: ProgramId);

    fn upload_uniform(&mut self, program: ProgramId, name: &str, value: &UniformValue);

    fn set_front_face(&mut self, face: FrontFace);

    fn set_cull_face(&mut self, cull: Option<CullFace>);

    fn set_blend(&mut self, blend: Option<BlendState>);

    fn set_depth(&mut self, depth: DepthState);

    fn set_polygon_offset(&mut self, offset: Option<PolygonOffset>);

    fn set_alpha_to_coverage(&mut self, enabled: bool);

    /// Draws `geometry` with the bound program and current state. The
    /// context owns any GPU copy of the vertex data.
    fn draw(&mut self, call: &DrawCall, geometry: &Geometry);

    /// Ends the frame.
    fn present(&mut self) -> Result<()>;
}
