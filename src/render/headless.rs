//! A context that records commands instead of talking to a GPU.

use std::collections::HashMap;

use glam::Vec4;

use crate::error::{Error, Result, ShaderStage};
use crate::geometry::Geometry;
use crate::render::context::{DrawCall, GraphicsContext, ProgramId};
use crate::render::state::{BlendState, CullFace, DepthState, FrontFace, PolygonOffset};
use crate::scene::camera::Viewport;
use crate::shader::source::{preprocess, ShaderTarget};
use crate::shader::uniform::UniformValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Viewport(Viewport),
    Clear(Vec4),
    CompileProgram(ProgramId),
    DeleteProgram(ProgramId),
    UseProgram(ProgramId),
    UploadUniform(ProgramId, String),
    SetFrontFace(FrontFace),
    SetCullFace(Option<CullFace>),
    SetBlend(Option<BlendState>),
    SetDepth(DepthState),
    SetPolygonOffset(Option<PolygonOffset>),
    SetAlphaToCoverage(bool),
    Draw(DrawCall),
    Present,
}

/// Source text of a program the headless context compiled.
#[derive(Debug, Clone)]
pub struct RecordedProgram {
    pub label: String,
    pub vertex: String,
    pub fragment: String,
}

/// Records every call. Sources with an active `#error` directive fail to
/// compile, as they would on a GLSL compiler.
#[derive(Debug)]
pub struct HeadlessContext {
    target: ShaderTarget,
    commands: Vec<Command>,
    programs: HashMap<ProgramId, RecordedProgram>,
    uniforms: HashMap<(ProgramId, String), UniformValue>,
    next_program: u32,
    compiled: usize,
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::with_target(ShaderTarget::Gles300)
    }

    pub fn with_target(target: ShaderTarget) -> Self {
        Self {
            target,
            commands: Vec::new(),
            programs: HashMap::new(),
            uniforms: HashMap::new(),
            next_program: 1,
            compiled: 0,
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Draw calls recorded since the last `clear_commands`.
    pub fn draws(&self) -> Vec<DrawCall> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::Draw(call) => Some(*call),
                _ => None,
            })
            .collect()
    }

    /// Total programs compiled over the context's lifetime.
    pub fn compile_count(&self) -> usize {
        self.compiled
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn program(&self, id: ProgramId) -> Option<&RecordedProgram> {
        self.programs.get(&id)
    }

    /// Last value uploaded for `name` on `program`.
    pub fn uploaded(&self, program: ProgramId, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(&(program, name.to_string()))
    }

    fn check_source(label: &str, stage: ShaderStage, source: &str) -> Result<()> {
        let active = preprocess(source, false);
        match active.lines().find(|line| line.trim_start().starts_with("#error")) {
            Some(line) => Err(Error::ShaderCompile {
                shader: label.to_string(),
                stage,
                log: line.trim().to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl GraphicsContext for HeadlessContext {
    fn shader_target(&self) -> ShaderTarget {
        self.target
    }

    fn viewport(&mut self, viewport: Viewport) {
        self.commands.push(Command::Viewport(viewport));
    }

    fn clear(&mut self, color: Vec4) {
        self.commands.push(Command::Clear(color));
    }

    fn compile_program(&mut self, label: &str, vertex: &str, fragment: &str) -> Result<ProgramId> {
        Self::check_source(label, ShaderStage::Vertex, vertex)?;
        Self::check_source(label, ShaderStage::Fragment, fragment)?;

        let id = ProgramId(self.next_program);
        self.next_program += 1;
        self.compiled += 1;
        self.programs.insert(
            id,
            RecordedProgram {
                label: label.to_string(),
                vertex: vertex.to_string(),
                fragment: fragment.to_string(),
            },
        );
        self.commands.push(Command::CompileProgram(id));
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.uniforms.retain(|(id, _), _| *id != program);
        self.commands.push(Command::DeleteProgram(program));
    }

    fn use_program(&mut self, program: ProgramId) {
        self.commands.push(Command::UseProgram(program));
    }

    fn upload_uniform(&mut self, program: ProgramId, name: &str, value: &UniformValue) {
        self.uniforms.insert((program, name.to_string()), value.clone());
        self.commands.push(Command::UploadUniform(program, name.to_string()));
    }

    fn set_front_face(&mut self, face: FrontFace) {
        self.commands.push(Command::SetFrontFace(face));
    }

    fn set_cull_face(&mut self, cull: Option<CullFace>) {
        self.commands.push(Command::SetCullFace(cull));
    }

    fn set_blend(&mut self, blend: Option<BlendState>) {
        self.commands.push(Command::SetBlend(blend));
    }

    fn set_depth(&mut self, depth: DepthState) {
        self.commands.push(Command::SetDepth(depth));
    }

    fn set_polygon_offset(&mut self, offset: Option<PolygonOffset>) {
        self.commands.push(Command::SetPolygonOffset(offset));
    }

    fn set_alpha_to_coverage(&mut self, enabled: bool) {
        self.commands.push(Command::SetAlphaToCoverage(enabled));
    }

    fn draw(&mut self, call: &DrawCall, _geometry: &Geometry) {
        self.commands.push(Command::Draw(*call));
    }

    fn present(&mut self) -> Result<()> {
        self.commands.push(Command::Present);
        Ok(())
    }
}
