//! Shaders: base sources plus a cache of compiled variants keyed by
//! canonical macro collections.

pub mod macros;
pub mod reflect;
pub mod source;
pub mod uniform;

use std::collections::HashMap;
use std::sync::Arc;

use slotmap::new_key_type;

use crate::error::{Result, ShaderStage};
use crate::render::context::{GraphicsContext, ProgramId};
use crate::render::state::RenderState;

use macros::{MacroCollection, MacroValue, ShaderMacro};
use uniform::{names, UniformDecl, UniformStore, UniformValue};

new_key_type! {
    /// Key of a shader in the scene's shader library.
    pub struct ShaderKey;
}

#[derive(Debug, Clone)]
struct CompiledProgram {
    id: ProgramId,
    uniforms: Vec<UniformDecl>,
}

#[derive(Debug)]
struct Variant {
    macros: Arc<MacroCollection>,
    program: Option<CompiledProgram>,
}

/// A vertex/fragment source pair and every variant compiled from it.
///
/// Macro edits go through [`Shader::add_macro`] and [`Shader::remove_macro`],
/// which canonicalize the resulting collection: a collection equal to one
/// seen before resolves to the same `Arc`, so its cached program is reused.
#[derive(Debug)]
pub struct Shader {
    name: String,
    vertex: String,
    fragment: String,
    chunks: HashMap<String, String>,
    variants: Vec<Variant>,
    lookup: HashMap<Arc<MacroCollection>, usize>,
    current: usize,
    uniforms: UniformStore,
    bound_program: Option<ProgramId>,
    pub render_state: RenderState,
}

impl Shader {
    pub fn new(name: impl Into<String>, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        let empty = Arc::new(MacroCollection::new());
        let mut lookup = HashMap::new();
        lookup.insert(Arc::clone(&empty), 0);
        Self {
            name: name.into(),
            vertex: vertex.into(),
            fragment: fragment.into(),
            chunks: HashMap::new(),
            variants: vec![Variant {
                macros: empty,
                program: None,
            }],
            lookup,
            current: 0,
            uniforms: UniformStore::new(),
            bound_program: None,
            render_state: RenderState::default(),
        }
    }

    /// Registers a chunk for `#include <name>` directives.
    pub fn with_chunk(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.chunks.insert(name.into(), body.into());
        self
    }

    pub fn with_render_state(mut self, render_state: RenderState) -> Self {
        self.render_state = render_state;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_macros(&self) -> &Arc<MacroCollection> {
        &self.variants[self.current].macros
    }

    pub fn macro_value(&self, name: &str) -> Option<MacroValue> {
        self.current_macros().get(name)
    }

    /// Number of distinct macro collections this shader has seen.
    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    /// Number of variants with a compiled program.
    pub fn compiled_count(&self) -> usize {
        self.variants.iter().filter(|v| v.program.is_some()).count()
    }

    pub fn add_macro(&mut self, shader_macro: &ShaderMacro) {
        let candidate = self.current_macros().with(shader_macro);
        self.adopt(candidate);
    }

    pub fn remove_macro(&mut self, name: &str) {
        if !self.current_macros().contains(name) {
            return;
        }
        let candidate = self.current_macros().without(name);
        self.adopt(candidate);
    }

    fn adopt(&mut self, candidate: MacroCollection) {
        if **self.current_macros() == candidate {
            return;
        }
        self.current = match self.lookup.get(&candidate) {
            Some(&index) => index,
            None => {
                let canonical = Arc::new(candidate);
                let index = self.variants.len();
                self.variants.push(Variant {
                    macros: Arc::clone(&canonical),
                    program: None,
                });
                self.lookup.insert(canonical, index);
                log::debug!(
                    "shader `{}`: registered variant #{} ({} macros)",
                    self.name,
                    index,
                    self.variants[index].macros.len()
                );
                index
            }
        };
    }

    /// The program for the current variant, compiling it on a cache miss.
    pub fn get_program(&mut self, ctx: &mut dyn GraphicsContext) -> Result<ProgramId> {
        if let Some(program) = &self.variants[self.current].program {
            return Ok(program.id);
        }

        let target = ctx.shader_target();
        let macros = Arc::clone(self.current_macros());
        let vertex = source::resolve_includes(&self.name, &self.vertex, &self.chunks)?;
        let fragment = source::resolve_includes(&self.name, &self.fragment, &self.chunks)?;
        let vertex = source::synthesize(target, ShaderStage::Vertex, &macros, &vertex);
        let fragment = source::synthesize(target, ShaderStage::Fragment, &macros, &fragment);

        let id = ctx.compile_program(&self.name, &vertex, &fragment)?;
        let mut uniforms = source::reflect_uniforms(&vertex, target);
        for decl in source::reflect_uniforms(&fragment, target) {
            if !uniforms.iter().any(|d| d.name == decl.name) {
                uniforms.push(decl);
            }
        }
        log::info!(
            "compiled shader `{}` variant #{} ({} uniforms)",
            self.name,
            self.current,
            uniforms.len()
        );

        self.uniforms.declare(&uniforms);
        self.uniforms.mark_all_stale();
        self.variants[self.current].program = Some(CompiledProgram { id, uniforms });
        Ok(id)
    }

    /// Fetches the current program and tracks it as the upload target. A
    /// change of program marks every uniform stale.
    pub fn prepare(&mut self, ctx: &mut dyn GraphicsContext) -> Result<ProgramId> {
        let id = self.get_program(ctx)?;
        if self.bound_program != Some(id) {
            self.uniforms.mark_all_stale();
            self.bound_program = Some(id);
        }
        Ok(id)
    }

    /// Writes a uniform value. Names outside the pipeline vocabulary that
    /// no program has declared get a fresh slot and a warning.
    pub fn update_uniform(&mut self, name: &str, value: UniformValue) {
        if !self.uniforms.set(name, value) && !names::is_builtin(name) {
            log::warn!("shader `{}`: unknown uniform `{}`, created a slot", self.name, name);
        }
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn uniforms(&self) -> &UniformStore {
        &self.uniforms
    }

    pub fn mark_all_stale(&mut self) {
        self.uniforms.mark_all_stale();
    }

    /// Uploads stale uniforms the bound program declares. Returns how many
    /// values were sent.
    pub fn upload_uniforms(&mut self, ctx: &mut dyn GraphicsContext) -> usize {
        let Some(bound) = self.bound_program else {
            return 0;
        };
        let Some(program) = self
            .variants
            .iter()
            .filter_map(|v| v.program.as_ref())
            .find(|p| p.id == bound)
        else {
            return 0;
        };

        let mut uploaded = 0;
        for decl in &program.uniforms {
            let Some(slot) = self.uniforms.slot_mut(&decl.name) else {
                continue;
            };
            if !slot.needs_upload {
                continue;
            }
            if let Some(value) = &slot.value {
                ctx.upload_uniform(bound, &decl.name, value);
                uploaded += 1;
            }
            slot.needs_upload = false;
        }
        uploaded
    }

    /// Deletes every compiled program. Variants stay registered and compile
    /// again on demand.
    pub fn dispose(&mut self, ctx: &mut dyn GraphicsContext) {
        for variant in &mut self.variants {
            if let Some(program) = variant.program.take() {
                ctx.delete_program(program.id);
            }
        }
        self.bound_program = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::render::headless::HeadlessContext;

    const VERTEX: &str = "attribute vec3 a_position;
uniform mat4 u_model_view_projection;
void main() {
    gl_Position = u_model_view_projection * vec4(a_position, 1.0);
}
";

    const FRAGMENT: &str = "uniform vec4 u_color;
#ifdef USE_FOG
uniform float u_fog_density;
#endif
void main() {
    gl_FragColor = u_color;
}
";

    fn shader() -> Shader {
        Shader::new("flat", VERTEX, FRAGMENT)
    }

    #[test]
    fn test_add_then_remove_restores_canonical_instance() {
        let mut shader = shader();
        let original = Arc::clone(shader.current_macros());

        shader.add_macro(&ShaderMacro::flag("USE_FOG"));
        assert!(!Arc::ptr_eq(shader.current_macros(), &original));

        shader.remove_macro("USE_FOG");
        assert!(Arc::ptr_eq(shader.current_macros(), &original));
        assert_eq!(shader.variant_count(), 2);
    }

    #[test]
    fn test_equal_collections_share_instance_regardless_of_order() {
        let mut shader = shader();
        shader.add_macro(&ShaderMacro::flag("A"));
        shader.add_macro(&ShaderMacro::int("B", 2));
        let ab = Arc::clone(shader.current_macros());

        shader.remove_macro("A");
        shader.remove_macro("B");
        shader.add_macro(&ShaderMacro::int("B", 2));
        shader.add_macro(&ShaderMacro::flag("A"));
        assert!(Arc::ptr_eq(shader.current_macros(), &ab));
    }

    #[test]
    fn test_program_cache_hits_after_toggle() {
        let mut ctx = HeadlessContext::new();
        let mut shader = shader();

        let plain = shader.get_program(&mut ctx).unwrap();
        shader.add_macro(&ShaderMacro::flag("USE_FOG"));
        let fog = shader.get_program(&mut ctx).unwrap();
        assert_ne!(plain, fog);

        shader.remove_macro("USE_FOG");
        assert_eq!(shader.get_program(&mut ctx).unwrap(), plain);
        assert_eq!(ctx.compile_count(), 2);
    }

    #[test]
    fn test_synthesized_source_carries_defines() {
        let mut ctx = HeadlessContext::new();
        let mut shader = shader();
        shader.add_macro(&ShaderMacro::int("DIRECT_LIGHT_COUNT", 1));
        let id = shader.get_program(&mut ctx).unwrap();

        let program = ctx.program(id).unwrap();
        assert!(program.vertex.starts_with("#version 300 es\n"));
        assert!(program.fragment.contains("#define DIRECT_LIGHT_COUNT 1\n"));
        assert!(program.vertex.contains("in vec3 a_position"));
    }

    #[test]
    fn test_reflection_follows_macros() {
        let mut ctx = HeadlessContext::new();
        let mut shader = shader();
        shader.get_program(&mut ctx).unwrap();
        assert!(!shader.uniforms().contains("u_fog_density"));

        shader.add_macro(&ShaderMacro::flag("USE_FOG"));
        shader.get_program(&mut ctx).unwrap();
        assert_eq!(shader.uniform("u_fog_density"), Some(&UniformValue::Float(0.0)));
    }

    #[test]
    fn test_upload_sends_only_stale_declared_uniforms() {
        let mut ctx = HeadlessContext::new();
        let mut shader = shader();
        let id = shader.prepare(&mut ctx).unwrap();

        assert_eq!(shader.upload_uniforms(&mut ctx), 2);
        assert_eq!(shader.upload_uniforms(&mut ctx), 0);

        shader.update_uniform("u_color", UniformValue::Vec4(glam::Vec4::ONE));
        shader.update_uniform("u_unused", UniformValue::Float(3.0));
        assert_eq!(shader.upload_uniforms(&mut ctx), 1);
        assert_eq!(ctx.uploaded(id, "u_color"), Some(&UniformValue::Vec4(glam::Vec4::ONE)));
        assert!(ctx.uploaded(id, "u_unused").is_none());
        assert!(shader.uniforms().contains("u_unused"));
    }

    #[test]
    fn test_switching_program_marks_uniforms_stale() {
        let mut ctx = HeadlessContext::new();
        let mut shader = shader();
        shader.prepare(&mut ctx).unwrap();
        shader.upload_uniforms(&mut ctx);

        shader.add_macro(&ShaderMacro::flag("USE_FOG"));
        shader.prepare(&mut ctx).unwrap();
        assert!(shader.uniforms().slot("u_color").unwrap().needs_upload);
    }

    #[test]
    fn test_includes_resolve_from_chunks() {
        let mut ctx = HeadlessContext::new();
        let mut shader = Shader::new(
            "chunked",
            VERTEX,
            "#include <color>\nvoid main() { gl_FragColor = u_color; }\n",
        )
        .with_chunk("color", "uniform vec4 u_color;");
        let id = shader.get_program(&mut ctx).unwrap();
        assert!(ctx.program(id).unwrap().fragment.contains("uniform vec4 u_color;"));

        let mut missing = Shader::new("missing", VERTEX, "#include <nope>\n");
        assert!(matches!(
            missing.get_program(&mut ctx),
            Err(Error::ShaderInclude { .. })
        ));
    }

    #[test]
    fn test_compile_failure_is_fatal() {
        let mut ctx = HeadlessContext::new();
        let mut shader = Shader::new("broken", VERTEX, "#ifdef BROKEN\n#error nope\n#endif\n");
        assert!(shader.get_program(&mut ctx).is_ok());

        shader.add_macro(&ShaderMacro::flag("BROKEN"));
        assert!(matches!(
            shader.get_program(&mut ctx),
            Err(Error::ShaderCompile { .. })
        ));
    }

    #[test]
    fn test_dispose_deletes_programs() {
        let mut ctx = HeadlessContext::new();
        let mut shader = shader();
        shader.get_program(&mut ctx).unwrap();
        shader.add_macro(&ShaderMacro::flag("USE_FOG"));
        shader.get_program(&mut ctx).unwrap();

        shader.dispose(&mut ctx);
        assert_eq!(ctx.live_programs(), 0);
        assert_eq!(shader.compiled_count(), 0);
    }
}
