//! Shader source synthesis: target preambles, `#include` resolution, a small
//! conditional preprocessor, GLSL ES 3.0 conversion and uniform reflection.

use std::collections::HashMap;

use crate::error::{Error, Result, ShaderStage};
use crate::shader::macros::{MacroCollection, MacroValue};
use crate::shader::reflect;
use crate::shader::uniform::{UniformDecl, UniformKind};

/// Shading language flavour a graphics context consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderTarget {
    /// GLSL ES 3.00 (WebGL 2 / GLES 3).
    Gles300,
    /// GLSL ES 1.00 (WebGL 1 / GLES 2).
    Gles100,
    /// WGSL. Has no preprocessor, so conditionals are resolved here.
    Wgsl,
}

const PRECISION_BLOCK: &str = "#ifdef GL_FRAGMENT_PRECISION_HIGH
precision highp float;
precision highp int;
#else
precision mediump float;
precision mediump int;
#endif
";

const GLES100_EXTENSIONS: [&str; 3] = [
    "GL_EXT_shader_texture_lod",
    "GL_OES_standard_derivatives",
    "GL_EXT_draw_buffers",
];

const MAX_INCLUDE_DEPTH: usize = 16;

/// Version and precision lines that open every program of `target`.
pub fn preamble(target: ShaderTarget, stage: ShaderStage) -> String {
    match target {
        ShaderTarget::Gles300 => format!("#version 300 es\n{PRECISION_BLOCK}"),
        ShaderTarget::Gles100 => {
            let mut out = String::from("#version 100\n");
            if stage == ShaderStage::Fragment {
                for extension in GLES100_EXTENSIONS {
                    out.push_str(&format!("#ifdef {extension}\n#extension {extension} : enable\n#endif\n"));
                }
            }
            out.push_str(PRECISION_BLOCK);
            out
        }
        ShaderTarget::Wgsl => String::new(),
    }
}

/// Builds the final source for one stage: preamble, define block, base
/// source, then the target's source transforms.
pub fn synthesize(
    target: ShaderTarget,
    stage: ShaderStage,
    macros: &MacroCollection,
    base: &str,
) -> String {
    let defines = macros.generate_defines();
    match target {
        ShaderTarget::Gles300 => {
            let body = convert_to_300(base, stage);
            format!("{}{}{}", preamble(target, stage), defines, body)
        }
        ShaderTarget::Gles100 => format!("{}{}{}", preamble(target, stage), defines, base),
        ShaderTarget::Wgsl => preprocess(&format!("{defines}{base}"), true),
    }
}

/// Replaces `#include <name>` (or `#include "name"`) lines with chunk
/// bodies, recursively.
pub fn resolve_includes(
    shader: &str,
    source: &str,
    chunks: &HashMap<String, String>,
) -> Result<String> {
    resolve_includes_at(shader, source, chunks, 0)
}

fn resolve_includes_at(
    shader: &str,
    source: &str,
    chunks: &HashMap<String, String>,
    depth: usize,
) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        let Some(rest) = line.trim_start().strip_prefix("#include") else {
            out.push_str(line);
            out.push('\n');
            continue;
        };
        let name = rest
            .trim()
            .trim_matches(|c| c == '<' || c == '>' || c == '"')
            .to_string();
        let chunk = chunks.get(&name).ok_or_else(|| Error::ShaderInclude {
            shader: shader.to_string(),
            chunk: name.clone(),
        })?;
        if depth >= MAX_INCLUDE_DEPTH {
            return Err(Error::ShaderInclude {
                shader: shader.to_string(),
                chunk: name,
            });
        }
        out.push_str(&resolve_includes_at(shader, chunk, chunks, depth + 1)?);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
struct Branch {
    parent_active: bool,
    taken: bool,
    active: bool,
}

/// Evaluates `#define`, `#undef`, `#ifdef`, `#ifndef`, `#if`, `#elif`,
/// `#else` and `#endif`, dropping inactive lines and the directives
/// themselves. Other directives pass through untouched. With `substitute`,
/// integer macros are expanded inside code lines.
pub fn preprocess(source: &str, substitute: bool) -> String {
    let mut defines: HashMap<String, MacroValue> = HashMap::new();
    let mut stack: Vec<Branch> = Vec::new();
    let mut out = String::with_capacity(source.len());

    for line in source.lines() {
        let active = stack.last().map_or(true, |b| b.active);
        let trimmed = line.trim_start();

        if let Some(directive) = trimmed.strip_prefix('#') {
            let directive = directive.trim_start();
            let (keyword, argument) = match directive.split_once(char::is_whitespace) {
                Some((keyword, argument)) => (keyword, argument.trim()),
                None => (directive, ""),
            };
            match keyword {
                "ifdef" | "ifndef" | "if" => {
                    let condition = match keyword {
                        "ifdef" => defines.contains_key(argument),
                        "ifndef" => !defines.contains_key(argument),
                        _ => evaluate_condition(argument, &defines),
                    };
                    let taken = active && condition;
                    stack.push(Branch {
                        parent_active: active,
                        taken,
                        active: taken,
                    });
                }
                "elif" => {
                    if let Some(branch) = stack.last_mut() {
                        let take = branch.parent_active
                            && !branch.taken
                            && evaluate_condition(argument, &defines);
                        branch.active = take;
                        branch.taken |= take;
                    }
                }
                "else" => {
                    if let Some(branch) = stack.last_mut() {
                        branch.active = branch.parent_active && !branch.taken;
                        branch.taken = true;
                    }
                }
                "endif" => {
                    stack.pop();
                }
                "define" if active => {
                    let mut parts = argument.split_whitespace();
                    if let Some(name) = parts.next() {
                        let value = parts
                            .next()
                            .and_then(|v| v.parse::<i64>().ok())
                            .map_or(MacroValue::Flag, MacroValue::Int);
                        defines.insert(name.to_string(), value);
                    }
                }
                "undef" if active => {
                    defines.remove(argument);
                }
                "define" | "undef" => {}
                _ if active => {
                    out.push_str(line);
                    out.push('\n');
                }
                _ => {}
            }
            continue;
        }

        if !active {
            continue;
        }
        if substitute {
            out.push_str(&substitute_macros(line, &defines));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

fn macro_truthy(name: &str, defines: &HashMap<String, MacroValue>) -> bool {
    match defines.get(name) {
        Some(MacroValue::Flag) => true,
        Some(MacroValue::Int(v)) => *v != 0,
        None => false,
    }
}

fn operand_value(token: &str, defines: &HashMap<String, MacroValue>) -> i64 {
    if let Ok(v) = token.parse::<i64>() {
        return v;
    }
    match defines.get(token) {
        Some(MacroValue::Int(v)) => *v,
        Some(MacroValue::Flag) => 1,
        None => 0,
    }
}

/// `#if` expressions: `||` of `&&` of terms; a term is `defined(X)`,
/// `defined X`, `!term`, `A op B` with a comparison operator, a macro name
/// or an integer literal.
fn evaluate_condition(expression: &str, defines: &HashMap<String, MacroValue>) -> bool {
    expression.split("||").any(|any| {
        any.split("&&")
            .all(|term| evaluate_term(term.trim(), defines))
    })
}

fn evaluate_term(term: &str, defines: &HashMap<String, MacroValue>) -> bool {
    let term = term.trim();
    if let Some(inner) = term.strip_prefix('!') {
        if !inner.starts_with('=') {
            return !evaluate_term(inner, defines);
        }
    }
    if let Some(rest) = term.strip_prefix("defined") {
        let name = rest.trim().trim_start_matches('(').trim_end_matches(')').trim();
        return defines.contains_key(name);
    }
    let term = term.trim_start_matches('(').trim_end_matches(')').trim();
    for op in [">=", "<=", "==", "!=", ">", "<"] {
        if let Some((lhs, rhs)) = term.split_once(op) {
            let lhs = operand_value(lhs.trim(), defines);
            let rhs = operand_value(rhs.trim(), defines);
            return match op {
                ">=" => lhs >= rhs,
                "<=" => lhs <= rhs,
                "==" => lhs == rhs,
                "!=" => lhs != rhs,
                ">" => lhs > rhs,
                _ => lhs < rhs,
            };
        }
    }
    if let Ok(v) = term.parse::<i64>() {
        return v != 0;
    }
    macro_truthy(term, defines)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Calls `map` for every identifier in `text`, keeping everything else.
fn map_identifiers(text: &str, mut map: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();
    for c in text.chars() {
        if is_ident_char(c) {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            out.push_str(&map(&word).unwrap_or_else(|| word.clone()));
            word.clear();
        }
        out.push(c);
    }
    if !word.is_empty() {
        out.push_str(&map(&word).unwrap_or(word));
    }
    out
}

fn substitute_macros(line: &str, defines: &HashMap<String, MacroValue>) -> String {
    map_identifiers(line, |word| match defines.get(word) {
        Some(MacroValue::Int(v)) => Some(v.to_string()),
        _ => None,
    })
}

/// Rewrites GLSL ES 1.00 style source for `#version 300 es`.
pub fn convert_to_300(source: &str, stage: ShaderStage) -> String {
    let converted = map_identifiers(source, |word| {
        let replacement = match (word, stage) {
            ("attribute", ShaderStage::Vertex) => "in",
            ("varying", ShaderStage::Vertex) => "out",
            ("varying", ShaderStage::Fragment) => "in",
            ("texture2D" | "textureCube", _) => "texture",
            ("texture2DLodEXT" | "textureCubeLodEXT", _) => "textureLod",
            ("gl_FragColor", ShaderStage::Fragment) => "glFragColor",
            _ => return None,
        };
        Some(replacement.to_string())
    });
    if stage == ShaderStage::Fragment && converted.contains("glFragColor") {
        format!("out vec4 glFragColor;\n{converted}")
    } else {
        converted
    }
}

/// Lists the uniforms a preprocessed source declares, first occurrence
/// wins. Understands GLSL `uniform` statements and WGSL `var<uniform>` /
/// texture bindings.
pub fn reflect_uniforms(source: &str, target: ShaderTarget) -> Vec<UniformDecl> {
    match target {
        ShaderTarget::Wgsl => match reflect::reflect_source(&preprocess(source, true)) {
            Ok(reflection) => reflection.uniforms,
            Err(error) => {
                log::warn!("uniform reflection skipped, source does not parse:\n{error}");
                Vec::new()
            }
        },
        ShaderTarget::Gles300 | ShaderTarget::Gles100 => {
            let mut decls: Vec<UniformDecl> = Vec::new();
            for statement in preprocess(source, false).split(';') {
                for decl in reflect_glsl(statement.trim()) {
                    if !decls.iter().any(|d| d.name == decl.name) {
                        decls.push(decl);
                    }
                }
            }
            decls
        }
    }
}

fn glsl_kind(ty: &str) -> UniformKind {
    match ty {
        "float" => UniformKind::Float,
        "int" | "bool" => UniformKind::Int,
        "vec2" | "ivec2" | "bvec2" => UniformKind::Vec2,
        "vec3" | "ivec3" | "bvec3" => UniformKind::Vec3,
        "vec4" | "ivec4" | "bvec4" => UniformKind::Vec4,
        "mat3" => UniformKind::Mat3,
        "mat4" => UniformKind::Mat4,
        "sampler2D" => UniformKind::Sampler2D,
        "samplerCube" => UniformKind::SamplerCube,
        _ => UniformKind::Unknown,
    }
}

fn reflect_glsl(statement: &str) -> Vec<UniformDecl> {
    // Only the last line matters; earlier lines belong to other statements
    // or comments.
    let Some(line) = statement.lines().last() else {
        return Vec::new();
    };
    let line = line.trim();
    let Some(rest) = line.strip_prefix("uniform ") else {
        return Vec::new();
    };
    if rest.contains('{') {
        return Vec::new();
    }
    let mut tokens: Vec<&str> = rest.split_whitespace().collect();
    while matches!(tokens.first(), Some(&("highp" | "mediump" | "lowp"))) {
        tokens.remove(0);
    }
    let Some((ty, names)) = tokens.split_first() else {
        return Vec::new();
    };
    let kind = glsl_kind(ty);
    names
        .join(" ")
        .split(',')
        .filter_map(|name| {
            let name = name.trim();
            let (name, is_array) = match name.split_once('[') {
                Some((name, _)) => (name.trim(), true),
                None => (name, false),
            };
            (!name.is_empty()).then(|| UniformDecl {
                name: name.to_string(),
                kind,
                is_array,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::macros::ShaderMacro;

    #[test]
    fn test_preprocess_ifdef_else() {
        let source = "#define A\n#ifdef A\na\n#else\nb\n#endif\n#ifndef A\nc\n#endif\n";
        assert_eq!(preprocess(source, false), "a\n");
    }

    #[test]
    fn test_preprocess_nested_inactive() {
        let source = "#ifdef MISSING\n#ifdef ALSO\nx\n#else\ny\n#endif\n#endif\nz\n";
        assert_eq!(preprocess(source, false), "z\n");
    }

    #[test]
    fn test_preprocess_if_expressions() {
        let source = "#define N 3\n#if N > 2 && defined(N)\nbig\n#elif N\nsmall\n#endif\n#if !defined N\nnone\n#endif\n";
        assert_eq!(preprocess(source, false), "big\n");
    }

    #[test]
    fn test_preprocess_elif_taken_once() {
        let source = "#define N 1\n#if N == 2\ntwo\n#elif N == 1\none\n#elif N\nany\n#else\nother\n#endif\n";
        assert_eq!(preprocess(source, false), "one\n");
    }

    #[test]
    fn test_preprocess_substitutes_int_macros() {
        let source = "#define COUNT 4\nvar<uniform> a: array<vec4<f32>, COUNT>;\nlet COUNTER = 1;\n";
        assert_eq!(
            preprocess(source, true),
            "var<uniform> a: array<vec4<f32>, 4>;\nlet COUNTER = 1;\n"
        );
    }

    #[test]
    fn test_preprocess_passes_other_directives() {
        let source = "#version 300 es\n#define A\nvoid main() {}\n";
        assert_eq!(preprocess(source, false), "#version 300 es\nvoid main() {}\n");
    }

    #[test]
    fn test_resolve_includes() {
        let mut chunks = HashMap::new();
        chunks.insert("light".to_string(), "#include <common>\nlight();".to_string());
        chunks.insert("common".to_string(), "common();".to_string());
        let out = resolve_includes("basic", "#include <light>\nmain();", &chunks).unwrap();
        assert_eq!(out, "common();\nlight();\nmain();\n");
    }

    #[test]
    fn test_resolve_includes_unknown_chunk() {
        let err = resolve_includes("basic", "#include <nope>", &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::ShaderInclude { ref chunk, .. } if chunk == "nope"));
    }

    #[test]
    fn test_convert_to_300() {
        let vertex = convert_to_300("attribute vec3 a_position;\nvarying vec2 v_uv;", ShaderStage::Vertex);
        assert_eq!(vertex, "in vec3 a_position;\nout vec2 v_uv;");

        let fragment = convert_to_300(
            "varying vec2 v_uv;\nvoid main() { gl_FragColor = texture2D(u_texture_0, v_uv); }",
            ShaderStage::Fragment,
        );
        assert!(fragment.starts_with("out vec4 glFragColor;\n"));
        assert!(fragment.contains("in vec2 v_uv;"));
        assert!(fragment.contains("glFragColor = texture(u_texture_0, v_uv);"));
    }

    #[test]
    fn test_synthesize_gles300_layout() {
        let macros = MacroCollection::from_macros([ShaderMacro::int("DIRECT_LIGHT_COUNT", 1)]);
        let source = synthesize(ShaderTarget::Gles300, ShaderStage::Vertex, &macros, "void main() {}");
        assert!(source.starts_with("#version 300 es\n"));
        let define_at = source.find("#define DIRECT_LIGHT_COUNT 1").unwrap();
        let precision_at = source.find("precision highp float;").unwrap();
        let main_at = source.find("void main()").unwrap();
        assert!(precision_at < define_at && define_at < main_at);
    }

    #[test]
    fn test_synthesize_gles100_fragment_extensions() {
        let source = synthesize(
            ShaderTarget::Gles100,
            ShaderStage::Fragment,
            &MacroCollection::new(),
            "void main() {}",
        );
        assert!(source.starts_with("#version 100\n"));
        assert!(source.contains("#extension GL_EXT_shader_texture_lod : enable"));
    }

    #[test]
    fn test_synthesize_wgsl_resolves_conditionals() {
        let macros = MacroCollection::from_macros([ShaderMacro::int("POINT_LIGHT_COUNT", 2)]);
        let base = "#ifdef POINT_LIGHT_COUNT\nvar<uniform> p: array<vec4<f32>, POINT_LIGHT_COUNT>;\n#endif\n";
        let source = synthesize(ShaderTarget::Wgsl, ShaderStage::Vertex, &macros, base);
        assert_eq!(source, "var<uniform> p: array<vec4<f32>, 2>;\n");
    }

    #[test]
    fn test_reflect_glsl_uniforms() {
        let source = "#define DIRECT_LIGHT_COUNT 2
uniform highp mat4 u_model;
uniform vec3 u_direct_light_color[DIRECT_LIGHT_COUNT], u_direct_light_direction[DIRECT_LIGHT_COUNT];
#ifdef POINT_LIGHT_COUNT
uniform vec3 u_point_light_color[POINT_LIGHT_COUNT];
#endif
uniform sampler2D u_texture_0;
uniform mat4 u_model;
void main() {}";
        let decls = reflect_uniforms(source, ShaderTarget::Gles300);
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            ["u_model", "u_direct_light_color", "u_direct_light_direction", "u_texture_0"]
        );
        assert_eq!(decls[0].kind, UniformKind::Mat4);
        assert!(decls[1].is_array);
        assert_eq!(decls[3].kind, UniformKind::Sampler2D);
    }

    #[test]
    fn test_reflect_wgsl_uniforms() {
        let source = "@group(0) @binding(0) var<uniform> u_model: mat4x4<f32>;
@group(0) @binding(1) var<uniform> u_direct_light_color: array<vec4<f32>, 2>;
@group(1) @binding(0) var u_texture_0: texture_2d<f32>;
@group(1) @binding(1) var u_sampler: sampler;
var<private> scratch: f32;";
        let decls = reflect_uniforms(source, ShaderTarget::Wgsl);
        assert_eq!(decls.len(), 3);
        assert_eq!(decls[0].kind, UniformKind::Mat4);
        assert_eq!(decls[1].kind, UniformKind::Vec4);
        assert!(decls[1].is_array);
        assert_eq!(decls[2].name, "u_texture_0");
        assert_eq!(decls[2].kind, UniformKind::Sampler2D);
    }

    #[test]
    fn test_reflect_wgsl_ignores_var_in_comments() {
        let source = "// the model var, set per draw
@group(0) @binding(0) var<uniform> u_model: mat4x4<f32>;
";
        let decls = reflect_uniforms(source, ShaderTarget::Wgsl);
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "u_model");
        assert_eq!(decls[0].kind, UniformKind::Mat4);
    }

    #[test]
    fn test_reflect_wgsl_follows_macros() {
        let source = "#ifdef POINT_LIGHT_COUNT
@group(1) @binding(0) var<uniform> u_point_light_color: array<vec3<f32>, POINT_LIGHT_COUNT>;
#endif
@group(0) @binding(0) var<uniform> u_model: mat4x4<f32>;
";
        let names = |source: &str| -> Vec<String> {
            reflect_uniforms(source, ShaderTarget::Wgsl)
                .into_iter()
                .map(|d| d.name)
                .collect()
        };
        assert_eq!(names(source), ["u_model"]);
        let defined = format!("#define POINT_LIGHT_COUNT 3\n{source}");
        assert_eq!(names(&defined), ["u_point_light_color", "u_model"]);
    }
}
