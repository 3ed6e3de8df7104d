//! Error types for the engine.

use thiserror::Error;

/// Shader pipeline stage, used to tag compile failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Main error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// No graphics context could be acquired (adapter, device or surface).
    #[error("graphics context unavailable: {0}")]
    ContextUnavailable(String),

    /// A synthesized program failed to compile or link.
    #[error("{stage} shader of `{shader}` failed to compile: {log}")]
    ShaderCompile {
        shader: String,
        stage: ShaderStage,
        log: String,
    },

    /// An `#include` directive referenced an unknown chunk.
    #[error("shader `{shader}` includes unknown chunk `{chunk}`")]
    ShaderInclude { shader: String, chunk: String },

    /// A node key that is no longer (or never was) part of the scene.
    #[error("node is not part of the scene")]
    UnknownNode,

    /// Configuration errors
    #[error("config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;
