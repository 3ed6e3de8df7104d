//! prism3d: a small real-time 3D engine.
//!
//! A [`Scene`] holds transform nodes, lights and shaders. A
//! [`SceneRenderer`] turns it into draw calls against a
//! [`GraphicsContext`], and an [`Engine`] decides when frames happen.

pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod light;
pub mod logging;
pub mod math;
pub mod render;
pub mod scene;
pub mod shader;

pub use config::EngineConfig;
pub use engine::{Engine, FrameSource};
pub use error::{Error, Result};
pub use geometry::Geometry;
pub use light::{AmbientDiffuse, AmbientLight, Light};
pub use render::{GraphicsContext, HeadlessContext, SceneRenderer, WgpuContext};
pub use scene::camera::{Camera, Viewport};
pub use scene::node::{Drawable, Node, NodeKey, NodeKind};
pub use scene::Scene;
pub use shader::{Shader, ShaderKey};
