//! Drawing: the backend seam, its implementations and the per-frame
//! scene renderer.

pub mod context;
pub mod headless;
pub mod list;
pub mod scene_renderer;
pub mod state;
pub mod wgpu_context;

pub use context::{DrawCall, GraphicsContext, ProgramId};
pub use headless::HeadlessContext;
pub use list::{RenderItem, RenderList};
pub use scene_renderer::{FrameStats, SceneRenderer};
pub use state::{RenderState, StateCache};
pub use wgpu_context::WgpuContext;
