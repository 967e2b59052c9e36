//! Compute-to-graphics bridge that renders a GPU-generated fractal.
//!
//! A compute kernel fills one shared `Rgba32Float` texture; a render pipeline
//! samples that texture onto a full-screen quad. The flow is:
//!
//! ```text
//!   FractalConfig
//!        │ validate()
//!        ▼
//!   Session::new ──▶ GraphicsProgram + ComputeKernel + SharedTexture
//!        │
//!        ├─▶ recompute() ──▶ drain ▸ acquire ▸ dispatch ▸ release ▸ wait
//!        │
//!        └─▶ winit event loop ──▶ render_frame() (graphics-owned only)
//! ```
//!
//! Shader and kernel sources are parsed and validated with naga before the
//! device sees them, so build failures carry a readable diagnostic log and the
//! build rules are testable without a GPU. Ownership of the shared texture is
//! tracked explicitly in [`sync`]; nothing draws while the kernel owns it.

pub mod compile;
pub mod error;
pub mod geometry;
mod gpu;
pub mod sync;
pub mod types;
mod window;

pub use error::{BuildError, BuildStage, ErrorKind, FractalError, Result, SyncError};
pub use gpu::{FrameImage, LiveResources, ResourceReport, Session};
pub use sync::{KernelTiming, Ownership};
pub use types::{BuildOptions, DispatchGeometry, FractalConfig, ShaderPaths};
pub use window::run;
