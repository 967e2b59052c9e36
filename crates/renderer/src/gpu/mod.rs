//! Device-side half of the bridge.
//!
//! - `context` selects adapter, device and queue, and owns the window surface
//!   or the headless target. Both sides share the one device.
//! - `program` and `kernel` turn validated sources into the render and compute
//!   pipelines.
//! - `texture` owns the shared image, its two views and the ownership tracker.
//! - `handoff` records one kernel pass for the ownership protocol.
//! - `display` encodes the per-frame quad draw.
//! - `session` glues everything together in dependency order.

mod context;
mod display;
mod handoff;
mod kernel;
mod program;
mod session;
mod texture;

pub use context::{LiveResources, ResourceReport};
pub use session::{FrameImage, Session};
