//! Window + runtime loop.
//!
//! Owns the `winit` EventLoop and Window, and wires them to the GPU layer
//! and input capture.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
