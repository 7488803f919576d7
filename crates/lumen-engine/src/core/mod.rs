//! Contract between the runtime loop and the application.
//!
//! The runtime owns the window, GPU context and input capture; the
//! application sees them only through the contexts defined here.

mod app;
mod ctx;

pub use app::{App, AppControl};
pub use ctx::{FrameCtx, WindowCtx};
