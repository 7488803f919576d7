//! Input subsystem.
//!
//! Public API is platform-agnostic and does not expose winit types.
//! `translate` maps winit window events into `InputEvent`s for the runtime.

mod frame;
mod snapshot;
mod state;
pub(crate) mod translate;
mod types;

pub use frame::InputFrame;
pub use snapshot::InputSnapshot;
pub use state::InputState;
pub use types::{InputEvent, Key, KeyState, MouseButton, MouseButtonState};
