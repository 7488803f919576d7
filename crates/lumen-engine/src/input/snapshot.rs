use super::frame::InputFrame;
use super::state::InputState;
use super::types::{Key, MouseButton};

/// Read-only view of the input for one frame.
///
/// Queries never mutate; the runtime clears the underlying frame after
/// `App::on_frame` returns.
#[derive(Debug, Copy, Clone)]
pub struct InputSnapshot<'a> {
    state: &'a InputState,
    frame: &'a InputFrame,
}

impl<'a> InputSnapshot<'a> {
    pub fn new(state: &'a InputState, frame: &'a InputFrame) -> Self {
        Self { state, frame }
    }

    /// Key is currently held.
    pub fn key_down(&self, key: Key) -> bool {
        self.state.key_down(key)
    }

    /// Key went down this frame.
    pub fn key_pressed(&self, key: Key) -> bool {
        self.frame.keys_pressed.contains(&key)
    }

    pub fn button_down(&self, button: MouseButton) -> bool {
        self.state.button_down(button)
    }

    /// Cursor motion since the last frame in logical pixels, `y` down.
    pub fn mouse_delta(&self) -> (f32, f32) {
        self.frame.cursor_delta
    }

    pub fn cursor_pos(&self) -> Option<(f32, f32)> {
        self.state.cursor_pos
    }

    pub fn focused(&self) -> bool {
        self.state.focused
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputEvent, KeyState};

    #[test]
    fn snapshot_reads_are_repeatable() {
        let mut state = InputState::default();
        let mut frame = InputFrame::default();
        state.apply_event(&mut frame, InputEvent::CursorMoved { x: 0.0, y: 0.0 });
        state.apply_event(&mut frame, InputEvent::CursorMoved { x: 3.0, y: 4.0 });
        state.apply_event(
            &mut frame,
            InputEvent::Key { key: Key::S, state: KeyState::Pressed, repeat: false },
        );

        let snap = InputSnapshot::new(&state, &frame);
        assert_eq!(snap.mouse_delta(), (3.0, 4.0));
        assert_eq!(snap.mouse_delta(), (3.0, 4.0));
        assert!(snap.key_down(Key::S));
        assert!(snap.key_pressed(Key::S));
        assert!(!snap.key_down(Key::W));
    }
}
