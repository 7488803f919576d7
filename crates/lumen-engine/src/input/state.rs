use std::collections::HashSet;

use super::frame::InputFrame;
use super::types::{InputEvent, Key, KeyState, MouseButton, MouseButtonState};

/// Current input state for a single window.
///
/// Holds "is down" information and the last cursor position. Per-frame
/// transitions and cursor motion are recorded into an `InputFrame`.
#[derive(Debug, Default)]
pub struct InputState {
    pub focused: bool,

    /// Last cursor position in logical pixels. `None` until the first motion
    /// event and again after the cursor leaves the window.
    pub cursor_pos: Option<(f32, f32)>,

    pub keys_down: HashSet<Key>,
    pub buttons_down: HashSet<MouseButton>,
}

impl InputState {
    /// Applies an input event to the current state and writes deltas to `frame`.
    pub fn apply_event(&mut self, frame: &mut InputFrame, ev: InputEvent) {
        match ev {
            InputEvent::Focused(f) => {
                self.focused = f;
                if !f {
                    // Avoids stuck keys when focus changes mid-press.
                    self.keys_down.clear();
                    self.buttons_down.clear();
                    self.cursor_pos = None;
                }
            }

            InputEvent::CursorMoved { x, y } => {
                // The first position only seeds the tracker.
                if let Some((last_x, last_y)) = self.cursor_pos {
                    frame.cursor_delta.0 += x - last_x;
                    frame.cursor_delta.1 += y - last_y;
                }
                self.cursor_pos = Some((x, y));
            }

            InputEvent::CursorLeft => {
                self.cursor_pos = None;
            }

            InputEvent::Key { key, state, .. } => match state {
                KeyState::Pressed => {
                    if self.keys_down.insert(key) {
                        frame.keys_pressed.insert(key);
                    }
                }
                KeyState::Released => {
                    if self.keys_down.remove(&key) {
                        frame.keys_released.insert(key);
                    }
                }
            },

            InputEvent::MouseButton { button, state } => match state {
                MouseButtonState::Pressed => {
                    if self.buttons_down.insert(button) {
                        frame.buttons_pressed.insert(button);
                    }
                }
                MouseButtonState::Released => {
                    if self.buttons_down.remove(&button) {
                        frame.buttons_released.insert(button);
                    }
                }
            },
        }

        frame.push_event(ev);
    }

    pub fn key_down(&self, key: Key) -> bool {
        self.keys_down.contains(&key)
    }

    pub fn button_down(&self, btn: MouseButton) -> bool {
        self.buttons_down.contains(&btn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(key: Key) -> InputEvent {
        InputEvent::Key { key, state: KeyState::Pressed, repeat: false }
    }

    #[test]
    fn first_cursor_event_does_not_jump() {
        let mut state = InputState::default();
        let mut frame = InputFrame::default();

        state.apply_event(&mut frame, InputEvent::CursorMoved { x: 400.0, y: 300.0 });
        assert_eq!(frame.cursor_delta, (0.0, 0.0));

        state.apply_event(&mut frame, InputEvent::CursorMoved { x: 410.0, y: 295.0 });
        state.apply_event(&mut frame, InputEvent::CursorMoved { x: 412.0, y: 290.0 });
        assert_eq!(frame.cursor_delta, (12.0, -10.0));
    }

    #[test]
    fn cursor_leaving_reseeds_tracker() {
        let mut state = InputState::default();
        let mut frame = InputFrame::default();

        state.apply_event(&mut frame, InputEvent::CursorMoved { x: 10.0, y: 10.0 });
        state.apply_event(&mut frame, InputEvent::CursorLeft);
        state.apply_event(&mut frame, InputEvent::CursorMoved { x: 500.0, y: 500.0 });
        assert_eq!(frame.cursor_delta, (0.0, 0.0));
    }

    #[test]
    fn repeated_press_is_one_transition() {
        let mut state = InputState::default();
        let mut frame = InputFrame::default();

        state.apply_event(&mut frame, press(Key::W));
        frame.clear();
        state.apply_event(&mut frame, press(Key::W));

        assert!(state.key_down(Key::W));
        assert!(frame.keys_pressed.is_empty());
        assert_eq!(frame.events.len(), 1);
    }

    #[test]
    fn focus_loss_releases_everything() {
        let mut state = InputState::default();
        let mut frame = InputFrame::default();

        state.apply_event(&mut frame, press(Key::A));
        state.apply_event(
            &mut frame,
            InputEvent::MouseButton { button: MouseButton::Left, state: MouseButtonState::Pressed },
        );
        state.apply_event(&mut frame, InputEvent::Focused(false));

        assert!(!state.key_down(Key::A));
        assert!(!state.button_down(MouseButton::Left));
    }
}
