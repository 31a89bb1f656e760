//! Keyboard input state tracking.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Tracks the current keyboard state across frames.
#[derive(Debug, Default)]
pub struct InputState {
    /// Currently pressed keys.
    pressed: HashSet<KeyCode>,
    /// Keys pressed this frame.
    just_pressed: HashSet<KeyCode>,
    /// Keys released this frame.
    just_released: HashSet<KeyCode>,
}

impl InputState {
    /// Creates an empty input state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears per-frame state; call at the start of every frame.
    pub fn begin_frame(&mut self) {
        self.just_pressed.clear();
        self.just_released.clear();
    }

    /// Records a key press event.
    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.pressed.insert(key) {
            self.just_pressed.insert(key);
        }
    }

    /// Records a key release event.
    pub fn on_key_released(&mut self, key: KeyCode) {
        if self.pressed.remove(&key) {
            self.just_released.insert(key);
        }
    }

    /// True while the key is held.
    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.pressed.contains(&key)
    }

    /// True only on the frame the key went down.
    pub fn was_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed.contains(&key)
    }

    /// True only on the frame the key went up.
    pub fn was_just_released(&self, key: KeyCode) -> bool {
        self.just_released.contains(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_release_cycle() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Space);
        assert!(input.is_pressed(KeyCode::Space));
        assert!(input.was_just_pressed(KeyCode::Space));

        input.begin_frame();
        assert!(input.is_pressed(KeyCode::Space));
        assert!(!input.was_just_pressed(KeyCode::Space));

        input.on_key_released(KeyCode::Space);
        assert!(!input.is_pressed(KeyCode::Space));
        assert!(input.was_just_released(KeyCode::Space));
    }

    #[test]
    fn test_repeat_press_is_not_just_pressed_again() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::KeyW);
        input.begin_frame();
        // OS key repeat delivers another press while held.
        input.on_key_pressed(KeyCode::KeyW);
        assert!(!input.was_just_pressed(KeyCode::KeyW));
    }
}
