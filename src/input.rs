/// Keys the automation needs by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
    Tab,
}

/// Synthetic mouse/keyboard events.
///
/// Calls are fire-and-forget; a lost event shows up as a failed template
/// check on the next scan.
pub trait Input {
    fn click(&self, x: i32, y: i32);

    /// Wheel rotation in clicks; positive scrolls up (away from the user).
    fn scroll(&self, clicks: i32);

    fn type_text(&self, text: &str);

    /// Text entry for fields that may hold non-ASCII (receiver nicknames).
    fn paste_text(&self, text: &str);

    fn key_press(&self, key: Key);
}

#[cfg(windows)]
pub use desktop::DesktopInput;

#[cfg(windows)]
mod desktop {
    use super::{Input, Key};

    /// `Input` backed by Win32 `SendInput` via winput.
    pub struct DesktopInput;

    impl Input for DesktopInput {
        fn click(&self, x: i32, y: i32) {
            if let Err(e) = winput::Mouse::set_position(x, y) {
                tracing::warn!("failed to move cursor to ({x}, {y}): {e:?}");
                return;
            }
            winput::send(winput::Button::Left);
        }

        fn scroll(&self, clicks: i32) {
            // A dropped wheel event surfaces as a failed sentinel check on
            // the next probe.
            let _ = winput::Mouse::scroll(clicks as f32);
        }

        fn type_text(&self, text: &str) {
            winput::send_str(text);
        }

        fn paste_text(&self, text: &str) {
            // SendInput's unicode path covers non-ASCII directly, so no
            // clipboard round-trip is needed.
            winput::send_str(text);
        }

        fn key_press(&self, key: Key) {
            let vk = match key {
                Key::Enter => winput::Vk::Enter,
                Key::Escape => winput::Vk::Escape,
                Key::Tab => winput::Vk::Tab,
            };
            winput::send(vk);
        }
    }
}
