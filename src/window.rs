/// Management of the game client's top-level window.
///
/// The calibration geometry assumes fixed client resolutions, so the control
/// surface exposes resize presets next to activation and border removal.
pub trait GameWindow {
    /// Bring the window to the foreground, restoring it if minimized.
    fn activate(&self) -> bool;

    fn resize(&self, width: i32, height: i32) -> bool;

    fn move_to(&self, x: i32, y: i32) -> bool;

    /// Strip the caption bar and sizing frame so screen coordinates line up
    /// with the client area.
    fn remove_border(&self) -> bool;
}

#[cfg(windows)]
pub use desktop::DesktopWindow;

#[cfg(windows)]
mod desktop {
    use windows::Win32::Foundation::{HWND, RECT};
    use windows::Win32::UI::WindowsAndMessaging::{
        FindWindowW, GetWindowLongW, GetWindowRect, GWL_STYLE, IsIconic, MoveWindow,
        SetForegroundWindow, SetWindowLongW, SetWindowPos, ShowWindow, SW_RESTORE,
        SWP_FRAMECHANGED, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER, WS_CAPTION, WS_THICKFRAME,
    };
    use windows::core::PCWSTR;

    use super::GameWindow;

    /// `GameWindow` for a window found by its exact title.
    pub struct DesktopWindow {
        title: String,
    }

    impl DesktopWindow {
        pub fn new(title: String) -> Self {
            Self { title }
        }

        fn find(&self) -> Option<HWND> {
            let wide: Vec<u16> = self.title.encode_utf16().chain(Some(0)).collect();
            match unsafe { FindWindowW(PCWSTR::null(), PCWSTR(wide.as_ptr())) } {
                Ok(hwnd) => Some(hwnd),
                Err(_) => {
                    tracing::warn!("window {:?} not found", self.title);
                    None
                }
            }
        }
    }

    impl GameWindow for DesktopWindow {
        fn activate(&self) -> bool {
            let Some(hwnd) = self.find() else {
                return false;
            };
            unsafe {
                if IsIconic(hwnd).as_bool() {
                    let _ = ShowWindow(hwnd, SW_RESTORE);
                }
                SetForegroundWindow(hwnd).as_bool()
            }
        }

        fn resize(&self, width: i32, height: i32) -> bool {
            let Some(hwnd) = self.find() else {
                return false;
            };
            let mut rect = RECT::default();
            unsafe {
                if GetWindowRect(hwnd, &mut rect).is_err() {
                    return false;
                }
                match MoveWindow(hwnd, rect.left, rect.top, width, height, true) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("resize to {width}x{height} failed: {e}");
                        false
                    }
                }
            }
        }

        fn move_to(&self, x: i32, y: i32) -> bool {
            let Some(hwnd) = self.find() else {
                return false;
            };
            let mut rect = RECT::default();
            unsafe {
                if GetWindowRect(hwnd, &mut rect).is_err() {
                    return false;
                }
                let width = rect.right - rect.left;
                let height = rect.bottom - rect.top;
                MoveWindow(hwnd, x, y, width, height, true).is_ok()
            }
        }

        fn remove_border(&self) -> bool {
            let Some(hwnd) = self.find() else {
                return false;
            };
            unsafe {
                let style = GetWindowLongW(hwnd, GWL_STYLE);
                let stripped = style & !((WS_CAPTION.0 | WS_THICKFRAME.0) as i32);
                SetWindowLongW(hwnd, GWL_STYLE, stripped);
                SetWindowPos(
                    hwnd,
                    None,
                    0,
                    0,
                    0,
                    0,
                    SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_FRAMECHANGED,
                )
                .is_ok()
            }
        }
    }
}
