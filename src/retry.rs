use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::{Duration, Instant, sleep};

/// Cooperative stop signal shared between the control surface and the
/// automation loops.
///
/// A plain relaxed boolean is enough here: the requirement is "stop soon",
/// not "stop exactly now", and one stale poll interval is tolerable. The
/// token is cleared at the start of each top-level run and can be set from
/// any task at any time.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a bounded polling wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait<T> {
    Found(T),
    TimedOut,
    Cancelled,
}

impl<T> Wait<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Wait::Found(v) => Some(v),
            _ => None,
        }
    }
}

/// Run `probe` every `interval` until it yields a value, `timeout` elapses,
/// or `cancel` fires. The probe runs at least once, so a zero timeout still
/// checks the current state.
pub async fn poll_until<T>(
    mut probe: impl FnMut() -> Option<T>,
    timeout: Duration,
    interval: Duration,
    cancel: &CancelToken,
) -> Wait<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        if let Some(value) = probe() {
            return Wait::Found(value);
        }
        if Instant::now() >= deadline {
            return Wait::TimedOut;
        }
        sleep(interval).await;
    }
}
