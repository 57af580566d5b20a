use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{CaptureError, ErrorClass};

/// Level-triggered condition flags shared between the supervisor, the
/// sampler, and every output worker. Workers never return errors across
/// the thread boundary; they classify and raise the matching flag here.
#[derive(Debug, Default)]
pub struct EngineSignals {
    terminate: AtomicBool,
    expected: AtomicBool,
    fatal: AtomicBool,
}

impl EngineSignals {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::Release);
    }

    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    pub fn raise_expected(&self) {
        self.expected.store(true, Ordering::Release);
    }

    pub fn expected_raised(&self) -> bool {
        self.expected.load(Ordering::Acquire)
    }

    pub fn raise_fatal(&self) {
        self.fatal.store(true, Ordering::Release);
    }

    pub fn fatal_raised(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    /// Maps an error onto the condition flags. Busy and invalid-input
    /// errors stay local to their caller and raise nothing.
    pub fn raise(&self, error: &CaptureError) {
        match error.class() {
            ErrorClass::Transient => self.raise_expected(),
            ErrorClass::Fatal => self.raise_fatal(),
            ErrorClass::Busy | ErrorClass::InvalidInput => {}
        }
    }

    /// Clears the error conditions ahead of a re-initialisation attempt.
    /// The terminate request is cleared too so freshly spawned workers
    /// start in a runnable state.
    pub fn clear(&self) {
        self.terminate.store(false, Ordering::Release);
        self.expected.store(false, Ordering::Release);
        self.fatal.store(false, Ordering::Release);
    }
}

/// Raises the fatal condition when dropped, unless disarmed first.
///
/// Worker threads hold one across their whole run so an exit path that
/// skips classification entirely (a panic unwinding off the thread) still
/// surfaces instead of leaving a dead writer behind a running engine.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub struct FatalGuard {
    signals: Arc<EngineSignals>,
    armed: bool,
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
impl FatalGuard {
    pub fn arm(signals: Arc<EngineSignals>) -> Self {
        Self {
            signals,
            armed: true,
        }
    }

    /// Consumes the guard without raising; call on every accounted-for
    /// exit, clean or already classified.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FatalGuard {
    fn drop(&mut self) {
        if self.armed {
            self.signals.raise_fatal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_routes_by_class() {
        let signals = EngineSignals::new();
        signals.raise(&CaptureError::NotReady);
        assert!(!signals.expected_raised());
        assert!(!signals.fatal_raised());

        signals.raise(&CaptureError::SystemTransition("frame acquire"));
        assert!(signals.expected_raised());
        assert!(!signals.fatal_raised());

        signals.raise(&CaptureError::Platform(anyhow::anyhow!("boom")));
        assert!(signals.fatal_raised());
    }

    #[test]
    fn flags_are_level_triggered_until_cleared() {
        let signals = EngineSignals::new();
        signals.raise_expected();
        signals.request_terminate();
        assert!(signals.expected_raised());
        assert!(signals.expected_raised());
        assert!(signals.terminate_requested());

        signals.clear();
        assert!(!signals.expected_raised());
        assert!(!signals.fatal_raised());
        assert!(!signals.terminate_requested());
    }

    #[test]
    fn unwinding_past_an_armed_guard_raises_fatal() {
        let signals = Arc::new(EngineSignals::new());
        let inner = Arc::clone(&signals);
        let unwound = std::panic::catch_unwind(move || {
            let _guard = FatalGuard::arm(inner);
            panic!("worker loop died");
        });
        assert!(unwound.is_err());
        assert!(signals.fatal_raised());
    }

    #[test]
    fn disarmed_guard_raises_nothing() {
        let signals = Arc::new(EngineSignals::new());
        FatalGuard::arm(Arc::clone(&signals)).disarm();
        assert!(!signals.fatal_raised());
    }
}
