#[cfg(not(target_os = "windows"))]
use std::sync::Arc;

#[cfg(not(target_os = "windows"))]
use crate::engine::OutputSelector;
#[cfg(not(target_os = "windows"))]
use crate::error::CaptureResult;
#[cfg(not(target_os = "windows"))]
use crate::grid::LightGrid;
#[cfg(not(target_os = "windows"))]
use crate::signals::EngineSignals;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(target_os = "windows")]
pub(crate) use windows::Session;

/// Stub session for platforms without desktop duplication; `start` fails
/// before ever constructing one of these, so the methods are unreachable
/// but keep the supervisor portable.
#[cfg(not(target_os = "windows"))]
pub(crate) struct Session;

#[cfg(not(target_os = "windows"))]
impl Session {
    pub(crate) fn initialise(
        _selector: OutputSelector,
        _columns: u32,
        _rows: u32,
        _signals: Arc<EngineSignals>,
    ) -> CaptureResult<Self> {
        Err(crate::error::CaptureError::Unsupported(
            "desktop duplication capture requires Windows".into(),
        ))
    }

    pub(crate) fn sample(&mut self, _colour_scale: [f32; 3]) -> CaptureResult<()> {
        Err(crate::error::CaptureError::NotRunning)
    }

    pub(crate) fn grid(&self) -> &LightGrid {
        unreachable!("stub session is never constructed")
    }

    pub(crate) fn shutdown(self) {}
}
