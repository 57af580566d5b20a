use std::sync::Arc;

use crate::backoff::BackoffTimer;
use crate::error::{CaptureError, CaptureResult};
use crate::grid::LightGrid;
use crate::platform::Session;
use crate::signals::EngineSignals;

/// Which outputs feed the shared surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputSelector {
    /// Every desktop-attached output; the surface spans their union.
    All,
    /// A single output by adapter enumeration index.
    Index(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
    /// A transient error tore the pipeline down; ticks are rebuilding it
    /// under back-off. Light values stay at their last sampled state.
    Recovering,
}

/// Supervised screen-to-light-grid capture engine.
///
/// The engine owns the whole pipeline: per-output capture workers writing
/// into a shared surface and a sampler downsampling it into the light
/// grid. The caller drives it by pumping [`tick`](Self::tick); expected
/// system transitions (mode changes, session lock, driver resets) are
/// absorbed by rebuilding the pipeline with banded back-off, and only
/// unrecoverable errors stop it.
pub struct LightEngine {
    state: EngineState,
    selector: OutputSelector,
    columns: u32,
    rows: u32,
    colour_scale: [f32; 3],
    signals: Arc<EngineSignals>,
    backoff: BackoffTimer,
    session: Option<Session>,
    latest: LightGrid,
}

impl LightEngine {
    pub fn new() -> Self {
        Self {
            state: EngineState::Stopped,
            selector: OutputSelector::All,
            columns: 0,
            rows: 0,
            colour_scale: [1.0, 1.0, 1.0],
            signals: Arc::new(EngineSignals::new()),
            backoff: BackoffTimer::new(),
            session: None,
            latest: LightGrid::new(0, 0),
        }
    }

    /// Builds the capture pipeline and transitions to `Running`. Errors
    /// propagate to the caller and leave the engine stopped.
    pub fn start(
        &mut self,
        selector: OutputSelector,
        columns: u32,
        rows: u32,
    ) -> CaptureResult<()> {
        if self.state != EngineState::Stopped {
            return Err(CaptureError::AlreadyRunning);
        }
        if columns == 0 || rows == 0 {
            return Err(CaptureError::InvalidConfig(
                "light grid dimensions must be non-zero".into(),
            ));
        }

        self.signals.clear();
        let session = Session::initialise(selector, columns, rows, Arc::clone(&self.signals))?;

        self.selector = selector;
        self.columns = columns;
        self.rows = rows;
        self.latest = LightGrid::new(columns as usize, rows as usize);
        self.session = Some(session);
        self.backoff = BackoffTimer::new();
        self.state = EngineState::Running;
        Ok(())
    }

    /// Pumps the engine once: samples the light grid, or advances one
    /// recovery step when a transient error was signalled. Returns `false`
    /// only after the engine stopped (fatal error or never started);
    /// recovery passes return `true`.
    pub fn tick(&mut self) -> bool {
        if self.state == EngineState::Stopped {
            return false;
        }
        if self.signals.fatal_raised() {
            log::warn!("stopping capture after an unrecoverable error");
            self.stop();
            return false;
        }
        if self.signals.expected_raised() || self.session.is_none() {
            self.recover();
            return true;
        }

        let scale = self.colour_scale;
        if let Some(session) = self.session.as_mut() {
            match session.sample(scale) {
                Ok(()) => self.latest.copy_from(session.grid()),
                // Writers held the surface the whole wait; previous grid
                // stays current.
                Err(err) if err.is_busy() => {}
                Err(err) => {
                    log::warn!("light sampling failed: {err}");
                    self.signals.raise(&err);
                }
            }
        }
        true
    }

    /// Tears down and rebuilds the pipeline, paced by the back-off timer.
    fn recover(&mut self) {
        self.state = EngineState::Recovering;
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
        self.signals.clear();
        self.backoff.wait();

        match Session::initialise(
            self.selector,
            self.columns,
            self.rows,
            Arc::clone(&self.signals),
        ) {
            Ok(session) => {
                log::debug!("capture pipeline rebuilt");
                self.session = Some(session);
                self.state = EngineState::Running;
            }
            Err(err) if err.is_recoverable() => {
                log::warn!("capture recovery attempt failed, will retry: {err}");
                self.signals.raise_expected();
            }
            Err(err) => {
                log::warn!("capture recovery failed: {err}");
                self.signals.raise_fatal();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state != EngineState::Stopped
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Per-channel multiplier applied inside the downsample pass, clamped
    /// to `[0, 1]`. Takes effect on the next sample.
    pub fn set_colour_scale(&mut self, r: f32, g: f32, b: f32) {
        self.colour_scale = [r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0)];
    }

    pub fn colour_scale(&self) -> [f32; 3] {
        self.colour_scale
    }

    /// Most recent light grid, in serpentine row order. All zeroes until
    /// the first successful sample; retained across recovery cycles.
    pub fn light_values(&self) -> &[u32] {
        self.latest.values()
    }

    /// Copies up to `out.len()` light values; returns how many were written.
    pub fn copy_light_values(&self, out: &mut [u32]) -> usize {
        self.latest.copy_into(out)
    }

    /// Idempotent full teardown: workers terminated and joined, surface
    /// released. The last sampled grid remains readable.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
        self.state = EngineState::Stopped;
    }
}

impl Default for LightEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn zero_grid_dimensions_are_rejected_before_any_platform_work() {
        let mut engine = LightEngine::new();
        let err = engine.start(OutputSelector::All, 0, 6).unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidInput);
        assert!(!engine.is_running());
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn tick_on_a_stopped_engine_returns_false() {
        let mut engine = LightEngine::new();
        assert!(!engine.tick());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut engine = LightEngine::new();
        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn colour_scale_is_clamped_to_unit_range() {
        let mut engine = LightEngine::new();
        engine.set_colour_scale(1.5, -0.25, 0.5);
        assert_eq!(engine.colour_scale(), [1.0, 0.0, 0.5]);
    }

    #[test]
    fn light_values_are_empty_before_start() {
        let engine = LightEngine::new();
        assert!(engine.light_values().is_empty());
        let mut buf = [0u32; 4];
        assert_eq!(engine.copy_light_values(&mut buf), 0);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn start_fails_cleanly_where_capture_is_unsupported() {
        let mut engine = LightEngine::new();
        let err = engine.start(OutputSelector::All, 8, 4).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(!engine.is_running());
    }
}
