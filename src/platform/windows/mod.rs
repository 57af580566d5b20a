use std::sync::Arc;

use crate::engine::OutputSelector;
use crate::error::{CaptureError, CaptureResult};
use crate::grid::LightGrid;
use crate::signals::EngineSignals;

pub(crate) mod com;
pub(crate) mod composite;
pub(crate) mod d3d11;
pub(crate) mod duplication;
pub(crate) mod errors;
pub(crate) mod output;
pub(crate) mod sampler;
pub(crate) mod shaders;
pub(crate) mod surface;
pub(crate) mod worker;

use output::OutputInfo;
use sampler::LightSampler;
use worker::{OutputWorker, WorkerConfig};

/// One fully-built capture pipeline: the reader-side sampler plus one
/// writer thread per selected output. The supervisor tears the whole
/// thing down and builds a fresh one on every recovery cycle.
pub(crate) struct Session {
    signals: Arc<EngineSignals>,
    workers: Vec<OutputWorker>,
    // Declared after the workers; must outlive them since they hold the
    // shared surface open by handle.
    sampler: LightSampler,
}

impl Session {
    pub(crate) fn initialise(
        selector: OutputSelector,
        columns: u32,
        rows: u32,
        signals: Arc<EngineSignals>,
    ) -> CaptureResult<Self> {
        let (device, context) = d3d11::create_device().map_err(CaptureError::Platform)?;
        let adapter = output::adapter_for_device(&device)?;
        let available = output::enumerate_outputs(&adapter)?;
        if available.is_empty() {
            return Err(CaptureError::NoOutputs);
        }

        let selected: Vec<OutputInfo> = match selector {
            OutputSelector::All => available,
            OutputSelector::Index(index) => {
                let info = available
                    .iter()
                    .find(|info| info.index == index)
                    .copied()
                    .ok_or(CaptureError::OutputLost)?;
                vec![info]
            }
        };

        let bounds = output::desktop_bounds(&selected)?;
        let sampler = LightSampler::new(
            device,
            context,
            bounds.width() as u32,
            bounds.height() as u32,
            columns,
            rows,
        )?;

        let shared_handle = sampler.shared_handle();
        let offset = (bounds.left, bounds.top);
        let mut workers = Vec::with_capacity(selected.len());
        for info in &selected {
            workers.push(OutputWorker::spawn(WorkerConfig {
                output: *info,
                shared_handle,
                offset,
                signals: Arc::clone(&signals),
            })?);
        }
        log::debug!(
            "capture session up: {} output(s), surface {}x{}, grid {columns}x{rows}",
            selected.len(),
            bounds.width(),
            bounds.height(),
        );

        Ok(Self {
            signals,
            workers,
            sampler,
        })
    }

    pub(crate) fn sample(&mut self, colour_scale: [f32; 3]) -> CaptureResult<()> {
        self.sampler.sample(colour_scale)
    }

    pub(crate) fn grid(&self) -> &LightGrid {
        self.sampler.grid()
    }

    /// Terminates and joins every worker before the sampler (and with it
    /// the shared surface) goes away.
    pub(crate) fn shutdown(mut self) {
        self.signals.request_terminate();
        for worker in &mut self.workers {
            worker.join();
        }
        self.workers.clear();
    }
}
