use std::sync::Arc;
use std::thread::{self, JoinHandle};

use windows::Win32::Foundation::{GENERIC_ALL, HANDLE};
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;
use windows::Win32::System::StationsAndDesktops::{
    CloseDesktop, DESKTOP_ACCESS_FLAGS, DESKTOP_CONTROL_FLAGS, OpenInputDesktop, SetThreadDesktop,
};

use crate::error::{CaptureError, CaptureResult};
use crate::platform::windows::com::CoInitGuard;
use crate::platform::windows::composite::CompositeEngine;
use crate::platform::windows::d3d11;
use crate::platform::windows::duplication::FrameSource;
use crate::platform::windows::output::OutputInfo;
use crate::platform::windows::surface::{self, KEY_READ, KEY_WRITE, MutexAcquire};
use crate::signals::{EngineSignals, FatalGuard};

/// Wait budget for one desktop frame. Expiring is routine on a static
/// desktop; the loop just spins back to the terminate check.
const ACQUIRE_TIMEOUT_MS: u32 = 500;

/// Wait budget for write ownership of the shared surface. Expiring means
/// the sampler held it; the worker keeps the acquired frame and retries.
const MUTEX_TIMEOUT_MS: u32 = 1000;

pub(crate) struct WorkerConfig {
    pub output: OutputInfo,
    /// Legacy DXGI shared handle (`IDXGIResource::GetSharedHandle`) for
    /// the surface, passed as an integer so the config can cross the
    /// thread spawn.
    pub shared_handle: isize,
    pub offset: (i32, i32),
    pub signals: Arc<EngineSignals>,
}

/// One capture thread pinned to one output. Dropping the handle requests
/// termination and joins.
pub(crate) struct OutputWorker {
    signals: Arc<EngineSignals>,
    join_handle: Option<JoinHandle<()>>,
}

impl OutputWorker {
    pub(crate) fn spawn(config: WorkerConfig) -> CaptureResult<Self> {
        let signals = Arc::clone(&config.signals);
        let index = config.output.index;
        let join_handle = thread::Builder::new()
            .name(format!("glow-capture-worker-{index}"))
            .spawn(move || worker_main(config))
            .map_err(|err| {
                CaptureError::Platform(
                    anyhow::Error::from(err).context("failed to spawn capture worker thread"),
                )
            })?;
        Ok(Self {
            signals,
            join_handle: Some(join_handle),
        })
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OutputWorker {
    fn drop(&mut self) {
        self.signals.request_terminate();
        self.join();
    }
}

fn worker_main(config: WorkerConfig) {
    let index = config.output.index;
    log::debug!("capture worker {index} starting");

    // Any exit that does not pass through the match below (a panic
    // unwinding off the thread) must still stop the engine; a silently
    // dead writer would leave its output frozen on the surface.
    let guard = FatalGuard::arm(Arc::clone(&config.signals));

    let _com = match CoInitGuard::init_multithreaded() {
        Ok(com) => com,
        Err(err) => {
            log::warn!("capture worker {index}: COM init failed: {err:#}");
            return;
        }
    };

    match run_worker(&config) {
        Ok(()) => log::debug!("capture worker {index} terminated cleanly"),
        Err(err) => {
            log::warn!("capture worker {index} exiting: {err}");
            config.signals.raise(&err);
        }
    }
    guard.disarm();
}

fn run_worker(config: &WorkerConfig) -> CaptureResult<()> {
    attach_input_desktop()?;

    let (device, context) = d3d11::create_device().map_err(CaptureError::Platform)?;
    let shared = surface::open_shared_surface(
        &device,
        HANDLE(config.shared_handle as *mut core::ffi::c_void),
    )?;
    let mutex = surface::keyed_mutex_of(&shared)?;
    let mut source = FrameSource::bind(&device, config.output)?;
    let mut compositor = CompositeEngine::new(device, context, shared, config.offset)?;

    // Frame kept across iterations when the mutex wait expired.
    let mut held: Option<ID3D11Texture2D> = None;
    while !config.signals.terminate_requested() {
        let frame = match held.take() {
            Some(frame) => frame,
            None => match source.acquire(ACQUIRE_TIMEOUT_MS)? {
                Some(frame) => frame,
                None => continue,
            },
        };

        // An accumulated-only frame carries nothing to replay.
        if !source.has_updates() {
            source.release()?;
            continue;
        }

        match surface::acquire_keyed(&mutex, KEY_WRITE, MUTEX_TIMEOUT_MS)? {
            MutexAcquire::Acquired => {}
            MutexAcquire::TimedOut => {
                held = Some(frame);
                continue;
            }
        }

        let composited = compositor.composite(&source, &frame);
        let released = surface::release_keyed(&mutex, KEY_READ);
        composited?;
        released?;
        source.release()?;
    }
    Ok(())
}

/// Binds the thread to whatever desktop currently receives input, so
/// duplication keeps working across winlogon/secure-desktop switches.
/// Denial happens when the session is locked; the supervisor retries.
fn attach_input_desktop() -> CaptureResult<()> {
    let desktop = unsafe {
        OpenInputDesktop(
            DESKTOP_CONTROL_FLAGS(0),
            false,
            DESKTOP_ACCESS_FLAGS(GENERIC_ALL.0),
        )
    }
    .map_err(|_| CaptureError::SystemTransition("input desktop open"))?;

    let attached = unsafe { SetThreadDesktop(desktop) };
    let _ = unsafe { CloseDesktop(desktop) };
    attached.map_err(|_| CaptureError::SystemTransition("input desktop attach"))
}
