use anyhow::Context;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_B8G8R8A8_UNORM;
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT, IDXGIOutput1,
    IDXGIOutput5, IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};
use crate::geometry::{Rect, Rotation};
use crate::platform::windows::errors::{
    self, CREATE_DUPLICATION_ERRORS, FRAME_METADATA_ERRORS, SYSTEM_TRANSITION_ERRORS,
};
use crate::platform::windows::output::{self, OutputInfo};

/// One output's desktop duplication plus the per-frame metadata scratch.
///
/// The move/dirty vectors are grow-only and reused across frames; their
/// contents are only meaningful between a successful `acquire` and the
/// matching `release`.
pub(crate) struct FrameSource {
    duplication: IDXGIOutputDuplication,
    desktop_bounds: Rect,
    rotation: Rotation,
    frame_acquired: bool,
    moves: Vec<DXGI_OUTDUPL_MOVE_RECT>,
    dirties: Vec<RECT>,
}

impl FrameSource {
    /// Duplicates the output at `output_index` on the device's adapter.
    /// The worker's own device is used so the acquired texture lives on
    /// the device the worker composites with.
    pub(crate) fn bind(device: &ID3D11Device, info: OutputInfo) -> CaptureResult<Self> {
        let adapter = output::adapter_for_device(device)?;
        let dxgi_output = output::output_by_index(&adapter, info.index)?;

        let duplication = create_duplication(&dxgi_output, device)?;

        Ok(Self {
            duplication,
            desktop_bounds: info.desktop_bounds,
            rotation: info.rotation,
            frame_acquired: false,
            moves: Vec::new(),
            dirties: Vec::new(),
        })
    }

    pub(crate) fn desktop_bounds(&self) -> Rect {
        self.desktop_bounds
    }

    pub(crate) fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Waits up to `timeout_ms` for the next frame. `Ok(None)` on timeout;
    /// the desktop simply had nothing new. On success the frame stays
    /// acquired until `release`.
    pub(crate) fn acquire(&mut self, timeout_ms: u32) -> CaptureResult<Option<ID3D11Texture2D>> {
        debug_assert!(!self.frame_acquired, "acquire called with a frame still held");

        let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let result = unsafe {
            self.duplication
                .AcquireNextFrame(timeout_ms, &mut frame_info, &mut resource)
        };
        match result {
            Ok(()) => {}
            Err(err) if err.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(None),
            Err(err) => {
                return Err(errors::classify(err, SYSTEM_TRANSITION_ERRORS, "frame acquire"));
            }
        }
        self.frame_acquired = true;

        let resource = match resource {
            Some(resource) => resource,
            None => {
                self.release()?;
                return Err(CaptureError::Platform(anyhow::anyhow!(
                    "AcquireNextFrame succeeded without a desktop resource"
                )));
            }
        };
        let texture: ID3D11Texture2D = match resource.cast() {
            Ok(texture) => texture,
            Err(err) => {
                self.release()?;
                return Err(CaptureError::Platform(
                    anyhow::Error::from(err).context("desktop resource is not a 2D texture"),
                ));
            }
        };

        if let Err(err) = self.extract_metadata(frame_info.TotalMetadataBufferSize) {
            self.release()?;
            return Err(err);
        }
        Ok(Some(texture))
    }

    /// Move rects for the held frame, in application order (before dirties).
    pub(crate) fn move_rects(&self) -> &[DXGI_OUTDUPL_MOVE_RECT] {
        &self.moves
    }

    pub(crate) fn dirty_rects(&self) -> &[RECT] {
        &self.dirties
    }

    pub(crate) fn has_updates(&self) -> bool {
        !self.moves.is_empty() || !self.dirties.is_empty()
    }

    /// Hands the frame back to the duplication. Idempotent.
    pub(crate) fn release(&mut self) -> CaptureResult<()> {
        if !self.frame_acquired {
            return Ok(());
        }
        self.frame_acquired = false;
        self.moves.clear();
        self.dirties.clear();
        unsafe { self.duplication.ReleaseFrame() }
            .map_err(|err| errors::classify(err, SYSTEM_TRANSITION_ERRORS, "frame release"))
    }

    fn extract_metadata(&mut self, total_size: u32) -> CaptureResult<()> {
        self.moves.clear();
        self.dirties.clear();
        if total_size == 0 {
            return Ok(());
        }

        let move_stride = std::mem::size_of::<DXGI_OUTDUPL_MOVE_RECT>() as u32;
        let move_capacity = total_size / move_stride;
        self.moves
            .resize(move_capacity as usize, DXGI_OUTDUPL_MOVE_RECT::default());
        let mut moves_bytes = move_capacity * move_stride;
        unsafe {
            self.duplication.GetFrameMoveRects(
                moves_bytes,
                self.moves.as_mut_ptr(),
                &mut moves_bytes,
            )
        }
        .map_err(|err| errors::classify(err, FRAME_METADATA_ERRORS, "frame move rects"))?;
        self.moves.truncate((moves_bytes / move_stride) as usize);

        // Dirty rects fill whatever metadata budget the moves left over.
        let dirty_stride = std::mem::size_of::<RECT>() as u32;
        let dirty_capacity = total_size.saturating_sub(moves_bytes) / dirty_stride;
        self.dirties.resize(dirty_capacity as usize, RECT::default());
        let mut dirty_bytes = dirty_capacity * dirty_stride;
        unsafe {
            self.duplication.GetFrameDirtyRects(
                dirty_bytes,
                self.dirties.as_mut_ptr(),
                &mut dirty_bytes,
            )
        }
        .map_err(|err| errors::classify(err, FRAME_METADATA_ERRORS, "frame dirty rects"))?;
        self.dirties.truncate((dirty_bytes / dirty_stride) as usize);

        Ok(())
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        // Best effort; the duplication is going away with us.
        let _ = self.release();
    }
}

/// `DuplicateOutput1` keeps working when the desktop briefly switches to
/// HDR; plain `DuplicateOutput` is the down-level fallback.
fn create_duplication(
    output: &windows::Win32::Graphics::Dxgi::IDXGIOutput,
    device: &ID3D11Device,
) -> CaptureResult<IDXGIOutputDuplication> {
    if let Ok(output5) = output.cast::<IDXGIOutput5>() {
        let formats = [DXGI_FORMAT_B8G8R8A8_UNORM];
        if let Ok(duplication) = unsafe { output5.DuplicateOutput1(device, 0, &formats) } {
            return Ok(duplication);
        }
    }

    let output1: IDXGIOutput1 = output
        .cast()
        .context("IDXGIOutput1 is unavailable on this output")
        .map_err(CaptureError::Platform)?;
    unsafe { output1.DuplicateOutput(device) }
        .map_err(|err| errors::classify(err, CREATE_DUPLICATION_ERRORS, "duplication create"))
}
