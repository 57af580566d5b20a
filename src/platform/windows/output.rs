use anyhow::Context;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D11::ID3D11Device;
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_MODE_ROTATION, DXGI_MODE_ROTATION_ROTATE90, DXGI_MODE_ROTATION_ROTATE180,
    DXGI_MODE_ROTATION_ROTATE270,
};
use windows::Win32::Graphics::Dxgi::{DXGI_ERROR_NOT_FOUND, IDXGIAdapter, IDXGIDevice, IDXGIOutput};
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};
use crate::geometry::{Rect, Rotation, union_rect};
use crate::platform::windows::errors::{self, ENUM_OUTPUTS_ERRORS};

/// Snapshot of one desktop-attached output at enumeration time.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OutputInfo {
    pub index: u32,
    pub desktop_bounds: Rect,
    pub rotation: Rotation,
}

pub(crate) fn rect_from_win32(rect: RECT) -> Rect {
    Rect::new(rect.left, rect.top, rect.right, rect.bottom)
}

pub(crate) fn rotation_from_mode(mode: DXGI_MODE_ROTATION) -> Rotation {
    match mode {
        DXGI_MODE_ROTATION_ROTATE90 => Rotation::Rotate90,
        DXGI_MODE_ROTATION_ROTATE180 => Rotation::Rotate180,
        DXGI_MODE_ROTATION_ROTATE270 => Rotation::Rotate270,
        // IDENTITY and UNSPECIFIED both mean "no remap needed".
        _ => Rotation::Identity,
    }
}

pub(crate) fn adapter_for_device(device: &ID3D11Device) -> CaptureResult<IDXGIAdapter> {
    let dxgi_device: IDXGIDevice = device
        .cast()
        .context("failed to cast ID3D11Device to IDXGIDevice")
        .map_err(CaptureError::Platform)?;
    unsafe { dxgi_device.GetAdapter() }
        .context("IDXGIDevice::GetAdapter failed")
        .map_err(CaptureError::Platform)
}

/// Walks the adapter's outputs and returns the desktop-attached ones in
/// enumeration order. An empty result is a recoverable condition, not a
/// fatal one (displays reappear after driver restarts).
pub(crate) fn enumerate_outputs(adapter: &IDXGIAdapter) -> CaptureResult<Vec<OutputInfo>> {
    let mut outputs = Vec::new();
    let mut index = 0u32;
    loop {
        let output = match unsafe { adapter.EnumOutputs(index) } {
            Ok(output) => output,
            Err(err) if err.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(err) => {
                return Err(errors::classify(err, ENUM_OUTPUTS_ERRORS, "output enumeration"));
            }
        };

        let desc = unsafe { output.GetDesc() }
            .context("IDXGIOutput::GetDesc failed")
            .map_err(CaptureError::Platform)?;
        if desc.AttachedToDesktop.as_bool() {
            outputs.push(OutputInfo {
                index,
                desktop_bounds: rect_from_win32(desc.DesktopCoordinates),
                rotation: rotation_from_mode(desc.Rotation),
            });
        }
        index += 1;
    }
    Ok(outputs)
}

/// Looks up a single output by its adapter enumeration index. A missing
/// index is an allow-listed condition (the display went away since the
/// session was built), so it classifies transient and the supervisor
/// rebuilds.
pub(crate) fn output_by_index(adapter: &IDXGIAdapter, index: u32) -> CaptureResult<IDXGIOutput> {
    unsafe { adapter.EnumOutputs(index) }
        .map_err(|err| errors::classify(err, ENUM_OUTPUTS_ERRORS, "output lookup"))
}

/// Union of the given outputs' desktop bounds. The shared surface spans
/// exactly this rectangle; its origin may be negative in desktop space.
pub(crate) fn desktop_bounds(outputs: &[OutputInfo]) -> CaptureResult<Rect> {
    let mut iter = outputs.iter();
    let first = iter.next().ok_or(CaptureError::NoOutputs)?;
    Ok(iter.fold(first.desktop_bounds, |bounds, info| {
        union_rect(bounds, info.desktop_bounds)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_rotation_is_identity() {
        use windows::Win32::Graphics::Dxgi::Common::{
            DXGI_MODE_ROTATION_IDENTITY, DXGI_MODE_ROTATION_UNSPECIFIED,
        };
        assert_eq!(rotation_from_mode(DXGI_MODE_ROTATION_UNSPECIFIED), Rotation::Identity);
        assert_eq!(rotation_from_mode(DXGI_MODE_ROTATION_IDENTITY), Rotation::Identity);
        assert_eq!(rotation_from_mode(DXGI_MODE_ROTATION_ROTATE270), Rotation::Rotate270);
    }

    #[test]
    fn desktop_bounds_spans_all_outputs() {
        let outputs = [
            OutputInfo {
                index: 0,
                desktop_bounds: Rect::new(0, 0, 1920, 1080),
                rotation: Rotation::Identity,
            },
            OutputInfo {
                index: 1,
                desktop_bounds: Rect::new(-1080, -420, 0, 1500),
                rotation: Rotation::Rotate90,
            },
        ];
        let bounds = desktop_bounds(&outputs).unwrap();
        assert_eq!(bounds, Rect::new(-1080, -420, 1920, 1500));
    }

    #[test]
    fn empty_output_list_is_no_outputs() {
        assert!(matches!(desktop_bounds(&[]), Err(CaptureError::NoOutputs)));
    }
}
