use anyhow::Context;
use windows::Win32::Foundation::{HANDLE, HRESULT, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_CPU_ACCESS_READ, D3D11_MAP_READ,
    D3D11_MAP_FLAG_DO_NOT_WAIT, D3D11_MAPPED_SUBRESOURCE, D3D11_RESOURCE_MISC_GENERATE_MIPS,
    D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{IDXGIKeyedMutex, IDXGIResource};
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};
use crate::platform::windows::errors::{self, SYSTEM_TRANSITION_ERRORS};

const WAIT_TIMEOUT_HR: HRESULT = HRESULT(WAIT_TIMEOUT.0 as i32);

/// Writer side acquires key 0 and hands the surface to the reader by
/// releasing key 1; the reader acquires key 1 and hands it back with
/// key 0. Workers and the sampler never touch the surface outside an
/// acquired span.
pub(crate) const KEY_WRITE: u64 = 0;
pub(crate) const KEY_READ: u64 = 1;

/// Creates the desktop-spanning shared surface on the sampler's device.
/// Full mip chain so the downsample pass reads pre-filtered levels, and
/// a keyed mutex so per-output writers on other devices can synchronise.
pub(crate) fn create_shared_surface(
    device: &ID3D11Device,
    width: u32,
    height: u32,
) -> CaptureResult<(ID3D11Texture2D, HANDLE)> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 0,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: (D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX.0 | D3D11_RESOURCE_MISC_GENERATE_MIPS.0)
            as u32,
    };

    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .context("failed to create shared desktop surface")
        .map_err(CaptureError::Platform)?;
    let texture = texture
        .context("CreateTexture2D returned no shared surface")
        .map_err(CaptureError::Platform)?;

    let dxgi_resource: IDXGIResource = texture
        .cast()
        .context("failed to cast shared surface to IDXGIResource")
        .map_err(CaptureError::Platform)?;
    let handle = unsafe { dxgi_resource.GetSharedHandle() }
        .context("IDXGIResource::GetSharedHandle failed")
        .map_err(CaptureError::Platform)?;

    Ok((texture, handle))
}

/// Opens the shared surface on a worker's device.
pub(crate) fn open_shared_surface(
    device: &ID3D11Device,
    handle: HANDLE,
) -> CaptureResult<ID3D11Texture2D> {
    unsafe { device.OpenSharedResource::<ID3D11Texture2D>(handle) }
        .context("ID3D11Device::OpenSharedResource failed for the shared surface")
        .map_err(CaptureError::Platform)
}

pub(crate) fn keyed_mutex_of(texture: &ID3D11Texture2D) -> CaptureResult<IDXGIKeyedMutex> {
    texture
        .cast()
        .context("shared surface does not expose IDXGIKeyedMutex")
        .map_err(CaptureError::Platform)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MutexAcquire {
    Acquired,
    TimedOut,
}

/// `AcquireSync` through the raw vtable: `WAIT_TIMEOUT` is a success
/// HRESULT, so the generated `Result<()>` wrapper cannot distinguish a
/// timeout from ownership.
pub(crate) fn acquire_keyed(
    mutex: &IDXGIKeyedMutex,
    key: u64,
    timeout_ms: u32,
) -> CaptureResult<MutexAcquire> {
    let hr = unsafe { (Interface::vtable(mutex).AcquireSync)(Interface::as_raw(mutex), key, timeout_ms) };
    if hr == WAIT_TIMEOUT_HR {
        return Ok(MutexAcquire::TimedOut);
    }
    if hr.is_ok() {
        return Ok(MutexAcquire::Acquired);
    }
    Err(errors::classify(
        windows::core::Error::from_hresult(hr),
        SYSTEM_TRANSITION_ERRORS,
        "keyed mutex acquire",
    ))
}

pub(crate) fn release_keyed(mutex: &IDXGIKeyedMutex, key: u64) -> CaptureResult<()> {
    let hr = unsafe { (Interface::vtable(mutex).ReleaseSync)(Interface::as_raw(mutex), key) };
    if hr.is_ok() {
        return Ok(());
    }
    Err(errors::classify(
        windows::core::Error::from_hresult(hr),
        SYSTEM_TRANSITION_ERRORS,
        "keyed mutex release",
    ))
}

/// CPU-readable staging twin for a small render target.
pub(crate) fn create_staging_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
) -> CaptureResult<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_STAGING,
        BindFlags: 0,
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: 0,
    };
    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .context("failed to create staging texture")
        .map_err(CaptureError::Platform)?;
    texture
        .context("CreateTexture2D returned no staging texture")
        .map_err(CaptureError::Platform)
}

/// Maps a staging resource for reading and hands the mapping to `read`.
/// Tries a non-blocking map first so a still-in-flight copy does not
/// stall the pump; falls back to a blocking map.
pub(crate) fn with_mapped_staging<R>(
    context: &ID3D11DeviceContext,
    resource: &ID3D11Resource,
    read: impl FnOnce(&D3D11_MAPPED_SUBRESOURCE) -> R,
) -> CaptureResult<R> {
    let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
    let first_try = unsafe {
        context.Map(
            resource,
            0,
            D3D11_MAP_READ,
            D3D11_MAP_FLAG_DO_NOT_WAIT.0 as u32,
            Some(&mut mapped),
        )
    };
    if first_try.is_err() {
        unsafe { context.Map(resource, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
            .context("failed to map staging texture for reading")
            .map_err(CaptureError::Platform)?;
    }

    let result = read(&mapped);
    unsafe { context.Unmap(resource, 0) };
    Ok(result)
}
