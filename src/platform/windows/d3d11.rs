use anyhow::{Context, Result};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL_10_0,
    D3D_FEATURE_LEVEL_10_1, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_9_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION, D3D11CreateDevice, ID3D11Device,
    ID3D11DeviceContext,
};

/// Driver types tried in order; WARP keeps capture alive on machines where
/// the hardware device cannot be created (e.g. some remote sessions).
const DRIVER_TYPES: [D3D_DRIVER_TYPE; 2] = [D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP];

/// Creates a D3D11 device and immediate context on the default adapter.
///
/// Each capture worker and the light sampler create their own device;
/// cross-thread sharing happens only through the keyed-mutex surface, so
/// no device is ever touched from two threads.
pub(crate) fn create_device() -> Result<(ID3D11Device, ID3D11DeviceContext)> {
    let feature_levels = [
        D3D_FEATURE_LEVEL_11_0,
        D3D_FEATURE_LEVEL_10_1,
        D3D_FEATURE_LEVEL_10_0,
        D3D_FEATURE_LEVEL_9_1,
    ];

    let mut last_error = None;
    for driver_type in DRIVER_TYPES {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        let result = unsafe {
            D3D11CreateDevice(
                None,
                driver_type,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
        };
        match result {
            Ok(()) => {
                let device = device.context("D3D11CreateDevice did not return a device")?;
                let context =
                    context.context("D3D11CreateDevice did not return a device context")?;
                return Ok((device, context));
            }
            Err(err) => last_error = Some(err),
        }
    }

    match last_error {
        Some(err) => {
            Err(anyhow::Error::from(err).context("D3D11CreateDevice failed for every driver type"))
        }
        None => Err(anyhow::anyhow!("no D3D11 driver types were attempted")),
    }
}
