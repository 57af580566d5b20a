use anyhow::Context;
use std::sync::OnceLock;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_CONSTANT_BUFFER, D3D11_BUFFER_DESC, D3D11_CPU_ACCESS_WRITE, D3D11_INPUT_ELEMENT_DESC,
    D3D11_INPUT_PER_VERTEX_DATA, D3D11_USAGE_DYNAMIC, ID3D11Buffer, ID3D11Device,
    ID3D11InputLayout, ID3D11PixelShader, ID3D11SamplerState, ID3D11VertexShader,
    D3D11_COMPARISON_NEVER, D3D11_FILTER_MIN_MAG_MIP_LINEAR, D3D11_FLOAT32_MAX,
    D3D11_SAMPLER_DESC, D3D11_TEXTURE_ADDRESS_CLAMP,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R32G32_FLOAT, DXGI_FORMAT_R32G32B32_FLOAT};
use windows::core::PCSTR;

use crate::error::{CaptureError, CaptureResult};

// Build-time fxc.exe output is preferred; each shader falls back to
// runtime D3DCompile of the embedded HLSL when precompilation was skipped.

#[cfg(has_precompiled_quad_vs)]
const PRECOMPILED_QUAD_VS: &[u8] = include_bytes!(env!("QUAD_VS_CSO_PATH"));

#[cfg(has_precompiled_blit_ps)]
const PRECOMPILED_BLIT_PS: &[u8] = include_bytes!(env!("BLIT_PS_CSO_PATH"));

#[cfg(has_precompiled_downsample_ps)]
const PRECOMPILED_DOWNSAMPLE_PS: &[u8] = include_bytes!(env!("DOWNSAMPLE_PS_CSO_PATH"));

pub(crate) fn quad_vs_bytecode() -> &'static CaptureResult<Vec<u8>> {
    static BYTECODE: OnceLock<CaptureResult<Vec<u8>>> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_quad_vs)]
        {
            Ok(PRECOMPILED_QUAD_VS.to_vec())
        }
        #[cfg(not(has_precompiled_quad_vs))]
        {
            compile_runtime(include_str!("quad_vs.hlsl"), b"vs_5_0\0")
        }
    })
}

pub(crate) fn blit_ps_bytecode() -> &'static CaptureResult<Vec<u8>> {
    static BYTECODE: OnceLock<CaptureResult<Vec<u8>>> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_blit_ps)]
        {
            Ok(PRECOMPILED_BLIT_PS.to_vec())
        }
        #[cfg(not(has_precompiled_blit_ps))]
        {
            compile_runtime(include_str!("blit_ps.hlsl"), b"ps_5_0\0")
        }
    })
}

pub(crate) fn downsample_ps_bytecode() -> &'static CaptureResult<Vec<u8>> {
    static BYTECODE: OnceLock<CaptureResult<Vec<u8>>> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_downsample_ps)]
        {
            Ok(PRECOMPILED_DOWNSAMPLE_PS.to_vec())
        }
        #[cfg(not(has_precompiled_downsample_ps))]
        {
            compile_runtime(include_str!("downsample_ps.hlsl"), b"ps_5_0\0")
        }
    })
}

#[cfg(any(
    not(has_precompiled_quad_vs),
    not(has_precompiled_blit_ps),
    not(has_precompiled_downsample_ps),
))]
fn compile_runtime(source: &str, target: &'static [u8]) -> CaptureResult<Vec<u8>> {
    use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;

    let source = source.as_bytes();
    let entry = PCSTR::from_raw(b"main\0".as_ptr());
    let target = PCSTR::from_raw(target.as_ptr());
    let mut blob = None;
    let mut errors = None;

    let hr = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            None,
            None,
            None,
            entry,
            target,
            0,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    if let Err(e) = hr {
        let msg = errors
            .map(|b| {
                let ptr = unsafe { b.GetBufferPointer() } as *const u8;
                let len = unsafe { b.GetBufferSize() };
                let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
                String::from_utf8_lossy(slice).to_string()
            })
            .unwrap_or_default();
        return Err(CaptureError::Platform(
            anyhow::anyhow!("HLSL compile failed: {msg}").context(e.to_string()),
        ));
    }

    let blob =
        blob.ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("D3DCompile returned no blob")))?;
    let ptr = unsafe { blob.GetBufferPointer() } as *const u8;
    let len = unsafe { blob.GetBufferSize() };
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
}

/// Vertex layout shared by both draw passes: NDC position + source UV.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Vertex {
    pub pos: [f32; 3],
    pub tex: [f32; 2],
}

/// Creates the shared vertex shader together with its input layout.
pub(crate) fn create_quad_vs(
    device: &ID3D11Device,
) -> CaptureResult<(ID3D11VertexShader, ID3D11InputLayout)> {
    let bytecode = quad_vs_bytecode()
        .as_ref()
        .map_err(|e| CaptureError::Platform(anyhow::anyhow!("vertex shader unavailable: {e}")))?;

    let mut vs: Option<ID3D11VertexShader> = None;
    unsafe { device.CreateVertexShader(bytecode, None, Some(&mut vs)) }
        .context("CreateVertexShader failed")
        .map_err(CaptureError::Platform)?;
    let vs = vs
        .context("CreateVertexShader returned None")
        .map_err(CaptureError::Platform)?;

    let layout_desc = [
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR::from_raw(b"POSITION\0".as_ptr()),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32B32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 0,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR::from_raw(b"TEXCOORD\0".as_ptr()),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 12,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
    ];
    let mut layout: Option<ID3D11InputLayout> = None;
    unsafe { device.CreateInputLayout(&layout_desc, bytecode, Some(&mut layout)) }
        .context("CreateInputLayout failed")
        .map_err(CaptureError::Platform)?;
    let layout = layout
        .context("CreateInputLayout returned None")
        .map_err(CaptureError::Platform)?;

    Ok((vs, layout))
}

pub(crate) fn create_pixel_shader(
    device: &ID3D11Device,
    bytecode: &CaptureResult<Vec<u8>>,
    label: &str,
) -> CaptureResult<ID3D11PixelShader> {
    let bytecode = bytecode
        .as_ref()
        .map_err(|e| CaptureError::Platform(anyhow::anyhow!("{label} shader unavailable: {e}")))?;

    let mut ps: Option<ID3D11PixelShader> = None;
    unsafe { device.CreatePixelShader(bytecode, None, Some(&mut ps)) }
        .context(format!("CreatePixelShader ({label}) failed"))
        .map_err(CaptureError::Platform)?;
    ps.context(format!("CreatePixelShader ({label}) returned None"))
        .map_err(CaptureError::Platform)
}

/// Linear min/mag/mip sampler with clamped addressing; used by both the
/// composite blit and the mipped downsample.
pub(crate) fn create_linear_sampler(device: &ID3D11Device) -> CaptureResult<ID3D11SamplerState> {
    let desc = D3D11_SAMPLER_DESC {
        Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
        AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
        ComparisonFunc: D3D11_COMPARISON_NEVER,
        MinLOD: 0.0,
        MaxLOD: D3D11_FLOAT32_MAX,
        ..Default::default()
    };
    let mut sampler: Option<ID3D11SamplerState> = None;
    unsafe { device.CreateSamplerState(&desc, Some(&mut sampler)) }
        .context("CreateSamplerState failed")
        .map_err(CaptureError::Platform)?;
    sampler
        .context("CreateSamplerState returned None")
        .map_err(CaptureError::Platform)
}

/// Dynamic constant buffer sized for `T`, written with Map/WRITE_DISCARD.
pub(crate) fn create_constant_buffer<T>(device: &ID3D11Device) -> CaptureResult<ID3D11Buffer> {
    let desc = D3D11_BUFFER_DESC {
        ByteWidth: std::mem::size_of::<T>() as u32,
        Usage: D3D11_USAGE_DYNAMIC,
        BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
        CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
        ..Default::default()
    };
    let mut buffer: Option<ID3D11Buffer> = None;
    unsafe { device.CreateBuffer(&desc, None, Some(&mut buffer)) }
        .context("CreateBuffer for constant buffer failed")
        .map_err(CaptureError::Platform)?;
    buffer
        .context("CreateBuffer returned None")
        .map_err(CaptureError::Platform)
}

#[cfg(test)]
mod tests {
    use super::Vertex;

    #[test]
    fn vertex_layout_matches_input_elements() {
        // TEXCOORD element is declared at byte offset 12.
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
        assert_eq!(std::mem::offset_of!(Vertex, tex), 12);
    }
}
