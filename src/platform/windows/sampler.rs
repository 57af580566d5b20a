use anyhow::Context;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D::D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_VERTEX_BUFFER, D3D11_BLEND_DESC, D3D11_BLEND_INV_SRC_ALPHA,
    D3D11_BLEND_ONE, D3D11_BLEND_OP_ADD, D3D11_BLEND_SRC_ALPHA, D3D11_BLEND_ZERO, D3D11_BUFFER_DESC,
    D3D11_COLOR_WRITE_ENABLE_ALL, D3D11_MAP_WRITE_DISCARD, D3D11_MAPPED_SUBRESOURCE,
    D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT, D3D11_USAGE_IMMUTABLE,
    D3D11_VIEWPORT, ID3D11BlendState, ID3D11Buffer, ID3D11Device, ID3D11DeviceContext,
    ID3D11InputLayout, ID3D11PixelShader, ID3D11RenderTargetView, ID3D11Resource,
    ID3D11SamplerState, ID3D11ShaderResourceView, ID3D11Texture2D, ID3D11VertexShader,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGIKeyedMutex;
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};
use crate::grid::LightGrid;
use crate::platform::windows::shaders::{
    Vertex, create_constant_buffer, create_linear_sampler, create_pixel_shader, create_quad_vs,
    downsample_ps_bytecode,
};
use crate::platform::windows::surface::{
    self, KEY_READ, KEY_WRITE, MutexAcquire, create_shared_surface, create_staging_texture,
    keyed_mutex_of, with_mapped_staging,
};

/// Matches the downsample shader's `DownsampleConstants` cbuffer.
#[repr(C)]
#[derive(Clone, Copy, PartialEq)]
struct DownsampleConstants {
    sample_width: f32,
    sample_height: f32,
    _pad0: [f32; 2],
    colour_scale: [f32; 3],
    _pad1: f32,
}

/// Reader side of the shared surface: owns the surface itself, runs the
/// downsample draw, and keeps the latest light grid on the CPU.
pub(crate) struct LightSampler {
    context: ID3D11DeviceContext,

    // The shared texture itself stays alive through the SRV and mutex.
    shared_handle: HANDLE,
    mutex: IDXGIKeyedMutex,
    shared_srv: ID3D11ShaderResourceView,

    light_rtv: ID3D11RenderTargetView,
    staging_resource: ID3D11Resource,
    light_resource: ID3D11Resource,

    vs: ID3D11VertexShader,
    input_layout: ID3D11InputLayout,
    downsample_ps: ID3D11PixelShader,
    sampler_state: ID3D11SamplerState,
    blend: ID3D11BlendState,
    constants: ID3D11Buffer,
    quad: ID3D11Buffer,

    columns: u32,
    rows: u32,
    grid: LightGrid,
    uploaded_constants: Option<DownsampleConstants>,
}

impl LightSampler {
    pub(crate) fn new(
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        surface_width: u32,
        surface_height: u32,
        columns: u32,
        rows: u32,
    ) -> CaptureResult<Self> {
        let (shared, shared_handle) = create_shared_surface(&device, surface_width, surface_height)?;
        let mutex = keyed_mutex_of(&shared)?;

        let mut shared_srv: Option<ID3D11ShaderResourceView> = None;
        unsafe { device.CreateShaderResourceView(&shared, None, Some(&mut shared_srv)) }
            .context("failed to create SRV over the shared surface")
            .map_err(CaptureError::Platform)?;
        let shared_srv = shared_srv
            .context("CreateShaderResourceView returned None")
            .map_err(CaptureError::Platform)?;

        let light_target = create_light_target(&device, columns, rows)?;
        let mut light_rtv: Option<ID3D11RenderTargetView> = None;
        unsafe { device.CreateRenderTargetView(&light_target, None, Some(&mut light_rtv)) }
            .context("failed to create light render target view")
            .map_err(CaptureError::Platform)?;
        let light_rtv = light_rtv
            .context("CreateRenderTargetView returned None")
            .map_err(CaptureError::Platform)?;

        let staging = create_staging_texture(&device, columns, rows)?;
        let staging_resource: ID3D11Resource = staging
            .cast()
            .context("failed to cast light staging texture to ID3D11Resource")
            .map_err(CaptureError::Platform)?;
        let light_resource: ID3D11Resource = light_target
            .cast()
            .context("failed to cast light target to ID3D11Resource")
            .map_err(CaptureError::Platform)?;

        let (vs, input_layout) = create_quad_vs(&device)?;
        let downsample_ps = create_pixel_shader(&device, downsample_ps_bytecode(), "downsample")?;
        let sampler_state = create_linear_sampler(&device)?;
        let blend = create_accumulation_blend(&device)?;
        let constants = create_constant_buffer::<DownsampleConstants>(&device)?;
        let quad = create_fullscreen_quad(&device)?;

        Ok(Self {
            context,
            shared_handle,
            mutex,
            shared_srv,
            light_rtv,
            staging_resource,
            light_resource,
            vs,
            input_layout,
            downsample_ps,
            sampler_state,
            blend,
            constants,
            quad,
            columns,
            rows,
            grid: LightGrid::new(columns as usize, rows as usize),
            uploaded_constants: None,
        })
    }

    /// Raw shared handle for workers to open on their own devices.
    pub(crate) fn shared_handle(&self) -> isize {
        self.shared_handle.0 as isize
    }

    pub(crate) fn grid(&self) -> &LightGrid {
        &self.grid
    }

    /// Runs one downsample pass and refreshes the grid. `NotReady` when
    /// no writer has handed over the surface within the wait budget; the
    /// previous grid stays valid.
    pub(crate) fn sample(&mut self, colour_scale: [f32; 3]) -> CaptureResult<()> {
        match surface::acquire_keyed(&self.mutex, KEY_READ, 100)? {
            MutexAcquire::Acquired => {}
            MutexAcquire::TimedOut => return Err(CaptureError::NotReady),
        }

        let draw_result = self.draw(colour_scale);
        // Hand the surface back to the writers before the CPU readback;
        // the light target is private to this device.
        let release_result = surface::release_keyed(&self.mutex, KEY_WRITE);
        draw_result?;
        release_result?;

        unsafe {
            self.context
                .CopyResource(&self.staging_resource, &self.light_resource);
        }

        let columns = self.columns as usize;
        let rows = self.rows as usize;
        let grid = &mut self.grid;
        with_mapped_staging(&self.context, &self.staging_resource, |mapped| {
            let pitch = mapped.RowPitch as usize;
            let bytes =
                unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, pitch * rows) };
            debug_assert!(pitch >= columns * 4);
            grid.load_bgra_rows(bytes, pitch);
        })?;
        Ok(())
    }

    fn draw(&mut self, colour_scale: [f32; 3]) -> CaptureResult<()> {
        unsafe { self.context.GenerateMips(&self.shared_srv) };
        self.update_constants(colour_scale)?;

        let viewport = D3D11_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: self.columns as f32,
            Height: self.rows as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let stride = std::mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        unsafe {
            self.context
                .OMSetBlendState(&self.blend, Some(&[0.0, 0.0, 0.0, 0.0]), u32::MAX);
            self.context
                .OMSetRenderTargets(Some(&[Some(self.light_rtv.clone())]), None);
            self.context.IASetInputLayout(&self.input_layout);
            self.context.VSSetShader(&self.vs, None);
            self.context.PSSetShader(&self.downsample_ps, None);
            self.context
                .PSSetShaderResources(0, Some(&[Some(self.shared_srv.clone())]));
            self.context
                .PSSetSamplers(0, Some(&[Some(self.sampler_state.clone())]));
            self.context
                .PSSetConstantBuffers(0, Some(&[Some(self.constants.clone())]));
            self.context
                .IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            self.context.IASetVertexBuffers(
                0,
                1,
                Some(&Some(self.quad.clone())),
                Some(&stride),
                Some(&offset),
            );
            self.context.RSSetViewports(Some(&[viewport]));
            self.context.Draw(6, 0);

            self.context.PSSetShaderResources(0, Some(&[None]));
            self.context.OMSetRenderTargets(None, None);
        }
        Ok(())
    }

    fn update_constants(&mut self, colour_scale: [f32; 3]) -> CaptureResult<()> {
        let constants = DownsampleConstants {
            sample_width: 1.0 / self.columns as f32,
            sample_height: 1.0 / self.rows as f32,
            _pad0: [0.0; 2],
            colour_scale,
            _pad1: 0.0,
        };
        if self.uploaded_constants == Some(constants) {
            return Ok(());
        }

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&self.constants, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
        }
        .context("failed to map the downsample constant buffer")
        .map_err(CaptureError::Platform)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                &constants as *const DownsampleConstants as *const u8,
                mapped.pData as *mut u8,
                std::mem::size_of::<DownsampleConstants>(),
            );
            self.context.Unmap(&self.constants, 0);
        }
        self.uploaded_constants = Some(constants);
        Ok(())
    }
}

fn create_light_target(
    device: &ID3D11Device,
    columns: u32,
    rows: u32,
) -> CaptureResult<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: columns,
        Height: rows,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: D3D11_BIND_RENDER_TARGET.0 as u32,
        CPUAccessFlags: 0,
        MiscFlags: 0,
    };
    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .context("failed to create light render target")
        .map_err(CaptureError::Platform)?;
    texture
        .context("CreateTexture2D returned no light target")
        .map_err(CaptureError::Platform)
}

/// dest = src*a + dest*(1-a) with a = shader alpha (mean colour scale);
/// repeated sampling low-passes flicker instead of chasing it.
fn create_accumulation_blend(device: &ID3D11Device) -> CaptureResult<ID3D11BlendState> {
    let mut desc = D3D11_BLEND_DESC::default();
    desc.RenderTarget[0].BlendEnable = true.into();
    desc.RenderTarget[0].SrcBlend = D3D11_BLEND_SRC_ALPHA;
    desc.RenderTarget[0].DestBlend = D3D11_BLEND_INV_SRC_ALPHA;
    desc.RenderTarget[0].BlendOp = D3D11_BLEND_OP_ADD;
    desc.RenderTarget[0].SrcBlendAlpha = D3D11_BLEND_ONE;
    desc.RenderTarget[0].DestBlendAlpha = D3D11_BLEND_ZERO;
    desc.RenderTarget[0].BlendOpAlpha = D3D11_BLEND_OP_ADD;
    desc.RenderTarget[0].RenderTargetWriteMask = D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8;

    let mut blend: Option<ID3D11BlendState> = None;
    unsafe { device.CreateBlendState(&desc, Some(&mut blend)) }
        .context("failed to create accumulation blend state")
        .map_err(CaptureError::Platform)?;
    blend
        .context("CreateBlendState returned None")
        .map_err(CaptureError::Platform)
}

/// Two triangles covering NDC; texcoords span the whole shared surface so
/// each light-target pixel lands at its cell centre.
fn create_fullscreen_quad(device: &ID3D11Device) -> CaptureResult<ID3D11Buffer> {
    let verts = [
        Vertex { pos: [-1.0, -1.0, 0.0], tex: [0.0, 1.0] },
        Vertex { pos: [-1.0, 1.0, 0.0], tex: [0.0, 0.0] },
        Vertex { pos: [1.0, -1.0, 0.0], tex: [1.0, 1.0] },
        Vertex { pos: [1.0, -1.0, 0.0], tex: [1.0, 1.0] },
        Vertex { pos: [-1.0, 1.0, 0.0], tex: [0.0, 0.0] },
        Vertex { pos: [1.0, 1.0, 0.0], tex: [1.0, 0.0] },
    ];
    let desc = D3D11_BUFFER_DESC {
        ByteWidth: std::mem::size_of_val(&verts) as u32,
        Usage: D3D11_USAGE_IMMUTABLE,
        BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
        ..Default::default()
    };
    let init = D3D11_SUBRESOURCE_DATA {
        pSysMem: verts.as_ptr() as *const _,
        ..Default::default()
    };
    let mut buffer: Option<ID3D11Buffer> = None;
    unsafe { device.CreateBuffer(&desc, Some(&init), Some(&mut buffer)) }
        .context("failed to create full-screen quad buffer")
        .map_err(CaptureError::Platform)?;
    buffer
        .context("CreateBuffer returned no quad buffer")
        .map_err(CaptureError::Platform)
}
