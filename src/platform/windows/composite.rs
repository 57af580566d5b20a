use anyhow::Context;
use windows::Win32::Graphics::Direct3D::D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_VERTEX_BUFFER, D3D11_BOX, D3D11_BUFFER_DESC,
    D3D11_CPU_ACCESS_WRITE, D3D11_MAP_WRITE_DISCARD, D3D11_MAPPED_SUBRESOURCE,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT, D3D11_USAGE_DYNAMIC, D3D11_VIEWPORT, ID3D11Buffer,
    ID3D11Device, ID3D11DeviceContext, ID3D11InputLayout, ID3D11PixelShader,
    ID3D11RenderTargetView, ID3D11SamplerState, ID3D11ShaderResourceView, ID3D11Texture2D,
    ID3D11VertexShader,
};
use windows::Win32::Graphics::Dxgi::DXGI_OUTDUPL_MOVE_RECT;
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};
use crate::geometry::{Rect, Rotation, remap_rect};
use crate::platform::windows::duplication::FrameSource;
use crate::platform::windows::output::rect_from_win32;
use crate::platform::windows::shaders::{
    Vertex, blit_ps_bytecode, create_linear_sampler, create_pixel_shader, create_quad_vs,
};

/// Replays one acquired frame's move and dirty rects into the shared
/// surface. The caller holds the keyed mutex for the whole call.
///
/// Lives on the worker's device; the shared surface reference is the
/// worker-side opened instance of the sampler's texture.
pub(crate) struct CompositeEngine {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    shared: ID3D11Texture2D,
    shared_width: u32,
    shared_height: u32,
    offset_x: i32,
    offset_y: i32,

    vs: ID3D11VertexShader,
    input_layout: ID3D11InputLayout,
    blit_ps: ID3D11PixelShader,
    sampler: ID3D11SamplerState,

    rtv: Option<ID3D11RenderTargetView>,
    // CopySubresourceRegion needs distinct source and destination
    // resources, so overlapping moves bounce through this full-output
    // scratch texture. Created on first move rect.
    move_scratch: Option<ID3D11Texture2D>,

    vertices: Vec<Vertex>,
    vertex_buffer: Option<ID3D11Buffer>,
    vertex_capacity: usize,
    cached_srv: Option<(usize, ID3D11ShaderResourceView)>,
}

impl CompositeEngine {
    /// `offset` is the top-left of the desktop union the shared surface
    /// covers; output desktop coordinates are shifted by it.
    pub(crate) fn new(
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        shared: ID3D11Texture2D,
        offset: (i32, i32),
    ) -> CaptureResult<Self> {
        let (vs, input_layout) = create_quad_vs(&device)?;
        let blit_ps = create_pixel_shader(&device, blit_ps_bytecode(), "blit")?;
        let sampler = create_linear_sampler(&device)?;

        let mut shared_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { shared.GetDesc(&mut shared_desc) };

        Ok(Self {
            device,
            context,
            shared,
            shared_width: shared_desc.Width,
            shared_height: shared_desc.Height,
            offset_x: offset.0,
            offset_y: offset.1,
            vs,
            input_layout,
            blit_ps,
            sampler,
            rtv: None,
            move_scratch: None,
            vertices: Vec::new(),
            vertex_buffer: None,
            vertex_capacity: 0,
            cached_srv: None,
        })
    }

    /// Applies the frame's pending updates: moves first so dirty content
    /// lands on the post-move layout.
    pub(crate) fn composite(
        &mut self,
        source: &FrameSource,
        frame: &ID3D11Texture2D,
    ) -> CaptureResult<()> {
        let mut frame_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { frame.GetDesc(&mut frame_desc) };

        if !source.move_rects().is_empty() {
            self.replay_moves(source, frame_desc.Width as i32, frame_desc.Height as i32)?;
        }
        if !source.dirty_rects().is_empty() {
            self.replay_dirty(source, frame, &frame_desc)?;
        }
        Ok(())
    }

    fn replay_moves(
        &mut self,
        source: &FrameSource,
        tex_width: i32,
        tex_height: i32,
    ) -> CaptureResult<()> {
        let bounds = source.desktop_bounds();
        let rotation = source.rotation();
        let scratch = self.ensure_move_scratch(bounds)?;

        for move_rect in source.move_rects() {
            let (src, dest) = remap_move_rect(move_rect, rotation, tex_width, tex_height);
            if src.is_empty() || dest.is_empty() {
                continue;
            }

            // Shared-surface coordinates of the source region.
            let shared_box = D3D11_BOX {
                left: (src.left + bounds.left - self.offset_x) as u32,
                top: (src.top + bounds.top - self.offset_y) as u32,
                front: 0,
                right: (src.right + bounds.left - self.offset_x) as u32,
                bottom: (src.bottom + bounds.top - self.offset_y) as u32,
                back: 1,
            };
            unsafe {
                self.context.CopySubresourceRegion(
                    &scratch,
                    0,
                    src.left as u32,
                    src.top as u32,
                    0,
                    &self.shared,
                    0,
                    Some(&shared_box),
                );
            }

            let scratch_box = D3D11_BOX {
                left: src.left as u32,
                top: src.top as u32,
                front: 0,
                right: src.right as u32,
                bottom: src.bottom as u32,
                back: 1,
            };
            unsafe {
                self.context.CopySubresourceRegion(
                    &self.shared,
                    0,
                    (dest.left + bounds.left - self.offset_x) as u32,
                    (dest.top + bounds.top - self.offset_y) as u32,
                    0,
                    &scratch,
                    0,
                    Some(&scratch_box),
                );
            }
        }
        Ok(())
    }

    fn replay_dirty(
        &mut self,
        source: &FrameSource,
        frame: &ID3D11Texture2D,
        frame_desc: &D3D11_TEXTURE2D_DESC,
    ) -> CaptureResult<()> {
        let rtv = self.ensure_rtv()?;
        let srv = self.frame_srv(frame)?;

        let bounds = source.desktop_bounds();
        let rotation = source.rotation();
        let center = (
            (self.shared_width / 2) as f32,
            (self.shared_height / 2) as f32,
        );

        self.vertices.clear();
        for raw in source.dirty_rects() {
            let verts = build_dirty_vertices(
                rect_from_win32(*raw),
                rotation,
                frame_desc.Width as f32,
                frame_desc.Height as f32,
                bounds,
                (self.offset_x, self.offset_y),
                center,
            );
            self.vertices.extend_from_slice(&verts);
        }
        if self.vertices.is_empty() {
            return Ok(());
        }
        let vertex_buffer = self.upload_vertices()?;

        let viewport = D3D11_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: self.shared_width as f32,
            Height: self.shared_height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let stride = std::mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        unsafe {
            // Dirty content overwrites; blending only happens in the
            // downsample pass on the sampler side.
            self.context
                .OMSetBlendState(None, Some(&[0.0, 0.0, 0.0, 0.0]), u32::MAX);
            self.context.OMSetRenderTargets(Some(&[Some(rtv)]), None);
            self.context.IASetInputLayout(&self.input_layout);
            self.context.VSSetShader(&self.vs, None);
            self.context.PSSetShader(&self.blit_ps, None);
            self.context.PSSetShaderResources(0, Some(&[Some(srv)]));
            self.context.PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
            self.context
                .IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            self.context.IASetVertexBuffers(
                0,
                1,
                Some(&Some(vertex_buffer)),
                Some(&stride),
                Some(&offset),
            );
            self.context.RSSetViewports(Some(&[viewport]));
            self.context.Draw(self.vertices.len() as u32, 0);

            // Leave nothing bound to the acquired frame past the draw.
            self.context.PSSetShaderResources(0, Some(&[None]));
            self.context.OMSetRenderTargets(None, None);
        }
        Ok(())
    }

    fn ensure_move_scratch(&mut self, bounds: Rect) -> CaptureResult<ID3D11Texture2D> {
        if let Some(ref scratch) = self.move_scratch {
            return Ok(scratch.clone());
        }

        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { self.shared.GetDesc(&mut desc) };
        desc.Width = bounds.width() as u32;
        desc.Height = bounds.height() as u32;
        desc.MipLevels = 1;
        desc.BindFlags = D3D11_BIND_RENDER_TARGET.0 as u32;
        desc.MiscFlags = 0;
        desc.Usage = D3D11_USAGE_DEFAULT;

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
            .context("failed to create move scratch texture")
            .map_err(CaptureError::Platform)?;
        let texture = texture
            .context("CreateTexture2D returned no move scratch texture")
            .map_err(CaptureError::Platform)?;
        self.move_scratch = Some(texture.clone());
        Ok(texture)
    }

    fn ensure_rtv(&mut self) -> CaptureResult<ID3D11RenderTargetView> {
        if let Some(ref rtv) = self.rtv {
            return Ok(rtv.clone());
        }
        let mut rtv: Option<ID3D11RenderTargetView> = None;
        unsafe {
            self.device
                .CreateRenderTargetView(&self.shared, None, Some(&mut rtv))
        }
        .context("failed to create render target view over the shared surface")
        .map_err(CaptureError::Platform)?;
        let rtv = rtv
            .context("CreateRenderTargetView returned None")
            .map_err(CaptureError::Platform)?;
        self.rtv = Some(rtv.clone());
        Ok(rtv)
    }

    /// Duplication hands back the same texture object frame after frame;
    /// cache the SRV keyed on the COM pointer.
    fn frame_srv(&mut self, frame: &ID3D11Texture2D) -> CaptureResult<ID3D11ShaderResourceView> {
        let key = frame.as_raw() as usize;
        if let Some((cached_key, ref srv)) = self.cached_srv {
            if cached_key == key {
                return Ok(srv.clone());
            }
        }

        let mut srv: Option<ID3D11ShaderResourceView> = None;
        unsafe { self.device.CreateShaderResourceView(frame, None, Some(&mut srv)) }
            .context("failed to create SRV for the acquired frame")
            .map_err(CaptureError::Platform)?;
        let srv = srv
            .context("CreateShaderResourceView returned None")
            .map_err(CaptureError::Platform)?;
        self.cached_srv = Some((key, srv.clone()));
        Ok(srv)
    }

    /// Writes the batch into a dynamic vertex buffer, growing it when a
    /// frame carries more dirty rects than any before it.
    fn upload_vertices(&mut self) -> CaptureResult<ID3D11Buffer> {
        let needed = self.vertices.len();
        if self.vertex_buffer.is_none() || self.vertex_capacity < needed {
            let desc = D3D11_BUFFER_DESC {
                ByteWidth: (needed * std::mem::size_of::<Vertex>()) as u32,
                Usage: D3D11_USAGE_DYNAMIC,
                BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
                CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                ..Default::default()
            };
            let mut buffer: Option<ID3D11Buffer> = None;
            unsafe { self.device.CreateBuffer(&desc, None, Some(&mut buffer)) }
                .context("failed to create dirty-rect vertex buffer")
                .map_err(CaptureError::Platform)?;
            self.vertex_buffer = Some(
                buffer
                    .context("CreateBuffer returned no vertex buffer")
                    .map_err(CaptureError::Platform)?,
            );
            self.vertex_capacity = needed;
        }

        let buffer = self
            .vertex_buffer
            .clone()
            .ok_or_else(|| CaptureError::Platform(anyhow::anyhow!("vertex buffer missing")))?;
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
        }
        .context("failed to map the vertex buffer")
        .map_err(CaptureError::Platform)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.vertices.as_ptr() as *const u8,
                mapped.pData as *mut u8,
                needed * std::mem::size_of::<Vertex>(),
            );
            self.context.Unmap(&buffer, 0);
        }
        Ok(buffer)
    }
}

/// Maps one duplication move rect into desktop-oriented source and
/// destination rectangles. The source rect is rebuilt from the source
/// point plus the destination's dimensions, then both go through the
/// same remap as dirty rects.
pub(crate) fn remap_move_rect(
    move_rect: &DXGI_OUTDUPL_MOVE_RECT,
    rotation: Rotation,
    tex_width: i32,
    tex_height: i32,
) -> (Rect, Rect) {
    let dest = rect_from_win32(move_rect.DestinationRect);
    let src = Rect::from_point_size(
        move_rect.SourcePoint.x,
        move_rect.SourcePoint.y,
        dest.width(),
        dest.height(),
    );

    // Target-space extents: for 90/270 the desktop is the transposed
    // texture.
    let (w, h) = match rotation {
        Rotation::Identity | Rotation::Rotate180 => (tex_width, tex_height),
        Rotation::Rotate90 | Rotation::Rotate270 => (tex_height, tex_width),
    };
    (
        remap_rect(src, rotation, w, h),
        remap_rect(dest, rotation, w, h),
    )
}

/// Builds the two-triangle batch entry for one dirty rect. Vertex order:
/// bottom-left, top-left, bottom-right, then the mirrored second triangle.
/// Positions are NDC within the shared surface (y flipped); texcoords pick
/// the source corners so the draw itself performs the rotation.
fn build_dirty_vertices(
    dirty: Rect,
    rotation: Rotation,
    tex_width: f32,
    tex_height: f32,
    bounds: Rect,
    offset: (i32, i32),
    center: (f32, f32),
) -> [Vertex; 6] {
    let (out_w, out_h) = (bounds.width(), bounds.height());
    let dest = remap_rect(dirty, rotation, out_w, out_h);

    let u = |x: i32| x as f32 / tex_width;
    let v = |y: i32| y as f32 / tex_height;
    // Texcoords for (bottom-left, top-left, bottom-right, top-right) of
    // the destination rect.
    let tex = match rotation {
        Rotation::Identity => [
            [u(dirty.left), v(dirty.bottom)],
            [u(dirty.left), v(dirty.top)],
            [u(dirty.right), v(dirty.bottom)],
            [u(dirty.right), v(dirty.top)],
        ],
        Rotation::Rotate90 => [
            [u(dirty.right), v(dirty.bottom)],
            [u(dirty.left), v(dirty.bottom)],
            [u(dirty.right), v(dirty.top)],
            [u(dirty.left), v(dirty.top)],
        ],
        Rotation::Rotate180 => [
            [u(dirty.right), v(dirty.top)],
            [u(dirty.right), v(dirty.bottom)],
            [u(dirty.left), v(dirty.top)],
            [u(dirty.left), v(dirty.bottom)],
        ],
        Rotation::Rotate270 => [
            [u(dirty.left), v(dirty.top)],
            [u(dirty.right), v(dirty.top)],
            [u(dirty.left), v(dirty.bottom)],
            [u(dirty.right), v(dirty.bottom)],
        ],
    };

    let ndc_x = |x: i32| (x + bounds.left - offset.0) as f32 / center.0 - 1.0;
    let ndc_y = |y: i32| -((y + bounds.top - offset.1) as f32 / center.1 - 1.0);
    let bl = [ndc_x(dest.left), ndc_y(dest.bottom), 0.0];
    let tl = [ndc_x(dest.left), ndc_y(dest.top), 0.0];
    let br = [ndc_x(dest.right), ndc_y(dest.bottom), 0.0];
    let tr = [ndc_x(dest.right), ndc_y(dest.top), 0.0];

    [
        Vertex { pos: bl, tex: tex[0] },
        Vertex { pos: tl, tex: tex[1] },
        Vertex { pos: br, tex: tex[2] },
        Vertex { pos: br, tex: tex[2] },
        Vertex { pos: tl, tex: tex[1] },
        Vertex { pos: tr, tex: tex[3] },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::Foundation::{POINT, RECT};

    fn move_rect(sx: i32, sy: i32, dest: (i32, i32, i32, i32)) -> DXGI_OUTDUPL_MOVE_RECT {
        DXGI_OUTDUPL_MOVE_RECT {
            SourcePoint: POINT { x: sx, y: sy },
            DestinationRect: RECT {
                left: dest.0,
                top: dest.1,
                right: dest.2,
                bottom: dest.3,
            },
        }
    }

    #[test]
    fn identity_move_passes_rects_through() {
        let mr = move_rect(10, 20, (100, 200, 140, 230));
        let (src, dest) = remap_move_rect(&mr, Rotation::Identity, 1920, 1080);
        assert_eq!(src, Rect::new(10, 20, 50, 50));
        assert_eq!(dest, Rect::new(100, 200, 140, 230));
    }

    #[test]
    fn rotated_move_keeps_source_and_dest_congruent() {
        let mr = move_rect(10, 20, (100, 200, 140, 230));
        for rotation in [Rotation::Rotate90, Rotation::Rotate180, Rotation::Rotate270] {
            let (src, dest) = remap_move_rect(&mr, rotation, 1920, 1080);
            assert_eq!(src.width(), dest.width(), "{rotation:?}");
            assert_eq!(src.height(), dest.height(), "{rotation:?}");
            assert!(!src.is_empty());
        }
    }

    #[test]
    fn self_moves_remap_to_equal_source_and_destination() {
        // Source point at the destination origin makes src == dest in
        // texture space; one shared remap keeps them equal in desktop
        // space too, so replaying such a move rewrites the region with
        // its own content.
        let mr = move_rect(100, 200, (100, 200, 140, 230));
        for rotation in [
            Rotation::Identity,
            Rotation::Rotate90,
            Rotation::Rotate180,
            Rotation::Rotate270,
        ] {
            let (src, dest) = remap_move_rect(&mr, rotation, 1920, 1080);
            assert_eq!(src, dest, "{rotation:?}");
            assert!(!src.is_empty(), "{rotation:?}");
        }
    }

    #[test]
    fn dirty_vertices_cover_the_remapped_rect_in_ndc() {
        // Single landscape output at the desktop origin; identity rotation.
        let bounds = Rect::new(0, 0, 1920, 1080);
        let verts = build_dirty_vertices(
            Rect::new(0, 0, 1920, 1080),
            Rotation::Identity,
            1920.0,
            1080.0,
            bounds,
            (0, 0),
            (960.0, 540.0),
        );
        // Full-surface rect spans the whole NDC square.
        assert_eq!(verts[0].pos, [-1.0, -1.0, 0.0]); // bottom-left
        assert_eq!(verts[1].pos, [-1.0, 1.0, 0.0]); // top-left
        assert_eq!(verts[5].pos, [1.0, 1.0, 0.0]); // top-right
        // Texcoords map the full source.
        assert_eq!(verts[0].tex, [0.0, 1.0]);
        assert_eq!(verts[5].tex, [1.0, 0.0]);
    }

    #[test]
    fn rotated_output_offsets_land_inside_the_union() {
        // Portrait display (1080x1920 desktop) to the left of the union
        // origin; the texture underneath is landscape 1920x1080.
        let bounds = Rect::new(-1080, 0, 0, 1920);
        let verts = build_dirty_vertices(
            Rect::new(0, 0, 1920, 1080),
            Rotation::Rotate90,
            1920.0,
            1080.0,
            bounds,
            (-1080, 0),
            (540.0, 960.0),
        );
        for vert in &verts {
            assert!(vert.pos[0] >= -1.0 && vert.pos[0] <= 1.0);
            assert!(vert.pos[1] >= -1.0 && vert.pos[1] <= 1.0);
        }
    }
}
