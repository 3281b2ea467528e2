//! Quilt texture and tile blits.

use crate::foundation::core::{PixelBuffer, Rgba8};
use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::layout::QuiltLayout;

/// Texture filter used when reading a tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sampling {
    Nearest,
    #[default]
    Linear,
}

/// The quilt: one pixel buffer partitioned into `columns × rows` view tiles, view 0 at the
/// bottom-left.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuiltTexture {
    layout: QuiltLayout,
    pixels: PixelBuffer,
}

impl QuiltTexture {
    /// Allocate a cleared quilt for `layout`.
    pub fn new(layout: QuiltLayout) -> HoloquiltResult<Self> {
        layout.validate()?;
        let pixels = PixelBuffer::filled(layout.quilt_width, layout.quilt_height, [0, 0, 0, 255])?;
        tracing::debug!(
            width = layout.quilt_width,
            height = layout.quilt_height,
            views = layout.total_views(),
            "allocated quilt texture"
        );
        Ok(Self { layout, pixels })
    }

    /// Wrap an existing full-quilt image (e.g. a quilt loaded from disk).
    pub fn from_pixels(layout: QuiltLayout, pixels: PixelBuffer) -> HoloquiltResult<Self> {
        layout.validate()?;
        if pixels.width != layout.quilt_width || pixels.height != layout.quilt_height {
            return Err(HoloquiltError::config(format!(
                "quilt image is {}x{} but the layout expects {}x{}",
                pixels.width, pixels.height, layout.quilt_width, layout.quilt_height
            )));
        }
        Ok(Self { layout, pixels })
    }

    pub fn layout(&self) -> &QuiltLayout {
        &self.layout
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn into_pixels(self) -> PixelBuffer {
        self.pixels
    }

    pub fn clear(&mut self, rgba: Rgba8) {
        self.pixels.fill(rgba);
    }

    /// Copy one rendered view into its tile. The copy is exact (no filtering); the source must
    /// match the layout's view resolution.
    pub fn blit_view(&mut self, view: u32, src: &PixelBuffer) -> HoloquiltResult<()> {
        let (x0, y0) = self.layout.tile_origin(view)?;
        if src.width != self.layout.view_width || src.height != self.layout.view_height {
            return Err(HoloquiltError::config(format!(
                "view {view} is {}x{} but tiles are {}x{}",
                src.width, src.height, self.layout.view_width, self.layout.view_height
            )));
        }
        if src.data.len() != src.stride() * src.height as usize {
            return Err(HoloquiltError::config(format!(
                "view {view} pixel data is truncated"
            )));
        }

        let start = x0 as usize * 4;
        let end = start + src.stride();
        for y in 0..src.height {
            self.pixels.row_mut(y0 + y)[start..end].copy_from_slice(src.row(y));
        }
        Ok(())
    }

    /// Blit a full set of views, one per tile, in index order.
    pub fn composite(&mut self, views: &[PixelBuffer]) -> HoloquiltResult<()> {
        if views.len() != self.layout.total_views() as usize {
            return Err(HoloquiltError::config(format!(
                "got {} view images for a quilt of {} tiles",
                views.len(),
                self.layout.total_views()
            )));
        }
        for (i, v) in views.iter().enumerate() {
            self.blit_view(i as u32, v)?;
        }
        Ok(())
    }

    /// Copy a tile back out of the quilt.
    pub fn extract_view(&self, view: u32) -> HoloquiltResult<PixelBuffer> {
        let (x0, y0) = self.layout.tile_origin(view)?;
        let mut out = PixelBuffer::new(self.layout.view_width, self.layout.view_height)?;
        let start = x0 as usize * 4;
        let end = start + out.stride();
        for y in 0..out.height {
            out.row_mut(y)
                .copy_from_slice(&self.pixels.row(y0 + y)[start..end]);
        }
        Ok(out)
    }

    /// Sample tile `view` at tile-local normalized `(u, v)` in `[0, 1]`, `v` up.
    ///
    /// Reads never cross into neighbouring tiles: coordinates are clamped to the tile's own texel
    /// centers before filtering.
    pub fn sample_tile(&self, view: u32, u: f64, v: f64, sampling: Sampling) -> Rgba8 {
        let view = view.min(self.layout.total_views() - 1);
        let (col, row) = self.layout.tile_cell(view);
        let vw = self.layout.view_width;
        let vh = self.layout.view_height;
        let ox = col * vw;
        let oy = row * vh;

        let fx = u.clamp(0.0, 1.0) * f64::from(vw);
        let fy = v.clamp(0.0, 1.0) * f64::from(vh);

        match sampling {
            Sampling::Nearest => {
                let x = (fx.floor() as u32).min(vw - 1);
                let y = (fy.floor() as u32).min(vh - 1);
                self.pixels.pixel(ox + x, oy + y)
            }
            Sampling::Linear => {
                let sx = (fx - 0.5).clamp(0.0, f64::from(vw - 1));
                let sy = (fy - 0.5).clamp(0.0, f64::from(vh - 1));
                let x0 = sx.floor() as u32;
                let y0 = sy.floor() as u32;
                let x1 = (x0 + 1).min(vw - 1);
                let y1 = (y0 + 1).min(vh - 1);
                let tx = sx - f64::from(x0);
                let ty = sy - f64::from(y0);

                let p00 = self.pixels.pixel(ox + x0, oy + y0);
                let p10 = self.pixels.pixel(ox + x1, oy + y0);
                let p01 = self.pixels.pixel(ox + x0, oy + y1);
                let p11 = self.pixels.pixel(ox + x1, oy + y1);

                let mut out = [0u8; 4];
                for c in 0..4 {
                    let top = lerp(f64::from(p00[c]), f64::from(p10[c]), tx);
                    let bottom = lerp(f64::from(p01[c]), f64::from(p11[c]), tx);
                    out[c] = lerp(top, bottom, ty).round().clamp(0.0, 255.0) as u8;
                }
                out
            }
        }
    }

    /// PNG bytes of the whole quilt, top-down, as expected by the display service.
    pub fn encode_png(&self) -> HoloquiltResult<Vec<u8>> {
        self.pixels.encode_png()
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
