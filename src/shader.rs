//! Lightfield interleave.
//!
//! [`LightfieldParams`] holds the normalized lens coefficients derived from a calibration; the
//! CPU path ([`render_lightfield`]) is the reference for the WGSL kernel in
//! [`LIGHTFIELD_WGSL`], which evaluates the same formulas per fragment.

use crate::calibration::CalibrationProfile;
use crate::compositor::{QuiltTexture, Sampling};
use crate::foundation::core::PixelBuffer;
use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::layout::QuiltLayout;

/// WGSL source of the presentation shader (full-screen triangle + interleave fragment).
pub const LIGHTFIELD_WGSL: &str = include_str!("shader/lightfield.wgsl");

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LightfieldParams {
    pub pitch: f64,
    pub tilt: f64,
    pub center: f64,
    pub subp: f64,
    pub invert_view: bool,
    pub flip_x: bool,
    pub flip_y: bool,
    pub channel_slots: [u32; 3],
    pub total_views: u32,
    pub columns: u32,
    /// Tile size relative to the whole quilt.
    pub tile_size: (f64, f64),
    pub screen_width: u32,
    pub screen_height: u32,
}

impl LightfieldParams {
    pub fn new(calibration: &CalibrationProfile, layout: &QuiltLayout) -> HoloquiltResult<Self> {
        calibration.validate()?;
        layout.validate()?;
        Ok(Self {
            pitch: calibration.effective_pitch(),
            tilt: calibration.effective_tilt(),
            center: calibration.center,
            subp: calibration.subpixel_size(),
            invert_view: calibration.invert_view,
            flip_x: calibration.flip_x,
            flip_y: calibration.flip_y,
            channel_slots: calibration.subpixel_order.channel_slots(),
            total_views: layout.total_views(),
            columns: layout.columns,
            tile_size: layout.tile_uv_size(),
            screen_width: calibration.screen_width,
            screen_height: calibration.screen_height,
        })
    }

    /// Tile index for one subpixel slot at (already flipped) output coordinates.
    pub fn tile_for_slot(&self, u: f64, v: f64, slot: u32) -> u32 {
        let mut z = (u + f64::from(slot) * self.subp + v * self.tilt) * self.pitch - self.center;
        z = wrap_phase(z);
        if self.invert_view {
            z = 1.0 - z;
        }
        tile_index(z, self.total_views)
    }

    /// Tile indices read by the red, green and blue channels.
    pub fn channel_tiles(&self, u: f64, v: f64) -> [u32; 3] {
        self.channel_slots.map(|slot| self.tile_for_slot(u, v, slot))
    }

    /// Apply the calibration's image flips to output coordinates.
    pub fn flip(&self, u: f64, v: f64) -> (f64, f64) {
        (
            if self.flip_x { 1.0 - u } else { u },
            if self.flip_y { 1.0 - v } else { v },
        )
    }

    /// Values of the WGSL `Lightfield` uniform, in declaration order (16 × f32, std140-compatible).
    pub fn uniform_block(&self) -> [f32; 16] {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        [
            self.pitch as f32,
            self.tilt as f32,
            self.center as f32,
            self.subp as f32,
            self.tile_size.0 as f32,
            self.tile_size.1 as f32,
            flag(self.invert_view),
            flag(self.flip_x),
            flag(self.flip_y),
            self.total_views as f32,
            self.columns as f32,
            0.0,
            self.channel_slots[0] as f32,
            self.channel_slots[1] as f32,
            self.channel_slots[2] as f32,
            0.0,
        ]
    }
}

/// Fractional part of `z`, always in `[0, 1)`.
pub fn wrap_phase(z: f64) -> f64 {
    (z + z.abs().ceil()).rem_euclid(1.0)
}

/// Tile selected by phase `z`; `z == 1.0` selects the last tile.
pub fn tile_index(z: f64, total_views: u32) -> u32 {
    let last = total_views.saturating_sub(1);
    let t = (z * f64::from(total_views)).floor();
    if t.is_nan() || t <= 0.0 {
        0
    } else if t >= f64::from(last) {
        last
    } else {
        t as u32
    }
}

/// Interleave `quilt` into a screen-sized image (bottom-up rows, opaque).
#[tracing::instrument(skip_all, fields(w = params.screen_width, h = params.screen_height))]
pub fn render_lightfield(
    params: &LightfieldParams,
    quilt: &QuiltTexture,
    sampling: Sampling,
) -> HoloquiltResult<PixelBuffer> {
    if quilt.layout().total_views() != params.total_views
        || quilt.layout().columns != params.columns
    {
        return Err(HoloquiltError::config(format!(
            "lightfield parameters expect {} views in {} columns, quilt has {} in {}",
            params.total_views,
            params.columns,
            quilt.layout().total_views(),
            quilt.layout().columns
        )));
    }

    let w = params.screen_width;
    let h = params.screen_height;
    let mut out = PixelBuffer::new(w, h)?;
    for y in 0..h {
        let v = (f64::from(y) + 0.5) / f64::from(h);
        for x in 0..w {
            let u = (f64::from(x) + 0.5) / f64::from(w);
            let (u, v) = params.flip(u, v);
            let [tr, tg, tb] = params.channel_tiles(u, v);
            let r = quilt.sample_tile(tr, u, v, sampling)[0];
            let g = quilt.sample_tile(tg, u, v, sampling)[1];
            let b = quilt.sample_tile(tb, u, v, sampling)[2];
            out.set_pixel(x, y, [r, g, b, 255]);
        }
    }
    Ok(out)
}
