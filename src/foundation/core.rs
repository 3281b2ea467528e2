use std::io::Cursor;
use std::path::Path;

use anyhow::Context as _;

use crate::foundation::error::{HoloquiltError, HoloquiltResult};

/// One RGBA8 pixel, straight alpha.
pub type Rgba8 = [u8; 4];

/// An RGBA8 pixel buffer.
///
/// Rows are stored **bottom-up** (row 0 is the bottom scanline), matching the texture convention
/// of the quilt itself. Conversion to and from top-down image files happens at the I/O boundary
/// ([`PixelBuffer::load`], [`PixelBuffer::save_png`], [`PixelBuffer::encode_png`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, bottom-up rows.
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a transparent black buffer.
    pub fn new(width: u32, height: u32) -> HoloquiltResult<Self> {
        Self::filled(width, height, [0, 0, 0, 0])
    }

    /// Allocate a buffer with every pixel set to `rgba`.
    pub fn filled(width: u32, height: u32, rgba: Rgba8) -> HoloquiltResult<Self> {
        let len = byte_len(width, height)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            HoloquiltError::resource(format!("allocate {width}x{height} pixel buffer: {e}"))
        })?;
        for _ in 0..(len / 4) {
            data.extend_from_slice(&rgba);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Wrap existing bottom-up RGBA8 bytes.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> HoloquiltResult<Self> {
        let expected = byte_len(width, height)?;
        if data.len() != expected {
            return Err(HoloquiltError::config(format!(
                "pixel data length {} does not match {width}x{height}x4 = {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let s = self.stride();
        let start = y as usize * s;
        &self.data[start..start + s]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let s = self.stride();
        let start = y as usize * s;
        &mut self.data[start..start + s]
    }

    /// Read the pixel at `(x, y)`, `y` counted from the bottom.
    pub fn pixel(&self, x: u32, y: u32) -> Rgba8 {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: Rgba8) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    pub fn fill(&mut self, rgba: Rgba8) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    pub fn flip_vertical_in_place(&mut self) {
        let s = self.stride();
        let h = self.height as usize;
        for y in 0..h / 2 {
            let (top, bottom) = self.data.split_at_mut((h - 1 - y) * s);
            top[y * s..(y + 1) * s].swap_with_slice(&mut bottom[..s]);
        }
    }

    /// Convert a decoded (top-down) image into a bottom-up buffer.
    pub fn from_image(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        let mut buf = Self {
            width,
            height,
            data: img.into_raw(),
        };
        buf.flip_vertical_in_place();
        buf
    }

    /// Convert into a top-down image suitable for encoding.
    pub fn to_image(&self) -> HoloquiltResult<image::RgbaImage> {
        let mut flipped = self.clone();
        flipped.flip_vertical_in_place();
        image::RgbaImage::from_raw(self.width, self.height, flipped.data).ok_or_else(|| {
            HoloquiltError::config(format!(
                "pixel buffer {}x{} has inconsistent length",
                self.width, self.height
            ))
        })
    }

    /// Load and decode an image file.
    pub fn load(path: &Path) -> HoloquiltResult<Self> {
        let img = image::open(path).with_context(|| format!("decode image '{}'", path.display()))?;
        Ok(Self::from_image(img.to_rgba8()))
    }

    /// Encode as PNG bytes (top-down row order).
    pub fn encode_png(&self) -> HoloquiltResult<Vec<u8>> {
        let img = self.to_image()?;
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .context("encode png")?;
        Ok(out)
    }

    pub fn save_png(&self, path: &Path) -> HoloquiltResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir '{}'", parent.display()))?;
        }
        let img = self.to_image()?;
        img.save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("write png '{}'", path.display()))?;
        Ok(())
    }
}

fn byte_len(width: u32, height: u32) -> HoloquiltResult<usize> {
    if width == 0 || height == 0 {
        return Err(HoloquiltError::config(format!(
            "pixel buffer dimensions must be non-zero, got {width}x{height}"
        )));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(4))
        .ok_or_else(|| HoloquiltError::resource(format!("{width}x{height} buffer size overflow")))
}
