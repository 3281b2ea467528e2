use crate::foundation::error::{HoloquiltError, HoloquiltResult};

/// Fixed tile grid of a quilt texture.
///
/// `quilt_width`/`quilt_height` are explicit inputs rather than derived values so that padded
/// power-of-two quilts (e.g. 4096×4096 holding 5×9 tiles of 819×455) are expressed exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct QuiltLayout {
    pub columns: u32,
    pub rows: u32,
    pub view_width: u32,
    pub view_height: u32,
    pub quilt_width: u32,
    pub quilt_height: u32,
}

/// Named layouts shipped by the display vendor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuiltPreset {
    /// 4×8 tiles of 512×256 in a 2048×2048 quilt.
    Standard,
    /// 5×9 tiles of 819×455 in a 4096×4096 quilt.
    HighRes,
}

/// Offline render resolution for a layout: view size plus non-square pixel aspect.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RenderResolution {
    pub width: u32,
    pub height: u32,
    pub pixel_aspect_x: f64,
    pub pixel_aspect_y: f64,
}

impl QuiltLayout {
    /// Build and validate a layout.
    pub fn new(
        columns: u32,
        rows: u32,
        view_width: u32,
        view_height: u32,
        quilt_width: u32,
        quilt_height: u32,
    ) -> HoloquiltResult<Self> {
        let layout = Self {
            columns,
            rows,
            view_width,
            view_height,
            quilt_width,
            quilt_height,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Layout whose quilt is exactly `columns*view_width` × `rows*view_height`.
    pub fn tight(columns: u32, rows: u32, view_width: u32, view_height: u32) -> HoloquiltResult<Self> {
        let quilt_width = columns
            .checked_mul(view_width)
            .ok_or_else(|| HoloquiltError::config("quilt width overflows u32"))?;
        let quilt_height = rows
            .checked_mul(view_height)
            .ok_or_else(|| HoloquiltError::config("quilt height overflows u32"))?;
        Self::new(columns, rows, view_width, view_height, quilt_width, quilt_height)
    }

    pub fn preset(preset: QuiltPreset) -> Self {
        match preset {
            QuiltPreset::Standard => Self {
                columns: 4,
                rows: 8,
                view_width: 512,
                view_height: 256,
                quilt_width: 2048,
                quilt_height: 2048,
            },
            QuiltPreset::HighRes => Self {
                columns: 5,
                rows: 9,
                view_width: 819,
                view_height: 455,
                quilt_width: 4096,
                quilt_height: 4096,
            },
        }
    }

    /// Derive the layout from a device's default quilt description (quilt size and tile counts).
    /// Per-view size is the integer share of the quilt; remainders become padding.
    pub fn from_quilt_size(
        quilt_width: u32,
        quilt_height: u32,
        columns: u32,
        rows: u32,
    ) -> HoloquiltResult<Self> {
        if columns == 0 || rows == 0 {
            return Err(HoloquiltError::config("quilt tile counts must be > 0"));
        }
        Self::new(
            columns,
            rows,
            quilt_width / columns,
            quilt_height / rows,
            quilt_width,
            quilt_height,
        )
    }

    pub fn validate(&self) -> HoloquiltResult<()> {
        if self.columns == 0 || self.rows == 0 {
            return Err(HoloquiltError::config(format!(
                "quilt tile grid must be non-empty, got {}x{}",
                self.columns, self.rows
            )));
        }
        if self.view_width == 0 || self.view_height == 0 {
            return Err(HoloquiltError::config(format!(
                "view resolution must be non-zero, got {}x{}",
                self.view_width, self.view_height
            )));
        }
        let total = u64::from(self.columns) * u64::from(self.rows);
        if total < 2 {
            return Err(HoloquiltError::config(format!(
                "a quilt needs at least 2 views, got {total}"
            )));
        }
        if total > u64::from(u32::MAX) {
            return Err(HoloquiltError::config(format!(
                "{}x{} tiles exceed the supported view count",
                self.columns, self.rows
            )));
        }
        let min_w = u64::from(self.columns) * u64::from(self.view_width);
        let min_h = u64::from(self.rows) * u64::from(self.view_height);
        if u64::from(self.quilt_width) < min_w || u64::from(self.quilt_height) < min_h {
            return Err(HoloquiltError::config(format!(
                "quilt {}x{} cannot hold {}x{} tiles of {}x{}",
                self.quilt_width,
                self.quilt_height,
                self.columns,
                self.rows,
                self.view_width,
                self.view_height
            )));
        }
        Ok(())
    }

    /// Tile count. Saturates on unvalidated layouts whose grid exceeds `u32`.
    pub fn total_views(&self) -> u32 {
        self.columns.saturating_mul(self.rows)
    }

    /// Grid cell `(column, row)` of a view; row 0 is the bottom row.
    pub fn tile_cell(&self, view: u32) -> (u32, u32) {
        (view % self.columns, view / self.columns)
    }

    /// Pixel origin of a view's tile, measured from the bottom-left corner of the quilt.
    pub fn tile_origin(&self, view: u32) -> HoloquiltResult<(u32, u32)> {
        if view >= self.total_views() {
            return Err(HoloquiltError::config(format!(
                "view index {view} out of range for {} views",
                self.total_views()
            )));
        }
        let (col, row) = self.tile_cell(view);
        Ok((col * self.view_width, row * self.view_height))
    }

    /// Width/height of a view relative to the whole quilt, as used by the shader.
    pub fn tile_uv_size(&self) -> (f64, f64) {
        (
            f64::from(self.view_width) / f64::from(self.quilt_width),
            f64::from(self.view_height) / f64::from(self.quilt_height),
        )
    }

    pub fn view_aspect(&self) -> f64 {
        f64::from(self.view_width) / f64::from(self.view_height)
    }

    /// Resolution the offline renderer must produce per view. Known presets carry the
    /// non-square pixel aspect the display expects; anything else renders square pixels.
    pub fn render_resolution(&self) -> RenderResolution {
        let pixel_aspect_y = match (self.columns, self.rows) {
            (5, 9) => 1.125,
            (4, 8) => 1.25,
            _ => 1.0,
        };
        RenderResolution {
            width: self.view_width,
            height: self.view_height,
            pixel_aspect_x: 1.0,
            pixel_aspect_y,
        }
    }
}

impl Default for QuiltLayout {
    fn default() -> Self {
        Self::preset(QuiltPreset::Standard)
    }
}
