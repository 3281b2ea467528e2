//! Device optical calibration.
//!
//! A [`CalibrationProfile`] is read once per device connection (from the display service, the
//! legacy extraction utility or a saved file) and treated as immutable afterwards; reconnecting
//! replaces it wholesale.

pub mod legacy;

use crate::foundation::error::{HoloquiltError, HoloquiltResult};

/// Order of the physical red/blue subpixels on the panel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubpixelOrder {
    /// R, G, B from left to right.
    #[default]
    Normal,
    /// B, G, R from left to right.
    Flipped,
}

impl SubpixelOrder {
    /// Horizontal subpixel slot sampled for the red, green and blue channels.
    pub fn channel_slots(self) -> [u32; 3] {
        match self {
            Self::Normal => [0, 1, 2],
            Self::Flipped => [2, 1, 0],
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CalibrationProfile {
    /// Lenticular line density (lenses per inch).
    pub pitch: f64,
    /// Lenticular sheet slope.
    pub slope: f64,
    /// Horizontal phase offset in `[-1, 1]`.
    pub center: f64,
    pub invert_view: bool,
    pub subpixel_order: SubpixelOrder,
    pub flip_x: bool,
    pub flip_y: bool,
    pub screen_width: u32,
    pub screen_height: u32,
    pub display_aspect: f64,
    pub dots_per_inch: f64,
}

impl Default for CalibrationProfile {
    /// Factory values of the first-generation 2560×1600 display, used until a device reports in.
    fn default() -> Self {
        Self {
            pitch: 49.0,
            slope: 5.0,
            center: 0.47,
            invert_view: true,
            subpixel_order: SubpixelOrder::Normal,
            flip_x: false,
            flip_y: false,
            screen_width: 2560,
            screen_height: 1600,
            display_aspect: 2560.0 / 1600.0,
            dots_per_inch: 338.0,
        }
    }
}

impl CalibrationProfile {
    pub fn validate(&self) -> HoloquiltResult<()> {
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(HoloquiltError::config(format!(
                "screen size must be non-zero, got {}x{}",
                self.screen_width, self.screen_height
            )));
        }
        if !(self.dots_per_inch.is_finite() && self.dots_per_inch > 0.0) {
            return Err(HoloquiltError::config(format!(
                "dots per inch must be > 0, got {}",
                self.dots_per_inch
            )));
        }
        if !(self.slope.is_finite() && self.slope != 0.0) {
            return Err(HoloquiltError::config(format!(
                "lenticular slope must be non-zero, got {}",
                self.slope
            )));
        }
        if !self.pitch.is_finite() || !self.center.is_finite() {
            return Err(HoloquiltError::config("pitch and center must be finite"));
        }
        if !(self.display_aspect.is_finite() && self.display_aspect > 0.0) {
            return Err(HoloquiltError::config(format!(
                "display aspect must be > 0, got {}",
                self.display_aspect
            )));
        }
        Ok(())
    }

    /// Pitch converted from lenses-per-inch into normalized screen space along the lens axis.
    pub fn effective_pitch(&self) -> f64 {
        let screen_inches = f64::from(self.screen_width) / self.dots_per_inch;
        self.pitch * screen_inches * (1.0 / self.slope).atan().cos()
    }

    /// Tilt of the lens sheet in normalized coordinates.
    pub fn effective_tilt(&self) -> f64 {
        f64::from(self.screen_height) / (f64::from(self.screen_width) * self.slope)
    }

    /// Normalized width of one display subpixel.
    pub fn subpixel_size(&self) -> f64 {
        1.0 / (f64::from(self.screen_width) * 3.0)
    }

    /// Recover the raw slope from a normalized tilt as reported by some services.
    pub fn slope_from_tilt(tilt: f64, screen_width: u32, screen_height: u32) -> HoloquiltResult<f64> {
        if tilt == 0.0 || !tilt.is_finite() || screen_width == 0 {
            return Err(HoloquiltError::config(format!(
                "cannot derive slope from tilt {tilt} on a {screen_width}x{screen_height} screen"
            )));
        }
        Ok(f64::from(screen_height) / (f64::from(screen_width) * tilt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        CalibrationProfile::default().validate().unwrap();
    }

    #[test]
    fn effective_values_follow_lens_geometry() {
        let c = CalibrationProfile::default();
        let expected_pitch = 49.0 * (2560.0 / 338.0) * (1.0f64 / 5.0).atan().cos();
        assert!((c.effective_pitch() - expected_pitch).abs() < 1e-12);
        assert!((c.effective_tilt() - 1600.0 / (2560.0 * 5.0)).abs() < 1e-12);
        assert!((c.subpixel_size() - 1.0 / 7680.0).abs() < 1e-15);
    }

    #[test]
    fn slope_and_tilt_are_inverse() {
        let c = CalibrationProfile::default();
        let slope =
            CalibrationProfile::slope_from_tilt(c.effective_tilt(), c.screen_width, c.screen_height)
                .unwrap();
        assert!((slope - c.slope).abs() < 1e-12);
    }

    #[test]
    fn zero_slope_is_rejected() {
        let c = CalibrationProfile {
            slope: 0.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn flipped_order_swaps_red_and_blue() {
        assert_eq!(SubpixelOrder::Normal.channel_slots(), [0, 1, 2]);
        assert_eq!(SubpixelOrder::Flipped.channel_slots(), [2, 1, 0]);
    }
}
