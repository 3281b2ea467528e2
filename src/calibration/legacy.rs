//! Legacy calibration JSON, as printed by the standalone extraction utility.
//!
//! Every key is wrapped as `{"value": <number>}`; bare numbers are accepted too.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::Context as _;

use crate::calibration::{CalibrationProfile, SubpixelOrder};
use crate::foundation::error::{HoloquiltError, HoloquiltResult};

#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum CalValue {
    Wrapped { value: f64 },
    Plain(f64),
}

impl CalValue {
    pub(crate) fn get(self) -> f64 {
        match self {
            Self::Wrapped { value } | Self::Plain(value) => value,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct LegacyCalibration {
    pitch: CalValue,
    slope: CalValue,
    center: CalValue,
    #[serde(rename = "invView")]
    inv_view: Option<CalValue>,
    #[serde(rename = "DPI")]
    dpi: CalValue,
    #[serde(rename = "screenW")]
    screen_w: CalValue,
    #[serde(rename = "screenH")]
    screen_h: CalValue,
    #[serde(rename = "flipImageX")]
    flip_image_x: Option<CalValue>,
    #[serde(rename = "flipImageY")]
    flip_image_y: Option<CalValue>,
    #[serde(rename = "flipSubp")]
    flip_subp: Option<CalValue>,
}

pub(crate) fn flag(v: Option<CalValue>, default: bool) -> bool {
    v.map(|v| v.get() != 0.0).unwrap_or(default)
}

pub(crate) fn pixels(v: f64, what: &str) -> HoloquiltResult<u32> {
    if !(v.is_finite() && v >= 1.0 && v <= f64::from(u32::MAX)) {
        return Err(HoloquiltError::config(format!("{what} {v} is not a valid pixel count")));
    }
    Ok(v.floor() as u32)
}

/// Parse calibration JSON text.
pub fn parse_calibration_json(text: &str) -> HoloquiltResult<CalibrationProfile> {
    let raw: LegacyCalibration = serde_json::from_str(text)
        .map_err(|e| HoloquiltError::serde(format!("calibration json: {e}")))?;

    let screen_width = pixels(raw.screen_w.get(), "screenW")?;
    let screen_height = pixels(raw.screen_h.get(), "screenH")?;
    let profile = CalibrationProfile {
        pitch: raw.pitch.get(),
        slope: raw.slope.get(),
        center: raw.center.get(),
        invert_view: flag(raw.inv_view, true),
        subpixel_order: if flag(raw.flip_subp, false) {
            SubpixelOrder::Flipped
        } else {
            SubpixelOrder::Normal
        },
        flip_x: flag(raw.flip_image_x, false),
        flip_y: flag(raw.flip_image_y, false),
        screen_width,
        screen_height,
        display_aspect: f64::from(screen_width) / f64::from(screen_height),
        dots_per_inch: raw.dpi.get(),
    };
    profile.validate()?;
    Ok(profile)
}

/// Read a saved calibration JSON file.
pub fn load_calibration_file(path: &Path) -> HoloquiltResult<CalibrationProfile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read calibration file '{}'", path.display()))?;
    parse_calibration_json(&text)
}

/// Run the extraction utility (no arguments) and parse the JSON it prints on stdout.
///
/// Failures here are reported as service errors: the caller keeps its current calibration and
/// may retry.
#[tracing::instrument]
pub fn run_calibration_utility(utility: &Path) -> HoloquiltResult<CalibrationProfile> {
    let output = Command::new(utility)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            HoloquiltError::service(format!(
                "failed to run calibration utility '{}': {e}",
                utility.display()
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HoloquiltError::service(format!(
            "calibration utility exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let text = String::from_utf8(output.stdout)
        .map_err(|e| HoloquiltError::service(format!("calibration utility output: {e}")))?;
    let profile = parse_calibration_json(&text)
        .map_err(|e| HoloquiltError::service(format!("calibration utility output: {e}")))?;
    tracing::info!(center = profile.center, "loaded calibration from utility");
    Ok(profile)
}
