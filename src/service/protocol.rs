//! Display service messages.
//!
//! Requests are CBOR maps `{cmd: {...}, bin: <bytes>}`; replies are CBOR maps carrying an integer
//! `error` and command-specific fields (`devices` for `info`).

use ciborium::Value;

use crate::calibration::legacy::{CalValue, flag, pixels};
use crate::calibration::{CalibrationProfile, SubpixelOrder};
use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::layout::QuiltLayout;

/// Quilt description sent along with an image.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuiltSettings {
    /// Tile columns.
    pub vx: u32,
    /// Tile rows.
    pub vy: u32,
    /// Number of views actually used.
    pub vtotal: u32,
    /// Aspect ratio of one view as displayed.
    pub aspect: f64,
}

impl QuiltSettings {
    pub fn from_layout(layout: &QuiltLayout, aspect: f64) -> Self {
        Self {
            vx: layout.columns,
            vy: layout.rows,
            vtotal: layout.total_views(),
            aspect,
        }
    }

    fn to_value(self) -> Value {
        map(vec![
            ("vx", Value::Integer(self.vx.into())),
            ("vy", Value::Integer(self.vy.into())),
            ("vtotal", Value::Integer(self.vtotal.into())),
            ("aspect", Value::Float(self.aspect)),
        ])
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(entries.into_iter().map(|(k, v)| (text(k), v)).collect())
}

/// One service request.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    name: &'static str,
    cmd: Value,
    bin: Vec<u8>,
}

impl Request {
    fn new(name: &'static str, body: Value, bin: Vec<u8>) -> Self {
        Self {
            name,
            cmd: map(vec![(name, body)]),
            bin,
        }
    }

    /// Name of the command (`info`, `show`, ...).
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn info() -> Self {
        Self::new("info", map(Vec::new()), Vec::new())
    }

    pub fn hide() -> Self {
        Self::new("hide", map(Vec::new()), Vec::new())
    }

    pub fn wipe() -> Self {
        Self::new("wipe", map(Vec::new()), Vec::new())
    }

    /// Show an encoded quilt image (PNG, top row first).
    pub fn show_quilt(image: Vec<u8>, settings: QuiltSettings) -> Self {
        let quilt = map(vec![("type", text("image")), ("settings", settings.to_value())]);
        Self::new(
            "show",
            map(vec![("source", text("bindata")), ("quilt", quilt)]),
            image,
        )
    }

    /// Upload a quilt image into the service cache under `name` without showing it.
    pub fn cache_quilt(image: Vec<u8>, name: &str, settings: QuiltSettings) -> Self {
        let quilt = map(vec![
            ("name", text(name)),
            ("type", text("image")),
            ("settings", settings.to_value()),
        ]);
        Self::new("cache", map(vec![("quilt", quilt)]), image)
    }

    /// Show a previously cached quilt, optionally overriding its settings.
    pub fn load_quilt(name: &str, settings: Option<QuiltSettings>) -> Self {
        let mut quilt = vec![("name", text(name))];
        if let Some(s) = settings {
            quilt.push(("settings", s.to_value()));
        }
        Self::new(
            "show",
            map(vec![("source", text("cache")), ("quilt", map(quilt))]),
            Vec::new(),
        )
    }

    pub fn to_value(&self) -> Value {
        map(vec![
            ("cmd", self.cmd.clone()),
            ("bin", Value::Bytes(self.bin.clone())),
        ])
    }

    pub fn encode(&self) -> HoloquiltResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.bin.len() + 128);
        ciborium::ser::into_writer(&self.to_value(), &mut out)
            .map_err(|e| HoloquiltError::serde(format!("encode {} request: {e}", self.name)))?;
        Ok(out)
    }
}

/// Decoded reply of any command.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub error: i64,
    pub body: Value,
}

impl Response {
    pub fn decode(bytes: &[u8]) -> HoloquiltResult<Self> {
        let body: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| HoloquiltError::service(format!("malformed service reply: {e}")))?;
        let error = lookup(&body, "error")
            .and_then(|v| v.as_integer())
            .and_then(|i| i64::try_from(i).ok())
            .unwrap_or(0);
        Ok(Self { error, body })
    }

    /// Fail with a service error when the reply carries a non-zero error code.
    pub fn check(self, command: &str) -> HoloquiltResult<Self> {
        if self.error != 0 {
            return Err(HoloquiltError::service(format!(
                "{command} failed with service error code {}",
                self.error
            )));
        }
        Ok(self)
    }

    /// Devices listed in an `info` reply. An absent or empty list means no devices.
    ///
    /// Device data the service got wrong (bad shape, unusable calibration values) is reported
    /// as a service error, like any other service failure.
    pub fn devices(&self) -> HoloquiltResult<Vec<DeviceInfo>> {
        let Some(list) = lookup(&self.body, "devices") else {
            return Ok(Vec::new());
        };
        let raw: Vec<RawDevice> = list
            .deserialized()
            .map_err(|e| HoloquiltError::service(format!("malformed device list: {e}")))?;
        raw.into_iter()
            .enumerate()
            .map(|(i, d)| {
                d.into_device(i as u32).map_err(|e| match e {
                    HoloquiltError::Service(_) => e,
                    other => HoloquiltError::service(format!("device {i}: {other}")),
                })
            })
            .collect()
    }
}

fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// A connected display as reported by `info`.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub index: u32,
    pub hardware_version: Option<String>,
    pub hwid: Option<String>,
    pub calibration: CalibrationProfile,
    /// Quilt layout the device recommends, if reported.
    pub default_quilt: Option<QuiltLayout>,
    /// Device view cone in degrees, if reported.
    pub view_cone_degrees: Option<f64>,
}

#[derive(Debug, serde::Deserialize)]
struct RawDevice {
    index: Option<u32>,
    calibration: Option<RawCalibration>,
    #[serde(rename = "defaultQuilt")]
    default_quilt: Option<RawDefaultQuilt>,
    #[serde(rename = "hardwareVersion")]
    hardware_version: Option<String>,
    hwid: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RawCalibration {
    pitch: CalValue,
    slope: Option<CalValue>,
    tilt: Option<CalValue>,
    center: CalValue,
    #[serde(rename = "invView")]
    inv_view: Option<CalValue>,
    #[serde(rename = "DPI")]
    dpi: Option<CalValue>,
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
    #[serde(rename = "viewCone")]
    view_cone: Option<CalValue>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum RawDefaultQuilt {
    Fields(QuiltFields),
    // Some service versions send the description as a JSON string.
    Json(String),
}

#[derive(Debug, serde::Deserialize)]
struct QuiltFields {
    #[serde(rename = "quiltX")]
    quilt_x: u32,
    #[serde(rename = "quiltY")]
    quilt_y: u32,
    #[serde(rename = "tileX")]
    tile_x: u32,
    #[serde(rename = "tileY")]
    tile_y: u32,
}

impl RawDefaultQuilt {
    fn into_layout(self) -> HoloquiltResult<QuiltLayout> {
        let f = match self {
            Self::Fields(f) => f,
            Self::Json(s) => serde_json::from_str(&s)
                .map_err(|e| HoloquiltError::serde(format!("defaultQuilt: {e}")))?,
        };
        QuiltLayout::from_quilt_size(f.quilt_x, f.quilt_y, f.tile_x, f.tile_y)
    }
}

impl RawDevice {
    fn into_device(self, position: u32) -> HoloquiltResult<DeviceInfo> {
        let index = self.index.unwrap_or(position);
        let raw = self.calibration.ok_or_else(|| {
            HoloquiltError::service(format!("device {index} reported no calibration"))
        })?;

        let defaults = CalibrationProfile::default();
        let screen_width = pixels(raw.screen_w.get(), "screenW")?;
        let screen_height = pixels(raw.screen_h.get(), "screenH")?;
        let slope = match (raw.slope, raw.tilt) {
            (Some(s), _) => s.get(),
            (None, Some(t)) => CalibrationProfile::slope_from_tilt(t.get(), screen_width, screen_height)?,
            (None, None) => {
                return Err(HoloquiltError::service(format!(
                    "device {index} calibration has neither slope nor tilt"
                )));
            }
        };

        let calibration = CalibrationProfile {
            pitch: raw.pitch.get(),
            slope,
            center: raw.center.get(),
            invert_view: flag(raw.inv_view, defaults.invert_view),
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
            dots_per_inch: raw.dpi.map(CalValue::get).unwrap_or(defaults.dots_per_inch),
        };
        calibration.validate()?;

        let default_quilt = self.default_quilt.map(RawDefaultQuilt::into_layout).transpose()?;

        Ok(DeviceInfo {
            index,
            hardware_version: self.hardware_version,
            hwid: self.hwid,
            calibration,
            default_quilt,
            view_cone_degrees: raw.view_cone.map(CalValue::get),
        })
    }
}
