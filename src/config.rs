use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;

use crate::compositor::Sampling;
use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::geometry::{FocalFallback, ViewGeometrySolver};
use crate::layout::QuiltLayout;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/holoplay-driver.ipc";

/// Where the calibration comes from.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    /// Built-in factory values.
    #[default]
    Defaults,
    /// A saved calibration JSON file.
    File(PathBuf),
    /// The calibration extraction executable.
    Utility(PathBuf),
    /// The display service's `info` reply.
    Service,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    /// Read/write timeout; `0` waits forever.
    pub timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            timeout_ms: 2000,
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Pipeline settings, loaded from JSON. Every field has a default.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub view_cone_degrees: f64,
    /// Explicit quilt layout. `None` uses the device's default quilt, or the standard preset.
    pub quilt: Option<QuiltLayout>,
    pub focal_fallback: FocalFallback,
    pub calibration: CalibrationSource,
    pub service: ServiceConfig,
    pub sampling: Sampling,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            view_cone_degrees: 40.0,
            quilt: None,
            focal_fallback: FocalFallback::Reject,
            calibration: CalibrationSource::Defaults,
            service: ServiceConfig::default(),
            sampling: Sampling::Linear,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> HoloquiltResult<Self> {
        let cfg: Self = serde_json::from_str(text)
            .map_err(|e| HoloquiltError::serde(format!("pipeline config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> HoloquiltResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> HoloquiltResult<()> {
        let cone = self.view_cone_degrees;
        if !(cone.is_finite() && cone > 0.0 && cone < 180.0) {
            return Err(HoloquiltError::config(format!(
                "view_cone_degrees must be in (0, 180), got {cone}"
            )));
        }
        if let Some(layout) = &self.quilt {
            layout.validate()?;
        }
        if let FocalFallback::Fixed(d) = self.focal_fallback
            && !(d.is_finite() && d > 0.0)
        {
            return Err(HoloquiltError::config(format!(
                "fixed focal distance must be > 0, got {d}"
            )));
        }
        if self.service.socket_path.as_os_str().is_empty() {
            return Err(HoloquiltError::config("service socket_path must be non-empty"));
        }
        Ok(())
    }

    pub fn solver(&self) -> ViewGeometrySolver {
        ViewGeometrySolver::new(self.view_cone_degrees, self.focal_fallback)
    }

    /// Quilt layout to use: explicit setting, else the device's, else the standard preset.
    pub fn resolve_layout(&self, device_default: Option<QuiltLayout>) -> QuiltLayout {
        self.quilt.or(device_default).unwrap_or_default()
    }
}
