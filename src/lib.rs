//! Holoquilt turns a single-camera scene into a multiview quilt and interleaves it for lenticular
//! lightfield displays.
//!
//! The pipeline per frame:
//!
//! - Solve one shifted camera per view ([`ViewGeometrySolver`])
//! - Render each view through a host [`ViewRenderer`] and blit it into the [`QuiltTexture`]
//! - Interleave the quilt with the device calibration ([`LightfieldParams`]) or hand it to the
//!   display service ([`ServiceClient`])
//!
//! [`LiveSession`] keeps the per-device state between frames; [`RenderSetupBuilder`] expresses the
//! same view sweep as persistent cameras for offline batch rendering.
#![forbid(unsafe_code)]

mod foundation;

pub mod calibration;
pub mod compositor;
pub mod config;
pub mod geometry;
pub mod layout;
pub mod render;
pub mod rig;
pub mod sequence;
pub mod service;
pub mod session;
pub mod shader;

pub use crate::calibration::{CalibrationProfile, SubpixelOrder};
pub use crate::compositor::{QuiltTexture, Sampling};
pub use crate::config::{CalibrationSource, PipelineConfig, ServiceConfig};
pub use crate::foundation::core::{PixelBuffer, Rgba8};
pub use crate::foundation::error::{HoloquiltError, HoloquiltResult};
pub use crate::geometry::{FocalFallback, SourceCamera, ViewEntry, ViewGeometrySolver, ViewSet};
pub use crate::layout::{QuiltLayout, QuiltPreset, RenderResolution};
pub use crate::render::{CaptureReport, ProbeRenderer, ViewRenderer, capture_quilt};
pub use crate::rig::{RenderSetupBuilder, RigConfig, RigManifest, RigState, SceneGraph};
pub use crate::sequence::ImageSequence;
pub use crate::service::{DeviceInfo, QuiltSettings, ServiceClient};
pub use crate::session::{
    CalibrationStatus, CpuPresenter, FrameDriver, FrameReport, FrameSource, LiveSession, LiveStats,
    LiveView, Presenter, ServicePresenter,
};
pub use crate::shader::{LIGHTFIELD_WGSL, LightfieldParams, render_lightfield};
