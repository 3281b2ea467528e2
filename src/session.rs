//! Live presentation session.
//!
//! [`LiveSession`] owns everything that persists between frames: the active calibration, the
//! quilt layout and the lazily created quilt texture. Each cycle solves the views, captures them,
//! and hands the quilt to a [`Presenter`]. [`LiveView`] repeats cycles until stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::calibration::CalibrationProfile;
use crate::calibration::legacy::{load_calibration_file, run_calibration_utility};
use crate::compositor::{QuiltTexture, Sampling};
use crate::config::{CalibrationSource, PipelineConfig};
use crate::foundation::core::PixelBuffer;
use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::geometry::{SourceCamera, ViewSet};
use crate::layout::QuiltLayout;
use crate::render::{ViewRenderer, capture_quilt};
use crate::sequence::ImageSequence;
use crate::service::{DeviceInfo, ServiceClient};
use crate::shader::{LightfieldParams, render_lightfield};

/// Consumer of finished quilts.
pub trait Presenter {
    fn present(
        &mut self,
        quilt: &QuiltTexture,
        params: &LightfieldParams,
        sampling: Sampling,
    ) -> HoloquiltResult<()>;
}

/// Interleaves on the CPU and keeps the last screen image.
#[derive(Debug, Default)]
pub struct CpuPresenter {
    last: Option<PixelBuffer>,
}

impl CpuPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> Option<&PixelBuffer> {
        self.last.as_ref()
    }

    pub fn take_last_frame(&mut self) -> Option<PixelBuffer> {
        self.last.take()
    }
}

impl Presenter for CpuPresenter {
    fn present(
        &mut self,
        quilt: &QuiltTexture,
        params: &LightfieldParams,
        sampling: Sampling,
    ) -> HoloquiltResult<()> {
        self.last = Some(render_lightfield(params, quilt, sampling)?);
        Ok(())
    }
}

/// Sends each quilt to the display service, which does the interleave itself.
#[derive(Debug)]
pub struct ServicePresenter<'a> {
    client: &'a ServiceClient,
}

impl<'a> ServicePresenter<'a> {
    pub fn new(client: &'a ServiceClient) -> Self {
        Self { client }
    }
}

impl Presenter for ServicePresenter<'_> {
    fn present(
        &mut self,
        quilt: &QuiltTexture,
        params: &LightfieldParams,
        _sampling: Sampling,
    ) -> HoloquiltResult<()> {
        let aspect = f64::from(params.screen_width) / f64::from(params.screen_height);
        self.client.show_quilt(quilt, aspect)
    }
}

/// What fills the quilt this cycle.
pub enum FrameSource<'a> {
    /// Render every view of the host scene from this camera.
    Camera {
        camera: SourceCamera,
        renderer: &'a mut dyn ViewRenderer,
    },
    /// Render precomputed views, such as the cameras of a built rig.
    Views {
        views: &'a ViewSet,
        renderer: &'a mut dyn ViewRenderer,
    },
    /// Play back pre-rendered views from disk.
    Sequence(&'a mut ImageSequence),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub views_rendered: u32,
    pub views_skipped: Vec<u32>,
}

/// Result of a calibration refresh.
#[derive(Clone, Debug, PartialEq)]
pub enum CalibrationStatus {
    Updated,
    /// The service answered but listed no displays.
    NoDevices,
    /// The source failed recoverably; the previous calibration stays active.
    KeptPrevious(String),
}

#[derive(Debug)]
pub struct LiveSession {
    config: PipelineConfig,
    calibration: CalibrationProfile,
    device_layout: Option<QuiltLayout>,
    layout: QuiltLayout,
    quilt: Option<QuiltTexture>,
    frames: u64,
}

impl LiveSession {
    pub fn new(config: PipelineConfig) -> HoloquiltResult<Self> {
        config.validate()?;
        let layout = config.resolve_layout(None);
        Ok(Self {
            config,
            calibration: CalibrationProfile::default(),
            device_layout: None,
            layout,
            quilt: None,
            frames: 0,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationProfile {
        &self.calibration
    }

    pub fn layout(&self) -> &QuiltLayout {
        &self.layout
    }

    pub fn quilt(&self) -> Option<&QuiltTexture> {
        self.quilt.as_ref()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn set_calibration(&mut self, calibration: CalibrationProfile) -> HoloquiltResult<()> {
        calibration.validate()?;
        self.calibration = calibration;
        Ok(())
    }

    /// Request a different layout. The quilt is recreated at the start of the next cycle.
    pub fn set_layout(&mut self, layout: QuiltLayout) -> HoloquiltResult<()> {
        layout.validate()?;
        self.layout = layout;
        Ok(())
    }

    /// Adopt a device's calibration and, unless a layout is configured, its default quilt.
    pub fn apply_device(&mut self, device: &DeviceInfo) -> HoloquiltResult<()> {
        self.set_calibration(device.calibration.clone())?;
        self.device_layout = device.default_quilt;
        self.layout = self.config.resolve_layout(self.device_layout);
        tracing::info!(
            device = device.index,
            hardware = device.hardware_version.as_deref().unwrap_or("unknown"),
            columns = self.layout.columns,
            rows = self.layout.rows,
            "using device calibration"
        );
        Ok(())
    }

    /// Reload the calibration from the configured source.
    ///
    /// Recoverable failures (service unreachable, utility missing) keep the current calibration
    /// and are reported in the returned status.
    pub fn refresh_calibration(
        &mut self,
        client: Option<&ServiceClient>,
    ) -> HoloquiltResult<CalibrationStatus> {
        let fetched = match &self.config.calibration {
            CalibrationSource::Defaults => Ok(Some(CalibrationProfile::default())),
            CalibrationSource::File(path) => load_calibration_file(path).map(Some),
            CalibrationSource::Utility(path) => run_calibration_utility(path).map(Some),
            CalibrationSource::Service => {
                let client = client.ok_or_else(|| {
                    HoloquiltError::config("calibration source is the service but no client was given")
                })?;
                match client.info() {
                    Ok(devices) => match devices.first() {
                        Some(device) => {
                            self.apply_device(device)?;
                            return Ok(CalibrationStatus::Updated);
                        }
                        None => Ok(None),
                    },
                    Err(e) => Err(e),
                }
            }
        };

        match fetched {
            Ok(Some(profile)) => {
                self.set_calibration(profile)?;
                Ok(CalibrationStatus::Updated)
            }
            Ok(None) => {
                tracing::warn!("no devices connected, keeping current calibration");
                Ok(CalibrationStatus::NoDevices)
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(error = %e, "calibration refresh failed, keeping current calibration");
                Ok(CalibrationStatus::KeptPrevious(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Quilt matching the current layout, created on first use and recreated on layout change.
    pub fn ensure_quilt(&mut self) -> HoloquiltResult<&mut QuiltTexture> {
        if self.quilt.as_ref().is_some_and(|q| *q.layout() != self.layout) {
            tracing::info!("quilt layout changed, recreating quilt texture");
            self.quilt = None;
        }
        match &mut self.quilt {
            Some(q) => Ok(q),
            slot => Ok(slot.insert(QuiltTexture::new(self.layout)?)),
        }
    }

    pub fn invalidate_quilt(&mut self) {
        self.quilt = None;
    }

    /// Drop the quilt texture. The session stays usable; the next cycle allocates again.
    pub fn release(&mut self) {
        if self.quilt.take().is_some() {
            tracing::debug!("released quilt texture");
        }
    }

    /// Run one presentation cycle.
    #[tracing::instrument(skip_all, fields(frame = self.frames))]
    pub fn run_cycle(
        &mut self,
        source: FrameSource<'_>,
        presenter: &mut dyn Presenter,
    ) -> HoloquiltResult<FrameReport> {
        let params = LightfieldParams::new(&self.calibration, &self.layout)?;
        let solver = self.config.solver();
        let display_aspect = self.calibration.display_aspect;
        let sampling = self.config.sampling;
        let frame = self.frames;

        let quilt = self.ensure_quilt()?;
        let mut report = FrameReport {
            frame,
            ..FrameReport::default()
        };
        match source {
            FrameSource::Camera { camera, renderer } => {
                let views = solver.solve_views(&camera, quilt.layout().total_views(), display_aspect)?;
                let capture = capture_quilt(renderer, &views, quilt)?;
                report.views_rendered = capture.rendered;
                report.views_skipped = capture.skipped;
            }
            FrameSource::Views { views, renderer } => {
                let capture = capture_quilt(renderer, views, quilt)?;
                report.views_rendered = capture.rendered;
                report.views_skipped = capture.skipped;
            }
            FrameSource::Sequence(seq) => {
                seq.composite_into(quilt)?;
                report.views_rendered = seq.total_views();
            }
        }

        presenter.present(quilt, &params, sampling)?;
        self.frames += 1;
        tracing::debug!(
            rendered = report.views_rendered,
            skipped = report.views_skipped.len(),
            "cycle complete"
        );
        Ok(report)
    }
}

/// Supplies the per-cycle source to a [`LiveView`].
pub trait FrameDriver {
    /// `None` ends the loop.
    fn next_source(&mut self) -> Option<FrameSource<'_>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveStats {
    pub cycles: u64,
    pub views_skipped: u64,
    /// Cycles whose presentation failed recoverably.
    pub degraded_cycles: u64,
}

/// Cycle loop with a cooperative stop flag, checked between cycles.
#[derive(Clone, Debug)]
pub struct LiveView {
    stop: Arc<AtomicBool>,
    interval: Duration,
}

impl LiveView {
    pub fn new(interval: Duration) -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            interval,
        }
    }

    /// Flag that ends the loop after the current cycle when set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Run until stopped or the driver runs dry. The session's quilt is released on exit,
    /// including on error.
    #[tracing::instrument(skip_all)]
    pub fn run(
        &self,
        session: &mut LiveSession,
        driver: &mut dyn FrameDriver,
        presenter: &mut dyn Presenter,
    ) -> HoloquiltResult<LiveStats> {
        let result = self.run_inner(session, driver, presenter);
        session.release();
        if let Ok(stats) = &result {
            tracing::info!(cycles = stats.cycles, "live view stopped");
        }
        result
    }

    fn run_inner(
        &self,
        session: &mut LiveSession,
        driver: &mut dyn FrameDriver,
        presenter: &mut dyn Presenter,
    ) -> HoloquiltResult<LiveStats> {
        let mut stats = LiveStats::default();
        while !self.stop.load(Ordering::Acquire) {
            let Some(source) = driver.next_source() else {
                break;
            };
            match session.run_cycle(source, presenter) {
                Ok(report) => {
                    stats.views_skipped += report.views_skipped.len() as u64;
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "cycle degraded");
                    stats.degraded_cycles += 1;
                }
                Err(e) => return Err(e),
            }
            stats.cycles += 1;
            if !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
        }
        Ok(stats)
    }
}
