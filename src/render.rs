//! Off-screen view rendering.
//!
//! The host engine owns the scene and the rasterizer; this crate only needs a synchronous
//! "draw the scene from this pose into a buffer" call per view. [`capture_quilt`] runs that call
//! once per view and hands the results to the compositor.

use glam::{DMat4, DVec3, DVec4};

use crate::compositor::QuiltTexture;
use crate::foundation::core::{PixelBuffer, Rgba8};
use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::geometry::ViewSet;

/// Draws the host scene from an arbitrary pose/projection into an RGBA8 buffer.
///
/// Implementations must return a buffer of exactly `width`×`height` (bottom-up rows) and must not
/// reuse a cached image across calls with different matrices. The call is blocking: the buffer is
/// complete and readable when it returns. Allocation failures should be reported as
/// [`HoloquiltError::Resource`] so the caller can skip the view.
pub trait ViewRenderer {
    fn render_view(
        &mut self,
        model_view: &DMat4,
        projection: &DMat4,
        width: u32,
        height: u32,
    ) -> HoloquiltResult<PixelBuffer>;
}

impl<F> ViewRenderer for F
where
    F: FnMut(&DMat4, &DMat4, u32, u32) -> HoloquiltResult<PixelBuffer>,
{
    fn render_view(
        &mut self,
        model_view: &DMat4,
        projection: &DMat4,
        width: u32,
        height: u32,
    ) -> HoloquiltResult<PixelBuffer> {
        self(model_view, projection, width, height)
    }
}

/// Outcome of one capture pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureReport {
    /// Views rendered and composited.
    pub rendered: u32,
    /// Views skipped because of a recoverable resource failure.
    pub skipped: Vec<u32>,
}

impl CaptureReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Render every view in order, then blit every result into its tile.
///
/// A [`HoloquiltError::Resource`] from the renderer skips that view (its tile keeps the previous
/// contents); any other error aborts the pass.
#[tracing::instrument(skip_all, fields(views = views.len()))]
pub fn capture_quilt(
    renderer: &mut dyn ViewRenderer,
    views: &ViewSet,
    quilt: &mut QuiltTexture,
) -> HoloquiltResult<CaptureReport> {
    let layout = *quilt.layout();
    if views.len() != layout.total_views() as usize {
        return Err(HoloquiltError::config(format!(
            "view set has {} views but the quilt holds {}",
            views.len(),
            layout.total_views()
        )));
    }

    let mut report = CaptureReport::default();
    let mut rendered = Vec::with_capacity(views.len());
    for entry in &views.entries {
        match renderer.render_view(
            &entry.model_view,
            &entry.projection,
            layout.view_width,
            layout.view_height,
        ) {
            Ok(buf) => rendered.push((entry.index, buf)),
            Err(HoloquiltError::Resource(msg)) => {
                tracing::warn!(view = entry.index, %msg, "view render failed, skipping");
                report.skipped.push(entry.index);
            }
            Err(e) => return Err(e),
        }
    }

    for (index, buf) in &rendered {
        quilt.blit_view(*index, buf)?;
        report.rendered += 1;
    }
    Ok(report)
}

/// Minimal CPU renderer drawing world-space points as filled squares.
///
/// Used for calibration probes and previews without a host engine: parallax between views is
/// directly visible as horizontal displacement of the markers.
#[derive(Clone, Debug)]
pub struct ProbeRenderer {
    pub background: Rgba8,
    pub markers: Vec<ProbeMarker>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeMarker {
    pub position: DVec3,
    pub color: Rgba8,
    /// Half size of the square in pixels.
    pub radius_px: u32,
}

impl ProbeRenderer {
    pub fn new(background: Rgba8) -> Self {
        Self {
            background,
            markers: Vec::new(),
        }
    }

    pub fn with_marker(mut self, position: DVec3, color: Rgba8, radius_px: u32) -> Self {
        self.markers.push(ProbeMarker {
            position,
            color,
            radius_px,
        });
        self
    }

    /// Pixel position of a world point, `None` when it is behind the camera or the matrices do
    /// not give a finite position.
    pub fn project(
        model_view: &DMat4,
        projection: &DMat4,
        position: DVec3,
        width: u32,
        height: u32,
    ) -> Option<(f64, f64)> {
        let clip: DVec4 = *projection * (*model_view * position.extend(1.0));
        if !(clip.w.is_finite() && clip.w > 0.0) {
            return None;
        }
        let x = (clip.x / clip.w * 0.5 + 0.5) * f64::from(width);
        let y = (clip.y / clip.w * 0.5 + 0.5) * f64::from(height);
        (x.is_finite() && y.is_finite()).then_some((x, y))
    }
}

impl ViewRenderer for ProbeRenderer {
    fn render_view(
        &mut self,
        model_view: &DMat4,
        projection: &DMat4,
        width: u32,
        height: u32,
    ) -> HoloquiltResult<PixelBuffer> {
        let mut buf = PixelBuffer::filled(width, height, self.background)?;

        // Far markers first so nearer ones overdraw them.
        let mut order: Vec<(f64, &ProbeMarker)> = self
            .markers
            .iter()
            .map(|m| ((*model_view * m.position.extend(1.0)).z, m))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));

        for (_, marker) in order {
            let Some((px, py)) =
                Self::project(model_view, projection, marker.position, width, height)
            else {
                continue;
            };
            let r = f64::from(marker.radius_px);
            let x0 = (px - r).floor().max(0.0) as i64;
            let x1 = (px + r).ceil().min(f64::from(width)) as i64;
            let y0 = (py - r).floor().max(0.0) as i64;
            let y1 = (py + r).ceil().min(f64::from(height)) as i64;
            for y in y0..y1 {
                for x in x0..x1 {
                    buf.set_pixel(x as u32, y as u32, marker.color);
                }
            }
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{SourceCamera, ViewGeometrySolver};

    #[test]
    fn closures_are_renderers() {
        let mut calls = 0u32;
        let mut r = |_: &DMat4, _: &DMat4, w: u32, h: u32| {
            calls += 1;
            PixelBuffer::new(w, h)
        };
        let buf = r
            .render_view(&DMat4::IDENTITY, &DMat4::IDENTITY, 3, 2)
            .unwrap();
        assert_eq!((buf.width, buf.height), (3, 2));
        assert_eq!(calls, 1);
    }

    #[test]
    fn convergence_point_has_zero_parallax() {
        let cam = SourceCamera::look_at(
            DVec3::new(0.0, 0.0, 10.0),
            DVec3::ZERO,
            DVec3::Y,
            40.0,
            1.6,
            0.1,
            100.0,
        );
        let views = ViewGeometrySolver::default()
            .solve_views(&cam, 9, 1.6)
            .unwrap();

        let mut xs = Vec::new();
        for v in &views.entries {
            let (x, _) =
                ProbeRenderer::project(&v.model_view, &v.projection, DVec3::ZERO, 160, 100)
                    .unwrap();
            xs.push(x);
        }
        for x in &xs {
            assert!((x - 80.0).abs() < 1e-6, "focal point drifted to {x}");
        }

        // A point in front of the focal plane moves across the sweep.
        let near = DVec3::new(0.0, 0.0, 3.0);
        let first = &views.entries[0];
        let last = &views.entries[8];
        let (a, _) =
            ProbeRenderer::project(&first.model_view, &first.projection, near, 160, 100).unwrap();
        let (b, _) =
            ProbeRenderer::project(&last.model_view, &last.projection, near, 160, 100).unwrap();
        assert!((a - b).abs() > 1.0);
    }

    #[test]
    fn probe_renderer_draws_marker_at_projection() {
        let cam = SourceCamera::look_at(
            DVec3::new(0.0, 0.0, 5.0),
            DVec3::ZERO,
            DVec3::Y,
            40.0,
            1.0,
            0.1,
            100.0,
        );
        let mut r = ProbeRenderer::new([0, 0, 0, 255]).with_marker(DVec3::ZERO, [255, 0, 0, 255], 2);
        let buf = r.render_view(&cam.view, &cam.projection, 32, 32).unwrap();
        assert_eq!(buf.pixel(16, 16), [255, 0, 0, 255]);
        assert_eq!(buf.pixel(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn non_finite_projections_draw_nothing() {
        let cam = SourceCamera::look_at(
            DVec3::new(0.0, 0.0, 5.0),
            DVec3::ZERO,
            DVec3::Y,
            40.0,
            1.0,
            0.1,
            100.0,
        );
        let mut r = ProbeRenderer::new([0, 0, 0, 255]).with_marker(DVec3::ZERO, [255, 0, 0, 255], 2);
        for broken in [f64::NAN, f64::INFINITY] {
            let mut projection = cam.projection;
            projection.z_axis.x = broken;
            assert_eq!(
                ProbeRenderer::project(&cam.view, &projection, DVec3::ZERO, 32, 32),
                None
            );
            let buf = r.render_view(&cam.view, &projection, 32, 32).unwrap();
            for y in 0..32 {
                for x in 0..32 {
                    assert_eq!(buf.pixel(x, y), [0, 0, 0, 255], "pixel ({x}, {y})");
                }
            }
        }
    }
}
