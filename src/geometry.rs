//! Multiview camera geometry.
//!
//! Views are produced with a shift rig: every virtual camera keeps the source orientation, is
//! translated along its local X axis, and gets an asymmetric frustum (lens shift) so that the
//! convergence plane projects identically in all views. No toe-in, hence no vertical parallax.

use glam::{DMat4, DVec3};

use crate::calibration::CalibrationProfile;
use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::layout::QuiltLayout;

/// What to do when the camera carries neither a focus distance nor a focus target.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocalFallback {
    /// Fail with [`HoloquiltError::MissingFocalReference`].
    #[default]
    Reject,
    /// Use the camera's distance to the world origin.
    DistanceToOrigin,
    /// Use a fixed convergence distance.
    Fixed(f64),
}

/// The single host camera the views are derived from.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SourceCamera {
    /// World-to-view matrix.
    pub view: DMat4,
    /// Perspective projection.
    pub projection: DMat4,
    /// Depth-of-field focus distance; `None` or `0.0` means unset.
    pub focus_distance: Option<f64>,
    /// World position of the depth-of-field target object, if any.
    pub focus_target: Option<DVec3>,
}

impl SourceCamera {
    /// Right-handed GL-style camera looking from `eye` at `target`, focused on `target`.
    pub fn look_at(
        eye: DVec3,
        target: DVec3,
        up: DVec3,
        fov_y_degrees: f64,
        aspect: f64,
        near: f64,
        far: f64,
    ) -> Self {
        Self {
            view: DMat4::look_at_rh(eye, target, up),
            projection: DMat4::perspective_rh_gl(fov_y_degrees.to_radians(), aspect, near, far),
            focus_distance: Some(eye.distance(target)),
            focus_target: None,
        }
    }

    /// Camera position in world space.
    pub fn position(&self) -> DVec3 {
        self.view.inverse().w_axis.truncate()
    }

    /// Resolve the convergence (zero-parallax) distance.
    pub fn convergence_distance(&self, fallback: FocalFallback) -> HoloquiltResult<f64> {
        if let Some(d) = self.focus_distance.filter(|d| *d != 0.0) {
            return Ok(d);
        }
        if let Some(target) = self.focus_target {
            return Ok(self.position().distance(target));
        }
        match fallback {
            FocalFallback::Reject => Err(HoloquiltError::missing_focal_reference(
                "camera has no focus distance and no focus target",
            )),
            FocalFallback::DistanceToOrigin => {
                let d = self.position().length();
                tracing::warn!(distance = d, "no focal reference, using distance to origin");
                Ok(d)
            }
            FocalFallback::Fixed(d) => Ok(d),
        }
    }

    /// Vertical field of view encoded in the projection, in degrees.
    pub fn vertical_fov_degrees(&self) -> f64 {
        vertical_fov_degrees(&self.projection)
    }
}

/// Vertical field of view `2·atan(1/P[1][1])` of a perspective projection, in degrees.
pub fn vertical_fov_degrees(projection: &DMat4) -> f64 {
    (2.0 * (1.0 / projection.y_axis.y).atan()).to_degrees()
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ViewEntry {
    pub index: u32,
    pub angle_degrees: f64,
    pub model_view: DMat4,
    pub projection: DMat4,
    /// Camera-space lateral translation applied to the view matrix.
    pub x_offset: f64,
    /// Horizontal lens shift added to the projection.
    pub projection_offset: f64,
}

/// All views of one frame or render job.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ViewSet {
    pub view_cone_degrees: f64,
    pub convergence_distance: f64,
    pub aspect_ratio: f64,
    pub entries: Vec<ViewEntry>,
}

impl ViewSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sweep angles for `total_views` views, highest angle first (display scan order).
pub fn view_angles_degrees(view_cone_degrees: f64, total_views: u32) -> HoloquiltResult<Vec<f64>> {
    if total_views <= 1 {
        return Err(HoloquiltError::config(format!(
            "multiview geometry needs at least 2 views, got {total_views}"
        )));
    }
    let last = f64::from(total_views - 1);
    Ok((0..total_views)
        .map(|i| -(-view_cone_degrees / 2.0 + view_cone_degrees * (f64::from(i) / last)))
        .collect())
}

/// Lateral camera offset for a view angle at the given convergence distance.
pub fn x_offset(convergence_distance: f64, angle_degrees: f64) -> f64 {
    convergence_distance * (angle_degrees.to_radians() * 0.5).tan()
}

/// Lens shift keeping `x_offset` aligned at the convergence plane.
pub fn projection_offset(
    x_offset: f64,
    aspect_ratio: f64,
    convergence_distance: f64,
    view_cone_degrees: f64,
) -> f64 {
    let half_size = convergence_distance * (view_cone_degrees.to_radians() * 0.5).tan();
    x_offset / (aspect_ratio * half_size)
}

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ViewGeometrySolver {
    pub view_cone_degrees: f64,
    pub focal_fallback: FocalFallback,
}

impl Default for ViewGeometrySolver {
    fn default() -> Self {
        Self {
            view_cone_degrees: 40.0,
            focal_fallback: FocalFallback::Reject,
        }
    }
}

impl ViewGeometrySolver {
    pub fn new(view_cone_degrees: f64, focal_fallback: FocalFallback) -> Self {
        Self {
            view_cone_degrees,
            focal_fallback,
        }
    }

    /// Derive one view per quilt tile. The aspect ratio is the display's.
    pub fn solve(
        &self,
        camera: &SourceCamera,
        calibration: &CalibrationProfile,
        layout: &QuiltLayout,
    ) -> HoloquiltResult<ViewSet> {
        layout.validate()?;
        self.solve_views(camera, layout.total_views(), calibration.display_aspect)
    }

    #[tracing::instrument(skip(self, camera), fields(cone = self.view_cone_degrees))]
    pub fn solve_views(
        &self,
        camera: &SourceCamera,
        total_views: u32,
        aspect_ratio: f64,
    ) -> HoloquiltResult<ViewSet> {
        let cone = self.view_cone_degrees;
        if !(cone.is_finite() && cone > 0.0 && cone < 180.0) {
            return Err(HoloquiltError::config(format!(
                "view cone must be in (0, 180) degrees, got {cone}"
            )));
        }
        if !(aspect_ratio.is_finite() && aspect_ratio > 0.0) {
            return Err(HoloquiltError::config(format!(
                "aspect ratio must be > 0, got {aspect_ratio}"
            )));
        }

        let angles = view_angles_degrees(cone, total_views)?;
        let distance = camera.convergence_distance(self.focal_fallback)?;
        if !(distance.is_finite() && distance > 0.0) {
            return Err(HoloquiltError::missing_focal_reference(format!(
                "convergence distance must be > 0, got {distance}"
            )));
        }

        let entries = angles
            .into_iter()
            .enumerate()
            .map(|(i, angle)| {
                let dx = x_offset(distance, angle);
                let shift = projection_offset(dx, aspect_ratio, distance, cone);

                let mut model_view = camera.view;
                model_view.w_axis.x += dx;
                let mut projection = camera.projection;
                projection.z_axis.x += shift;

                ViewEntry {
                    index: i as u32,
                    angle_degrees: angle,
                    model_view,
                    projection,
                    x_offset: dx,
                    projection_offset: shift,
                }
            })
            .collect();

        tracing::debug!(views = total_views, distance, "solved view geometry");
        Ok(ViewSet {
            view_cone_degrees: cone,
            convergence_distance: distance,
            aspect_ratio,
            entries,
        })
    }
}
