//! Offline render rig.
//!
//! Instead of solving matrices per frame, the same view sweep is expressed as persistent camera
//! objects parented to a rig anchor so a host batch renderer can write one image per view
//! (`frame.00.png` … `frame.NN.png`). Camera placement and lens shift come from the formulas in
//! [`crate::geometry`], so offline renders line up with the live preview.

use glam::{DMat4, DVec3};

use crate::foundation::error::{HoloquiltError, HoloquiltResult};
use crate::geometry::{ViewEntry, ViewSet, projection_offset, view_angles_degrees, x_offset};
use crate::layout::{QuiltLayout, RenderResolution};

pub const ANCHOR_NAME: &str = "Multiview";

/// Inset applied to both clip planes so the anchor box itself is not rendered.
const CLIP_INSET: f64 = 0.01;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub view_cone_degrees: f64,
    pub layout: QuiltLayout,
    /// Display width / height.
    pub display_aspect: f64,
    /// Half width of the anchor's focal plane, in scene units.
    pub anchor_half_size: f64,
    /// Half depth of the renderable volume around the focal plane.
    pub depth_half_extent: f64,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            view_cone_degrees: 40.0,
            layout: QuiltLayout::default(),
            display_aspect: 2560.0 / 1600.0,
            anchor_half_size: 1.0,
            depth_half_extent: 1.0,
        }
    }
}

impl RigConfig {
    pub fn validate(&self) -> HoloquiltResult<()> {
        self.layout.validate()?;
        let cone = self.view_cone_degrees;
        if !(cone.is_finite() && cone > 0.0 && cone < 180.0) {
            return Err(HoloquiltError::config(format!(
                "view cone must be in (0, 180) degrees, got {cone}"
            )));
        }
        if !(self.display_aspect.is_finite() && self.display_aspect > 0.0) {
            return Err(HoloquiltError::config("display aspect must be > 0"));
        }
        if !(self.anchor_half_size.is_finite() && self.anchor_half_size > 0.0) {
            return Err(HoloquiltError::config("rig anchor size must be > 0"));
        }
        if !(self.depth_half_extent.is_finite() && self.depth_half_extent > CLIP_INSET) {
            return Err(HoloquiltError::config(format!(
                "depth half extent must be > {CLIP_INSET}"
            )));
        }
        Ok(())
    }

    /// Camera distance from the anchor at which the focal plane fills the view cone.
    pub fn convergence_distance(&self) -> f64 {
        self.anchor_half_size / (self.view_cone_degrees.to_radians() * 0.5).tan()
    }
}

/// Rig anchor: a wireframe box marking the displayable volume.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RigAnchor {
    pub name: String,
    /// Corners of the face nearest the cameras (top-left, top-right, bottom-right, bottom-left).
    pub front: [DVec3; 4],
    pub back: [DVec3; 4],
}

impl RigAnchor {
    /// Box edges as index pairs into `front ++ back`.
    pub fn edges() -> [(usize, usize); 12] {
        [
            (0, 1),
            (1, 2),
            (2, 3),
            (3, 0),
            (4, 5),
            (5, 6),
            (6, 7),
            (7, 4),
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RigCamera {
    pub name: String,
    pub view_index: u32,
    /// Location relative to the anchor. Cameras share the anchor's orientation and look down -Z.
    pub location: DVec3,
    /// Field of view across the larger image dimension.
    pub fov_degrees: f64,
    /// Horizontal lens shift, in units of the frustum width.
    pub shift_x: f64,
    pub clip_start: f64,
    pub clip_end: f64,
    /// Hidden in the host viewport so it does not show up on the display.
    pub hidden: bool,
}

impl RigCamera {
    /// World-to-view matrix for a rig whose anchor sits at `anchor_to_world`.
    pub fn view_matrix(&self, anchor_to_world: DMat4) -> DMat4 {
        (anchor_to_world * DMat4::from_translation(self.location)).inverse()
    }

    /// Shifted GL projection for an image of the given width / height.
    pub fn projection(&self, aspect: f64) -> DMat4 {
        let half = (self.fov_degrees.to_radians() * 0.5).tan();
        let half_y = if aspect >= 1.0 { half / aspect } else { half };
        let mut projection =
            DMat4::perspective_rh_gl(2.0 * half_y.atan(), aspect, self.clip_start, self.clip_end);
        projection.z_axis.x += 2.0 * self.shift_x;
        projection
    }
}

/// Per-view matrices of existing rig cameras, in camera order.
///
/// The result matches what [`crate::geometry::ViewGeometrySolver`] derives for a centred source
/// camera with the same cone and convergence distance, so a built rig can drive the live view.
pub fn rig_views(
    cameras: &[RigCamera],
    anchor_to_world: DMat4,
    aspect: f64,
) -> HoloquiltResult<ViewSet> {
    let Some(first) = cameras.first() else {
        return Err(HoloquiltError::config("rig has no cameras"));
    };
    if !(aspect.is_finite() && aspect > 0.0) {
        return Err(HoloquiltError::config(format!("aspect ratio must be > 0, got {aspect}")));
    }
    let distance = first.location.z;
    if !(distance.is_finite() && distance > 0.0) {
        return Err(HoloquiltError::config(format!(
            "rig cameras must sit in front of the anchor, got z = {distance}"
        )));
    }

    let entries = cameras
        .iter()
        .enumerate()
        .map(|(i, cam)| {
            let dx = -cam.location.x;
            ViewEntry {
                index: i as u32,
                angle_degrees: (2.0 * (dx / distance).atan()).to_degrees(),
                model_view: cam.view_matrix(anchor_to_world),
                projection: cam.projection(aspect),
                x_offset: dx,
                projection_offset: 2.0 * cam.shift_x,
            }
        })
        .collect();

    Ok(ViewSet {
        view_cone_degrees: first.fov_degrees,
        convergence_distance: distance,
        aspect_ratio: aspect,
        entries,
    })
}

/// A host render view producing one image per camera (`camera_suffix` selects `cam<suffix>`).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RenderView {
    pub name: String,
    pub camera_suffix: String,
}

/// Everything the builder emits, computed up front.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RigPlan {
    pub anchor: RigAnchor,
    pub cameras: Vec<RigCamera>,
    pub render_views: Vec<RenderView>,
    pub active_camera: String,
    pub resolution: RenderResolution,
}

impl RigPlan {
    /// Live-view matrices of this rig's cameras.
    pub fn view_set(&self, anchor_to_world: DMat4, aspect: f64) -> HoloquiltResult<ViewSet> {
        rig_views(&self.cameras, anchor_to_world, aspect)
    }

    pub fn compute(config: &RigConfig) -> HoloquiltResult<Self> {
        config.validate()?;
        let n = config.layout.total_views();
        let cone = config.view_cone_degrees;
        let d = config.convergence_distance();
        let depth = config.depth_half_extent;
        let half_tan = (cone.to_radians() * 0.5).tan();

        let corners = |z_from_camera: f64, z: f64| {
            let hx = z_from_camera * half_tan;
            let hy = hx / config.display_aspect;
            [
                DVec3::new(-hx, hy, z),
                DVec3::new(hx, hy, z),
                DVec3::new(hx, -hy, z),
                DVec3::new(-hx, -hy, z),
            ]
        };
        let anchor = RigAnchor {
            name: ANCHOR_NAME.to_owned(),
            front: corners(d - depth, depth),
            back: corners(d + depth, -depth),
        };

        let angles = view_angles_degrees(cone, n)?;
        let cameras: Vec<RigCamera> = angles
            .iter()
            .enumerate()
            .map(|(i, angle)| {
                let dx = x_offset(d, *angle);
                let shift = projection_offset(dx, config.display_aspect, d, cone);
                RigCamera {
                    name: format!("cam.{i:02}"),
                    view_index: i as u32,
                    location: DVec3::new(-dx, 0.0, d),
                    fov_degrees: cone,
                    shift_x: shift * 0.5,
                    clip_start: d - depth + CLIP_INSET,
                    clip_end: d + depth - CLIP_INSET,
                    hidden: true,
                }
            })
            .collect();

        let render_views = (0..n)
            .map(|i| RenderView {
                name: format!("view.{i:02}"),
                camera_suffix: format!(".{i:02}"),
            })
            .collect();

        let active_camera = cameras[(n / 2) as usize].name.clone();
        Ok(Self {
            anchor,
            cameras,
            render_views,
            active_camera,
            resolution: config.layout.render_resolution(),
        })
    }
}

/// Host scene-graph operations needed to materialize a rig.
pub trait SceneGraph {
    /// Delete a previously built rig (anchor, its cameras and their render views).
    fn remove_rig(&mut self, anchor: &str) -> HoloquiltResult<()>;
    /// Turn on multiview rendering and disable the stock stereo views.
    fn enable_multiview(&mut self) -> HoloquiltResult<()>;
    fn create_anchor(&mut self, anchor: &RigAnchor) -> HoloquiltResult<()>;
    fn create_camera(&mut self, parent: &str, camera: &RigCamera) -> HoloquiltResult<()>;
    fn add_render_view(&mut self, view: &RenderView) -> HoloquiltResult<()>;
    fn set_active_camera(&mut self, name: &str) -> HoloquiltResult<()>;
    fn set_render_resolution(&mut self, resolution: &RenderResolution) -> HoloquiltResult<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RigState {
    #[default]
    Uninitialized,
    MultiviewRigCreated,
    CamerasCreated(u32),
    RenderViewsRegistered,
    Ready,
}

/// Builds the offline rig into a [`SceneGraph`], tracking progress in [`RigState`].
#[derive(Clone, Debug, Default)]
pub struct RenderSetupBuilder {
    config: RigConfig,
    state: RigState,
}

impl RenderSetupBuilder {
    pub fn new(config: RigConfig) -> Self {
        Self {
            config,
            state: RigState::Uninitialized,
        }
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn state(&self) -> RigState {
        self.state
    }

    /// Build (or rebuild) the rig. A rig already anchored at [`ANCHOR_NAME`] is removed first,
    /// whichever builder or process created it.
    ///
    /// On error the state reflects the last completed step.
    #[tracing::instrument(skip_all, fields(views = self.config.layout.total_views()))]
    pub fn build(&mut self, scene: &mut dyn SceneGraph) -> HoloquiltResult<RigPlan> {
        let plan = RigPlan::compute(&self.config)?;

        tracing::debug!(state = ?self.state, "discarding any previous rig");
        scene.remove_rig(ANCHOR_NAME)?;
        self.state = RigState::Uninitialized;

        scene.enable_multiview()?;
        scene.create_anchor(&plan.anchor)?;
        self.state = RigState::MultiviewRigCreated;

        for (i, cam) in plan.cameras.iter().enumerate() {
            scene.create_camera(&plan.anchor.name, cam)?;
            self.state = RigState::CamerasCreated(i as u32 + 1);
        }

        for view in &plan.render_views {
            scene.add_render_view(view)?;
        }
        self.state = RigState::RenderViewsRegistered;

        scene.set_active_camera(&plan.active_camera)?;
        scene.set_render_resolution(&plan.resolution)?;
        self.state = RigState::Ready;

        tracing::info!(
            cameras = plan.cameras.len(),
            convergence = self.config.convergence_distance(),
            "render rig ready"
        );
        Ok(plan)
    }
}

/// In-memory [`SceneGraph`] recording the emitted rig; serializable for batch tools.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RigManifest {
    pub multiview: bool,
    pub anchor: Option<RigAnchor>,
    pub cameras: Vec<RigCamera>,
    pub render_views: Vec<RenderView>,
    pub active_camera: Option<String>,
    pub resolution: Option<RenderResolution>,
}

impl RigManifest {
    pub fn to_json_pretty(&self) -> HoloquiltResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| HoloquiltError::serde(e.to_string()))
    }

    pub fn from_json(text: &str) -> HoloquiltResult<Self> {
        serde_json::from_str(text).map_err(|e| HoloquiltError::serde(e.to_string()))
    }

    /// Live-view matrices of the recorded rig cameras, or `None` when no rig anchor exists.
    pub fn view_set(
        &self,
        anchor_to_world: DMat4,
        aspect: f64,
    ) -> HoloquiltResult<Option<ViewSet>> {
        if self.anchor.as_ref().is_none_or(|a| a.name != ANCHOR_NAME) {
            return Ok(None);
        }
        rig_views(&self.cameras, anchor_to_world, aspect).map(Some)
    }
}

impl SceneGraph for RigManifest {
    fn remove_rig(&mut self, anchor: &str) -> HoloquiltResult<()> {
        if self.anchor.as_ref().is_some_and(|a| a.name == anchor) {
            *self = Self {
                multiview: self.multiview,
                ..Self::default()
            };
        }
        Ok(())
    }

    fn enable_multiview(&mut self) -> HoloquiltResult<()> {
        self.multiview = true;
        Ok(())
    }

    fn create_anchor(&mut self, anchor: &RigAnchor) -> HoloquiltResult<()> {
        if self.anchor.is_some() {
            return Err(HoloquiltError::config(format!(
                "scene already contains a rig anchor '{}'",
                anchor.name
            )));
        }
        self.anchor = Some(anchor.clone());
        Ok(())
    }

    fn create_camera(&mut self, parent: &str, camera: &RigCamera) -> HoloquiltResult<()> {
        match &self.anchor {
            Some(a) if a.name == parent => {
                self.cameras.push(camera.clone());
                Ok(())
            }
            _ => Err(HoloquiltError::config(format!(
                "camera '{}' parent '{parent}' does not exist",
                camera.name
            ))),
        }
    }

    fn add_render_view(&mut self, view: &RenderView) -> HoloquiltResult<()> {
        self.render_views.push(view.clone());
        Ok(())
    }

    fn set_active_camera(&mut self, name: &str) -> HoloquiltResult<()> {
        if !self.cameras.iter().any(|c| c.name == name) {
            return Err(HoloquiltError::config(format!("no camera named '{name}'")));
        }
        self.active_camera = Some(name.to_owned());
        Ok(())
    }

    fn set_render_resolution(&mut self, resolution: &RenderResolution) -> HoloquiltResult<()> {
        self.resolution = Some(*resolution);
        Ok(())
    }
}
