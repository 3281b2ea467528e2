use glam::{DMat4, DVec3};
use holoquilt::geometry::{projection_offset, view_angles_degrees, x_offset};
use holoquilt::rig::{ANCHOR_NAME, RigPlan};
use holoquilt::{
    FocalFallback, HoloquiltError, QuiltLayout, QuiltPreset, RenderSetupBuilder, RigConfig,
    RigManifest, RigState, SourceCamera, ViewGeometrySolver,
};

fn config(preset: QuiltPreset) -> RigConfig {
    RigConfig {
        layout: QuiltLayout::preset(preset),
        ..RigConfig::default()
    }
}

#[test]
fn cameras_views_and_suffixes_are_numbered() {
    let plan = RigPlan::compute(&config(QuiltPreset::HighRes)).unwrap();
    assert_eq!(plan.cameras.len(), 45);
    assert_eq!(plan.render_views.len(), 45);
    assert_eq!(plan.anchor.name, ANCHOR_NAME);

    assert_eq!(plan.cameras[0].name, "cam.00");
    assert_eq!(plan.cameras[44].name, "cam.44");
    assert_eq!(plan.render_views[7].name, "view.07");
    assert_eq!(plan.render_views[7].camera_suffix, ".07");
    for (i, cam) in plan.cameras.iter().enumerate() {
        assert_eq!(cam.view_index, i as u32);
    }
    assert_eq!(plan.active_camera, "cam.22");
}

#[test]
fn camera_placement_matches_live_view_offsets() {
    let cfg = config(QuiltPreset::Standard);
    let plan = RigPlan::compute(&cfg).unwrap();
    let d = cfg.convergence_distance();
    assert!((d - 1.0 / 20f64.to_radians().tan()).abs() < 1e-12);

    let angles = view_angles_degrees(cfg.view_cone_degrees, 32).unwrap();
    for (cam, angle) in plan.cameras.iter().zip(angles) {
        let dx = x_offset(d, angle);
        assert!((cam.location.x + dx).abs() < 1e-12);
        assert_eq!((cam.location.y, cam.location.z), (0.0, d));
        let shift = projection_offset(dx, cfg.display_aspect, d, cfg.view_cone_degrees);
        assert!((cam.shift_x - shift / 2.0).abs() < 1e-12);
        assert_eq!(cam.fov_degrees, 40.0);
    }

    // Leftmost camera first, sweeping right.
    assert!(plan.cameras[0].location.x < 0.0);
    assert!(plan.cameras[31].location.x > 0.0);
}

#[test]
fn render_resolution_follows_the_preset() {
    let hi = RigPlan::compute(&config(QuiltPreset::HighRes)).unwrap();
    assert_eq!((hi.resolution.width, hi.resolution.height), (819, 455));
    assert_eq!(hi.resolution.pixel_aspect_y, 1.125);

    let standard = RigPlan::compute(&config(QuiltPreset::Standard)).unwrap();
    assert_eq!((standard.resolution.width, standard.resolution.height), (512, 256));
    assert_eq!(standard.resolution.pixel_aspect_y, 1.25);
}

#[test]
fn anchor_box_spans_the_depth_volume() {
    let cfg = config(QuiltPreset::Standard);
    let plan = RigPlan::compute(&cfg).unwrap();
    for c in plan.anchor.front {
        assert_eq!(c.z, cfg.depth_half_extent);
    }
    for c in plan.anchor.back {
        assert_eq!(c.z, -cfg.depth_half_extent);
    }
    // The back face is wider: it lies farther from the cameras inside the same cone.
    assert!(plan.anchor.back[1].x > plan.anchor.front[1].x);
}

#[test]
fn rebuilding_replaces_the_previous_rig() {
    let mut scene = RigManifest::default();
    let mut builder = RenderSetupBuilder::new(config(QuiltPreset::HighRes));
    let first = builder.build(&mut scene).unwrap();
    assert_eq!(builder.state(), RigState::Ready);
    assert!(scene.multiview);
    assert_eq!(scene.active_camera.as_deref(), Some("cam.22"));

    let second = builder.build(&mut scene).unwrap();
    assert_eq!(first, second);
    assert_eq!(scene.cameras.len(), 45);
    assert_eq!(scene.render_views.len(), 45);
}

#[test]
fn fresh_builder_rebuilds_over_a_reloaded_manifest() {
    let mut scene = RigManifest::default();
    RenderSetupBuilder::new(config(QuiltPreset::HighRes))
        .build(&mut scene)
        .unwrap();
    let mut reloaded = RigManifest::from_json(&scene.to_json_pretty().unwrap()).unwrap();

    let mut other = RenderSetupBuilder::new(config(QuiltPreset::Standard));
    let plan = other.build(&mut reloaded).unwrap();
    assert_eq!(other.state(), RigState::Ready);
    assert_eq!(reloaded.cameras.len(), 32);
    assert_eq!(reloaded.render_views.len(), 32);
    assert_eq!(reloaded.active_camera.as_deref(), Some(plan.active_camera.as_str()));
    assert_eq!(reloaded.cameras, plan.cameras);
}

#[test]
fn an_unrelated_anchor_blocks_the_build() {
    let mut scene = RigManifest::default();
    let mut plan = RigPlan::compute(&RigConfig::default()).unwrap();
    plan.anchor.name = "Stage".to_owned();
    scene.anchor = Some(plan.anchor);

    // Only the rig's own anchor is replaced; someone else's object stays untouched.
    let mut builder = RenderSetupBuilder::new(RigConfig::default());
    let err = builder.build(&mut scene).unwrap_err();
    assert!(matches!(err, HoloquiltError::Config(_)));
    assert_eq!(builder.state(), RigState::Uninitialized);
    assert_eq!(scene.anchor.as_ref().map(|a| a.name.as_str()), Some("Stage"));
}

#[test]
fn invalid_rig_config_is_rejected_before_touching_the_scene() {
    let mut scene = RigManifest::default();
    let mut builder = RenderSetupBuilder::new(RigConfig {
        view_cone_degrees: 0.0,
        ..RigConfig::default()
    });
    assert!(matches!(
        builder.build(&mut scene),
        Err(HoloquiltError::Config(_))
    ));
    assert_eq!(scene, RigManifest::default());
}

#[test]
fn manifest_survives_json() {
    let mut scene = RigManifest::default();
    RenderSetupBuilder::new(config(QuiltPreset::Standard))
        .build(&mut scene)
        .unwrap();
    let text = scene.to_json_pretty().unwrap();
    assert!(text.contains("\"cam.31\""));
    assert_eq!(RigManifest::from_json(&text).unwrap(), scene);
}

#[test]
fn rig_cameras_reproduce_the_live_view_matrices() {
    let cfg = config(QuiltPreset::Standard);
    let plan = RigPlan::compute(&cfg).unwrap();
    let aspect = cfg.display_aspect;
    let views = plan.view_set(DMat4::IDENTITY, aspect).unwrap();
    assert_eq!(views.len(), 32);

    let d = cfg.convergence_distance();
    let cam = &plan.cameras[0];
    let half_y = (cfg.view_cone_degrees.to_radians() * 0.5).tan() / aspect;
    let source = SourceCamera {
        view: DMat4::look_at_rh(DVec3::new(0.0, 0.0, d), DVec3::ZERO, DVec3::Y),
        projection: DMat4::perspective_rh_gl(
            2.0 * half_y.atan(),
            aspect,
            cam.clip_start,
            cam.clip_end,
        ),
        focus_distance: Some(d),
        focus_target: None,
    };
    let live = ViewGeometrySolver::new(cfg.view_cone_degrees, FocalFallback::Reject)
        .solve_views(&source, 32, aspect)
        .unwrap();

    assert!((views.convergence_distance - live.convergence_distance).abs() < 1e-12);
    for (rig, solved) in views.entries.iter().zip(&live.entries) {
        assert_eq!(rig.index, solved.index);
        assert!((rig.angle_degrees - solved.angle_degrees).abs() < 1e-9);
        assert!((rig.x_offset - solved.x_offset).abs() < 1e-12);
        assert!((rig.projection_offset - solved.projection_offset).abs() < 1e-12);
        assert!(rig.model_view.abs_diff_eq(solved.model_view, 1e-9), "view {}", rig.index);
        assert!(rig.projection.abs_diff_eq(solved.projection, 1e-9), "view {}", rig.index);
    }
}

#[test]
fn manifest_views_follow_the_anchor() {
    let mut scene = RigManifest::default();
    assert_eq!(scene.view_set(DMat4::IDENTITY, 1.6).unwrap(), None);

    let plan = RenderSetupBuilder::new(RigConfig::default())
        .build(&mut scene)
        .unwrap();
    let anchor = DMat4::from_translation(DVec3::new(2.0, -1.0, 5.0));
    let views = scene.view_set(anchor, 1.6).unwrap().unwrap();
    for (entry, cam) in views.entries.iter().zip(&plan.cameras) {
        let eye = entry.model_view.inverse().w_axis.truncate();
        assert!(eye.abs_diff_eq(DVec3::new(2.0, -1.0, 5.0) + cam.location, 1e-9));
    }
}
