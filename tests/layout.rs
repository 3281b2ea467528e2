use std::collections::HashSet;

use holoquilt::{HoloquiltError, QuiltLayout, QuiltPreset};

#[test]
fn five_by_nine_tiles() {
    let tight = QuiltLayout::tight(5, 9, 819, 455).unwrap();
    assert_eq!((tight.quilt_width, tight.quilt_height), (4095, 4095));
    assert_eq!(tight.tile_origin(7).unwrap(), (1638, 455));

    let padded = QuiltLayout::preset(QuiltPreset::HighRes);
    assert_eq!((padded.quilt_width, padded.quilt_height), (4096, 4096));
    assert_eq!(padded.tile_origin(7).unwrap(), (1638, 455));
}

#[test]
fn tile_origins_are_unique_and_in_bounds() {
    let layouts = [
        QuiltLayout::preset(QuiltPreset::Standard),
        QuiltLayout::preset(QuiltPreset::HighRes),
        QuiltLayout::tight(8, 6, 420, 560).unwrap(),
        QuiltLayout::tight(2, 1, 1, 1).unwrap(),
    ];
    for layout in layouts {
        let mut seen = HashSet::new();
        for i in 0..layout.total_views() {
            let (x, y) = layout.tile_origin(i).unwrap();
            assert!(x + layout.view_width <= layout.quilt_width);
            assert!(y + layout.view_height <= layout.quilt_height);
            assert!(seen.insert((x, y)), "view {i} collides in {layout:?}");
        }
        assert!(layout.tile_origin(layout.total_views()).is_err());
    }
}

#[test]
fn invalid_layouts_are_config_errors() {
    let cases = [
        QuiltLayout::new(0, 8, 512, 256, 2048, 2048),
        QuiltLayout::new(1, 1, 512, 256, 2048, 2048),
        QuiltLayout::new(4, 8, 0, 256, 2048, 2048),
        QuiltLayout::new(4, 8, 512, 256, 2047, 2048),
    ];
    for c in cases {
        assert!(matches!(c, Err(HoloquiltError::Config(_))));
    }
}

#[test]
fn device_default_quilt_floors_view_size() {
    let l = QuiltLayout::from_quilt_size(4096, 4096, 5, 9).unwrap();
    assert_eq!((l.view_width, l.view_height), (819, 455));
    assert_eq!(l, QuiltLayout::preset(QuiltPreset::HighRes));
}

#[test]
fn offline_resolution_carries_pixel_aspect() {
    let hi = QuiltLayout::preset(QuiltPreset::HighRes).render_resolution();
    assert_eq!((hi.width, hi.height), (819, 455));
    assert_eq!((hi.pixel_aspect_x, hi.pixel_aspect_y), (1.0, 1.125));

    let standard = QuiltLayout::preset(QuiltPreset::Standard).render_resolution();
    assert_eq!((standard.width, standard.height), (512, 256));
    assert_eq!(standard.pixel_aspect_y, 1.25);

    let other = QuiltLayout::tight(3, 3, 100, 100).unwrap().render_resolution();
    assert_eq!(other.pixel_aspect_y, 1.0);
}
