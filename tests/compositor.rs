use std::path::PathBuf;

use holoquilt::sequence::sequence_path;
use holoquilt::{HoloquiltError, ImageSequence, PixelBuffer, QuiltLayout, QuiltTexture};

fn view_color(i: u32) -> [u8; 4] {
    [(i * 40) as u8, 255 - (i * 30) as u8, (i * 7) as u8, 255]
}

fn views(layout: &QuiltLayout) -> Vec<PixelBuffer> {
    (0..layout.total_views())
        .map(|i| PixelBuffer::filled(layout.view_width, layout.view_height, view_color(i)).unwrap())
        .collect()
}

fn out_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("compositor_tests").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn compositing_twice_is_idempotent() {
    let layout = QuiltLayout::new(3, 2, 5, 4, 16, 9).unwrap();
    let v = views(&layout);

    let mut a = QuiltTexture::new(layout).unwrap();
    a.composite(&v).unwrap();
    let once = a.clone();
    a.composite(&v).unwrap();
    assert_eq!(a, once);

    // Padding outside the tiles keeps the clear color.
    assert_eq!(a.pixels().pixel(15, 8), [0, 0, 0, 255]);
    for i in 0..layout.total_views() {
        let (x, y) = layout.tile_origin(i).unwrap();
        assert_eq!(a.pixels().pixel(x, y), view_color(i));
        assert_eq!(a.pixels().pixel(x + 4, y + 3), view_color(i));
    }
}

#[test]
fn wrong_view_count_or_size_is_rejected() {
    let layout = QuiltLayout::tight(2, 2, 4, 4).unwrap();
    let mut q = QuiltTexture::new(layout).unwrap();
    let mut v = views(&layout);
    v.pop();
    assert!(matches!(q.composite(&v), Err(HoloquiltError::Config(_))));

    let big = PixelBuffer::new(8, 4).unwrap();
    assert!(matches!(q.blit_view(0, &big), Err(HoloquiltError::Config(_))));
    assert!(matches!(
        q.blit_view(4, &PixelBuffer::new(4, 4).unwrap()),
        Err(HoloquiltError::Config(_))
    ));
}

#[test]
fn sequence_playback_matches_rendered_views() {
    let layout = QuiltLayout::tight(3, 2, 6, 4).unwrap();
    let dir = out_dir("sequence");
    let base = dir.join("shot.png");
    let v = views(&layout);

    let mut seq = ImageSequence::new(&base, layout.total_views()).unwrap();
    seq.save_views(&v).unwrap();
    assert!(seq.missing().is_empty());
    assert!(sequence_path(&base, 5).is_file());

    let mut from_disk = QuiltTexture::new(layout).unwrap();
    ImageSequence::from_first_frame(&dir.join("shot.00.png"), layout.total_views())
        .unwrap()
        .composite_into(&mut from_disk)
        .unwrap();

    let mut rendered = QuiltTexture::new(layout).unwrap();
    rendered.composite(&v).unwrap();
    assert_eq!(from_disk, rendered);
}

#[test]
fn sequence_view_size_mismatch_is_rejected() {
    let dir = out_dir("mismatch");
    let base = dir.join("shot.png");
    let mut seq = ImageSequence::new(&base, 4).unwrap();
    let small: Vec<PixelBuffer> = (0..4).map(|_| PixelBuffer::new(3, 3).unwrap()).collect();
    seq.save_views(&small).unwrap();

    let mut q = QuiltTexture::new(QuiltLayout::tight(2, 2, 4, 4).unwrap()).unwrap();
    assert!(matches!(
        seq.composite_into(&mut q),
        Err(HoloquiltError::Config(_))
    ));
}

#[test]
fn png_export_is_top_down() {
    let layout = QuiltLayout::tight(2, 2, 2, 2).unwrap();
    let mut q = QuiltTexture::new(layout).unwrap();
    q.composite(&views(&layout)).unwrap();

    let img = image::load_from_memory(&q.encode_png().unwrap())
        .unwrap()
        .to_rgba8();
    // View 0 sits in the bottom-left corner of the image, view 3 in the top-right.
    assert_eq!(img.get_pixel(0, 3).0, view_color(0));
    assert_eq!(img.get_pixel(3, 0).0, view_color(3));

    let back = PixelBuffer::from_image(img);
    assert_eq!(&back, q.pixels());
}
