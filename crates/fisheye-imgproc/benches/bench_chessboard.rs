use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use fisheye_image::{Image, ImageSize};
use fisheye_imgproc::chessboard::{find_chessboard_corners, DetectorParams, PatternSize};
use fisheye_imgproc::subpix::{corner_sub_pix, SubpixConfig};

/// Axis aligned board of `(rows + 1) x (cols + 1)` squares starting at `origin`.
fn board_image(size: ImageSize, pattern: PatternSize, origin: usize, square: usize) -> Image<u8, 1> {
    Image::from_fn(size, |x, y| {
        let inside = x >= origin
            && y >= origin
            && x < origin + (pattern.cols + 1) * square
            && y < origin + (pattern.rows + 1) * square;
        let dark = inside && ((x - origin) / square + (y - origin) / square) % 2 == 0;
        [if dark { 20 } else { 220 }]
    })
}

fn bench_chessboard(c: &mut Criterion) {
    let mut group = c.benchmark_group("Chessboard");
    let pattern = PatternSize::new(6, 9);

    for (width, height, square) in [(640, 480, 40), (1280, 960, 80)].iter() {
        let parameter_string = format!("{}x{}", width, height);
        let image = board_image([*width, *height].into(), pattern, 60, *square);
        let params = DetectorParams::default();

        group.bench_with_input(
            BenchmarkId::new("find_chessboard_corners", &parameter_string),
            &image,
            |b, image| b.iter(|| black_box(find_chessboard_corners(image, pattern, &params))),
        );

        let corners = find_chessboard_corners(&image, pattern, &params).unwrap();
        let gray = image.cast_and_scale::<f32>(1.0 / 255.0).unwrap();
        let config = SubpixConfig::default();

        group.bench_with_input(
            BenchmarkId::new("corner_sub_pix", &parameter_string),
            &(&gray, &corners),
            |b, i| b.iter(|| black_box(corner_sub_pix(i.0, i.1.points(), &config))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_chessboard);
criterion_main!(benches);
