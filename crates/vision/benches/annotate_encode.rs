use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use vision::{BoundingBox, Detection, Frame, StatusBanner, annotate_frame, encode_jpeg};

/// Gradient frame, closer to camera content than a flat color for the encoder.
fn gradient_frame(width: u32, height: u32) -> Frame {
    Frame::from_fn(width, height, |x, y| {
        image::Rgb([
            ((x * 255) / width) as u8,
            ((y * 255) / height) as u8,
            (((x + y) * 127) / (width + height)) as u8,
        ])
    })
}

fn detections(width: u32, height: u32) -> Vec<Detection> {
    (0..8)
        .map(|i| {
            let x = (i * width / 10) as f32;
            let y = (height / 3) as f32;
            Detection::new(
                "person",
                0.9,
                BoundingBox::new(x, y, x + width as f32 / 12.0, y + height as f32 / 3.0),
            )
        })
        .collect()
}

fn benchmark_annotate_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("annotate_encode");

    let sizes = [(640, 480, "VGA"), (1280, 720, "HD"), (1920, 1080, "Full HD")];

    for (width, height, label) in sizes {
        let frame = gradient_frame(width, height);
        let dets = detections(width, height);
        group.throughput(Throughput::Elements((width * height) as u64));

        group.bench_with_input(BenchmarkId::new("annotate", label), &frame, |b, frame| {
            b.iter(|| {
                annotate_frame(
                    black_box(frame),
                    black_box(&dets),
                    Some(StatusBanner::Active { objects: dets.len() }),
                )
            });
        });

        group.bench_with_input(BenchmarkId::new("jpeg", label), &frame, |b, frame| {
            b.iter(|| encode_jpeg(black_box(frame), 85));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_annotate_encode);
criterion_main!(benches);
