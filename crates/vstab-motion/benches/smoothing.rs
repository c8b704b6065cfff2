//! Smoothing and optimization benchmarks.
//!
//! # Running Benchmarks
//! ```bash
//! cargo bench --package vstab-motion --bench smoothing
//! ```
//!
//! # Metrics Measured
//! - Per-sample cost of each smoothing strategy
//! - Whole-clip optimization latency
//! - Homography fitting with outliers

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nalgebra::Point2;
use std::time::Duration;
use vstab_models::{ProcessingMode, SmootherKind, Transform2D};
use vstab_motion::smoother::create_smoother;
use vstab_motion::vision::{HomographySolver, RansacHomography};
use vstab_motion::TrajectoryOptimizer;

/// Drifting path with deterministic high-frequency shake.
fn shaky_path(frames: usize) -> Vec<Transform2D> {
    (0..frames)
        .map(|i| {
            let t = i as f64;
            let shake = ((i * 7919) % 13) as f64 - 6.0;
            Transform2D::from_translation(t * 0.8 + shake, (t * 0.05).sin() * 20.0 - shake * 0.5)
        })
        .collect()
}

fn bench_smoothers(c: &mut Criterion) {
    let mut group = c.benchmark_group("smoother");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    let path = shaky_path(600);
    group.throughput(Throughput::Elements(path.len() as u64));

    for kind in SmootherKind::ALL {
        group.bench_with_input(BenchmarkId::new("add_transform", kind), &path, |b, path| {
            b.iter(|| {
                let mut smoother = create_smoother(*kind, 30, 0.7, ProcessingMode::Offline);
                for (i, t) in path.iter().enumerate() {
                    black_box(smoother.add_transform(*t, i as i64));
                }
            })
        });
    }

    group.finish();
}

fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer");
    group.measurement_time(Duration::from_secs(3));

    for frames in [300, 1800] {
        let path = shaky_path(frames);
        group.throughput(Throughput::Elements(frames as u64));
        group.bench_with_input(BenchmarkId::new("optimize_trajectory", frames), &path, |b, path| {
            b.iter(|| {
                let mut optimizer = TrajectoryOptimizer::new();
                optimizer.initialize(SmootherKind::Adaptive, 30, 0.7, 0.8);
                for t in path {
                    optimizer.add_transform(*t);
                }
                black_box(optimizer.optimize_trajectory().map(|r| r.len()).unwrap_or(0))
            })
        });
    }

    group.finish();
}

fn bench_homography(c: &mut Criterion) {
    let src: Vec<Point2<f64>> = (0..200)
        .map(|i| Point2::new((i % 20) as f64 * 31.0, (i / 20) as f64 * 27.0 + (i % 3) as f64))
        .collect();
    let dst: Vec<Point2<f64>> = src
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if i % 5 == 0 {
                Point2::new(p.y, p.x)
            } else {
                Point2::new(p.x + 4.0, p.y - 2.5)
            }
        })
        .collect();
    let solver = RansacHomography::new();

    c.bench_function("ransac_homography_200", |b| {
        b.iter(|| black_box(solver.find_homography(black_box(&src), black_box(&dst), 3.0)))
    });
}

criterion_group!(benches, bench_smoothers, bench_optimizer, bench_homography);
criterion_main!(benches);
