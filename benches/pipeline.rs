//! Criterion benchmarks for town generation.
//!
//! Benchmarks:
//!   - full generation at 16x16 and 32x32 with a fixed seed
//!   - minimum bounding box of a 64-gon
//!
//! Run with: cargo bench --bench pipeline

use bevy::math::Vec2;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use towngen::procgen::bounding_box::minimum_bounding_box;
use towngen::procgen::noise_field::SeedConfig;
use towngen::procgen::road_mask::RoadMaskConfig;
use towngen::{TownConfig, TownLayout};

fn config(size: usize) -> TownConfig {
    TownConfig {
        mask: RoadMaskConfig {
            width: size,
            length: size,
            ..Default::default()
        },
        seed: SeedConfig::specific(3, 7),
        ..Default::default()
    }
}

fn bench_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("town_generation");
    group.sample_size(20);

    for size in [16, 32] {
        let config = config(size);
        group.bench_function(format!("grid_{size}x{size}"), |b| {
            b.iter(|| black_box(TownLayout::generate(black_box(&config))))
        });
    }

    group.finish();
}

fn bench_bounding_box(c: &mut Criterion) {
    let polygon: Vec<Vec2> = (0..64)
        .map(|i| {
            let a = i as f32 / 64.0 * std::f32::consts::TAU;
            Vec2::new(a.cos() * 40.0, a.sin() * 15.0)
        })
        .collect();

    c.bench_function("minimum_bounding_box_64", |b| {
        b.iter(|| black_box(minimum_bounding_box(black_box(&polygon))))
    });
}

criterion_group!(benches, bench_generation, bench_bounding_box);
criterion_main!(benches);
