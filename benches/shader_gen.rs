//! Benchmarks for shader composition and host-side ring bookkeeping.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{Vec3, Vec4};

use trailsim::behavior::all_presets;
use trailsim::compose::{position_pass, velocity_pass};
use trailsim::generators::{InSphere, ParticleSeeds, Zero};
use trailsim::ring::{physical_index, RingCursor, TrailSnapshot};
use trailsim::trail::{node_pass_wgsl, state_pass_wgsl};
use trailsim::{Behavior, Preset};

fn bench_behavior_passes(c: &mut Criterion) {
    let mut group = c.benchmark_group("behavior_passes");

    for preset in all_presets(1024) {
        let behavior = Behavior::from(preset);
        let name = behavior.name().to_string();
        group.bench_function(format!("{}_velocity", name), |b| {
            b.iter(|| black_box(velocity_pass(&behavior)))
        });
        group.bench_function(format!("{}_position", name), |b| {
            b.iter(|| black_box(position_pass(&behavior)))
        });
    }

    group.bench_function("custom", |b| {
        let behavior = Behavior::custom(
            "swirl",
            "    updated = vec4<f32>(cross(vec3<f32>(0.0, 1.0, 0.0), pos.xyz), vel.w);",
            "",
            trailsim::UniformSet::new(),
        );
        b.iter(|| black_box(behavior.as_ref().map(velocity_pass).ok()))
    });

    group.finish();
}

fn bench_trail_passes(c: &mut Criterion) {
    let mut group = c.benchmark_group("trail_passes");
    group.bench_function("state", |b| b.iter(|| black_box(state_pass_wgsl())));
    group.bench_function("node", |b| b.iter(|| black_box(node_pass_wgsl())));
    group.finish();
}

fn bench_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");

    for capacity in [16u32, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("physical_index", capacity), &capacity, |b, &cap| {
            b.iter(|| {
                let mut sum = 0u32;
                for logical in 0..cap {
                    sum = sum.wrapping_add(physical_index(cap / 2, cap, black_box(logical), cap).unwrap_or(0));
                }
                sum
            })
        });

        group.bench_with_input(BenchmarkId::new("cursor_push", capacity), &capacity, |b, &cap| {
            b.iter(|| {
                let mut cursor = RingCursor::new(cap);
                for _ in 0..cap * 2 {
                    black_box(cursor.push());
                }
                cursor
            })
        });
    }

    let capacity = 64;
    let trails = 256;
    let nodes: Vec<Vec4> = (0..capacity * trails).map(|i| Vec4::new(i as f32, 0.0, 0.0, i as f32)).collect();
    let state = vec![Vec4::new(10.0, capacity as f32, 1.0, 0.0); trails as usize];
    let snapshot = TrailSnapshot::new(capacity, trails, nodes, state);
    group.bench_function("ordered_nodes_all", |b| {
        b.iter(|| (0..trails).map(|t| snapshot.ordered_nodes(t).len()).sum::<usize>())
    });

    group.finish();
}

fn bench_seed_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("seeds");

    for count in [1_000u32, 100_000] {
        group.bench_with_input(BenchmarkId::new("in_sphere", count), &count, |b, &count| {
            b.iter(|| ParticleSeeds::generate(count, &InSphere { radius: 1.0, seed: 7 }, &Zero))
        });
    }

    group.bench_function("drift_behavior", |b| {
        b.iter(|| {
            Behavior::from(Preset::Drift {
                velocity: black_box(Vec3::X),
                bounds: 1.0,
            })
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_behavior_passes,
    bench_trail_passes,
    bench_ring,
    bench_seed_generation,
);

criterion_main!(benches);
