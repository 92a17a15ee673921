//! Integration tests for trail rings, readback and spawn-point selection.

use glam::{Vec3, Vec4};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use trailsim::gpu::{Capabilities, CpuBackend};
use trailsim::ring::{logical_index, physical_index};
use trailsim::{
    Behavior, CapabilityError, Frame, GpuError, ParticleSeeds, ParticleSimulation, Preset,
    ResourceError, SimConfig, Spawner, StepOutcome, TrailConfig, TrailError, TrailSource,
    TrailSystem, Tracking,
};

fn points_trails(backend: &mut CpuBackend, trail_count: u32, capacity: u32, d: f32) -> TrailSystem<CpuBackend> {
    let config = TrailConfig {
        trail_count,
        nodes_per_trail: capacity,
        update_distance_min: d,
    };
    TrailSystem::new(backend, config, Tracking::Points).unwrap()
}

// ============================================================================
// Ring semantics
// ============================================================================

#[test]
fn test_straight_line_spacing() {
    let d = 0.1;
    let step = 0.01;
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 1, 5, d);

    // Travel 10 d along +X in small increments
    for i in 0..=100 {
        let point = [Vec3::new(i as f32 * step, 0.0, 0.0)];
        trails.update(&mut backend, TrailSource::Points(&point), i as f32 * 0.016).unwrap();
    }

    let snapshot = trails.snapshot(&mut backend).unwrap();
    let cursor = snapshot.cursor(0).unwrap();
    assert_eq!(cursor.valid(), 5);

    let nodes = snapshot.ordered_nodes(0);
    assert_eq!(nodes.len(), 5);
    for pair in nodes.windows(2) {
        let spacing = pair[1].x - pair[0].x;
        assert!(spacing >= d - 1e-4 && spacing <= d + step + 1e-4, "spacing {}", spacing);
        // Timestamps follow recording order
        assert!(pair[1].w > pair[0].w);
    }
}

#[test]
fn test_wraparound_keeps_latest_writes() {
    let capacity = 4;
    let k = 3;
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 2, capacity, 0.0);

    for i in 0..(capacity + k) {
        let points = [Vec3::new(i as f32, 0.0, 0.0), Vec3::new(0.0, i as f32, 0.0)];
        trails.update(&mut backend, TrailSource::Points(&points), i as f32).unwrap();
        let snapshot = trails.snapshot(&mut backend).unwrap();
        assert!(snapshot.cursor(0).unwrap().valid() <= capacity);
    }

    let snapshot = trails.snapshot(&mut backend).unwrap();
    let nodes = snapshot.ordered_nodes(0);
    assert_eq!(nodes.len(), capacity as usize);
    // Logical 0 is the (k + 1)-th write
    assert_eq!(nodes[0].x, k as f32);
    assert_eq!(nodes[capacity as usize - 1].x, (capacity + k - 1) as f32);
    assert_eq!(snapshot.ordered_nodes(1)[0].y, k as f32);
}

#[test]
fn test_snapshot_index_mapping_round_trips() {
    let capacity = 6;
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 1, capacity, 0.0);

    for i in 0..(2 * capacity + 1) {
        trails
            .update(&mut backend, TrailSource::Points(&[Vec3::splat(i as f32)]), 0.0)
            .unwrap();
        let cursor = trails.snapshot(&mut backend).unwrap().cursor(0).unwrap();
        for p in 0..capacity {
            if let Some(l) = logical_index(cursor.head(), cursor.valid(), p, capacity) {
                assert_eq!(physical_index(cursor.head(), cursor.valid(), l, capacity), Some(p));
            }
        }
    }
}

#[test]
fn test_small_moves_are_not_recorded() {
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 1, 8, 0.5);
    for i in 0..10 {
        let point = [Vec3::new(i as f32 * 0.01, 0.0, 0.0)];
        trails.update(&mut backend, TrailSource::Points(&point), 0.0).unwrap();
    }
    let snapshot = trails.snapshot(&mut backend).unwrap();
    assert_eq!(snapshot.cursor(0).unwrap().valid(), 1);
    assert!(!snapshot.wrote_last_update(0));
    assert_eq!(snapshot.tangent(0, 0), Vec3::Y);
}

#[test]
fn test_clear_empties_rings() {
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 2, 3, 0.0);
    for i in 0..5 {
        let points = [Vec3::splat(i as f32); 2];
        trails.update(&mut backend, TrailSource::Points(&points), 0.0).unwrap();
    }
    trails.clear(&mut backend).unwrap();
    let snapshot = trails.snapshot(&mut backend).unwrap();
    for trail in 0..2 {
        assert_eq!(snapshot.cursor(trail).unwrap().valid(), 0);
        assert!(snapshot.ordered_nodes(trail).is_empty());
    }
}

// ============================================================================
// Particle tracking
// ============================================================================

#[test]
fn test_trails_follow_particles() {
    let mut backend = CpuBackend::new();
    let seeds = ParticleSeeds::from_vecs(
        (0..4).map(|i| Vec4::new(0.0, i as f32, 0.0, 0.0)).collect(),
        vec![Vec4::ZERO; 4],
    );
    let behavior = Behavior::from(Preset::Drift {
        velocity: Vec3::X,
        bounds: 0.0,
    });
    let mut sim = ParticleSimulation::initialize(&mut backend, seeds, behavior).unwrap();
    let config = TrailConfig {
        trail_count: 2,
        nodes_per_trail: 16,
        update_distance_min: 0.05,
    };
    let mut trails = TrailSystem::new(&mut backend, config, Tracking::Particles(vec![3, 1])).unwrap();

    for i in 1..=10 {
        let t = i as f32 * 0.1;
        sim.step(&mut backend, &Frame::new(t, 0.1)).unwrap();
        let positions = sim.position_texture().unwrap();
        assert_eq!(
            trails.update(&mut backend, TrailSource::Texture(positions), t).unwrap(),
            StepOutcome::Stepped
        );
    }

    let positions = sim.read_positions(&mut backend).unwrap();
    let snapshot = trails.snapshot(&mut backend).unwrap();
    let newest = *snapshot.ordered_nodes(0).last().unwrap();
    assert_eq!(newest.truncate(), positions[3].truncate());
    assert!((newest.w - 1.0).abs() < 1e-6);
    assert_eq!(snapshot.ordered_nodes(1).last().unwrap().y, 1.0);
    assert_eq!(snapshot.cursor(0).unwrap().valid(), 10);

    // Moving along +X: tangents point the same way
    let tangent = snapshot.tangent(0, 4);
    assert!((tangent - Vec3::X).length() < 1e-4);
}

#[test]
fn test_particle_ids_checked_against_source() {
    let mut backend = CpuBackend::new();
    let seeds = ParticleSeeds::from_vecs(vec![Vec4::ZERO; 4], vec![Vec4::ZERO; 4]);
    let sim = ParticleSimulation::initialize(&mut backend, seeds, Behavior::still()).unwrap();
    let config = TrailConfig {
        trail_count: 1,
        nodes_per_trail: 4,
        update_distance_min: 0.0,
    };
    let mut trails = TrailSystem::new(&mut backend, config, Tracking::Particles(vec![99])).unwrap();
    assert!(matches!(
        trails.update(&mut backend, TrailSource::Texture(sim.position_texture().unwrap()), 0.0),
        Err(TrailError::SourceMismatch(_))
    ));
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_trail_capability_failure_leaks_nothing() {
    let mut backend = CpuBackend::with_capabilities(Capabilities {
        float_render_targets: false,
        ..Capabilities::default()
    });
    let config = TrailConfig {
        trail_count: 2,
        nodes_per_trail: 8,
        update_distance_min: 0.1,
    };
    assert!(matches!(
        TrailSystem::new(&mut backend, config, Tracking::Points),
        Err(TrailError::Gpu(GpuError::Capability(CapabilityError::FloatRenderTargets)))
    ));
    assert_eq!(backend.live_textures(), 0);
}

#[test]
fn test_trail_partial_allocation_failure_leaks_nothing() {
    let config = TrailConfig {
        trail_count: 3,
        nodes_per_trail: 8,
        update_distance_min: 0.1,
    };
    for allowed in 0..8 {
        let mut backend = CpuBackend::new();
        backend.fail_allocations_after(allowed);
        match TrailSystem::new(&mut backend, config, Tracking::Points) {
            Ok(mut trails) => {
                trails.dispose(&mut backend);
                assert_eq!(backend.live_textures(), 0);
            }
            Err(_) => assert_eq!(backend.live_textures(), 0, "leak with {} allocations allowed", allowed),
        }
    }
}

#[test]
fn test_trail_resource_error_skips_update() {
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 1, 4, 0.0);
    trails.update(&mut backend, TrailSource::Points(&[Vec3::ZERO]), 0.0).unwrap();
    let before = trails.snapshot(&mut backend).unwrap();

    backend.fail_next_pass(ResourceError::TextureNotUploaded("source".into()));
    let outcome = trails
        .update(&mut backend, TrailSource::Points(&[Vec3::ONE]), 1.0)
        .unwrap();
    assert!(matches!(outcome, StepOutcome::Skipped(_)));
    assert_eq!(trails.snapshot(&mut backend).unwrap(), before);
    assert_eq!(trails.updates(), 1);
}

#[test]
fn test_trail_context_loss_and_recover() {
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 2, 4, 0.0);
    let points = [Vec3::ONE, Vec3::ZERO];
    trails.update(&mut backend, TrailSource::Points(&points), 0.0).unwrap();

    backend.lose_context();
    assert!(matches!(
        trails.update(&mut backend, TrailSource::Points(&points), 0.1),
        Err(TrailError::Gpu(GpuError::ContextLost))
    ));
    assert!(trails.recover(&mut backend).is_err());

    backend.restore_context();
    trails.recover(&mut backend).unwrap();
    let snapshot = trails.snapshot(&mut backend).unwrap();
    assert_eq!(snapshot.cursor(0).unwrap().valid(), 0);

    trails.update(&mut backend, TrailSource::Points(&points), 0.2).unwrap();
    assert_eq!(trails.snapshot(&mut backend).unwrap().ordered_nodes(0), vec![Vec4::new(1.0, 1.0, 1.0, 0.2)]);
}

#[test]
fn test_disposed_trails_are_released() {
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 1, 4, 0.0);
    trails.dispose(&mut backend);
    trails.dispose(&mut backend);
    assert_eq!(backend.live_textures(), 0);
    assert!(trails.node_texture().is_none());
    assert!(matches!(
        trails.update(&mut backend, TrailSource::Points(&[Vec3::ZERO]), 0.0),
        Err(TrailError::Released)
    ));
}

// ============================================================================
// Spawner
// ============================================================================

#[test]
fn test_spawner_picks_recorded_nodes() {
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 2, 8, 0.0);
    for i in 0..3 {
        let points = [Vec3::new(i as f32, 0.0, 0.0), Vec3::new(0.0, 0.0, 10.0 + i as f32)];
        trails.update(&mut backend, TrailSource::Points(&points), i as f32).unwrap();
    }

    let mut spawner = Spawner::from_config(&SimConfig::default());
    let mut rng = SmallRng::seed_from_u64(42);
    assert!(spawner.spawn_points(4, &mut rng).is_none());

    let first = spawner.request().unwrap();
    assert_eq!(spawner.request().unwrap(), first);
    assert!(spawner.service(&mut backend, &trails));
    assert!(!spawner.is_pending());

    let recorded: Vec<Vec4> = [0, 1].iter().flat_map(|&t| spawner.snapshot().unwrap().ordered_nodes(t)).collect();
    let points = spawner.spawn_points(20, &mut rng).unwrap();
    assert_eq!(points.len(), 20);
    assert!(points.iter().all(|p| recorded.contains(p)));

    assert_eq!(spawner.node_position(1, 2), Some(Vec4::new(0.0, 0.0, 12.0, 2.0)));
    assert_eq!(spawner.node_position(2, 0), None);
    assert_eq!(spawner.node_position(0, 8), None);
    assert_eq!(spawner.node_position(u32::MAX, u32::MAX), None);
}

#[test]
fn test_spawner_failure_is_not_retried() {
    let mut backend = CpuBackend::new();
    let mut trails = points_trails(&mut backend, 1, 4, 0.0);
    trails.update(&mut backend, TrailSource::Points(&[Vec3::ONE]), 0.0).unwrap();

    let mut spawner = Spawner::new(4, 1);
    spawner.request().unwrap();
    assert!(spawner.service(&mut backend, &trails));
    let good = spawner.snapshot().cloned();

    backend.set_readback_failure(true);
    spawner.request().unwrap();
    assert!(!spawner.service(&mut backend, &trails));
    assert!(!spawner.is_pending());
    // Later frames do not retry on their own
    let reads = backend.readbacks();
    assert!(!spawner.service(&mut backend, &trails));
    assert_eq!(backend.readbacks(), reads);
    assert_eq!(spawner.snapshot().cloned(), good);
}

#[test]
fn test_spawner_respects_budget() {
    let mut backend = CpuBackend::new();
    let trails = points_trails(&mut backend, 1, 4, 0.0);
    let mut spawner = Spawner::new(4, 0);
    spawner.request().unwrap();
    assert!(!spawner.service(&mut backend, &trails));
    assert!(spawner.is_pending());
}
