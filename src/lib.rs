//! # trailsim - GPU particle and trail simulation core
//!
//! Particle state lives entirely in float textures on the GPU and is stepped
//! forward by render-to-texture passes. Trails record where tracked particles
//! (or host points) have been in fixed-capacity rings, also on the GPU. Render
//! code reads the textures directly; only spawn-point picking copies data
//! back to the host, on request and rate-limited.
//!
//! ## Quick Start
//!
//! ```ignore
//! use trailsim::prelude::*;
//!
//! let mut backend = GpuBackend::new()?;
//! let config = SimConfig::default();
//!
//! let seeds = ParticleSeeds::generate(config.count, &InSphere { radius: 1.0, seed: 7 }, &Zero);
//! let behavior = Behavior::from(Preset::Flow {
//!     noise_scale: config.noise_scale,
//!     noise_strength: config.noise_strength,
//!     noise_speed: 0.1,
//!     damping: config.damping,
//!     max_speed: config.speed,
//! });
//! let mut sim = ParticleSimulation::initialize(&mut backend, seeds, behavior)?;
//!
//! let ids: Vec<u32> = (0..config.trail_count).collect();
//! let mut trails = TrailSystem::new(&mut backend, TrailConfig::from(&config), Tracking::Particles(ids))?;
//!
//! let mut clock = SimClock::new();
//! loop {
//!     let (time, delta) = clock.update();
//!     sim.step(&mut backend, &Frame::from_config(&config, time, delta))?;
//!     if let Some(positions) = sim.position_texture() {
//!         trails.update(&mut backend, TrailSource::Texture(positions), time)?;
//!     }
//!     // bind sim.position_texture() and trails.node_texture() in render passes
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### State textures
//!
//! Particle `i` lives at texel `(i % width, i / width)` of a near-square grid
//! (see [`ping_pong::grid_dimensions`]). Position texels are `(x, y, z, age)`;
//! velocity texels are `(vx, vy, vz, aux)`. Each is a [`DoubleBuffer`]: a step
//! reads the current target and renders into the other, then swaps.
//!
//! ### Behaviors
//!
//! A [`Behavior`] is a velocity shader body, a position shader body and the
//! uniforms they declare. Built-ins come from [`Preset`]; custom WGSL goes
//! through [`Behavior::custom`]. Bodies never touch driver internals.
//!
//! ### Backends
//!
//! [`GpuBackend`] runs passes on wgpu. [`CpuBackend`] evaluates the built-in
//! programs on the host with the same arithmetic, which is what the test suite
//! runs against.
//!
//! ## Feature Overview
//!
//! | Area | Types |
//! |------|-------|
//! | Simulation | [`ParticleSimulation`], [`Frame`], [`SimClock`] |
//! | Behaviors | [`Behavior`], [`Preset`], [`UniformSet`], [`DataTexture`] |
//! | Seeds | [`ParticleSeeds`], [`Generator`], [`InSphere`], [`OnSphere`], [`Grid`] |
//! | Trails | [`TrailSystem`], [`TrailSnapshot`], [`RingCursor`] |
//! | Readback | [`readback()`], [`ReadbackQueue`], [`Spawner`] |
//! | Lifecycle | [`SpawnLifecycle`], [`EntityPool`] |

pub mod behavior;
pub mod compose;
pub mod config;
pub mod error;
pub mod generators;
pub mod gpu;
pub mod lifecycle;
pub mod ping_pong;
pub mod readback;
pub mod ring;
pub mod shader_utils;
pub mod simulation;
pub mod time;
pub mod trail;
pub mod uniforms;

pub use behavior::{Behavior, BehaviorKind, Preset};
pub use config::SimConfig;
pub use error::{
    BehaviorError, CapabilityError, ConfigError, GpuError, ReadbackError, ResourceError,
    SimulationError, TrailError,
};
pub use generators::{Constant, Generator, Grid, InSphere, OnSphere, ParticleSeeds, Zero};
pub use glam::{Vec2, Vec3, Vec4};
pub use gpu::{Backend, Capabilities, CpuBackend, GpuBackend, TextureDescriptor};
pub use lifecycle::{EntityPool, LifecycleState, SpawnLifecycle};
pub use ping_pong::DoubleBuffer;
pub use readback::{readback, ReadbackQueue, ReadbackStatus, Spawner, TextureSnapshot, Ticket};
pub use ring::{RingCursor, TrailSnapshot};
pub use simulation::{Frame, ParticleSimulation, SimState, StepOutcome};
pub use time::SimClock;
pub use trail::{TrailConfig, TrailSource, TrailSystem, Tracking};
pub use uniforms::{DataTexture, UniformSet, UniformValue};

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use trailsim::prelude::*;
/// ```
pub mod prelude {
    pub use crate::behavior::{Behavior, BehaviorKind, Preset};
    pub use crate::config::SimConfig;
    pub use crate::generators::{Constant, Generator, Grid, InSphere, OnSphere, ParticleSeeds, Zero};
    pub use crate::gpu::{Backend, CpuBackend, GpuBackend};
    pub use crate::lifecycle::{EntityPool, SpawnLifecycle};
    pub use crate::readback::{ReadbackQueue, Spawner};
    pub use crate::simulation::{Frame, ParticleSimulation, StepOutcome};
    pub use crate::time::SimClock;
    pub use crate::trail::{TrailConfig, TrailSource, TrailSystem, Tracking};
    pub use crate::uniforms::{DataTexture, UniformSet};
    pub use crate::{Vec2, Vec3, Vec4};
}
