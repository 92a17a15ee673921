//! The particle simulation driver.
//!
//! A [`ParticleSimulation`] keeps particle state in two ping-pong pairs
//! (position and velocity, one texel per particle) and advances it with two
//! render passes per step:
//!
//! 1. **Velocity pass**: reads the current position and velocity, writes the
//!    stale velocity target.
//! 2. **Position pass**: reads the current position and the velocity written
//!    by pass 1, writes the stale position target.
//!
//! Both pairs then swap, so the fresh outputs become current. A failed pass
//! leaves both pairs unswapped: the previous output stays current, one frame
//! stale, and nothing partial is ever observable.
//!
//! # Lifecycle
//!
//! ```text
//! initialize ──► Ready ──step──► Stepping ──► Ready ──dispose──► Disposed
//!                  │                            │
//!                  └──────── context loss ──────┴──► Lost ──recover──► Ready
//! ```
//!
//! # Example
//!
//! ```ignore
//! let seeds = ParticleSeeds::generate(4096, &InSphere { radius: 1.0, seed: 1 }, &Zero);
//! let behavior = Behavior::attract(Vec3::ZERO, 2.0, 0.5).with_lifetime(4.0)?;
//! let mut sim = ParticleSimulation::initialize(&mut backend, seeds, behavior)?;
//!
//! let (time, delta) = clock.update();
//! sim.step(&mut backend, &Frame::new(time, delta))?;
//! let positions = sim.position_texture();
//! ```

use glam::Vec4;
use tracing::{debug, info, warn};

use crate::behavior::Behavior;
use crate::compose;
use crate::config::SimConfig;
use crate::error::{BehaviorError, GpuError, ResourceError, SimulationError};
use crate::generators::ParticleSeeds;
use crate::gpu::{Backend, Binding, FrameUniforms, Pass, Program, TextureDescriptor};
use crate::ping_pong::{grid_dimensions, DoubleBuffer};
use crate::uniforms::{UniformSet, UniformValue};

/// Per-step input, built by the host each frame.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    /// Simulation time in seconds, including this step.
    pub time: f32,
    /// Step size in seconds.
    pub delta: f32,
    /// Uniform overrides by name. Names the behavior does not declare are
    /// ignored.
    pub params: UniformSet,
}

impl Frame {
    /// Frame without overrides.
    pub fn new(time: f32, delta: f32) -> Self {
        Self {
            time,
            delta,
            params: UniformSet::new(),
        }
    }

    /// Override a behavior uniform for this frame.
    pub fn with_param<V: Into<UniformValue>>(mut self, name: &str, value: V) -> Result<Self, BehaviorError> {
        let value = value.into();
        if !self.params.set(name, value)? {
            self.params.declare(name, value)?;
        }
        Ok(self)
    }

    /// Frame carrying the tunable values of a [`SimConfig`] under the
    /// standard uniform names (`lifetime`, `max_speed`, `noise_scale`,
    /// `noise_strength`, `damping`).
    pub fn from_config(config: &SimConfig, time: f32, delta: f32) -> Self {
        let mut params = UniformSet::new();
        params.declare_builtin("lifetime", config.lifetime);
        params.declare_builtin("max_speed", config.speed);
        params.declare_builtin("noise_scale", config.noise_scale);
        params.declare_builtin("noise_strength", config.noise_strength);
        params.declare_builtin("damping", config.damping);
        Self { time, delta, params }
    }
}

/// Result of a [`ParticleSimulation::step`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Both passes ran and the buffers swapped.
    Stepped,
    /// A resource was not usable; the previous output is still current.
    Skipped(ResourceError),
}

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    /// Targets allocated and uploaded; ready to step.
    Ready,
    /// A step is executing.
    Stepping,
    /// The device was lost; [`ParticleSimulation::recover`] is required.
    Lost,
    /// Every target was released.
    Disposed,
}

impl SimState {
    fn name(self) -> &'static str {
        match self {
            SimState::Ready => "ready",
            SimState::Stepping => "stepping",
            SimState::Lost => "lost",
            SimState::Disposed => "disposed",
        }
    }
}

/// A single texture bound by name.
struct NamedTexture<T> {
    binding: String,
    descriptor: TextureDescriptor,
    texture: T,
}

/// Single (non ping-pong) textures: seeds and behavior data textures.
struct NamedTextures<T> {
    entries: Vec<NamedTexture<T>>,
}

impl<T> NamedTextures<T> {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Allocate every texture or none.
    fn allocate<B>(backend: &mut B, specs: Vec<(String, TextureDescriptor)>) -> Result<Self, GpuError>
    where
        B: Backend<Texture = T>,
    {
        let mut set = Self::new();
        for (binding, descriptor) in specs {
            match backend.create_texture(&descriptor) {
                Ok(texture) => set.entries.push(NamedTexture {
                    binding,
                    descriptor,
                    texture,
                }),
                Err(e) => {
                    set.release(backend);
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    fn get(&self, binding: &str) -> Option<&T> {
        self.entries.iter().find(|e| e.binding == binding).map(|e| &e.texture)
    }

    fn take(&mut self, binding: &str, descriptor: &TextureDescriptor) -> Option<NamedTexture<T>> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.binding == binding && e.descriptor.width == descriptor.width && e.descriptor.height == descriptor.height)?;
        Some(self.entries.swap_remove(idx))
    }

    fn release<B>(&mut self, backend: &mut B)
    where
        B: Backend<Texture = T>,
    {
        for entry in self.entries.drain(..) {
            backend.destroy_texture(entry.texture);
        }
    }
}

fn data_texture_specs(behavior: &Behavior) -> Vec<(String, TextureDescriptor)> {
    behavior
        .uniforms()
        .textures()
        .map(|(name, data)| {
            let binding = format!("tex_{}", name);
            let descriptor = TextureDescriptor::new(format!("Behavior {}", binding), data.width, data.height);
            (binding, descriptor)
        })
        .collect()
}

/// Every texture a simulation owns.
struct Targets<T> {
    position: DoubleBuffer<T>,
    velocity: DoubleBuffer<T>,
    seeds: NamedTextures<T>,
    data: NamedTextures<T>,
}

impl<T> Targets<T> {
    /// Allocate everything; on failure, release what was created.
    fn allocate<B>(backend: &mut B, width: u32, height: u32, behavior: &Behavior) -> Result<Self, GpuError>
    where
        B: Backend<Texture = T>,
    {
        let mut position = DoubleBuffer::allocate(backend, TextureDescriptor::new("Particle Position", width, height))?;
        let mut velocity =
            match DoubleBuffer::allocate(backend, TextureDescriptor::new("Particle Velocity", width, height)) {
                Ok(v) => v,
                Err(e) => {
                    position.release(backend);
                    return Err(e);
                }
            };
        let seed_specs = vec![
            (
                "seed_position_tex".to_string(),
                TextureDescriptor::new("Seed Position", width, height),
            ),
            (
                "seed_velocity_tex".to_string(),
                TextureDescriptor::new("Seed Velocity", width, height),
            ),
        ];
        let mut seeds = match NamedTextures::allocate(backend, seed_specs) {
            Ok(s) => s,
            Err(e) => {
                position.release(backend);
                velocity.release(backend);
                return Err(e);
            }
        };
        let data = match NamedTextures::allocate(backend, data_texture_specs(behavior)) {
            Ok(d) => d,
            Err(e) => {
                position.release(backend);
                velocity.release(backend);
                seeds.release(backend);
                return Err(e);
            }
        };
        Ok(Self {
            position,
            velocity,
            seeds,
            data,
        })
    }

    /// Write seeds into both halves of each pair, the seed textures and the
    /// behavior's data textures.
    fn upload<B>(&self, backend: &mut B, seeds: &ParticleSeeds, behavior: &Behavior) -> Result<(), GpuError>
    where
        B: Backend<Texture = T>,
    {
        let desc = self.position.descriptor();
        let positions = seeds.position_texels(desc.width, desc.height);
        let velocities = seeds.velocity_texels(desc.width, desc.height);
        self.position.fill(backend, &positions)?;
        self.velocity.fill(backend, &velocities)?;
        for (binding, texels) in [("seed_position_tex", &positions), ("seed_velocity_tex", &velocities)] {
            let texture = self
                .seeds
                .get(binding)
                .ok_or_else(|| ResourceError::TextureNotUploaded(binding.to_string()))?;
            backend.write_texture(texture, texels)?;
        }
        self.upload_data(backend, behavior)
    }

    fn upload_data<B>(&self, backend: &mut B, behavior: &Behavior) -> Result<(), GpuError>
    where
        B: Backend<Texture = T>,
    {
        for (name, data) in behavior.uniforms().textures() {
            let binding = format!("tex_{}", name);
            let texture = self
                .data
                .get(&binding)
                .ok_or(ResourceError::TextureNotUploaded(binding.clone()))?;
            backend.write_texture(texture, &data.texels)?;
        }
        Ok(())
    }

    fn release<B>(&mut self, backend: &mut B)
    where
        B: Backend<Texture = T>,
    {
        self.position.release(backend);
        self.velocity.release(backend);
        self.seeds.release(backend);
        self.data.release(backend);
    }
}

/// GPU-resident particle simulation over a [`Backend`].
pub struct ParticleSimulation<B: Backend> {
    count: u32,
    width: u32,
    height: u32,
    targets: Option<Targets<B::Texture>>,
    behavior: Behavior,
    velocity_source: String,
    position_source: String,
    seeds: ParticleSeeds,
    state: SimState,
    time: f32,
    frame_count: u64,
    skipped_steps: u64,
}

impl<B: Backend> ParticleSimulation<B> {
    /// Allocate and seed a simulation of `seeds.len()` particles.
    ///
    /// Fails fast with a capability error when the device cannot render to
    /// float targets of the needed size. Any failure releases every texture
    /// allocated so far.
    pub fn initialize(backend: &mut B, seeds: ParticleSeeds, behavior: Behavior) -> Result<Self, SimulationError> {
        if seeds.positions.len() != seeds.velocities.len() {
            return Err(SimulationError::SeedMismatch {
                count: seeds.positions.len() as u32,
                positions: seeds.positions.len(),
                velocities: seeds.velocities.len(),
            });
        }
        let count = u32::try_from(seeds.len()).map_err(|_| SimulationError::InvalidCount)?;
        if count == 0 {
            return Err(SimulationError::InvalidCount);
        }

        let (width, height) = grid_dimensions(count);
        Self::check_grid(&behavior, width, height)?;
        Self::check_capabilities(backend, width, height, &behavior)?;

        let mut targets = Targets::allocate(backend, width, height, &behavior)?;
        if let Err(e) = targets.upload(backend, &seeds, &behavior) {
            targets.release(backend);
            return Err(e.into());
        }

        info!(count, width, height, behavior = behavior.name(), "particle simulation initialized");
        Ok(Self {
            count,
            width,
            height,
            targets: Some(targets),
            velocity_source: compose::velocity_pass(&behavior),
            position_source: compose::position_pass(&behavior),
            behavior,
            seeds,
            state: SimState::Ready,
            time: 0.0,
            frame_count: 0,
            skipped_steps: 0,
        })
    }

    fn check_capabilities(backend: &B, width: u32, height: u32, behavior: &Behavior) -> Result<(), GpuError> {
        let caps = backend.capabilities();
        caps.require_float_targets()?;
        caps.check_size(width, height)?;
        for (_, data) in behavior.uniforms().textures() {
            caps.check_size(data.width, data.height)?;
        }
        Ok(())
    }

    fn check_grid(behavior: &Behavior, width: u32, height: u32) -> Result<(), BehaviorError> {
        for (name, data) in behavior.uniforms().textures() {
            data.check_grid(name, width, height)?;
        }
        Ok(())
    }

    fn require_ready(&self) -> Result<(), SimulationError> {
        match self.state {
            SimState::Ready => Ok(()),
            SimState::Lost => Err(SimulationError::ContextLost),
            other => Err(SimulationError::InvalidState {
                expected: SimState::Ready.name(),
                actual: other.name(),
            }),
        }
    }

    /// Map a backend error, entering `Lost` on context loss.
    fn fail(&mut self, e: GpuError) -> SimulationError {
        if matches!(e, GpuError::ContextLost) {
            warn!("GPU context lost; simulation needs recovery");
            self.state = SimState::Lost;
        }
        e.into()
    }

    /// Advance the simulation by `frame.delta`.
    ///
    /// Resource errors skip the step and return [`StepOutcome::Skipped`];
    /// context loss moves the driver to [`SimState::Lost`].
    pub fn step(&mut self, backend: &mut B, frame: &Frame) -> Result<StepOutcome, SimulationError> {
        self.require_ready()?;
        if backend.is_context_lost() {
            return Err(self.fail(GpuError::ContextLost));
        }

        let mut params = self.behavior.uniforms().clone();
        params.apply_overrides(&frame.params)?;

        self.state = SimState::Stepping;
        let result = self.run_passes(backend, frame, &params);
        self.state = SimState::Ready;

        match result {
            Ok(()) => {
                if let Some(targets) = self.targets.as_mut() {
                    targets.velocity.swap();
                    targets.position.swap();
                }
                self.time = frame.time;
                self.frame_count += 1;
                Ok(StepOutcome::Stepped)
            }
            Err(GpuError::Resource(e)) => {
                self.skipped_steps += 1;
                warn!(error = %e, frame = self.frame_count, "skipping simulation step");
                Ok(StepOutcome::Skipped(e))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn run_passes(&self, backend: &mut B, frame: &Frame, params: &UniformSet) -> Result<(), GpuError> {
        let targets = self
            .targets
            .as_ref()
            .ok_or(ResourceError::UnknownTexture)?;
        let uniforms = FrameUniforms::new(frame.time, frame.delta, self.count, self.width, self.height);
        let names = compose::input_names(&self.behavior);
        let kind = self.behavior.kind();

        let (position, next_position) = targets.position.roles()?;
        let (velocity, next_velocity) = targets.velocity.roles()?;

        let velocity_label = format!("{} velocity", self.behavior.name());
        let inputs = Self::bindings(targets, &names, position, velocity)?;
        backend.run_pass(&Pass {
            label: &velocity_label,
            program: Program::Velocity(kind),
            source: &self.velocity_source,
            frame: uniforms,
            params,
            inputs: &inputs,
            output: next_velocity,
        })?;

        // The position pass reads the velocity written above
        let position_label = format!("{} position", self.behavior.name());
        let inputs = Self::bindings(targets, &names, position, next_velocity)?;
        backend.run_pass(&Pass {
            label: &position_label,
            program: Program::Position(kind),
            source: &self.position_source,
            frame: uniforms,
            params,
            inputs: &inputs,
            output: next_position,
        })
    }

    fn bindings<'a>(
        targets: &'a Targets<B::Texture>,
        names: &'a [String],
        position: &'a B::Texture,
        velocity: &'a B::Texture,
    ) -> Result<Vec<Binding<'a, B::Texture>>, GpuError> {
        names
            .iter()
            .map(|name| -> Result<Binding<'a, B::Texture>, GpuError> {
                let texture = match name.as_str() {
                    "position_tex" => position,
                    "velocity_tex" => velocity,
                    other => targets
                        .seeds
                        .get(other)
                        .or_else(|| targets.data.get(other))
                        .ok_or_else(|| ResourceError::TextureNotUploaded(other.to_string()))?,
                };
                Ok(Binding::new(name.as_str(), texture))
            })
            .collect()
    }

    /// Replace the behavior, effective from the next step.
    ///
    /// Particle textures are kept. Declared data textures whose binding and
    /// size are unchanged are rewritten in place, others are reallocated.
    pub fn set_behavior(&mut self, backend: &mut B, next: Behavior) -> Result<(), SimulationError> {
        self.require_ready()?;
        Self::check_grid(&next, self.width, self.height)?;
        let caps = backend.capabilities();
        for (_, data) in next.uniforms().textures() {
            caps.check_size(data.width, data.height).map_err(GpuError::from)?;
        }
        let Some(targets) = self.targets.as_mut() else {
            return Err(SimulationError::InvalidState {
                expected: SimState::Ready.name(),
                actual: self.state.name(),
            });
        };

        let mut old = std::mem::replace(&mut targets.data, NamedTextures::new());
        let mut planned: Vec<(NamedTexture<B::Texture>, bool)> = Vec::new();
        let mut failure = None;
        for (binding, descriptor) in data_texture_specs(&next) {
            if let Some(entry) = old.take(&binding, &descriptor) {
                planned.push((entry, false));
                continue;
            }
            match backend.create_texture(&descriptor) {
                Ok(texture) => planned.push((
                    NamedTexture {
                        binding,
                        descriptor,
                        texture,
                    },
                    true,
                )),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            // Roll back: the current behavior keeps its textures
            for (entry, fresh) in planned {
                if fresh {
                    backend.destroy_texture(entry.texture);
                } else {
                    old.entries.push(entry);
                }
            }
            targets.data = old;
            return Err(self.fail(e));
        }

        old.release(backend);
        targets.data.entries = planned.into_iter().map(|(entry, _)| entry).collect();
        if let Err(e) = targets.upload_data(backend, &next) {
            return Err(self.fail(e));
        }

        debug!(from = self.behavior.name(), to = next.name(), "behavior swapped");
        self.velocity_source = compose::velocity_pass(&next);
        self.position_source = compose::position_pass(&next);
        self.behavior = next;
        Ok(())
    }

    /// Rebuild every texture after context loss and re-upload the seeds.
    ///
    /// Simulation time and frame count are preserved; particle state restarts
    /// from the seeds.
    pub fn recover(&mut self, backend: &mut B) -> Result<(), SimulationError> {
        match self.state {
            SimState::Lost => {}
            SimState::Ready => return Ok(()),
            other => {
                return Err(SimulationError::InvalidState {
                    expected: SimState::Lost.name(),
                    actual: other.name(),
                })
            }
        }
        if backend.is_context_lost() {
            return Err(SimulationError::ContextLost);
        }

        if let Some(mut stale) = self.targets.take() {
            stale.release(backend);
        }
        let mut targets = Targets::allocate(backend, self.width, self.height, &self.behavior)?;
        if let Err(e) = targets.upload(backend, &self.seeds, &self.behavior) {
            targets.release(backend);
            return Err(e.into());
        }
        self.targets = Some(targets);
        self.state = SimState::Ready;
        info!(time = self.time, "particle simulation recovered");
        Ok(())
    }

    /// Release every texture. Safe to call more than once.
    pub fn dispose(&mut self, backend: &mut B) {
        if let Some(mut targets) = self.targets.take() {
            targets.release(backend);
            debug!(count = self.count, "particle simulation disposed");
        }
        self.state = SimState::Disposed;
    }

    /// Latest positions: (x, y, z, age) per particle. `None` once disposed
    /// or while a recovery is pending.
    pub fn position_texture(&self) -> Option<&B::Texture> {
        self.live_targets().and_then(|t| t.position.current())
    }

    /// Latest velocities: (vx, vy, vz, aux) per particle.
    pub fn velocity_texture(&self) -> Option<&B::Texture> {
        self.live_targets().and_then(|t| t.velocity.current())
    }

    fn live_targets(&self) -> Option<&Targets<B::Texture>> {
        match self.state {
            SimState::Ready | SimState::Stepping => self.targets.as_ref(),
            _ => None,
        }
    }

    /// Read the latest positions back to the host, one entry per particle.
    /// Stalls the pipeline.
    pub fn read_positions(&self, backend: &mut B) -> Result<Vec<Vec4>, SimulationError> {
        self.read(backend, |t| t.position.current())
    }

    /// Read the latest velocities back to the host.
    pub fn read_velocities(&self, backend: &mut B) -> Result<Vec<Vec4>, SimulationError> {
        self.read(backend, |t| t.velocity.current())
    }

    fn read(
        &self,
        backend: &mut B,
        pick: impl Fn(&Targets<B::Texture>) -> Option<&B::Texture>,
    ) -> Result<Vec<Vec4>, SimulationError> {
        self.require_ready()?;
        let targets = self.live_targets().ok_or(SimulationError::ContextLost)?;
        let texture = pick(targets).ok_or(GpuError::Resource(ResourceError::UnknownTexture))?;
        let mut texels = backend.read_texture(texture)?;
        texels.truncate(self.count as usize);
        Ok(texels)
    }

    /// Current driver state.
    pub fn state(&self) -> SimState {
        self.state
    }

    /// Number of particles.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// State texture dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Time of the last completed step.
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Completed steps.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Steps skipped because of resource errors.
    pub fn skipped_steps(&self) -> u64 {
        self.skipped_steps
    }

    /// Active behavior.
    pub fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    /// Seeds the simulation was created with.
    pub fn seeds(&self) -> &ParticleSeeds {
        &self.seeds
    }
}
