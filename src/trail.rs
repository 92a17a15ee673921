//! Per-entity trail history, recorded on the GPU.
//!
//! A [`TrailSystem`] keeps one fixed-capacity ring of nodes per trail. Each
//! [`update`](TrailSystem::update) samples the tracked point of every trail
//! and appends it when it moved at least `update_distance_min` away from the
//! last recorded node (the first node is always recorded).
//!
//! Storage, both ping-ponged:
//!
//! - node texture, `nodes_per_trail x trail_count`: texel `(node, trail)` is
//!   `(x, y, z, time recorded)`.
//! - state texture, `trail_count x 1`: texel `(trail, 0)` is
//!   `(head, valid, wrote_this_update, 0)`.
//!
//! An update runs two passes. The state pass (one invocation per trail)
//! decides whether to write and advances `head`/`valid`. The node pass (one
//! invocation per node) reads the *new* state, writes the tracked point into
//! the head slot of trails that recorded, and copies every other node.
//!
//! Ribbon shaders can consume the textures directly with the
//! `trail_physical_index` and `trail_tangent` WGSL helpers; host code decodes
//! readbacks with [`TrailSnapshot`].

use glam::{Vec3, Vec4};
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::error::{GpuError, TrailError};
use crate::gpu::{Backend, Binding, FrameUniforms, Pass, Program, TextureDescriptor, FRAME_WGSL};
use crate::ping_pong::DoubleBuffer;
use crate::ring::TrailSnapshot;
use crate::shader_utils::{all_utils_wgsl, FULLSCREEN_WGSL};
use crate::simulation::StepOutcome;
use crate::uniforms::UniformSet;

/// Binding names of both trail passes, in binding order.
pub const TRAIL_INPUTS: [&str; 4] = ["state_tex", "node_tex", "source_tex", "ids_tex"];

/// Tracked particle ids must be below this: ids travel through the id
/// texture as `f32`, which holds every integer up to 2^24 exactly.
pub const MAX_TRACKED_ID: u32 = 1 << 24;

/// Trail dimensions and recording threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailConfig {
    /// Number of trails.
    pub trail_count: u32,
    /// Ring capacity of each trail.
    pub nodes_per_trail: u32,
    /// Minimum movement before a new node is recorded.
    pub update_distance_min: f32,
}

impl TrailConfig {
    fn validate(&self) -> Result<(), TrailError> {
        if self.trail_count == 0 {
            return Err(TrailError::InvalidConfig("trail_count must be greater than zero".into()));
        }
        if self.nodes_per_trail == 0 {
            return Err(TrailError::InvalidConfig("nodes_per_trail must be greater than zero".into()));
        }
        if !self.update_distance_min.is_finite() || self.update_distance_min < 0.0 {
            return Err(TrailError::InvalidConfig(format!(
                "update_distance_min must be finite and non-negative, got {}",
                self.update_distance_min
            )));
        }
        Ok(())
    }
}

impl From<&SimConfig> for TrailConfig {
    fn from(config: &SimConfig) -> Self {
        Self {
            trail_count: config.trail_count,
            nodes_per_trail: config.nodes_per_trail,
            update_distance_min: config.update_distance_min,
        }
    }
}

/// What the trails follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracking {
    /// Trail `i` follows particle `ids[i]` of a position texture passed to
    /// each update. Every id must address a texel of that texture and be
    /// below [`MAX_TRACKED_ID`].
    Particles(Vec<u32>),
    /// Trail `i` follows point `i` of a host slice passed to each update.
    Points,
}

/// Source of tracked points for one update.
pub enum TrailSource<'a, T> {
    /// Particle position texture (one texel per particle).
    Texture(&'a T),
    /// One point per trail.
    Points(&'a [Vec3]),
}

const TRACKED_POINT_WGSL: &str = r#"
fn tracked_point(trail: u32) -> vec4<f32> {
    let id = u32(textureLoad(ids_tex, vec2<i32>(i32(trail), 0), 0).x);
    let width = textureDimensions(source_tex).x;
    return textureLoad(source_tex, index_texel(id, width), 0);
}
"#;

fn pass_header() -> String {
    let mut code = String::new();
    code.push_str(FRAME_WGSL);
    code.push_str(
        r#"

struct Params {
    update_distance_min: f32,
    capacity: u32,
};

@group(0) @binding(0) var<uniform> frame: Frame;
@group(0) @binding(1) var<uniform> params: Params;
"#,
    );
    for (i, name) in TRAIL_INPUTS.iter().enumerate() {
        code.push_str(&format!(
            "@group(0) @binding({}) var {}: texture_2d<f32>;\n",
            i + 2,
            name
        ));
    }
    code.push_str(&all_utils_wgsl());
    code.push_str(FULLSCREEN_WGSL);
    code.push_str(TRACKED_POINT_WGSL);
    code
}

/// WGSL of the state pass: one texel per trail.
pub fn state_pass_wgsl() -> String {
    format!(
        r#"{}
@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {{
    let texel = vec2<i32>(floor(frag_coord.xy));
    let trail = u32(texel.x);
    if trail >= frame.count || texel.y > 0 {{
        return vec4<f32>(0.0);
    }}
    let state = textureLoad(state_tex, vec2<i32>(i32(trail), 0), 0);
    var head = u32(state.x);
    var valid = u32(state.y);

    let point = tracked_point(trail);
    let last = textureLoad(node_tex, vec2<i32>(i32(head), i32(trail)), 0);
    let record = valid == 0u || distance(point.xyz, last.xyz) >= params.update_distance_min;
    if record {{
        head = (head + 1u) % params.capacity;
        valid = min(valid + 1u, params.capacity);
    }}
    return vec4<f32>(f32(head), f32(valid), select(0.0, 1.0, record), 0.0);
}}
"#,
        pass_header()
    )
}

/// WGSL of the node pass: one texel per node. `state_tex` is the state
/// written by this update's state pass.
pub fn node_pass_wgsl() -> String {
    format!(
        r#"{}
@fragment
fn fs_main(@builtin(position) frag_coord: vec4<f32>) -> @location(0) vec4<f32> {{
    let texel = vec2<i32>(floor(frag_coord.xy));
    let node = u32(texel.x);
    let trail = u32(texel.y);
    let previous = textureLoad(node_tex, texel, 0);
    if trail >= frame.count {{
        return previous;
    }}
    let state = textureLoad(state_tex, vec2<i32>(i32(trail), 0), 0);
    if state.z > 0.5 && node == u32(state.x) {{
        let point = tracked_point(trail);
        return vec4<f32>(point.xyz, frame.time);
    }}
    return previous;
}}
"#,
        pass_header()
    )
}

/// GPU trail rings for a fixed number of tracked entities.
pub struct TrailSystem<B: Backend> {
    config: TrailConfig,
    tracking: Tracking,
    nodes: DoubleBuffer<B::Texture>,
    state: DoubleBuffer<B::Texture>,
    ids: Option<B::Texture>,
    /// Host points, uploaded each update in point tracking.
    points: Option<B::Texture>,
    params: UniformSet,
    state_source: String,
    node_source: String,
    updates: u64,
}

impl<B: Backend> TrailSystem<B> {
    /// Allocate and clear the rings. Nothing leaks on failure.
    pub fn new(backend: &mut B, config: TrailConfig, tracking: Tracking) -> Result<Self, TrailError> {
        config.validate()?;
        if let Tracking::Particles(ids) = &tracking {
            if ids.len() != config.trail_count as usize {
                return Err(TrailError::InvalidConfig(format!(
                    "{} particle ids for {} trails",
                    ids.len(),
                    config.trail_count
                )));
            }
            if let Some(id) = ids.iter().find(|&&id| id >= MAX_TRACKED_ID) {
                return Err(TrailError::InvalidConfig(format!(
                    "particle id {} is not below {}",
                    id, MAX_TRACKED_ID
                )));
            }
        }
        let caps = backend.capabilities();
        caps.require_float_targets().map_err(GpuError::from)?;
        caps.check_size(config.nodes_per_trail, config.trail_count)
            .map_err(GpuError::from)?;

        let mut params = UniformSet::new();
        params.declare_builtin("update_distance_min", config.update_distance_min);
        params.declare_builtin("capacity", config.nodes_per_trail);

        let (nodes, state, ids, points) = Self::allocate(backend, &config, &tracking)?;
        let mut system = Self {
            config,
            tracking,
            nodes,
            state,
            ids: Some(ids),
            points,
            params,
            state_source: state_pass_wgsl(),
            node_source: node_pass_wgsl(),
            updates: 0,
        };
        if let Err(e) = system.reset_contents(backend) {
            system.dispose(backend);
            return Err(e.into());
        }
        info!(
            trails = config.trail_count,
            capacity = config.nodes_per_trail,
            "trail system initialized"
        );
        Ok(system)
    }

    #[allow(clippy::type_complexity)]
    fn allocate(
        backend: &mut B,
        config: &TrailConfig,
        tracking: &Tracking,
    ) -> Result<
        (
            DoubleBuffer<B::Texture>,
            DoubleBuffer<B::Texture>,
            B::Texture,
            Option<B::Texture>,
        ),
        GpuError,
    > {
        let mut nodes = DoubleBuffer::allocate(
            backend,
            TextureDescriptor::new("Trail Nodes", config.nodes_per_trail, config.trail_count),
        )?;
        let mut state = match DoubleBuffer::allocate(backend, TextureDescriptor::new("Trail State", config.trail_count, 1)) {
            Ok(s) => s,
            Err(e) => {
                nodes.release(backend);
                return Err(e);
            }
        };
        let ids = match backend.create_texture(&TextureDescriptor::new("Trail Ids", config.trail_count, 1)) {
            Ok(t) => t,
            Err(e) => {
                nodes.release(backend);
                state.release(backend);
                return Err(e);
            }
        };
        let points = match tracking {
            Tracking::Points => {
                match backend.create_texture(&TextureDescriptor::new("Trail Points", config.trail_count, 1)) {
                    Ok(t) => Some(t),
                    Err(e) => {
                        nodes.release(backend);
                        state.release(backend);
                        backend.destroy_texture(ids);
                        return Err(e);
                    }
                }
            }
            Tracking::Particles(_) => None,
        };
        Ok((nodes, state, ids, points))
    }

    /// Empty rings, zero nodes, tracked ids uploaded.
    fn reset_contents(&self, backend: &mut B) -> Result<(), GpuError> {
        let capacity = self.config.nodes_per_trail;
        let trails = self.config.trail_count as usize;
        let empty = Vec4::new((capacity - 1) as f32, 0.0, 0.0, 0.0);
        self.state.fill(backend, &vec![empty; trails])?;
        self.nodes.fill(backend, &vec![Vec4::ZERO; capacity as usize * trails])?;

        let ids: Vec<Vec4> = match &self.tracking {
            Tracking::Particles(ids) => ids.iter().map(|&id| Vec4::new(id as f32, 0.0, 0.0, 0.0)).collect(),
            Tracking::Points => (0..trails).map(|i| Vec4::new(i as f32, 0.0, 0.0, 0.0)).collect(),
        };
        if let Some(texture) = &self.ids {
            backend.write_texture(texture, &ids)?;
        }
        if let Some(texture) = &self.points {
            backend.write_texture(texture, &vec![Vec4::ZERO; trails])?;
        }
        Ok(())
    }

    /// Sample the tracked points and record nodes where they moved far
    /// enough. `time` is stored with every recorded node.
    ///
    /// Resource errors skip the update and leave every ring unchanged.
    pub fn update(&mut self, backend: &mut B, source: TrailSource<'_, B::Texture>, time: f32) -> Result<StepOutcome, TrailError> {
        if !self.nodes.is_allocated() || !self.state.is_allocated() {
            return Err(TrailError::Released);
        }
        let source_texture = match (&self.tracking, source) {
            (Tracking::Particles(ids), TrailSource::Texture(texture)) => {
                let (width, height) = backend.texture_size(texture);
                let entries = width as u64 * height as u64;
                if let Some(id) = ids.iter().find(|&&id| id as u64 >= entries) {
                    return Err(TrailError::SourceMismatch(format!(
                        "particle id {} is outside a {}x{} position texture",
                        id, width, height
                    )));
                }
                texture
            }
            (Tracking::Points, TrailSource::Points(points)) => {
                if points.len() != self.config.trail_count as usize {
                    return Err(TrailError::SourceMismatch(format!(
                        "{} points for {} trails",
                        points.len(),
                        self.config.trail_count
                    )));
                }
                let texture = self.points.as_ref().ok_or(TrailError::Released)?;
                let texels: Vec<Vec4> = points.iter().map(|p| p.extend(0.0)).collect();
                backend.write_texture(texture, &texels)?;
                texture
            }
            (Tracking::Particles(_), TrailSource::Points(_)) => {
                return Err(TrailError::SourceMismatch(
                    "system tracks particles but was given points".into(),
                ))
            }
            (Tracking::Points, TrailSource::Texture(_)) => {
                return Err(TrailError::SourceMismatch(
                    "system tracks points but was given a texture".into(),
                ))
            }
        };

        match self.run_passes(backend, source_texture, time) {
            Ok(()) => {
                self.state.swap();
                self.nodes.swap();
                self.updates += 1;
                Ok(StepOutcome::Stepped)
            }
            Err(GpuError::Resource(e)) => {
                warn!(error = %e, "skipping trail update");
                Ok(StepOutcome::Skipped(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn run_passes(&self, backend: &mut B, source: &B::Texture, time: f32) -> Result<(), GpuError> {
        let ids = self.ids.as_ref().ok_or(crate::error::ResourceError::UnknownTexture)?;
        let trails = self.config.trail_count;
        let (state, next_state) = self.state.roles()?;
        let (nodes, next_nodes) = self.nodes.roles()?;

        let inputs = [
            Binding::new(TRAIL_INPUTS[0], state),
            Binding::new(TRAIL_INPUTS[1], nodes),
            Binding::new(TRAIL_INPUTS[2], source),
            Binding::new(TRAIL_INPUTS[3], ids),
        ];
        backend.run_pass(&Pass {
            label: "trail state",
            program: Program::TrailState,
            source: &self.state_source,
            frame: FrameUniforms::new(time, 0.0, trails, trails, 1),
            params: &self.params,
            inputs: &inputs,
            output: next_state,
        })?;

        // Node writes follow the state just computed
        let inputs = [
            Binding::new(TRAIL_INPUTS[0], next_state),
            Binding::new(TRAIL_INPUTS[1], nodes),
            Binding::new(TRAIL_INPUTS[2], source),
            Binding::new(TRAIL_INPUTS[3], ids),
        ];
        backend.run_pass(&Pass {
            label: "trail nodes",
            program: Program::TrailNodes,
            source: &self.node_source,
            frame: FrameUniforms::new(time, 0.0, trails, self.config.nodes_per_trail, trails),
            params: &self.params,
            inputs: &inputs,
            output: next_nodes,
        })
    }

    /// Reset every ring to empty.
    pub fn clear(&mut self, backend: &mut B) -> Result<(), TrailError> {
        if !self.nodes.is_allocated() {
            return Err(TrailError::Released);
        }
        self.reset_contents(backend)?;
        debug!("trails cleared");
        Ok(())
    }

    /// Rebuild all textures after context loss. Rings restart empty.
    pub fn recover(&mut self, backend: &mut B) -> Result<(), TrailError> {
        if backend.is_context_lost() {
            return Err(GpuError::ContextLost.into());
        }
        if let Some(ids) = self.ids.take() {
            backend.destroy_texture(ids);
        }
        if let Some(points) = self.points.take() {
            backend.destroy_texture(points);
        }
        self.nodes.reallocate(backend)?;
        if let Err(e) = self.state.reallocate(backend) {
            self.nodes.release(backend);
            return Err(e.into());
        }
        if let Err(e) = self.rebuild_inputs(backend) {
            self.dispose(backend);
            return Err(e.into());
        }
        info!("trail system recovered");
        Ok(())
    }

    fn rebuild_inputs(&mut self, backend: &mut B) -> Result<(), GpuError> {
        let trails = self.config.trail_count;
        self.ids = Some(backend.create_texture(&TextureDescriptor::new("Trail Ids", trails, 1))?);
        if matches!(self.tracking, Tracking::Points) {
            self.points = Some(backend.create_texture(&TextureDescriptor::new("Trail Points", trails, 1))?);
        }
        self.reset_contents(backend)
    }

    /// Release every texture. Safe to call more than once.
    pub fn dispose(&mut self, backend: &mut B) {
        self.nodes.release(backend);
        self.state.release(backend);
        if let Some(ids) = self.ids.take() {
            backend.destroy_texture(ids);
        }
        if let Some(points) = self.points.take() {
            backend.destroy_texture(points);
        }
    }

    /// Latest node texture, `nodes_per_trail x trail_count`.
    pub fn node_texture(&self) -> Option<&B::Texture> {
        self.nodes.current()
    }

    /// Latest state texture, `trail_count x 1`.
    pub fn state_texture(&self) -> Option<&B::Texture> {
        self.state.current()
    }

    /// Read both textures back and decode them. Stalls the pipeline.
    pub fn snapshot(&self, backend: &mut B) -> Result<TrailSnapshot, TrailError> {
        let (Some(nodes), Some(state)) = (self.node_texture(), self.state_texture()) else {
            return Err(TrailError::Released);
        };
        let nodes = backend.read_texture(nodes)?;
        let state = backend.read_texture(state)?;
        Ok(TrailSnapshot::new(
            self.config.nodes_per_trail,
            self.config.trail_count,
            nodes,
            state,
        ))
    }

    /// Dimensions and threshold.
    pub fn config(&self) -> &TrailConfig {
        &self.config
    }

    /// What the trails follow.
    pub fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    /// Completed updates.
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::CpuBackend;

    fn validate_wgsl(code: &str) -> Result<(), String> {
        let module = naga::front::wgsl::parse_str(code)
            .map_err(|e| format!("WGSL parse error: {:?}", e))?;
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| format!("WGSL validation error: {:?}", e))?;
        Ok(())
    }

    #[test]
    fn test_trail_passes_are_valid_wgsl() {
        validate_wgsl(&state_pass_wgsl()).unwrap();
        validate_wgsl(&node_pass_wgsl()).unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut backend = CpuBackend::new();
        let bad = TrailConfig {
            trail_count: 0,
            nodes_per_trail: 4,
            update_distance_min: 0.1,
        };
        assert!(matches!(
            TrailSystem::new(&mut backend, bad, Tracking::Points),
            Err(TrailError::InvalidConfig(_))
        ));
        let ids_mismatch = TrailConfig {
            trail_count: 2,
            ..bad
        };
        assert!(matches!(
            TrailSystem::new(&mut backend, ids_mismatch, Tracking::Particles(vec![0])),
            Err(TrailError::InvalidConfig(_))
        ));
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_ids_must_be_exact_in_f32() {
        let mut backend = CpuBackend::new();
        let config = TrailConfig {
            trail_count: 2,
            nodes_per_trail: 4,
            update_distance_min: 0.0,
        };
        assert!(matches!(
            TrailSystem::new(&mut backend, config, Tracking::Particles(vec![0, MAX_TRACKED_ID + 1])),
            Err(TrailError::InvalidConfig(_))
        ));
        assert_eq!(backend.live_textures(), 0);

        // The largest accepted id survives the f32 round trip
        let last = MAX_TRACKED_ID - 1;
        assert_eq!(last as f32 as u32, last);
        let trails = TrailSystem::new(&mut backend, config, Tracking::Particles(vec![0, last])).unwrap();
        let ids = backend.read_texture(trails.ids.as_ref().unwrap()).unwrap();
        assert_eq!(ids[1].x as u32, last);
    }

    #[test]
    fn test_first_update_always_records() {
        let mut backend = CpuBackend::new();
        let config = TrailConfig {
            trail_count: 2,
            nodes_per_trail: 3,
            update_distance_min: 100.0,
        };
        let mut trails = TrailSystem::new(&mut backend, config, Tracking::Points).unwrap();
        let points = [Vec3::ZERO, Vec3::ONE];
        trails.update(&mut backend, TrailSource::Points(&points), 0.5).unwrap();
        trails.update(&mut backend, TrailSource::Points(&points), 1.0).unwrap();

        let snapshot = trails.snapshot(&mut backend).unwrap();
        for trail in 0..2 {
            let cursor = snapshot.cursor(trail).unwrap();
            assert_eq!((cursor.head(), cursor.valid()), (0, 1));
            assert!(!snapshot.wrote_last_update(trail));
        }
        assert_eq!(snapshot.ordered_nodes(1), vec![Vec4::new(1.0, 1.0, 1.0, 0.5)]);
    }

    #[test]
    fn test_source_mismatch() {
        let mut backend = CpuBackend::new();
        let config = TrailConfig {
            trail_count: 1,
            nodes_per_trail: 2,
            update_distance_min: 0.0,
        };
        let mut trails = TrailSystem::new(&mut backend, config, Tracking::Particles(vec![0])).unwrap();
        assert!(matches!(
            trails.update(&mut backend, TrailSource::Points(&[Vec3::ZERO]), 0.0),
            Err(TrailError::SourceMismatch(_))
        ));
    }
}
