//! Host implementations of the built-in pass programs.
//!
//! Each function evaluates one output texel with the same arithmetic as the
//! WGSL generated by [`crate::compose`] and [`crate::trail`], using the
//! mirrors in [`crate::shader_utils::host`].

use std::collections::HashMap;

use glam::{Vec3, Vec4};

use super::{FrameUniforms, Program};
use crate::behavior::BehaviorKind;
use crate::error::GpuError;
use crate::shader_utils::host;
use crate::uniforms::UniformSet;

/// A host copy of an input texture.
pub(crate) struct Sampled {
    width: u32,
    height: u32,
    texels: Vec<Vec4>,
}

impl Sampled {
    pub(crate) fn new(width: u32, height: u32, texels: Vec<Vec4>) -> Self {
        Self { width, height, texels }
    }

    /// `textureLoad` with out-of-bounds reads returning zero.
    fn load(&self, x: u32, y: u32) -> Vec4 {
        if x >= self.width || y >= self.height {
            return Vec4::ZERO;
        }
        self.texels[(y * self.width + x) as usize]
    }

    fn load_index(&self, index: u32) -> Vec4 {
        self.load(index % self.width, index / self.width)
    }
}

pub(crate) struct KernelContext<'a> {
    pub frame: &'a FrameUniforms,
    pub params: &'a UniformSet,
    pub inputs: &'a HashMap<&'a str, Sampled>,
}

impl KernelContext<'_> {
    fn input(&self, name: &str) -> Result<&Sampled, GpuError> {
        self.inputs
            .get(name)
            .ok_or_else(|| GpuError::Unsupported(format!("pass has no input named '{}'", name)))
    }

    fn f32(&self, name: &str) -> f32 {
        self.params.f32(name).unwrap_or(0.0)
    }

    fn vec3(&self, name: &str) -> Vec3 {
        self.params.vec3(name).unwrap_or(Vec3::ZERO)
    }

    fn lifetime(&self) -> Option<f32> {
        self.params.f32("lifetime")
    }
}

/// Evaluate `program` for every texel of a `width` x `height` output.
pub(crate) fn execute(
    program: Program,
    ctx: &KernelContext<'_>,
    width: u32,
    height: u32,
) -> Result<Vec<Vec4>, GpuError> {
    let mut out = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let texel = match program {
                Program::Velocity(kind) => velocity(kind, ctx, x, y, width)?,
                Program::Position(kind) => position(kind, ctx, x, y, width)?,
                Program::TrailState => trail_state(ctx, x, y)?,
                Program::TrailNodes => trail_node(ctx, x, y)?,
            };
            out.push(texel);
        }
    }
    Ok(out)
}

fn velocity(kind: BehaviorKind, ctx: &KernelContext<'_>, x: u32, y: u32, width: u32) -> Result<Vec4, GpuError> {
    let index = y * width + x;
    if index >= ctx.frame.count {
        return Ok(Vec4::ZERO);
    }
    let pos = ctx.input("position_tex")?.load(x, y);
    let vel = ctx.input("velocity_tex")?.load(x, y);
    let seed_pos = ctx.input("seed_position_tex")?.load(x, y);
    let seed_vel = ctx.input("seed_velocity_tex")?.load(x, y);
    let reborn = ctx.lifetime().is_some_and(|l| host::rebirth_due(pos.w, l));
    let delta = ctx.frame.delta;

    let mut out = vel;
    match kind {
        BehaviorKind::Still => {
            out = Vec4::new(0.0, 0.0, 0.0, vel.w);
        }
        BehaviorKind::Drift => {
            out = ctx.vec3("drift").extend(vel.w);
        }
        BehaviorKind::Attract => {
            let pull = (ctx.vec3("center") - pos.truncate()) * ctx.f32("strength");
            let v = vel.truncate() + pull * delta;
            let v = host::damp(v, ctx.f32("damping"), delta);
            out = host::limit_speed(v, ctx.f32("max_speed")).extend(vel.w);
        }
        BehaviorKind::Flow => {
            let sample = pos.truncate() * ctx.f32("noise_scale")
                + Vec3::splat(ctx.frame.time * ctx.f32("noise_speed"));
            let force = host::noise_vec3(sample);
            let v = vel.truncate() + force * ctx.f32("noise_strength") * delta;
            let v = host::damp(v, ctx.f32("damping"), delta);
            let v = host::limit_speed(v, ctx.f32("max_speed"));
            out = v.extend(force.length().clamp(0.0, 1.0));
        }
        BehaviorKind::Pointer => {
            let away = pos.truncate() - ctx.vec3("pointer");
            let dist = away.length();
            let proximity = (1.0 - dist / ctx.f32("radius").max(1.0e-6)).clamp(0.0, 1.0);
            let push = if dist > 1.0e-6 {
                away / dist * proximity * ctx.f32("strength")
            } else {
                Vec3::ZERO
            };
            let spring = (seed_pos.truncate() - pos.truncate()) * ctx.f32("return_strength");
            let v = vel.truncate() + (push + spring) * delta;
            out = host::damp(v, ctx.f32("damping"), delta).extend(proximity);
        }
        BehaviorKind::Morph => {
            let target = ctx.input("tex_targets")?.load(x, y).truncate();
            let v = vel.truncate() + (target - pos.truncate()) * ctx.f32("strength") * delta;
            let v = host::damp(v, ctx.f32("damping"), delta);
            out = host::limit_speed(v, ctx.f32("max_speed")).extend(vel.w);
        }
        BehaviorKind::Custom => {
            return Err(GpuError::Unsupported(
                "custom WGSL behaviors need the GPU backend".into(),
            ))
        }
    }
    if reborn {
        out = seed_vel;
    }
    Ok(host::clamp_finite(out))
}

fn position(kind: BehaviorKind, ctx: &KernelContext<'_>, x: u32, y: u32, width: u32) -> Result<Vec4, GpuError> {
    let index = y * width + x;
    if index >= ctx.frame.count {
        return Ok(Vec4::ZERO);
    }
    let pos = ctx.input("position_tex")?.load(x, y);
    // Freshly computed velocity of this step
    let vel = ctx.input("velocity_tex")?.load(x, y);
    let seed_pos = ctx.input("seed_position_tex")?.load(x, y);
    let reborn = ctx.lifetime().is_some_and(|l| host::rebirth_due(pos.w, l));
    let delta = ctx.frame.delta;

    let mut out = (pos.truncate() + vel.truncate() * delta).extend(pos.w + delta);
    match kind {
        BehaviorKind::Drift => {
            let bounds = ctx.f32("bounds");
            if bounds > 0.0 {
                let size = bounds * 2.0;
                let shifted = out.truncate() + Vec3::splat(bounds);
                let wrapped = shifted - size * (shifted / size).floor() - Vec3::splat(bounds);
                out = wrapped.extend(out.w);
            }
        }
        BehaviorKind::Custom => {
            return Err(GpuError::Unsupported(
                "custom WGSL behaviors need the GPU backend".into(),
            ))
        }
        _ => {}
    }
    if reborn {
        out = seed_pos.truncate().extend(0.0);
    }
    Ok(host::clamp_finite(out))
}

fn tracked_point(ctx: &KernelContext<'_>, trail: u32) -> Result<Vec4, GpuError> {
    let source_index = ctx.input("ids_tex")?.load(trail, 0).x as u32;
    Ok(ctx.input("source_tex")?.load_index(source_index))
}

fn trail_state(ctx: &KernelContext<'_>, x: u32, y: u32) -> Result<Vec4, GpuError> {
    if x >= ctx.frame.count || y > 0 {
        return Ok(Vec4::ZERO);
    }
    let capacity = ctx.f32("capacity") as u32;
    let state = ctx.input("state_tex")?.load(x, 0);
    let mut head = state.x as u32;
    let mut valid = state.y as u32;

    let point = tracked_point(ctx, x)?;
    let last = ctx.input("node_tex")?.load(head, x);
    let record = valid == 0 || point.truncate().distance(last.truncate()) >= ctx.f32("update_distance_min");
    if record {
        head = (head + 1) % capacity;
        valid = (valid + 1).min(capacity);
    }
    Ok(Vec4::new(head as f32, valid as f32, if record { 1.0 } else { 0.0 }, 0.0))
}

fn trail_node(ctx: &KernelContext<'_>, x: u32, y: u32) -> Result<Vec4, GpuError> {
    // `state_tex` is the state written by this frame's state pass
    let state = ctx.input("state_tex")?.load(y, 0);
    let previous = ctx.input("node_tex")?.load(x, y);
    if y < ctx.frame.count && state.z > 0.5 && x == state.x as u32 {
        let point = tracked_point(ctx, y)?;
        return Ok(point.truncate().extend(ctx.frame.time));
    }
    Ok(previous)
}
