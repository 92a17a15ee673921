//! Pluggable particle behaviors.
//!
//! A [`Behavior`] is an immutable value: a velocity-update body, a
//! position-update body and the [`UniformSet`] they read. The driver treats
//! every behavior the same way: it splices the bodies into its pass
//! templates (see [`crate::compose`]) and binds the declared uniforms. There
//! is no behavior trait and no dynamic dispatch; the [`BehaviorKind`] tag only
//! tells backends without a shader compiler which host program to run.
//!
//! # Body contract
//!
//! Velocity body, available names:
//!
//! | Name | Type | Meaning |
//! |------|------|---------|
//! | `pos` | `vec4<f32>` | previous position (xyz) and age (w) |
//! | `vel` | `vec4<f32>` | previous velocity (xyz) and aux (w) |
//! | `seed_pos`, `seed_vel` | `vec4<f32>` | generator output for this particle |
//! | `index` | `u32` | linear particle id |
//! | `texel` | `vec2<i32>` | texel of this particle |
//! | `reborn` | `bool` | rebirth fires this step |
//! | `frame` | `Frame` | `time`, `delta`, `count`, `resolution` |
//! | `params` | `Params` | declared uniform values |
//! | `updated` | `vec4<f32>` | output, starts as `vel` |
//!
//! Position body: same names, except `vel` is the velocity computed *this*
//! step and `updated` starts as `(pos.xyz + vel.xyz * delta, pos.w + delta)`.
//!
//! Declared data textures are bound as `tex_{name}`.
//!
//! # Example
//!
//! ```ignore
//! let swirl = Behavior::custom(
//!     "swirl",
//!     "updated = vec4<f32>(cross(vec3<f32>(0.0, 1.0, 0.0), pos.xyz) * params.spin, vel.w);",
//!     "",
//!     UniformSet::new().with("spin", 2.0f32)?,
//! )?
//! .with_lifetime(4.0)?;
//! ```

use glam::{Vec3, Vec4};

use crate::error::BehaviorError;
use crate::uniforms::{DataTexture, UniformSet, UniformValue};

/// Tag identifying a behavior's update program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BehaviorKind {
    /// Zero velocity.
    Still,
    /// Constant velocity, optional wrap-around bounds.
    Drift,
    /// Linear pull toward a point.
    Attract,
    /// Time-varying noise flow field.
    Flow,
    /// Pointer repulsion with spring back to the seed position.
    Pointer,
    /// Pull toward per-particle targets from a data texture.
    Morph,
    /// Caller-supplied WGSL.
    Custom,
}

/// Built-in behavior presets.
///
/// Every numeric field becomes a uniform of the same name, so hosts can
/// retune a running behavior through [`Frame`](crate::simulation::Frame)
/// overrides without rebuilding it.
#[derive(Clone, Debug)]
pub enum Preset {
    /// Particles stay where they are; only age advances.
    Still,

    /// Constant velocity.
    ///
    /// With `bounds > 0`, positions wrap around the cube `[-bounds, bounds]`.
    Drift {
        /// Velocity in units per second.
        velocity: Vec3,
        /// Half-size of the wrap cube (0 = no wrapping).
        bounds: f32,
    },

    /// Spring-like pull toward `center`.
    ///
    /// `v += (center - p) * strength * dt`, then exponential damping
    /// `v *= max(1 - damping * dt, 0)`, then a speed clamp.
    ///
    /// # Example
    ///
    /// ```ignore
    /// Preset::Attract {
    ///     center: Vec3::ZERO,
    ///     strength: 4.0,
    ///     damping: 2.0,
    ///     max_speed: 0.0, // unlimited
    /// }
    /// ```
    Attract {
        /// Attraction point.
        center: Vec3,
        /// Pull per unit distance.
        strength: f32,
        /// Damping coefficient.
        damping: f32,
        /// Speed limit (0 = unlimited).
        max_speed: f32,
    },

    /// Drift through a time-varying noise field.
    ///
    /// `aux` holds the local field magnitude, clamped to `[0, 1]`.
    Flow {
        /// Spatial frequency of the field.
        noise_scale: f32,
        /// Acceleration applied along the field.
        noise_strength: f32,
        /// How fast the field evolves.
        noise_speed: f32,
        /// Damping coefficient.
        damping: f32,
        /// Speed limit (0 = unlimited).
        max_speed: f32,
    },

    /// Push away from an interactive pointer, spring back home.
    ///
    /// `aux` holds the normalized proximity `clamp(1 - dist / radius, 0, 1)`.
    Pointer {
        /// Pointer position in simulation space.
        pointer: Vec3,
        /// Influence radius.
        radius: f32,
        /// Push strength at the pointer.
        strength: f32,
        /// Pull back toward the seed position.
        return_strength: f32,
        /// Damping coefficient.
        damping: f32,
    },

    /// Pull each particle toward its own target position.
    ///
    /// `targets` holds one position per particle, in particle order.
    Morph {
        /// Target positions by particle index.
        targets: Vec<Vec4>,
        /// Pull per unit distance.
        strength: f32,
        /// Damping coefficient.
        damping: f32,
        /// Speed limit (0 = unlimited).
        max_speed: f32,
    },
}

impl Preset {
    fn kind(&self) -> BehaviorKind {
        match self {
            Preset::Still => BehaviorKind::Still,
            Preset::Drift { .. } => BehaviorKind::Drift,
            Preset::Attract { .. } => BehaviorKind::Attract,
            Preset::Flow { .. } => BehaviorKind::Flow,
            Preset::Pointer { .. } => BehaviorKind::Pointer,
            Preset::Morph { .. } => BehaviorKind::Morph,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Preset::Still => "still",
            Preset::Drift { .. } => "drift",
            Preset::Attract { .. } => "attract",
            Preset::Flow { .. } => "flow",
            Preset::Pointer { .. } => "pointer",
            Preset::Morph { .. } => "morph",
        }
    }

    fn uniforms(&self) -> UniformSet {
        let mut set = UniformSet::new();
        match self {
            Preset::Still => {}
            Preset::Drift { velocity, bounds } => {
                set.declare_builtin("drift", *velocity);
                set.declare_builtin("bounds", *bounds);
            }
            Preset::Attract { center, strength, damping, max_speed } => {
                set.declare_builtin("center", *center);
                set.declare_builtin("strength", *strength);
                set.declare_builtin("damping", *damping);
                set.declare_builtin("max_speed", *max_speed);
            }
            Preset::Flow { noise_scale, noise_strength, noise_speed, damping, max_speed } => {
                set.declare_builtin("noise_scale", *noise_scale);
                set.declare_builtin("noise_strength", *noise_strength);
                set.declare_builtin("noise_speed", *noise_speed);
                set.declare_builtin("damping", *damping);
                set.declare_builtin("max_speed", *max_speed);
            }
            Preset::Pointer { pointer, radius, strength, return_strength, damping } => {
                set.declare_builtin("pointer", *pointer);
                set.declare_builtin("radius", *radius);
                set.declare_builtin("strength", *strength);
                set.declare_builtin("return_strength", *return_strength);
                set.declare_builtin("damping", *damping);
            }
            Preset::Morph { targets, strength, damping, max_speed } => {
                set.declare_builtin("strength", *strength);
                set.declare_builtin("damping", *damping);
                set.declare_builtin("max_speed", *max_speed);
                set.declare_texture_builtin("targets", DataTexture::per_particle(targets.clone()));
            }
        }
        set
    }

    fn velocity_wgsl(&self) -> &'static str {
        match self {
            Preset::Still => "    updated = vec4<f32>(0.0, 0.0, 0.0, vel.w);",
            Preset::Drift { .. } => "    updated = vec4<f32>(params.drift, vel.w);",
            Preset::Attract { .. } => {
                r#"    {
        let pull = (params.center - pos.xyz) * params.strength;
        var v = vel.xyz + pull * frame.delta;
        v = damp(v, params.damping, frame.delta);
        updated = vec4<f32>(limit_speed(v, params.max_speed), vel.w);
    }"#
            }
            Preset::Flow { .. } => {
                r#"    {
        let sample_at = pos.xyz * params.noise_scale + vec3<f32>(frame.time * params.noise_speed);
        let force = noise_vec3(sample_at);
        var v = vel.xyz + force * params.noise_strength * frame.delta;
        v = damp(v, params.damping, frame.delta);
        v = limit_speed(v, params.max_speed);
        updated = vec4<f32>(v, clamp(length(force), 0.0, 1.0));
    }"#
            }
            Preset::Pointer { .. } => {
                r#"    {
        let away = pos.xyz - params.pointer;
        let dist = length(away);
        let proximity = clamp(1.0 - dist / max(params.radius, 1.0e-6), 0.0, 1.0);
        var push = vec3<f32>(0.0);
        if dist > 1.0e-6 {
            push = away / dist * proximity * params.strength;
        }
        let spring = (seed_pos.xyz - pos.xyz) * params.return_strength;
        let v = vel.xyz + (push + spring) * frame.delta;
        updated = vec4<f32>(damp(v, params.damping, frame.delta), proximity);
    }"#
            }
            Preset::Morph { .. } => {
                r#"    {
        let goal = textureLoad(tex_targets, texel, 0).xyz;
        var v = vel.xyz + (goal - pos.xyz) * params.strength * frame.delta;
        v = damp(v, params.damping, frame.delta);
        updated = vec4<f32>(limit_speed(v, params.max_speed), vel.w);
    }"#
            }
        }
    }

    fn position_wgsl(&self) -> &'static str {
        match self {
            Preset::Drift { .. } => {
                r#"    if params.bounds > 0.0 {
        let size = params.bounds * 2.0;
        let shifted = updated.xyz + vec3<f32>(params.bounds);
        updated = vec4<f32>(shifted - size * floor(shifted / size) - vec3<f32>(params.bounds), updated.w);
    }"#
            }
            _ => "",
        }
    }
}

/// A velocity/position update strategy plus the uniforms it reads.
#[derive(Clone, Debug)]
pub struct Behavior {
    name: String,
    kind: BehaviorKind,
    velocity_wgsl: String,
    position_wgsl: String,
    uniforms: UniformSet,
}

impl Behavior {
    /// Behavior from caller-supplied WGSL bodies.
    ///
    /// The uniform set was validated when it was built; this only checks that
    /// the name is usable in generated labels.
    pub fn custom(
        name: &str,
        velocity_wgsl: &str,
        position_wgsl: &str,
        uniforms: UniformSet,
    ) -> Result<Self, BehaviorError> {
        if name.is_empty() {
            return Err(BehaviorError::InvalidUniformName(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            kind: BehaviorKind::Custom,
            velocity_wgsl: velocity_wgsl.to_string(),
            position_wgsl: position_wgsl.to_string(),
            uniforms,
        })
    }

    /// Zero-velocity behavior.
    pub fn still() -> Self {
        Preset::Still.into()
    }

    /// Spring pull toward `center` with damping and no speed limit.
    pub fn attract(center: Vec3, strength: f32, damping: f32) -> Self {
        Preset::Attract { center, strength, damping, max_speed: 0.0 }.into()
    }

    /// Add rebirth: once `age >= lifetime` the particle returns to its seed
    /// position and velocity with age 0. Declares the `lifetime` uniform.
    pub fn with_lifetime(mut self, lifetime: f32) -> Result<Self, BehaviorError> {
        self.uniforms.declare("lifetime", lifetime)?;
        Ok(self)
    }

    /// Display name, used in pass labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program tag.
    pub fn kind(&self) -> BehaviorKind {
        self.kind
    }

    /// Velocity update body.
    pub fn velocity_shader(&self) -> &str {
        &self.velocity_wgsl
    }

    /// Position update body.
    pub fn position_shader(&self) -> &str {
        &self.position_wgsl
    }

    /// Declared uniforms and data textures.
    pub fn uniforms(&self) -> &UniformSet {
        &self.uniforms
    }

    /// Whether the behavior rebirths particles.
    pub fn has_lifetime(&self) -> bool {
        matches!(self.uniforms.get("lifetime"), Some(UniformValue::F32(_)))
    }
}

impl From<Preset> for Behavior {
    fn from(preset: Preset) -> Self {
        Self {
            name: preset.name().to_string(),
            kind: preset.kind(),
            velocity_wgsl: preset.velocity_wgsl().to_string(),
            position_wgsl: preset.position_wgsl().to_string(),
            uniforms: preset.uniforms(),
        }
    }
}

/// One of each preset, with representative parameters.
pub fn all_presets(particle_count: usize) -> Vec<Preset> {
    vec![
        Preset::Still,
        Preset::Drift { velocity: Vec3::new(0.1, 0.0, 0.0), bounds: 1.0 },
        Preset::Attract { center: Vec3::ZERO, strength: 4.0, damping: 2.0, max_speed: 0.0 },
        Preset::Flow {
            noise_scale: 1.5,
            noise_strength: 0.8,
            noise_speed: 0.2,
            damping: 0.5,
            max_speed: 2.0,
        },
        Preset::Pointer {
            pointer: Vec3::ZERO,
            radius: 0.5,
            strength: 3.0,
            return_strength: 1.0,
            damping: 1.5,
        },
        Preset::Morph {
            targets: vec![Vec4::ZERO; particle_count],
            strength: 2.0,
            damping: 1.0,
            max_speed: 0.0,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::validate_name;

    #[test]
    fn test_preset_uniform_names_are_valid() {
        for preset in all_presets(4) {
            let behavior = Behavior::from(preset);
            for (name, _) in behavior.uniforms().values() {
                validate_name(name).unwrap_or_else(|e| panic!("{}: {}", behavior.name(), e));
            }
            for (name, _) in behavior.uniforms().textures() {
                validate_name(name).unwrap_or_else(|e| panic!("{}: {}", behavior.name(), e));
            }
        }
    }

    #[test]
    fn test_with_lifetime_declares_uniform_once() {
        let behavior = Behavior::still().with_lifetime(2.0).unwrap();
        assert!(behavior.has_lifetime());
        assert_eq!(behavior.uniforms().f32("lifetime"), Some(2.0));
        assert!(matches!(
            behavior.with_lifetime(3.0),
            Err(BehaviorError::DuplicateUniform(_))
        ));
    }

    #[test]
    fn test_custom_rejects_reserved_uniforms_at_construction() {
        let mut uniforms = UniformSet::new();
        let err = uniforms.declare("delta", 1.0f32).unwrap_err();
        assert_eq!(err, BehaviorError::ReservedUniform("delta".into()));
        assert!(uniforms.declare("positionTex", 1.0f32).is_err());
    }

    #[test]
    fn test_morph_declares_particle_texture() {
        let behavior: Behavior = Preset::Morph {
            targets: vec![Vec4::ONE; 10],
            strength: 1.0,
            damping: 0.0,
            max_speed: 0.0,
        }
        .into();
        let tex = behavior.uniforms().texture("targets").unwrap();
        assert_eq!((tex.width, tex.height), (4, 3));
        assert!(behavior.velocity_shader().contains("tex_targets"));
    }

    #[test]
    fn test_kind_tags() {
        let kinds: Vec<_> = all_presets(1).into_iter().map(|p| Behavior::from(p).kind()).collect();
        assert_eq!(
            kinds,
            vec![
                BehaviorKind::Still,
                BehaviorKind::Drift,
                BehaviorKind::Attract,
                BehaviorKind::Flow,
                BehaviorKind::Pointer,
                BehaviorKind::Morph,
            ]
        );
    }
}
