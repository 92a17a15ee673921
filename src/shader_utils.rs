//! Built-in WGSL utility functions shared by every simulation pass.
//!
//! The composed pass shaders always include these, so behavior bodies can
//! call them directly.
//!
//! # Available Functions
//!
//! ## Addressing
//! - `texel_index(texel: vec2<i32>, width: u32) -> u32` - Linear id of a texel
//! - `index_texel(index: u32, width: u32) -> vec2<i32>` - Texel of a linear id
//!
//! ## Random & Hash
//! - `hash(n: u32) -> u32` - Hash a u32 to pseudo-random u32
//! - `rand(seed: u32) -> f32` - Returns random float in [0, 1)
//! - `rand_vec3(seed: u32) -> vec3<f32>` - Random vector in [-1, 1]^3
//!
//! ## Noise
//! - `noise3(p: vec3<f32>) -> f32` - 3D value noise in [-1, 1]
//! - `noise_vec3(p: vec3<f32>) -> vec3<f32>` - Three decorrelated noise channels
//!
//! ## Simulation
//! - `clamp_finite(v: vec4<f32>) -> vec4<f32>` - NaN to zero, clamp to +-1e6
//! - `damp(v: vec3<f32>, damping: f32, delta: f32) -> vec3<f32>` - Exponential damping
//! - `limit_speed(v: vec3<f32>, max_speed: f32) -> vec3<f32>` - Clamp magnitude
//! - `rebirth_due(age: f32, lifetime: f32) -> bool` - Shared rebirth trigger
//!
//! ## Trails
//! - `trail_physical_index(head, valid, logical, capacity) -> u32`
//! - `trail_tangent(prev: vec3<f32>, next: vec3<f32>, valid: u32) -> vec3<f32>`
//!
//! The [`host`] module mirrors the numeric functions on the CPU with the same
//! arithmetic, for the reference backend and for tests.

/// Full-screen triangle; the fragment stage runs once per target texel.
pub const FULLSCREEN_WGSL: &str = r#"
@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((vertex_index << 1u) & 2u), f32(vertex_index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}
"#;

/// WGSL code for texel addressing.
pub const INDEX_WGSL: &str = r#"
fn texel_index(texel: vec2<i32>, width: u32) -> u32 {
    return u32(texel.y) * width + u32(texel.x);
}

fn index_texel(index: u32, width: u32) -> vec2<i32> {
    return vec2<i32>(i32(index % width), i32(index / width));
}
"#;

/// WGSL code for random/hash functions.
pub const RANDOM_WGSL: &str = r#"
fn hash(n: u32) -> u32 {
    var x = n;
    x = x ^ (x >> 17u);
    x = x * 0xed5ad4bbu;
    x = x ^ (x >> 11u);
    x = x * 0xac4c1b51u;
    x = x ^ (x >> 15u);
    x = x * 0x31848babu;
    x = x ^ (x >> 14u);
    return x;
}

// Random float in [0, 1)
fn rand(seed: u32) -> f32 {
    return f32(hash(seed)) / 4294967295.0;
}

fn rand_vec3(seed: u32) -> vec3<f32> {
    return vec3<f32>(
        rand(seed) * 2.0 - 1.0,
        rand(seed + 1u) * 2.0 - 1.0,
        rand(seed + 2u) * 2.0 - 1.0
    );
}
"#;

/// WGSL code for lattice value noise.
pub const NOISE_WGSL: &str = r#"
fn lattice(c: vec3<i32>) -> f32 {
    let h = hash((bitcast<u32>(c.x) * 73856093u) ^ (bitcast<u32>(c.y) * 19349663u) ^ (bitcast<u32>(c.z) * 83492791u));
    return f32(h) / 4294967295.0 * 2.0 - 1.0;
}

fn noise3(p: vec3<f32>) -> f32 {
    let cell = floor(p);
    let f = p - cell;
    let u = f * f * (3.0 - 2.0 * f);
    let c = vec3<i32>(cell);

    let x00 = mix(lattice(c), lattice(c + vec3<i32>(1, 0, 0)), u.x);
    let x10 = mix(lattice(c + vec3<i32>(0, 1, 0)), lattice(c + vec3<i32>(1, 1, 0)), u.x);
    let x01 = mix(lattice(c + vec3<i32>(0, 0, 1)), lattice(c + vec3<i32>(1, 0, 1)), u.x);
    let x11 = mix(lattice(c + vec3<i32>(0, 1, 1)), lattice(c + vec3<i32>(1, 1, 1)), u.x);
    return mix(mix(x00, x10, u.y), mix(x01, x11, u.y), u.z);
}

fn noise_vec3(p: vec3<f32>) -> vec3<f32> {
    return vec3<f32>(
        noise3(p),
        noise3(p + vec3<f32>(31.416, 0.0, 0.0)),
        noise3(p + vec3<f32>(0.0, 47.853, 0.0))
    );
}
"#;

/// WGSL code for numeric guards and the shared rebirth trigger.
pub const SIMULATION_WGSL: &str = r#"
const MAX_COMPONENT: f32 = 1.0e6;

fn clamp_finite(v: vec4<f32>) -> vec4<f32> {
    // NaN is the only value unequal to itself
    let cleaned = select(v, vec4<f32>(0.0), v != v);
    return clamp(cleaned, vec4<f32>(-MAX_COMPONENT), vec4<f32>(MAX_COMPONENT));
}

fn damp(v: vec3<f32>, damping: f32, delta: f32) -> vec3<f32> {
    return v * max(1.0 - damping * delta, 0.0);
}

fn limit_speed(v: vec3<f32>, max_speed: f32) -> vec3<f32> {
    let speed = length(v);
    if max_speed > 0.0 && speed > max_speed {
        return v / speed * max_speed;
    }
    return v;
}

// Single definition used by both the velocity and the position pass.
fn rebirth_due(age: f32, lifetime: f32) -> bool {
    return lifetime > 0.0 && age >= lifetime;
}
"#;

/// WGSL code for walking trail rings.
pub const TRAIL_WGSL: &str = r#"
const DEFAULT_TANGENT: vec3<f32> = vec3<f32>(0.0, 1.0, 0.0);

// Logical 0 is the oldest valid node.
fn trail_physical_index(head: u32, valid: u32, logical: u32, capacity: u32) -> u32 {
    return (head + capacity - valid + 1u + logical) % capacity;
}

fn trail_tangent(prev: vec3<f32>, next: vec3<f32>, valid: u32) -> vec3<f32> {
    let d = next - prev;
    let len = length(d);
    if valid < 2u || len < 1.0e-6 {
        return DEFAULT_TANGENT;
    }
    return d / len;
}
"#;

/// Get all built-in utility functions combined.
pub fn all_utils_wgsl() -> String {
    format!(
        "// Built-in utility functions\n{}\n{}\n{}\n{}\n{}\n",
        INDEX_WGSL, RANDOM_WGSL, NOISE_WGSL, SIMULATION_WGSL, TRAIL_WGSL
    )
}

/// Host mirrors of the WGSL helpers.
pub mod host {
    use glam::{Vec3, Vec4};

    /// Largest magnitude a state component may take.
    pub const MAX_COMPONENT: f32 = 1.0e6;

    /// Direction used when a trail has no usable segment.
    pub const DEFAULT_TANGENT: Vec3 = Vec3::Y;

    pub fn hash(n: u32) -> u32 {
        let mut x = n;
        x ^= x >> 17;
        x = x.wrapping_mul(0xed5ad4bb);
        x ^= x >> 11;
        x = x.wrapping_mul(0xac4c1b51);
        x ^= x >> 15;
        x = x.wrapping_mul(0x31848bab);
        x ^= x >> 14;
        x
    }

    pub fn rand(seed: u32) -> f32 {
        hash(seed) as f32 / 4294967295.0
    }

    fn lattice(x: i32, y: i32, z: i32) -> f32 {
        let h = hash(
            (x as u32).wrapping_mul(73856093)
                ^ (y as u32).wrapping_mul(19349663)
                ^ (z as u32).wrapping_mul(83492791),
        );
        h as f32 / 4294967295.0 * 2.0 - 1.0
    }

    fn mix(a: f32, b: f32, t: f32) -> f32 {
        a * (1.0 - t) + b * t
    }

    pub fn noise3(p: Vec3) -> f32 {
        let cell = p.floor();
        let f = p - cell;
        let u = f * f * (Vec3::splat(3.0) - 2.0 * f);
        let (cx, cy, cz) = (cell.x as i32, cell.y as i32, cell.z as i32);

        let x00 = mix(lattice(cx, cy, cz), lattice(cx + 1, cy, cz), u.x);
        let x10 = mix(lattice(cx, cy + 1, cz), lattice(cx + 1, cy + 1, cz), u.x);
        let x01 = mix(lattice(cx, cy, cz + 1), lattice(cx + 1, cy, cz + 1), u.x);
        let x11 = mix(lattice(cx, cy + 1, cz + 1), lattice(cx + 1, cy + 1, cz + 1), u.x);
        mix(mix(x00, x10, u.y), mix(x01, x11, u.y), u.z)
    }

    pub fn noise_vec3(p: Vec3) -> Vec3 {
        Vec3::new(
            noise3(p),
            noise3(p + Vec3::new(31.416, 0.0, 0.0)),
            noise3(p + Vec3::new(0.0, 47.853, 0.0)),
        )
    }

    pub fn clamp_finite(v: Vec4) -> Vec4 {
        let cleaned = Vec4::from_array(v.to_array().map(|c| if c.is_nan() { 0.0 } else { c }));
        cleaned.clamp(Vec4::splat(-MAX_COMPONENT), Vec4::splat(MAX_COMPONENT))
    }

    pub fn damp(v: Vec3, damping: f32, delta: f32) -> Vec3 {
        v * (1.0 - damping * delta).max(0.0)
    }

    pub fn limit_speed(v: Vec3, max_speed: f32) -> Vec3 {
        let speed = v.length();
        if max_speed > 0.0 && speed > max_speed {
            v / speed * max_speed
        } else {
            v
        }
    }

    pub fn rebirth_due(age: f32, lifetime: f32) -> bool {
        lifetime > 0.0 && age >= lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::host;
    use super::*;
    use glam::{Vec3, Vec4};

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
    fn test_utils_are_valid_wgsl() {
        let code = format!("{}\n{}", all_utils_wgsl(), FULLSCREEN_WGSL);
        validate_wgsl(&code).expect("utility WGSL should be valid");
    }

    #[test]
    fn test_noise_range() {
        for i in 0..500 {
            let p = Vec3::new(i as f32 * 0.37, i as f32 * -0.11, i as f32 * 0.05);
            let n = host::noise3(p);
            assert!((-1.0..=1.0).contains(&n), "noise out of range at {p}: {n}");
        }
    }

    #[test]
    fn test_noise_continuous_across_cells() {
        let a = host::noise3(Vec3::new(0.9999, 0.5, 0.5));
        let b = host::noise3(Vec3::new(1.0001, 0.5, 0.5));
        assert!((a - b).abs() < 0.01);
    }

    #[test]
    fn test_clamp_finite() {
        let v = host::clamp_finite(Vec4::new(f32::NAN, f32::INFINITY, -f32::INFINITY, 2.0));
        assert_eq!(v, Vec4::new(0.0, host::MAX_COMPONENT, -host::MAX_COMPONENT, 2.0));
    }

    #[test]
    fn test_rebirth_boundary() {
        assert!(!host::rebirth_due(0.999, 1.0));
        assert!(host::rebirth_due(1.0, 1.0));
        // Zero lifetime disables rebirth
        assert!(!host::rebirth_due(10.0, 0.0));
    }

    #[test]
    fn test_damp_never_reverses() {
        let v = host::damp(Vec3::X, 100.0, 1.0);
        assert_eq!(v, Vec3::ZERO);
    }
}
