//! Initial particle state.
//!
//! A [`Generator`] maps a particle index to a texel value. Generators are
//! invoked exactly once per index when a simulation is initialized; the
//! results are kept as [`ParticleSeeds`] and uploaded into the seed textures,
//! which also serve as rebirth targets and as the source for context-loss
//! recovery.
//!
//! Any closure `Fn(index, count, grid_width) -> Vec4` is a generator:
//!
//! ```ignore
//! let seeds = ParticleSeeds::generate(
//!     1024,
//!     &InSphere { radius: 0.5, seed: 7 },
//!     &|i: u32, _count: u32, _w: u32| Vec4::new(0.0, 0.01 * i as f32, 0.0, 0.0),
//! );
//! ```

use glam::{Vec3, Vec4};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::{PI, TAU};

use crate::ping_pong::grid_dimensions;

/// Produces the initial texel of one particle.
pub trait Generator {
    /// Value for particle `index` of `count`, stored in a texture
    /// `grid_width` texels wide.
    fn generate(&self, index: u32, count: u32, grid_width: u32) -> Vec4;
}

impl<F> Generator for F
where
    F: Fn(u32, u32, u32) -> Vec4,
{
    fn generate(&self, index: u32, count: u32, grid_width: u32) -> Vec4 {
        self(index, count, grid_width)
    }
}

/// All zeros.
#[derive(Clone, Copy, Debug, Default)]
pub struct Zero;

impl Generator for Zero {
    fn generate(&self, _index: u32, _count: u32, _grid_width: u32) -> Vec4 {
        Vec4::ZERO
    }
}

/// The same value for every particle.
#[derive(Clone, Copy, Debug)]
pub struct Constant(pub Vec4);

impl Generator for Constant {
    fn generate(&self, _index: u32, _count: u32, _grid_width: u32) -> Vec4 {
        self.0
    }
}

/// Per-index RNG. Deterministic for a given `(seed, index)`.
fn rng_for(seed: u64, index: u32) -> SmallRng {
    SmallRng::seed_from_u64(seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Uniformly distributed inside a sphere around the origin. `w` is 0.
#[derive(Clone, Copy, Debug)]
pub struct InSphere {
    /// Sphere radius.
    pub radius: f32,
    /// RNG seed.
    pub seed: u64,
}

impl Generator for InSphere {
    fn generate(&self, index: u32, _count: u32, _grid_width: u32) -> Vec4 {
        let mut rng = rng_for(self.seed, index);
        let theta = rng.gen_range(0.0..TAU);
        // Uniform in cos(phi) gives uniform surface density
        let cos_phi: f32 = rng.gen_range(-1.0..1.0);
        let sin_phi = (1.0 - cos_phi * cos_phi).sqrt();
        // Cube root for uniform volume distribution
        let r = self.radius * rng.gen::<f32>().cbrt();
        Vec3::new(r * sin_phi * theta.cos(), r * sin_phi * theta.sin(), r * cos_phi).extend(0.0)
    }
}

/// Uniformly distributed on a sphere surface. `w` is 0.
#[derive(Clone, Copy, Debug)]
pub struct OnSphere {
    /// Sphere radius.
    pub radius: f32,
    /// RNG seed.
    pub seed: u64,
}

impl Generator for OnSphere {
    fn generate(&self, index: u32, _count: u32, _grid_width: u32) -> Vec4 {
        let mut rng = rng_for(self.seed, index);
        let theta = rng.gen_range(0.0..TAU);
        let phi = (rng.gen_range(-1.0f32..1.0)).acos().clamp(0.0, PI);
        Vec3::new(
            self.radius * phi.sin() * theta.cos(),
            self.radius * phi.sin() * theta.sin(),
            self.radius * phi.cos(),
        )
        .extend(0.0)
    }
}

/// Particles laid out on the XY plane following their texel position,
/// spanning `[-half_size, half_size]`.
#[derive(Clone, Copy, Debug)]
pub struct Grid {
    /// Half extent of the grid.
    pub half_size: f32,
}

impl Generator for Grid {
    fn generate(&self, index: u32, count: u32, grid_width: u32) -> Vec4 {
        let rows = count.div_ceil(grid_width.max(1));
        let x = index % grid_width.max(1);
        let y = index / grid_width.max(1);
        let fx = (x as f32 / (grid_width.max(2) - 1) as f32) * 2.0 - 1.0;
        let fy = (y as f32 / (rows.max(2) - 1) as f32) * 2.0 - 1.0;
        Vec4::new(fx * self.half_size, fy * self.half_size, 0.0, 0.0)
    }
}

/// Generator output for every particle, in particle order.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticleSeeds {
    /// Initial positions; `w` is forced to age 0.
    pub positions: Vec<Vec4>,
    /// Initial velocities; `w` is the initial aux value.
    pub velocities: Vec<Vec4>,
}

impl ParticleSeeds {
    /// Run both generators once per index.
    pub fn generate<P, V>(count: u32, positions: &P, velocities: &V) -> Self
    where
        P: Generator + ?Sized,
        V: Generator + ?Sized,
    {
        let (width, _) = grid_dimensions(count);
        Self {
            positions: (0..count)
                .map(|i| positions.generate(i, count, width).truncate().extend(0.0))
                .collect(),
            velocities: (0..count).map(|i| velocities.generate(i, count, width)).collect(),
        }
    }

    /// Seeds from explicit arrays.
    pub fn from_vecs(positions: Vec<Vec4>, velocities: Vec<Vec4>) -> Self {
        Self { positions, velocities }
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether there are no particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Positions padded with zeros to fill a `width` x `height` texture.
    pub(crate) fn position_texels(&self, width: u32, height: u32) -> Vec<Vec4> {
        padded(&self.positions, width, height)
    }

    /// Velocities padded with zeros to fill a `width` x `height` texture.
    pub(crate) fn velocity_texels(&self, width: u32, height: u32) -> Vec<Vec4> {
        padded(&self.velocities, width, height)
    }
}

fn padded(data: &[Vec4], width: u32, height: u32) -> Vec<Vec4> {
    let mut texels = data.to_vec();
    texels.resize(width as usize * height as usize, Vec4::ZERO);
    texels
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_generators_called_once_per_index() {
        let calls = Cell::new(0u32);
        let counting = |i: u32, _: u32, _: u32| {
            calls.set(calls.get() + 1);
            Vec4::splat(i as f32)
        };
        let seeds = ParticleSeeds::generate(10, &counting, &Zero);
        assert_eq!(calls.get(), 10);
        assert_eq!(seeds.positions[3], Vec4::new(3.0, 3.0, 3.0, 0.0));
    }

    #[test]
    fn test_in_sphere_bounds_and_determinism() {
        let gen = InSphere { radius: 2.0, seed: 42 };
        for i in 0..500 {
            let p = gen.generate(i, 500, 23);
            assert!(p.truncate().length() <= 2.0 + 1e-4);
            assert_eq!(p, gen.generate(i, 500, 23));
        }
    }

    #[test]
    fn test_on_sphere_radius() {
        let gen = OnSphere { radius: 1.5, seed: 1 };
        for i in 0..200 {
            let r = gen.generate(i, 200, 15).truncate().length();
            assert!((r - 1.5).abs() < 1e-4);
        }
    }

    #[test]
    fn test_grid_spans_extent() {
        let gen = Grid { half_size: 1.0 };
        let (w, _) = grid_dimensions(9);
        assert_eq!(gen.generate(0, 9, w), Vec4::new(-1.0, -1.0, 0.0, 0.0));
        assert_eq!(gen.generate(8, 9, w), Vec4::new(1.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn test_position_age_forced_to_zero() {
        let seeds = ParticleSeeds::generate(2, &Constant(Vec4::new(1.0, 2.0, 3.0, 9.0)), &Zero);
        assert_eq!(seeds.positions, vec![Vec4::new(1.0, 2.0, 3.0, 0.0); 2]);
    }
}
