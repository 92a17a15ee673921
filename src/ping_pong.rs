//! Ping-pong texture pairs.
//!
//! A [`DoubleBuffer`] owns two equally-shaped targets. A step reads
//! [`current`](DoubleBuffer::current) (the latest output), renders into
//! [`previous`](DoubleBuffer::previous) (the stale one), then calls
//! [`swap`](DoubleBuffer::swap), which flips an index so the fresh output
//! becomes current. Texture contents are never copied.

use tracing::debug;

use crate::error::{GpuError, ResourceError};
use crate::gpu::{Backend, TextureDescriptor};

/// Texture dimensions for `count` entries laid out row-major in a near-square
/// grid: `width = ceil(sqrt(count))`, `height = ceil(count / width)`.
pub fn grid_dimensions(count: u32) -> (u32, u32) {
    let count = count.max(1);
    let mut width = (count as f64).sqrt().ceil() as u32;
    // Guard against float rounding on perfect squares
    while width > 1 && (width - 1) * (width - 1) >= count {
        width -= 1;
    }
    let height = count.div_ceil(width);
    (width, height)
}

/// Two render targets with "current"/"previous" roles.
pub struct DoubleBuffer<T> {
    descriptor: TextureDescriptor,
    targets: Option<[T; 2]>,
    /// Index of the target holding the latest output.
    current: usize,
}

impl<T> DoubleBuffer<T> {
    /// Allocate both targets. If the second allocation fails, the first is
    /// destroyed before the error is returned.
    pub fn allocate<B>(backend: &mut B, descriptor: TextureDescriptor) -> Result<Self, GpuError>
    where
        B: Backend<Texture = T>,
    {
        let targets = Self::create_pair(backend, &descriptor)?;
        debug!(
            label = %descriptor.label,
            width = descriptor.width,
            height = descriptor.height,
            "allocated ping-pong pair"
        );
        Ok(Self {
            descriptor,
            targets: Some(targets),
            current: 0,
        })
    }

    fn create_pair<B>(backend: &mut B, descriptor: &TextureDescriptor) -> Result<[T; 2], GpuError>
    where
        B: Backend<Texture = T>,
    {
        let mut desc_a = descriptor.clone();
        desc_a.label = format!("{} A", descriptor.label);
        let mut desc_b = descriptor.clone();
        desc_b.label = format!("{} B", descriptor.label);

        let a = backend.create_texture(&desc_a)?;
        match backend.create_texture(&desc_b) {
            Ok(b) => Ok([a, b]),
            Err(e) => {
                backend.destroy_texture(a);
                Err(e)
            }
        }
    }

    /// Stored metadata; enough to rebuild both targets.
    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    /// Whether the targets are still allocated.
    pub fn is_allocated(&self) -> bool {
        self.targets.is_some()
    }

    /// Target holding the most recent output, `None` once released.
    pub fn current(&self) -> Option<&T> {
        self.targets.as_ref().map(|pair| &pair[self.current])
    }

    /// Target holding the output of the step before, `None` once released.
    pub fn previous(&self) -> Option<&T> {
        self.targets.as_ref().map(|pair| &pair[1 - self.current])
    }

    /// `(current, previous)` for a pass that reads one and renders into the
    /// other. A released pair is an unknown texture.
    pub fn roles(&self) -> Result<(&T, &T), GpuError> {
        let pair = self.pair()?;
        Ok((&pair[self.current], &pair[1 - self.current]))
    }

    fn pair(&self) -> Result<&[T; 2], GpuError> {
        match &self.targets {
            Some(pair) => Ok(pair),
            None => {
                debug_assert!(false, "ping-pong pair '{}' used after release", self.descriptor.label);
                Err(ResourceError::UnknownTexture.into())
            }
        }
    }

    /// Exchange roles: the target just rendered into becomes current.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Upload the same texels into both targets.
    pub fn fill<B>(&self, backend: &mut B, texels: &[glam::Vec4]) -> Result<(), GpuError>
    where
        B: Backend<Texture = T>,
    {
        let [a, b] = self.pair()?;
        backend.write_texture(a, texels)?;
        backend.write_texture(b, texels)
    }

    /// Rebuild both targets from the stored descriptor, dropping the old
    /// handles. Used after context loss, when every texture is invalid.
    pub fn reallocate<B>(&mut self, backend: &mut B) -> Result<(), GpuError>
    where
        B: Backend<Texture = T>,
    {
        self.release(backend);
        self.targets = Some(Self::create_pair(backend, &self.descriptor)?);
        self.current = 0;
        Ok(())
    }

    /// Destroy both targets. Safe to call more than once.
    pub fn release<B>(&mut self, backend: &mut B)
    where
        B: Backend<Texture = T>,
    {
        if let Some([a, b]) = self.targets.take() {
            backend.destroy_texture(a);
            backend.destroy_texture(b);
            debug!(label = %self.descriptor.label, "released ping-pong pair");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::CpuBackend;
    use glam::Vec4;

    #[test]
    fn test_grid_dimensions() {
        assert_eq!(grid_dimensions(1), (1, 1));
        assert_eq!(grid_dimensions(4), (2, 2));
        assert_eq!(grid_dimensions(5), (3, 2));
        assert_eq!(grid_dimensions(16), (4, 4));
        assert_eq!(grid_dimensions(17), (5, 4));
        for n in 1..2000 {
            let (w, h) = grid_dimensions(n);
            assert!(w * h >= n, "{n} does not fit in {w}x{h}");
            assert!(w * (h - 1) < n, "{n} wastes a row in {w}x{h}");
        }
    }

    #[test]
    fn test_swap_flips_roles_without_copy() {
        let mut backend = CpuBackend::new();
        let mut buffer = DoubleBuffer::allocate(&mut backend, TextureDescriptor::new("state", 2, 1)).unwrap();

        let (current, previous) = buffer.roles().unwrap();
        backend.write_texture(current, &[Vec4::ZERO; 2]).unwrap();
        // Render into the stale target, then promote it
        backend.write_texture(previous, &[Vec4::ONE; 2]).unwrap();
        let written_id = previous.id();

        buffer.swap();
        assert_eq!(buffer.current().unwrap().id(), written_id);
        assert_eq!(backend.read_texture(buffer.current().unwrap()).unwrap(), vec![Vec4::ONE; 2]);
        assert_eq!(backend.read_texture(buffer.previous().unwrap()).unwrap(), vec![Vec4::ZERO; 2]);
    }

    #[test]
    fn test_failed_second_allocation_releases_first() {
        let mut backend = CpuBackend::new();
        backend.fail_allocations_after(1);
        let result = DoubleBuffer::allocate(&mut backend, TextureDescriptor::new("state", 2, 2));
        assert!(result.is_err());
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_reallocate_from_descriptor() {
        let mut backend = CpuBackend::new();
        let mut buffer = DoubleBuffer::allocate(&mut backend, TextureDescriptor::new("state", 3, 2)).unwrap();
        backend.lose_context();
        backend.restore_context();

        buffer.reallocate(&mut backend).unwrap();
        assert_eq!(backend.texture_size(buffer.current().unwrap()), (3, 2));
        assert_eq!(backend.live_textures(), 2);

        buffer.release(&mut backend);
        buffer.release(&mut backend);
        assert_eq!(backend.live_textures(), 0);
        assert!(!buffer.is_allocated());
    }

    #[test]
    fn test_released_pair_has_no_targets() {
        let mut backend = CpuBackend::new();
        let mut buffer = DoubleBuffer::allocate(&mut backend, TextureDescriptor::new("state", 2, 1)).unwrap();
        buffer.release(&mut backend);
        assert!(buffer.current().is_none());
        assert!(buffer.previous().is_none());
    }
}
