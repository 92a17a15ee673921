//! Device abstraction for render-to-texture simulation passes.
//!
//! Every simulation pass has the same shape: read a handful of float
//! textures, evaluate a fragment program once per output texel, write one
//! `Rgba32Float` target. [`Backend`] captures exactly that, and nothing else.
//!
//! Two backends are provided:
//!
//! - [`GpuBackend`] - wgpu device and queue, pipelines compiled from the
//!   composed WGSL of each [`Pass`].
//! - [`CpuBackend`] - headless reference executor that evaluates the built-in
//!   programs on the host with the same arithmetic as their WGSL. Used by the
//!   test suite and as a fallback when no adapter is available.

mod cpu;
mod kernels;
mod wgpu_backend;

pub use cpu::{CpuBackend, CpuTexture};
pub use wgpu_backend::{GpuBackend, GpuTexture};

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

use crate::behavior::BehaviorKind;
use crate::error::{CapabilityError, GpuError};
use crate::uniforms::UniformSet;

/// Texel formats used by simulation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TexelFormat {
    /// Four 32-bit floats per texel.
    #[default]
    Rgba32Float,
}

impl TexelFormat {
    pub(crate) fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TexelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        }
    }

    /// Size of one texel in bytes.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TexelFormat::Rgba32Float => 16,
        }
    }
}

/// Everything needed to (re)create a texture. Textures are reconstructible
/// from this metadata alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Debug label.
    pub label: String,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format.
    pub format: TexelFormat,
}

impl TextureDescriptor {
    /// Create an `Rgba32Float` descriptor.
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format: TexelFormat::Rgba32Float,
        }
    }

    /// Total texel count.
    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Device features the simulation depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `Rgba32Float` can be used as a render attachment.
    pub float_render_targets: bool,
    /// Maximum width/height of a 2D texture.
    pub max_texture_dimension: u32,
    /// Maximum simultaneous color attachments.
    pub max_color_attachments: u32,
}

impl Capabilities {
    /// Fail fast when float targets are missing.
    pub fn require_float_targets(&self) -> Result<(), CapabilityError> {
        if self.float_render_targets {
            Ok(())
        } else {
            Err(CapabilityError::FloatRenderTargets)
        }
    }

    /// Fail fast when a texture would exceed device limits.
    pub fn check_size(&self, width: u32, height: u32) -> Result<(), CapabilityError> {
        let requested = width.max(height);
        if requested > self.max_texture_dimension {
            return Err(CapabilityError::TextureTooLarge {
                requested,
                max: self.max_texture_dimension,
            });
        }
        Ok(())
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            float_render_targets: true,
            max_texture_dimension: 8192,
            max_color_attachments: 8,
        }
    }
}

/// Per-pass driver uniforms, bound at `@group(0) @binding(0)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// Simulation time in seconds.
    pub time: f32,
    /// Step size in seconds.
    pub delta: f32,
    /// Number of live entries (particles or trails); texels past it are padding.
    pub count: u32,
    _pad: u32,
    /// Output target size in texels.
    pub resolution: [f32; 2],
    _pad2: [f32; 2],
}

impl FrameUniforms {
    /// Create frame uniforms for an output of `width` x `height` texels.
    pub fn new(time: f32, delta: f32, count: u32, width: u32, height: u32) -> Self {
        Self {
            time,
            delta,
            count,
            _pad: 0,
            resolution: [width as f32, height as f32],
            _pad2: [0.0; 2],
        }
    }
}

/// WGSL declaration matching [`FrameUniforms`].
pub const FRAME_WGSL: &str = r#"struct Frame {
    time: f32,
    delta: f32,
    count: u32,
    _pad: u32,
    resolution: vec2<f32>,
    _pad2: vec2<f32>,
};"#;

/// Which program a pass runs. Backends that cannot compile WGSL dispatch on
/// this tag; the GPU backend only uses the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    /// Velocity update for a behavior.
    Velocity(BehaviorKind),
    /// Position update for a behavior.
    Position(BehaviorKind),
    /// Per-trail ring state update.
    TrailState,
    /// Per-node trail write.
    TrailNodes,
}

/// A named texture input. Bindings are declared in the WGSL in the same
/// order, starting at `@binding(2)`.
pub struct Binding<'a, T> {
    /// Binding name as used by the shader.
    pub name: &'a str,
    /// Texture bound under that name.
    pub texture: &'a T,
}

impl<'a, T> Binding<'a, T> {
    /// Bind `texture` under `name`.
    pub fn new(name: &'a str, texture: &'a T) -> Self {
        Self { name, texture }
    }
}

/// One render-to-texture pass.
pub struct Pass<'a, T> {
    /// Debug label.
    pub label: &'a str,
    /// Program tag.
    pub program: Program,
    /// Complete WGSL module with `vs_main` and `fs_main`.
    pub source: &'a str,
    /// Driver uniforms.
    pub frame: FrameUniforms,
    /// Program parameters (`params` struct and data texture values).
    pub params: &'a UniformSet,
    /// Input textures in binding order.
    pub inputs: &'a [Binding<'a, T>],
    /// Output target; must not appear among the inputs.
    pub output: &'a T,
}

impl<'a, T> Pass<'a, T> {
    /// Look up an input by binding name.
    pub fn input(&self, name: &str) -> Option<&'a T> {
        self.inputs.iter().find(|b| b.name == name).map(|b| b.texture)
    }
}

/// A device that can allocate float textures and run simulation passes.
pub trait Backend {
    /// Texture handle. External code only ever receives `&Self::Texture`.
    type Texture;

    /// Features of the device.
    fn capabilities(&self) -> Capabilities;

    /// Allocate an uninitialized texture.
    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<Self::Texture, GpuError>;

    /// Release a texture's storage.
    fn destroy_texture(&mut self, texture: Self::Texture);

    /// Upload row-major texels; the slice must cover the whole texture.
    fn write_texture(&mut self, texture: &Self::Texture, texels: &[Vec4]) -> Result<(), GpuError>;

    /// Execute a pass. Reading a never-written input is a resource error.
    fn run_pass(&mut self, pass: &Pass<'_, Self::Texture>) -> Result<(), GpuError>;

    /// Synchronously copy a texture to host memory. Stalls the pipeline.
    fn read_texture(&mut self, texture: &Self::Texture) -> Result<Vec<Vec4>, GpuError>;

    /// Texture dimensions.
    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32);

    /// Whether the device was lost since creation.
    fn is_context_lost(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_uniforms_layout() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 32);
        let frame = FrameUniforms::new(1.0, 0.5, 7, 3, 4);
        assert_eq!(frame.resolution, [3.0, 4.0]);
    }

    #[test]
    fn test_capability_checks() {
        let caps = Capabilities {
            float_render_targets: false,
            max_texture_dimension: 16,
            max_color_attachments: 1,
        };
        assert_eq!(caps.require_float_targets(), Err(CapabilityError::FloatRenderTargets));
        assert_eq!(
            caps.check_size(4, 17),
            Err(CapabilityError::TextureTooLarge { requested: 17, max: 16 })
        );
        assert!(caps.check_size(16, 16).is_ok());
    }
}
