//! Error types for trailsim.
//!
//! Errors fall into four groups:
//!
//! - **Capability** errors ([`CapabilityError`]) - a required GPU feature is
//!   missing. Fatal at initialization, never retried.
//! - **Resource** errors ([`ResourceError`]) - a target is incomplete or a
//!   texture has not been uploaded yet. Recovered locally by skipping the
//!   dependent operation for one frame.
//! - **Contract** errors ([`BehaviorError`], index queries returning `None`) -
//!   rejected at the call that introduced them.
//! - **Context loss** ([`GpuError::ContextLost`]) - every texture is invalid
//!   and must be reallocated from stored descriptors.

use std::fmt;

/// A required GPU feature is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The adapter cannot render into `Rgba32Float` targets.
    FloatRenderTargets,
    /// A texture would exceed the device's maximum 2D dimension.
    TextureTooLarge {
        /// Requested width or height.
        requested: u32,
        /// Device limit.
        max: u32,
    },
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityError::FloatRenderTargets => write!(
                f,
                "GPU does not support rendering to 32-bit float textures; refusing to run at reduced precision"
            ),
            CapabilityError::TextureTooLarge { requested, max } => write!(
                f,
                "Texture dimension {} exceeds device maximum {}",
                requested, max
            ),
        }
    }
}

impl std::error::Error for CapabilityError {}

/// A GPU resource is not usable this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A texture was bound as input before any data was written to it.
    TextureNotUploaded(String),
    /// The render target could not be attached (incomplete framebuffer).
    IncompleteTarget(String),
    /// The texture handle does not belong to this backend (or was destroyed).
    UnknownTexture,
    /// Allocation of a texture failed.
    AllocationFailed(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::TextureNotUploaded(label) => {
                write!(f, "Texture '{}' has not been uploaded", label)
            }
            ResourceError::IncompleteTarget(label) => {
                write!(f, "Render target '{}' is incomplete", label)
            }
            ResourceError::UnknownTexture => write!(f, "Unknown or destroyed texture handle"),
            ResourceError::AllocationFailed(label) => {
                write!(f, "Failed to allocate texture '{}'", label)
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Errors raised by a [`Backend`](crate::gpu::Backend).
#[derive(Debug)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    NoAdapter,
    /// Failed to create GPU device.
    DeviceCreation(wgpu::RequestDeviceError),
    /// A required feature is missing.
    Capability(CapabilityError),
    /// A generated or custom shader failed to compile.
    ShaderCompilation {
        /// Label of the pass whose shader failed.
        label: String,
        /// Compiler message.
        message: String,
    },
    /// A resource is not usable this frame.
    Resource(ResourceError),
    /// Failed to map buffer for reading.
    BufferMapping(String),
    /// The device was lost; all textures are invalid.
    ContextLost,
    /// The backend cannot execute this program.
    Unsupported(String),
}

impl GpuError {
    /// Whether the error should only skip the current frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, GpuError::Resource(_))
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::NoAdapter => write!(f, "No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support."),
            GpuError::DeviceCreation(e) => write!(f, "Failed to create GPU device: {}", e),
            GpuError::Capability(e) => write!(f, "Missing GPU capability: {}", e),
            GpuError::ShaderCompilation { label, message } => {
                write!(f, "Shader for pass '{}' failed to compile: {}", label, message)
            }
            GpuError::Resource(e) => write!(f, "GPU resource error: {}", e),
            GpuError::BufferMapping(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
            GpuError::ContextLost => write!(f, "GPU context lost"),
            GpuError::Unsupported(msg) => write!(f, "Unsupported on this backend: {}", msg),
        }
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GpuError::DeviceCreation(e) => Some(e),
            GpuError::Capability(e) => Some(e),
            GpuError::Resource(e) => Some(e),
            _ => None,
        }
    }
}

impl From<wgpu::RequestDeviceError> for GpuError {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        GpuError::DeviceCreation(e)
    }
}

impl From<CapabilityError> for GpuError {
    fn from(e: CapabilityError) -> Self {
        GpuError::Capability(e)
    }
}

impl From<ResourceError> for GpuError {
    fn from(e: ResourceError) -> Self {
        GpuError::Resource(e)
    }
}

/// A behavior or uniform set violates the driver contract.
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorError {
    /// The name is reserved by the simulation driver.
    ReservedUniform(String),
    /// The name is not a valid WGSL identifier.
    InvalidUniformName(String),
    /// The same name was declared twice.
    DuplicateUniform(String),
    /// Data texture dimensions do not match its texel count.
    TextureSize {
        /// Texture name.
        name: String,
        /// Texels expected from width * height.
        expected: usize,
        /// Texels supplied.
        actual: usize,
    },
    /// A per-particle data texture does not match the particle grid.
    TextureGrid {
        /// Texture name.
        name: String,
        /// Grid of the particle state textures.
        expected: (u32, u32),
        /// Grid the texture was laid out for.
        actual: (u32, u32),
    },
    /// A frame override has a different type than the declared uniform.
    UniformTypeMismatch {
        /// Uniform name.
        name: String,
        /// Declared WGSL type.
        expected: &'static str,
        /// Supplied WGSL type.
        actual: &'static str,
    },
}

impl fmt::Display for BehaviorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BehaviorError::ReservedUniform(name) => {
                write!(f, "Uniform name '{}' is reserved by the simulation driver", name)
            }
            BehaviorError::InvalidUniformName(name) => {
                write!(f, "Uniform name '{}' is not a valid WGSL identifier", name)
            }
            BehaviorError::DuplicateUniform(name) => {
                write!(f, "Uniform '{}' is declared more than once", name)
            }
            BehaviorError::TextureSize { name, expected, actual } => write!(
                f,
                "Data texture '{}' expects {} texels but {} were supplied",
                name, expected, actual
            ),
            BehaviorError::TextureGrid { name, expected, actual } => write!(
                f,
                "Per-particle texture '{}' is {}x{} but the particle grid is {}x{}",
                name, actual.0, actual.1, expected.0, expected.1
            ),
            BehaviorError::UniformTypeMismatch { name, expected, actual } => write!(
                f,
                "Uniform '{}' is declared as {} but was given {}",
                name, expected, actual
            ),
        }
    }
}

impl std::error::Error for BehaviorError {}

/// Errors from the particle simulation driver.
#[derive(Debug)]
pub enum SimulationError {
    /// Particle count must be greater than zero.
    InvalidCount,
    /// The operation is not valid in the current driver state.
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the driver is in.
        actual: &'static str,
    },
    /// Seed data length does not match the particle count.
    SeedMismatch {
        /// Particle count.
        count: u32,
        /// Supplied position seeds.
        positions: usize,
        /// Supplied velocity seeds.
        velocities: usize,
    },
    /// Behavior contract violation.
    Behavior(BehaviorError),
    /// Backend failure.
    Gpu(GpuError),
    /// The GPU context was lost; call `recover` before stepping again.
    ContextLost,
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::InvalidCount => write!(f, "Particle count must be greater than zero"),
            SimulationError::InvalidState { expected, actual } => write!(
                f,
                "Simulation is {} but the operation requires {}",
                actual, expected
            ),
            SimulationError::SeedMismatch { count, positions, velocities } => write!(
                f,
                "Expected {} seeds, got {} positions and {} velocities",
                count, positions, velocities
            ),
            SimulationError::Behavior(e) => write!(f, "Behavior error: {}", e),
            SimulationError::Gpu(e) => write!(f, "GPU error: {}", e),
            SimulationError::ContextLost => {
                write!(f, "GPU context lost; textures must be reallocated")
            }
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::Behavior(e) => Some(e),
            SimulationError::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BehaviorError> for SimulationError {
    fn from(e: BehaviorError) -> Self {
        SimulationError::Behavior(e)
    }
}

impl From<GpuError> for SimulationError {
    fn from(e: GpuError) -> Self {
        match e {
            GpuError::ContextLost => SimulationError::ContextLost,
            other => SimulationError::Gpu(other),
        }
    }
}

/// Errors from the trail system.
#[derive(Debug)]
pub enum TrailError {
    /// Trail count, node count or distance threshold is invalid.
    InvalidConfig(String),
    /// The update source does not match how the system was created.
    SourceMismatch(String),
    /// The system was disposed or lost its textures.
    Released,
    /// Backend failure.
    Gpu(GpuError),
}

impl fmt::Display for TrailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrailError::InvalidConfig(msg) => write!(f, "Invalid trail configuration: {}", msg),
            TrailError::SourceMismatch(msg) => write!(f, "Trail source mismatch: {}", msg),
            TrailError::Released => write!(f, "Trail textures are released; recover or recreate the system"),
            TrailError::Gpu(e) => write!(f, "GPU error: {}", e),
        }
    }
}

impl std::error::Error for TrailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrailError::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GpuError> for TrailError {
    fn from(e: GpuError) -> Self {
        TrailError::Gpu(e)
    }
}

/// Errors from the readback request queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadbackError {
    /// Too many requests are pending; try again after the queue is serviced.
    QueueFull {
        /// Maximum pending requests.
        capacity: usize,
    },
}

impl fmt::Display for ReadbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadbackError::QueueFull { capacity } => {
                write!(f, "Readback queue is full ({} pending)", capacity)
            }
        }
    }
}

impl std::error::Error for ReadbackError {}

/// Errors loading or validating a [`SimConfig`](crate::config::SimConfig).
#[derive(Debug)]
pub enum ConfigError {
    /// JSON could not be parsed.
    Parse(serde_json::Error),
    /// A field holds an unusable value.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}
