//! Headless reference backend.
//!
//! Textures are host vectors keyed by handle id. Passes run the built-in
//! programs through [`super::kernels`], which mirror the composed WGSL.
//! Fault injection hooks (allocation failure, context loss, failed passes
//! and readbacks) make the error paths of the simulation testable.

use std::collections::HashMap;

use glam::Vec4;
use tracing::debug;

use super::kernels::{self, Sampled};
use super::{Backend, Capabilities, Pass, TextureDescriptor};
use crate::error::{GpuError, ResourceError};

/// Handle to a texture owned by a [`CpuBackend`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CpuTexture {
    id: u64,
    width: u32,
    height: u32,
}

impl CpuTexture {
    /// Unique id of this handle within its backend.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct Storage {
    label: String,
    texels: Vec<Vec4>,
    uploaded: bool,
}

/// Host-memory implementation of [`Backend`].
pub struct CpuBackend {
    capabilities: Capabilities,
    textures: HashMap<u64, Storage>,
    next_id: u64,
    allocations_left: Option<usize>,
    pending_pass_failure: Option<ResourceError>,
    fail_readbacks: bool,
    lost: bool,
    passes_run: u64,
    readbacks: u64,
}

impl CpuBackend {
    /// Backend with default capabilities.
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::default())
    }

    /// Backend reporting the given capabilities.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            textures: HashMap::new(),
            next_id: 1,
            allocations_left: None,
            pending_pass_failure: None,
            fail_readbacks: false,
            lost: false,
            passes_run: 0,
            readbacks: 0,
        }
    }

    /// Let `n` more allocations succeed, then fail every further one.
    pub fn fail_allocations_after(&mut self, n: usize) {
        self.allocations_left = Some(n);
    }

    /// Make the next pass fail with `error` without touching its output.
    pub fn fail_next_pass(&mut self, error: ResourceError) {
        self.pending_pass_failure = Some(error);
    }

    /// Make readbacks fail as if the source target were incomplete.
    pub fn set_readback_failure(&mut self, fail: bool) {
        self.fail_readbacks = fail;
    }

    /// Simulate device loss: every texture becomes invalid.
    pub fn lose_context(&mut self) {
        self.textures.clear();
        self.lost = true;
    }

    /// Make the device usable again (textures stay lost).
    pub fn restore_context(&mut self) {
        self.lost = false;
        self.allocations_left = None;
    }

    /// Number of textures currently allocated.
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Number of passes executed successfully.
    pub fn passes_run(&self) -> u64 {
        self.passes_run
    }

    /// Number of readbacks performed.
    pub fn readbacks(&self) -> u64 {
        self.readbacks
    }

    fn storage(&self, texture: &CpuTexture) -> Result<&Storage, GpuError> {
        self.textures
            .get(&texture.id)
            .ok_or(GpuError::Resource(ResourceError::UnknownTexture))
    }

    fn sample(&self, texture: &CpuTexture) -> Result<Sampled, GpuError> {
        let storage = self.storage(texture)?;
        if !storage.uploaded {
            return Err(ResourceError::TextureNotUploaded(storage.label.clone()).into());
        }
        Ok(Sampled::new(texture.width, texture.height, storage.texels.clone()))
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type Texture = CpuTexture;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<CpuTexture, GpuError> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        self.capabilities.check_size(desc.width, desc.height)?;
        if let Some(left) = self.allocations_left.as_mut() {
            if *left == 0 {
                return Err(ResourceError::AllocationFailed(desc.label.clone()).into());
            }
            *left -= 1;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.textures.insert(
            id,
            Storage {
                label: desc.label.clone(),
                texels: vec![Vec4::ZERO; desc.texel_count()],
                uploaded: false,
            },
        );
        Ok(CpuTexture {
            id,
            width: desc.width,
            height: desc.height,
        })
    }

    fn destroy_texture(&mut self, texture: CpuTexture) {
        self.textures.remove(&texture.id);
    }

    fn write_texture(&mut self, texture: &CpuTexture, texels: &[Vec4]) -> Result<(), GpuError> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        let storage = self
            .textures
            .get_mut(&texture.id)
            .ok_or(GpuError::Resource(ResourceError::UnknownTexture))?;
        if texels.len() != storage.texels.len() {
            return Err(GpuError::BufferMapping(format!(
                "'{}' holds {} texels, got {}",
                storage.label,
                storage.texels.len(),
                texels.len()
            )));
        }
        storage.texels.copy_from_slice(texels);
        storage.uploaded = true;
        Ok(())
    }

    fn run_pass(&mut self, pass: &Pass<'_, CpuTexture>) -> Result<(), GpuError> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        if let Some(error) = self.pending_pass_failure.take() {
            return Err(error.into());
        }

        let output_label = self.storage(pass.output)?.label.clone();
        let mut inputs = HashMap::with_capacity(pass.inputs.len());
        for binding in pass.inputs {
            if binding.texture.id == pass.output.id {
                // Reading and writing the same target is a feedback loop
                return Err(ResourceError::IncompleteTarget(output_label).into());
            }
            inputs.insert(binding.name, self.sample(binding.texture)?);
        }

        let texels = kernels::execute(
            pass.program,
            &kernels::KernelContext {
                frame: &pass.frame,
                params: pass.params,
                inputs: &inputs,
            },
            pass.output.width,
            pass.output.height,
        )?;

        let storage = self
            .textures
            .get_mut(&pass.output.id)
            .ok_or(GpuError::Resource(ResourceError::UnknownTexture))?;
        storage.texels = texels;
        storage.uploaded = true;
        self.passes_run += 1;
        debug!(pass = pass.label, "cpu pass complete");
        Ok(())
    }

    fn read_texture(&mut self, texture: &CpuTexture) -> Result<Vec<Vec4>, GpuError> {
        if self.lost {
            return Err(GpuError::ContextLost);
        }
        let storage = self.storage(texture)?;
        if self.fail_readbacks {
            return Err(ResourceError::IncompleteTarget(storage.label.clone()).into());
        }
        let texels = storage.texels.clone();
        self.readbacks += 1;
        Ok(texels)
    }

    fn texture_size(&self, texture: &CpuTexture) -> (u32, u32) {
        (texture.width, texture.height)
    }

    fn is_context_lost(&self) -> bool {
        self.lost
    }
}
