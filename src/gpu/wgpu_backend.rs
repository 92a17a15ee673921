//! wgpu implementation of [`Backend`].
//!
//! Each pass is a full-screen triangle rendered into one `Rgba32Float`
//! target. Pipelines are compiled once per distinct WGSL source and cached.
//! Every pass is submitted on its own, so the uniform buffers a pass reads
//! can never be overwritten by a later pass of the same frame.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use glam::Vec4;
use tracing::{debug, info, warn};
use wgpu::util::DeviceExt;

use super::{Backend, Capabilities, Pass, TexelFormat, TextureDescriptor};
use crate::error::{CapabilityError, GpuError, ResourceError};

/// Handle to a texture owned by a [`GpuBackend`].
#[derive(Debug)]
pub struct GpuTexture {
    id: u64,
    label: String,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl GpuTexture {
    /// View for binding the texture in host render pipelines.
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Underlying wgpu texture.
    pub fn raw(&self) -> &wgpu::Texture {
        &self.texture
    }
}

struct CachedPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

/// Headless wgpu device running simulation passes.
pub struct GpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: Capabilities,
    pipelines: HashMap<u64, CachedPipeline>,
    uploaded: HashSet<u64>,
    next_id: u64,
    lost: Arc<AtomicBool>,
}

impl GpuBackend {
    /// Request a high-performance adapter and device.
    ///
    /// Fails with [`CapabilityError::FloatRenderTargets`] before any device
    /// is created when the adapter cannot render to `Rgba32Float`.
    pub fn new() -> Result<Self, GpuError> {
        pollster::block_on(Self::new_async())
    }

    /// Async form of [`new`](Self::new).
    pub async fn new_async() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let capabilities = Self::probe(&adapter);
        capabilities.require_float_targets()?;

        let (device, queue) = Self::request_device(&adapter).await?;
        let info = adapter.get_info();
        info!(adapter = %info.name, backend = ?info.backend, "GPU backend ready");

        let mut backend = Self {
            adapter,
            device,
            queue,
            capabilities,
            pipelines: HashMap::new(),
            uploaded: HashSet::new(),
            next_id: 1,
            lost: Arc::new(AtomicBool::new(false)),
        };
        backend.watch_device_loss();
        Ok(backend)
    }

    fn probe(adapter: &wgpu::Adapter) -> Capabilities {
        let features = adapter.get_texture_format_features(TexelFormat::Rgba32Float.to_wgpu());
        let limits = adapter.limits();
        Capabilities {
            float_render_targets: features
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT),
            max_texture_dimension: limits.max_texture_dimension_2d,
            max_color_attachments: limits.max_color_attachments,
        }
    }

    async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), GpuError> {
        let limits = adapter.limits();
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Simulation Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: limits.max_texture_dimension_2d,
                        ..wgpu::Limits::default()
                    },
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;
        Ok((device, queue))
    }

    fn watch_device_loss(&mut self) {
        let lost = Arc::clone(&self.lost);
        self.device.set_device_lost_callback(move |reason, message| {
            warn!(?reason, %message, "GPU device lost");
            lost.store(true, Ordering::SeqCst);
        });
    }

    /// Replace a lost device with a fresh one from the same adapter.
    ///
    /// Every texture handed out before is invalid afterwards; owners rebuild
    /// them from their descriptors.
    pub fn reset_device(&mut self) -> Result<(), GpuError> {
        let (device, queue) = pollster::block_on(Self::request_device(&self.adapter))?;
        self.device = device;
        self.queue = queue;
        self.pipelines.clear();
        self.uploaded.clear();
        self.lost = Arc::new(AtomicBool::new(false));
        self.watch_device_loss();
        info!("GPU device reset");
        Ok(())
    }

    /// Device, for hosts that render the simulation textures themselves.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Queue shared with the host.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Compile the pass pipeline if needed and return its cache key.
    fn pipeline(&mut self, pass: &Pass<'_, GpuTexture>) -> Result<u64, GpuError> {
        let mut hasher = DefaultHasher::new();
        pass.source.hash(&mut hasher);
        pass.inputs.len().hash(&mut hasher);
        let key = hasher.finish();

        if !self.pipelines.contains_key(&key) {
            let compiled = self.compile(pass)?;
            debug!(pass = pass.label, "compiled pass pipeline");
            self.pipelines.insert(key, compiled);
        }
        Ok(key)
    }

    fn compile(&self, pass: &Pass<'_, GpuTexture>) -> Result<CachedPipeline, GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(pass.label),
            source: wgpu::ShaderSource::Wgsl(pass.source.into()),
        });

        let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let mut entries = vec![uniform_entry(0), uniform_entry(1)];
        for i in 0..pass.inputs.len() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: i as u32 + 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(pass.label),
            entries: &entries,
        });

        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(pass.label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(pass.label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TexelFormat::Rgba32Float.to_wgpu(),
                    blend: None, // Float targets are not blendable
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::ShaderCompilation {
                label: pass.label.to_string(),
                message: error.to_string(),
            });
        }
        Ok(CachedPipeline { pipeline, layout })
    }

    fn check_live(&self) -> Result<(), GpuError> {
        if self.lost.load(Ordering::SeqCst) {
            Err(GpuError::ContextLost)
        } else {
            Ok(())
        }
    }
}

impl Backend for GpuBackend {
    type Texture = GpuTexture;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<GpuTexture, GpuError> {
        self.check_live()?;
        self.capabilities.check_size(desc.width, desc.height)?;
        if !self.capabilities.float_render_targets {
            return Err(CapabilityError::FloatRenderTargets.into());
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.to_wgpu(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            texture.destroy();
            return Err(ResourceError::AllocationFailed(desc.label.clone()).into());
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.next_id;
        self.next_id += 1;
        Ok(GpuTexture {
            id,
            label: desc.label.clone(),
            texture,
            view,
            width: desc.width,
            height: desc.height,
        })
    }

    fn destroy_texture(&mut self, texture: GpuTexture) {
        self.uploaded.remove(&texture.id);
        texture.texture.destroy();
    }

    fn write_texture(&mut self, texture: &GpuTexture, texels: &[Vec4]) -> Result<(), GpuError> {
        self.check_live()?;
        let expected = texture.width as usize * texture.height as usize;
        if texels.len() != expected {
            return Err(GpuError::BufferMapping(format!(
                "'{}' holds {} texels, got {}",
                texture.label,
                expected,
                texels.len()
            )));
        }
        let bytes_per_texel = TexelFormat::Rgba32Float.bytes_per_texel();
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(texture.width * bytes_per_texel),
                rows_per_image: Some(texture.height),
            },
            wgpu::Extent3d {
                width: texture.width,
                height: texture.height,
                depth_or_array_layers: 1,
            },
        );
        self.uploaded.insert(texture.id);
        Ok(())
    }

    fn run_pass(&mut self, pass: &Pass<'_, GpuTexture>) -> Result<(), GpuError> {
        self.check_live()?;
        for binding in pass.inputs {
            if binding.texture.id == pass.output.id {
                return Err(ResourceError::IncompleteTarget(pass.output.label.clone()).into());
            }
            if !self.uploaded.contains(&binding.texture.id) {
                return Err(ResourceError::TextureNotUploaded(binding.texture.label.clone()).into());
            }
        }

        let frame_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Frame Uniforms"),
            contents: bytemuck::bytes_of(&pass.frame),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let params_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Pass Params"),
            contents: &pass.params.to_bytes(),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let key = self.pipeline(pass)?;
        let cached = self
            .pipelines
            .get(&key)
            .ok_or_else(|| GpuError::Unsupported("pipeline cache miss".into()))?;
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: params_buffer.as_entire_binding(),
            },
        ];
        for (i, binding) in pass.inputs.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32 + 2,
                resource: wgpu::BindingResource::TextureView(&binding.texture.view),
            });
        }
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(pass.label),
            layout: &cached.layout,
            entries: &entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(pass.label),
        });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(pass.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &pass.output.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&cached.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.uploaded.insert(pass.output.id);
        Ok(())
    }

    fn read_texture(&mut self, texture: &GpuTexture) -> Result<Vec<Vec4>, GpuError> {
        self.check_live()?;
        let bytes_per_texel = TexelFormat::Rgba32Float.bytes_per_texel();
        let unpadded = texture.width * bytes_per_texel;
        // Rows in the staging buffer must be aligned to COPY_BYTES_PER_ROW_ALIGNMENT (256)
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size: padded as u64 * texture.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(texture.height),
                },
            },
            wgpu::Extent3d {
                width: texture.width,
                height: texture.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;
        self.check_live()?;

        let mut texels = Vec::with_capacity(texture.width as usize * texture.height as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded as usize) {
                texels.extend(
                    row[..unpadded as usize]
                        .chunks_exact(bytes_per_texel as usize)
                        .map(|c| Vec4::from_array(bytemuck::pod_read_unaligned::<[f32; 4]>(c))),
                );
            }
        }
        staging.unmap();
        Ok(texels)
    }

    fn texture_size(&self, texture: &GpuTexture) -> (u32, u32) {
        (texture.width, texture.height)
    }

    fn is_context_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}
