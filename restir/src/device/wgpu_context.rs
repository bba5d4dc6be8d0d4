use std::collections::HashMap;
use std::mem;
use std::ops::Range;
use std::sync::Arc;

use derivative::Derivative;
use glam::UVec2;
use log::{debug, info, warn};

use crate::{
    gpu, BindGroupBuilder, Bindings, BufferDesc, Capability, Defines, Kernel,
    RenderContext, Result, StorageBuffer, TextureDesc,
};

/// Number of resources in [`Bindings`].
const BINDING_COUNT: u32 = 16;

type ShaderLoader = dyn FnMut(&wgpu::Device, &Defines) -> wgpu::ShaderModule;

/// [`RenderContext`] running on `wgpu`.
///
/// Every resource is a storage buffer (textures are stored as flat mip
/// chains of `f32`s) attached to a single bind group shared by all kernels;
/// [`gpu::KernelParams`] travel through push constants.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct WgpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    #[derivative(Debug = "ignore")]
    shader_loader: Box<ShaderLoader>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    placeholders: Vec<StorageBuffer>,
    passes: HashMap<Kernel, KernelPass>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuContext {
    /// Creates the context; `shader_loader` gets called each time kernels
    /// have to be recompiled, and must return a module containing every
    /// [`Kernel::entry_point()`].
    pub fn new<F>(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        shader_loader: F,
    ) -> Self
    where
        F: FnMut(&wgpu::Device, &Defines) -> wgpu::ShaderModule + 'static,
    {
        info!("Initializing wgpu render context");

        // Writable bindings must not alias, so each slot gets its own
        let placeholders: Vec<_> = (0..BINDING_COUNT)
            .map(|_| StorageBuffer::new(&device, "restir_placeholder", 0))
            .collect();

        let bind_group_layout = placeholders
            .iter()
            .fold(BindGroupBuilder::new("resources"), |builder, buffer| {
                builder.add(buffer)
            })
            .build_layout(&device);

        let pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("restir_pipeline_layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[wgpu::PushConstantRange {
                    stages: wgpu::ShaderStages::COMPUTE,
                    range: Range {
                        start: 0,
                        end: mem::size_of::<gpu::KernelParams>() as u32,
                    },
                }],
            });

        Self {
            device,
            queue,
            shader_loader: Box::new(shader_loader),
            bind_group_layout,
            pipeline_layout,
            placeholders,
            passes: Default::default(),
            encoder: None,
        }
    }

    /// Submits everything recorded since the previous submission.
    pub fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit([encoder.finish()]);
        }
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;

        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("restir_commands"),
            })
        })
    }
}

impl RenderContext for WgpuContext {
    type Buffer = StorageBuffer;
    type Texture = WgpuTexture;
    type MotionVectors = StorageBuffer;

    fn is_supported(&self, capability: Capability) -> bool {
        let limits = self.device.limits();

        match capability {
            Capability::KernelParams => {
                self.device
                    .features()
                    .contains(wgpu::Features::PUSH_CONSTANTS)
                    && limits.max_push_constant_size as usize
                        >= mem::size_of::<gpu::KernelParams>()
            }

            Capability::StorageBindings => {
                limits.max_storage_buffers_per_shader_stage >= BINDING_COUNT
            }
        }
    }

    fn create_buffer(&mut self, desc: BufferDesc) -> StorageBuffer {
        StorageBuffer::new(&self.device, desc.label, desc.size as usize)
    }

    fn create_texture(&mut self, desc: TextureDesc) -> WgpuTexture {
        let mut mip_offsets = Vec::with_capacity(desc.mip_count as usize);
        let mut texel_count = 0;

        for mip in 0..desc.mip_count {
            let size = desc.mip_size(mip);

            mip_offsets.push(texel_count);
            texel_count += size.x as u64 * size.y as u64;
        }

        let buffer = StorageBuffer::new(
            &self.device,
            desc.label,
            (texel_count as usize) * mem::size_of::<f32>(),
        );

        WgpuTexture {
            buffer,
            desc,
            mip_offsets,
        }
    }

    fn buffer_len(&self, buffer: &StorageBuffer) -> u64 {
        buffer.len()
    }

    fn texture_desc(&self, texture: &WgpuTexture) -> TextureDesc {
        texture.desc
    }

    fn write_buffer(
        &mut self,
        buffer: &StorageBuffer,
        offset: u64,
        data: &[u8],
    ) {
        buffer.write(&self.queue, offset, data);
    }

    fn write_texture(
        &mut self,
        texture: &WgpuTexture,
        mip: u32,
        data: &[f32],
    ) {
        let Some(&offset) = texture.mip_offsets.get(mip as usize) else {
            warn!(
                "Texture `{}` has no mip {mip}; ignoring write",
                texture.desc.label
            );

            return;
        };

        texture.buffer.write(
            &self.queue,
            offset * mem::size_of::<f32>() as u64,
            bytemuck::cast_slice(data),
        );
    }

    fn clear_buffer(&mut self, buffer: &StorageBuffer) {
        buffer.clear(self.encoder());
    }

    fn clear_texture(&mut self, texture: &WgpuTexture) {
        texture.buffer.clear(self.encoder());
    }

    fn load_kernels(&mut self, defines: &Defines) -> Result<()> {
        info!("Loading kernels; defines={defines:?}");

        let module = (self.shader_loader)(&self.device, defines);

        self.passes = Kernel::ALL
            .into_iter()
            .map(|kernel| {
                let pass = KernelPass::new(
                    &self.device,
                    &self.pipeline_layout,
                    &module,
                    kernel,
                );

                (kernel, pass)
            })
            .collect();

        Ok(())
    }

    fn dispatch(
        &mut self,
        kernel: Kernel,
        threads: UVec2,
        params: gpu::KernelParams,
        bindings: &Bindings<'_, Self>,
    ) {
        let Some(pass) = self.passes.get(&kernel) else {
            warn!("Kernel {kernel:?} is not loaded; skipping dispatch");
            return;
        };

        let resources = [
            bindings.runtime_params,
            bindings.bridge_params,
            bindings.light_info,
            bindings.analytic_light_ids,
            bindings.light_tiles,
            bindings.compact_light_info,
            bindings.reservoirs,
            bindings.neighbor_offsets,
            bindings.surface_data,
            bindings.local_light_pdf.map(|tex| &tex.buffer),
            bindings.env_light_luminance.map(|tex| &tex.buffer),
            bindings.env_light_pdf.map(|tex| &tex.buffer),
            bindings.env_alias_table,
            bindings.emissive_alias_table,
            bindings.analytic_alias_table,
            bindings.motion_vectors,
        ];

        let bind_group = resources
            .into_iter()
            .zip(&self.placeholders)
            .fold(
                BindGroupBuilder::new(kernel.entry_point()),
                |builder, (resource, placeholder)| {
                    builder.add(resource.unwrap_or(placeholder))
                },
            )
            .build(&self.device, &self.bind_group_layout);

        let device = &self.device;

        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("restir_commands"),
            })
        });

        pass.run(
            encoder,
            &bind_group,
            kernel.workgroup_count(threads),
            params,
        );
    }
}

/// Single-channel texture stored as a flat mip chain of `f32`s.
#[derive(Debug)]
pub struct WgpuTexture {
    buffer: StorageBuffer,
    desc: TextureDesc,
    mip_offsets: Vec<u64>,
}

#[derive(Debug)]
struct KernelPass {
    label: String,
    pipeline: wgpu::ComputePipeline,
}

impl KernelPass {
    fn new(
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        module: &wgpu::ShaderModule,
        kernel: Kernel,
    ) -> Self {
        let entry_point = kernel.entry_point();

        debug!("Initializing pass: {entry_point}");

        let label = format!("restir_{entry_point}_pipeline");

        let pipeline =
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&label),
                layout: Some(layout),
                module,
                entry_point,
                compilation_options: wgpu::PipelineCompilationOptions {
                    zero_initialize_workgroup_memory: false,
                    ..Default::default()
                },
                cache: None,
            });

        Self {
            label: format!("restir_{entry_point}_pass"),
            pipeline,
        }
    }

    fn run(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        bind_group: &wgpu::BindGroup,
        workgroups: UVec2,
        params: gpu::KernelParams,
    ) {
        let mut pass =
            encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.label),
                timestamp_writes: None,
            });

        pass.set_pipeline(&self.pipeline);
        pass.set_push_constants(0, bytemuck::bytes_of(&params));
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(workgroups.x, workgroups.y, 1);
    }
}
