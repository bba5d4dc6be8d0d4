use std::sync::Arc;

use log::info;

use crate::{pad_size, Bindable};

/// Read-write storage buffer living in VRAM, filled through the queue.
#[derive(Clone, Debug)]
pub struct StorageBuffer {
    buffer: Arc<wgpu::Buffer>,
    len: u64,
}

impl StorageBuffer {
    pub fn new(
        device: &wgpu::Device,
        label: impl AsRef<str>,
        size: usize,
    ) -> Self {
        let label = label.as_ref();
        let padded_size = pad_size(size);

        info!(
            "Allocating storage buffer `{label}`; size={padded_size} (padded from {size})"
        );

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            size: padded_size as _,
            mapped_at_creation: false,
        });

        Self {
            buffer: Arc::new(buffer),
            len: size as u64,
        }
    }

    /// Size requested at creation, before padding.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write(&self, queue: &wgpu::Queue, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        // Queue writes must be 4-byte aligned
        if data.len() % 4 == 0 {
            queue.write_buffer(&self.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();

            padded.resize(data.len().next_multiple_of(4), 0);
            queue.write_buffer(&self.buffer, offset, &padded);
        }
    }

    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.clear_buffer(&self.buffer, 0, None);
    }
}

impl Bindable for StorageBuffer {
    fn bind(
        &self,
        binding: u32,
    ) -> Vec<(wgpu::BindGroupLayoutEntry, wgpu::BindingResource)> {
        let layout = wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let resource = self.buffer.as_entire_binding();

        vec![(layout, resource)]
    }
}
