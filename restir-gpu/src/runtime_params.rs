use bytemuck::{Pod, Zeroable};

/// Per-frame parameters consumed by every resampling kernel.
///
/// Layout is 20 consecutive 32-bit words; keep it that way.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct RuntimeParams {
    pub first_local_light: u32,
    pub num_local_lights: u32,
    pub first_infinite_light: u32,
    pub num_infinite_lights: u32,

    pub environment_light_present: u32,
    pub environment_light_index: u32,
    pub tile_size: u32,
    pub tile_count: u32,

    pub active_checkerboard_field: u32,
    pub enable_local_light_importance_sampling: u32,
    pub reservoir_block_row_pitch: u32,
    pub reservoir_array_pitch: u32,

    pub environment_ris_buffer_offset: u32,
    pub environment_tile_size: u32,
    pub environment_tile_count: u32,
    pub neighbor_offset_mask: u32,

    pub uniform_random_number: u32,
    pub pad1: u32,
    pub pad2: u32,
    pub pad3: u32,
}

impl RuntimeParams {
    pub fn has_environment_light(&self) -> bool {
        self.environment_light_present != 0
    }

    /// Returns the position of the `n`-th neighbor offset, wrapping around
    /// the offset table.
    pub fn neighbor_offset_slot(&self, n: u32) -> u32 {
        n & self.neighbor_offset_mask
    }
}

const _: () = assert!(core::mem::size_of::<RuntimeParams>() == 80);
