use bytemuck::{Pod, Zeroable};

use crate::{pack_unorm_2x16, LIGHT_COMPACT_BIT, LIGHT_INDEX_MASK};

/// Entry of a presampled light tile.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct PresampledLight {
    pub light_data: u32,
    pub uv_data: u32,
}

impl PresampledLight {
    /// Creates an entry for a local light, optionally marking that its data
    /// lives in the compact light info buffer at the same position.
    pub fn local(light_index: u32, compact: bool) -> Self {
        let compact = if compact { LIGHT_COMPACT_BIT } else { 0 };

        Self {
            light_data: (light_index & LIGHT_INDEX_MASK) | compact,
            uv_data: 0,
        }
    }

    /// Creates an entry for the environment light, pointing at a texel.
    pub fn environment(light_index: u32, uv: glam::Vec2) -> Self {
        Self {
            light_data: light_index & LIGHT_INDEX_MASK,
            uv_data: pack_unorm_2x16(uv),
        }
    }

    pub fn light_index(&self) -> u32 {
        self.light_data & LIGHT_INDEX_MASK
    }

    pub fn is_compact(&self) -> bool {
        self.light_data & LIGHT_COMPACT_BIT != 0
    }
}
