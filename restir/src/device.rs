#[cfg(feature = "wgpu")]
mod wgpu_context;

use std::fmt;

use glam::{uvec2, UVec2};

#[cfg(feature = "wgpu")]
pub use self::wgpu_context::*;
use crate::{gpu, Result};

/// Feature of the render context the resampler can't work without.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Small per-dispatch parameter blocks ([`gpu::KernelParams`])
    KernelParams,
    /// Enough read-write storage bindings to attach every resource at once
    StorageBindings,
}

impl Capability {
    pub const ALL: [Self; 2] = [Self::KernelParams, Self::StorageBindings];
}

/// Compute kernel provided by the shader module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    UpdateLights,
    BuildLocalLightPdfMip,
    PresampleLocalLights,
    PresampleEnvLight,
    GenerateCandidates,
    TestCandidateVisibility,
    SpatialResampling,
    TemporalResampling,
    SpatiotemporalResampling,
}

impl Kernel {
    pub const ALL: [Self; 9] = [
        Self::UpdateLights,
        Self::BuildLocalLightPdfMip,
        Self::PresampleLocalLights,
        Self::PresampleEnvLight,
        Self::GenerateCandidates,
        Self::TestCandidateVisibility,
        Self::SpatialResampling,
        Self::TemporalResampling,
        Self::SpatiotemporalResampling,
    ];

    pub fn entry_point(self) -> &'static str {
        match self {
            Self::UpdateLights => "update_lights",
            Self::BuildLocalLightPdfMip => "build_local_light_pdf_mip",
            Self::PresampleLocalLights => "presample_local_lights",
            Self::PresampleEnvLight => "presample_env_light",
            Self::GenerateCandidates => "generate_candidates",
            Self::TestCandidateVisibility => "test_candidate_visibility",
            Self::SpatialResampling => "spatial_resampling",
            Self::TemporalResampling => "temporal_resampling",
            Self::SpatiotemporalResampling => "spatiotemporal_resampling",
        }
    }

    /// Number of threads in a single workgroup of this kernel.
    pub fn workgroup_size(self) -> UVec2 {
        match self {
            Self::UpdateLights
            | Self::PresampleLocalLights
            | Self::PresampleEnvLight => uvec2(256, 1),

            _ => uvec2(16, 16),
        }
    }

    /// Number of workgroups needed to cover given number of threads.
    pub fn workgroup_count(self, threads: UVec2) -> UVec2 {
        let size = self.workgroup_size();

        uvec2(threads.x.div_ceil(size.x), threads.y.div_ceil(size.y))
    }
}

/// Preprocessor-style definitions the kernels get compiled with.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Defines {
    items: Vec<(String, String)>,
}

impl Defines {
    pub fn add(&mut self, name: impl ToString, value: impl ToString) {
        let name = name.to_string();
        let value = value.to_string();

        if let Some(item) = self.items.iter_mut().find(|(n, _)| *n == name) {
            item.1 = value;
        } else {
            self.items.push((name, value));
        }
    }

    pub fn with(mut self, name: impl ToString, value: impl ToString) -> Self {
        self.add(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.items
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Debug for Defines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    R16Float,
    R32Float,
}

/// Single-channel 2D texture with an optional mip chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: &'static str,
    pub size: UVec2,
    pub mip_count: u32,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn mip_size(&self, mip: u32) -> UVec2 {
        (self.size >> mip).max(UVec2::ONE)
    }

    /// Number of texels across all mips.
    pub fn texel_count(&self) -> u64 {
        (0..self.mip_count)
            .map(|mip| {
                let size = self.mip_size(mip);

                size.x as u64 * size.y as u64
            })
            .sum()
    }
}

/// GPU API the resampler gets executed on.
///
/// Resources are opaque handles owned by the implementor; the resampler only
/// creates them, fills them and passes them around to kernels.
pub trait RenderContext {
    type Buffer;
    type Texture;
    type MotionVectors: ?Sized;

    fn is_supported(&self, capability: Capability) -> bool;

    fn create_buffer(&mut self, desc: BufferDesc) -> Self::Buffer;

    fn create_texture(&mut self, desc: TextureDesc) -> Self::Texture;

    fn buffer_len(&self, buffer: &Self::Buffer) -> u64;

    fn texture_desc(&self, texture: &Self::Texture) -> TextureDesc;

    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Uploads a whole mip level, row-major.
    fn write_texture(
        &mut self,
        texture: &Self::Texture,
        mip: u32,
        data: &[f32],
    );

    fn clear_buffer(&mut self, buffer: &Self::Buffer);

    fn clear_texture(&mut self, texture: &Self::Texture);

    /// (Re)compiles all kernels with given definitions.
    fn load_kernels(&mut self, defines: &Defines) -> Result<()>;

    /// Runs given kernel over `threads` threads.
    fn dispatch(
        &mut self,
        kernel: Kernel,
        threads: UVec2,
        params: gpu::KernelParams,
        bindings: &Bindings<'_, Self>,
    );
}

/// Every resource kernels may access; absent ones are `None`.
pub struct Bindings<'a, C>
where
    C: RenderContext + ?Sized,
{
    pub runtime_params: Option<&'a C::Buffer>,
    pub bridge_params: Option<&'a C::Buffer>,
    pub light_info: Option<&'a C::Buffer>,
    pub analytic_light_ids: Option<&'a C::Buffer>,
    pub light_tiles: Option<&'a C::Buffer>,
    pub compact_light_info: Option<&'a C::Buffer>,
    pub reservoirs: Option<&'a C::Buffer>,
    pub neighbor_offsets: Option<&'a C::Buffer>,
    pub surface_data: Option<&'a C::Buffer>,
    pub local_light_pdf: Option<&'a C::Texture>,
    pub env_light_luminance: Option<&'a C::Texture>,
    pub env_light_pdf: Option<&'a C::Texture>,
    pub env_alias_table: Option<&'a C::Buffer>,
    pub emissive_alias_table: Option<&'a C::Buffer>,
    pub analytic_alias_table: Option<&'a C::Buffer>,
    pub motion_vectors: Option<&'a C::MotionVectors>,
}

impl<C> Default for Bindings<'_, C>
where
    C: RenderContext + ?Sized,
{
    fn default() -> Self {
        Self {
            runtime_params: None,
            bridge_params: None,
            light_info: None,
            analytic_light_ids: None,
            light_tiles: None,
            compact_light_info: None,
            reservoirs: None,
            neighbor_offsets: None,
            surface_data: None,
            local_light_pdf: None,
            env_light_luminance: None,
            env_light_pdf: None,
            env_alias_table: None,
            emissive_alias_table: None,
            analytic_alias_table: None,
            motion_vectors: None,
        }
    }
}
