use bytemuck::{Pod, Zeroable};
use glam::Vec4;

/// Push constants passed to each kernel dispatch.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct KernelParams {
    pub input_reservoir: u32,
    pub output_reservoir: u32,
    pub temporal_reservoir: u32,
    pub mip_level: u32,
    pub dispatch_width: u32,
    pub dispatch_height: u32,
    pub update_flags: u32,
    pub spatial_iteration: u32,
    /// Resampling chain the dispatch works on, see
    /// [`crate::pass_array_index()`]
    pub restir_pass: u32,
}

impl KernelParams {
    pub const UPDATE_EMISSIVE_LIGHTS: u32 = 1 << 0;
    pub const UPDATE_EMISSIVE_FLUX: u32 = 1 << 1;
    pub const UPDATE_ANALYTIC_LIGHTS: u32 = 1 << 2;
    pub const UPDATE_ANALYTIC_FLUX: u32 = 1 << 3;
    pub const UPDATE_ENV_LIGHT: u32 = 1 << 4;
}

/// Everything the kernels read about the current frame besides
/// [`crate::RuntimeParams`].
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct BridgeParams {
    /// Previous frame's camera basis; `w` components unused
    pub prev_camera_u: Vec4,
    pub prev_camera_v: Vec4,
    pub prev_camera_w: Vec4,
    /// xy = previous frame's jitter
    pub prev_camera_jitter: Vec4,
    /// x = environment, y = emissive, z = analytic
    pub light_selection_probabilities: Vec4,

    pub frame_index: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub ray_epsilon: f32,

    pub current_surface_buffer: u32,
    pub previous_surface_buffer: u32,
    pub store_compact_light_info: u32,
    pub use_emissive_textures: u32,

    pub local_light_candidate_count: u32,
    pub infinite_light_candidate_count: u32,
    pub env_light_candidate_count: u32,
    pub brdf_candidate_count: u32,

    pub brdf_cutoff: f32,
    pub bias_correction: u32,
    pub depth_threshold: f32,
    pub normal_threshold: f32,

    pub sampling_radius: f32,
    pub spatial_sample_count: u32,
    pub max_history_length: u32,
    pub boiling_filter_strength: f32,

    pub enable_visibility_shortcut: u32,
    pub enable_permutation_sampling: u32,
    pub final_reservoir: u32,
    pub total_light_count: u32,

    pub first_local_analytic_light: u32,
    pub first_infinite_analytic_light: u32,
    pub emissive_light_count: u32,
    pub local_pdf_width: u32,

    pub local_pdf_height: u32,
    pub local_pdf_mip_count: u32,
    pub env_pdf_width: u32,
    pub env_pdf_height: u32,

    pub env_pdf_mip_count: u32,
    pub env_alias_count: u32,
    pub emissive_alias_count: u32,
    pub analytic_alias_count: u32,

    pub restir_pass_count: u32,
    pub initial_path_sample_count: u32,
    pub temporal_shift_mapping: u32,
    pub temporal_final_shift_mapping: u32,

    pub spatial_shift_mapping: u32,
    pub use_final_visibility: u32,
    pub reuse_final_visibility: u32,
    pub unbiased: u32,

    pub use_m_factor: u32,
    /// Onion cell jitter radius is `jitter_cubic_root_factor *
    /// cbrt(distance)` inside inner groups and `jitter_linear_factor *
    /// distance` inside the outermost one
    pub jitter_cubic_root_factor: f32,
    pub jitter_linear_factor: f32,
    pub pad0: u32,
}

const _: () = assert!(core::mem::size_of::<KernelParams>() == 36);
const _: () = assert!(core::mem::size_of::<BridgeParams>() % 16 == 0);
