use bytemuck::{Pod, Zeroable};

/// Group of concentric spherical shells sharing the same angular
/// subdivision.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct OnionLayerGroup {
    pub inner_radius: f32,
    pub outer_radius: f32,
    pub inv_log_layer_scale: f32,
    pub layer_count: i32,

    pub inv_equatorial_cell_angle: f32,
    pub cells_per_layer: i32,
    pub ring_offset: i32,
    pub ring_count: i32,

    pub equatorial_cell_angle: f32,
    pub layer_scale: f32,
    pub layer_cell_offset: i32,
    pub pad: i32,
}

/// Band of cells at a fixed elevation inside a layer.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct OnionRing {
    pub cell_angle: f32,
    pub inv_cell_angle: f32,
    pub cell_offset: i32,
    pub cell_count: i32,
}
