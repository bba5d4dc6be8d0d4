use glam::UVec2;
use log::info;

use crate::{
    gpu, CheckerboardMode, Error, JitterCurve, OnionLayout, OnionParams,
    ReservoirLayout, Result,
};

/// Static configuration of a [`Context`]; changing any of it requires
/// creating a new context.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContextParams {
    pub render_size: UVec2,
    pub checkerboard: CheckerboardMode,
    pub tile_size: u32,
    pub tile_count: u32,
    pub env_tile_size: u32,
    pub env_tile_count: u32,
    pub neighbor_offset_count: u32,
    pub onion: OnionParams,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            render_size: UVec2::ZERO,
            checkerboard: CheckerboardMode::Off,
            tile_size: 1024,
            tile_count: 128,
            env_tile_size: 1024,
            env_tile_count: 128,
            neighbor_offset_count: 8192,
            onion: Default::default(),
        }
    }
}

/// Per-frame inputs of [`Context::fill_runtime_params()`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameParams {
    pub frame_index: u32,
    pub first_local_light: u32,
    pub num_local_lights: u32,
    pub first_infinite_light: u32,
    pub num_infinite_lights: u32,
    pub environment_light_present: bool,
    pub environment_light_index: u32,
    pub enable_local_light_importance_sampling: bool,
}

/// Resolution-dependent state of the resampler: reservoir layout, light tile
/// geometry and the onion partition.
///
/// Immutable; gets replaced as a whole when its parameters change.
#[derive(Clone, Debug)]
pub struct Context {
    params: ContextParams,
    layout: ReservoirLayout,
    onion: OnionLayout,
    jitter: JitterCurve,
}

impl Context {
    pub fn new(params: ContextParams) -> Result<Self> {
        info!(
            "Creating context; size={}x{}, checkerboard={:?}, tiles={}x{}",
            params.render_size.x,
            params.render_size.y,
            params.checkerboard,
            params.tile_count,
            params.tile_size,
        );

        if params.render_size.x == 0 || params.render_size.y == 0 {
            return Err(Error::InvalidContextParams(format!(
                "render size must be non-zero, got {}x{}",
                params.render_size.x, params.render_size.y
            )));
        }

        for (name, value) in [
            ("tile size", params.tile_size),
            ("tile count", params.tile_count),
            ("env tile size", params.env_tile_size),
            ("env tile count", params.env_tile_count),
            ("neighbor offset count", params.neighbor_offset_count),
        ] {
            if !value.is_power_of_two() {
                return Err(Error::InvalidContextParams(format!(
                    "{name} must be a non-zero power of two, got {value}"
                )));
            }
        }

        let layout =
            ReservoirLayout::new(params.render_size, params.checkerboard);
        let onion = OnionLayout::new(params.onion)?;
        let jitter = JitterCurve::new(&onion);

        Ok(Self {
            params,
            layout,
            onion,
            jitter,
        })
    }

    pub fn params(&self) -> &ContextParams {
        &self.params
    }

    pub fn layout(&self) -> &ReservoirLayout {
        &self.layout
    }

    pub fn onion(&self) -> &OnionLayout {
        &self.onion
    }

    pub fn jitter(&self) -> JitterCurve {
        self.jitter
    }

    /// Number of reservoirs in a single logical reservoir buffer.
    pub fn reservoir_element_count(&self) -> u32 {
        self.layout.element_count()
    }

    /// Number of presampled lights across local and environment tiles.
    pub fn light_tile_element_count(&self) -> u32 {
        self.params.tile_size * self.params.tile_count
            + self.params.env_tile_size * self.params.env_tile_count
    }

    /// Offset of the first environment tile inside the light tile buffer.
    pub fn env_light_tile_offset(&self) -> u32 {
        self.params.tile_size * self.params.tile_count
    }

    pub fn fill_runtime_params(
        &self,
        frame: &FrameParams,
    ) -> gpu::RuntimeParams {
        gpu::RuntimeParams {
            first_local_light: frame.first_local_light,
            num_local_lights: frame.num_local_lights,
            first_infinite_light: frame.first_infinite_light,
            num_infinite_lights: frame.num_infinite_lights,
            environment_light_present: frame.environment_light_present as u32,
            environment_light_index: frame.environment_light_index,
            tile_size: self.params.tile_size,
            tile_count: self.params.tile_count,
            active_checkerboard_field: self
                .params
                .checkerboard
                .active_field(frame.frame_index),
            enable_local_light_importance_sampling: frame
                .enable_local_light_importance_sampling
                as u32,
            reservoir_block_row_pitch: self.layout.block_row_pitch(),
            reservoir_array_pitch: self.layout.array_pitch(),
            environment_ris_buffer_offset: self.env_light_tile_offset(),
            environment_tile_size: self.params.env_tile_size,
            environment_tile_count: self.params.env_tile_count,
            neighbor_offset_mask: self.params.neighbor_offset_count - 1,
            uniform_random_number: jenkins_hash(frame.frame_index),
            pad1: 0,
            pad2: 0,
            pad3: 0,
        }
    }

    /// Generates offsets used to pick neighbors during spatial resampling:
    /// a low-discrepancy sequence inside a disk, stored as pairs of signed
    /// bytes.
    pub fn fill_neighbor_offsets(&self) -> Vec<i8> {
        neighbor_offsets(self.params.neighbor_offset_count)
    }
}

/// Bob Jenkins' 32-bit integer hash.
pub fn jenkins_hash(a: u32) -> u32 {
    let a = a.wrapping_add(0x7ed55d16).wrapping_add(a << 12);
    let a = (a ^ 0xc761c23c) ^ (a >> 19);
    let a = a.wrapping_add(0x165667b1).wrapping_add(a << 5);
    let a = a.wrapping_add(0xd3a2646c) ^ (a << 9);
    let a = a.wrapping_add(0xfd7046c5).wrapping_add(a << 3);

    (a ^ 0xb55a4f09) ^ (a >> 16)
}

pub fn neighbor_offsets(count: u32) -> Vec<i8> {
    const RADIUS: f32 = 250.0;

    // 1 / plastic number
    let phi2 = 1.0f32 / 1.324_717_957_244_7;
    let mut offsets = Vec::with_capacity(2 * count as usize);
    let mut u = 0.5f32;
    let mut v = 0.5f32;

    while offsets.len() < 2 * count as usize {
        u += phi2;
        v += phi2 * phi2;

        if u >= 1.0 {
            u -= 1.0;
        }

        if v >= 1.0 {
            v -= 1.0;
        }

        let r_sq = (u - 0.5) * (u - 0.5) + (v - 0.5) * (v - 0.5);

        if r_sq > 0.25 {
            continue;
        }

        offsets.push(((u - 0.5) * RADIUS) as i8);
        offsets.push(((v - 0.5) * RADIUS) as i8);
    }

    offsets
}
