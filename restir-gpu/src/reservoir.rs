use bytemuck::{Pod, Zeroable};
use glam::{ivec2, vec2, IVec2, Vec2};

/// Set on `light_data` when the reservoir holds a sample.
pub const RESERVOIR_LIGHT_VALID_BIT: u32 = 0x8000_0000;
pub const RESERVOIR_LIGHT_INDEX_MASK: u32 = 0x7fff_ffff;

const VISIBILITY_BIT: u32 = 1;
const M_SHIFT: u32 = 18;
const MAX_M: u32 = 0x3fff;
const DISTANCE_MASK: u32 = 0xff;
const MAX_DISTANCE: i32 = 127;
const AGE_SHIFT: u32 = 16;
const MAX_AGE: u32 = 0xff;

/// Weighted reservoir holding a single light sample.
///
/// Until [`Self::finalize()`] is called, `weight_sum` accumulates resampling
/// weights; afterwards it holds the unbiased contribution weight of the
/// selected sample.
#[derive(Clone, Copy, Default, PartialEq)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct Reservoir {
    pub light_data: u32,
    pub uv: Vec2,
    pub weight_sum: f32,
    pub target_pdf: f32,
    pub m: u32,
    pub visible: bool,
    pub spatial_distance: IVec2,
    pub age: u32,
}

impl Reservoir {
    pub fn is_valid(&self) -> bool {
        self.light_data & RESERVOIR_LIGHT_VALID_BIT != 0
    }

    pub fn light_index(&self) -> u32 {
        self.light_data & RESERVOIR_LIGHT_INDEX_MASK
    }

    /// Final weight of the selected sample (`W`).
    pub fn weight(&self) -> f32 {
        self.weight_sum
    }

    /// Adds a freshly drawn candidate to this reservoir; returns whether the
    /// candidate got selected.
    pub fn stream(
        &mut self,
        light_index: u32,
        uv: Vec2,
        random: f32,
        target_pdf: f32,
        inv_source_pdf: f32,
    ) -> bool {
        let ris_weight = target_pdf * inv_source_pdf;

        self.m += 1;
        self.weight_sum += ris_weight;

        let selected = random * self.weight_sum < ris_weight;

        if selected {
            self.light_data = light_index | RESERVOIR_LIGHT_VALID_BIT;
            self.uv = uv;
            self.target_pdf = target_pdf;
        }

        selected
    }

    /// Merges another (already finalized) reservoir into this one;
    /// `target_pdf` is the other sample's target function evaluated at this
    /// reservoir's surface.
    pub fn combine(
        &mut self,
        rhs: &Self,
        random: f32,
        target_pdf: f32,
    ) -> bool {
        let ris_weight = target_pdf * rhs.weight_sum * rhs.m as f32;

        self.m += rhs.m;
        self.weight_sum += ris_weight;

        let selected = random * self.weight_sum < ris_weight;

        if selected {
            self.light_data = rhs.light_data;
            self.uv = rhs.uv;
            self.target_pdf = target_pdf;
            self.spatial_distance = rhs.spatial_distance;
            self.age = rhs.age;
        }

        selected
    }

    /// Turns the accumulated weight sum into the contribution weight.
    ///
    /// Biased normalization passes `(1.0, m)`; the unbiased modes pass the
    /// MIS numerator and denominator computed by the kernel.
    pub fn finalize(&mut self, norm_num: f32, norm_denom: f32) {
        let denom = self.target_pdf * norm_denom;

        self.weight_sum = if denom == 0.0 {
            0.0
        } else {
            (self.weight_sum * norm_num) / denom
        };
    }

    /// Drops the sample's contribution while keeping its history, used when
    /// the selected light turns out to be occluded.
    pub fn invalidate(&mut self) {
        self.weight_sum = 0.0;
        self.visible = false;
    }

    pub fn clamp_m(&mut self, max: u32) {
        self.m = self.m.min(max);
    }

    pub fn pack(&self) -> PackedReservoir {
        let m = self.m.min(MAX_M) << M_SHIFT;
        let visibility = if self.visible { VISIBILITY_BIT } else { 0 };

        let distance = self
            .spatial_distance
            .clamp(IVec2::splat(-MAX_DISTANCE), IVec2::splat(MAX_DISTANCE));

        let distance_age = (distance.x as u32 & DISTANCE_MASK)
            | ((distance.y as u32 & DISTANCE_MASK) << 8)
            | (self.age.min(MAX_AGE) << AGE_SHIFT);

        PackedReservoir {
            light_data: self.light_data,
            uv_data: pack_unorm_2x16(self.uv),
            m_visibility: m | visibility,
            distance_age,
            target_pdf: self.target_pdf,
            weight: self.weight_sum,
        }
    }

    pub fn unpack(data: PackedReservoir) -> Self {
        let dx = (data.distance_age & DISTANCE_MASK) as u8 as i8;
        let dy = ((data.distance_age >> 8) & DISTANCE_MASK) as u8 as i8;

        Self {
            light_data: data.light_data,
            uv: unpack_unorm_2x16(data.uv_data),
            weight_sum: data.weight,
            target_pdf: data.target_pdf,
            m: data.m_visibility >> M_SHIFT,
            visible: data.m_visibility & VISIBILITY_BIT != 0,
            spatial_distance: ivec2(dx as i32, dy as i32),
            age: (data.distance_age >> AGE_SHIFT) & MAX_AGE,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct PackedReservoir {
    pub light_data: u32,
    pub uv_data: u32,
    pub m_visibility: u32,
    pub distance_age: u32,
    pub target_pdf: f32,
    pub weight: f32,
}

pub fn pack_unorm_2x16(val: Vec2) -> u32 {
    let val = val.clamp(Vec2::ZERO, Vec2::ONE) * 65535.0 + 0.5;

    (val.x as u32) | ((val.y as u32) << 16)
}

pub fn unpack_unorm_2x16(val: u32) -> Vec2 {
    vec2((val & 0xffff) as f32, (val >> 16) as f32) / 65535.0
}
