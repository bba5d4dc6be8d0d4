use glam::{uvec2, UVec2};

use crate::{RuntimeParams, MAX_RESERVOIRS, RESERVOIR_BLOCK_SIZE};

/// Returns index of given reservoir inside the reservoir storage.
///
/// Reservoirs are laid out in 16x16 blocks, row-major inside each block and
/// row-major across blocks, with `array_index` selecting the logical buffer.
pub fn reservoir_index(
    params: &RuntimeParams,
    position: UVec2,
    array_index: u32,
) -> u32 {
    let block = position / RESERVOIR_BLOCK_SIZE;
    let position_in_block = position % RESERVOIR_BLOCK_SIZE;

    array_index * params.reservoir_array_pitch
        + block.y * params.reservoir_block_row_pitch
        + block.x * (RESERVOIR_BLOCK_SIZE * RESERVOIR_BLOCK_SIZE)
        + position_in_block.y * RESERVOIR_BLOCK_SIZE
        + position_in_block.x
}

/// Returns the logical reservoir buffer (`array_index` of
/// [`reservoir_index()`]) holding `slot` of given resampling chain; each
/// chain owns [`MAX_RESERVOIRS`] consecutive buffers.
pub fn pass_array_index(restir_pass: u32, slot: u32) -> u32 {
    restir_pass * MAX_RESERVOIRS + slot
}

/// Maps pixel into its reservoir; with checkerboard rendering two
/// horizontally adjacent pixels share a single reservoir column.
pub fn pixel_to_reservoir_position(pixel: UVec2, field: u32) -> UVec2 {
    if field == 0 {
        pixel
    } else {
        uvec2(pixel.x >> 1, pixel.y)
    }
}

/// Inverse of [`pixel_to_reservoir_position()`], returning the pixel that's
/// active for given checkerboard field.
pub fn reservoir_to_pixel_position(reservoir: UVec2, field: u32) -> UVec2 {
    if field == 0 {
        reservoir
    } else {
        let x = (reservoir.x << 1) + ((reservoir.y + field) & 1);

        uvec2(x, reservoir.y)
    }
}

pub fn is_active_checkerboard_pixel(pixel: UVec2, field: u32) -> bool {
    if field == 0 {
        true
    } else {
        ((pixel.x + pixel.y) & 1) == (field & 1)
    }
}

/// Maps linear index into a position along the Z-order curve, so that items
/// with nearby indices land in the same coarse mip texels.
pub fn linear_index_to_z_curve(index: u32) -> UVec2 {
    uvec2(compact_bits(index), compact_bits(index >> 1))
}

pub fn z_curve_to_linear_index(pos: UVec2) -> u32 {
    expand_bits(pos.x) | (expand_bits(pos.y) << 1)
}

/// Keeps even bits of given number, packing them together.
fn compact_bits(mut x: u32) -> u32 {
    x &= 0x5555_5555;
    x = (x ^ (x >> 1)) & 0x3333_3333;
    x = (x ^ (x >> 2)) & 0x0f0f_0f0f;
    x = (x ^ (x >> 4)) & 0x00ff_00ff;
    x = (x ^ (x >> 8)) & 0x0000_ffff;
    x
}

/// Expands a 16-bit number into a 32-bit one by inserting zeros between
/// bits.
fn expand_bits(mut x: u32) -> u32 {
    x &= 0x0000_ffff;
    x = (x | (x << 8)) & 0x00ff_00ff;
    x = (x | (x << 4)) & 0x0f0f_0f0f;
    x = (x | (x << 2)) & 0x3333_3333;
    x = (x | (x << 1)) & 0x5555_5555;
    x
}
