//! Structs and helpers shared between the resampling kernels and the host.
//!
//! Everything in here has a fixed binary layout, since it gets copied as-is
//! into GPU-visible memory.

#![cfg_attr(target_arch = "spirv", no_std)]
#![allow(clippy::len_without_is_empty)]

mod alias;
mod layout;
mod light_tile;
mod onion;
mod params;
mod reservoir;
mod runtime_params;

pub use self::alias::*;
pub use self::layout::*;
pub use self::light_tile::*;
pub use self::onion::*;
pub use self::params::*;
pub use self::reservoir::*;
pub use self::runtime_params::*;

/// Side of a square block of reservoirs stored contiguously in memory.
pub const RESERVOIR_BLOCK_SIZE: u32 = 16;

/// Number of logical reservoir buffers that live in the reservoir storage.
pub const MAX_RESERVOIRS: u32 = 3;

/// Logical reservoir buffer that always receives freshly generated
/// candidates.
pub const CANDIDATE_RESERVOIR_ID: u32 = 2;

/// Marks a presampled light whose data got stored in the compact light info
/// buffer.
pub const LIGHT_COMPACT_BIT: u32 = 0x8000_0000;
pub const LIGHT_INDEX_MASK: u32 = 0x7fff_ffff;

pub const INVALID_LIGHT_INDEX: u32 = 0xffff_ffff;

pub const ONION_MAX_LAYER_GROUPS: usize = 8;
pub const ONION_MAX_RINGS: usize = 52;
