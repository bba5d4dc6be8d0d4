use glam::{uvec2, UVec2};
use serde::{Deserialize, Serialize};

use crate::gpu;

/// Which half of the pixels is shaded each frame.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum CheckerboardMode {
    #[default]
    Off = 0,
    Black = 1,
    White = 2,
}

impl CheckerboardMode {
    /// Returns the checkerboard field kernels should consider active during
    /// given frame; zero means every pixel is active.
    pub fn active_field(&self, frame_index: u32) -> u32 {
        let odd_frame = frame_index & 1 != 0;

        match self {
            CheckerboardMode::Off => 0,
            CheckerboardMode::Black => {
                if odd_frame {
                    1
                } else {
                    2
                }
            }
            CheckerboardMode::White => {
                if odd_frame {
                    2
                } else {
                    1
                }
            }
        }
    }
}

/// Block-linear layout of the reservoir storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReservoirLayout {
    size: UVec2,
    block_row_pitch: u32,
    array_pitch: u32,
}

impl ReservoirLayout {
    pub fn new(size: UVec2, checkerboard: CheckerboardMode) -> Self {
        let size = if checkerboard == CheckerboardMode::Off {
            size
        } else {
            uvec2((size.x + 1) / 2, size.y)
        };

        let block_area = gpu::RESERVOIR_BLOCK_SIZE * gpu::RESERVOIR_BLOCK_SIZE;
        let blocks = (size + gpu::RESERVOIR_BLOCK_SIZE - 1)
            / gpu::RESERVOIR_BLOCK_SIZE;

        let block_row_pitch = blocks.x * block_area;
        let array_pitch = block_row_pitch * blocks.y;

        Self {
            size,
            block_row_pitch,
            array_pitch,
        }
    }

    /// Size of the reservoir grid, i.e. render size with checkerboard
    /// halving applied.
    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn block_row_pitch(&self) -> u32 {
        self.block_row_pitch
    }

    pub fn array_pitch(&self) -> u32 {
        self.array_pitch
    }

    /// Number of reservoirs in a single logical reservoir buffer.
    pub fn element_count(&self) -> u32 {
        self.array_pitch
    }

    /// Number of reservoirs across all logical reservoir buffers.
    pub fn buffer_element_count(&self) -> u32 {
        self.array_pitch * gpu::MAX_RESERVOIRS
    }
}
