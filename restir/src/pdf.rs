use glam::{uvec2, UVec2, Vec2};

use crate::{gpu, Error, Result};

const ALMOST_ONE: f32 = 1.0 - f32::EPSILON;

/// Dimensions of a PDF texture able to hold given number of items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PdfTextureSize {
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
}

impl PdfTextureSize {
    pub fn for_items(max_items: u32) -> Self {
        let width = ((max_items as f64).sqrt().ceil() as u32)
            .max(1)
            .next_power_of_two();

        let height = max_items.div_ceil(width).max(1).next_power_of_two();
        let mip_count = width.max(height).ilog2().max(1);

        Self {
            width,
            height,
            mip_count,
        }
    }

    pub fn size(&self) -> UVec2 {
        uvec2(self.width, self.height)
    }

    pub fn texel_count(&self) -> u32 {
        self.width * self.height
    }
}

/// Host-side mip chain of a PDF image.
///
/// Level 0 holds (unnormalized) weights, every next level sums 2x2 texels of
/// the previous one, down to a single texel holding the total weight.
#[derive(Clone, Debug, PartialEq)]
pub struct PdfMipChain {
    levels: Vec<PdfLevel>,
}

#[derive(Clone, Debug, PartialEq)]
struct PdfLevel {
    size: UVec2,
    texels: Vec<f32>,
}

impl PdfLevel {
    fn get(&self, pos: UVec2) -> f32 {
        if pos.x < self.size.x && pos.y < self.size.y {
            self.texels[(pos.y * self.size.x + pos.x) as usize]
        } else {
            0.0
        }
    }

    fn downsample(&self) -> Self {
        let size = (self.size / 2).max(UVec2::ONE);
        let mut texels = Vec::with_capacity((size.x * size.y) as usize);

        for y in 0..size.y {
            for x in 0..size.x {
                let base = uvec2(x, y) * 2;

                texels.push(
                    self.get(base)
                        + self.get(base + uvec2(1, 0))
                        + self.get(base + uvec2(0, 1))
                        + self.get(base + uvec2(1, 1)),
                );
            }
        }

        Self { size, texels }
    }
}

impl PdfMipChain {
    /// Builds the chain out of given level-0 weights, laid out row-major.
    ///
    /// Sizes are expected to be powers of two.
    pub fn new(size: UVec2, weights: Vec<f32>) -> Result<Self> {
        let expected = (size.x * size.y) as usize;

        if weights.len() != expected || expected == 0 {
            return Err(Error::InvalidImageSize {
                expected,
                actual: weights.len(),
            });
        }

        let mut levels = vec![PdfLevel {
            size,
            texels: weights,
        }];

        while let Some(level) = levels.last() {
            if level.size == UVec2::ONE {
                break;
            }

            let next = level.downsample();

            levels.push(next);
        }

        Ok(Self { levels })
    }

    /// Builds the chain out of per-item weights, placing item `i` at
    /// position `i` of the Z-order curve, so that neighboring items share
    /// coarse texels.
    pub fn from_items(size: PdfTextureSize, weights: &[f32]) -> Result<Self> {
        let capacity = size.texel_count() as usize;

        if weights.len() > capacity {
            return Err(Error::InvalidImageSize {
                expected: capacity,
                actual: weights.len(),
            });
        }

        let mut texels = vec![0.0; capacity];

        for (item, &weight) in weights.iter().enumerate() {
            let pos = gpu::linear_index_to_z_curve(item as u32);

            texels[(pos.y * size.width + pos.x) as usize] = weight;
        }

        Self::new(size.size(), texels)
    }

    pub fn size(&self) -> UVec2 {
        self.levels[0].size
    }

    pub fn mip_count(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn level(&self, mip: u32) -> &[f32] {
        &self.levels[mip as usize].texels
    }

    pub fn total_weight(&self) -> f32 {
        self.levels
            .last()
            .map(|level| level.texels[0])
            .unwrap_or_default()
    }

    /// Probability of picking given level-0 texel.
    pub fn pdf(&self, texel: UVec2) -> f32 {
        let total = self.total_weight();

        if total > 0.0 {
            self.levels[0].get(texel) / total
        } else {
            0.0
        }
    }

    /// Picks a level-0 texel proportionally to its weight, descending the
    /// chain and choosing among four children at each step; returns the
    /// texel and its probability.
    ///
    /// Returns `None` when the whole image has zero weight.
    pub fn sample(&self, random: Vec2) -> Option<(UVec2, f32)> {
        let total = self.total_weight();

        if total <= 0.0 {
            return None;
        }

        let mut random = random.clamp(Vec2::ZERO, Vec2::splat(ALMOST_ONE));
        let mut pos = UVec2::ZERO;

        for level in self.levels.iter().rev().skip(1) {
            pos *= 2;

            let w00 = level.get(pos);
            let w10 = level.get(pos + uvec2(1, 0));
            let w01 = level.get(pos + uvec2(0, 1));
            let w11 = level.get(pos + uvec2(1, 1));

            let left = w00 + w01;
            let right = w10 + w11;

            let (column_top, column_bottom) =
                if pick_second(&mut random.x, left, right) {
                    pos.x += 1;
                    (w10, w11)
                } else {
                    (w00, w01)
                };

            if pick_second(&mut random.y, column_top, column_bottom) {
                pos.y += 1;
            }
        }

        let weight = self.levels[0].get(pos);

        if weight > 0.0 {
            Some((pos, weight / total))
        } else {
            None
        }
    }

    /// Index of the item stored at given texel of a chain built with
    /// [`Self::from_items()`].
    pub fn item_at(texel: UVec2) -> u32 {
        gpu::z_curve_to_linear_index(texel)
    }

    /// Returns all levels concatenated, finest first, together with the
    /// offset of each level.
    pub fn flatten(&self) -> (Vec<f32>, Vec<u32>) {
        let mut texels = Vec::new();
        let mut offsets = Vec::with_capacity(self.levels.len());

        for level in &self.levels {
            offsets.push(texels.len() as u32);
            texels.extend_from_slice(&level.texels);
        }

        (texels, offsets)
    }
}

/// Chooses between two options proportionally to their weights, rescaling
/// the random number so that it can be reused further down the chain.
fn pick_second(random: &mut f32, first: f32, second: f32) -> bool {
    let total = first + second;

    if total <= 0.0 {
        return false;
    }

    let threshold = first / total;
    let picked = *random >= threshold;

    *random = if picked {
        (*random - threshold) / (1.0 - threshold)
    } else {
        *random / threshold
    };

    *random = random.min(ALMOST_ONE);

    picked
}
