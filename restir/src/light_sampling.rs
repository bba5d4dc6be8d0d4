use std::f32::consts::PI;

use glam::{uvec2, vec4, UVec2, Vec3, Vec4};

use crate::{
    AnalyticLight, EmissiveTriangle, EnvMap, Error, Options, PdfMipChain,
    Result,
};

/// Relative luminance of a linear Rec.709 color.
pub fn luminance(color: Vec3) -> f32 {
    color.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Converts environment map's texels into luminance, row-major.
pub fn env_luminance(map: &EnvMap) -> Result<Vec<f32>> {
    let channels = map.channels as usize;

    if !matches!(channels, 1 | 3 | 4) {
        return Err(Error::InvalidEnvMapChannels(map.channels));
    }

    if map.width == 0 || map.height == 0 {
        return Err(Error::EmptyEnvMap);
    }

    let expected = (map.width * map.height) as usize * channels;

    if map.texels.len() != expected {
        return Err(Error::InvalidImageSize {
            expected,
            actual: map.texels.len(),
        });
    }

    let luminance = map
        .texels
        .chunks_exact(channels)
        .map(|texel| {
            if channels == 1 {
                texel[0]
            } else {
                luminance(Vec3::new(texel[0], texel[1], texel[2]))
            }
        })
        .collect();

    Ok(luminance)
}

/// Weighs each texel of a lat-long map by its solid angle.
pub fn env_weights(width: u32, height: u32, luminance: &[f32]) -> Vec<f32> {
    let d_phi = 2.0 * PI / width as f32;
    let d_theta = PI / height as f32;

    luminance
        .iter()
        .enumerate()
        .map(|(idx, &lum)| {
            let y = idx as u32 / width;
            let theta = PI * (y as f32 + 0.5) / height as f32;

            lum * d_phi * d_theta * theta.sin()
        })
        .collect()
}

pub fn emissive_weights(triangles: &[EmissiveTriangle]) -> Vec<f32> {
    triangles
        .iter()
        .map(|triangle| luminance(triangle.average_radiance) * triangle.area)
        .collect()
}

/// Analytic lights are picked uniformly, since their flux isn't known up
/// front.
pub fn analytic_weights(lights: &[AnalyticLight]) -> Vec<f32> {
    vec![1.0; lights.len()]
}

/// Environment map's luminance and sampling PDF, both resampled into a
/// power-of-two grid.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvPdf {
    size: UVec2,
    luminance: Vec<f32>,
    pdf: PdfMipChain,
}

impl EnvPdf {
    pub fn new(map: &EnvMap) -> Result<Self> {
        let source = env_luminance(map)?;

        let size = uvec2(
            map.width.max(1).next_power_of_two(),
            map.height.max(1).next_power_of_two(),
        );

        let mut luminance = Vec::with_capacity((size.x * size.y) as usize);
        let mut weights = Vec::with_capacity(luminance.capacity());

        for y in 0..size.y {
            let src_y = (y * map.height / size.y).min(map.height - 1);
            let theta = PI * (y as f32 + 0.5) / size.y as f32;

            for x in 0..size.x {
                let src_x = (x * map.width / size.x).min(map.width - 1);
                let lum = source[(src_y * map.width + src_x) as usize];

                luminance.push(lum);
                weights.push(lum * theta.sin());
            }
        }

        let pdf = PdfMipChain::new(size, weights)?;

        Ok(Self {
            size,
            luminance,
            pdf,
        })
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn luminance(&self) -> &[f32] {
        &self.luminance
    }

    pub fn pdf(&self) -> &PdfMipChain {
        &self.pdf
    }
}

/// Which light categories are present in the scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LightCategories {
    pub env: bool,
    pub emissive: bool,
    pub analytic: bool,
}

/// Probability of picking each light category when generating candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LightSelectionProbabilities {
    pub env: f32,
    pub emissive: f32,
    pub analytic: f32,
}

impl LightSelectionProbabilities {
    /// Normalizes option weights of the categories that are present; when
    /// nothing is left, all probabilities stay zero.
    pub fn new(options: &Options, categories: LightCategories) -> Self {
        let weight = |present: bool, weight: f32| {
            if present {
                weight
            } else {
                0.0
            }
        };

        let mut this = Self {
            env: weight(categories.env, options.env_light_weight),
            emissive: weight(
                categories.emissive,
                options.emissive_light_weight,
            ),
            analytic: weight(
                categories.analytic,
                options.analytic_light_weight,
            ),
        };

        let total = this.env + this.emissive + this.analytic;

        if total > 0.0 {
            this.env /= total;
            this.emissive /= total;
            this.analytic /= total;
        }

        this
    }

    /// Splits given number of samples between categories, proportionally to
    /// their probabilities; returns env, emissive and analytic counts.
    ///
    /// Counts add up to `total` unless every probability is zero.
    pub fn sample_counts(&self, total: u32) -> [u32; 3] {
        let probs = [self.env, self.emissive, self.analytic];

        if probs.iter().all(|&prob| prob <= 0.0) {
            return [0; 3];
        }

        let mut counts =
            probs.map(|prob| (prob * total as f32).floor() as u32);

        // Hand out the remainder, largest fractional part first
        let mut order = [0, 1, 2];

        order.sort_by(|&a, &b| {
            let frac =
                |idx: usize| probs[idx] * total as f32 - counts[idx] as f32;

            frac(b).total_cmp(&frac(a))
        });

        let mut remaining = total.saturating_sub(counts.iter().sum());

        for idx in order.into_iter().cycle() {
            if remaining == 0 {
                break;
            }

            if probs[idx] > 0.0 {
                counts[idx] += 1;
                remaining -= 1;
            }
        }

        counts
    }

    pub fn as_vec4(&self) -> Vec4 {
        vec4(self.env, self.emissive, self.analytic, 0.0)
    }
}

/// Split of a light sample's 30 bits between the light index and the
/// position on the light.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightSampleBits {
    pub index_bits: u32,
    pub position_bits: u32,
}

impl LightSampleBits {
    pub const ENV: Self = Self::new(26, 4);
    pub const EMISSIVE: Self = Self::new(22, 8);
    pub const ANALYTIC: Self = Self::new(14, 16);

    const TOTAL_BITS: u32 = 30;

    const fn new(index_bits: u32, position_bits: u32) -> Self {
        Self {
            index_bits,
            position_bits,
        }
    }

    /// Smallest even number of index bits able to address `count` items,
    /// with the rest of the bits left for the position.
    pub fn for_count(count: u32) -> Result<Self> {
        let mut index_bits = u32::BITS - count.leading_zeros();

        if index_bits % 2 == 1 {
            index_bits += 1;
        }

        if index_bits >= Self::TOTAL_BITS {
            return Err(Error::LightCountOverflow { count });
        }

        Ok(Self::new(index_bits, Self::TOTAL_BITS - index_bits))
    }
}
