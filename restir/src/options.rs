use log::warn;
use serde::{Deserialize, Serialize};

use crate::Dirty;

/// Resampling topology run each frame.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum Mode {
    NoResampling = 1,
    SpatialResampling = 2,
    TemporalResampling = 3,
    #[default]
    SpatiotemporalResampling = 4,
}

impl Mode {
    pub fn resamples(&self) -> bool {
        !matches!(self, Mode::NoResampling)
    }
}

/// Normalization used when merging reservoirs; interpreted by the kernels
/// only.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum BiasCorrection {
    /// 1/M normalization; very biased, very fast
    Off = 0,
    /// MIS-like normalization assuming every sample is visible
    Basic = 1,
    /// Pairwise MIS assuming every sample is visible
    Pairwise = 2,
    /// MIS-like normalization with visibility rays; unbiased
    #[default]
    RayTraced = 3,
}

/// How a sample gets moved from the pixel it was drawn for into the pixel
/// reusing it; interpreted by the kernels only.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum ShiftMapping {
    /// Connects the receiving surface straight to the sampled light point
    Reconnection = 0,
    /// Replays the sample's random numbers from the receiving surface
    #[serde(alias = "OnlyRandomReplay")]
    RandomReplay = 1,
    /// Both of the above, weighted with multiple importance sampling
    #[default]
    #[serde(alias = "MIS")]
    Mis = 2,
}

/// Structure used to importance-sample lights.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum LightSamplingStructure {
    /// Mip-mapped PDF textures, filled by the kernels
    #[default]
    PdfTexture,
    /// Alias tables built on the host
    AliasTable,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    pub mode: Mode,
    pub presampled_tile_count: u32,
    pub presampled_tile_size: u32,
    pub store_compact_light_info: bool,

    pub local_light_candidate_count: u32,
    pub infinite_light_candidate_count: u32,
    pub env_light_candidate_count: u32,
    pub brdf_candidate_count: u32,
    pub brdf_cutoff: f32,
    pub test_candidate_visibility: bool,

    pub bias_correction: BiasCorrection,
    pub depth_threshold: f32,
    pub normal_threshold: f32,

    pub sampling_radius: f32,
    pub spatial_sample_count: u32,
    pub spatial_iterations: u32,

    pub max_history_length: u32,
    pub boiling_filter_strength: f32,

    pub ray_epsilon: f32,
    pub use_emissive_textures: bool,
    pub enable_visibility_shortcut: bool,
    pub enable_permutation_sampling: bool,

    pub light_sampling_structure: LightSamplingStructure,
    pub env_light_weight: f32,
    pub emissive_light_weight: f32,
    pub analytic_light_weight: f32,

    /// Number of independent resampling chains run side by side; each one
    /// owns its own set of reservoir buffers.
    pub restir_pass_count: u32,
    pub initial_path_sample_count: u32,
    /// Shift used when gathering previous frame's neighbors
    pub temporal_shift_mapping: ShiftMapping,
    /// Shift used when merging the gathered sample with the current one
    pub temporal_final_shift_mapping: ShiftMapping,
    pub spatial_shift_mapping: ShiftMapping,
    pub use_final_visibility: bool,
    /// Only meaningful together with `use_final_visibility`
    pub reuse_final_visibility: bool,
    pub unbiased: bool,
    pub use_m_factor: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: Mode::SpatiotemporalResampling,
            presampled_tile_count: 128,
            presampled_tile_size: 1024,
            store_compact_light_info: true,

            local_light_candidate_count: 24,
            infinite_light_candidate_count: 8,
            env_light_candidate_count: 8,
            brdf_candidate_count: 1,
            brdf_cutoff: 0.0,
            test_candidate_visibility: true,

            bias_correction: BiasCorrection::RayTraced,
            depth_threshold: 0.1,
            normal_threshold: 0.5,

            sampling_radius: 30.0,
            spatial_sample_count: 1,
            spatial_iterations: 5,

            max_history_length: 20,
            boiling_filter_strength: 0.0,

            ray_epsilon: 1.0e-3,
            use_emissive_textures: false,
            enable_visibility_shortcut: false,
            enable_permutation_sampling: false,

            light_sampling_structure: LightSamplingStructure::PdfTexture,
            env_light_weight: 1.0,
            emissive_light_weight: 1.0,
            analytic_light_weight: 1.0,

            restir_pass_count: 1,
            initial_path_sample_count: 0,
            temporal_shift_mapping: ShiftMapping::RandomReplay,
            temporal_final_shift_mapping: ShiftMapping::Mis,
            spatial_shift_mapping: ShiftMapping::Mis,
            use_final_visibility: true,
            reuse_final_visibility: false,
            unbiased: true,
            use_m_factor: false,
        }
    }
}

impl Options {
    /// Returns these options with every numeric field clamped into its valid
    /// range; each clamped field gets reported.
    pub fn clamped(mut self) -> Self {
        clamp(&mut self.presampled_tile_count, "presampledTileCount", 1, 1024);
        clamp(&mut self.presampled_tile_size, "presampledTileSize", 256, 8192);

        round_to_power_of_two(
            &mut self.presampled_tile_count,
            "presampledTileCount",
        );

        round_to_power_of_two(
            &mut self.presampled_tile_size,
            "presampledTileSize",
        );

        clamp(
            &mut self.local_light_candidate_count,
            "localLightCandidateCount",
            0,
            256,
        );

        clamp(
            &mut self.infinite_light_candidate_count,
            "infiniteLightCandidateCount",
            0,
            256,
        );

        clamp(
            &mut self.env_light_candidate_count,
            "envLightCandidateCount",
            0,
            256,
        );

        clamp(
            &mut self.brdf_candidate_count,
            "brdfCandidateCount",
            0,
            256,
        );

        clamp(&mut self.brdf_cutoff, "brdfCutoff", 0.0, 1.0);
        clamp(&mut self.depth_threshold, "depthThreshold", 0.0, 1.0);
        clamp(&mut self.normal_threshold, "normalThreshold", 0.0, 1.0);
        clamp(&mut self.sampling_radius, "samplingRadius", 0.0, 50.0);
        clamp(&mut self.spatial_sample_count, "spatialSampleCount", 0, 25);
        clamp(&mut self.spatial_iterations, "spatialIterations", 0, 10);
        clamp(&mut self.max_history_length, "maxHistoryLength", 0, 50);

        clamp(
            &mut self.boiling_filter_strength,
            "boilingFilterStrength",
            0.0,
            1.0,
        );

        clamp(&mut self.env_light_weight, "envLightWeight", 0.0, 1.0);
        clamp(&mut self.emissive_light_weight, "emissiveLightWeight", 0.0, 1.0);
        clamp(&mut self.analytic_light_weight, "analyticLightWeight", 0.0, 1.0);
        clamp(&mut self.restir_pass_count, "restirPassCount", 1, 8);

        clamp(
            &mut self.initial_path_sample_count,
            "initialPathSampleCount",
            0,
            16,
        );

        self
    }

    /// Returns what has to be rebuilt when switching from `self` to `new`.
    pub fn invalidations(&self, new: &Self) -> Dirty {
        let mut dirty = Dirty::empty();

        if self.mode != new.mode {
            dirty |= Dirty::RESERVOIRS | Dirty::HISTORY;
        }

        if self.presampled_tile_count != new.presampled_tile_count
            || self.presampled_tile_size != new.presampled_tile_size
        {
            dirty |= Dirty::CONTEXT;
        }

        if self.env_light_candidate_count != new.env_light_candidate_count
            && new.env_light_candidate_count == 0
        {
            dirty |= Dirty::RESERVOIRS;
        }

        if self.test_candidate_visibility != new.test_candidate_visibility {
            dirty |= Dirty::RESERVOIRS;
        }

        if self.light_sampling_structure != new.light_sampling_structure {
            dirty |= Dirty::ALL_LIGHTS | Dirty::KERNELS;
        }

        if self.restir_pass_count != new.restir_pass_count {
            dirty |= Dirty::CONTEXT | Dirty::HISTORY;
        }

        dirty
    }
}

fn clamp<T>(value: &mut T, name: &str, min: T, max: T)
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    let clamped = if *value < min {
        min
    } else if *value > max {
        max
    } else {
        *value
    };

    if clamped != *value {
        warn!("'{name}' is {value}. Clamping to [{min},{max}].");

        *value = clamped;
    }
}

fn round_to_power_of_two(value: &mut u32, name: &str) {
    let rounded = value.next_power_of_two();

    if rounded != *value {
        warn!("'{name}' is {value}, which is not a power of two. Rounding up to {rounded}.");

        *value = rounded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let target = Options::default();

        assert_eq!(Mode::SpatiotemporalResampling, target.mode);
        assert_eq!(BiasCorrection::RayTraced, target.bias_correction);
        assert_eq!(target, target.clamped());
    }

    #[test]
    fn clamped() {
        let target = Options {
            presampled_tile_count: 0,
            presampled_tile_size: 10_000,
            local_light_candidate_count: 300,
            brdf_cutoff: -1.0,
            sampling_radius: 51.0,
            spatial_sample_count: 26,
            spatial_iterations: 11,
            max_history_length: 100,
            boiling_filter_strength: 2.0,
            restir_pass_count: 0,
            initial_path_sample_count: 40,
            ..Default::default()
        }
        .clamped();

        assert_eq!(1, target.presampled_tile_count);
        assert_eq!(8192, target.presampled_tile_size);
        assert_eq!(256, target.local_light_candidate_count);
        assert_eq!(0.0, target.brdf_cutoff);
        assert_eq!(50.0, target.sampling_radius);
        assert_eq!(25, target.spatial_sample_count);
        assert_eq!(10, target.spatial_iterations);
        assert_eq!(50, target.max_history_length);
        assert_eq!(1.0, target.boiling_filter_strength);
        assert_eq!(1, target.restir_pass_count);
        assert_eq!(16, target.initial_path_sample_count);

        let target = Options {
            restir_pass_count: 20,
            ..Default::default()
        }
        .clamped();

        assert_eq!(8, target.restir_pass_count);
    }

    #[test]
    fn clamped_is_idempotent() {
        let input = Options {
            presampled_tile_size: 100,
            normal_threshold: 7.0,
            brdf_candidate_count: 1000,
            ..Default::default()
        };

        let once = input.clamped();
        let twice = input.clamped();

        assert_eq!(once, twice);
        assert_eq!(once, once.clamped());
    }

    #[test]
    fn tile_geometry_is_rounded_to_power_of_two() {
        let target = Options {
            presampled_tile_count: 100,
            presampled_tile_size: 1000,
            ..Default::default()
        }
        .clamped();

        assert_eq!(128, target.presampled_tile_count);
        assert_eq!(1024, target.presampled_tile_size);
    }

    #[test]
    fn invalidations() {
        let base = Options::default();

        assert_eq!(Dirty::empty(), base.invalidations(&base));

        let target = base.invalidations(&Options {
            mode: Mode::SpatialResampling,
            ..base
        });

        assert_eq!(Dirty::RESERVOIRS | Dirty::HISTORY, target);

        let target = base.invalidations(&Options {
            presampled_tile_size: 512,
            ..base
        });

        assert_eq!(Dirty::CONTEXT, target);

        let target = base.invalidations(&Options {
            env_light_candidate_count: 0,
            ..base
        });

        assert_eq!(Dirty::RESERVOIRS, target);

        let target = base.invalidations(&Options {
            env_light_candidate_count: 4,
            ..base
        });

        assert_eq!(Dirty::empty(), target);

        let target = base.invalidations(&Options {
            test_candidate_visibility: false,
            ..base
        });

        assert_eq!(Dirty::RESERVOIRS, target);

        let target = base.invalidations(&Options {
            light_sampling_structure: LightSamplingStructure::AliasTable,
            ..base
        });

        assert!(target.contains(Dirty::ALL_LIGHTS | Dirty::KERNELS));

        let target = base.invalidations(&Options {
            restir_pass_count: 2,
            ..base
        });

        assert_eq!(Dirty::CONTEXT | Dirty::HISTORY, target);

        let target = base.invalidations(&Options {
            spatial_shift_mapping: ShiftMapping::Reconnection,
            unbiased: false,
            ..base
        });

        assert_eq!(Dirty::empty(), target);
    }

    #[test]
    fn serde() {
        let target: Options = serde_json::from_str(
            r#"{
                "mode": "SpatialResampling",
                "spatialIterations": 3,
                "biasCorrection": "Off"
            }"#,
        )
        .unwrap();

        assert_eq!(Mode::SpatialResampling, target.mode);
        assert_eq!(3, target.spatial_iterations);
        assert_eq!(BiasCorrection::Off, target.bias_correction);
        assert_eq!(24, target.local_light_candidate_count);

        let json = serde_json::to_value(target).unwrap();

        assert_eq!(3, json["spatialIterations"]);
        assert_eq!("Off", json["biasCorrection"]);
        assert_eq!("RandomReplay", json["temporalShiftMapping"]);
    }

    #[test]
    fn serde_shift_mapping_aliases() {
        let target: Options = serde_json::from_str(
            r#"{
                "temporalShiftMapping": "OnlyRandomReplay",
                "temporalFinalShiftMapping": "MIS",
                "spatialShiftMapping": "Reconnection",
                "restirPassCount": 2
            }"#,
        )
        .unwrap();

        assert_eq!(ShiftMapping::RandomReplay, target.temporal_shift_mapping);
        assert_eq!(ShiftMapping::Mis, target.temporal_final_shift_mapping);
        assert_eq!(ShiftMapping::Reconnection, target.spatial_shift_mapping);
        assert_eq!(2, target.restir_pass_count);
    }
}
