use std::ops::Range;

use log::debug;

use crate::{AnalyticLight, AnalyticLightKind};

/// Partition of the scene's lights into local, infinite and environment
/// lights.
///
/// Lights are indexed as `[emissive | local analytic | infinite analytic |
/// environment]`, so local lights always come first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LightTaxonomy {
    emissive_light_count: u32,
    local_analytic_light_count: u32,
    infinite_analytic_light_count: u32,
    env_light_present: bool,
    analytic_light_ids: Vec<u32>,
    prev_emissive_light_count: u32,
    prev_local_analytic_light_count: u32,
}

impl LightTaxonomy {
    /// Sorts analytic lights into local and infinite ones.
    ///
    /// Area lights (rect, disc, sphere) are not supported by the resampler
    /// and get skipped, as do inactive lights.
    pub fn categorize(&mut self, lights: &[AnalyticLight]) {
        let mut local = Vec::new();
        let mut infinite = Vec::new();
        let mut ignored = 0;

        for (light_id, light) in lights.iter().enumerate() {
            if !light.active {
                continue;
            }

            match light.kind {
                AnalyticLightKind::Point => {
                    local.push(light_id as u32);
                }

                AnalyticLightKind::Directional
                | AnalyticLightKind::Distant => {
                    infinite.push(light_id as u32);
                }

                AnalyticLightKind::Rect
                | AnalyticLightKind::Disc
                | AnalyticLightKind::Sphere => {
                    ignored += 1;
                }
            }
        }

        if ignored > 0 {
            debug!("Ignoring {ignored} analytic area light(s)");
        }

        self.local_analytic_light_count = local.len() as u32;
        self.infinite_analytic_light_count = infinite.len() as u32;

        self.analytic_light_ids = local;
        self.analytic_light_ids.extend(infinite);
    }

    pub fn clear_analytic_lights(&mut self) {
        self.local_analytic_light_count = 0;
        self.infinite_analytic_light_count = 0;
        self.analytic_light_ids.clear();
    }

    pub fn set_emissive_light_count(&mut self, count: u32) {
        self.emissive_light_count = count;
    }

    pub fn set_env_light_present(&mut self, present: bool) {
        self.env_light_present = present;
    }

    /// Scene ids of analytic lights; local lights first, infinite second.
    pub fn analytic_light_ids(&self) -> &[u32] {
        &self.analytic_light_ids
    }

    pub fn emissive_light_count(&self) -> u32 {
        self.emissive_light_count
    }

    pub fn local_analytic_light_count(&self) -> u32 {
        self.local_analytic_light_count
    }

    pub fn env_light_present(&self) -> bool {
        self.env_light_present
    }

    pub fn first_local_light_index(&self) -> u32 {
        0
    }

    pub fn local_light_count(&self) -> u32 {
        self.emissive_light_count + self.local_analytic_light_count
    }

    pub fn first_infinite_light_index(&self) -> u32 {
        self.local_light_count()
    }

    pub fn infinite_light_count(&self) -> u32 {
        self.infinite_analytic_light_count
    }

    pub fn env_light_index(&self) -> u32 {
        self.local_light_count() + self.infinite_light_count()
    }

    pub fn total_light_count(&self) -> u32 {
        self.env_light_index() + self.env_light_present as u32
    }

    pub fn first_local_analytic_light_index(&self) -> u32 {
        self.emissive_light_count
    }

    pub fn first_infinite_analytic_light_index(&self) -> u32 {
        self.emissive_light_count + self.local_analytic_light_count
    }

    pub fn local_lights(&self) -> Range<u32> {
        let start = self.first_local_light_index();

        start..start + self.local_light_count()
    }

    pub fn infinite_lights(&self) -> Range<u32> {
        let start = self.first_infinite_light_index();

        start..start + self.infinite_light_count()
    }

    /// Returns whether local lights moved around since the previous frame,
    /// which leaves stale texels in the local light PDF.
    pub fn local_layout_changed(&self) -> bool {
        self.prev_emissive_light_count != self.emissive_light_count
            || self.prev_local_analytic_light_count
                != self.local_analytic_light_count
    }

    /// Returns whether the number of emissive lights changed since the
    /// previous frame, which shifts every analytic light's index.
    pub fn emissive_count_changed(&self) -> bool {
        self.prev_emissive_light_count != self.emissive_light_count
    }

    /// Remembers current counts as the previous frame's ones.
    pub fn commit_frame(&mut self) {
        self.prev_emissive_light_count = self.emissive_light_count;
        self.prev_local_analytic_light_count = self.local_analytic_light_count;
    }
}
