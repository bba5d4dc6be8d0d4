use std::f32::consts::PI;

use glam::{vec3, Vec3};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{gpu, Error, Result};

/// Parameters of the spherical-shell partition.
///
/// Group `i` subdivides the equator into `8 + 4i` cells; every group except
/// the outermost one consists of a single layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OnionParams {
    pub layer_groups: u32,
    pub inner_radius: f32,
    pub outer_group_layers: u32,
}

impl Default for OnionParams {
    fn default() -> Self {
        Self {
            layer_groups: 0,
            inner_radius: 1.0,
            outer_group_layers: 10,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OnionLayout {
    groups: Vec<gpu::OnionLayerGroup>,
    rings: Vec<gpu::OnionRing>,
}

impl OnionLayout {
    pub fn new(params: OnionParams) -> Result<Self> {
        let group_count = params.layer_groups as usize;

        if group_count > gpu::ONION_MAX_LAYER_GROUPS {
            return Err(Error::TooManyLayerGroups {
                count: group_count,
                max: gpu::ONION_MAX_LAYER_GROUPS,
            });
        }

        let mut groups = Vec::with_capacity(group_count);
        let mut rings = Vec::new();
        let mut inner_radius = params.inner_radius;
        let mut cell_offset = 0;

        for group_idx in 0..group_count {
            let partitions = 8 + 4 * group_idx as i32;
            let partitions_f = partitions as f32;

            let layer_count = if group_idx + 1 < group_count {
                1
            } else {
                params.outer_group_layers.max(1) as i32
            };

            let layer_scale = (partitions_f + PI) / (partitions_f - PI);
            let outer_radius = inner_radius * layer_scale.powi(layer_count);
            let equatorial_cell_angle = 2.0 * PI / partitions_f;
            let ring_offset = rings.len() as i32;
            let ring_count = partitions / 4 + 1;
            let mut cells_per_layer = 0;

            for ring_idx in 0..ring_count {
                let cell_count = if ring_idx == 0 {
                    partitions
                } else {
                    let elevation = ring_idx as f32 * equatorial_cell_angle;

                    ((partitions_f * elevation.cos()).floor() as i32).max(1)
                };

                rings.push(gpu::OnionRing {
                    cell_angle: 2.0 * PI / cell_count as f32,
                    inv_cell_angle: cell_count as f32 / (2.0 * PI),
                    cell_offset: cells_per_layer,
                    cell_count,
                });

                // Rings other than the equator exist on both hemispheres
                cells_per_layer += if ring_idx == 0 {
                    cell_count
                } else {
                    cell_count * 2
                };
            }

            groups.push(gpu::OnionLayerGroup {
                inner_radius,
                outer_radius,
                inv_log_layer_scale: 1.0 / layer_scale.ln(),
                layer_count,
                inv_equatorial_cell_angle: 1.0 / equatorial_cell_angle,
                cells_per_layer,
                ring_offset,
                ring_count,
                equatorial_cell_angle,
                layer_scale,
                layer_cell_offset: cell_offset,
                pad: 0,
            });

            inner_radius = outer_radius;
            cell_offset += cells_per_layer * layer_count;
        }

        debug!(
            "Onion layout created; groups={}, rings={}, cells={cell_offset}",
            groups.len(),
            rings.len(),
        );

        Ok(Self { groups, rings })
    }

    /// Creates a layout out of explicit groups and rings.
    pub fn from_parts(
        groups: Vec<gpu::OnionLayerGroup>,
        rings: Vec<gpu::OnionRing>,
    ) -> Result<Self> {
        if groups.len() > gpu::ONION_MAX_LAYER_GROUPS {
            return Err(Error::TooManyLayerGroups {
                count: groups.len(),
                max: gpu::ONION_MAX_LAYER_GROUPS,
            });
        }

        Ok(Self { groups, rings })
    }

    pub fn groups(&self) -> &[gpu::OnionLayerGroup] {
        &self.groups
    }

    pub fn rings(&self) -> &[gpu::OnionRing] {
        &self.rings
    }

    /// Total number of cells across all layers.
    pub fn cell_count(&self) -> i32 {
        self.groups
            .iter()
            .map(|group| group.cells_per_layer * group.layer_count)
            .sum()
    }
}

/// Closed-form bound of the jitter introduced by the onion's cells.
///
/// Cell radius grows with the cube root of the distance for inner groups and
/// linearly for the outermost group.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct JitterCurve {
    pub cubic_root_factor: f32,
    pub linear_factor: f32,
}

impl JitterCurve {
    pub fn new(layout: &OnionLayout) -> Self {
        let mut cubic_root_factors = Vec::new();
        let mut linear_factors = Vec::new();
        let last_group_idx = layout.groups.len().saturating_sub(1);

        for (group_idx, group) in layout.groups.iter().enumerate() {
            for layer_idx in 0..group.layer_count {
                let inner_radius =
                    group.inner_radius * group.layer_scale.powi(layer_idx);

                let outer_radius = inner_radius * group.layer_scale;
                let middle_radius = (inner_radius + outer_radius) * 0.5;
                let max_cell_radius = max_cell_radius(
                    layout,
                    group,
                    middle_radius,
                    outer_radius,
                );

                if group_idx < last_group_idx {
                    let factor =
                        max_cell_radius * middle_radius.powf(-1.0 / 3.0);

                    cubic_root_factors.push(factor);
                } else {
                    linear_factors.push(max_cell_radius / middle_radius);
                }
            }
        }

        // Median, since small radii produce outliers
        let cubic_root_factor = if cubic_root_factors.is_empty() {
            0.0
        } else {
            cubic_root_factors.sort_by(f32::total_cmp);
            cubic_root_factors[cubic_root_factors.len() / 2]
        };

        let linear_factor = linear_factors.iter().sum::<f32>()
            / (linear_factors.len() as f32).max(1.0);

        Self {
            cubic_root_factor,
            linear_factor,
        }
    }
}

fn max_cell_radius(
    layout: &OnionLayout,
    group: &gpu::OnionLayerGroup,
    middle_radius: f32,
    outer_radius: f32,
) -> f32 {
    let rings = layout
        .rings
        .iter()
        .skip(group.ring_offset as usize)
        .take(group.ring_count as usize);

    rings
        .enumerate()
        .map(|(ring_idx, ring)| {
            let middle_elevation =
                group.equatorial_cell_angle * ring_idx as f32;

            let vertex_elevation = if ring_idx == 0 {
                group.equatorial_cell_angle * 0.5
            } else {
                middle_elevation - group.equatorial_cell_angle * 0.5
            };

            let middle =
                spherical_to_cartesian(middle_radius, 0.0, middle_elevation);

            let vertex = spherical_to_cartesian(
                outer_radius,
                ring.cell_angle,
                vertex_elevation,
            );

            middle.distance(vertex)
        })
        .fold(0.0, f32::max)
}

fn spherical_to_cartesian(radius: f32, azimuth: f32, elevation: f32) -> Vec3 {
    vec3(
        radius * azimuth.cos() * elevation.cos(),
        radius * elevation.sin(),
        radius * azimuth.sin() * elevation.cos(),
    )
}
