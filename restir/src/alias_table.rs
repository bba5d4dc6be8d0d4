use log::debug;

use crate::gpu;

/// Table for drawing items proportionally to their weights in O(1).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AliasTable {
    entries: Vec<gpu::AliasEntry>,
    total_weight: f32,
}

impl AliasTable {
    /// Builds the table using Vose's variant of Walker's method.
    ///
    /// Negative and non-finite weights count as zero; when nothing has a
    /// positive weight, the table degenerates into a uniform one with
    /// [`Self::total_weight()`] equal to zero.
    pub fn new(weights: &[f32]) -> Self {
        let n = weights.len();

        if n == 0 {
            return Self::default();
        }

        let weights: Vec<f64> = weights
            .iter()
            .map(|&weight| {
                if weight.is_finite() && weight > 0.0 {
                    weight as f64
                } else {
                    0.0
                }
            })
            .collect();

        let total_weight: f64 = weights.iter().sum();

        if total_weight <= 0.0 {
            debug!("Building uniform alias table; items={n}");

            let pdf = 1.0 / n as f32;

            let entries = (0..n)
                .map(|item| gpu::AliasEntry {
                    threshold: 1.0,
                    alias: item as u32,
                    pdf,
                    _padding: 0,
                })
                .collect();

            return Self {
                entries,
                total_weight: 0.0,
            };
        }

        let scale = n as f64 / total_weight;
        let mut scaled: Vec<f64> = weights.iter().map(|w| w * scale).collect();
        let mut thresholds = vec![1.0f64; n];
        let mut aliases: Vec<u32> = (0..n as u32).collect();
        let mut small = Vec::with_capacity(n);
        let mut large = Vec::with_capacity(n);

        for (item, &weight) in scaled.iter().enumerate() {
            if weight < 1.0 {
                small.push(item);
            } else {
                large.push(item);
            }
        }

        while let (Some(&small_item), Some(&large_item)) =
            (small.last(), large.last())
        {
            small.pop();

            thresholds[small_item] = scaled[small_item];
            aliases[small_item] = large_item as u32;

            scaled[large_item] += scaled[small_item] - 1.0;

            if scaled[large_item] < 1.0 {
                large.pop();
                small.push(large_item);
            }
        }

        let heaviest = weights
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or(0, |(item, _)| item);

        // Leftovers are full bins, up to rounding errors; items with no
        // weight must stay unreachable though
        for item in small.into_iter().chain(large) {
            if weights[item] > 0.0 {
                thresholds[item] = 1.0;
                aliases[item] = item as u32;
            } else {
                thresholds[item] = 0.0;
                aliases[item] = heaviest as u32;
            }
        }

        let entries = weights
            .iter()
            .zip(thresholds)
            .zip(aliases)
            .map(|((weight, threshold), alias)| gpu::AliasEntry {
                threshold: threshold as f32,
                alias,
                pdf: (weight / total_weight) as f32,
                _padding: 0,
            })
            .collect();

        Self {
            entries,
            total_weight: total_weight as f32,
        }
    }

    /// Draws an item; returns its index and exact selection probability.
    pub fn sample(&self, u: f32) -> Option<(u32, f32)> {
        gpu::sample_alias_table(&self.entries, u)
    }

    pub fn entries(&self) -> &[gpu::AliasEntry] {
        &self.entries
    }

    pub fn total_weight(&self) -> f32 {
        self.total_weight
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
