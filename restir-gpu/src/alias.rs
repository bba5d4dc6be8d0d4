use bytemuck::{Pod, Zeroable};

/// Single bin of an alias table.
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[cfg_attr(not(target_arch = "spirv"), derive(Debug))]
pub struct AliasEntry {
    /// Probability of keeping this bin's own item rather than its alias
    pub threshold: f32,
    pub alias: u32,
    /// Exact selection probability of this bin's own item
    pub pdf: f32,
    pub _padding: u32,
}

/// Draws an item from given alias table; returns its index and selection
/// probability.
///
/// Returns `None` for an empty table.
pub fn sample_alias_table(
    entries: &[AliasEntry],
    u: f32,
) -> Option<(u32, f32)> {
    if entries.is_empty() {
        return None;
    }

    let n = entries.len();
    let scaled = u * n as f32;
    let bin = (scaled as usize).min(n - 1);
    let frac = scaled - bin as f32;

    let item = if frac < entries[bin].threshold {
        bin
    } else {
        entries[bin].alias as usize
    };

    Some((item as u32, entries[item].pdf))
}
