//! Velocity update passes.
//!
//! Three ways to gather the candidate set for each agent, all evaluated with
//! the same [`RuleAccumulator`]:
//!
//! | Variant | Candidates | Buffers read |
//! |---------|------------|--------------|
//! | [`SearchVariant::BruteForce`] | every agent | agent order |
//! | [`SearchVariant::GridIndirect`] | 2×2×2 cell block | agent order, through the permutation |
//! | [`SearchVariant::GridCoherent`] | 2×2×2 cell block | slot order, after [`rearrange`] |
//!
//! Every pass reads one buffer pair and writes a separate output buffer, so
//! workers never observe each other's writes.

use std::fmt;
use std::str::FromStr;

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::buckets::CellBuckets;
use crate::grid::GridParams;
use crate::rules::{FlockRules, RuleAccumulator};

/// Neighbor search strategy for one step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchVariant {
    /// Test every agent against every other agent. O(N²).
    BruteForce,
    /// Grid search reading agent-ordered buffers through the permutation.
    GridIndirect,
    /// Grid search over buffers rearranged into slot order.
    #[default]
    GridCoherent,
}

impl SearchVariant {
    /// All variants, in increasing order of sophistication.
    pub const ALL: [SearchVariant; 3] = [
        SearchVariant::BruteForce,
        SearchVariant::GridIndirect,
        SearchVariant::GridCoherent,
    ];

    /// Whether the variant needs the grid index, sort and bucket passes.
    pub fn uses_grid(self) -> bool {
        !matches!(self, SearchVariant::BruteForce)
    }

    pub fn name(self) -> &'static str {
        match self {
            SearchVariant::BruteForce => "brute_force",
            SearchVariant::GridIndirect => "grid_indirect",
            SearchVariant::GridCoherent => "grid_coherent",
        }
    }
}

impl fmt::Display for SearchVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown [`SearchVariant`] name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVariantError(pub String);

impl fmt::Display for ParseVariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown search variant `{}` (expected brute_force, grid_indirect or grid_coherent)",
            self.0
        )
    }
}

impl std::error::Error for ParseVariantError {}

impl FromStr for SearchVariant {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "brute_force" | "brute" | "naive" => Ok(SearchVariant::BruteForce),
            "grid_indirect" | "indirect" | "scattered" => Ok(SearchVariant::GridIndirect),
            "grid_coherent" | "coherent" => Ok(SearchVariant::GridCoherent),
            _ => Err(ParseVariantError(s.to_string())),
        }
    }
}

/// Brute-force update: every agent is a candidate for every other.
pub fn update_brute_force(
    rules: &FlockRules,
    positions: &[Vec3],
    velocities: &[Vec3],
    out: &mut [Vec3],
    min_len: usize,
) {
    out.par_iter_mut()
        .enumerate()
        .with_min_len(min_len)
        .for_each(|(i, new_vel)| {
            let self_pos = positions[i];
            let mut acc = RuleAccumulator::default();
            for (&pos, &vel) in positions.iter().zip(velocities) {
                acc.visit(rules, self_pos, pos, vel);
            }
            *new_vel = acc.resolve(rules, self_pos, velocities[i]);
        });
}

/// Grid update over agent-ordered buffers.
///
/// Slots inside a cell's range are resolved through `permutation` to find
/// the agent index into `positions` and `velocities`.
#[allow(clippy::too_many_arguments)]
pub fn update_grid_indirect(
    rules: &FlockRules,
    grid: &GridParams,
    buckets: &CellBuckets,
    permutation: &[u32],
    positions: &[Vec3],
    velocities: &[Vec3],
    out: &mut [Vec3],
    min_len: usize,
) {
    out.par_iter_mut()
        .enumerate()
        .with_min_len(min_len)
        .for_each(|(i, new_vel)| {
            let self_pos = positions[i];
            let mut acc = RuleAccumulator::default();
            for cell in grid.search_block(self_pos) {
                let Some(slots) = buckets.range(cell) else {
                    continue;
                };
                for &agent in &permutation[slots] {
                    let agent = agent as usize;
                    acc.visit(rules, self_pos, positions[agent], velocities[agent]);
                }
            }
            *new_vel = acc.resolve(rules, self_pos, velocities[i]);
        });
}

/// Grid update over slot-ordered buffers.
///
/// `positions` and `velocities` must already be in slot order (see
/// [`rearrange`]); `out` is written in slot order too.
pub fn update_grid_coherent(
    rules: &FlockRules,
    grid: &GridParams,
    buckets: &CellBuckets,
    positions: &[Vec3],
    velocities: &[Vec3],
    out: &mut [Vec3],
    min_len: usize,
) {
    out.par_iter_mut()
        .enumerate()
        .with_min_len(min_len)
        .for_each(|(slot, new_vel)| {
            let self_pos = positions[slot];
            let mut acc = RuleAccumulator::default();
            for cell in grid.search_block(self_pos) {
                let Some(slots) = buckets.range(cell) else {
                    continue;
                };
                for (&pos, &vel) in positions[slots.clone()].iter().zip(&velocities[slots]) {
                    acc.visit(rules, self_pos, pos, vel);
                }
            }
            *new_vel = acc.resolve(rules, self_pos, velocities[slot]);
        });
}

/// Gather `src` into slot order: `dst[s] = src[permutation[s]]`.
pub fn rearrange<T: Copy + Send + Sync>(
    permutation: &[u32],
    src: &[T],
    dst: &mut [T],
    min_len: usize,
) {
    debug_assert_eq!(permutation.len(), dst.len());
    dst.par_iter_mut()
        .zip(permutation.par_iter())
        .with_min_len(min_len)
        .for_each(|(out, &index)| *out = src[index as usize]);
}
