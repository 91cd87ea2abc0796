//! Uniform grid spatial hashing.
//!
//! The grid covers the simulation domain with cubic cells twice as wide as the
//! largest interaction radius. Agents are binned by the cell that contains
//! them; neighbor searches visit a 2×2×2 block of cells whose origin is picked
//! with a half-cell offset, which is enough to enclose the whole interaction
//! sphere around any position.

use glam::{UVec3, Vec3};
use rayon::prelude::*;

use crate::config::{grid_side_count, FlockConfig};

/// Derived grid parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridParams {
    /// Width of each cell in world units.
    pub cell_width: f32,
    /// `1.0 / cell_width`, cached for the hot loops.
    pub inv_cell_width: f32,
    /// Number of cells per axis (grid is side^3).
    pub side: u32,
    /// World-space corner of cell (0, 0, 0).
    pub grid_min: Vec3,
}

impl GridParams {
    /// Grid for a cell width covering `[-half_extent, half_extent]^3`.
    pub fn new(cell_width: f32, half_extent: f32) -> Self {
        let side = grid_side_count(cell_width, half_extent) as u32;
        let half_width = cell_width * (side / 2) as f32;
        Self {
            cell_width,
            inv_cell_width: 1.0 / cell_width,
            side,
            grid_min: Vec3::splat(-half_width),
        }
    }

    /// Grid sized for the configuration's largest interaction radius.
    pub fn from_config(config: &FlockConfig) -> Self {
        Self::new(config.max_radius() * 2.0, config.domain_half_extent)
    }

    /// Total number of cells in the grid.
    pub fn cell_count(&self) -> u32 {
        self.side * self.side * self.side
    }

    /// Cell containing `pos`, clamped into the grid.
    #[inline]
    pub fn cell_coord(&self, pos: Vec3) -> UVec3 {
        self.clamp_coord((pos - self.grid_min) * self.inv_cell_width)
    }

    /// Lowest corner of the 2×2×2 search block around `pos`.
    ///
    /// Rounding `f - 0.5` down picks the block whose span `[origin, origin + 2)`
    /// contains `[f - 0.5, f + 0.5]`, i.e. half a cell either side of the agent.
    #[inline]
    pub fn search_origin(&self, pos: Vec3) -> UVec3 {
        self.clamp_coord((pos - self.grid_min) * self.inv_cell_width - Vec3::splat(0.5))
    }

    #[inline]
    fn clamp_coord(&self, scaled: Vec3) -> UVec3 {
        let max = (self.side - 1) as f32;
        scaled.floor().clamp(Vec3::ZERO, Vec3::splat(max)).as_uvec3()
    }

    /// Linear cell id, x-fastest.
    #[inline]
    pub fn cell_id(&self, coord: UVec3) -> u32 {
        coord.x + coord.y * self.side + coord.z * self.side * self.side
    }

    /// Linear id of the cell containing `pos`.
    #[inline]
    pub fn cell_id_of(&self, pos: Vec3) -> u32 {
        self.cell_id(self.cell_coord(pos))
    }

    /// Cell ids of the search block around `pos`.
    ///
    /// Cells past the high edge of the grid are skipped, so agents near the
    /// boundary visit fewer than eight cells.
    #[inline]
    pub fn search_block(&self, pos: Vec3) -> SearchBlock {
        SearchBlock {
            origin: self.search_origin(pos),
            side: self.side,
            next: 0,
        }
    }
}

/// Iterator over the (up to) eight cell ids of a search block.
#[derive(Clone, Debug)]
pub struct SearchBlock {
    origin: UVec3,
    side: u32,
    next: u8,
}

impl Iterator for SearchBlock {
    type Item = u32;

    #[inline]
    fn next(&mut self) -> Option<u32> {
        while self.next < 8 {
            let offset = UVec3::new(
                (self.next & 1) as u32,
                ((self.next >> 1) & 1) as u32,
                ((self.next >> 2) & 1) as u32,
            );
            self.next += 1;

            let cell = self.origin + offset;
            if cell.cmplt(UVec3::splat(self.side)).all() {
                return Some(cell.x + cell.y * self.side + cell.z * self.side * self.side);
            }
        }
        None
    }
}

/// Compute each agent's cell id and reset the permutation to identity.
///
/// Writes `cell_ids[i]` and `agent_ids[i] = i` for every agent in parallel.
pub fn compute_cell_indices(
    grid: &GridParams,
    positions: &[Vec3],
    cell_ids: &mut [u32],
    agent_ids: &mut [u32],
    min_len: usize,
) {
    debug_assert_eq!(positions.len(), cell_ids.len());
    debug_assert_eq!(positions.len(), agent_ids.len());

    cell_ids
        .par_iter_mut()
        .zip(agent_ids.par_iter_mut())
        .zip(positions.par_iter())
        .enumerate()
        .with_min_len(min_len)
        .for_each(|(i, ((cell, agent), &pos))| {
            *cell = grid.cell_id_of(pos);
            *agent = i as u32;
        });
}

/// WGSL grid helpers; expects a `params: SimParams` uniform in scope.
pub const GRID_WGSL: &str = r#"
fn clamp_coord(scaled: vec3<f32>) -> vec3<u32> {
    let max_coord = f32(params.side - 1u);
    return vec3<u32>(clamp(floor(scaled), vec3<f32>(0.0), vec3<f32>(max_coord)));
}

// Cell containing a world position
fn cell_coord(pos: vec3<f32>) -> vec3<u32> {
    return clamp_coord((pos - params.grid_min.xyz) * params.inv_cell_width);
}

// Lowest corner of the 2x2x2 search block around a world position
fn search_origin(pos: vec3<f32>) -> vec3<u32> {
    return clamp_coord((pos - params.grid_min.xyz) * params.inv_cell_width - vec3<f32>(0.5));
}

fn cell_id(coord: vec3<u32>) -> u32 {
    return coord.x + coord.y * params.side + coord.z * params.side * params.side;
}
"#;
