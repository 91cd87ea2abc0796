//! WGSL compute kernels for the GPU backend.
//!
//! Each [`Kernel`] is one compute entry point named `main`. Kernels that
//! need simulation constants read them from a [`SimParams`] uniform at
//! binding 0; the bitonic sort step reads a [`BitonicStage`] instead.
//! Sources are assembled from the shared grid and rule helpers, so the GPU
//! math stays in step with [`grid`](crate::grid) and [`rules`](crate::rules).
//!
//! Agent positions and velocities are stored as `vec4<f32>` with `w` unused,
//! which keeps the storage arrays tightly packed at 16 bytes per agent.

use bytemuck::{Pod, Zeroable};

use crate::config::FlockConfig;
use crate::error::ConfigError;
use crate::grid::{GridParams, GRID_WGSL};
use crate::rules::RULES_WGSL;

/// Threads per workgroup for every kernel.
pub const WORKGROUP_SIZE: u32 = 256;

/// Simulation constants, mirrored by the `SimParams` WGSL struct.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SimParams {
    pub grid_min: [f32; 4],
    pub inv_cell_width: f32,
    pub side: u32,
    pub num_agents: u32,
    pub cell_count: u32,
    pub r1: f32,
    pub r2: f32,
    pub r3: f32,
    pub max_speed: f32,
    pub k1: f32,
    pub k2: f32,
    pub k3: f32,
    pub half_extent: f32,
    pub dt: f32,
    /// Key array length, rounded up to a power of two for the bitonic sort.
    pub padded_len: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl SimParams {
    pub fn new(config: &FlockConfig, grid: &GridParams, num_agents: u32) -> Self {
        Self {
            grid_min: grid.grid_min.extend(0.0).to_array(),
            inv_cell_width: grid.inv_cell_width,
            side: grid.side,
            num_agents,
            cell_count: grid.cell_count(),
            r1: config.r1,
            r2: config.r2,
            r3: config.r3,
            max_speed: config.max_speed,
            k1: config.k1,
            k2: config.k2,
            k3: config.k3,
            half_extent: config.domain_half_extent,
            dt: 0.0,
            padded_len: num_agents.max(1).next_power_of_two(),
            _pad0: 0,
            _pad1: 0,
        }
    }

    /// Check that every 1D dispatch fits in `limit` workgroups.
    ///
    /// The cell table kernels cover `cell_count` items and the sort covers
    /// `padded_len`; every other kernel covers fewer.
    pub fn check_dispatch(&self, limit: u32) -> Result<(), ConfigError> {
        for (kernel, items) in [("cell table", self.cell_count), ("bitonic sort", self.padded_len)] {
            let workgroups = items.div_ceil(WORKGROUP_SIZE);
            if workgroups > limit {
                return Err(ConfigError::DispatchTooLarge { kernel, workgroups, limit });
            }
        }
        Ok(())
    }
}

/// One compare-exchange stage of the bitonic sort.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BitonicStage {
    /// Partner distance.
    pub j: u32,
    /// Size of the sequences being merged.
    pub k: u32,
    pub padded_len: u32,
    pub _pad: u32,
}

/// Every `(j, k)` stage needed to sort `padded_len` keys, in dispatch order.
pub fn bitonic_stages(padded_len: u32) -> Vec<BitonicStage> {
    debug_assert!(padded_len.is_power_of_two());
    let mut stages = Vec::new();
    let mut k = 2;
    while k <= padded_len {
        let mut j = k / 2;
        while j > 0 {
            stages.push(BitonicStage { j, k, padded_len, _pad: 0 });
            j /= 2;
        }
        k *= 2;
    }
    stages
}

/// The compute kernels of one GPU step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    ClearCells,
    ComputeIndices,
    BitonicStep,
    BuildCells,
    Rearrange,
    UpdateBruteForce,
    UpdateIndirect,
    UpdateCoherent,
    Integrate,
}

impl Kernel {
    pub const ALL: [Kernel; 9] = [
        Kernel::ClearCells,
        Kernel::ComputeIndices,
        Kernel::BitonicStep,
        Kernel::BuildCells,
        Kernel::Rearrange,
        Kernel::UpdateBruteForce,
        Kernel::UpdateIndirect,
        Kernel::UpdateCoherent,
        Kernel::Integrate,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Kernel::ClearCells => "clear_cells",
            Kernel::ComputeIndices => "compute_indices",
            Kernel::BitonicStep => "bitonic_step",
            Kernel::BuildCells => "build_cells",
            Kernel::Rearrange => "rearrange",
            Kernel::UpdateBruteForce => "update_brute_force",
            Kernel::UpdateIndirect => "update_grid_indirect",
            Kernel::UpdateCoherent => "update_grid_coherent",
            Kernel::Integrate => "integrate",
        }
    }

    /// Complete WGSL module for this kernel.
    pub fn source(self) -> String {
        match self {
            Kernel::BitonicStep => BITONIC_STEP.to_string(),
            Kernel::ClearCells => with_params(CLEAR_CELLS),
            Kernel::ComputeIndices => with_grid(COMPUTE_INDICES),
            Kernel::BuildCells => with_params(BUILD_CELLS),
            Kernel::Rearrange => with_params(REARRANGE),
            Kernel::UpdateBruteForce => with_rules(UPDATE_BRUTE_FORCE),
            Kernel::UpdateIndirect => with_rules(&format!("{}{}", CELL_TABLE, UPDATE_INDIRECT)),
            Kernel::UpdateCoherent => with_rules(&format!("{}{}", CELL_TABLE, UPDATE_COHERENT)),
            Kernel::Integrate => with_params(INTEGRATE),
        }
    }
}

fn with_params(body: &str) -> String {
    format!("{}\n{}", SIM_PARAMS, body)
}

fn with_grid(body: &str) -> String {
    format!("{}\n{}\n{}", SIM_PARAMS, GRID_WGSL, body)
}

fn with_rules(body: &str) -> String {
    format!("{}\n{}\n{}\n{}", SIM_PARAMS, GRID_WGSL, RULES_WGSL, body)
}

const SIM_PARAMS: &str = r#"
struct SimParams {
    grid_min: vec4<f32>,
    inv_cell_width: f32,
    side: u32,
    num_agents: u32,
    cell_count: u32,
    r1: f32,
    r2: f32,
    r3: f32,
    max_speed: f32,
    k1: f32,
    k2: f32,
    k3: f32,
    half_extent: f32,
    dt: f32,
    padded_len: u32,
    _pad0: u32,
    _pad1: u32,
};

@group(0) @binding(0) var<uniform> params: SimParams;

const EMPTY_CELL: u32 = 0xFFFFFFFFu;
"#;

const CLEAR_CELLS: &str = r#"
@group(0) @binding(1) var<storage, read_write> cell_start: array<u32>;
@group(0) @binding(2) var<storage, read_write> cell_end: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = global_id.x;
    if idx >= params.cell_count {
        return;
    }
    cell_start[idx] = EMPTY_CELL;
    cell_end[idx] = EMPTY_CELL;
}
"#;

// Padding slots get the largest key so they sort to the tail.
const COMPUTE_INDICES: &str = r#"
@group(0) @binding(1) var<storage, read> positions: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read_write> keys: array<u32>;
@group(0) @binding(3) var<storage, read_write> values: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = global_id.x;
    if idx >= params.padded_len {
        return;
    }
    if idx < params.num_agents {
        keys[idx] = cell_id(cell_coord(positions[idx].xyz));
    } else {
        keys[idx] = 0xFFFFFFFFu;
    }
    values[idx] = idx;
}
"#;

const BITONIC_STEP: &str = r#"
struct BitonicStage {
    j: u32,
    k: u32,
    padded_len: u32,
    _pad: u32,
};

@group(0) @binding(0) var<uniform> network: BitonicStage;
@group(0) @binding(1) var<storage, read_write> keys: array<u32>;
@group(0) @binding(2) var<storage, read_write> values: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let i = global_id.x;
    if i >= network.padded_len {
        return;
    }
    let l = i ^ network.j;
    if l <= i {
        return;
    }

    let ascending = (i & network.k) == 0u;
    let key_i = keys[i];
    let key_l = keys[l];
    if (ascending && key_i > key_l) || (!ascending && key_i < key_l) {
        keys[i] = key_l;
        keys[l] = key_i;
        let value_i = values[i];
        values[i] = values[l];
        values[l] = value_i;
    }
}
"#;

const BUILD_CELLS: &str = r#"
@group(0) @binding(1) var<storage, read> keys: array<u32>;
@group(0) @binding(2) var<storage, read_write> cell_start: array<u32>;
@group(0) @binding(3) var<storage, read_write> cell_end: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = global_id.x;
    let n = params.num_agents;
    if idx >= n {
        return;
    }

    let cell = keys[idx];
    if idx == 0u || keys[idx - 1u] != cell {
        cell_start[cell] = idx;
    }
    if idx == n - 1u || keys[idx + 1u] != cell {
        cell_end[cell] = idx + 1u;
    }
}
"#;

const REARRANGE: &str = r#"
@group(0) @binding(1) var<storage, read> values: array<u32>;
@group(0) @binding(2) var<storage, read> positions_in: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> velocities_in: array<vec4<f32>>;
@group(0) @binding(4) var<storage, read> ids_in: array<u32>;
@group(0) @binding(5) var<storage, read_write> positions_out: array<vec4<f32>>;
@group(0) @binding(6) var<storage, read_write> velocities_out: array<vec4<f32>>;
@group(0) @binding(7) var<storage, read_write> ids_out: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let slot = global_id.x;
    if slot >= params.num_agents {
        return;
    }
    let source = values[slot];
    positions_out[slot] = positions_in[source];
    velocities_out[slot] = velocities_in[source];
    ids_out[slot] = ids_in[source];
}
"#;

const UPDATE_BRUTE_FORCE: &str = r#"
@group(0) @binding(1) var<storage, read> positions: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> velocities: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read_write> velocities_out: array<vec4<f32>>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = global_id.x;
    if idx >= params.num_agents {
        return;
    }

    let self_pos = positions[idx].xyz;
    var sums = empty_sums();
    for (var other = 0u; other < params.num_agents; other++) {
        visit_neighbor(&sums, self_pos, positions[other].xyz, velocities[other].xyz);
    }
    velocities_out[idx] = vec4<f32>(resolve_velocity(sums, self_pos, velocities[idx].xyz), 0.0);
}
"#;

// Shared by both grid updates: bindings 1-2 hold agent state, 3-4 the cell table.
const CELL_TABLE: &str = r#"
@group(0) @binding(1) var<storage, read> positions: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> velocities: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read> cell_start: array<u32>;
@group(0) @binding(4) var<storage, read> cell_end: array<u32>;
"#;

const UPDATE_INDIRECT: &str = r#"
@group(0) @binding(5) var<storage, read> values: array<u32>;
@group(0) @binding(6) var<storage, read_write> velocities_out: array<vec4<f32>>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = global_id.x;
    if idx >= params.num_agents {
        return;
    }

    let self_pos = positions[idx].xyz;
    let origin = search_origin(self_pos);
    var sums = empty_sums();
    for (var dz = 0u; dz < 2u; dz++) {
        for (var dy = 0u; dy < 2u; dy++) {
            for (var dx = 0u; dx < 2u; dx++) {
                let coord = origin + vec3<u32>(dx, dy, dz);
                if any(coord >= vec3<u32>(params.side)) {
                    continue;
                }
                let cell = cell_id(coord);
                let start = cell_start[cell];
                if start == EMPTY_CELL {
                    continue;
                }
                let end = cell_end[cell];
                for (var slot = start; slot < end; slot++) {
                    let other = values[slot];
                    visit_neighbor(&sums, self_pos, positions[other].xyz, velocities[other].xyz);
                }
            }
        }
    }
    velocities_out[idx] = vec4<f32>(resolve_velocity(sums, self_pos, velocities[idx].xyz), 0.0);
}
"#;

const UPDATE_COHERENT: &str = r#"
@group(0) @binding(5) var<storage, read_write> velocities_out: array<vec4<f32>>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = global_id.x;
    if idx >= params.num_agents {
        return;
    }

    let self_pos = positions[idx].xyz;
    let origin = search_origin(self_pos);
    var sums = empty_sums();
    for (var dz = 0u; dz < 2u; dz++) {
        for (var dy = 0u; dy < 2u; dy++) {
            for (var dx = 0u; dx < 2u; dx++) {
                let coord = origin + vec3<u32>(dx, dy, dz);
                if any(coord >= vec3<u32>(params.side)) {
                    continue;
                }
                let cell = cell_id(coord);
                let start = cell_start[cell];
                if start == EMPTY_CELL {
                    continue;
                }
                let end = cell_end[cell];
                for (var slot = start; slot < end; slot++) {
                    visit_neighbor(&sums, self_pos, positions[slot].xyz, velocities[slot].xyz);
                }
            }
        }
    }
    velocities_out[idx] = vec4<f32>(resolve_velocity(sums, self_pos, velocities[idx].xyz), 0.0);
}
"#;

const INTEGRATE: &str = r#"
@group(0) @binding(1) var<storage, read_write> positions: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> velocities: array<vec4<f32>>;

fn wrap_axis(value: f32) -> f32 {
    let h = params.half_extent;
    if value > h {
        return value - 2.0 * h;
    }
    if value < -h {
        return value + 2.0 * h;
    }
    return value;
}

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = global_id.x;
    if idx >= params.num_agents {
        return;
    }

    let moved = positions[idx].xyz + velocities[idx].xyz * params.dt;
    positions[idx] = vec4<f32>(wrap_axis(moved.x), wrap_axis(moved.y), wrap_axis(moved.z), 0.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_params_layout() {
        assert_eq!(std::mem::size_of::<SimParams>(), 80);
        assert_eq!(std::mem::size_of::<BitonicStage>(), 16);
    }

    #[test]
    fn test_sim_params_from_config() {
        let config = FlockConfig::default().with_agent_count(1000);
        let grid = GridParams::from_config(&config);
        let params = SimParams::new(&config, &grid, 1000);

        assert_eq!(params.side, 22);
        assert_eq!(params.cell_count, 22 * 22 * 22);
        assert_eq!(params.padded_len, 1024);
        assert_eq!(params.grid_min, [-110.0, -110.0, -110.0, 0.0]);
    }

    #[test]
    fn test_dispatch_limit() {
        let config = FlockConfig::default();
        let params = SimParams::new(&config, &GridParams::from_config(&config), 5000);
        assert_eq!(params.check_dispatch(65_535), Ok(()));

        // side 262: 262^3 cells need 70_253 workgroups
        let wide = FlockConfig::default().with_domain_half_extent(1300.0);
        assert_eq!(wide.validate(), Ok(()));
        let params = SimParams::new(&wide, &GridParams::from_config(&wide), 5000);
        assert_eq!(params.side, 262);
        assert_eq!(
            params.check_dispatch(65_535),
            Err(ConfigError::DispatchTooLarge {
                kernel: "cell table",
                workgroups: 70_253,
                limit: 65_535,
            })
        );
    }

    #[test]
    fn test_bitonic_stage_count() {
        // log2(n) * (log2(n) + 1) / 2 stages
        assert_eq!(bitonic_stages(1).len(), 0);
        assert_eq!(bitonic_stages(2).len(), 1);
        assert_eq!(bitonic_stages(8).len(), 6);
        assert_eq!(bitonic_stages(1024).len(), 55);

        let stages = bitonic_stages(4);
        let pairs: Vec<(u32, u32)> = stages.iter().map(|s| (s.k, s.j)).collect();
        assert_eq!(pairs, vec![(2, 1), (4, 2), (4, 1)]);
    }

    /// Run the bitonic network on the CPU, one stage at a time like the kernel.
    #[test]
    fn test_bitonic_network_sorts() {
        let mut keys: Vec<u32> = vec![5, 0, 6, 2, 2, 0, 3, 0, 1, 0];
        let n = keys.len();
        let padded = (n as u32).next_power_of_two();
        keys.resize(padded as usize, u32::MAX);
        let mut values: Vec<u32> = (0..padded).collect();

        for stage in bitonic_stages(padded) {
            for i in 0..padded {
                let l = i ^ stage.j;
                if l <= i {
                    continue;
                }
                let (i, l) = (i as usize, l as usize);
                let ascending = (i as u32 & stage.k) == 0;
                if (ascending && keys[i] > keys[l]) || (!ascending && keys[i] < keys[l]) {
                    keys.swap(i, l);
                    values.swap(i, l);
                }
            }
        }

        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(&keys[..n], &[0, 0, 0, 0, 1, 2, 2, 3, 5, 6]);
        assert!(values[..n].iter().all(|&v| (v as usize) < n));
    }

    #[test]
    fn test_every_kernel_has_main() {
        for kernel in Kernel::ALL {
            let source = kernel.source();
            assert!(source.contains("fn main("), "{} has no entry point", kernel.label());
            assert!(source.contains("@workgroup_size(256)"));
        }
    }
}
