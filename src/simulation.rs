//! The step pipeline.
//!
//! [`FlockSimulation`] owns every buffer and runs the passes in order:
//!
//! ```text
//! index -> sort -> buckets -> [rearrange] -> velocity -> integrate
//! ```
//!
//! Each pass is a rayon parallel iterator and returns only when every agent
//! has been processed, so the next pass always sees complete results.
//! Brute-force steps skip the grid passes entirely.
//!
//! ```ignore
//! let config = FlockConfig::default().with_agent_count(10_000).with_seed(3);
//! let mut sim = FlockSimulation::new(config)?;
//! for _ in 0..100 {
//!     sim.step(0.2, SearchVariant::GridCoherent);
//! }
//! let positions = sim.export_positions();
//! let stats = sim.teardown();
//! ```

use std::sync::Arc;

use glam::Vec3;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, debug_span, info};

use crate::buckets::CellBuckets;
use crate::config::FlockConfig;
use crate::error::FlockError;
use crate::grid::{compute_cell_indices, GridParams};
use crate::integrate::integrate;
use crate::neighbors::{
    rearrange, update_brute_force, update_grid_coherent, update_grid_indirect, SearchVariant,
};
use crate::rules::FlockRules;
use crate::sort::{KeySort, RadixSort};
use crate::store::{try_buffer, AgentStore};
use crate::time::{Pass, StepClock};

/// A flock of agents and the buffers needed to step it.
///
/// Created ready to step. [`teardown`](Self::teardown) consumes it, so a
/// released simulation cannot be stepped again.
pub struct FlockSimulation {
    config: FlockConfig,
    grid: GridParams,
    rules: FlockRules,
    store: AgentStore,
    /// Cell id per slot; ascending after the sort pass.
    cell_ids: Vec<u32>,
    /// Buffer index per slot; grouped by cell after the sort pass.
    permutation: Vec<u32>,
    buckets: CellBuckets,
    sorter: Box<dyn KeySort>,
    pool: Option<Arc<ThreadPool>>,
    clock: StepClock,
}

impl FlockSimulation {
    /// Seed a random flock from `config` and allocate every buffer.
    pub fn new(config: FlockConfig) -> Result<Self, FlockError> {
        Self::with_sorter(config, Box::new(RadixSort::default()))
    }

    /// Like [`new`](Self::new), sorting the cell index with `sorter`.
    pub fn with_sorter(config: FlockConfig, sorter: Box<dyn KeySort>) -> Result<Self, FlockError> {
        config.validate()?;
        let store = AgentStore::random(&config)?;
        Self::assemble(config, store, sorter)
    }

    /// Start from explicit agent state instead of a random distribution.
    ///
    /// `config.agent_count` is replaced by the number of agents given.
    pub fn from_agents(
        config: FlockConfig,
        positions: Vec<Vec3>,
        velocities: Vec<Vec3>,
    ) -> Result<Self, FlockError> {
        let config = config.with_agent_count(positions.len() as u32);
        config.validate()?;
        let store = AgentStore::from_agents(positions, velocities)?;
        Self::assemble(config, store, Box::new(RadixSort::default()))
    }

    fn assemble(
        config: FlockConfig,
        store: AgentStore,
        sorter: Box<dyn KeySort>,
    ) -> Result<Self, FlockError> {
        let n = store.len();
        let grid = GridParams::from_config(&config);
        let buckets = CellBuckets::new(grid.cell_count())?;

        let pool = match config.threads {
            Some(threads) => Some(Arc::new(
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("gridflock-worker-{}", i))
                    .build()?,
            )),
            None => None,
        };

        info!(
            agents = n,
            cell_width = grid.cell_width,
            side = grid.side,
            cells = grid.cell_count(),
            sorter = sorter.name(),
            threads = config.threads.unwrap_or_else(rayon::current_num_threads),
            "flock initialized"
        );

        Ok(Self {
            rules: FlockRules::from_config(&config),
            cell_ids: try_buffer(n, 0u32, "cell id index")?,
            permutation: try_buffer(n, 0u32, "permutation table")?,
            config,
            grid,
            store,
            buckets,
            sorter,
            pool,
            clock: StepClock::new(),
        })
    }

    /// Advance the flock by `dt` using the given neighbor search.
    ///
    /// Blocks until every pass has finished.
    pub fn step(&mut self, dt: f32, variant: SearchVariant) {
        let _span = debug_span!("step", step = self.clock.steps(), %variant).entered();
        let started = self.clock.begin_step();

        match self.pool.clone() {
            Some(pool) => pool.install(|| self.run_passes(dt, variant)),
            None => self.run_passes(dt, variant),
        }

        self.clock.end_step(started);
        debug!(
            elapsed_us = self.clock.last_step().as_micros() as u64,
            velocity_us = self.clock.last(Pass::Velocity).as_micros() as u64,
            "step complete"
        );
    }

    fn run_passes(&mut self, dt: f32, variant: SearchVariant) {
        let min_len = self.config.min_len();

        if variant.uses_grid() {
            self.build_index(min_len);
        }
        if variant == SearchVariant::GridCoherent {
            self.rearrange(min_len);
        }

        self.clock.time(Pass::Velocity, || {
            let _s = debug_span!("pass", name = "velocity").entered();
            let (positions, velocities) = self.store.buffers_mut();
            let (vel_front, vel_back) = velocities.split_mut();
            let pos = positions.front();
            match variant {
                SearchVariant::BruteForce => {
                    update_brute_force(&self.rules, pos, vel_front, vel_back, min_len)
                }
                SearchVariant::GridIndirect => update_grid_indirect(
                    &self.rules,
                    &self.grid,
                    &self.buckets,
                    &self.permutation,
                    pos,
                    vel_front,
                    vel_back,
                    min_len,
                ),
                SearchVariant::GridCoherent => update_grid_coherent(
                    &self.rules,
                    &self.grid,
                    &self.buckets,
                    pos,
                    vel_front,
                    vel_back,
                    min_len,
                ),
            }
            velocities.flip();
        });

        self.clock.time(Pass::Integrate, || {
            let _s = debug_span!("pass", name = "integrate").entered();
            let (positions, velocities) = self.store.buffers_mut();
            integrate(
                positions.front_mut(),
                velocities.front(),
                dt,
                self.config.domain_half_extent,
                min_len,
            );
        });
    }

    /// Index, sort and bucket the current positions.
    fn build_index(&mut self, min_len: usize) {
        self.clock.time(Pass::Index, || {
            let _s = debug_span!("pass", name = "index").entered();
            compute_cell_indices(
                &self.grid,
                self.store.positions().front(),
                &mut self.cell_ids,
                &mut self.permutation,
                min_len,
            );
        });

        self.clock.time(Pass::Sort, || {
            let _s = debug_span!("pass", name = "sort", sorter = self.sorter.name()).entered();
            self.sorter.sort_by_key(&mut self.cell_ids, &mut self.permutation);
        });

        self.clock.time(Pass::Buckets, || {
            let _s = debug_span!("pass", name = "buckets").entered();
            self.buckets.reset(min_len);
            self.buckets.locate(&self.cell_ids, min_len);
        });
    }

    /// Gather positions, velocities and agent ids into slot order.
    fn rearrange(&mut self, min_len: usize) {
        self.clock.time(Pass::Rearrange, || {
            let _s = debug_span!("pass", name = "rearrange").entered();
            let (positions, velocities) = self.store.buffers_mut();

            let (front, back) = positions.split_mut();
            rearrange(&self.permutation, front, back, min_len);
            positions.flip();

            let (front, back) = velocities.split_mut();
            rearrange(&self.permutation, front, back, min_len);
            velocities.flip();

            self.store.renumber(&self.permutation, min_len);
        });
    }

    /// Positions indexed by agent id.
    pub fn export_positions(&self) -> Vec<Vec3> {
        self.store.export_positions()
    }

    /// Velocities indexed by agent id.
    pub fn export_velocities(&self) -> Vec<Vec3> {
        self.store.export_velocities()
    }

    /// Raw position buffer, in slot order once a coherent step has run.
    pub fn positions(&self) -> &[Vec3] {
        self.store.positions().front()
    }

    /// Raw velocity buffer, in the same order as [`positions`](Self::positions).
    pub fn velocities(&self) -> &[Vec3] {
        self.store.velocities().front()
    }

    /// Agent id held in each slot of the raw buffers.
    pub fn agent_ids(&self) -> &[u32] {
        self.store.agent_ids()
    }

    pub fn agent_count(&self) -> usize {
        self.store.len()
    }

    /// Cell ids from the most recent grid step, ascending.
    pub fn sorted_cell_ids(&self) -> &[u32] {
        &self.cell_ids
    }

    /// Slot-to-buffer-index table from the most recent grid step.
    pub fn permutation(&self) -> &[u32] {
        &self.permutation
    }

    /// Cell start/end table from the most recent grid step.
    pub fn cell_buckets(&self) -> &CellBuckets {
        &self.buckets
    }

    pub fn grid(&self) -> &GridParams {
        &self.grid
    }

    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    pub fn rules(&self) -> &FlockRules {
        &self.rules
    }

    /// Name of the sort strategy in use.
    pub fn sorter_name(&self) -> &'static str {
        self.sorter.name()
    }

    /// Timing statistics so far.
    pub fn stats(&self) -> &StepClock {
        &self.clock
    }

    /// Release every buffer and return the final timing statistics.
    pub fn teardown(self) -> StepClock {
        info!(
            steps = self.clock.steps(),
            elapsed_ms = self.clock.elapsed().as_millis() as u64,
            "flock torn down"
        );
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::ParallelSort;

    fn small() -> FlockConfig {
        FlockConfig::default()
            .with_agent_count(64)
            .with_domain_half_extent(20.0)
            .with_batch_size(8)
            .with_seed(5)
            .with_initial_speed(0.3)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = FlockSimulation::new(FlockConfig::default().with_agent_count(0)).err();
        assert!(matches!(err, Some(FlockError::Config(_))));
    }

    #[test]
    fn test_step_counts() {
        let mut sim = FlockSimulation::new(small()).unwrap();
        for variant in SearchVariant::ALL {
            sim.step(0.1, variant);
        }
        assert_eq!(sim.stats().steps(), 3);
        assert_eq!(sim.teardown().steps(), 3);
    }

    #[test]
    fn test_brute_force_skips_grid_passes() {
        let mut sim = FlockSimulation::new(small()).unwrap();
        sim.step(0.1, SearchVariant::BruteForce);
        assert_eq!(sim.stats().total(Pass::Sort), std::time::Duration::ZERO);
        assert_eq!(sim.stats().total(Pass::Rearrange), std::time::Duration::ZERO);
        assert_eq!(sim.agent_ids(), (0..64).collect::<Vec<u32>>().as_slice());
    }

    #[test]
    fn test_coherent_step_leaves_slot_order() {
        let mut sim = FlockSimulation::new(small()).unwrap();
        sim.step(0.0, SearchVariant::GridCoherent);

        let mut ids = sim.agent_ids().to_vec();
        ids.sort_unstable();
        assert_eq!(ids, (0..64).collect::<Vec<u32>>());

        let exported = sim.export_positions();
        for (slot, &id) in sim.agent_ids().iter().enumerate() {
            assert_eq!(exported[id as usize], sim.positions()[slot]);
        }
        assert!(sim.sorted_cell_ids().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_pass_times_fit_inside_step() {
        let mut sim = FlockSimulation::new(small()).unwrap();
        sim.step(0.1, SearchVariant::GridCoherent);

        let stats = sim.stats();
        let passes: std::time::Duration = Pass::ALL.iter().map(|&p| stats.last(p)).sum();
        assert!(passes <= stats.last_step());
        assert!(stats.last(Pass::Velocity) > std::time::Duration::ZERO);
        assert_eq!(stats.total(Pass::Sort), stats.last(Pass::Sort));
    }

    #[test]
    fn test_dedicated_pool_and_sorter() {
        let config = small().with_threads(2);
        let mut sim =
            FlockSimulation::with_sorter(config, Box::new(ParallelSort::default())).unwrap();
        assert_eq!(sim.sorter_name(), "parallel");
        sim.step(0.1, SearchVariant::GridIndirect);
        assert_eq!(sim.export_velocities().len(), 64);
    }

    #[test]
    fn test_from_agents_overrides_count() {
        let sim = FlockSimulation::from_agents(
            FlockConfig::default(),
            vec![Vec3::ZERO, Vec3::ONE],
            vec![Vec3::X, Vec3::Y],
        )
        .unwrap();
        assert_eq!(sim.agent_count(), 2);
        assert_eq!(sim.config().agent_count, 2);
        assert_eq!(sim.export_velocities(), vec![Vec3::X, Vec3::Y]);
    }
}
