//! # gridflock
//!
//! Data-parallel boids with a uniform-grid neighbor search.
//!
//! Every agent steers by three rules (cohesion, separation, alignment)
//! evaluated over the agents within fixed radii. gridflock finds those agents
//! one of three ways and runs each stage of the step as a rayon parallel pass.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gridflock::prelude::*;
//!
//! fn main() -> Result<(), FlockError> {
//!     gridflock::init_logging(None);
//!
//!     let config = FlockConfig::default()
//!         .with_agent_count(20_000)
//!         .with_initial_speed(0.5)
//!         .with_seed(42);
//!     let mut sim = FlockSimulation::new(config)?;
//!
//!     for _ in 0..500 {
//!         sim.step(0.2, SearchVariant::GridCoherent);
//!     }
//!
//!     let positions = sim.export_positions(); // indexed by agent id
//!     let stats = sim.teardown();
//!     println!("{} steps, sort {:?}", stats.steps(), stats.total(Pass::Sort));
//!     Ok(())
//! }
//! ```
//!
//! ## Search Variants
//!
//! | Variant | Per-step work |
//! |---------|---------------|
//! | [`SearchVariant::BruteForce`] | O(N²) scan |
//! | [`SearchVariant::GridIndirect`] | index, sort, buckets, 2×2×2 cell scan through the permutation |
//! | [`SearchVariant::GridCoherent`] | as above, plus a rearrange so cell scans read contiguous memory |
//!
//! The grid cell is twice the largest interaction radius, so a 2×2×2 block
//! picked around each agent always encloses its neighborhood.
//!
//! ## Sorting
//!
//! The index sort is pluggable through [`KeySort`]. [`RadixSort`] is the
//! default; [`ParallelSort`] wraps rayon's parallel sort. Check a custom
//! strategy with [`sort::self_test`] before trusting it with a simulation.
//!
//! ## GPU Backend
//!
//! With the `gpu` feature, `gpu::GpuFlock` runs the same pipeline as wgpu
//! compute passes. The WGSL sources live in [`shaders`] and are validated
//! in ordinary test runs.

pub mod buckets;
pub mod config;
pub mod error;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod grid;
pub mod integrate;
pub mod neighbors;
pub mod rules;
pub mod shaders;
mod simulation;
pub mod sort;
pub mod store;
pub mod time;

pub use bytemuck;
pub use glam::{UVec3, Vec3};

pub use buckets::{CellBuckets, EMPTY_CELL};
pub use config::FlockConfig;
pub use error::{ConfigError, FlockError, SortError};
#[cfg(feature = "gpu")]
pub use error::GpuError;
pub use grid::GridParams;
pub use neighbors::SearchVariant;
pub use rules::FlockRules;
pub use simulation::FlockSimulation;
pub use sort::{KeySort, ParallelSort, RadixSort};
pub use time::{Pass, StepClock};

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber that logs to stderr.
///
/// `RUST_LOG` takes precedence; otherwise `level` is used, defaulting to
/// `info`. Calling it again after a subscriber is installed does nothing.
pub fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Convenient re-exports for common usage.
///
/// ```ignore
/// use gridflock::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::FlockConfig;
    pub use crate::error::FlockError;
    pub use crate::neighbors::SearchVariant;
    pub use crate::simulation::FlockSimulation;
    pub use crate::sort::{KeySort, ParallelSort, RadixSort};
    pub use crate::time::{Pass, StepClock};
    pub use glam::Vec3;
}
