//! Simulation tunables.
//!
//! Every constant the flocking pipeline depends on lives in [`FlockConfig`]:
//! interaction radii and rule scales, the speed cap, the domain size and the
//! per-task batch size used when splitting passes across workers.
//!
//! ```ignore
//! let config = FlockConfig::default()
//!     .with_agent_count(20_000)
//!     .with_radii(5.0, 3.0, 5.0)
//!     .with_seed(7);
//! config.validate()?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a flocking run.
///
/// Deserializes with `#[serde(default)]`, so a JSON document only needs the
/// fields it wants to override.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlockConfig {
    /// Number of agents, fixed for the run.
    pub agent_count: u32,
    /// Cohesion radius.
    pub r1: f32,
    /// Separation radius.
    pub r2: f32,
    /// Alignment radius.
    pub r3: f32,
    /// Cohesion scale.
    pub k1: f32,
    /// Separation scale.
    pub k2: f32,
    /// Alignment scale.
    pub k3: f32,
    /// Velocities are clamped to this magnitude after every update.
    pub max_speed: f32,
    /// The domain is the cube `[-domain_half_extent, domain_half_extent]^3`.
    pub domain_half_extent: f32,
    /// Minimum number of agents handled by one parallel task.
    pub batch_size: u32,
    /// Seed for the initial agent distribution.
    pub seed: u64,
    /// Initial velocity components are drawn from `[-initial_speed, initial_speed]`.
    pub initial_speed: f32,
    /// Run passes on a dedicated pool of this many threads instead of the global pool.
    pub threads: Option<usize>,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            agent_count: 5_000,
            r1: 5.0,
            r2: 3.0,
            r3: 5.0,
            k1: 0.01,
            k2: 0.1,
            k3: 0.1,
            max_speed: 1.0,
            domain_half_extent: 100.0,
            batch_size: 128,
            seed: 0,
            initial_speed: 0.0,
            threads: None,
        }
    }
}

impl FlockConfig {
    /// Set the number of agents.
    pub fn with_agent_count(mut self, count: u32) -> Self {
        self.agent_count = count;
        self
    }

    /// Set the cohesion, separation and alignment radii.
    pub fn with_radii(mut self, r1: f32, r2: f32, r3: f32) -> Self {
        self.r1 = r1;
        self.r2 = r2;
        self.r3 = r3;
        self
    }

    /// Set the cohesion, separation and alignment scales.
    pub fn with_scales(mut self, k1: f32, k2: f32, k3: f32) -> Self {
        self.k1 = k1;
        self.k2 = k2;
        self.k3 = k3;
        self
    }

    /// Set the speed cap.
    pub fn with_max_speed(mut self, max_speed: f32) -> Self {
        self.max_speed = max_speed;
        self
    }

    /// Set the half-size of the cubic domain.
    pub fn with_domain_half_extent(mut self, half_extent: f32) -> Self {
        self.domain_half_extent = half_extent;
        self
    }

    /// Set the minimum number of agents per parallel task.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the seed for initial positions and velocities.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Give agents random initial velocities up to `speed` per axis.
    pub fn with_initial_speed(mut self, speed: f32) -> Self {
        self.initial_speed = speed;
        self
    }

    /// Run on a dedicated worker pool.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Largest of the three interaction radii.
    pub fn max_radius(&self) -> f32 {
        self.r1.max(self.r2).max(self.r3)
    }

    /// Batch size as a `usize`, for `with_min_len`.
    #[inline]
    pub fn min_len(&self) -> usize {
        self.batch_size.max(1) as usize
    }

    /// Check every field and the derived grid size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent_count == 0 {
            return Err(ConfigError::ZeroAgents);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }

        for (field, value) in [
            ("r1", self.r1),
            ("r2", self.r2),
            ("r3", self.r3),
            ("max_speed", self.max_speed),
            ("domain_half_extent", self.domain_half_extent),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { field });
            }
            if value <= 0.0 {
                return Err(ConfigError::NonPositive { field, value });
            }
        }

        for (field, value) in [
            ("k1", self.k1),
            ("k2", self.k2),
            ("k3", self.k3),
            ("initial_speed", self.initial_speed),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { field });
            }
        }

        let side = grid_side_count(self.max_radius() * 2.0, self.domain_half_extent);
        if side.saturating_mul(side).saturating_mul(side) >= u32::MAX as u64 {
            return Err(ConfigError::GridTooLarge { side });
        }

        Ok(())
    }
}

/// Cells per axis for a grid of `cell_width` covering `[-half_extent, half_extent]`.
///
/// One extra cell on each side keeps every in-domain position off the clamp.
pub(crate) fn grid_side_count(cell_width: f32, half_extent: f32) -> u64 {
    let half_side = (half_extent / cell_width).floor() as u64 + 1;
    half_side * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert_eq!(FlockConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_builder_chain() {
        let config = FlockConfig::default()
            .with_agent_count(64)
            .with_radii(1.0, 2.0, 4.0)
            .with_scales(0.5, 0.25, 0.125)
            .with_max_speed(3.0)
            .with_domain_half_extent(10.0)
            .with_batch_size(16)
            .with_seed(99)
            .with_initial_speed(0.5)
            .with_threads(2);

        assert_eq!(config.agent_count, 64);
        assert_eq!(config.max_radius(), 4.0);
        assert_eq!(config.k3, 0.125);
        assert_eq!(config.min_len(), 16);
        assert_eq!(config.threads, Some(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_radius() {
        let config = FlockConfig::default().with_radii(5.0, 0.0, 5.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositive { field: "r2", value: 0.0 })
        );

        let config = FlockConfig::default().with_radii(f32::NAN, 1.0, 1.0);
        assert_eq!(config.validate(), Err(ConfigError::NonFinite { field: "r1" }));
    }

    #[test]
    fn test_rejects_empty_population_and_batch() {
        assert_eq!(
            FlockConfig::default().with_agent_count(0).validate(),
            Err(ConfigError::ZeroAgents)
        );
        assert_eq!(
            FlockConfig::default().with_batch_size(0).validate(),
            Err(ConfigError::ZeroBatchSize)
        );
        assert_eq!(
            FlockConfig::default().with_threads(0).validate(),
            Err(ConfigError::ZeroThreads)
        );
    }

    #[test]
    fn test_rejects_oversized_grid() {
        let config = FlockConfig::default()
            .with_radii(0.001, 0.001, 0.001)
            .with_domain_half_extent(1000.0);
        assert!(matches!(config.validate(), Err(ConfigError::GridTooLarge { .. })));
    }

    #[test]
    fn test_side_count() {
        // 100 / 10 = 10 cells per half, plus one spare
        assert_eq!(grid_side_count(10.0, 100.0), 22);
        assert_eq!(grid_side_count(10.0, 95.0), 20);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FlockConfig =
            serde_json::from_str(r#"{ "agent_count": 12, "r2": 1.5 }"#).unwrap();
        assert_eq!(config.agent_count, 12);
        assert_eq!(config.r2, 1.5);
        assert_eq!(config.r1, FlockConfig::default().r1);
        assert_eq!(config.threads, None);
    }
}
