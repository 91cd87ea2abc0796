//! Grid, bucket, clamp and wraparound properties of a full step.

use gridflock::prelude::*;
use gridflock::EMPTY_CELL;

const GRID_VARIANTS: [SearchVariant; 2] = [SearchVariant::GridIndirect, SearchVariant::GridCoherent];

/// Velocities after one zero-length step, indexed by agent id.
fn step_velocities(positions: Vec<Vec3>, velocities: Vec<Vec3>, variant: SearchVariant) -> Vec<Vec3> {
    step_velocities_with(FlockConfig::default(), positions, velocities, variant)
}

fn step_velocities_with(
    config: FlockConfig,
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    variant: SearchVariant,
) -> Vec<Vec3> {
    let mut sim = FlockSimulation::from_agents(config, positions, velocities).unwrap();
    sim.step(0.0, variant);
    sim.export_velocities()
}

fn assert_vec_close(a: Vec3, b: Vec3) {
    assert!((a - b).length() < 1e-5, "{} vs {}", a, b);
}

// ============================================================================
// Bucket completeness
// ============================================================================

#[test]
fn test_buckets_tile_all_slots() {
    let config = FlockConfig::default()
        .with_agent_count(2_000)
        .with_domain_half_extent(40.0)
        .with_seed(9);

    for variant in GRID_VARIANTS {
        let mut sim = FlockSimulation::new(config).unwrap();
        sim.step(0.2, variant);

        let sorted = sim.sorted_cell_ids();
        let buckets = sim.cell_buckets();
        let mut covered = vec![0u8; sim.agent_count()];
        let mut expected_start = 0;

        for (cell, range) in buckets.occupied() {
            assert!(range.end > range.start, "cell {} has an empty range", cell);
            assert_eq!(range.start, expected_start, "ranges must be contiguous");
            expected_start = range.end;
            for slot in range {
                assert_eq!(sorted[slot], cell);
                covered[slot] += 1;
            }
        }

        assert_eq!(expected_start, sim.agent_count());
        assert!(covered.iter().all(|&c| c == 1));

        for cell in 0..buckets.cell_count() as u32 {
            if buckets.range(cell).is_none() {
                assert_eq!(buckets.start(cell), EMPTY_CELL);
                assert_eq!(buckets.end(cell), EMPTY_CELL);
            }
        }
    }
}

#[test]
fn test_permutation_is_a_permutation() {
    let mut sim = FlockSimulation::new(FlockConfig::default().with_agent_count(300)).unwrap();
    sim.step(0.2, SearchVariant::GridIndirect);

    let mut seen = vec![false; 300];
    for &index in sim.permutation() {
        assert!(!seen[index as usize]);
        seen[index as usize] = true;
    }
    assert!(sim.sorted_cell_ids().windows(2).all(|w| w[0] <= w[1]));
}

// ============================================================================
// Neighbor sufficiency
// ============================================================================

#[test]
fn test_neighbors_inside_radius_across_cell_boundary() {
    // Cells are 10 wide with a boundary at x = 0; the pair is 4.9 apart
    let positions = vec![Vec3::new(-2.45, 0.0, 0.0), Vec3::new(2.45, 0.0, 0.0)];
    let velocities = vec![Vec3::ZERO; 2];

    let brute = step_velocities(positions.clone(), velocities.clone(), SearchVariant::BruteForce);
    assert_vec_close(brute[0], Vec3::new(0.0245, 0.0, 0.0));
    assert_vec_close(brute[1], Vec3::new(-0.0245, 0.0, 0.0));

    for variant in GRID_VARIANTS {
        let grid = step_velocities(positions.clone(), velocities.clone(), variant);
        assert_vec_close(grid[0], brute[0]);
        assert_vec_close(grid[1], brute[1]);
    }
}

#[test]
fn test_neighbors_exactly_at_radius_are_excluded() {
    let positions = vec![Vec3::new(-2.5, 0.0, 0.0), Vec3::new(2.5, 0.0, 0.0)];
    let velocities = vec![Vec3::ZERO; 2];

    for variant in SearchVariant::ALL {
        let out = step_velocities(positions.clone(), velocities.clone(), variant);
        assert_eq!(out, vec![Vec3::ZERO; 2], "{} counted a neighbor at the radius", variant);
    }
}

#[test]
fn test_separation_radius_is_strict() {
    // 3.0 apart: inside cohesion (5) but exactly at separation (3)
    let at = vec![Vec3::new(-1.5, 0.0, 0.0), Vec3::new(1.5, 0.0, 0.0)];
    // 2.98 apart: inside both
    let inside = vec![Vec3::new(-1.49, 0.0, 0.0), Vec3::new(1.49, 0.0, 0.0)];

    for variant in SearchVariant::ALL {
        let out = step_velocities(at.clone(), vec![Vec3::ZERO; 2], variant);
        assert_vec_close(out[0], Vec3::new(0.015, 0.0, 0.0));

        let out = step_velocities(inside.clone(), vec![Vec3::ZERO; 2], variant);
        assert_vec_close(out[0], Vec3::new(0.0149 - 0.298, 0.0, 0.0));
    }
}

#[test]
fn test_neighbors_across_cell_corner() {
    // Diagonal pair straddling the corner at the origin, 4.85 apart
    let positions = vec![Vec3::splat(-1.4), Vec3::splat(1.4)];
    let velocities = vec![Vec3::new(0.0, 0.2, 0.0), Vec3::new(0.0, 0.0, 0.2)];

    let brute = step_velocities(positions.clone(), velocities.clone(), SearchVariant::BruteForce);
    for variant in GRID_VARIANTS {
        let grid = step_velocities(positions.clone(), velocities.clone(), variant);
        assert_vec_close(grid[0], brute[0]);
        assert_vec_close(grid[1], brute[1]);
    }
    // cohesion 0.014 per axis toward the origin, alignment (0, 0.01, 0.01)
    assert_vec_close(brute[0], Vec3::new(0.014, 0.224, 0.024));
    assert_vec_close(brute[1], Vec3::new(-0.014, -0.004, 0.196));

    let no_alignment = FlockConfig::default().with_scales(0.01, 0.1, 0.0);
    for variant in SearchVariant::ALL {
        let without = step_velocities_with(no_alignment, positions.clone(), velocities.clone(), variant);
        let with = step_velocities(positions.clone(), velocities.clone(), variant);
        for (a, b) in with.iter().zip(&without) {
            assert_vec_close(*a - *b, Vec3::new(0.0, 0.01, 0.01));
        }
    }
}

#[test]
fn test_neighbors_near_high_grid_edge() {
    let positions = vec![Vec3::splat(99.0), Vec3::splat(97.0)];
    let velocities = vec![Vec3::ZERO; 2];

    for variant in GRID_VARIANTS {
        let out = step_velocities(positions.clone(), velocities.clone(), variant);
        assert_vec_close(out[0], Vec3::splat(-0.01));
        assert_vec_close(out[1], Vec3::splat(0.01));
    }
}

#[test]
fn test_search_does_not_wrap() {
    // Close through the wrapped boundary but 199 apart in space
    let positions = vec![Vec3::new(99.5, 0.0, 0.0), Vec3::new(-99.5, 0.0, 0.0)];
    let velocities = vec![Vec3::ZERO; 2];

    for variant in SearchVariant::ALL {
        let out = step_velocities(positions.clone(), velocities.clone(), variant);
        assert_eq!(out, vec![Vec3::ZERO; 2]);
    }
}

// ============================================================================
// Speed clamp
// ============================================================================

#[test]
fn test_speed_is_clamped_with_direction_preserved() {
    for variant in SearchVariant::ALL {
        let out = step_velocities(vec![Vec3::ZERO], vec![Vec3::new(3.0, 4.0, 0.0)], variant);
        assert!((out[0].length() - 1.0).abs() < 1e-6);
        assert_vec_close(out[0], Vec3::new(0.6, 0.8, 0.0));
    }
}

#[test]
fn test_speed_never_exceeds_max_over_a_run() {
    let config = FlockConfig::default()
        .with_agent_count(400)
        .with_domain_half_extent(15.0)
        .with_initial_speed(2.0)
        .with_max_speed(0.75);
    let mut sim = FlockSimulation::new(config).unwrap();

    for variant in SearchVariant::ALL {
        sim.step(0.5, variant);
        assert!(sim.velocities().iter().all(|v| v.length() <= 0.75 + 1e-5));
    }
}

// ============================================================================
// Wraparound
// ============================================================================

#[test]
fn test_resting_agent_on_boundary_stays() {
    for variant in SearchVariant::ALL {
        let mut sim = FlockSimulation::from_agents(
            FlockConfig::default(),
            vec![Vec3::new(100.0, -100.0, 0.0)],
            vec![Vec3::ZERO],
        )
        .unwrap();
        sim.step(1.0, variant);
        assert_eq!(sim.export_positions(), vec![Vec3::new(100.0, -100.0, 0.0)]);
    }
}

#[test]
fn test_overflow_reenters_from_opposite_face() {
    for variant in SearchVariant::ALL {
        let mut sim = FlockSimulation::from_agents(
            FlockConfig::default(),
            vec![Vec3::new(99.5, 50.0, -99.75)],
            vec![Vec3::new(1.0, 0.0, 0.0)],
        )
        .unwrap();
        sim.step(1.0, variant);
        let p = sim.export_positions()[0];
        assert!((p - Vec3::new(-99.5, 50.0, -99.75)).length() < 1e-4, "{} landed at {}", variant, p);

        let mut sim = FlockSimulation::from_agents(
            FlockConfig::default(),
            vec![Vec3::new(0.0, -99.8, 0.0)],
            vec![Vec3::new(0.0, -0.5, 0.0)],
        )
        .unwrap();
        // alignment with itself lifts the speed to 0.55
        sim.step(1.0, variant);
        let p = sim.export_positions()[0];
        assert!((p - Vec3::new(0.0, 99.65, 0.0)).length() < 1e-4, "{} landed at {}", variant, p);
    }
}

#[test]
fn test_positions_stay_in_domain() {
    let config = FlockConfig::default()
        .with_agent_count(500)
        .with_domain_half_extent(20.0)
        .with_initial_speed(1.0);
    let mut sim = FlockSimulation::new(config).unwrap();
    for i in 0..30 {
        sim.step(0.9, SearchVariant::ALL[i % 3]);
    }
    assert!(sim.positions().iter().all(|p| p.abs().max_element() <= 20.0));
}
