//! Position integration with toroidal wraparound.

use glam::Vec3;
use rayon::prelude::*;

/// Wrap one coordinate back into `[-half_extent, half_extent]`.
///
/// A single step of `2 * half_extent` is applied, so an agent that overshoots
/// one face by `d` re-enters from the opposite face at distance `d`.
#[inline]
pub fn wrap_axis(value: f32, half_extent: f32) -> f32 {
    if value > half_extent {
        value - 2.0 * half_extent
    } else if value < -half_extent {
        value + 2.0 * half_extent
    } else {
        value
    }
}

/// Wrap every axis of `pos`.
#[inline]
pub fn wrap(pos: Vec3, half_extent: f32) -> Vec3 {
    Vec3::new(
        wrap_axis(pos.x, half_extent),
        wrap_axis(pos.y, half_extent),
        wrap_axis(pos.z, half_extent),
    )
}

/// Advance `positions` in place by `velocities * dt`, then wrap.
///
/// Both slices must be in the same order (agent order or slot order).
pub fn integrate(
    positions: &mut [Vec3],
    velocities: &[Vec3],
    dt: f32,
    half_extent: f32,
    min_len: usize,
) {
    debug_assert_eq!(positions.len(), velocities.len());
    positions
        .par_iter_mut()
        .zip(velocities.par_iter())
        .with_min_len(min_len)
        .for_each(|(pos, &vel)| *pos = wrap(*pos + vel * dt, half_extent));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inside_unchanged() {
        assert_eq!(wrap_axis(0.0, 100.0), 0.0);
        assert_eq!(wrap_axis(100.0, 100.0), 100.0);
        assert_eq!(wrap_axis(-100.0, 100.0), -100.0);
    }

    #[test]
    fn test_overflow_preserved() {
        assert!((wrap_axis(101.5, 100.0) - (-98.5)).abs() < 1e-4);
        assert!((wrap_axis(-100.25, 100.0) - 99.75).abs() < 1e-4);
    }

    #[test]
    fn test_integrate_step() {
        let mut positions = vec![Vec3::new(99.5, 0.0, -99.5), Vec3::splat(100.0)];
        let velocities = vec![Vec3::new(1.0, 2.0, -1.0), Vec3::ZERO];

        integrate(&mut positions, &velocities, 1.0, 100.0, 1);

        assert!((positions[0] - Vec3::new(-99.5, 2.0, 99.5)).length() < 1e-4);
        assert_eq!(positions[1], Vec3::splat(100.0));
    }

    #[test]
    fn test_dt_scales_velocity() {
        let mut positions = vec![Vec3::ZERO];
        integrate(&mut positions, &[Vec3::new(1.0, -2.0, 0.5)], 0.5, 100.0, 1);
        assert_eq!(positions[0], Vec3::new(0.5, -1.0, 0.25));
    }
}
