//! The three flocking rules.
//!
//! Every search variant feeds candidates through the same accumulator, so the
//! variants differ only in *which* agents they visit, never in the math:
//!
//! - **Cohesion** (r1, k1): steer toward the centroid of neighbors.
//! - **Separation** (r2, k2): push away from close neighbors, unnormalized.
//! - **Alignment** (r3, k3): add the mean neighbor velocity.
//!
//! Radius tests are strict (`distance < radius`). The agent is one of its own
//! candidates: it counts once toward cohesion and alignment and adds nothing
//! to separation.

use glam::Vec3;

use crate::config::FlockConfig;

/// Radii, scales and speed cap for rule evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlockRules {
    pub cohesion_radius: f32,
    pub separation_radius: f32,
    pub alignment_radius: f32,
    pub cohesion_scale: f32,
    pub separation_scale: f32,
    pub alignment_scale: f32,
    pub max_speed: f32,
}

impl FlockRules {
    pub fn from_config(config: &FlockConfig) -> Self {
        Self {
            cohesion_radius: config.r1,
            separation_radius: config.r2,
            alignment_radius: config.r3,
            cohesion_scale: config.k1,
            separation_scale: config.k2,
            alignment_scale: config.k3,
            max_speed: config.max_speed,
        }
    }
}

/// Running sums for one agent's neighborhood.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RuleAccumulator {
    cohesion_sum: Vec3,
    cohesion_count: u32,
    separation: Vec3,
    alignment_sum: Vec3,
    alignment_count: u32,
}

impl RuleAccumulator {
    /// Fold one candidate neighbor into the sums.
    #[inline]
    pub fn visit(&mut self, rules: &FlockRules, self_pos: Vec3, other_pos: Vec3, other_vel: Vec3) {
        let dist = self_pos.distance(other_pos);
        if dist < rules.cohesion_radius {
            self.cohesion_sum += other_pos;
            self.cohesion_count += 1;
        }
        if dist < rules.separation_radius {
            self.separation += self_pos - other_pos;
        }
        if dist < rules.alignment_radius {
            self.alignment_sum += other_vel;
            self.alignment_count += 1;
        }
    }

    /// Number of candidates inside the cohesion radius.
    pub fn cohesion_count(&self) -> u32 {
        self.cohesion_count
    }

    /// Number of candidates inside the alignment radius.
    pub fn alignment_count(&self) -> u32 {
        self.alignment_count
    }

    /// Combined velocity change from all three rules.
    ///
    /// A rule with no neighbors contributes zero.
    #[inline]
    pub fn steering(&self, rules: &FlockRules, self_pos: Vec3) -> Vec3 {
        let mut change = self.separation * rules.separation_scale;
        if self.cohesion_count > 0 {
            let center = self.cohesion_sum / self.cohesion_count as f32;
            change += (center - self_pos) * rules.cohesion_scale;
        }
        if self.alignment_count > 0 {
            let mean_vel = self.alignment_sum / self.alignment_count as f32;
            change += mean_vel * rules.alignment_scale;
        }
        change
    }

    /// New velocity: `self_vel` plus steering, clamped to the speed cap.
    #[inline]
    pub fn resolve(&self, rules: &FlockRules, self_pos: Vec3, self_vel: Vec3) -> Vec3 {
        clamp_speed(self_vel + self.steering(rules, self_pos), rules.max_speed)
    }
}

/// Rescale `vel` to `max_speed` if it is faster, keeping its direction.
#[inline]
pub fn clamp_speed(vel: Vec3, max_speed: f32) -> Vec3 {
    vel.clamp_length_max(max_speed)
}

/// WGSL twin of [`RuleAccumulator`]; expects a `params: SimParams` uniform in scope.
pub const RULES_WGSL: &str = r#"
struct RuleSums {
    cohesion_sum: vec3<f32>,
    cohesion_count: u32,
    separation: vec3<f32>,
    alignment_sum: vec3<f32>,
    alignment_count: u32,
};

fn empty_sums() -> RuleSums {
    return RuleSums(vec3<f32>(0.0), 0u, vec3<f32>(0.0), vec3<f32>(0.0), 0u);
}

fn visit_neighbor(sums: ptr<function, RuleSums>, self_pos: vec3<f32>, other_pos: vec3<f32>, other_vel: vec3<f32>) {
    let dist = distance(self_pos, other_pos);
    if dist < params.r1 {
        (*sums).cohesion_sum += other_pos;
        (*sums).cohesion_count += 1u;
    }
    if dist < params.r2 {
        (*sums).separation += self_pos - other_pos;
    }
    if dist < params.r3 {
        (*sums).alignment_sum += other_vel;
        (*sums).alignment_count += 1u;
    }
}

fn resolve_velocity(sums: RuleSums, self_pos: vec3<f32>, self_vel: vec3<f32>) -> vec3<f32> {
    var change = sums.separation * params.k2;
    if sums.cohesion_count > 0u {
        let center = sums.cohesion_sum / f32(sums.cohesion_count);
        change += (center - self_pos) * params.k1;
    }
    if sums.alignment_count > 0u {
        let mean_vel = sums.alignment_sum / f32(sums.alignment_count);
        change += mean_vel * params.k3;
    }

    let vel = self_vel + change;
    let speed = length(vel);
    if speed > params.max_speed {
        return vel * (params.max_speed / speed);
    }
    return vel;
}
"#;
