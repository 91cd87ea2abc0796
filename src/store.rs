//! Agent state storage.
//!
//! Positions and velocities live in [`PingPong`] pairs: a pass reads the
//! front buffer and writes the back buffer, then the pair is flipped. The
//! store also tracks which agent sits in each buffer slot, because a
//! coherent step leaves the buffers in cell order rather than agent order.

use glam::Vec3;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::FlockConfig;
use crate::error::FlockError;

/// Two buffers of equal length with an explicit front index.
#[derive(Clone, Debug)]
pub struct PingPong<T> {
    buffers: [Vec<T>; 2],
    front: usize,
}

impl<T> PingPong<T> {
    /// Wrap `front` with a second buffer of the same length.
    pub fn new(front: Vec<T>, back: Vec<T>) -> Self {
        debug_assert_eq!(front.len(), back.len());
        Self {
            buffers: [front, back],
            front: 0,
        }
    }

    /// The buffer holding current state.
    #[inline]
    pub fn front(&self) -> &[T] {
        &self.buffers[self.front]
    }

    #[inline]
    pub fn front_mut(&mut self) -> &mut [T] {
        &mut self.buffers[self.front]
    }

    /// The scratch buffer the next pass writes into.
    #[inline]
    pub fn back(&self) -> &[T] {
        &self.buffers[1 - self.front]
    }

    /// Front for reading and back for writing at the same time.
    #[inline]
    pub fn split_mut(&mut self) -> (&[T], &mut [T]) {
        let [a, b] = &mut self.buffers;
        if self.front == 0 {
            (a.as_slice(), b.as_mut_slice())
        } else {
            (b.as_slice(), a.as_mut_slice())
        }
    }

    /// Make the back buffer current.
    #[inline]
    pub fn flip(&mut self) {
        self.front = 1 - self.front;
    }

    pub fn len(&self) -> usize {
        self.buffers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers[0].is_empty()
    }
}

/// Allocate a zero-filled buffer, reporting failure instead of aborting.
pub(crate) fn try_buffer<T: Copy>(
    len: usize,
    fill: T,
    buffer: &'static str,
) -> Result<Vec<T>, FlockError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| FlockError::Allocation {
        buffer,
        bytes: len.saturating_mul(std::mem::size_of::<T>()),
    })?;
    data.resize(len, fill);
    Ok(data)
}

/// Double-buffered agent state with a slot-to-agent map.
#[derive(Clone, Debug)]
pub struct AgentStore {
    positions: PingPong<Vec3>,
    velocities: PingPong<Vec3>,
    /// `agent_ids[slot]` is the stable id of the agent stored in `slot`.
    agent_ids: Vec<u32>,
    ids_scratch: Vec<u32>,
}

impl AgentStore {
    /// Seeded random population as described by `config`.
    ///
    /// Positions are uniform in the domain cube; each velocity component is
    /// uniform in `[-initial_speed, initial_speed]`.
    pub fn random(config: &FlockConfig) -> Result<Self, FlockError> {
        let n = config.agent_count as usize;
        let h = config.domain_half_extent;
        let s = config.initial_speed;
        let mut rng = SmallRng::seed_from_u64(config.seed);

        let mut positions = try_buffer(n, Vec3::ZERO, "positions")?;
        let mut velocities = try_buffer(n, Vec3::ZERO, "velocities")?;
        for (pos, vel) in positions.iter_mut().zip(velocities.iter_mut()) {
            *pos = Vec3::new(rng.gen_range(-h..=h), rng.gen_range(-h..=h), rng.gen_range(-h..=h));
            if s > 0.0 {
                *vel = Vec3::new(rng.gen_range(-s..=s), rng.gen_range(-s..=s), rng.gen_range(-s..=s));
            }
        }

        Self::from_agents(positions, velocities)
    }

    /// Store explicit agent state; agent `i` is `(positions[i], velocities[i])`.
    pub fn from_agents(positions: Vec<Vec3>, velocities: Vec<Vec3>) -> Result<Self, FlockError> {
        if positions.len() != velocities.len() {
            return Err(FlockError::AgentCountMismatch {
                positions: positions.len(),
                velocities: velocities.len(),
            });
        }
        let n = positions.len();

        let positions_back = try_buffer(n, Vec3::ZERO, "positions back buffer")?;
        let velocities_back = try_buffer(n, Vec3::ZERO, "velocities back buffer")?;
        let mut agent_ids = try_buffer(n, 0u32, "agent id map")?;
        for (slot, id) in agent_ids.iter_mut().enumerate() {
            *id = slot as u32;
        }
        let ids_scratch = try_buffer(n, 0u32, "agent id scratch")?;

        Ok(Self {
            positions: PingPong::new(positions, positions_back),
            velocities: PingPong::new(velocities, velocities_back),
            agent_ids,
            ids_scratch,
        })
    }

    pub fn len(&self) -> usize {
        self.agent_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agent_ids.is_empty()
    }

    pub fn positions(&self) -> &PingPong<Vec3> {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut PingPong<Vec3> {
        &mut self.positions
    }

    pub fn velocities(&self) -> &PingPong<Vec3> {
        &self.velocities
    }

    pub fn velocities_mut(&mut self) -> &mut PingPong<Vec3> {
        &mut self.velocities
    }

    /// Both buffer pairs at once, for passes that touch positions and velocities.
    pub fn buffers_mut(&mut self) -> (&mut PingPong<Vec3>, &mut PingPong<Vec3>) {
        (&mut self.positions, &mut self.velocities)
    }

    /// Stable agent id per buffer slot.
    pub fn agent_ids(&self) -> &[u32] {
        &self.agent_ids
    }

    /// Follow a gather of the state buffers by `permutation`.
    ///
    /// After `dst[s] = src[permutation[s]]`, slot `s` holds the agent that
    /// used to sit in slot `permutation[s]`.
    pub fn renumber(&mut self, permutation: &[u32], min_len: usize) {
        debug_assert_eq!(permutation.len(), self.agent_ids.len());
        let ids = &self.agent_ids;
        self.ids_scratch
            .par_iter_mut()
            .zip(permutation.par_iter())
            .with_min_len(min_len)
            .for_each(|(out, &from)| *out = ids[from as usize]);
        std::mem::swap(&mut self.agent_ids, &mut self.ids_scratch);
    }

    /// Current positions indexed by agent id.
    pub fn export_positions(&self) -> Vec<Vec3> {
        self.export(self.positions.front())
    }

    /// Current velocities indexed by agent id.
    pub fn export_velocities(&self) -> Vec<Vec3> {
        self.export(self.velocities.front())
    }

    fn export(&self, slots: &[Vec3]) -> Vec<Vec3> {
        let mut out = vec![Vec3::ZERO; slots.len()];
        for (&id, &value) in self.agent_ids.iter().zip(slots) {
            out[id as usize] = value;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_pong_flip() {
        let mut pair = PingPong::new(vec![1, 2], vec![0, 0]);
        {
            let (front, back) = pair.split_mut();
            for (b, f) in back.iter_mut().zip(front) {
                *b = f * 10;
            }
        }
        assert_eq!(pair.front(), &[1, 2]);
        pair.flip();
        assert_eq!(pair.front(), &[10, 20]);
        assert_eq!(pair.back(), &[1, 2]);

        let (front, _) = pair.split_mut();
        assert_eq!(front, &[10, 20]);
    }

    #[test]
    fn test_random_is_seeded_and_in_domain() {
        let config = FlockConfig::default()
            .with_agent_count(200)
            .with_seed(11)
            .with_initial_speed(0.5);
        let a = AgentStore::random(&config).unwrap();
        let b = AgentStore::random(&config).unwrap();

        assert_eq!(a.positions().front(), b.positions().front());
        assert_eq!(a.velocities().front(), b.velocities().front());
        assert!(a
            .positions()
            .front()
            .iter()
            .all(|p| p.abs().max_element() <= config.domain_half_extent));
        assert!(a.velocities().front().iter().all(|v| v.abs().max_element() <= 0.5));

        let other = AgentStore::random(&config.with_seed(12)).unwrap();
        assert_ne!(a.positions().front(), other.positions().front());
    }

    #[test]
    fn test_zero_initial_speed() {
        let store = AgentStore::random(&FlockConfig::default().with_agent_count(10)).unwrap();
        assert!(store.velocities().front().iter().all(|v| *v == Vec3::ZERO));
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let err = AgentStore::from_agents(vec![Vec3::ZERO; 3], vec![Vec3::ZERO; 2]).unwrap_err();
        assert!(matches!(
            err,
            FlockError::AgentCountMismatch { positions: 3, velocities: 2 }
        ));
    }

    #[test]
    fn test_renumber_and_export_restore_agent_order() {
        let positions: Vec<Vec3> = (0..4).map(|i| Vec3::splat(i as f32)).collect();
        let mut store = AgentStore::from_agents(positions.clone(), vec![Vec3::ZERO; 4]).unwrap();

        let permutation = [2, 0, 3, 1];
        {
            let pos = store.positions_mut();
            let (front, back) = pos.split_mut();
            for (dst, &from) in back.iter_mut().zip(&permutation) {
                *dst = front[from as usize];
            }
            pos.flip();
        }
        store.renumber(&permutation, 1);

        assert_eq!(store.agent_ids(), &[2, 0, 3, 1]);
        assert_eq!(store.positions().front()[0], Vec3::splat(2.0));
        assert_eq!(store.export_positions(), positions);

        // a second gather composes with the first
        store.renumber(&[1, 0, 3, 2], 1);
        assert_eq!(store.agent_ids(), &[0, 2, 1, 3]);
    }
}
