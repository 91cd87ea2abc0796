//! Key/value sorting for the cell index.
//!
//! The pipeline only needs agents with the same cell id to end up in one
//! contiguous run, so the sort is a pluggable strategy behind [`KeySort`].
//! Two strategies ship with the crate:
//!
//! - [`ParallelSort`]: rayon's parallel unstable sort over zipped pairs.
//! - [`RadixSort`]: LSD radix sort on 4-bit digits (histogram, exclusive
//!   prefix sum, stable scatter), ping-ponging between the caller's buffers
//!   and an internal scratch pair.

use rayon::prelude::*;

use crate::error::SortError;

const RADIX_BITS: u32 = 4;
const RADIX_SIZE: usize = 16; // 2^4

/// Sorts a key array ascending and applies the same permutation to a value array.
pub trait KeySort: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Sort `keys` ascending, moving `values` alongside.
    ///
    /// Equal keys must end up contiguous; their relative order is unspecified.
    fn sort_by_key(&mut self, keys: &mut [u32], values: &mut [u32]);
}

/// Parallel unstable sort of `(key, value)` pairs.
#[derive(Debug, Default)]
pub struct ParallelSort {
    pairs: Vec<(u32, u32)>,
}

impl KeySort for ParallelSort {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn sort_by_key(&mut self, keys: &mut [u32], values: &mut [u32]) {
        assert_eq!(keys.len(), values.len(), "key and value arrays must match");

        self.pairs.clear();
        self.pairs
            .par_extend(keys.par_iter().copied().zip(values.par_iter().copied()));
        self.pairs.par_sort_unstable_by_key(|&(key, _)| key);

        keys.par_iter_mut()
            .zip(values.par_iter_mut())
            .zip(self.pairs.par_iter())
            .for_each(|((key, value), &(k, v))| {
                *key = k;
                *value = v;
            });
    }
}

/// Number of digit passes needed to sort keys up to `max_key`.
///
/// Always even, so the final scatter lands back in the caller's buffers.
fn calculate_sort_passes(max_key: u32) -> u32 {
    let bits = u32::BITS - max_key.leading_zeros();
    let passes = bits.div_ceil(RADIX_BITS);
    if passes % 2 == 1 {
        passes + 1
    } else {
        passes
    }
}

/// LSD radix sort with a parallel histogram pass.
#[derive(Debug, Default)]
pub struct RadixSort {
    keys_tmp: Vec<u32>,
    values_tmp: Vec<u32>,
}

impl RadixSort {
    fn digit_histogram(keys: &[u32], shift: u32) -> [usize; RADIX_SIZE] {
        keys.par_iter()
            .fold(
                || [0usize; RADIX_SIZE],
                |mut hist, &key| {
                    hist[((key >> shift) as usize) & (RADIX_SIZE - 1)] += 1;
                    hist
                },
            )
            .reduce(
                || [0usize; RADIX_SIZE],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            )
    }

    fn scatter(
        keys_in: &[u32],
        values_in: &[u32],
        keys_out: &mut [u32],
        values_out: &mut [u32],
        shift: u32,
    ) {
        let histogram = Self::digit_histogram(keys_in, shift);

        // Exclusive prefix sum
        let mut offsets = [0usize; RADIX_SIZE];
        let mut running = 0;
        for (offset, count) in offsets.iter_mut().zip(histogram) {
            *offset = running;
            running += count;
        }

        // Stable scatter: digits keep their input order within a bucket
        for (&key, &value) in keys_in.iter().zip(values_in) {
            let digit = ((key >> shift) as usize) & (RADIX_SIZE - 1);
            let dest = offsets[digit];
            keys_out[dest] = key;
            values_out[dest] = value;
            offsets[digit] += 1;
        }
    }
}

impl KeySort for RadixSort {
    fn name(&self) -> &'static str {
        "radix"
    }

    fn sort_by_key(&mut self, keys: &mut [u32], values: &mut [u32]) {
        assert_eq!(keys.len(), values.len(), "key and value arrays must match");
        let n = keys.len();
        if n < 2 {
            return;
        }

        let max_key = keys.par_iter().copied().max().unwrap_or(0);
        let passes = calculate_sort_passes(max_key);

        self.keys_tmp.resize(n, 0);
        self.values_tmp.resize(n, 0);

        let mut source_is_input = true;
        for pass in 0..passes {
            let shift = pass * RADIX_BITS;
            if source_is_input {
                Self::scatter(keys, values, &mut self.keys_tmp, &mut self.values_tmp, shift);
            } else {
                Self::scatter(&self.keys_tmp, &self.values_tmp, keys, values, shift);
            }
            source_is_input = !source_is_input;
        }
        debug_assert!(source_is_input);
    }
}

/// Keys of the self-test fixture; the values are `0..10`.
pub const SELF_TEST_KEYS: [u32; 10] = [0, 1, 0, 3, 0, 2, 2, 0, 5, 6];

/// Check that `sorter` groups a small fixed fixture by key.
///
/// Runs outside the step pipeline; it validates the sort dependency in isolation.
pub fn self_test(sorter: &mut dyn KeySort) -> Result<(), SortError> {
    let name = sorter.name();
    let mut keys = SELF_TEST_KEYS;
    let mut values: [u32; 10] = std::array::from_fn(|i| i as u32);

    sorter.sort_by_key(&mut keys, &mut values);

    if let Some(i) = keys.windows(2).position(|w| w[0] > w[1]) {
        return Err(SortError::Unordered { sorter: name, index: i + 1 });
    }

    let mut seen = [false; SELF_TEST_KEYS.len()];
    for (index, (&key, &value)) in keys.iter().zip(values.iter()).enumerate() {
        let slot = seen
            .get_mut(value as usize)
            .ok_or(SortError::NotAPermutation { sorter: name, value })?;
        if *slot {
            return Err(SortError::NotAPermutation { sorter: name, value });
        }
        *slot = true;

        if SELF_TEST_KEYS[value as usize] != key {
            return Err(SortError::PairBroken { sorter: name, index });
        }
    }

    tracing::debug!(sorter = name, ?keys, ?values, "sort self-test passed");
    Ok(())
}
