//! Deterministic selection of the next execution context from a fixed pool.
//!
//! The chooser is called concurrently from arbitrary threads and uses nothing
//! heavier than one atomic increment. Power-of-two pool sizes take the masked
//! fast path; every other size falls back to a modulo on a 64-bit counter.
//! A 64-bit counter places the wraparound so far in the future that no run
//! encounters it, and unsigned arithmetic keeps the index non-negative even if
//! it does wrap.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-light round-robin selection over `[0, pool_size)`.
pub trait ExecutorChooser: Send + Sync {
    /// Returns the index of the next context to use.
    fn next_index(&self) -> usize;
}

/// Picks the chooser implementation for a pool of `len` contexts.
///
/// Both implementations produce the same uniform distribution over
/// `[0, len)`; they differ only in how the counter is reduced.
///
/// # Panics
///
/// Panics if `len` is zero; pools validate their size before construction.
#[must_use]
pub fn chooser_for(len: usize) -> Box<dyn ExecutorChooser> {
    assert!(len > 0, "executor pool must not be empty");
    if len.is_power_of_two() {
        Box::new(PowerOfTwoChooser::new(len))
    } else {
        Box::new(RoundRobinChooser::new(len))
    }
}

/// Mask-based chooser for power-of-two pool sizes.
#[derive(Debug)]
pub struct PowerOfTwoChooser {
    counter: AtomicU64,
    mask: u64,
}

impl PowerOfTwoChooser {
    fn new(len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        Self {
            counter: AtomicU64::new(0),
            mask: len as u64 - 1,
        }
    }

    #[cfg(test)]
    fn with_counter(len: usize, start: u64) -> Self {
        let chooser = Self::new(len);
        chooser.counter.store(start, Ordering::Relaxed);
        chooser
    }
}

impl ExecutorChooser for PowerOfTwoChooser {
    fn next_index(&self) -> usize {
        (self.counter.fetch_add(1, Ordering::Relaxed) & self.mask) as usize
    }
}

/// Modulo-based chooser for arbitrary pool sizes.
#[derive(Debug)]
pub struct RoundRobinChooser {
    counter: AtomicU64,
    len: u64,
}

impl RoundRobinChooser {
    fn new(len: usize) -> Self {
        Self {
            counter: AtomicU64::new(0),
            len: len as u64,
        }
    }

    #[cfg(test)]
    fn with_counter(len: usize, start: u64) -> Self {
        let chooser = Self::new(len);
        chooser.counter.store(start, Ordering::Relaxed);
        chooser
    }
}

impl ExecutorChooser for RoundRobinChooser {
    fn next_index(&self) -> usize {
        (self.counter.fetch_add(1, Ordering::Relaxed) % self.len) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distribution(chooser: &dyn ExecutorChooser, len: usize, calls: usize) -> Vec<usize> {
        let mut counts = vec![0usize; len];
        for _ in 0..calls {
            let index = chooser.next_index();
            assert!(index < len, "index {index} out of range for pool of {len}");
            counts[index] += 1;
        }
        counts
    }

    #[test]
    fn power_of_two_pool_is_uniform() {
        let chooser = chooser_for(4);
        let counts = distribution(chooser.as_ref(), 4, 10_000);
        let max = counts.iter().copied().max().unwrap_or(0);
        let min = counts.iter().copied().min().unwrap_or(0);
        assert!(max - min <= 1, "uneven distribution: {counts:?}");
    }

    #[test]
    fn non_power_of_two_pool_is_uniform() {
        let chooser = chooser_for(5);
        let counts = distribution(chooser.as_ref(), 5, 10_000);
        let max = counts.iter().copied().max().unwrap_or(0);
        let min = counts.iter().copied().min().unwrap_or(0);
        assert!(max - min <= 1, "uneven distribution: {counts:?}");
    }

    #[test]
    fn masked_indices_stay_in_range_across_wraparound() {
        let chooser = PowerOfTwoChooser::with_counter(4, u64::MAX - 2);
        for _ in 0..8 {
            assert!(chooser.next_index() < 4);
        }
    }

    #[test]
    fn modulo_indices_stay_in_range_across_wraparound() {
        let chooser = RoundRobinChooser::with_counter(5, u64::MAX - 2);
        for _ in 0..8 {
            assert!(chooser.next_index() < 5);
        }
    }

    #[test]
    fn single_context_pool_always_picks_zero() {
        let chooser = chooser_for(1);
        for _ in 0..16 {
            assert_eq!(chooser.next_index(), 0);
        }
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn empty_pool_is_rejected() {
        let _ = chooser_for(0);
    }
}
