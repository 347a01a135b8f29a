//! Lock-free allocation of logical query-slot pairs.
//!
//! Logical ids increase monotonically, two per zone (start slot, end slot),
//! and map onto two fixed-capacity hardware buffers:
//!
//! - ring index: `id % capacity`
//! - buffer selector: `(id / capacity) % 2`
//!
//! The checkpoint is the highest id resolved and forwarded contiguously
//! from zero. `counter − checkpoint` (wrapping) is the number of
//! outstanding slots and never exceeds `2 × capacity`; the allocator
//! refuses work beyond that instead of handing out a slot that is still in
//! use. Ids are never reset; wraparound is unreachable in practice but all
//! comparisons use unsigned wrapping subtraction anyway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use strobe_core::error::{ProfileError, Result};
use strobe_core::types::QueryId;

/// One reserved query-slot pair, ready to wire into a pass.
///
/// The start slot lives at `index`, the end slot at `index + 1`, both in
/// the buffer chosen by `buffer`. Pairs never straddle a buffer boundary
/// because ids advance by two from zero and capacity is even.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuerySlot {
    /// Logical id of the start slot; the end slot is `start_id + 1`.
    pub start_id: QueryId,
    /// Which of the two hardware buffers backs this pair (0 or 1).
    pub buffer: usize,
    /// Ring index of the start slot within that buffer.
    pub index: u32,
}

/// Shared allocation state for one profiling context.
pub struct QueryRing {
    /// Slots per hardware buffer.
    capacity: u64,
    /// Next logical id to hand out. Even at all times.
    counter: AtomicU64,
    /// Highest id resolved and forwarded, contiguously from zero.
    checkpoint: AtomicU64,
    /// Base for the per-pair allocation clock.
    epoch: Instant,
    /// Wall-clock allocation record per in-flight pair, indexed by
    /// `start_id % (2 × capacity)` so pairs in the two buffers never alias;
    /// entries are reused once the owning buffer recycles.
    requested_at: Box<[AtomicU64]>,
}

impl QueryRing {
    pub fn new(capacity: u64) -> Self {
        debug_assert!(capacity >= 2 && capacity % 2 == 0);
        let requested_at = (0..capacity * 2).map(|_| AtomicU64::new(0)).collect();
        Self {
            capacity,
            counter: AtomicU64::new(0),
            checkpoint: AtomicU64::new(0),
            epoch: Instant::now(),
            requested_at,
        }
    }

    /// Slots per hardware buffer.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Reserve the next query-slot pair.
    ///
    /// Callable concurrently from any number of threads without blocking.
    /// Fails with [`ProfileError::RingFull`] when both buffers are fully
    /// outstanding; a failed call consumes no ids, so the counter never
    /// drifts past the `2 × capacity` bound.
    pub fn next_pair(&self) -> Result<QuerySlot> {
        let mut id = self.counter.load(Ordering::Relaxed);
        loop {
            let checkpoint = self.checkpoint.load(Ordering::Acquire);
            let outstanding = id.wrapping_sub(checkpoint);
            if outstanding.wrapping_add(2) > self.capacity * 2 {
                return Err(ProfileError::RingFull {
                    outstanding,
                    capacity: self.capacity * 2,
                });
            }
            match self.counter.compare_exchange_weak(
                id,
                id.wrapping_add(2),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => id = current,
            }
        }

        let now = self.epoch.elapsed().as_nanos() as u64;
        self.requested_at[self.pending_index(id)].store(now, Ordering::Release);

        Ok(QuerySlot {
            start_id: id,
            buffer: self.buffer_selector(id),
            index: self.ring_index(id),
        })
    }

    /// Physical slot of `id` within its buffer.
    #[inline]
    pub fn ring_index(&self, id: QueryId) -> u32 {
        (id % self.capacity) as u32
    }

    /// Which of the two hardware buffers backs `id`.
    #[inline]
    pub fn buffer_selector(&self, id: QueryId) -> usize {
        ((id / self.capacity) % 2) as usize
    }

    /// Age of the pair starting at `start_id`, measured from its
    /// allocation. Drives the collector's timeout policy.
    pub fn request_age(&self, start_id: QueryId) -> Duration {
        let requested = self.requested_at[self.pending_index(start_id)].load(Ordering::Acquire);
        let now = self.epoch.elapsed().as_nanos() as u64;
        Duration::from_nanos(now.saturating_sub(requested))
    }

    /// Current value of the allocation counter.
    #[inline]
    pub fn counter(&self) -> QueryId {
        self.counter.load(Ordering::Acquire)
    }

    /// Current resolution checkpoint.
    #[inline]
    pub fn checkpoint(&self) -> QueryId {
        self.checkpoint.load(Ordering::Acquire)
    }

    /// Slots allocated but not yet resolved and forwarded.
    #[inline]
    pub fn outstanding(&self) -> u64 {
        self.counter().wrapping_sub(self.checkpoint())
    }

    /// Advance the checkpoint after a collect pass.
    ///
    /// Only the collector calls this, under its single-writer lock.
    pub fn commit(&self, checkpoint: QueryId) {
        debug_assert!(
            checkpoint.wrapping_sub(self.checkpoint.load(Ordering::Relaxed)) <= self.capacity * 2
        );
        self.checkpoint.store(checkpoint, Ordering::Release);
    }

    #[inline]
    fn pending_index(&self, start_id: QueryId) -> usize {
        (start_id % (self.capacity * 2)) as usize
    }
}
