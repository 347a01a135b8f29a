//! The single-writer resolver.
//!
//! `collect()` drains resolved timestamps from the hardware buffers in
//! strict logical-id order, recovers pairs whose timestamps will never
//! materialize (the device silently drops empty command scopes), forwards
//! resolved values to the event sink, advances the checkpoint, and recycles
//! a buffer once every one of its slots has been drained.
//!
//! # Ordering
//!
//! The checkpoint only ever advances over a contiguous prefix of resolved
//! pairs. A stall (young pending slot), a device fault, or a resolution
//! error stops the pass at that pair; everything before it is already
//! forwarded, everything after waits for a later call. Forwarded `GpuTime`
//! events are therefore strictly ordered by query id per context.
//!
//! # Recovery
//!
//! A pair whose slots still read zero past the collection timeout belongs
//! to a scope the device abandoned; it gets synthesized values built on the
//! most recent resolved timestamp so the ring keeps moving. A pair carrying
//! the hardware error sentinel halts collection while younger than the
//! timeout, then takes the same synthesis path with an error-level
//! diagnostic.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, error, warn};

use strobe_core::diag::DiagCategory;
use strobe_core::error::{ProfileError, Result};
use strobe_core::event::{EventSink, TraceEvent};
use strobe_core::provider::TimestampProvider;
use strobe_core::query_diag;
use strobe_core::types::{QueryId, TIMESTAMP_ERROR, TIMESTAMP_PENDING};

use crate::context::ProfilerContext;

/// Device-tick increment used when synthesizing timestamps for a pair the
/// device never wrote. Keeps synthesized zones non-degenerate and ordered
/// after everything already resolved.
const SYNTH_TICK: u64 = 1;

/// What to do with one resolved slot pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PairOutcome {
    /// Both slots carry real device timestamps; forward them.
    Resolved { start: u64, end: u64 },
    /// At least one slot is still pending and young; stop here and wait.
    Stall,
    /// The device reported an error sentinel; stop here, retry next call.
    Halt,
    /// Past the timeout with no usable values; synthesize and move on.
    /// `faulted` distinguishes sentinel pairs from abandoned ones.
    Synthesize { faulted: bool },
}

/// Classify one slot pair against the timeout policy.
pub(crate) fn classify_pair(
    start: u64,
    end: u64,
    age: Duration,
    timeout: Duration,
) -> PairOutcome {
    let faulted = start == TIMESTAMP_ERROR || end == TIMESTAMP_ERROR;
    let pending = start == TIMESTAMP_PENDING || end == TIMESTAMP_PENDING;
    if faulted {
        if age >= timeout {
            PairOutcome::Synthesize { faulted: true }
        } else {
            PairOutcome::Halt
        }
    } else if pending {
        if age >= timeout {
            PairOutcome::Synthesize { faulted: false }
        } else {
            PairOutcome::Stall
        }
    } else {
        PairOutcome::Resolved { start, end }
    }
}

impl<P: TimestampProvider, S: EventSink> ProfilerContext<P, S> {
    /// Drain resolved timestamps, typically once per frame or interval.
    ///
    /// Callable from any thread; strictly single-writer. If another
    /// collection is already in progress the call is a successful no-op.
    /// Every error is non-fatal to the context: the call returns it, logs
    /// a diagnostic, and the affected slots stay pending for the next
    /// call, bounded by the timeout policy.
    pub fn collect(&self) -> Result<()> {
        let Ok(_gate) = self.collect_gate.try_lock() else {
            return Ok(());
        };

        self.retry_pending_recycle()?;

        let begin = self.ring.checkpoint();
        let end = self.ring.counter();
        if begin == end {
            return Ok(());
        }

        let capacity = self.ring.capacity();
        let total = end.wrapping_sub(begin);
        if total > capacity * 2 {
            // Unreachable while the allocator enforces the ring bound.
            error!(
                context = self.id,
                count = total,
                capacity = capacity * 2,
                "query backlog exceeds ring capacity; aborting collection"
            );
            return Err(ProfileError::Backlog {
                count: total,
                capacity: capacity * 2,
            });
        }

        // Stop at the physical buffer boundary; the remainder belongs to
        // the other buffer and is handled by a subsequent call.
        let begin_index = self.ring.ring_index(begin);
        let boundary = capacity - begin_index as u64;
        let mut count = total;
        let mut recycle_due = false;
        if count >= boundary {
            count = boundary;
            recycle_due = true;
        }
        debug_assert!(begin % 2 == 0 && count % 2 == 0);

        let selector = self.ring.buffer_selector(begin);
        let buffer = self.buffers[selector].load_full();
        let range = begin_index..begin_index + count as u32;
        let values = match self.provider.resolve(&buffer, range.clone()) {
            Ok(values) => values,
            Err(err) => {
                warn!(
                    context = self.id,
                    start = range.start,
                    end = range.end,
                    error = %err,
                    "timestamp resolution failed; slots stay pending"
                );
                return Err(err);
            }
        };
        if values.len() < count as usize {
            return Err(ProfileError::Resolve(format!(
                "provider returned {} of {count} requested slots",
                values.len()
            )));
        }

        let mut resolved = 0u64;
        for pair in values.chunks_exact(2) {
            let start_id = begin.wrapping_add(resolved);
            let age = self.ring.request_age(start_id);
            match classify_pair(pair[0], pair[1], age, self.timeout) {
                PairOutcome::Resolved { start, end } => {
                    self.forward_pair(start_id, start, end);
                }
                PairOutcome::Stall => break,
                PairOutcome::Halt => {
                    error!(
                        context = self.id,
                        query = start_id,
                        "device reported timestamp error; halting collection at this pair"
                    );
                    break;
                }
                PairOutcome::Synthesize { faulted } => {
                    let base = self.watermark.load(Ordering::Relaxed);
                    let start = base.wrapping_add(SYNTH_TICK);
                    let end = start.wrapping_add(SYNTH_TICK);
                    if faulted {
                        error!(
                            context = self.id,
                            query = start_id,
                            "timestamp slot faulted past timeout; synthesizing values"
                        );
                    } else {
                        warn!(
                            context = self.id,
                            query = start_id,
                            timeout_ms = self.timeout.as_millis() as u64,
                            "zone abandoned by device; synthesizing timestamps"
                        );
                    }
                    self.forward_pair(start_id, start, end);
                }
            }
            resolved = resolved.wrapping_add(2);
        }

        if resolved == 0 {
            return Ok(());
        }
        let checkpoint = begin.wrapping_add(resolved);
        self.ring.commit(checkpoint);
        query_diag!(
            DiagCategory::Collect,
            checkpoint,
            resolved,
            "collection pass advanced"
        );

        if recycle_due && resolved == count {
            debug_assert!(checkpoint % capacity == 0);
            self.recycle(selector)?;
        }
        Ok(())
    }

    fn forward_pair(&self, start_id: QueryId, start: u64, end: u64) {
        self.emit(TraceEvent::GpuTime {
            context: self.id,
            query: start_id,
            device_time: start,
        });
        self.emit(TraceEvent::GpuTime {
            context: self.id,
            query: start_id.wrapping_add(1),
            device_time: end,
        });
        self.watermark.store(end, Ordering::Relaxed);
    }

    /// Discard a fully drained buffer and swap in a fresh zero-initialized
    /// one, making its slot range safe to reallocate.
    fn recycle(&self, selector: usize) -> Result<()> {
        match self.provider.allocate_buffer(self.ring.capacity() as u32) {
            Ok(fresh) => {
                self.buffers[selector].store(Arc::new(fresh));
                self.recycle_retry[selector].store(false, Ordering::Release);
                debug!(context = self.id, buffer = selector, "timestamp buffer recycled");
                query_diag!(DiagCategory::Recycle, buffer = selector, "buffer recycled");
                Ok(())
            }
            Err(err) => {
                // The drained buffer must not serve another generation with
                // stale write-once values; flag it and retry next call.
                self.recycle_retry[selector].store(true, Ordering::Release);
                error!(
                    context = self.id,
                    buffer = selector,
                    error = %err,
                    "buffer recycle failed; retrying on next collect"
                );
                Err(err)
            }
        }
    }

    fn retry_pending_recycle(&self) -> Result<()> {
        for selector in 0..2 {
            if self.recycle_retry[selector].load(Ordering::Acquire) {
                self.recycle(selector)?;
            }
        }
        Ok(())
    }
}
