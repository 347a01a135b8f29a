//! Profiling context: one per GPU device/queue.
//!
//! Owns the two hardware timestamp buffers, the query ring, the collector's
//! single-writer gate, and the calibration sample that anchors device time
//! onto the host timeline. Context ids come from a process-wide counter
//! shared across all backends, so traces from several devices interleave
//! without id collisions.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tracing::{debug, error, info, warn};

use strobe_core::diag::DiagCategory;
use strobe_core::error::{ProfileError, Result};
use strobe_core::event::{EventSink, TraceEvent};
use strobe_core::provider::TimestampProvider;
use strobe_core::query_diag;
use strobe_core::types::{
    CalibrationSample, SampleGranularity, SourceLoc, host_time_ns, thread_ident,
};

use crate::ring::QueryRing;
use crate::zone::ZoneScope;

/// Profiler tuning knobs.
///
/// `capacity` is in timestamp slots per hardware buffer; a zone consumes
/// two slots, so the default of 4096 admits 4096 simultaneously
/// outstanding zones across the two buffers.
#[derive(Clone, Copy, Debug)]
pub struct ProfilerConfig {
    /// Timestamp slots per hardware buffer. Must be even and at least 2.
    pub capacity: u32,
    /// How long a pending slot may stay unwritten before the collector
    /// gives up on the device and synthesizes values for it.
    pub timeout: Duration,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            timeout: Duration::from_millis(200),
        }
    }
}

impl ProfilerConfig {
    fn validate(&self) -> Result<()> {
        if self.capacity < 2 || self.capacity % 2 != 0 {
            return Err(ProfileError::Config(format!(
                "capacity must be even and >= 2, got {}",
                self.capacity
            )));
        }
        if self.timeout.is_zero() {
            return Err(ProfileError::Config("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Process-wide context id counter, shared by every backend's contexts.
static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(0);

/// One profiling context bound to a device/queue.
pub struct ProfilerContext<P: TimestampProvider, S: EventSink> {
    pub(crate) id: u32,
    pub(crate) provider: P,
    pub(crate) sink: S,
    pub(crate) ring: QueryRing,
    /// The two hardware buffers. Atomically-read handles: allocating
    /// threads always observe either the outgoing or the fresh buffer,
    /// never a torn value, while the collector swaps during recycling.
    pub(crate) buffers: [ArcSwap<P::Buffer>; 2],
    /// Single-writer gate for collection. Never blocked on: contended
    /// collect calls return immediately as successful no-ops.
    pub(crate) collect_gate: Mutex<()>,
    /// Most recent resolved device timestamp; baseline for synthesized
    /// values when a zone is abandoned.
    pub(crate) watermark: AtomicU64,
    /// Per-buffer flag: replacement allocation failed during recycling and
    /// must be retried before the buffer serves another generation.
    pub(crate) recycle_retry: [AtomicBool; 2],
    pub(crate) timeout: Duration,
    calibration: CalibrationSample,
}

impl<P: TimestampProvider, S: EventSink> std::fmt::Debug for ProfilerContext<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilerContext")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<P: TimestampProvider, S: EventSink> ProfilerContext<P, S> {
    /// Create a context for one device/queue.
    ///
    /// Fatal on invalid config, missing stage-boundary timestamp support,
    /// buffer allocation failure, or calibration failure; the error leaves
    /// no usable context. Optional granularities only produce warnings.
    pub fn new(provider: P, sink: S, config: ProfilerConfig) -> Result<Self> {
        config.validate()?;

        if !provider.supports(SampleGranularity::StageBoundary) {
            return Err(ProfileError::Unsupported {
                granularity: SampleGranularity::StageBoundary,
            });
        }
        for granularity in [SampleGranularity::DrawCall, SampleGranularity::Dispatch] {
            if !provider.supports(granularity) {
                warn!(
                    ?granularity,
                    "device lacks optional timestamp granularity; zones stay pass-scoped"
                );
            }
        }

        let buffers = [
            ArcSwap::from_pointee(provider.allocate_buffer(config.capacity)?),
            ArcSwap::from_pointee(provider.allocate_buffer(config.capacity)?),
        ];
        let calibration = provider.calibrate()?;
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);

        sink.emit(TraceEvent::NewContext {
            context: id,
            host_time_ns: calibration.host_time_ns,
            device_time: calibration.device_timestamp,
            period: calibration.period,
            backend: provider.backend_kind(),
        });
        info!(
            context = id,
            capacity = config.capacity,
            timeout_ms = config.timeout.as_millis() as u64,
            backend = provider.backend_kind().as_str(),
            "profiler context created"
        );

        Ok(Self {
            id,
            provider,
            sink,
            ring: QueryRing::new(config.capacity as u64),
            buffers,
            collect_gate: Mutex::new(()),
            watermark: AtomicU64::new(calibration.device_timestamp),
            recycle_retry: [AtomicBool::new(false), AtomicBool::new(false)],
            timeout: config.timeout,
            calibration,
        })
    }

    /// Small integer id carried on every event of this context.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The calibration sample taken at construction.
    pub fn calibration(&self) -> CalibrationSample {
        self.calibration
    }

    /// The hardware provider backing this context.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Slots allocated but not yet resolved and forwarded.
    pub fn outstanding(&self) -> u64 {
        self.ring.outstanding()
    }

    /// Highest query id resolved and forwarded, contiguously from zero.
    pub fn checkpoint(&self) -> u64 {
        self.ring.checkpoint()
    }

    /// Emit a human-readable label for this context.
    pub fn set_name(&self, name: &str) {
        self.sink.emit(TraceEvent::ContextName {
            context: self.id,
            name: name.to_owned(),
        });
    }

    /// Open a timing zone around one pass.
    ///
    /// With `active == false`, or when the sink reports no consumer
    /// attached, the returned scope is a complete no-op. Otherwise this
    /// reserves a query pair, wires `pass` to sample at its start/end
    /// boundaries, and emits the begin event synchronously.
    ///
    /// Errors are explicit rather than degrading: a full ring returns
    /// [`ProfileError::RingFull`] and a wiring failure
    /// [`ProfileError::Attach`]. A pair reserved before a wiring failure is
    /// reclaimed later by the collector's timeout synthesis.
    pub fn begin_zone<'a>(
        &'a self,
        pass: &mut P::Pass,
        location: SourceLoc,
        active: bool,
    ) -> Result<ZoneScope<'a, P, S>> {
        if !active || !self.sink.is_connected() {
            return Ok(ZoneScope::inert());
        }

        let slot = match self.ring.next_pair() {
            Ok(slot) => slot,
            Err(err) => {
                warn!(context = self.id, error = %err, "zone rejected: query ring full");
                return Err(err);
            }
        };
        query_diag!(
            DiagCategory::Alloc,
            query = slot.start_id,
            buffer = slot.buffer,
            index = slot.index,
            "query pair reserved"
        );

        let buffer = self.buffers[slot.buffer].load();
        if let Err(err) = self
            .provider
            .attach(pass, &**buffer, slot.index, slot.index + 1)
        {
            error!(
                context = self.id,
                query = slot.start_id,
                error = %err,
                "failed to wire pass timestamps; zone dropped"
            );
            return Err(err);
        }

        self.sink.emit(TraceEvent::ZoneBegin {
            context: self.id,
            query: slot.start_id,
            host_time_ns: host_time_ns(),
            thread: thread_ident(),
            location,
        });
        query_diag!(DiagCategory::Zone, query = slot.start_id, "zone armed");
        Ok(ZoneScope::armed(self, slot.start_id.wrapping_add(1)))
    }

    /// Drain outstanding queries, bounded best-effort.
    ///
    /// Repeatedly collects until the checkpoint catches up with the
    /// counter or a deadline derived from the collection timeout expires.
    /// Abandoned zones resolve through timeout synthesis within that
    /// window; if the device stops answering entirely, the drain gives up
    /// with a warning rather than hanging teardown.
    pub fn drain(&self) {
        if self.ring.outstanding() == 0 {
            return;
        }
        let deadline = Instant::now() + self.timeout * 2 + Duration::from_millis(100);
        while self.ring.outstanding() != 0 {
            if Instant::now() >= deadline {
                warn!(
                    context = self.id,
                    outstanding = self.ring.outstanding(),
                    "teardown drain gave up with queries outstanding"
                );
                return;
            }
            if let Err(err) = self.collect() {
                debug!(context = self.id, error = %err, "collect failed during teardown drain");
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        debug!(context = self.id, "teardown drain complete");
    }

    #[inline]
    pub(crate) fn emit(&self, event: TraceEvent) {
        self.sink.emit(event);
    }
}

impl<P: TimestampProvider, S: EventSink> Drop for ProfilerContext<P, S> {
    fn drop(&mut self) {
        self.drain();
    }
}
