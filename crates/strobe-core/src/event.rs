//! Trace-event model and the sink boundary.
//!
//! The profiler never encodes or transports events itself; it hands them to
//! an [`EventSink`] in a fixed order contract:
//!
//! - `ZoneBegin`/`ZoneEnd` arrive synchronously with scope lifetime, in the
//!   emitting thread's order.
//! - `GpuTime` arrives later, at arbitrary delay, in strictly increasing
//!   query-id order per context, correlated purely by `(context, query)`.

use std::sync::Mutex;

use crate::types::{GpuBackendKind, QueryId, SourceLoc};

/// One event on the trace stream.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum TraceEvent {
    /// A profiling context came up; anchors its device clock to the host
    /// timeline.
    NewContext {
        context: u32,
        host_time_ns: u64,
        device_time: u64,
        period: f32,
        backend: GpuBackendKind,
    },
    /// Human-readable label for a context.
    ContextName { context: u32, name: String },
    /// CPU-side observation of a zone opening.
    ZoneBegin {
        context: u32,
        query: QueryId,
        host_time_ns: u64,
        thread: u64,
        location: SourceLoc,
    },
    /// CPU-side observation of a zone closing.
    ZoneEnd {
        context: u32,
        query: QueryId,
        host_time_ns: u64,
        thread: u64,
    },
    /// Device timestamp for one slot, resolved asynchronously.
    GpuTime {
        context: u32,
        query: QueryId,
        device_time: u64,
    },
}

impl TraceEvent {
    /// The id of the context this event belongs to.
    pub fn context(&self) -> u32 {
        match self {
            Self::NewContext { context, .. }
            | Self::ContextName { context, .. }
            | Self::ZoneBegin { context, .. }
            | Self::ZoneEnd { context, .. }
            | Self::GpuTime { context, .. } => *context,
        }
    }
}

/// Receives the profiler's event stream.
///
/// Implementations: trace-protocol encoders, log forwarders, in-memory
/// capture for tests. `emit` is called from arbitrary threads and must not
/// block the caller for long; zone construction happens on hot paths.
pub trait EventSink: Send + Sync + 'static {
    /// Consume one event.
    fn emit(&self, event: TraceEvent);

    /// Whether a consumer is attached.
    ///
    /// When this returns `false`, zones become no-ops and no events are
    /// produced. Defaults to `true` for sinks that are always live.
    fn is_connected(&self) -> bool {
        true
    }
}

// Sinks are routinely shared between the profiler and the caller.
impl<S: EventSink> EventSink for std::sync::Arc<S> {
    fn emit(&self, event: TraceEvent) {
        (**self).emit(event);
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

// ─── Shipped sinks ──────────────────────────────────────────────────────────

/// Forwards every event to `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TraceEvent) {
        tracing::debug!(target: "strobe::events", context = event.context(), ?event, "trace event");
    }
}

/// Captures events in memory, in arrival order.
///
/// Used by the test suites and the demo CLI; a real application would wire
/// a protocol encoder here instead.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Drain captured events, leaving the sink empty.
    pub fn take(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Number of events captured so far.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: TraceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(TraceEvent) + Send + Sync + 'static,
{
    fn emit(&self, event: TraceEvent) {
        (self.0)(event);
    }
}
