//! Scoped GPU timing zones.
//!
//! A [`ZoneScope`] brackets exactly one command-recording pass. Creating it
//! reserves a query-slot pair, wires the pass so the device samples a
//! timestamp at the scope's start and end boundaries, and emits the
//! CPU-side begin event; dropping it emits the end event. The device
//! timestamps themselves are not known at either point — they arrive later
//! through [`ProfilerContext::collect`](crate::context::ProfilerContext::collect),
//! correlated by query id.

use strobe_core::event::{EventSink, TraceEvent};
use strobe_core::provider::TimestampProvider;
use strobe_core::types::{QueryId, host_time_ns, thread_ident};

use crate::context::ProfilerContext;

/// An open timing zone.
///
/// Inert scopes (inactive flag, disconnected sink, or rejected allocation)
/// carry no context reference and cost nothing to drop.
#[must_use = "a zone ends when this scope drops"]
pub struct ZoneScope<'a, P: TimestampProvider, S: EventSink> {
    context: Option<&'a ProfilerContext<P, S>>,
    end_query: QueryId,
}

impl<'a, P: TimestampProvider, S: EventSink> ZoneScope<'a, P, S> {
    pub(crate) fn inert() -> Self {
        Self {
            context: None,
            end_query: 0,
        }
    }

    pub(crate) fn armed(context: &'a ProfilerContext<P, S>, end_query: QueryId) -> Self {
        Self {
            context: Some(context),
            end_query,
        }
    }

    /// Whether this scope is actually recording.
    pub fn is_active(&self) -> bool {
        self.context.is_some()
    }
}

impl<P: TimestampProvider, S: EventSink> std::fmt::Debug for ZoneScope<'_, P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneScope")
            .field("active", &self.context.is_some())
            .field("end_query", &self.end_query)
            .finish()
    }
}

impl<P: TimestampProvider, S: EventSink> Drop for ZoneScope<'_, P, S> {
    fn drop(&mut self) {
        let Some(context) = self.context else {
            return;
        };
        context.emit(TraceEvent::ZoneEnd {
            context: context.id(),
            query: self.end_query,
            host_time_ns: host_time_ns(),
            thread: thread_ident(),
        });
    }
}
