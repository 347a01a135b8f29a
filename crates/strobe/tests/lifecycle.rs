//! End-to-end query lifecycle tests against the simulated provider.
//!
//! Small ring (capacity 4 slots per buffer = 2 zones per buffer) so the
//! boundary, recycle, and full-ring paths are reachable in a few
//! allocations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use strobe::sim::{SimPass, SimProvider};
use strobe::{ProfilerConfig, ProfilerContext};
use strobe_core::error::ProfileError;
use strobe_core::event::{EventSink, MemorySink, TraceEvent};
use strobe_core::types::{GpuBackendKind, PassKind, SampleGranularity, thread_ident};
use strobe_core::zone_location;

type SimContext = ProfilerContext<SimProvider, Arc<MemorySink>>;

fn small_config(timeout: Duration) -> ProfilerConfig {
    ProfilerConfig {
        capacity: 4,
        timeout,
    }
}

fn new_context(config: ProfilerConfig) -> (SimProvider, Arc<MemorySink>, SimContext) {
    let provider = SimProvider::new();
    let sink = Arc::new(MemorySink::new());
    let context =
        ProfilerContext::new(provider.clone(), Arc::clone(&sink), config).expect("context");
    (provider, sink, context)
}

fn gpu_times(events: &[TraceEvent]) -> Vec<(u64, u64)> {
    events
        .iter()
        .filter_map(|event| match event {
            TraceEvent::GpuTime {
                query, device_time, ..
            } => Some((*query, *device_time)),
            _ => None,
        })
        .collect()
}

/// Open a zone around a fresh compute pass and drop it immediately.
fn record_zone(context: &SimContext, provider: &SimProvider, complete: bool) {
    let mut pass = SimPass::new(PassKind::Compute);
    let zone = context
        .begin_zone(&mut pass, zone_location!("test zone"), true)
        .expect("zone");
    assert!(zone.is_active());
    drop(zone);
    if complete {
        provider.complete_pass(&pass);
    }
}

#[test]
fn collect_with_nothing_pending_is_a_noop() {
    let (provider, sink, context) = new_context(small_config(Duration::from_millis(200)));
    sink.take();
    context.collect().expect("collect");
    assert_eq!(context.checkpoint(), 0);
    assert_eq!(context.outstanding(), 0);
    assert!(sink.is_empty());
    assert_eq!(provider.buffers_allocated(), 2);
}

#[test]
fn new_context_emits_calibrated_announcement() {
    let (provider, sink, context) = new_context(small_config(Duration::from_millis(200)));
    let events = sink.events();
    match &events[0] {
        TraceEvent::NewContext {
            context: id,
            device_time,
            period,
            backend,
            ..
        } => {
            assert_eq!(*id, context.id());
            assert_eq!(*device_time, context.calibration().device_timestamp);
            assert_eq!(*period, 1.0);
            assert_eq!(*backend, GpuBackendKind::Simulated);
        }
        other => panic!("expected NewContext first, got {other:?}"),
    }
    context.set_name("sim queue");
    let events = sink.events();
    assert!(matches!(
        events.last().unwrap(),
        TraceEvent::ContextName { name, .. } if name == "sim queue"
    ));
    drop(context);
    let _ = provider;
}

#[test]
fn zone_events_carry_identity() {
    let (provider, sink, context) = new_context(small_config(Duration::from_millis(200)));
    sink.take();
    record_zone(&context, &provider, true);

    let events = sink.events();
    match &events[0] {
        TraceEvent::ZoneBegin {
            context: id,
            query,
            thread,
            location,
            ..
        } => {
            assert_eq!(*id, context.id());
            assert_eq!(*query, 0);
            assert_eq!(*thread, thread_ident());
            assert_eq!(location.name, "test zone");
            assert!(location.file.ends_with("lifecycle.rs"));
        }
        other => panic!("expected ZoneBegin, got {other:?}"),
    }
    match &events[1] {
        TraceEvent::ZoneEnd { query, thread, .. } => {
            assert_eq!(*query, 1);
            assert_eq!(*thread, thread_ident());
        }
        other => panic!("expected ZoneEnd, got {other:?}"),
    }
}

#[test]
fn resolved_pair_round_trips_in_order() {
    let (provider, sink, context) = new_context(small_config(Duration::from_millis(200)));
    sink.take();
    record_zone(&context, &provider, true);
    context.collect().expect("collect");

    let times = gpu_times(&sink.events());
    assert_eq!(times.len(), 2);
    let (q0, t0) = times[0];
    let (q1, t1) = times[1];
    assert_eq!((q0, q1), (0, 1));
    assert!(t1 > t0 && t0 > 0);
    assert_eq!(context.checkpoint(), 2);
}

#[test]
fn collection_stalls_at_pending_then_synthesizes_after_timeout() {
    let timeout = Duration::from_millis(40);
    let (provider, sink, context) = new_context(small_config(timeout));
    sink.take();

    // Three zones: the first two complete on the device, the third is
    // abandoned (its pass never executes).
    let buffer0 = provider.buffer(0).expect("buffer 0");
    for _ in 0..3 {
        record_zone(&context, &provider, false);
    }
    for (index, value) in [(0, 100), (1, 110), (2, 120), (3, 130)] {
        buffer0.write(index, value);
    }

    context.collect().expect("collect");
    let times = gpu_times(&sink.events());
    assert_eq!(
        times,
        [(0, 100), (1, 110), (2, 120), (3, 130)],
        "exactly the resolved prefix is forwarded"
    );
    assert_eq!(context.checkpoint(), 4);
    assert_eq!(context.outstanding(), 2);

    // Still pending, still young: no progress.
    context.collect().expect("collect");
    assert_eq!(context.checkpoint(), 4);

    std::thread::sleep(timeout + Duration::from_millis(20));
    context.collect().expect("collect");
    let times = gpu_times(&sink.events());
    assert_eq!(times.len(), 6);
    // Synthesized values continue from the most recent resolved timestamp.
    assert_eq!(times[4], (4, 131));
    assert_eq!(times[5], (5, 132));
    assert_eq!(context.checkpoint(), 6);
    assert_eq!(context.outstanding(), 0);
}

#[test]
fn draining_a_buffer_recycles_it() {
    let (provider, sink, context) = new_context(small_config(Duration::from_millis(200)));
    sink.take();
    assert_eq!(provider.buffers_allocated(), 2);

    // Two zones fill buffer 0 exactly.
    for _ in 0..2 {
        record_zone(&context, &provider, true);
    }
    context.collect().expect("collect");
    assert_eq!(context.checkpoint(), 4);
    assert_eq!(
        provider.buffers_allocated(),
        3,
        "drained buffer discarded and replaced"
    );
    let fresh = provider.buffer(2).expect("replacement buffer");
    for index in 0..4 {
        assert_eq!(fresh.read(index), 0, "replacement starts zeroed");
    }

    // The freed range is usable again: two zones land in buffer 1, the
    // next two in the replacement for buffer 0.
    for _ in 0..4 {
        record_zone(&context, &provider, true);
    }
    context.collect().expect("collect");
    context.collect().expect("collect");
    assert_eq!(context.checkpoint(), 12);
    assert_eq!(context.outstanding(), 0);
    assert!(fresh.read(0) > 0, "fresh buffer received new timestamps");
}

#[test]
fn full_ring_rejects_allocation_explicitly() {
    let (provider, sink, context) = new_context(small_config(Duration::from_millis(200)));
    sink.take();
    for _ in 0..4 {
        record_zone(&context, &provider, true);
    }
    assert_eq!(context.outstanding(), 8);

    let mut pass = SimPass::new(PassKind::Draw);
    let err = context
        .begin_zone(&mut pass, zone_location!("overflow"), true)
        .expect_err("ring is full");
    match err {
        ProfileError::RingFull {
            outstanding,
            capacity,
        } => {
            assert_eq!(outstanding, 8);
            assert_eq!(capacity, 8);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        pass.attachment_count(),
        0,
        "no slot is wired into the rejected pass"
    );
    // No begin event was emitted for the rejected zone.
    assert!(
        sink.events()
            .iter()
            .all(|event| !matches!(event, TraceEvent::ZoneBegin { query, .. } if *query >= 8))
    );

    // Collecting frees the ring again.
    context.collect().expect("collect");
    context
        .begin_zone(&mut pass, zone_location!("retry"), true)
        .expect("ring drained");
}

#[test]
fn inactive_zone_is_a_complete_noop() {
    let (_provider, sink, context) = new_context(small_config(Duration::from_millis(200)));
    sink.take();
    let mut pass = SimPass::new(PassKind::Transfer);
    let zone = context
        .begin_zone(&mut pass, zone_location!("inactive"), false)
        .expect("inert zone");
    assert!(!zone.is_active());
    drop(zone);
    assert!(sink.is_empty());
    assert_eq!(context.outstanding(), 0);
    assert_eq!(pass.attachment_count(), 0);
}

#[test]
fn disconnected_sink_suppresses_zones() {
    struct Disconnected(MemorySink);
    impl EventSink for Disconnected {
        fn emit(&self, event: TraceEvent) {
            self.0.emit(event);
        }
        fn is_connected(&self) -> bool {
            false
        }
    }

    let provider = SimProvider::new();
    let context = ProfilerContext::new(
        provider,
        Disconnected(MemorySink::new()),
        small_config(Duration::from_millis(200)),
    )
    .expect("context");
    let mut pass = SimPass::new(PassKind::Compute);
    let zone = context
        .begin_zone(&mut pass, zone_location!("offline"), true)
        .expect("inert zone");
    assert!(!zone.is_active());
    assert_eq!(context.outstanding(), 0);
}

#[test]
fn attach_failure_surfaces_and_slots_recover_by_timeout() {
    let timeout = Duration::from_millis(30);
    let (_provider, sink, context) = new_context(small_config(timeout));
    sink.take();

    let mut pass = SimPass::invalid(PassKind::Draw);
    let err = context
        .begin_zone(&mut pass, zone_location!("no descriptor"), true)
        .expect_err("attach must fail");
    assert!(matches!(err, ProfileError::Attach(_)));
    assert!(sink.is_empty(), "no begin event for a dropped zone");
    assert_eq!(context.outstanding(), 2, "the reserved pair stays pending");

    std::thread::sleep(timeout + Duration::from_millis(20));
    context.collect().expect("collect");
    assert_eq!(context.outstanding(), 0, "timeout synthesis reclaims it");
    assert_eq!(gpu_times(&sink.events()).len(), 2);
}

#[test]
fn error_sentinel_halts_then_synthesizes_after_timeout() {
    let timeout = Duration::from_millis(40);
    let (provider, sink, context) = new_context(small_config(timeout));
    sink.take();

    record_zone(&context, &provider, false);
    let buffer0 = provider.buffer(0).expect("buffer 0");
    buffer0.fault(0);
    buffer0.write(1, 500);

    context.collect().expect("halt is not an error");
    assert_eq!(context.checkpoint(), 0, "no advance past a faulted pair");
    assert!(gpu_times(&sink.events()).is_empty());

    std::thread::sleep(timeout + Duration::from_millis(20));
    context.collect().expect("collect");
    assert_eq!(context.checkpoint(), 2);
    assert_eq!(gpu_times(&sink.events()).len(), 2);
}

#[test]
fn resolve_failure_leaves_slots_pending() {
    let (provider, sink, context) = new_context(small_config(Duration::from_millis(200)));
    sink.take();
    record_zone(&context, &provider, true);

    provider.set_resolve_failure(true);
    let err = context.collect().expect_err("resolution fails");
    assert!(matches!(err, ProfileError::Resolve(_)));
    assert_eq!(context.checkpoint(), 0);
    assert!(gpu_times(&sink.events()).is_empty());

    provider.set_resolve_failure(false);
    context.collect().expect("collect");
    assert_eq!(context.checkpoint(), 2);
}

#[test]
fn recycle_failure_is_retried_on_next_collect() {
    let (provider, sink, context) = new_context(small_config(Duration::from_millis(200)));
    sink.take();
    for _ in 0..2 {
        record_zone(&context, &provider, true);
    }

    provider.set_allocation_failure(true);
    let err = context.collect().expect_err("recycle allocation fails");
    assert!(matches!(err, ProfileError::BufferAllocation(_)));
    assert_eq!(
        context.checkpoint(),
        4,
        "resolved pairs were committed before the recycle attempt"
    );
    assert_eq!(gpu_times(&sink.events()).len(), 4);
    assert_eq!(provider.buffers_allocated(), 2);

    provider.set_allocation_failure(false);
    context.collect().expect("retry succeeds");
    assert_eq!(provider.buffers_allocated(), 3);
}

#[test]
fn concurrent_collect_has_one_writer() {
    let (provider, sink, context) = new_context(ProfilerConfig {
        capacity: 64,
        timeout: Duration::from_millis(500),
    });
    sink.take();
    for _ in 0..32 {
        record_zone(&context, &provider, true);
    }

    std::thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                for _ in 0..50 {
                    context.collect().expect("collect");
                }
            });
        }
    });
    context.collect().expect("collect");

    let times = gpu_times(&sink.events());
    let queries: Vec<u64> = times.iter().map(|(query, _)| *query).collect();
    assert_eq!(queries.len(), 64, "each slot forwarded exactly once");
    assert!(
        queries.windows(2).all(|w| w[0] < w[1]),
        "forwarding order is strictly increasing"
    );
    assert_eq!(context.checkpoint(), 64);
}

#[test]
fn checkpoint_never_exceeds_counter_under_interleaving() {
    let (provider, sink, context) = new_context(ProfilerConfig {
        capacity: 8,
        timeout: Duration::from_millis(10),
    });
    sink.take();

    std::thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                for _ in 0..40 {
                    // Full-ring rejections are expected here; only the
                    // bookkeeping invariant matters.
                    let mut pass = SimPass::new(PassKind::Compute);
                    if let Ok(zone) =
                        context.begin_zone(&mut pass, zone_location!("stress"), true)
                    {
                        drop(zone);
                        provider.complete_pass(&pass);
                    }
                    assert!(context.outstanding() <= 16);
                }
            });
        }
        scope.spawn(|| {
            for _ in 0..60 {
                let _ = context.collect();
                assert!(context.outstanding() <= 16);
                std::thread::sleep(Duration::from_micros(200));
            }
        });
    });

    // A collect pass stops at each physical buffer boundary; a few passes
    // drain everything once the abandoned pairs age past the timeout.
    std::thread::sleep(Duration::from_millis(20));
    for _ in 0..8 {
        context.collect().expect("final collect");
        if context.outstanding() == 0 {
            break;
        }
    }
    assert_eq!(context.outstanding(), 0);
}

#[test]
fn construction_requires_stage_boundary_sampling() {
    let provider = SimProvider::new().without_granularity(SampleGranularity::StageBoundary);
    let err = ProfilerContext::new(
        provider,
        Arc::new(MemorySink::new()),
        small_config(Duration::from_millis(200)),
    )
    .expect_err("mandatory capability missing");
    assert!(matches!(
        err,
        ProfileError::Unsupported {
            granularity: SampleGranularity::StageBoundary
        }
    ));
    assert!(!err.is_recoverable());
}

#[test]
fn construction_tolerates_missing_optional_granularities() {
    let provider = SimProvider::new()
        .without_granularity(SampleGranularity::DrawCall)
        .without_granularity(SampleGranularity::Dispatch);
    ProfilerContext::new(
        provider,
        Arc::new(MemorySink::new()),
        small_config(Duration::from_millis(200)),
    )
    .expect("optional granularities only warn");
}

#[test]
fn config_validation_rejects_bad_values() {
    for capacity in [0u32, 1, 5] {
        let err = ProfilerContext::new(
            SimProvider::new(),
            Arc::new(MemorySink::new()),
            ProfilerConfig {
                capacity,
                timeout: Duration::from_millis(200),
            },
        )
        .expect_err("invalid capacity");
        assert!(matches!(err, ProfileError::Config(_)));
    }
    let err = ProfilerContext::new(
        SimProvider::new(),
        Arc::new(MemorySink::new()),
        ProfilerConfig {
            capacity: 4,
            timeout: Duration::ZERO,
        },
    )
    .expect_err("zero timeout");
    assert!(matches!(err, ProfileError::Config(_)));
}

#[test]
fn drop_drains_outstanding_zones() {
    let timeout = Duration::from_millis(20);
    let (provider, sink, context) = new_context(small_config(timeout));
    sink.take();
    record_zone(&context, &provider, false);
    assert_eq!(context.outstanding(), 2);

    // Abandoned zone: drop must synthesize it within the drain window
    // rather than hanging.
    drop(context);
    assert_eq!(gpu_times(&sink.events()).len(), 2);
}

#[test]
fn drain_gives_up_when_the_device_stops_answering() {
    let timeout = Duration::from_millis(20);
    let (provider, sink, context) = new_context(small_config(timeout));
    sink.take();
    record_zone(&context, &provider, false);
    provider.set_resolve_failure(true);

    let started = Instant::now();
    context.drain();
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "drain is bounded"
    );
    assert_eq!(context.outstanding(), 2, "queries remain outstanding");

    // Let the final Drop drain clean up quickly.
    provider.set_resolve_failure(false);
}
