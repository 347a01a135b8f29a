//! In-process simulated timestamp provider.
//!
//! Deterministic stand-in for real hardware, used by the test suites and
//! the demo CLI. The device clock only moves when told to, buffers are
//! plain slot vectors that tests can write directly, and pass "execution"
//! is an explicit call — so every lifecycle state (pending, resolved,
//! faulted, abandoned) can be staged exactly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use strobe_core::error::{ProfileError, Result};
use strobe_core::provider::TimestampProvider;
use strobe_core::types::{
    CalibrationSample, GpuBackendKind, PassKind, SampleGranularity, TIMESTAMP_ERROR, host_time_ns,
};

/// One simulated hardware buffer: fixed capacity, zero-initialized,
/// write-once in spirit (the simulation does not enforce it, tests do).
#[derive(Clone)]
pub struct SimBuffer {
    slots: Arc<Mutex<Vec<u64>>>,
}

impl SimBuffer {
    fn with_capacity(capacity: u32) -> Self {
        Self {
            slots: Arc::new(Mutex::new(vec![0; capacity as usize])),
        }
    }

    /// Slots in this buffer.
    pub fn capacity(&self) -> u32 {
        self.slots.lock().unwrap().len() as u32
    }

    /// Simulate the device writing a timestamp into one slot.
    pub fn write(&self, index: u32, value: u64) {
        self.slots.lock().unwrap()[index as usize] = value;
    }

    /// Simulate a device-side failure for one slot.
    pub fn fault(&self, index: u32) {
        self.write(index, TIMESTAMP_ERROR);
    }

    /// Read one slot back.
    pub fn read(&self, index: u32) -> u64 {
        self.slots.lock().unwrap()[index as usize]
    }
}

/// A simulated command-recording pass.
pub struct SimPass {
    kind: PassKind,
    valid: bool,
    attachments: Vec<SimAttachment>,
}

struct SimAttachment {
    buffer: SimBuffer,
    start_index: u32,
    end_index: u32,
}

impl SimPass {
    /// A well-formed pass of the given shape.
    pub fn new(kind: PassKind) -> Self {
        Self {
            kind,
            valid: true,
            attachments: Vec::new(),
        }
    }

    /// A malformed pass: every attach attempt fails, the way a missing
    /// descriptor does on real hardware.
    pub fn invalid(kind: PassKind) -> Self {
        Self {
            kind,
            valid: false,
            attachments: Vec::new(),
        }
    }

    pub fn kind(&self) -> PassKind {
        self.kind
    }

    /// How many zones are wired into this pass.
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }
}

struct SimShared {
    clock: AtomicU64,
    allocated: Mutex<Vec<SimBuffer>>,
    fail_allocation: AtomicBool,
    fail_resolve: AtomicBool,
    stage_boundary: bool,
    draw_call: bool,
    dispatch: bool,
}

/// Cheaply clonable handle to the simulated device; the profiler context
/// owns one clone, the test or demo driver another.
#[derive(Clone)]
pub struct SimProvider {
    shared: Arc<SimShared>,
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimProvider {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SimShared {
                clock: AtomicU64::new(1_000),
                allocated: Mutex::new(Vec::new()),
                fail_allocation: AtomicBool::new(false),
                fail_resolve: AtomicBool::new(false),
                stage_boundary: true,
                draw_call: true,
                dispatch: true,
            }),
        }
    }

    /// Drop support for one granularity, for capability-probe tests.
    pub fn without_granularity(self, granularity: SampleGranularity) -> Self {
        let shared = Arc::try_unwrap(self.shared).unwrap_or_else(|arc| SimShared {
            clock: AtomicU64::new(arc.clock.load(Ordering::Relaxed)),
            allocated: Mutex::new(arc.allocated.lock().unwrap().clone()),
            fail_allocation: AtomicBool::new(arc.fail_allocation.load(Ordering::Relaxed)),
            fail_resolve: AtomicBool::new(arc.fail_resolve.load(Ordering::Relaxed)),
            stage_boundary: arc.stage_boundary,
            draw_call: arc.draw_call,
            dispatch: arc.dispatch,
        });
        let mut shared = shared;
        match granularity {
            SampleGranularity::StageBoundary => shared.stage_boundary = false,
            SampleGranularity::DrawCall => shared.draw_call = false,
            SampleGranularity::Dispatch => shared.dispatch = false,
        }
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Current device clock value.
    pub fn now(&self) -> u64 {
        self.shared.clock.load(Ordering::Relaxed)
    }

    /// Advance the device clock and return the new value.
    pub fn advance_clock(&self, ticks: u64) -> u64 {
        self.shared.clock.fetch_add(ticks, Ordering::Relaxed) + ticks
    }

    /// The `ordinal`-th buffer ever allocated (creation order), if any.
    /// A context allocates buffers 0 and 1 up front; recycling appends.
    pub fn buffer(&self, ordinal: usize) -> Option<SimBuffer> {
        self.shared.allocated.lock().unwrap().get(ordinal).cloned()
    }

    /// Total buffers allocated so far, recycles included.
    pub fn buffers_allocated(&self) -> usize {
        self.shared.allocated.lock().unwrap().len()
    }

    /// Make subsequent buffer allocations fail (recycle-failure tests).
    pub fn set_allocation_failure(&self, fail: bool) {
        self.shared.fail_allocation.store(fail, Ordering::Relaxed);
    }

    /// Make subsequent resolutions fail (device-loss tests).
    pub fn set_resolve_failure(&self, fail: bool) {
        self.shared.fail_resolve.store(fail, Ordering::Relaxed);
    }

    /// Simulate the device executing `pass`: each wired zone gets a start
    /// timestamp, then an end timestamp, from the advancing device clock.
    pub fn complete_pass(&self, pass: &SimPass) {
        for attachment in &pass.attachments {
            let start = self.advance_clock(1);
            attachment.buffer.write(attachment.start_index, start);
            let end = self.advance_clock(1);
            attachment.buffer.write(attachment.end_index, end);
        }
    }
}

impl TimestampProvider for SimProvider {
    type Buffer = SimBuffer;
    type Pass = SimPass;

    fn supports(&self, granularity: SampleGranularity) -> bool {
        match granularity {
            SampleGranularity::StageBoundary => self.shared.stage_boundary,
            SampleGranularity::DrawCall => self.shared.draw_call,
            SampleGranularity::Dispatch => self.shared.dispatch,
        }
    }

    fn allocate_buffer(&self, capacity: u32) -> Result<SimBuffer> {
        if self.shared.fail_allocation.load(Ordering::Relaxed) {
            return Err(ProfileError::BufferAllocation(
                "simulated allocation failure".into(),
            ));
        }
        let buffer = SimBuffer::with_capacity(capacity);
        self.shared
            .allocated
            .lock()
            .unwrap()
            .push(buffer.clone());
        Ok(buffer)
    }

    fn attach(
        &self,
        pass: &mut SimPass,
        buffer: &SimBuffer,
        start_index: u32,
        end_index: u32,
    ) -> Result<()> {
        if !pass.valid {
            return Err(ProfileError::Attach(format!(
                "{:?} pass has no descriptor",
                pass.kind
            )));
        }
        let capacity = buffer.capacity();
        if start_index >= capacity || end_index >= capacity {
            return Err(ProfileError::Attach(format!(
                "sample indices {start_index}/{end_index} out of range for capacity {capacity}"
            )));
        }
        pass.attachments.push(SimAttachment {
            buffer: buffer.clone(),
            start_index,
            end_index,
        });
        Ok(())
    }

    fn resolve(&self, buffer: &SimBuffer, range: std::ops::Range<u32>) -> Result<Vec<u64>> {
        if self.shared.fail_resolve.load(Ordering::Relaxed) {
            return Err(ProfileError::Resolve("simulated device loss".into()));
        }
        let slots = buffer.slots.lock().unwrap();
        if range.end as usize > slots.len() {
            return Err(ProfileError::Resolve(format!(
                "range {range:?} out of bounds for capacity {}",
                slots.len()
            )));
        }
        Ok(slots[range.start as usize..range.end as usize].to_vec())
    }

    fn calibrate(&self) -> Result<CalibrationSample> {
        Ok(CalibrationSample {
            device_timestamp: self.now(),
            host_time_ns: host_time_ns(),
            period: 1.0,
        })
    }

    fn backend_kind(&self) -> GpuBackendKind {
        GpuBackendKind::Simulated
    }
}
