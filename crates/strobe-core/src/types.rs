//! Shared vocabulary types for the profiler crates.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Logical query slot identifier.
///
/// Allocated monotonically, two per zone (start slot, then end slot).
/// Never reset for the lifetime of a context; all arithmetic comparing ids
/// uses wrapping operations so the (unreachable in practice) wraparound
/// cannot produce out-of-order resolution.
pub type QueryId = u64;

/// Hardware value meaning "not yet written" for a timestamp slot.
///
/// Buffers are zero-initialized and write-once, so a zero read is the only
/// signal that the device has not sampled the slot yet.
pub const TIMESTAMP_PENDING: u64 = 0;

/// Hardware error sentinel for a timestamp slot.
pub const TIMESTAMP_ERROR: u64 = u64::MAX;

/// Granularities at which a device may be able to sample timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleGranularity {
    /// At the start/end boundary of a command-recording pass. Mandatory —
    /// the whole query lifecycle is built on pass-boundary sampling.
    StageBoundary,
    /// Around individual draw calls inside a pass. Best-effort.
    DrawCall,
    /// Around individual dispatches inside a pass. Best-effort.
    Dispatch,
}

/// The three command-recording pass shapes a zone can bracket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PassKind {
    /// Compute dispatch pass.
    Compute,
    /// Data-transfer (blit/copy) pass.
    Transfer,
    /// Draw pass. Samples once at scope start and once at scope end;
    /// intermediate per-stage sampling is suppressed.
    Draw,
}

/// Which graphics backend a provider drives, carried on `NewContext` so the
/// trace consumer can label the timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GpuBackendKind {
    Vulkan,
    Metal,
    Dx12,
    OpenGl,
    WebGpu,
    /// In-process simulation (tests, demos).
    Simulated,
}

impl GpuBackendKind {
    /// Stable lowercase name for logs and serialized events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vulkan => "vulkan",
            Self::Metal => "metal",
            Self::Dx12 => "dx12",
            Self::OpenGl => "opengl",
            Self::WebGpu => "webgpu",
            Self::Simulated => "simulated",
        }
    }
}

/// One paired device-clock / host-clock reading.
///
/// Anchors device timestamps onto the host timeline. `period` is forwarded
/// to the trace consumer untouched; this layer applies no unit conversion.
#[derive(Clone, Copy, Debug)]
pub struct CalibrationSample {
    /// Device clock value at the calibration point.
    pub device_timestamp: u64,
    /// Host monotonic nanoseconds at the calibration point.
    pub host_time_ns: u64,
    /// Nanoseconds per device tick (1.0 when the device already reports
    /// nanoseconds, as the simulated provider does).
    pub period: f32,
}

/// Static source location captured where a zone opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SourceLoc {
    /// Zone label shown on the timeline, typically the enclosing function.
    pub name: &'static str,
    /// Source file path.
    pub file: &'static str,
    /// 1-based line number.
    pub line: u32,
}

/// Capture the current source location as a [`SourceLoc`] with the given
/// zone name.
#[macro_export]
macro_rules! zone_location {
    ($name:expr) => {
        $crate::types::SourceLoc {
            name: $name,
            file: file!(),
            line: line!(),
        }
    };
}

// ─── Host clock ─────────────────────────────────────────────────────────────

static HOST_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Host monotonic nanoseconds, measured from the first call in the process.
///
/// All host-side event timestamps share this epoch so zone begin/end pairs
/// from different threads order correctly.
pub fn host_time_ns() -> u64 {
    let epoch = HOST_EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

// ─── Thread identity ────────────────────────────────────────────────────────

static NEXT_THREAD_IDENT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_IDENT: u64 = NEXT_THREAD_IDENT.fetch_add(1, Ordering::Relaxed);
}

/// Process-unique identifier for the calling thread.
///
/// Assigned lazily on first use and stable for the thread's lifetime.
/// Carried on zone events so the consumer can reconstruct per-thread
/// submission order.
pub fn thread_ident() -> u64 {
    THREAD_IDENT.with(|id| *id)
}
