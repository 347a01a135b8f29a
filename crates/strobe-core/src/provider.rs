//! The hardware timestamp boundary.
//!
//! Everything the ring-buffer lifecycle needs from a graphics API is behind
//! [`TimestampProvider`], a neutral home that breaks the dependency between
//! the engine crate and concrete backends (`strobe-wgpu`, the in-process
//! simulator). The contract mirrors what the hardware actually offers:
//!
//! - buffers are fixed-capacity, zero-initialized, and **write-once** — a
//!   slot cannot return to zero except by discarding the whole buffer;
//! - a pass can only sample at its start/end boundaries, wired in before
//!   the pass is encoded;
//! - resolution is asynchronous: a slot reads [`TIMESTAMP_PENDING`] until
//!   the device writes it, or [`TIMESTAMP_ERROR`] on device-side failure.
//!
//! [`TIMESTAMP_PENDING`]: crate::types::TIMESTAMP_PENDING
//! [`TIMESTAMP_ERROR`]: crate::types::TIMESTAMP_ERROR

use std::ops::Range;

use crate::error::Result;
use crate::types::{CalibrationSample, GpuBackendKind, SampleGranularity};

/// A device that can sample timestamps at pass boundaries.
///
/// All methods may be called from any thread. `attach` runs on the zone
/// hot path and must not block; `resolve` runs under the collector's
/// single-writer lock and may wait on the device.
pub trait TimestampProvider: Send + Sync + 'static {
    /// Opaque handle to one fixed-capacity timestamp buffer.
    type Buffer: Send + Sync + 'static;

    /// Backend-specific description of a pass being recorded.
    type Pass;

    /// Capability probe for one sampling granularity.
    ///
    /// [`SampleGranularity::StageBoundary`] support is mandatory for
    /// context construction; the others are best-effort.
    fn supports(&self, granularity: SampleGranularity) -> bool;

    /// Allocate a zero-initialized buffer with `capacity` timestamp slots.
    fn allocate_buffer(&self, capacity: u32) -> Result<Self::Buffer>;

    /// Wire `pass` so the device writes a timestamp into `start_index` at
    /// the pass's start boundary and into `end_index` at its end boundary.
    ///
    /// The three pass shapes (compute, data-transfer, draw) each wire the
    /// two sample points at their appropriate stage boundaries; draw passes
    /// sample exactly once per boundary with intermediate stage sampling
    /// suppressed.
    fn attach(
        &self,
        pass: &mut Self::Pass,
        buffer: &Self::Buffer,
        start_index: u32,
        end_index: u32,
    ) -> Result<()>;

    /// Read back the contiguous slot range `range` from `buffer`.
    ///
    /// Returns one value per slot: the device timestamp, or
    /// [`TIMESTAMP_PENDING`](crate::types::TIMESTAMP_PENDING) for slots the
    /// device has not written yet, or
    /// [`TIMESTAMP_ERROR`](crate::types::TIMESTAMP_ERROR) on device-side
    /// failure.
    fn resolve(&self, buffer: &Self::Buffer, range: Range<u32>) -> Result<Vec<u64>>;

    /// Take one paired device-clock/host-clock sample.
    fn calibrate(&self) -> Result<CalibrationSample>;

    /// Which backend this provider drives.
    fn backend_kind(&self) -> GpuBackendKind;
}
