//! Typed error hierarchy for the profiler.
//!
//! Uses `thiserror` for library-grade errors.  Application code should wrap
//! these in `anyhow::Result` at call sites.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`ProfileError::error_code`]
//! for structured telemetry without string parsing.

use crate::types::SampleGranularity;

/// All errors originating from the strobe profiling layer.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    // ── Construction ─────────────────────────────────────────────────
    #[error("invalid profiler config: {0}")]
    Config(String),

    #[error("device does not support {granularity:?} timestamp sampling")]
    Unsupported { granularity: SampleGranularity },

    #[error("timestamp buffer allocation failed: {0}")]
    BufferAllocation(String),

    #[error("timestamp calibration failed: {0}")]
    Calibration(String),

    // ── Allocation ───────────────────────────────────────────────────
    #[error("query ring full: {outstanding} slots outstanding of {capacity}")]
    RingFull { outstanding: u64, capacity: u64 },

    #[error("failed to attach timestamp samples to pass: {0}")]
    Attach(String),

    // ── Collection ───────────────────────────────────────────────────
    #[error("timestamp resolution failed: {0}")]
    Resolve(String),

    #[error("query backlog exceeds ring capacity: {count} pending of {capacity}")]
    Backlog { count: u64, capacity: u64 },

    // ── Invariants ───────────────────────────────────────────────────
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ProfileError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: construction
    /// - 2xx: allocation
    /// - 3xx: collection
    /// - 6xx: invariants
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 100,
            Self::Unsupported { .. } => 101,
            Self::BufferAllocation(_) => 102,
            Self::Calibration(_) => 103,
            Self::RingFull { .. } => 200,
            Self::Attach(_) => 201,
            Self::Resolve(_) => 300,
            Self::Backlog { .. } => 301,
            Self::InvariantViolation(_) => 600,
        }
    }

    /// Whether the profiler keeps operating after this error.
    ///
    /// Recoverable errors leave slots pending for a later collect call or
    /// simply reject one zone; construction errors leave no usable context.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RingFull { .. }
                | Self::Attach(_)
                | Self::Resolve(_)
                | Self::Backlog { .. }
        )
    }
}

/// Convenience alias used throughout the profiler crates.
pub type Result<T> = std::result::Result<T, ProfileError>;
