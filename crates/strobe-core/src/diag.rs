//! Feature-gated per-query diagnostics.
//!
//! This module is intentionally tiny: when `query-diag` is disabled, the
//! [`query_diag!`](crate::query_diag) macro and every helper here compile
//! down to no-ops. When enabled, categories are filtered at runtime via the
//! `STROBE_DIAG` environment variable (`all` or a comma-separated list of
//! category names), read once per process.

#[cfg(feature = "query-diag")]
use std::sync::OnceLock;

/// Diagnostic categories, one per stage of the query lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagCategory {
    /// Query-pair allocation and ring occupancy.
    Alloc,
    /// Per-pair resolution outcomes inside a collect pass.
    Collect,
    /// Hardware buffer discard/recreate events.
    Recycle,
    /// Zone scope construction and destruction.
    Zone,
}

impl DiagCategory {
    /// Stable lowercase name, used for both filtering and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alloc => "alloc",
            Self::Collect => "collect",
            Self::Recycle => "recycle",
            Self::Zone => "zone",
        }
    }
}

#[cfg(feature = "query-diag")]
#[derive(Debug, Default)]
struct DiagMask {
    all: bool,
    alloc: bool,
    collect: bool,
    recycle: bool,
    zone: bool,
}

#[cfg(feature = "query-diag")]
static MASK: OnceLock<DiagMask> = OnceLock::new();

#[cfg(feature = "query-diag")]
fn mask() -> &'static DiagMask {
    MASK.get_or_init(|| {
        let spec = std::env::var("STROBE_DIAG").unwrap_or_default();
        let mut mask = DiagMask::default();
        for token in spec.split(',').map(str::trim) {
            match token {
                "all" => mask.all = true,
                "alloc" => mask.alloc = true,
                "collect" => mask.collect = true,
                "recycle" => mask.recycle = true,
                "zone" => mask.zone = true,
                _ => {}
            }
        }
        mask
    })
}

/// Whether diagnostics for `category` are enabled in this process.
#[cfg(feature = "query-diag")]
pub fn enabled(category: DiagCategory) -> bool {
    let mask = mask();
    if mask.all {
        return true;
    }
    match category {
        DiagCategory::Alloc => mask.alloc,
        DiagCategory::Collect => mask.collect,
        DiagCategory::Recycle => mask.recycle,
        DiagCategory::Zone => mask.zone,
    }
}

/// Whether diagnostics for `category` are enabled in this process.
#[cfg(not(feature = "query-diag"))]
pub fn enabled(category: DiagCategory) -> bool {
    let _ = category;
    false
}
