#![doc = include_str!("../README.md")]

pub mod diag;
pub mod error;
pub mod event;
pub mod provider;
pub mod types;

/// Emit a per-query diagnostic line.
///
/// Compiles to nothing unless the `query-diag` feature is enabled; the hot
/// paths (allocation, per-pair resolution) go through this so a production
/// build pays no formatting or filtering cost.
#[macro_export]
macro_rules! query_diag {
    ($category:expr, $($arg:tt)+) => {{
        #[cfg(feature = "query-diag")]
        {
            if $crate::diag::enabled($category) {
                ::tracing::debug!(target: "strobe::diag", category = $category.as_str(), $($arg)+);
            }
        }
        #[cfg(not(feature = "query-diag"))]
        {
            let _ = &$category;
        }
    }};
}
