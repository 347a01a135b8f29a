#![doc = include_str!("../README.md")]

pub mod collect;
pub mod context;
pub mod ring;
pub mod sim;
pub mod zone;

pub use context::{ProfilerConfig, ProfilerContext};
pub use ring::{QueryRing, QuerySlot};
pub use zone::ZoneScope;
