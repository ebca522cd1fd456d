//! Core types shared by the dvmscan engine: events, kinds, filters and the
//! per-session deduplicator.

pub mod dedup;
pub mod error;
pub mod event;
pub mod filter;
pub mod kind;

pub use dedup::{EventDeduplicator, Observation};
pub use error::{FilterValidationError, ProtocolError};
pub use event::{EventId, PublicKey, RawEvent};
pub use filter::{parse_kinds, FilterSet, FilterSetBuilder};
pub use kind::KindClass;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
