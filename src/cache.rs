//! Resilient TTL cache with per-key single-flight de-duplication.

pub mod entry;
pub mod store;

pub use store::{Loader, TtlCache};
