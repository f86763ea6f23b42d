//! Cache entry definitions and expiry helpers.

// self
use crate::_prelude::*;

/// A cached value together with its freshness deadline.
///
/// Entries are created on first successful load and replaced in full by a
/// newly succeeding load; a failed load never touches them.
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
	value: V,
	expires_at: Instant,
}
impl<V> CacheEntry<V> {
	/// Create an entry that stays fresh until `expires_at`.
	pub fn new(value: V, expires_at: Instant) -> Self {
		Self { value, expires_at }
	}

	/// The cached value.
	pub fn value(&self) -> &V {
		&self.value
	}

	/// Monotonic deadline after which the entry is considered stale.
	pub fn expires_at(&self) -> Instant {
		self.expires_at
	}

	/// Whether the entry has exceeded its freshness window.
	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.expires_at
	}
}
