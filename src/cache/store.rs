//! Keyed cache store with single-flight loads and retrying refresh.

// std
use std::{
	collections::HashMap,
	future::Future,
	hash::Hash,
	sync::atomic::{AtomicU64, Ordering},
};
// crates.io
use tokio::sync::{Mutex, watch};
// self
use crate::{
	_prelude::*,
	cache::entry::CacheEntry,
	error::LoadError,
	retry::{RetryExecutor, RetryPolicy},
};

/// Upstream source a [`TtlCache`] resolves missing or expired keys from.
pub trait Loader<K, V> {
	/// Load the value for `key` from the upstream source.
	fn load(&self, key: &K) -> impl Future<Output = Result<V>> + Send;
}

/// Generic key/value cache with per-entry expiry, forced refresh, and
/// single-flight de-duplication of concurrent misses.
///
/// At most one upstream load runs per key; concurrent callers for the same
/// missing or expired key join the in-flight load and share its outcome,
/// success or failure. Independent keys load concurrently — the entry map
/// lock is never held across an await point.
#[derive(Debug)]
pub struct TtlCache<K, V, L> {
	loader: L,
	default_ttl: Duration,
	retry_policy: RetryPolicy,
	entries: Mutex<HashMap<K, Slot<V>>>,
	flight_seq: AtomicU64,
}
impl<K, V, L> TtlCache<K, V, L>
where
	K: Clone + Eq + Hash,
	V: Clone,
	L: Loader<K, V>,
{
	/// Build a cache around the supplied loader.
	pub fn new(loader: L, default_ttl: Duration, retry_policy: RetryPolicy) -> Result<Self> {
		retry_policy.validate()?;

		Ok(Self {
			loader,
			default_ttl,
			retry_policy,
			entries: Mutex::new(HashMap::new()),
			flight_seq: AtomicU64::new(0),
		})
	}

	/// Resolve the value for `key`, loading from upstream when necessary.
	///
	/// An unexpired entry is returned without I/O unless `force_refresh` is
	/// set. A load already in flight for the key is joined regardless of
	/// `force_refresh`. Fails with [`Error::Load`] once the loader exhausts
	/// its retry budget; the previously stored value, if any, survives a
	/// failed load untouched.
	pub async fn get(&self, key: K, force_refresh: bool) -> Result<V> {
		loop {
			let action = {
				let mut entries = self.entries.lock().await;
				let slot = entries.entry(key.clone()).or_insert_with(Slot::new);

				if let Some(flight) = &slot.flight {
					Action::Join(flight.clone())
				} else if !force_refresh
					&& let Some(entry) = &slot.value
					&& !entry.is_expired(Instant::now())
				{
					Action::Hit(entry.value().clone())
				} else {
					let (tx, rx) = watch::channel(None);
					let id = self.flight_seq.fetch_add(1, Ordering::Relaxed);

					slot.flight = Some(Flight { id, rx });

					Action::Lead { tx, id }
				}
			};

			match action {
				Action::Hit(value) => return Ok(value),
				Action::Join(mut flight) => {
					tracing::debug!(flight = flight.id, "joining in-flight load");

					// Clone the outcome out of the watch guard so the non-`Send`
					// guard is not held across an await point.
					let outcome =
						flight.rx.wait_for(Option::is_some).await.map(|guard| guard.clone());

					match outcome {
						Ok(outcome) =>
							if let Some(result) = outcome {
								return result.map_err(Error::from);
							},
						Err(_) => {
							// The leader was cancelled before publishing; clear
							// the dead marker so a new leader can be elected.
							let mut entries = self.entries.lock().await;

							if let Some(slot) = entries.get_mut(&key)
								&& slot.flight.as_ref().is_some_and(|f| f.id == flight.id)
							{
								slot.flight = None;
							}
						},
					}
				},
				Action::Lead { tx, id } => {
					let outcome = self.load_with_retry(&key).await;

					{
						let mut entries = self.entries.lock().await;
						let slot = entries.entry(key.clone()).or_insert_with(Slot::new);

						if let Ok(value) = &outcome {
							slot.value = Some(CacheEntry::new(
								value.clone(),
								Instant::now() + self.default_ttl,
							));
						}
						if slot.flight.as_ref().is_some_and(|f| f.id == id) {
							slot.flight = None;
						}
					}

					let _ = tx.send(Some(outcome.clone()));

					return outcome.map_err(Error::from);
				},
			}
		}
	}

	async fn load_with_retry(&self, key: &K) -> std::result::Result<V, LoadError> {
		let mut executor = RetryExecutor::new(&self.retry_policy);

		loop {
			match self.loader.load(key).await {
				Ok(value) => return Ok(value),
				Err(err) => {
					tracing::debug!(
						error = %err,
						attempt = executor.attempts_used() + 1,
						"cache load attempt failed"
					);

					if !executor.sleep_backoff().await {
						return Err(LoadError {
							attempts: executor.attempts_used(),
							last_error: err.to_string(),
						});
					}
				},
			}
		}
	}
}

#[derive(Debug)]
struct Slot<V> {
	value: Option<CacheEntry<V>>,
	flight: Option<Flight<V>>,
}
impl<V> Slot<V> {
	fn new() -> Self {
		Self { value: None, flight: None }
	}
}

type FlightOutcome<V> = Option<std::result::Result<V, LoadError>>;

#[derive(Clone, Debug)]
struct Flight<V> {
	id: u64,
	rx: watch::Receiver<FlightOutcome<V>>,
}

enum Action<V> {
	Hit(V),
	Join(Flight<V>),
	Lead { tx: watch::Sender<FlightOutcome<V>>, id: u64 },
}
