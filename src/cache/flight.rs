//! Per-key single-flight coordination for origin fetches.
//!
//! The first caller for a key becomes the leader and spawns the fetch onto the runtime; later
//! callers subscribe to its outcome. Because the fetch is detached from every caller, dropping
//! any caller (leader included) never cancels it. The registry entry is removed as soon as the
//! outcome is published, including when the fetch panics.

// std
use std::{
	collections::HashMap,
	future::Future,
	sync::{Mutex, PoisonError},
};
// crates.io
use tokio::sync::watch;
// self
use crate::{_prelude::*, cache::key::CacheKey};

type Outcome<T> = Option<std::result::Result<T, Arc<Error>>>;

/// How a caller obtained its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightRole {
	/// Started the fetch.
	Leader,
	/// Attached to a fetch another caller started.
	Follower,
	/// Registry was full; fetched without coordination.
	Bypass,
}

/// Registry of in-flight fetches keyed by cache key.
#[derive(Debug)]
pub struct SingleFlight<T> {
	inflight: Mutex<HashMap<CacheKey, watch::Receiver<Outcome<T>>>>,
	capacity: usize,
}
impl<T> SingleFlight<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Create a registry tracking at most `capacity` keys at once.
	pub fn new(capacity: usize) -> Arc<Self> {
		Arc::new(Self { inflight: Mutex::new(HashMap::new()), capacity })
	}

	/// Number of keys currently being fetched.
	pub fn len(&self) -> usize {
		self.lock().len()
	}

	/// Whether no fetch is in progress.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Run `fetch` for `key` unless a fetch for the same key is already running, in which case
	/// wait for that one instead.
	///
	/// Errors delivered to more than one caller arrive wrapped in [`Error::Shared`].
	pub async fn run<F, Fut>(self: &Arc<Self>, key: &CacheKey, fetch: F) -> Result<(T, FlightRole)>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		// The guard must be out of scope before any await so the future stays `Send`.
		let (receiver, sender) = {
			let mut inflight = self.lock();

			if let Some(receiver) = inflight.get(key) {
				(Some(receiver.clone()), None)
			} else if inflight.len() >= self.capacity {
				(None, None)
			} else {
				let (sender, receiver) = watch::channel(None);

				inflight.insert(key.clone(), receiver.clone());

				(Some(receiver), Some(sender))
			}
		};
		let (mut receiver, role) = match (receiver, sender) {
			(Some(receiver), Some(sender)) => {
				self.spawn_leader(key.clone(), sender, fetch());

				(receiver, FlightRole::Leader)
			},
			(Some(receiver), None) => (receiver, FlightRole::Follower),
			_ => {
				tracing::warn!(%key, capacity = self.capacity, "single-flight registry full");

				return fetch().await.map(|value| (value, FlightRole::Bypass));
			},
		};

		if role == FlightRole::Follower {
			tracing::debug!(%key, "joined in-flight fetch");
		}

		let outcome = receiver
			.wait_for(Option::is_some)
			.await
			.map_err(|_| Error::OriginTransport("in-flight fetch was aborted".into()))?;

		match &*outcome {
			Some(Ok(value)) => Ok((value.clone(), role)),
			Some(Err(err)) => Err(Error::Shared(err.clone())),
			None => Err(Error::OriginTransport("in-flight fetch was aborted".into())),
		}
	}

	fn spawn_leader<Fut>(self: &Arc<Self>, key: CacheKey, sender: watch::Sender<Outcome<T>>, fut: Fut)
	where
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		let registry = Arc::clone(self);

		tokio::spawn(async move {
			let outcome = match tokio::spawn(fut).await {
				Ok(outcome) => outcome.map_err(Arc::new),
				Err(err) => {
					tracing::error!(%key, error = %err, "in-flight fetch failed to complete");

					Err(Arc::new(Error::OriginTransport("in-flight fetch failed to complete".into())))
				},
			};

			sender.send_replace(Some(outcome));
			registry.lock().remove(&key);
		});
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, watch::Receiver<Outcome<T>>>> {
		self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
