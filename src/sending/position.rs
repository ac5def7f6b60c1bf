//! `PositionTracker` (`spec.md` §4.7): linearizes persisting and
//! acknowledging the highest fully-consumed federation-stream token.
//!
//! The spec's pseudocode assigns `federation_position := token`
//! unconditionally; taken literally that lets an out-of-order call regress
//! `federation_position` below an already-acknowledged `last_ack`,
//! violating `spec.md` P6 (`last_ack ≤ federation_position` always). This
//! implementation instead folds `token` in with `fetch_max`, which matches
//! scenario 6 in `spec.md` §8 (`updateToken(100)` then `updateToken(95)`
//! leaves the persisted position at 100) while preserving the invariant for
//! every call order, not just non-decreasing ones.

use std::sync::{
	atomic::{AtomicI64, Ordering},
	Arc,
};

use fedsend_core::warn;
use tokio::sync::Mutex;

use crate::collaborators::{EventStore, ReplicationAck};

pub struct PositionTracker {
	store: Arc<dyn EventStore>,
	ack: Arc<dyn ReplicationAck>,
	federation_position: AtomicI64,
	last_ack: AtomicI64,
	/// `fed_position_lock` (`spec.md` §5): serializes the persist-then-ack
	/// region so concurrent `updateToken` calls don't race past each other.
	lock: Mutex<()>,
}

impl PositionTracker {
	#[must_use]
	pub fn new(store: Arc<dyn EventStore>, ack: Arc<dyn ReplicationAck>) -> Arc<Self> {
		Arc::new(Self { store, ack, federation_position: AtomicI64::new(0), last_ack: AtomicI64::new(0), lock: Mutex::new(()) })
	}

	/// Seeds `federation_position` from durable storage at startup
	/// (`spec.md` §3 "Lifecycle").
	pub async fn load(store: Arc<dyn EventStore>, ack: Arc<dyn ReplicationAck>) -> fedsend_core::Result<Arc<Self>> {
		let initial = store.federation_out_pos("federation").await?;
		let tracker = Self::new(store, ack);
		tracker.federation_position.store(initial, Ordering::Release);
		tracker.last_ack.store(initial, Ordering::Release);
		Ok(tracker)
	}

	/// `spec.md` §4.7 `updateToken`. Persistence failures are logged and
	/// swallowed; the position is retried on the next call (`spec.md` §7).
	pub async fn update_token(&self, token: i64) {
		self.federation_position.fetch_max(token, Ordering::AcqRel);

		let _guard = self.lock.lock().await;
		let federation_position = self.federation_position.load(Ordering::Acquire);
		let last_ack = self.last_ack.load(Ordering::Acquire);

		if last_ack >= federation_position {
			return;
		}

		match self.store.update_federation_out_pos("federation", federation_position).await {
			| Ok(()) => {
				self.ack.send_federation_ack(federation_position);
				self.last_ack.store(federation_position, Ordering::Release);
			},
			| Err(e) => warn!("failed to persist federation position {federation_position}: {e}"),
		}
	}

	#[must_use]
	pub fn current_token(&self) -> i64 { self.federation_position.load(Ordering::Acquire) }
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

	use async_trait::async_trait;

	use super::*;
	use crate::types::PduHandle;

	#[derive(Default)]
	struct RecordingStore {
		persisted: AtomicI64,
		calls: AtomicUsize,
	}

	#[async_trait]
	impl EventStore for RecordingStore {
		async fn federation_out_pos(&self, _kind: &str) -> fedsend_core::Result<i64> {
			Ok(self.persisted.load(AtomicOrdering::SeqCst))
		}

		async fn update_federation_out_pos(&self, _kind: &str, token: i64) -> fedsend_core::Result<()> {
			self.persisted.store(token, AtomicOrdering::SeqCst);
			self.calls.fetch_add(1, AtomicOrdering::SeqCst);
			Ok(())
		}

		async fn all_new_events_stream(
			&self, _from: i64, _current: i64, _limit: u64,
		) -> fedsend_core::Result<(i64, Vec<PduHandle>)> {
			Ok((0, Vec::new()))
		}
	}

	#[derive(Default)]
	struct RecordingAck {
		last: AtomicI64,
	}

	impl ReplicationAck for RecordingAck {
		fn send_federation_ack(&self, token: i64) { self.last.store(token, AtomicOrdering::SeqCst); }
	}

	#[tokio::test]
	async fn out_of_order_token_does_not_regress_or_reack() {
		let store = Arc::new(RecordingStore::default());
		let ack = Arc::new(RecordingAck::default());
		let tracker = PositionTracker::new(store.clone(), ack.clone());

		tracker.update_token(100).await;
		assert_eq!(store.persisted.load(AtomicOrdering::SeqCst), 100);
		assert_eq!(ack.last.load(AtomicOrdering::SeqCst), 100);
		assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 1);

		tracker.update_token(95).await;
		assert_eq!(store.persisted.load(AtomicOrdering::SeqCst), 100, "no regression");
		assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 1, "no redundant persist");
		assert_eq!(tracker.current_token(), 100);
	}

	#[tokio::test]
	async fn monotonic_increases_persist_each_time() {
		let store = Arc::new(RecordingStore::default());
		let ack = Arc::new(RecordingAck::default());
		let tracker = PositionTracker::new(store.clone(), ack.clone());

		tracker.update_token(10).await;
		tracker.update_token(20).await;
		assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 2);
		assert_eq!(tracker.current_token(), 20);
	}
}
