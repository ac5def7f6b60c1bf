//! `ReceiptFlushScheduler` (`spec.md` §4.4): batches read receipts for a
//! room and flushes them to every destination queue at most once per
//! `RR_TXN_INTERVAL_PER_ROOM_MS × |domains|` milliseconds, so a chatty room
//! doesn't trigger a transaction per receipt.
//!
//! Per-room state machine: `IDLE → (receipt arrives) → ARMED{queues=∅} →
//! (receipts accrue) → (timer fires) → FLUSH → IDLE iff queues is empty,
//! else ARMED{queues=∅}` again. `rooms` holds `Some(set)` for ARMED rooms
//! and has no entry at all for IDLE ones.

use std::{collections::HashMap, sync::Arc, time::Duration};

use fedsend_core::{debug, Config};
use ruma::OwnedRoomId;
use tokio::sync::Mutex;

use crate::{
	collaborators::StateResolver,
	registry::QueueRegistry,
	types::{Destination, ReadReceipt},
};

pub struct ReceiptFlushScheduler {
	config: Arc<Config>,
	registry: Arc<QueueRegistry>,
	resolver: Arc<dyn StateResolver>,
	/// Presence of a room key means a flush timer is armed; the set
	/// collects destinations whose queues received a receipt since the
	/// timer last armed or fired (`spec.md` §3 `rr_pending_by_room`).
	rooms: Mutex<HashMap<OwnedRoomId, std::collections::HashSet<Destination>>>,
}

impl ReceiptFlushScheduler {
	#[must_use]
	pub fn new(config: Arc<Config>, registry: Arc<QueueRegistry>, resolver: Arc<dyn StateResolver>) -> Arc<Self> {
		Arc::new(Self { config, registry, resolver, rooms: Mutex::new(HashMap::new()) })
	}

	/// `spec.md` §4.4 `sendReadReceipt`.
	pub async fn send_read_receipt(self: &Arc<Self>, receipt: ReadReceipt) -> fedsend_core::Result {
		let room_id = receipt.room_id.clone();
		let domains: Vec<Destination> = self
			.resolver
			.current_hosts_in_room(&room_id)
			.await?
			.into_iter()
			.filter(|d| d.as_str() != self.config.server_name.as_str())
			.collect();

		if domains.is_empty() {
			return Ok(());
		}

		let mut rooms = self.rooms.lock().await;
		let was_armed = rooms.contains_key(&room_id);

		for destination in &domains {
			let queue = self.registry.get(destination);
			queue.enqueue_receipt(receipt.clone());

			if was_armed {
				rooms.get_mut(&room_id).expect("checked above").insert(destination.clone());
			} else {
				queue.flush_receipts_for_room(&room_id);
			}
		}

		if was_armed {
			return Ok(());
		}

		rooms.insert(room_id.clone(), std::collections::HashSet::new());
		drop(rooms);

		let interval_ms = self.config.rr_txn_interval_per_room_ms() * domains.len() as f64;
		self.arm(room_id, interval_ms);
		Ok(())
	}

	fn arm(self: &Arc<Self>, room_id: OwnedRoomId, interval_ms: f64) {
		let scheduler = Arc::clone(self);
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(interval_ms.round() as u64)).await;
			scheduler.flush_room(&room_id).await;
		});
	}

	/// `spec.md` §4.4 `flushRoom`.
	pub async fn flush_room(self: &Arc<Self>, room_id: &ruma::RoomId) {
		let queues = {
			let mut rooms = self.rooms.lock().await;
			rooms.remove(room_id).expect("flushRoom invoked only for an armed room")
		};

		if queues.is_empty() {
			debug!(%room_id, "receipt flush cycle idle");
			return;
		}

		let interval_ms = self.config.rr_txn_interval_per_room_ms() * queues.len() as f64;
		self.rooms.lock().await.insert(room_id.to_owned(), std::collections::HashSet::new());
		self.arm(room_id.to_owned(), interval_ms);

		for destination in queues {
			self.registry.get(&destination).flush_receipts_for_room(room_id);
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashSet;

	use async_trait::async_trait;
	use ruma::{event_id, room_id, server_name, user_id, OwnedEventId};

	use super::*;
	use crate::{collaborators::TransmissionSink, queue::{DestinationQueue, Transaction}};

	struct TwoHosts;

	#[async_trait]
	impl StateResolver for TwoHosts {
		async fn hosts_in_room_at_events(
			&self, _room_id: &ruma::RoomId, _event_ids: &[OwnedEventId],
		) -> fedsend_core::Result<HashSet<Destination>> {
			Ok(HashSet::new())
		}

		async fn current_hosts_in_room(&self, _room_id: &ruma::RoomId) -> fedsend_core::Result<HashSet<Destination>> {
			Ok(HashSet::from([server_name!("a.example.org").to_owned(), server_name!("b.example.org").to_owned()]))
		}
	}

	struct NullSink;

	#[async_trait]
	impl TransmissionSink for NullSink {
		async fn send_transaction(&self, _dest: &Destination, _txn: Transaction) -> fedsend_core::Result { Ok(()) }
	}

	fn test_config() -> Arc<Config> {
		Arc::new(Config {
			server_name: "example.org".try_into().unwrap(),
			rr_transactions_per_room_per_second: 50.0,
			enable_presence: true,
			event_page_limit: 100,
			presence_select_limit: 100,
		})
	}

	fn receipt() -> ReadReceipt {
		ReadReceipt {
			room_id: room_id!("!room:example.org").to_owned(),
			receipt_type: "m.read".to_owned(),
			user_id: user_id!("@alice:example.org").to_owned(),
			event_ids: vec![event_id!("$a:example.org").to_owned()],
			data: serde_json::json!({}),
		}
	}

	#[tokio::test]
	async fn first_receipt_immediately_flushes_each_host() {
		let registry = Arc::new(QueueRegistry::new(Arc::new(NullSink)));
		let scheduler = ReceiptFlushScheduler::new(test_config(), Arc::clone(&registry), Arc::new(TwoHosts));

		scheduler.send_read_receipt(receipt()).await.expect("send_read_receipt");

		let a = registry.get(&server_name!("a.example.org").to_owned());
		assert_eq!(a.pending_edu_count(), 0);

		let rooms = scheduler.rooms.lock().await;
		assert!(rooms.contains_key(room_id!("!room:example.org")));
	}

	#[tokio::test]
	async fn subsequent_receipt_within_window_only_buffers() {
		let registry = Arc::new(QueueRegistry::new(Arc::new(NullSink)));
		let scheduler = ReceiptFlushScheduler::new(test_config(), Arc::clone(&registry), Arc::new(TwoHosts));

		scheduler.send_read_receipt(receipt()).await.expect("send_read_receipt");
		scheduler.send_read_receipt(receipt()).await.expect("send_read_receipt");

		let rooms = scheduler.rooms.lock().await;
		let queues = rooms.get(room_id!("!room:example.org")).expect("armed");
		assert_eq!(queues.len(), 2);
	}

	#[tokio::test]
	async fn flush_with_empty_queue_set_does_not_rearm() {
		let registry = Arc::new(QueueRegistry::new(Arc::new(NullSink)));
		let scheduler = ReceiptFlushScheduler::new(test_config(), Arc::clone(&registry), Arc::new(TwoHosts));

		scheduler.rooms.lock().await.insert(room_id!("!room:example.org").to_owned(), HashSet::new());
		scheduler.flush_room(room_id!("!room:example.org")).await;

		let rooms = scheduler.rooms.lock().await;
		assert!(!rooms.contains_key(room_id!("!room:example.org")));
	}
}
