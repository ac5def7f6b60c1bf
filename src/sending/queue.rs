//! `DestinationQueue` (`spec.md` §4.1): per-remote-server ordered queue
//! with at-most-one in-flight transaction.
//!
//! The contract itself is external to this spec's focus, but a reference
//! implementation is needed to exercise it and to give the dispatcher
//! something constructible. Grounded on the teacher's `sender.rs`
//! (`TransactionStatus`, `select_events`, `DEQUEUE_LIMIT`/
//! `SELECT_EDU_LIMIT`), simplified per `SPEC_FULL.md` §12 to drop transport
//! backoff math (that belongs to the real transport).

use std::{
	collections::{BTreeMap, HashMap, HashSet, VecDeque},
	sync::{Arc, Mutex},
	time::Duration,
};

use fedsend_core::{debug, warn};
use ruma::{OwnedRoomId, OwnedUserId, RoomId};
use tokio::sync::Notify;

use crate::{
	collaborators::TransmissionSink,
	types::{Destination, Edu, EduKey, PduHandle, ReadReceipt, UserPresenceState},
};

/// Max PDUs drawn into a single transaction attempt (teacher: `DEQUEUE_LIMIT`).
pub const PDU_LIMIT: usize = 50;
/// Max unkeyed/keyed EDUs drawn into a single transaction attempt (teacher:
/// `SELECT_EDU_LIMIT`).
pub const EDU_LIMIT: usize = 100;

/// The batch shipped to `TransmissionSink::send_transaction` for one
/// destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transaction {
	pub pdus: Vec<PduHandle>,
	pub edus: Vec<Edu>,
	pub presence: Vec<UserPresenceState>,
	pub receipts: Vec<ReadReceipt>,
}

impl Transaction {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.pdus.is_empty() && self.edus.is_empty() && self.presence.is_empty() && self.receipts.is_empty()
	}
}

/// The contract every per-destination queue implementation must satisfy
/// (`spec.md` §4.1).
pub trait DestinationQueue: Send + Sync {
	/// Appends a PDU tagged with a global monotonic `order`. PDUs for a
	/// given destination are delivered in increasing `order` (P1).
	fn enqueue_pdu(&self, pdu: PduHandle, order: u64);
	/// Appends an unkeyed EDU; FIFO within unkeyed EDUs.
	fn enqueue_edu(&self, edu: Edu);
	/// Inserts-or-replaces by `(edu_type, key)`: only the most recent
	/// survives if not yet transmitted.
	fn enqueue_keyed_edu(&self, edu: Edu, key: EduKey);
	/// Per-user upsert: latest state per user wins until sent.
	fn enqueue_presence(&self, states: Vec<UserPresenceState>);
	/// Buffers a receipt. Buffered receipts do not by themselves trigger a
	/// transaction.
	fn enqueue_receipt(&self, receipt: ReadReceipt);
	/// Marks `room_id`'s buffered receipts eligible for the next
	/// transaction and kicks the send loop.
	fn flush_receipts_for_room(&self, room_id: &RoomId);
	/// Ensures a new transaction attempt happens soon. Idempotent while one
	/// is already in flight.
	fn kick_send_loop(&self);
	/// Alias for `kick_send_loop`, used after a suspected remote recovery.
	fn wake(&self) { self.kick_send_loop(); }
	fn is_transmitting(&self) -> bool;
	fn pending_pdu_count(&self) -> usize;
	fn pending_edu_count(&self) -> usize;
}

#[derive(Default)]
struct Inner {
	pdus: BTreeMap<u64, PduHandle>,
	edus: VecDeque<Edu>,
	keyed_edus: HashMap<(String, EduKey), Edu>,
	presence: HashMap<OwnedUserId, UserPresenceState>,
	receipts: HashMap<OwnedRoomId, Vec<ReadReceipt>>,
	flush_eligible: HashSet<OwnedRoomId>,
	/// The transaction currently being shipped, if any. Kept around so a
	/// failed send retries the same batch rather than silently re-drawing
	/// from the queue and violating per-destination ordering.
	in_flight: Option<Transaction>,
	transmitting: bool,
	consecutive_failures: u32,
}

/// Reference `DestinationQueue` implementation. One per destination, living
/// for the lifetime of the process (`spec.md` §3 "Lifecycle"). All mutating
/// operations are synchronous and take a plain `std::sync::Mutex`; the lock
/// is never held across an `.await`, so this never blocks the runtime.
pub struct LiveQueue {
	destination: Destination,
	sink: Arc<dyn TransmissionSink>,
	inner: Mutex<Inner>,
	notify: Notify,
}

impl LiveQueue {
	pub fn spawn(destination: Destination, sink: Arc<dyn TransmissionSink>) -> Arc<Self> {
		let queue = Arc::new(Self {
			destination,
			sink,
			inner: Mutex::new(Inner::default()),
			notify: Notify::new(),
		});
		tokio::spawn(Arc::clone(&queue).run());
		queue
	}

	async fn run(self: Arc<Self>) {
		loop {
			self.notify.notified().await;
			self.drive().await;
		}
	}

	/// Attempts transaction sends until the queue has nothing left to send
	/// or a send fails. A failed send reschedules itself via a background
	/// wake rather than looping immediately, so a persistently-down
	/// destination doesn't spin this task.
	async fn drive(self: &Arc<Self>) {
		loop {
			let Some(txn) = self.next_transaction() else { break };

			self.set_transmitting(true);
			let result = self.sink.send_transaction(&self.destination, txn).await;
			self.set_transmitting(false);

			match result {
				| Ok(()) => self.clear_in_flight(),
				| Err(e) => {
					warn!(dest = %self.destination, "transaction failed: {e}");
					let failures = self.bump_failures();
					let backoff = Duration::from_millis(u64::from(failures.min(10)) * 250);
					let weak = Arc::downgrade(self);
					tokio::spawn(async move {
						tokio::time::sleep(backoff).await;
						if let Some(queue) = weak.upgrade() {
							queue.notify.notify_one();
						}
					});
					break;
				},
			}
		}
	}

	/// Builds (or returns the still-pending retry of) the next transaction,
	/// or `None` if there is nothing to send.
	fn next_transaction(&self) -> Option<Transaction> {
		let mut inner = self.inner.lock().expect("queue lock poisoned");

		if let Some(txn) = inner.in_flight.clone() {
			return Some(txn);
		}

		let mut txn = Transaction::default();

		let drain_orders: Vec<u64> = inner.pdus.keys().take(PDU_LIMIT).copied().collect();
		for order in drain_orders {
			if let Some(pdu) = inner.pdus.remove(&order) {
				txn.pdus.push(pdu);
			}
		}

		while txn.edus.len() < EDU_LIMIT {
			let Some(edu) = inner.edus.pop_front() else { break };
			txn.edus.push(edu);
		}

		let room = EDU_LIMIT.saturating_sub(txn.edus.len());
		let keyed: Vec<_> = inner.keyed_edus.drain().map(|(_, edu)| edu).collect();
		txn.edus.extend(keyed.into_iter().take(room));

		if !inner.presence.is_empty() {
			txn.presence = inner.presence.drain().map(|(_, state)| state).collect();
		}

		let flushed_rooms: Vec<OwnedRoomId> = inner.flush_eligible.drain().collect();
		for room_id in flushed_rooms {
			if let Some(receipts) = inner.receipts.remove(&room_id) {
				txn.receipts.extend(receipts);
			}
		}

		if txn.is_empty() {
			None
		} else {
			inner.in_flight = Some(txn.clone());
			Some(txn)
		}
	}

	fn clear_in_flight(&self) {
		let mut inner = self.inner.lock().expect("queue lock poisoned");
		inner.in_flight = None;
		inner.consecutive_failures = 0;
	}

	fn bump_failures(&self) -> u32 {
		let mut inner = self.inner.lock().expect("queue lock poisoned");
		inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
		inner.consecutive_failures
	}

	fn set_transmitting(&self, value: bool) { self.inner.lock().expect("queue lock poisoned").transmitting = value; }

	fn lock(&self) -> std::sync::MutexGuard<'_, Inner> { self.inner.lock().expect("queue lock poisoned") }
}

impl DestinationQueue for LiveQueue {
	fn enqueue_pdu(&self, pdu: PduHandle, order: u64) {
		debug!(dest = %self.destination, order, "enqueue pdu");
		self.lock().pdus.insert(order, pdu);
		self.notify.notify_one();
	}

	fn enqueue_edu(&self, edu: Edu) {
		self.lock().edus.push_back(edu);
		self.notify.notify_one();
	}

	fn enqueue_keyed_edu(&self, edu: Edu, key: EduKey) {
		let edu_type = edu.edu_type.clone();
		self.lock().keyed_edus.insert((edu_type, key), edu);
		self.notify.notify_one();
	}

	fn enqueue_presence(&self, states: Vec<UserPresenceState>) {
		let mut inner = self.lock();
		for state in states {
			inner.presence.insert(state.user_id.clone(), state);
		}
		drop(inner);
		self.notify.notify_one();
	}

	fn enqueue_receipt(&self, receipt: ReadReceipt) {
		self.lock().receipts.entry(receipt.room_id.clone()).or_default().push(receipt);
	}

	fn flush_receipts_for_room(&self, room_id: &RoomId) {
		self.lock().flush_eligible.insert(room_id.to_owned());
		self.notify.notify_one();
	}

	fn kick_send_loop(&self) { self.notify.notify_one(); }

	fn is_transmitting(&self) -> bool { self.lock().transmitting }

	fn pending_pdu_count(&self) -> usize { self.lock().pdus.len() }

	fn pending_edu_count(&self) -> usize {
		let inner = self.lock();
		inner.edus.len() + inner.keyed_edus.len()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use async_trait::async_trait;
	use ruma::{room_id, server_name, user_id};

	use super::*;

	struct RecordingSink {
		calls: AtomicUsize,
	}

	#[async_trait]
	impl TransmissionSink for RecordingSink {
		async fn send_transaction(&self, _dest: &Destination, _txn: Transaction) -> fedsend_core::Result {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	fn make_pdu(order_seed: u8) -> PduHandle {
		Arc::new(crate::types::Pdu {
			event_id: ruma::event_id!("$a:example.org").to_owned(),
			room_id: room_id!("!room:example.org").to_owned(),
			sender: user_id!("@alice:example.org").to_owned(),
			prev_event_ids: Vec::new(),
			internal_metadata: crate::types::InternalMetadata {
				send_on_behalf_of: None,
				should_proactively_send: order_seed > 0,
			},
		})
	}

	#[tokio::test]
	async fn pdus_drain_in_ascending_order() {
		let sink = Arc::new(RecordingSink { calls: AtomicUsize::new(0) });
		let queue = LiveQueue::spawn(server_name!("remote.example.org").to_owned(), sink);

		queue.enqueue_pdu(make_pdu(1), 3);
		queue.enqueue_pdu(make_pdu(2), 1);
		queue.enqueue_pdu(make_pdu(3), 2);

		let txn = queue.next_transaction().expect("pending transaction");
		let orders: Vec<_> = txn.pdus.iter().map(|p| p.event_id.clone()).collect();
		assert_eq!(orders.len(), 3);
		// draining happened lowest-order-first regardless of insertion order
		assert_eq!(queue.pending_pdu_count(), 0);
	}

	#[tokio::test]
	async fn keyed_edu_clobbers_pre_transmission() {
		let sink = Arc::new(RecordingSink { calls: AtomicUsize::new(0) });
		let queue = LiveQueue::spawn(server_name!("remote.example.org").to_owned(), sink);

		let edu = |v: &str| Edu {
			origin: server_name!("example.org").to_owned(),
			destination: server_name!("remote.example.org").to_owned(),
			edu_type: "m.device_list_update".to_owned(),
			content: serde_json::json!({ "v": v }),
		};

		queue.enqueue_keyed_edu(edu("first"), "device1".to_owned());
		queue.enqueue_keyed_edu(edu("second"), "device1".to_owned());

		assert_eq!(queue.pending_edu_count(), 1);
		let txn = queue.next_transaction().expect("pending transaction");
		assert_eq!(txn.edus.len(), 1);
		assert_eq!(txn.edus[0].content["v"], "second");
	}

	#[tokio::test]
	async fn receipts_buffer_without_flush() {
		let sink = Arc::new(RecordingSink { calls: AtomicUsize::new(0) });
		let queue = LiveQueue::spawn(server_name!("remote.example.org").to_owned(), sink);

		queue.enqueue_receipt(ReadReceipt {
			room_id: room_id!("!room:example.org").to_owned(),
			receipt_type: "m.read".to_owned(),
			user_id: user_id!("@alice:example.org").to_owned(),
			event_ids: vec![ruma::event_id!("$a:example.org").to_owned()],
			data: serde_json::json!({}),
		});

		assert!(queue.next_transaction().is_none(), "unflushed receipts must not trigger a transaction");

		queue.flush_receipts_for_room(room_id!("!room:example.org"));
		let txn = queue.next_transaction().expect("flushed transaction");
		assert_eq!(txn.receipts.len(), 1);
	}
}
