//! The external collaborators this dispatcher is built against (`spec.md`
//! §1 "Out of scope (external collaborators)"). Production code supplies
//! real implementations backed by the durable event store, the room-state
//! resolver, the transport, and the replication client; tests supply small
//! in-memory fakes (`spec.md` §11.4).

use std::collections::HashSet;

use async_trait::async_trait;
use ruma::{OwnedEventId, RoomId};
use fedsend_core::Result;

use crate::{
	queue::Transaction,
	types::{Destination, PduHandle, UserPresenceState},
};

/// The durable event log and its two persisted stream positions
/// (`spec.md` §4.3, §4.7; persisted table `federation_out_pos`).
#[async_trait]
pub trait EventStore: Send + Sync {
	/// Reads the last position this dispatcher fully consumed for `kind`
	/// (`"events"` or `"federation"`).
	async fn federation_out_pos(&self, kind: &str) -> Result<i64>;

	/// Persists `token` as the new position for `kind`. Idempotent and
	/// must tolerate being called with a token it already holds.
	async fn update_federation_out_pos(&self, kind: &str, token: i64) -> Result<()>;

	/// Returns `(next_token, events)` strictly after `from`, up to
	/// `current` and bounded by `limit` (`spec.md` §4.3 step 2).
	async fn all_new_events_stream(&self, from: i64, current: i64, limit: u64) -> Result<(i64, Vec<PduHandle>)>;
}

/// Room-state resolution (`spec.md` §4.3, §4.4). Deliberately narrow: the
/// dispatcher never needs the full state, only the set of server names
/// with a joined member.
#[async_trait]
pub trait StateResolver: Send + Sync {
	/// Hosts with a member in `room_id` as of the state *before* `event_ids`
	/// (`spec.md` §4.3: "pre-state host resolution"). Used for PDU fan-out.
	async fn hosts_in_room_at_events(
		&self, room_id: &RoomId, event_ids: &[OwnedEventId],
	) -> Result<HashSet<Destination>>;

	/// Hosts with a member in `room_id` right now. Used for read-receipt
	/// fan-out (`spec.md` §4.4 step 1).
	async fn current_hosts_in_room(&self, room_id: &RoomId) -> Result<HashSet<Destination>>;
}

/// Resolves which remote hosts care about a batch of presence updates, and
/// how to split the batch across them (`spec.md` §4.5 step 4).
#[async_trait]
pub trait PresenceInterest: Send + Sync {
	async fn hosts_and_states_for(
		&self, states: Vec<UserPresenceState>,
	) -> Result<Vec<(HashSet<Destination>, Vec<UserPresenceState>)>>;
}

/// The transport a `DestinationQueue` ships a transaction over. Retries
/// and backoff for transport failures live on the queue side of this
/// trait, never in the dispatcher (`spec.md` §1 Non-goals, §7).
#[async_trait]
pub trait TransmissionSink: Send + Sync {
	async fn send_transaction(&self, destination: &Destination, txn: Transaction) -> Result;
}

/// Upstream replication handle used to ack consumed federation-stream
/// tokens (`spec.md` §4.7 step 3).
pub trait ReplicationAck: Send + Sync {
	fn send_federation_ack(&self, token: i64);
}
