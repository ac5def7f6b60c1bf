//! Data model (`spec.md` §3): the event/EDU/presence/receipt shapes the
//! dispatcher moves around, plus the `Destination` alias.

use std::sync::Arc;

use ruma::{OwnedEventId, OwnedRoomId, OwnedServerName, OwnedUserId, ServerName, UserId};
use serde_json::Value as JsonValue;

/// A remote server we federate with. Distinct from the local `server_name`
/// (`spec.md` GLOSSARY).
pub type Destination = OwnedServerName;

/// `true` iff `user_id`'s host component is this server.
#[must_use]
pub fn is_mine(server_name: &ServerName, user_id: &UserId) -> bool { user_id.server_name() == server_name }

/// Metadata carried alongside a PDU that the dispatcher consults but never
/// writes (`spec.md` §3, `internal_metadata`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InternalMetadata {
	/// If set, this event is being relayed on behalf of the named origin
	/// server, which already has it and must not receive it again (P3).
	pub send_on_behalf_of: Option<OwnedServerName>,
	/// Gate on whether this event should be proactively pushed to remotes
	/// at all (P4). Some events — e.g. ones a client asked to be kept
	/// local — are persisted but never federated.
	pub should_proactively_send: bool,
}

/// A persistent durable event (`spec.md` §3, GLOSSARY "PDU").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pdu {
	pub event_id: OwnedEventId,
	pub room_id: OwnedRoomId,
	pub sender: OwnedUserId,
	/// Parent events used to look up pre-event room state (`spec.md` §4.3:
	/// "Why this shape").
	pub prev_event_ids: Vec<OwnedEventId>,
	pub internal_metadata: InternalMetadata,
}

impl Pdu {
	#[must_use]
	pub fn send_on_behalf_of(&self) -> Option<&ServerName> { self.internal_metadata.send_on_behalf_of.as_deref() }

	#[must_use]
	pub fn should_proactively_send(&self) -> bool { self.internal_metadata.should_proactively_send }
}

/// Clobbering key for a keyed EDU: only the most recent EDU for a given
/// `(edu_type, key)` pair survives pre-transmission (`spec.md` §3, §4.1).
pub type EduKey = String;

/// An ephemeral datagram (`spec.md` §3, GLOSSARY "EDU").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edu {
	pub origin: OwnedServerName,
	pub destination: OwnedServerName,
	pub edu_type: String,
	pub content: JsonValue,
}

/// Per-user presence snapshot; the latest one per `user_id` supersedes all
/// previous (`spec.md` §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserPresenceState {
	pub user_id: OwnedUserId,
	pub presence: String,
	pub last_active_ago_ms: u64,
	pub status_msg: Option<String>,
	pub currently_active: bool,
}

/// A read receipt a local user issued (`spec.md` §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadReceipt {
	pub room_id: OwnedRoomId,
	pub receipt_type: String,
	pub user_id: OwnedUserId,
	pub event_ids: Vec<OwnedEventId>,
	pub data: JsonValue,
}

/// Handle to a PDU as stored; the dispatcher only ever passes these around
/// by reference-counted pointer since the same event may fan out to many
/// destination queues.
pub type PduHandle = Arc<Pdu>;
