//! `FederationSender` (`spec.md` §6): the single entry point the host
//! process holds, wiring every component above into the inbound API table.

use std::{collections::HashSet, sync::Arc};

use fedsend_core::{info, Config};
use serde_json::Value as JsonValue;

use crate::{
	collaborators::{EventStore, PresenceInterest, ReplicationAck, StateResolver, TransmissionSink},
	fanout::EventFanout,
	metrics::Metrics,
	position::PositionTracker,
	presence::PresenceBatcher,
	receipts::ReceiptFlushScheduler,
	registry::QueueRegistry,
	replication::{ReplicationIngress, StreamRows},
	types::{Destination, Edu, ReadReceipt, UserPresenceState},
};

pub struct FederationSender {
	config: Arc<Config>,
	registry: Arc<QueueRegistry>,
	fanout: Arc<EventFanout>,
	receipts: Arc<ReceiptFlushScheduler>,
	presence: Arc<PresenceBatcher>,
	replication: Arc<ReplicationIngress>,
	position: Arc<PositionTracker>,
	metrics: Arc<Metrics>,
}

impl FederationSender {
	/// Constructs every component and seeds `federation_position` from
	/// durable storage (`spec.md` §3 "Lifecycle": "initialized with
	/// `federation_position` loaded from durable storage").
	pub async fn new(
		config: Arc<Config>, store: Arc<dyn EventStore>, resolver: Arc<dyn StateResolver>,
		presence_interest: Arc<dyn PresenceInterest>, sink: Arc<dyn TransmissionSink>, ack: Arc<dyn ReplicationAck>,
	) -> fedsend_core::Result<Arc<Self>> {
		let registry = Arc::new(QueueRegistry::new(sink));
		let metrics = Arc::new(Metrics::default());

		let fanout = EventFanout::new(Arc::clone(&config), Arc::clone(&registry), Arc::clone(&store), Arc::clone(&resolver), Arc::clone(&metrics));
		let receipts = ReceiptFlushScheduler::new(Arc::clone(&config), Arc::clone(&registry), Arc::clone(&resolver));
		let presence = PresenceBatcher::new(Arc::clone(&config), Arc::clone(&registry), presence_interest);
		let position = PositionTracker::load(Arc::clone(&store), ack).await?;
		let replication = ReplicationIngress::new(
			Arc::clone(&config),
			Arc::clone(&registry),
			Arc::clone(&fanout),
			Arc::clone(&receipts),
			Arc::clone(&presence),
			Arc::clone(&position),
		);

		Ok(Arc::new(Self { config, registry, fanout, receipts, presence, replication, position, metrics }))
	}

	/// `notifyNewEvents(current_id)`.
	pub fn notify_new_events(&self, current_id: i64) { self.fanout.notify_new_events(current_id); }

	/// `sendReadReceipt(receipt)`.
	pub async fn send_read_receipt(&self, receipt: ReadReceipt) -> fedsend_core::Result {
		self.receipts.send_read_receipt(receipt).await
	}

	/// `sendPresence(states)`.
	pub async fn send_presence(&self, states: Vec<UserPresenceState>) { self.presence.send_presence(states).await; }

	/// `sendPresenceToDestinations(states, destinations)`.
	pub fn send_presence_to_destinations(&self, states: Vec<UserPresenceState>, destinations: HashSet<Destination>) {
		if !self.config.enable_presence {
			return;
		}
		self.presence.send_presence_to_destinations(states, destinations);
	}

	/// `buildAndSendEdu(destination, edu_type, content, key?)` (`spec.md`
	/// §4.8): a no-op logged at info level when targeting ourselves.
	pub fn build_and_send_edu(&self, destination: Destination, edu_type: String, content: JsonValue, key: Option<String>) {
		if destination.as_str() == self.config.server_name.as_str() {
			info!(%destination, "not sending EDU to self");
			return;
		}
		let edu = Edu { origin: self.config.server_name.clone(), destination, edu_type, content };
		self.send_edu(edu, key);
	}

	/// `sendEdu(edu, key?)`.
	pub fn send_edu(&self, edu: Edu, key: Option<String>) { self.replication.send_edu(edu, key); }

	/// `sendDeviceMessages(destination)`.
	pub fn send_device_messages(&self, destination: &Destination) { self.replication.send_device_messages(destination); }

	/// `wakeDestination(destination)`.
	pub fn wake_destination(&self, destination: &Destination) { self.replication.wake_destination(destination); }

	/// `getCurrentToken()`.
	#[must_use]
	pub fn get_current_token(&self) -> i64 { self.position.current_token() }

	/// `getReplicationRows(from, to, limit, ack?)`: this dispatcher never
	/// runs sharded across processes (`spec.md` §1 Non-goals: "cross-process
	/// sharding of the dispatcher"), so there is never a row backlog to
	/// export; always empty.
	#[must_use]
	pub fn get_replication_rows(&self, _from: i64, _to: i64, _limit: u64, _ack: bool) -> Vec<JsonValue> { Vec::new() }

	/// `processReplicationRows(stream_name, token, rows)`, already demuxed
	/// into a typed `StreamRows` by the caller.
	pub async fn process_replication_rows(&self, rows: StreamRows) { self.replication.process_replication_rows(rows).await; }

	#[must_use]
	pub fn metrics(&self) -> &Metrics { &self.metrics }

	#[must_use]
	pub fn registry(&self) -> &QueueRegistry { &self.registry }
}
