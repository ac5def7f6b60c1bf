//! `EventFanout` (`spec.md` §4.3): walks the local event stream, resolves
//! destinations per event, and hands PDUs to their destination queues.
//!
//! Grounded on the teacher's event-fanout loop in `service/sending/mod.rs`
//! (page-then-group-by-room-then-resolve shape) and `sender.rs`'s
//! `select_edus`/order-counter idiom, adapted to the pre-state host
//! resolution and behalf-of/proactive gates this spec names explicitly.

use std::{
	collections::BTreeMap,
	sync::{
		atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
		Arc,
	},
};

use fedsend_core::{debug, warn, Config};
use futures::stream::{self, StreamExt};
use ruma::OwnedRoomId;

use crate::{
	collaborators::{EventStore, StateResolver},
	metrics::Metrics,
	registry::QueueRegistry,
	types::{is_mine, Destination, PduHandle},
};

/// Rooms resolved concurrently within a single page; resolver calls inside
/// a room stay strictly sequential so per-room PDU order is preserved.
const ROOM_CONCURRENCY: usize = 32;

pub struct EventFanout {
	config: Arc<Config>,
	registry: Arc<QueueRegistry>,
	store: Arc<dyn EventStore>,
	resolver: Arc<dyn StateResolver>,
	metrics: Arc<Metrics>,
	last_poked_id: AtomicI64,
	is_processing: AtomicBool,
	order_counter: AtomicU64,
}

impl EventFanout {
	#[must_use]
	pub fn new(
		config: Arc<Config>, registry: Arc<QueueRegistry>, store: Arc<dyn EventStore>, resolver: Arc<dyn StateResolver>,
		metrics: Arc<Metrics>,
	) -> Arc<Self> {
		Arc::new(Self {
			config,
			registry,
			store,
			resolver,
			metrics,
			last_poked_id: AtomicI64::new(0),
			is_processing: AtomicBool::new(false),
			order_counter: AtomicU64::new(0),
		})
	}

	/// Advances the watermark and schedules a fanout pass if none is
	/// running. Non-blocking (`spec.md` §4.3 `notifyNewEvents`).
	pub fn notify_new_events(self: &Arc<Self>, current_id: i64) {
		self.last_poked_id.fetch_max(current_id, Ordering::AcqRel);
		self.try_spawn_pass();
	}

	/// Spawns a `processEventQueue` pass if none is running. Also used to
	/// close the race between the loop's exit check and `is_processing`
	/// being cleared: a poke landing in that window must not be lost
	/// (`spec.md` §9: "a new poke during a run causes the run to observe
	/// the new state before exiting").
	fn try_spawn_pass(self: &Arc<Self>) {
		if self.is_processing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
			let fanout = Arc::clone(self);
			tokio::spawn(async move {
				let result = fanout.process_event_queue().await;
				let observed_watermark = match result {
					| Ok(watermark) => Some(watermark),
					| Err(e) => {
						warn!("event fanout loop aborted: {e}");
						None
					},
				};
				fanout.is_processing.store(false, Ordering::Release);

				if observed_watermark.is_some_and(|w| fanout.last_poked_id.load(Ordering::Acquire) > w) {
					fanout.try_spawn_pass();
				}
			});
		}
	}

	/// `spec.md` §4.3 `processEventQueue`. Exits naturally once caught up to
	/// a freshly-read watermark, and returns that watermark so the caller
	/// can detect a poke that arrived after the exit decision but before
	/// `is_processing` is cleared.
	async fn process_event_queue(self: &Arc<Self>) -> fedsend_core::Result<i64> {
		loop {
			let last_token = self.store.federation_out_pos("events").await?;
			let current = self.last_poked_id.load(Ordering::Acquire);
			let (next_token, events) =
				self.store.all_new_events_stream(last_token, current, self.config.event_page_limit).await?;

			let watermark = self.last_poked_id.load(Ordering::Acquire);
			if events.is_empty() && next_token >= watermark {
				return Ok(watermark);
			}

			let mut by_room: BTreeMap<OwnedRoomId, Vec<PduHandle>> = BTreeMap::new();
			for event in events {
				by_room.entry(event.room_id.clone()).or_default().push(event);
			}
			let room_count = by_room.len();

			let started = std::time::Instant::now();
			stream::iter(by_room.into_values())
				.for_each_concurrent(ROOM_CONCURRENCY, |batch| async move {
					for event in batch {
						self.handle_event(&event).await;
					}
				})
				.await;

			self.store.update_federation_out_pos("events", next_token).await?;

			let lag_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
			let now_ms = i64::try_from(
				std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map_or(0, |d| d.as_millis()),
			)
			.unwrap_or(0);
			self.metrics.record_page(lag_ms, now_ms, next_token, room_count);
		}
	}

	/// Applies the origin/behalf-of/proactive gates (P3-P5), resolves
	/// pre-state destinations, and dispatches (`spec.md` §4.3 step 5).
	async fn handle_event(&self, event: &PduHandle) {
		let sob = event.send_on_behalf_of();
		if !(is_mine(&self.config.server_name, &event.sender) || sob.is_some()) {
			return;
		}
		if !event.should_proactively_send() {
			return;
		}

		let mut dsts = match self.resolver.hosts_in_room_at_events(&event.room_id, &event.prev_event_ids).await {
			| Ok(dsts) => dsts,
			| Err(e) => {
				warn!(event_id = %event.event_id, "resolver failed, skipping event: {e}");
				return;
			},
		};

		if let Some(sob) = sob {
			dsts.remove(&sob.to_owned());
		}
		dsts.remove(&self.config.server_name);

		if dsts.is_empty() {
			return;
		}

		self.send_pdu(Arc::clone(event), dsts);
	}

	/// `spec.md` §4.3 `sendPdu`: assigns the next order, re-filters
	/// `server_name` defensively, records metrics, and enqueues.
	pub fn send_pdu(&self, pdu: PduHandle, destinations: std::collections::HashSet<Destination>) {
		let destinations: Vec<Destination> =
			destinations.into_iter().filter(|d| d.as_str() != self.config.server_name.as_str()).collect();
		if destinations.is_empty() {
			return;
		}

		let order = self.order_counter.fetch_add(1, Ordering::AcqRel);
		self.metrics.record_sent_pdu(destinations.len());
		debug!(event_id = %pdu.event_id, order, destinations = destinations.len(), "fanning out pdu");

		for destination in destinations {
			self.registry.get(&destination).enqueue_pdu(Arc::clone(&pdu), order);
		}
	}
}
