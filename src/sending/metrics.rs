//! Counters and gauges (`spec.md` §6 "Metrics exposed"). Grounded on the
//! teacher's `core::metrics::Metrics` — plain atomics updated inline rather
//! than a metrics-crate dependency, since nothing here needs histograms or
//! label sets.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
	/// `federation_client_sent_pdu_destinations_count`
	pub sent_pdu_destinations_count: AtomicU64,
	/// `federation_client_sent_pdu_destinations_total`
	pub sent_pdu_destinations_total: AtomicU64,
	/// Event-processing lag, in milliseconds, of the last fanout page.
	pub event_processing_lag_ms: AtomicI64,
	/// Wall-clock timestamp (ms since epoch) the last fanout page finished.
	pub event_processing_last_ts: AtomicI64,
	/// Current `"events"` stream position as last advanced.
	pub event_stream_position: AtomicI64,
	/// Number of `processEventQueue` page iterations performed.
	pub event_processing_loop_count: AtomicU64,
	/// Rooms touched across all pages processed so far.
	pub event_processing_room_count: AtomicU64,
}

impl Metrics {
	/// Records one `sendPdu` call with a non-empty destination set
	/// (`spec.md` P10).
	pub fn record_sent_pdu(&self, destinations: usize) {
		self.sent_pdu_destinations_count.fetch_add(1, Ordering::Relaxed);
		self.sent_pdu_destinations_total.fetch_add(destinations as u64, Ordering::Relaxed);
	}

	pub fn record_page(&self, lag_ms: i64, last_ts_ms: i64, next_token: i64, rooms: usize) {
		self.event_processing_lag_ms.store(lag_ms, Ordering::Relaxed);
		self.event_processing_last_ts.store(last_ts_ms, Ordering::Relaxed);
		self.event_stream_position.store(next_token, Ordering::Relaxed);
		self.event_processing_loop_count.fetch_add(1, Ordering::Relaxed);
		self.event_processing_room_count.fetch_add(rooms as u64, Ordering::Relaxed);
	}

	#[must_use]
	pub fn sent_pdu_destinations_count(&self) -> u64 { self.sent_pdu_destinations_count.load(Ordering::Relaxed) }

	#[must_use]
	pub fn sent_pdu_destinations_total(&self) -> u64 { self.sent_pdu_destinations_total.load(Ordering::Relaxed) }
}
