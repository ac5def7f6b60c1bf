//! `QueueRegistry` (`spec.md` §4.2): destination → `DestinationQueue`,
//! lazily created, never removed during process lifetime.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};

use crate::{
	collaborators::TransmissionSink,
	queue::{DestinationQueue, LiveQueue},
	types::Destination,
};

pub struct QueueRegistry {
	sink: Arc<dyn TransmissionSink>,
	queues: Mutex<HashMap<Destination, Arc<dyn DestinationQueue>>>,
}

impl QueueRegistry {
	#[must_use]
	pub fn new(sink: Arc<dyn TransmissionSink>) -> Self { Self { sink, queues: Mutex::new(HashMap::new()) } }

	/// Returns the existing queue for `destination` or creates one
	/// atomically. Callers never pass the local `server_name`; that filter
	/// happens upstream in the dispatcher (`spec.md` §4.2).
	pub fn get(&self, destination: &Destination) -> Arc<dyn DestinationQueue> {
		let mut queues = self.queues.lock().expect("registry lock poisoned");
		if let Some(queue) = queues.get(destination) {
			return Arc::clone(queue);
		}

		let queue: Arc<dyn DestinationQueue> = LiveQueue::spawn(destination.clone(), Arc::clone(&self.sink));
		queues.insert(destination.clone(), Arc::clone(&queue));
		queue
	}

	/// Gauge: destinations with a transaction currently in flight.
	#[must_use]
	pub fn transmitting_count(&self) -> usize {
		self.queues.lock().expect("registry lock poisoned").values().filter(|q| q.is_transmitting()).count()
	}

	/// Gauge: total buffered PDUs across every known destination.
	#[must_use]
	pub fn total_pending_pdus(&self) -> usize {
		self.queues.lock().expect("registry lock poisoned").values().map(|q| q.pending_pdu_count()).sum()
	}

	/// Gauge: total buffered EDUs across every known destination.
	#[must_use]
	pub fn total_pending_edus(&self) -> usize {
		self.queues.lock().expect("registry lock poisoned").values().map(|q| q.pending_edu_count()).sum()
	}
}
