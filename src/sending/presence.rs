//! `PresenceBatcher` (`spec.md` §4.5): coalesces presence updates behind a
//! singleflight drain so a burst of updates for the same user collapses to
//! its latest state, then fans the drained batch out by destination.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use fedsend_core::{warn, Config};
use ruma::OwnedUserId;
use tokio::sync::Mutex;

use crate::{collaborators::PresenceInterest, registry::QueueRegistry, types::{is_mine, Destination, UserPresenceState}};

pub struct PresenceBatcher {
	config: Arc<Config>,
	registry: Arc<QueueRegistry>,
	interest: Arc<dyn PresenceInterest>,
	pending: Mutex<HashMap<OwnedUserId, UserPresenceState>>,
	is_processing: AtomicBool,
}

impl PresenceBatcher {
	#[must_use]
	pub fn new(config: Arc<Config>, registry: Arc<QueueRegistry>, interest: Arc<dyn PresenceInterest>) -> Arc<Self> {
		Arc::new(Self { config, registry, interest, pending: Mutex::new(HashMap::new()), is_processing: AtomicBool::new(false) })
	}

	/// Folds `states` into the pending batch (last write per user wins) and
	/// ensures exactly one drain task is running (`spec.md` §4.5 steps
	/// 1-3). No-ops entirely when presence fan-out is disabled. Only local
	/// users are retained: `pending_presence` must contain local users only
	/// (`spec.md` §3), since a remote user's state was already federated to
	/// us by its own server and re-sending it would loop it back out.
	pub async fn send_presence(self: &Arc<Self>, states: Vec<UserPresenceState>) {
		if !self.config.enable_presence || states.is_empty() {
			return;
		}

		{
			let mut pending = self.pending.lock().await;
			for state in states {
				if is_mine(&self.config.server_name, &state.user_id) {
					pending.insert(state.user_id.clone(), state);
				}
			}
		}

		if self.is_processing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok() {
			let batcher = Arc::clone(self);
			tokio::spawn(async move { batcher.drain().await });
		}
	}

	/// Drains the pending batch through `PresenceInterest` and enqueues each
	/// resulting `(hosts, states)` group onto its destination queues. Loops
	/// until the pending map is empty at the moment it checks, so updates
	/// that arrive mid-drain get picked up by this same pass instead of
	/// waiting for a fresh singleflight winner (`spec.md` §4.5 step 3: "keep
	/// draining while the map is non-empty").
	async fn drain(self: Arc<Self>) {
		loop {
			let batch: Vec<UserPresenceState> = {
				let mut pending = self.pending.lock().await;
				if pending.is_empty() {
					self.is_processing.store(false, Ordering::Release);
					return;
				}
				pending.drain().map(|(_, state)| state).collect()
			};

			let groups = match self.interest.hosts_and_states_for(batch).await {
				| Ok(groups) => groups,
				| Err(e) => {
					warn!("presence interest resolution failed, dropping this batch: {e}");
					self.is_processing.store(false, Ordering::Release);
					return;
				},
			};

			for (hosts, states) in groups {
				self.dispatch(hosts, states);
			}
		}
	}

	/// Sends `states` to exactly `destinations`, bypassing the pending-batch
	/// path entirely (`spec.md` §4.5 step 5: targeted presence, e.g. in
	/// response to an explicit federation presence request).
	pub fn send_presence_to_destinations(&self, states: Vec<UserPresenceState>, destinations: impl IntoIterator<Item = Destination>) {
		let destinations: Vec<_> = destinations.into_iter().filter(|d| d.as_str() != self.config.server_name.as_str()).collect();
		self.dispatch(destinations.into_iter().collect(), states);
	}

	fn dispatch(&self, hosts: impl IntoIterator<Item = Destination>, states: Vec<UserPresenceState>) {
		for destination in hosts {
			if destination.as_str() == self.config.server_name.as_str() {
				continue;
			}
			self.registry.get(&destination).enqueue_presence(states.clone());
		}
	}
}
