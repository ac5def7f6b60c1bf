//! Configuration surface for the federation dispatcher.
//!
//! Loaded the way the teacher loads `conduwuit.toml`: a TOML file merged
//! with environment overrides via `figment`, rather than hand-rolled env
//! parsing.

use figment::{
	providers::{Env, Format, Toml},
	Figment,
};
use ruma::OwnedServerName;
use serde::Deserialize;

use crate::Result;

/// All config options this dispatcher reads directly (`spec.md` §6 "Config
/// surface"). Everything the host process needs for its own concerns
/// (storage backend, listen address, TLS, ...) lives outside this struct;
/// it is deliberately scoped to what `FederationSender` itself consults.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	/// This server's own name, used to filter it out of every destination
	/// set (`spec.md` P2).
	pub server_name: OwnedServerName,

	/// Read receipts per room per second the destination-fanout aims for;
	/// backs `RR_TXN_INTERVAL_PER_ROOM_MS` in `spec.md` §4.4.
	#[serde(default = "default_rr_rate")]
	pub rr_transactions_per_room_per_second: f64,

	/// Global kill switch for presence fan-out (`spec.md` §4.5 step 1).
	#[serde(default = "default_true")]
	pub enable_presence: bool,

	/// Page size for `allNewEventsStream` (`spec.md` §4.3 step 2).
	#[serde(default = "default_event_page_limit")]
	pub event_page_limit: u64,

	/// Cap on presence updates folded into a single EDU selection pass.
	#[serde(default = "default_presence_select_limit")]
	pub presence_select_limit: usize,
}

const fn default_rr_rate() -> f64 { 50.0 }
const fn default_true() -> bool { true }
const fn default_event_page_limit() -> u64 { 100 }
const fn default_presence_select_limit() -> usize { 100 }

impl Config {
	/// Loads configuration from `path` (if it exists) layered under
	/// `FEDSEND_`-prefixed environment variables, the latter taking
	/// precedence — the teacher's `Figment::new().merge(Toml).merge(Env)`
	/// ordering.
	pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
		let config: Self = Figment::new()
			.merge(Toml::file(path.as_ref()))
			.merge(Env::prefixed("FEDSEND_"))
			.extract()?;

		config.check()?;
		Ok(config)
	}

	/// Validates values that can't be expressed as a serde invariant.
	/// Mirrors the teacher's `config::check` module: a place for
	/// cross-field or range checks run once after load rather than
	/// scattered through the rest of the crate.
	pub fn check(&self) -> Result {
		if self.rr_transactions_per_room_per_second <= 0.0 {
			return Err(crate::err!(
				"rr_transactions_per_room_per_second must be positive, got {}",
				self.rr_transactions_per_room_per_second
			));
		}

		Ok(())
	}

	/// Milliseconds between receipt-flush transactions for a single
	/// destination in a room, per `spec.md` §4.4's
	/// `RR_TXN_INTERVAL_PER_ROOM_MS`.
	#[must_use]
	pub fn rr_txn_interval_per_room_ms(&self) -> f64 { 1000.0 / self.rr_transactions_per_room_per_second }
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base() -> Config {
		Config {
			server_name: "example.org".try_into().unwrap(),
			rr_transactions_per_room_per_second: 50.0,
			enable_presence: true,
			event_page_limit: 100,
			presence_select_limit: 100,
		}
	}

	#[test]
	fn rr_interval_scales_with_rate() {
		let mut config = base();
		config.rr_transactions_per_room_per_second = 50.0;
		assert!((config.rr_txn_interval_per_room_ms() - 20.0).abs() < f64::EPSILON);
	}

	#[test]
	fn rejects_non_positive_rate() {
		let mut config = base();
		config.rr_transactions_per_room_per_second = 0.0;
		assert!(config.check().is_err());

		config.rr_transactions_per_room_per_second = -1.0;
		assert!(config.check().is_err());
	}

	#[test]
	fn accepts_default() { assert!(base().check().is_ok()); }
}
