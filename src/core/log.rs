//! Logging subsystem. A single `init()` call the host process makes once at
//! startup; dispatcher code otherwise logs through `tracing`'s own macros
//! directly (re-exported below so call sites can `use fedsend_core::{debug,
//! warn, error}` the way the teacher's modules `use conduwuit::{debug, warn,
//! error}`).

pub use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber reading its filter from
/// `RUST_LOG`, defaulting to `info` when unset.
///
/// # Errors
///
/// Returns an error if a global subscriber was already installed.
pub fn init(default_filter: &str) -> crate::Result {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.try_init()
		.map_err(|e| crate::err!("failed to install tracing subscriber: {e}"))
}
