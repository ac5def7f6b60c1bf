mod err;

/// The dispatcher's error type.
///
/// Kept small and flat on purpose: this crate is a thin orchestrator over
/// external collaborators (store, resolver, transport), so most failures
/// are reported by those collaborators and simply carried here as strings
/// rather than re-derived into a deep variant tree.
#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("{0}")]
	Err(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("task join error: {0}")]
	Join(#[from] tokio::task::JoinError),

	#[error("(de)serialization error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("config error: {0}")]
	Config(#[from] figment::Error),

	#[error("invalid matrix identifier: {0}")]
	Mxid(#[from] ruma::IdParseError),

	#[error("event store error: {0}")]
	Store(String),

	#[error("state resolver error: {0}")]
	Resolver(String),

	#[error("transmission error: {0}")]
	Transmission(String),
}

impl Error {
	#[must_use]
	pub fn message(&self) -> String { self.to_string() }
}
