//! Ambient stack shared by the dispatcher crate: errors, config, logging.
//!
//! Matrix-agnostic on purpose — nothing here knows what a room or an event
//! is. That lives in `fedsend`.

pub mod config;
pub mod error;
pub mod log;
mod result;

pub use config::Config;
pub use error::Error;
pub use result::Result;

pub use crate::log::{debug, error, info, trace, warn};
