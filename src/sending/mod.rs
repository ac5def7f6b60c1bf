//! Outbound federation dispatcher: consumes local activity (new room
//! events, presence, read receipts, device-list/to-device replication rows)
//! and fans it out to per-destination send queues.

pub mod collaborators;
pub mod dispatcher;
pub mod fanout;
pub mod metrics;
pub mod position;
pub mod presence;
pub mod queue;
pub mod receipts;
pub mod registry;
pub mod replication;
pub mod types;

pub use collaborators::{EventStore, PresenceInterest, ReplicationAck, StateResolver, TransmissionSink};
pub use dispatcher::FederationSender;
pub use fanout::EventFanout;
pub use metrics::Metrics;
pub use position::PositionTracker;
pub use presence::PresenceBatcher;
pub use queue::{DestinationQueue, LiveQueue, Transaction};
pub use receipts::ReceiptFlushScheduler;
pub use registry::QueueRegistry;
pub use replication::{EntityRow, FederationInstruction, ReceiptRow, ReplicationIngress, StreamRows};
pub use types::{is_mine, Destination, Edu, EduKey, InternalMetadata, Pdu, PduHandle, ReadReceipt, UserPresenceState};
