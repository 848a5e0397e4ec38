//! The event bus (spec §4.1): Redis Streams-backed publish/consume with consumer
//! groups, pending-entry-list claim/ack semantics, and DLQ sidecar streams.

pub mod bus;
pub mod consumer;
pub mod dlq;
pub mod entry;
pub mod fast_store;

pub use bus::{publish_typed, EventBus, RedisEventBus};
pub use consumer::{classify_failure, classify_failure_with_retry, should_retry_locally, ConsumeLoop, ConsumeLoopConfig, EventHandler, HandleOutcome};
pub use dlq::replay_dlq_entry;
pub use entry::StreamEntry;
pub use fast_store::FastStore;
