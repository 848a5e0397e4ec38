//! The event catalogue (§6): stream names, the mandatory envelope header fields, and the
//! typed payload for every contractual stream. `msgforge-events` transports these as
//! opaque bytes; everything that needs to know the payload shape imports this module
//! instead of poking at JSON — the tagged-variant redesign flag from §9.

pub mod envelope;
pub mod payloads;
pub mod streams;

pub use envelope::{EventEnvelope, EventHeaders};
pub use payloads::*;
pub use streams::Stream;
