//! A single stream entry as read back from Redis: a log id plus the two fields every
//! entry carries on the wire (`headers`, `payload`), each a JSON blob.

use msgforge_core::error::PipelineError;
use msgforge_core::events::EventHeaders;
use serde::de::DeserializeOwned;

/// One XADD-produced entry, read back via XREADGROUP/XCLAIM.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub headers_json: String,
    pub payload_json: String,
    /// Number of times this entry has been delivered (from XPENDING's delivery count).
    pub delivery_count: u32,
}

impl StreamEntry {
    pub fn headers(&self) -> Result<EventHeaders, PipelineError> {
        serde_json::from_str(&self.headers_json).map_err(PipelineError::from)
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, PipelineError> {
        serde_json::from_str(&self.payload_json).map_err(PipelineError::from)
    }
}
