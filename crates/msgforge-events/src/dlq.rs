//! Operator DLQ replay (§7: "operators replay by writing back into the original
//! stream"). Not a new stream — a small helper an operator tool or admin task calls.

use msgforge_core::error::PipelineError;
use msgforge_core::events::Stream;

use crate::bus::EventBus;
use crate::entry::StreamEntry;

/// Republishes a DLQed entry's original headers/payload onto `stream`, the stream it was
/// dead-lettered from. Does not remove the entry from the DLQ stream — operators prune
/// the DLQ separately once satisfied the replay succeeded.
pub async fn replay_dlq_entry<B: EventBus>(bus: &B, stream: Stream, entry: &StreamEntry) -> Result<String, PipelineError> {
    let headers = entry.headers()?;
    let payload: serde_json::Value = entry.payload()?;
    bus.publish(stream, headers, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::InMemoryEventBus;
    use msgforge_core::events::EventHeaders;

    #[tokio::test]
    async fn replay_republishes_original_headers_and_payload() {
        let bus = InMemoryEventBus::default();
        let headers = EventHeaders::new("idem-1", Some("tenant-a".into()));
        let entry = StreamEntry {
            id: "1-0".into(),
            headers_json: serde_json::to_string(&headers).unwrap(),
            payload_json: serde_json::json!({"post_id": "abc"}).to_string(),
            delivery_count: 6,
        };

        replay_dlq_entry(&bus, Stream::PostsParsed, &entry).await.unwrap();
        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1, "idem-1");
    }
}
