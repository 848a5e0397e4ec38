//! `EventBus`: the publish/consume/ack/claim contract from §4.1, backed by Redis Streams.
//!
//! Streams are created lazily (`XGROUP CREATE ... MKSTREAM`); ordering is per-stream only,
//! matching §5 — consumers must never assume cross-stream ordering.

use async_trait::async_trait;
use msgforge_core::error::{retry_with_backoff, PipelineError, RetryPolicy};
use msgforge_core::events::{EventHeaders, Stream};
use redis::aio::ConnectionManager;
use redis::RedisResult;
use std::collections::HashMap;

use crate::entry::StreamEntry;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn ensure_group(&self, stream: Stream, group: &str) -> Result<(), PipelineError>;

    /// Publishes a JSON payload under `headers`. Retries locally with exponential
    /// backoff; on exhaustion writes a DLQ record and returns `EventBusError`
    /// (`error_code = publish_failed`, §4.1). Kept object-safe (`dyn EventBus`) by taking
    /// an already-serialized `Value`; use [`publish_typed`] for the ergonomic form.
    async fn publish(
        &self,
        stream: Stream,
        headers: EventHeaders,
        payload: serde_json::Value,
    ) -> Result<String, PipelineError>;

    /// Reads entries new to `group` (the `>` id), blocking up to `block_ms`.
    async fn read_new(
        &self,
        stream: Stream,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, PipelineError>;

    /// Claims pending entries idle longer than `min_idle_seconds`, transferring
    /// ownership to `consumer` (§4.1's `Claim`).
    async fn claim_stale(
        &self,
        stream: Stream,
        group: &str,
        consumer: &str,
        min_idle_seconds: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, PipelineError>;

    /// Idempotent acknowledgement (§4.1).
    async fn ack(&self, stream: Stream, group: &str, id: &str) -> Result<(), PipelineError>;

    /// Writes to `stream:<base_event>.dlq` (§4.1's `PublishDLQ`).
    async fn publish_dlq(
        &self,
        base_event: Stream,
        payload_snippet: serde_json::Value,
        error_code: &str,
        attempts: u32,
    ) -> Result<String, PipelineError>;
}

/// Ergonomic wrapper around [`EventBus::publish`] for any `T: Serialize` payload.
pub async fn publish_typed<B: EventBus + ?Sized, T: serde::Serialize>(
    bus: &B,
    stream: Stream,
    headers: EventHeaders,
    payload: &T,
) -> Result<String, PipelineError> {
    let value = serde_json::to_value(payload)?;
    bus.publish(stream, headers, value).await
}

#[derive(Clone)]
pub struct RedisEventBus {
    conn: ConnectionManager,
    publish_retry: RetryPolicy,
}

impl RedisEventBus {
    pub async fn connect(redis_url: &str, publish_retry: RetryPolicy) -> Result<Self, PipelineError> {
        let client = redis::Client::open(redis_url).map_err(PipelineError::from)?;
        let conn = client.get_connection_manager().await.map_err(PipelineError::from)?;
        Ok(Self { conn, publish_retry })
    }

    fn parse_xreadgroup(reply: redis::Value) -> Vec<(String, HashMap<String, String>)> {
        let mut out = Vec::new();
        let redis::Value::Array(streams) = reply else { return out };
        for stream_entry in streams {
            let redis::Value::Array(pair) = stream_entry else { continue };
            if pair.len() != 2 {
                continue;
            }
            let redis::Value::Array(entries) = &pair[1] else { continue };
            for entry in entries {
                let redis::Value::Array(fields) = entry else { continue };
                if fields.len() != 2 {
                    continue;
                }
                let id = match &fields[0] {
                    redis::Value::BulkString(b) => String::from_utf8_lossy(b).to_string(),
                    redis::Value::SimpleString(s) => s.clone(),
                    _ => continue,
                };
                let mut map = HashMap::new();
                if let redis::Value::Array(kvs) = &fields[1] {
                    let mut it = kvs.iter();
                    while let (Some(k), Some(v)) = (it.next(), it.next()) {
                        let (redis::Value::BulkString(kb), redis::Value::BulkString(vb)) = (k, v) else { continue };
                        map.insert(String::from_utf8_lossy(kb).to_string(), String::from_utf8_lossy(vb).to_string());
                    }
                }
                out.push((id, map));
            }
        }
        out
    }

    fn entry_from_fields(id: String, fields: HashMap<String, String>, delivery_count: u32) -> StreamEntry {
        StreamEntry {
            id,
            headers_json: fields.get("headers").cloned().unwrap_or_default(),
            payload_json: fields.get("payload").cloned().unwrap_or_default(),
            delivery_count,
        }
    }

    /// `XPENDING key group IDLE 0 start end count` — the extended form, which reports
    /// each matching entry's actual delivery count. `ids` must be given in ascending
    /// stream-id order (as `XREADGROUP`/`XAUTOCLAIM` already return them); `start`/`end`
    /// bracket the batch so one round trip covers it instead of one per id.
    async fn delivery_counts(&self, stream: Stream, group: &str, ids: &[String]) -> HashMap<String, u32> {
        let (Some(first), Some(last)) = (ids.first(), ids.last()) else { return HashMap::new() };
        let mut conn = self.conn.clone();
        let reply: RedisResult<redis::Value> = redis::cmd("XPENDING")
            .arg(stream.key())
            .arg(group)
            .arg("IDLE")
            .arg(0)
            .arg(first)
            .arg(last)
            .arg(ids.len())
            .query_async(&mut conn)
            .await;

        let mut counts = HashMap::new();
        let Ok(redis::Value::Array(entries)) = reply else { return counts };
        for entry in entries {
            let redis::Value::Array(fields) = entry else { continue };
            if fields.len() != 4 {
                continue;
            }
            let id = match &fields[0] {
                redis::Value::BulkString(b) => String::from_utf8_lossy(b).to_string(),
                redis::Value::SimpleString(s) => s.clone(),
                _ => continue,
            };
            let delivery_count = match &fields[3] {
                redis::Value::Int(n) => *n as u32,
                _ => continue,
            };
            counts.insert(id, delivery_count);
        }
        counts
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn ensure_group(&self, stream: Stream, group: &str) -> Result<(), PipelineError> {
        let mut conn = self.conn.clone();
        let result: RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream.key())
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(PipelineError::from(e)),
        }
    }

    async fn publish(
        &self,
        stream: Stream,
        headers: EventHeaders,
        payload: serde_json::Value,
    ) -> Result<String, PipelineError> {
        let headers_json = serde_json::to_string(&headers)?;
        let payload_json = serde_json::to_string(&payload)?;

        let result = retry_with_backoff(&self.publish_retry, |_attempt| {
            let mut conn = self.conn.clone();
            let stream_key = stream.key();
            let headers_json = headers_json.clone();
            let payload_json = payload_json.clone();
            async move {
                let id: RedisResult<String> = redis::cmd("XADD")
                    .arg(&stream_key)
                    .arg("*")
                    .arg("headers")
                    .arg(&headers_json)
                    .arg("payload")
                    .arg(&payload_json)
                    .query_async(&mut conn)
                    .await;
                id.map_err(|e| PipelineError::transient(format!("XADD {stream_key}: {e}")))
            }
        })
        .await;

        match result {
            Ok(id) => {
                msgforge_core::metrics::EVENTS_PUBLISHED_TOTAL
                    .with_label_values(&[stream.base_name(), "ok"])
                    .inc();
                Ok(id)
            }
            Err(error) => {
                msgforge_core::metrics::EVENTS_PUBLISHED_TOTAL
                    .with_label_values(&[stream.base_name(), "failed"])
                    .inc();
                let snippet = serde_json::json!({ "headers": headers, "payload_preview": payload_json.chars().take(512).collect::<String>() });
                let _ = self.publish_dlq(stream, snippet, "publish_failed", self.publish_retry.max_attempts).await;
                Err(PipelineError::EventBusError { message: format!("publish_failed: {error}") })
            }
        }
    }

    async fn read_new(
        &self,
        stream: Stream,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, PipelineError> {
        let mut conn = self.conn.clone();
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(stream.key())
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(PipelineError::from)?;

        let parsed = Self::parse_xreadgroup(reply);
        let ids: Vec<String> = parsed.iter().map(|(id, _)| id.clone()).collect();
        let counts = self.delivery_counts(stream, group, &ids).await;

        Ok(parsed
            .into_iter()
            .map(|(id, fields)| {
                // A fresh `>` read is this consumer's first delivery unless XPENDING
                // already shows a higher count (e.g. a prior crash after XREADGROUP but
                // before this lookup).
                let delivery_count = counts.get(&id).copied().unwrap_or(1).max(1);
                Self::entry_from_fields(id, fields, delivery_count)
            })
            .collect())
    }

    async fn claim_stale(
        &self,
        stream: Stream,
        group: &str,
        consumer: &str,
        min_idle_seconds: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, PipelineError> {
        let mut conn = self.conn.clone();
        // XAUTOCLAIM key group consumer min-idle-time start [COUNT count]
        let reply: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(stream.key())
            .arg(group)
            .arg(consumer)
            .arg(min_idle_seconds * 1000)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(PipelineError::from)?;

        let redis::Value::Array(parts) = reply else { return Ok(Vec::new()) };
        if parts.len() < 2 {
            return Ok(Vec::new());
        }
        let redis::Value::Array(entries) = &parts[1] else { return Ok(Vec::new()) };
        let mut staged = Vec::new();
        for entry in entries {
            let redis::Value::Array(fields) = entry else { continue };
            if fields.len() != 2 {
                continue;
            }
            let id = match &fields[0] {
                redis::Value::BulkString(b) => String::from_utf8_lossy(b).to_string(),
                redis::Value::SimpleString(s) => s.clone(),
                _ => continue,
            };
            let mut map = HashMap::new();
            if let redis::Value::Array(kvs) = &fields[1] {
                let mut it = kvs.iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    let (redis::Value::BulkString(kb), redis::Value::BulkString(vb)) = (k, v) else { continue };
                    map.insert(String::from_utf8_lossy(kb).to_string(), String::from_utf8_lossy(vb).to_string());
                }
            }
            staged.push((id, map));
        }

        let ids: Vec<String> = staged.iter().map(|(id, _)| id.clone()).collect();
        let counts = self.delivery_counts(stream, group, &ids).await;

        let mut out = Vec::new();
        for (id, map) in staged {
            // A claimed entry has been delivered at least twice (the original delivery
            // plus this claim); fall back to that floor if XPENDING's view is stale.
            let delivery_count = counts.get(&id).copied().unwrap_or(2).max(2);
            out.push(Self::entry_from_fields(id, map, delivery_count));
        }
        Ok(out)
    }

    async fn ack(&self, stream: Stream, group: &str, id: &str) -> Result<(), PipelineError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(stream.key())
            .arg(group)
            .arg(id)
            .query_async(&mut conn)
            .await
            .map_err(PipelineError::from)?;
        Ok(())
    }

    async fn publish_dlq(
        &self,
        base_event: Stream,
        payload_snippet: serde_json::Value,
        error_code: &str,
        attempts: u32,
    ) -> Result<String, PipelineError> {
        let mut conn = self.conn.clone();
        let record = serde_json::json!({
            "base_event": base_event.base_name(),
            "payload_snippet": payload_snippet,
            "error_code": error_code,
            "attempts": attempts,
        });
        let record_json = serde_json::to_string(&record)?;
        msgforge_core::metrics::DLQ_BACKLOG.with_label_values(&[base_event.base_name()]).inc();
        let id: String = redis::cmd("XADD")
            .arg(base_event.dlq_key())
            .arg("*")
            .arg("record")
            .arg(record_json)
            .query_async(&mut conn)
            .await
            .map_err(PipelineError::from)?;
        Ok(id)
    }
}

/// Test-only in-memory bus so worker logic can be unit tested without a Redis fixture.
#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryEventBus {
        pub published: Mutex<Vec<(String, String, String)>>,
        pub dlq: Mutex<Vec<(String, String, u32)>>,
    }

    #[async_trait]
    impl EventBus for InMemoryEventBus {
        async fn ensure_group(&self, _stream: Stream, _group: &str) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn publish(
            &self,
            stream: Stream,
            headers: EventHeaders,
            payload: serde_json::Value,
        ) -> Result<String, PipelineError> {
            let id = uuid::Uuid::new_v4().to_string();
            let payload_json = serde_json::to_string(&payload)?;
            self.published.lock().await.push((stream.base_name().to_string(), headers.idempotency_key, payload_json));
            Ok(id)
        }

        async fn read_new(
            &self,
            _stream: Stream,
            _group: &str,
            _consumer: &str,
            _count: usize,
            _block_ms: u64,
        ) -> Result<Vec<StreamEntry>, PipelineError> {
            Ok(Vec::new())
        }

        async fn claim_stale(
            &self,
            _stream: Stream,
            _group: &str,
            _consumer: &str,
            _min_idle_seconds: u64,
            _count: usize,
        ) -> Result<Vec<StreamEntry>, PipelineError> {
            Ok(Vec::new())
        }

        async fn ack(&self, _stream: Stream, _group: &str, _id: &str) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn publish_dlq(
            &self,
            base_event: Stream,
            _payload_snippet: serde_json::Value,
            error_code: &str,
            attempts: u32,
        ) -> Result<String, PipelineError> {
            self.dlq.lock().await.push((base_event.base_name().to_string(), error_code.to_string(), attempts));
            Ok(uuid::Uuid::new_v4().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryEventBus;
    use super::*;
    use msgforge_core::events::PostsParsed;

    #[tokio::test]
    async fn in_memory_bus_records_published_events() {
        let bus = InMemoryEventBus::default();
        let headers = EventHeaders::new("idem-1", Some("tenant-a".into()));
        let payload = PostsParsed {
            post_id: uuid::Uuid::new_v4(),
            channel_id: uuid::Uuid::new_v4(),
            tenant_id: "tenant-a".into(),
            text: "hello".into(),
            has_media: false,
            media_sha256_list: vec![],
            grouped_id: None,
            telegram_post_url: None,
            posted_at: chrono::Utc::now(),
        };
        publish_typed(&bus, Stream::PostsParsed, headers, &payload).await.unwrap();
        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "posts.parsed");
    }
}
