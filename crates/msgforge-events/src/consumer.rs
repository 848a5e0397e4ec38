//! The generic consume loop shared by every worker in `msgforge-workers`: claim stale
//! entries, read new ones, hand each to a bounded-channel processor, and ack/DLQ based
//! on the handler's outcome (§4.1, §5, §7).

use msgforge_core::error::PipelineError;
use msgforge_core::events::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::entry::StreamEntry;

/// What a handler decided to do with one entry. The loop translates this into the
/// ack/DLQ action per §7's error taxonomy.
pub enum HandleOutcome {
    /// Processed successfully; ack the entry.
    Ack,
    /// A retryable error under `max_deliveries`; leave the entry pending (do not ack) so
    /// the next `claim_stale` pass redelivers it (§4.1: "remains pending until the
    /// consumer explicitly acknowledges it or it is claimed by another").
    Pending,
    /// A non-retryable or exhausted error; DLQ then ack (§7: DLQ is terminal, source
    /// entry is always acked alongside it).
    Dlq { error_code: String, payload_snippet: serde_json::Value },
    /// A policy denial — not an error; ack without DLQ, caller already recorded a skip
    /// metric (§7 `policy_denied`).
    SkipAck,
}

#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one entry. Implementations classify the failure themselves (via
    /// [`PipelineError::is_retryable`]/`is_ack_without_dlq`) and return the resulting
    /// [`HandleOutcome`] — the loop never inspects the error directly so that retry vs.
    /// DLQ vs. skip stays a single decision point per worker.
    async fn handle(&self, entry: &StreamEntry) -> HandleOutcome;
}

pub struct ConsumeLoopConfig {
    pub stream: Stream,
    pub group: String,
    pub consumer: String,
    pub claim_min_idle_seconds: u64,
    pub max_deliveries: u32,
    pub read_count: usize,
    pub block_ms: u64,
    /// Bounded internal channel between the reader and the processor (§5, default 64).
    pub channel_capacity: usize,
}

/// Drives one consumer instance within a group: claim-then-read on the bus, fan entries
/// into a bounded channel, process and ack/DLQ. On cancellation the in-flight entry is
/// finished (acked or DLQed) before the loop returns (§5).
pub struct ConsumeLoop<B: EventBus> {
    bus: Arc<B>,
    config: ConsumeLoopConfig,
}

impl<B: EventBus + 'static> ConsumeLoop<B> {
    pub fn new(bus: Arc<B>, config: ConsumeLoopConfig) -> Self {
        Self { bus, config }
    }

    pub async fn run(&self, handler: Arc<dyn EventHandler>, cancel: CancellationToken) -> Result<(), PipelineError> {
        self.bus.ensure_group(self.config.stream, &self.config.group).await?;

        let (tx, mut rx) = mpsc::channel::<StreamEntry>(self.config.channel_capacity);

        let reader_bus = self.bus.clone();
        let reader_config_stream = self.config.stream;
        let reader_group = self.config.group.clone();
        let reader_consumer = self.config.consumer.clone();
        let reader_min_idle = self.config.claim_min_idle_seconds;
        let reader_count = self.config.read_count;
        let reader_block_ms = self.config.block_ms;
        let reader_cancel = cancel.clone();

        let reader = tokio::spawn(async move {
            loop {
                if reader_cancel.is_cancelled() {
                    break;
                }

                let claimed = reader_bus
                    .claim_stale(reader_config_stream, &reader_group, &reader_consumer, reader_min_idle, reader_count)
                    .await
                    .unwrap_or_default();
                for entry in claimed {
                    if tx.send(entry).await.is_err() {
                        return;
                    }
                }

                let fresh = reader_bus
                    .read_new(reader_config_stream, &reader_group, &reader_consumer, reader_count, reader_block_ms)
                    .await
                    .unwrap_or_default();
                for entry in fresh {
                    if tx.send(entry).await.is_err() {
                        return;
                    }
                }
            }
        });

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    reader.abort();
                    break;
                }
                maybe_entry = rx.recv() => {
                    match maybe_entry {
                        Some(entry) => self.process_one(&handler, entry).await,
                        None => break,
                    }
                }
            }
        }

        Ok(())
    }

    async fn process_one(&self, handler: &Arc<dyn EventHandler>, entry: StreamEntry) {
        let started = std::time::Instant::now();
        let outcome = handler.handle(&entry).await;

        match outcome {
            HandleOutcome::Ack => {
                let _ = self.bus.ack(self.config.stream, &self.config.group, &entry.id).await;
                msgforge_core::metrics::EVENTS_CONSUMED_TOTAL
                    .with_label_values(&[self.config.stream.base_name(), &self.config.group, "ok"])
                    .inc();
            }
            HandleOutcome::SkipAck => {
                let _ = self.bus.ack(self.config.stream, &self.config.group, &entry.id).await;
                msgforge_core::metrics::EVENTS_CONSUMED_TOTAL
                    .with_label_values(&[self.config.stream.base_name(), &self.config.group, "skipped"])
                    .inc();
            }
            HandleOutcome::Pending => {
                // No ack: the entry stays in the PEL and `claim_stale` redelivers it once
                // it has been idle past `claim_min_idle_seconds`.
                msgforge_core::metrics::EVENTS_CONSUMED_TOTAL
                    .with_label_values(&[self.config.stream.base_name(), &self.config.group, "pending"])
                    .inc();
            }
            HandleOutcome::Dlq { error_code, payload_snippet } => {
                let _ = self
                    .bus
                    .publish_dlq(self.config.stream, payload_snippet, &error_code, entry.delivery_count)
                    .await;
                let _ = self.bus.ack(self.config.stream, &self.config.group, &entry.id).await;
                msgforge_core::metrics::EVENTS_CONSUMED_TOTAL
                    .with_label_values(&[self.config.stream.base_name(), &self.config.group, "dlq"])
                    .inc();
            }
        }

        msgforge_core::metrics::EVENT_PROCESSING_DURATION
            .with_label_values(&[self.config.stream.base_name(), &self.config.group])
            .observe(started.elapsed().as_secs_f64());
    }
}

/// A failed entry is still retryable locally: leave it pending (do not ack) and let the
/// next `claim_stale` pass redeliver it.
pub fn should_retry_locally(error: &PipelineError, delivery_count: u32, max_deliveries: u32) -> bool {
    error.is_retryable() && delivery_count < max_deliveries
}

/// Classifies a *terminal* failure (one [`should_retry_locally`] already rejected) into
/// the ack/DLQ outcome per §7's error taxonomy.
pub fn classify_failure(error: &PipelineError) -> HandleOutcome {
    if error.is_ack_without_dlq() {
        return HandleOutcome::SkipAck;
    }
    HandleOutcome::Dlq {
        error_code: if error.is_retryable() { "transient_exhausted".to_string() } else { error.error_code().to_string() },
        payload_snippet: serde_json::json!({ "error": error.to_string() }),
    }
}

/// The full per-entry decision (§4.1, §7): policy denials skip without DLQ, retryable
/// errors under `max_deliveries` stay pending for redelivery via `claim_stale`, and
/// everything else (non-retryable, or retryable but exhausted) goes through
/// [`classify_failure`]. Every worker's `EventHandler::handle` should route its error
/// case through this instead of calling `classify_failure` directly, so that
/// `max_deliveries` is actually honored rather than DLQing on the first delivery.
pub fn classify_failure_with_retry(error: &PipelineError, delivery_count: u32, max_deliveries: u32) -> HandleOutcome {
    if error.is_ack_without_dlq() {
        return HandleOutcome::SkipAck;
    }
    if should_retry_locally(error, delivery_count, max_deliveries) {
        return HandleOutcome::Pending;
    }
    classify_failure(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_denied_skips_without_dlq() {
        let outcome = classify_failure(&PipelineError::policy_denied("quota"));
        assert!(matches!(outcome, HandleOutcome::SkipAck));
    }

    #[test]
    fn exhausted_transient_dlqs_with_transient_exhausted_code() {
        let outcome = classify_failure(&PipelineError::transient("timeout"));
        match outcome {
            HandleOutcome::Dlq { error_code, .. } => assert_eq!(error_code, "transient_exhausted"),
            _ => panic!("expected dlq"),
        }
    }

    #[test]
    fn bad_input_dlqs_immediately_with_bad_input_code() {
        let outcome = classify_failure(&PipelineError::permanent_input("bad schema"));
        match outcome {
            HandleOutcome::Dlq { error_code, .. } => assert_eq!(error_code, "bad_input"),
            _ => panic!("expected dlq"),
        }
    }

    #[test]
    fn retryable_error_under_delivery_cap_retries_locally() {
        assert!(should_retry_locally(&PipelineError::transient("timeout"), 1, 5));
        assert!(!should_retry_locally(&PipelineError::transient("timeout"), 5, 5));
        assert!(!should_retry_locally(&PipelineError::permanent_input("bad"), 1, 5));
    }

    #[test]
    fn classify_with_retry_leaves_transient_pending_under_the_cap() {
        let outcome = classify_failure_with_retry(&PipelineError::transient("timeout"), 1, 5);
        assert!(matches!(outcome, HandleOutcome::Pending));
    }

    #[test]
    fn classify_with_retry_dlqs_transient_once_deliveries_are_exhausted() {
        let outcome = classify_failure_with_retry(&PipelineError::transient("timeout"), 5, 5);
        match outcome {
            HandleOutcome::Dlq { error_code, .. } => assert_eq!(error_code, "transient_exhausted"),
            _ => panic!("expected dlq"),
        }
    }

    #[test]
    fn classify_with_retry_dlqs_bad_input_immediately_regardless_of_delivery_count() {
        let outcome = classify_failure_with_retry(&PipelineError::permanent_input("bad schema"), 1, 5);
        match outcome {
            HandleOutcome::Dlq { error_code, .. } => assert_eq!(error_code, "bad_input"),
            _ => panic!("expected dlq"),
        }
    }

    #[test]
    fn classify_with_retry_skips_policy_denied_without_dlq_regardless_of_delivery_count() {
        let outcome = classify_failure_with_retry(&PipelineError::policy_denied("quota"), 1, 5);
        assert!(matches!(outcome, HandleOutcome::SkipAck));
    }
}
