//! Wires Components F/G/H/I together: a forwarded message is split into its
//! component readings, each reading is ID-allocated and evaluated against
//! the current rule snapshot, surviving candidates are deduplicated by
//! fingerprint, and new ones are enriched and published as alarms.

use std::sync::Arc;

use fw_dedup::{DedupStore, Deduplicator};
use fw_evaluator::{Evaluator, ForwardedMessage};
use fw_id::Allocator;
use fw_protocol::Reading;
use thiserror::Error;

use crate::alarm_producer::{AlarmProducer, AlarmProducerError, READING_TYPE_ID};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("id allocation failed: {0}")]
    Id(#[from] fw_id::IdError),
    #[error(transparent)]
    AlarmProducer(#[from] AlarmProducerError),
}

pub struct Pipeline<S: DedupStore> {
    allocator: Arc<Allocator>,
    evaluator: Arc<Evaluator>,
    dedup: Option<Deduplicator<S>>,
    alarm_producer: AlarmProducer,
}

impl<S: DedupStore> Pipeline<S> {
    pub fn new(
        allocator: Arc<Allocator>,
        evaluator: Arc<Evaluator>,
        dedup: Option<Deduplicator<S>>,
        alarm_producer: AlarmProducer,
    ) -> Self {
        Self {
            allocator,
            evaluator,
            dedup,
            alarm_producer,
        }
    }

    /// Processes one forwarded message end to end. Every reading it carries
    /// is evaluated independently; a failure allocating an ID for one
    /// reading aborts the rest of this message's readings via `?` (spec §7:
    /// "errors abort that message only" — the failure does not cascade to
    /// other partitions or messages).
    pub async fn process_message(&self, message: ForwardedMessage, now_ms: i64) -> Result<u64, ProcessorError> {
        let mut alarms_emitted = 0;
        for raw in message.readings {
            let id = self.allocator.next(READING_TYPE_ID)?;
            let reading = Reading {
                id,
                device_id: message.device_id.clone(),
                sensor_type: raw.sensor_type,
                value: raw.value,
                unit: raw.unit,
                timestamp: message.device_timestamp,
                location: None,
                metadata: None,
                preprocessed_at: message.preprocessed_at,
            };

            for candidate in self.evaluator.evaluate(&reading, now_ms) {
                let is_new = match &self.dedup {
                    Some(dedup) => dedup.is_new(&candidate.fingerprint()).await,
                    None => true,
                };
                if !is_new {
                    tracing::debug!(fingerprint = %candidate.fingerprint(), "duplicate candidate suppressed");
                    continue;
                }
                self.alarm_producer.produce(candidate).await?;
                alarms_emitted += 1;
            }
        }
        Ok(alarms_emitted)
    }
}
