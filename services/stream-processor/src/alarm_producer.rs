//! Component I: the alarm producer (spec §4.I).
//!
//! Builds an [`AlarmEvent`] from a candidate alarm, allocating a fresh ID
//! (type=alarm) and publishing it to `alarm-events`, partitioned by
//! `device_id`.

use std::sync::Arc;

use fw_id::Allocator;
use fw_protocol::{format_iso8601, AlarmEvent, CandidateAlarm};
use fw_queue::{Producer, QueueError};
use thiserror::Error;

/// The allocator type-id reserved for alarm events. No registry of type-ids
/// exists elsewhere in the workspace; this is the only producer of IDs of
/// this type.
pub const ALARM_TYPE_ID: u8 = 1;
/// The allocator type-id reserved for enriched readings on their way into
/// the evaluator.
pub const READING_TYPE_ID: u8 = 0;

#[derive(Debug, Error)]
pub enum AlarmProducerError {
    #[error("id allocation failed: {0}")]
    Id(#[from] fw_id::IdError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct AlarmProducer {
    allocator: Arc<Allocator>,
    producer: Arc<dyn Producer>,
}

impl AlarmProducer {
    pub fn new(allocator: Arc<Allocator>, producer: Arc<dyn Producer>) -> Self {
        Self { allocator, producer }
    }

    /// Enriches `candidate` into an [`AlarmEvent`] and publishes it keyed by
    /// `device_id`. Location tags are copied from the rule match (carried on
    /// the candidate); `acknowledged`/`resolved` start false (spec §4.I).
    pub async fn produce(&self, candidate: CandidateAlarm) -> Result<AlarmEvent, AlarmProducerError> {
        let id = self.allocator.next(ALARM_TYPE_ID)?;
        let alarm = AlarmEvent {
            id,
            device_id: candidate.device_id.clone(),
            alarm_type: candidate.alarm_type,
            severity: candidate.severity,
            value: candidate.value,
            unit: candidate.unit,
            timestamp: format_iso8601(candidate.timestamp),
            location: candidate.location.unwrap_or_default(),
            acknowledged: false,
            resolved: false,
            notes: None,
            metadata: candidate.metadata,
        };

        let payload = serde_json::to_vec(&alarm).expect("AlarmEvent always serializes");
        self.producer.send(&alarm.device_id, payload).await?;
        Ok(alarm)
    }
}
