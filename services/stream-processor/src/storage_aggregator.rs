//! The backpressure group's batch sink (spec §4.E: "a backpressure group
//! with lower concurrency and batch delivery for storage-side
//! aggregation"). No dedicated raw-reading storage component exists in this
//! deployment, so the aggregator is an injectable seam: production wiring
//! can later point it at a warehouse sink without touching the consumer
//! loop that drives it.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use fw_evaluator::ForwardedMessage;

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("storage aggregation failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait StorageAggregator: Send + Sync {
    /// Receives one batch accumulated by the backpressure consumer group
    /// (bounded by size or by a flush interval, whichever comes first).
    async fn aggregate(&self, batch: &[ForwardedMessage]) -> Result<(), AggregatorError>;
}

/// Logs batch sizes and drops them. Stands in until a real warehouse/archival
/// sink is wired up; keeps the backpressure group's flush cadence observable
/// in the meantime.
#[derive(Debug, Default)]
pub struct LoggingAggregator;

#[async_trait]
impl StorageAggregator for LoggingAggregator {
    async fn aggregate(&self, batch: &[ForwardedMessage]) -> Result<(), AggregatorError> {
        let readings: usize = batch.iter().map(|m| m.readings.len()).sum();
        debug!(messages = batch.len(), readings, "storage aggregation batch flushed");
        Ok(())
    }
}
