//! Components F/G/H/I: the stream processor. Consumes `sensor-data`,
//! evaluates readings against the live rule snapshot, deduplicates
//! candidates, and publishes confirmed alarms to `alarm-events`.

pub mod alarm_producer;
pub mod config;
pub mod consumer_groups;
pub mod pipeline;
pub mod storage_aggregator;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fw_dedup::DedupStore;
use fw_queue::Topic;
use tokio::sync::watch;

pub use alarm_producer::AlarmProducer;
pub use config::StreamProcessorConfig;
pub use pipeline::Pipeline;
pub use storage_aggregator::StorageAggregator;

/// Current wall-clock time in epoch milliseconds, the clock source every
/// window/rate calculation in the evaluator and dedup layers is driven from.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_millis() as i64
}

/// Installs a `ctrl_c` listener that flips `shutdown` once, matching the
/// two-phase drain every service binary in this workspace performs.
pub fn spawn_shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

/// Spawns both consumer groups against `sensor_data_topic` and returns every
/// worker's join handle so the caller can await a clean drain on shutdown.
pub fn spawn_consumer_groups<S: DedupStore + 'static>(
    sensor_data_topic: Arc<dyn Topic>,
    pipeline: Arc<Pipeline<S>>,
    aggregator: Arc<dyn StorageAggregator>,
    config: &StreamProcessorConfig,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = consumer_groups::spawn_normal_group(
        sensor_data_topic.clone(),
        pipeline,
        config.normal_concurrency,
        shutdown.clone(),
    );
    handles.extend(consumer_groups::spawn_backpressure_group(
        sensor_data_topic,
        aggregator,
        config.backpressure_batch_size,
        config.backpressure_batch_interval,
        config.backpressure_concurrency,
        shutdown,
    ));
    handles
}
