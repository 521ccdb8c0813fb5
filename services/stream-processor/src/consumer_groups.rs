//! Drives the two `sensor-data` consumer groups described in spec §4.E: a
//! normal group that runs the full evaluate/dedup/produce pipeline per
//! message with higher concurrency, and a backpressure group that batches
//! messages for storage-side aggregation at lower concurrency. Both groups
//! read the same topic independently, each with its own committed offsets
//! (spec §4.E: "one consumer group per concern").

use std::sync::Arc;
use std::time::Duration;

use fw_dedup::DedupStore;
use fw_evaluator::ForwardedMessage;
use fw_queue::{Consumer, Topic};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use crate::pipeline::Pipeline;
use crate::storage_aggregator::StorageAggregator;

pub const NORMAL_GROUP: &str = "stream-processor-normal";
pub const BACKPRESSURE_GROUP: &str = "stream-processor-backpressure";

/// Spawns one task per partition running the full per-message pipeline,
/// bounded overall by a semaphore sized `concurrency` so a burst on one
/// partition cannot starve the others.
pub fn spawn_normal_group<S: DedupStore + 'static>(
    topic: Arc<dyn Topic>,
    pipeline: Arc<Pipeline<S>>,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    (0..topic.partition_count())
        .map(|partition| {
            let mut consumer = topic.consumer(NORMAL_GROUP, partition);
            let pipeline = pipeline.clone();
            let semaphore = semaphore.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                        received = consumer.recv() => received,
                    };
                    let message = match message {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(partition, error = %e, "normal group recv failed");
                            continue;
                        }
                    };

                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                    let forwarded: ForwardedMessage = match serde_json::from_slice(&message.payload) {
                        Ok(forwarded) => forwarded,
                        Err(e) => {
                            warn!(partition, error = %e, "dropping malformed sensor-data message");
                            let _ = consumer.commit(&message).await;
                            drop(permit);
                            continue;
                        }
                    };

                    let now_ms = crate::now_ms();
                    match pipeline.process_message(forwarded, now_ms).await {
                        Ok(_) => {
                            if let Err(e) = consumer.commit(&message).await {
                                warn!(partition, error = %e, "commit failed");
                            }
                        }
                        Err(e) => {
                            // Neither `ProcessorError` variant is one of the spec's
                            // classified commit-through-failure errors (ProtocolError,
                            // RuleCompileError), so the offset is left uncommitted and
                            // the message is redelivered.
                            warn!(partition, error = %e, "message processing failed, leaving offset uncommitted for redelivery");
                        }
                    }
                    drop(permit);
                }
                debug!(partition, "normal group worker stopped");
            })
        })
        .collect()
}

/// Spawns one task per partition that accumulates messages into batches
/// (flushed at `batch_size` or `batch_interval`, whichever is first) and
/// hands each batch to the [`StorageAggregator`], bounded by a semaphore
/// sized `concurrency`.
pub fn spawn_backpressure_group(
    topic: Arc<dyn Topic>,
    aggregator: Arc<dyn StorageAggregator>,
    batch_size: usize,
    batch_interval: Duration,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    (0..topic.partition_count())
        .map(|partition| {
            let mut consumer = topic.consumer(BACKPRESSURE_GROUP, partition);
            let aggregator = aggregator.clone();
            let semaphore = semaphore.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut batch = Vec::with_capacity(batch_size);
                let mut committed = Vec::with_capacity(batch_size);
                let flush_deadline = tokio::time::sleep(batch_interval);
                tokio::pin!(flush_deadline);

                loop {
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                        () = &mut flush_deadline => {
                            flush_batch(&aggregator, &semaphore, &mut consumer, &mut batch, &mut committed).await;
                            flush_deadline.as_mut().reset(tokio::time::Instant::now() + batch_interval);
                        }
                        received = consumer.recv() => {
                            match received {
                                Ok(message) => {
                                    match serde_json::from_slice::<ForwardedMessage>(&message.payload) {
                                        Ok(forwarded) => {
                                            batch.push(forwarded);
                                            committed.push(message);
                                        }
                                        Err(e) => {
                                            warn!(partition, error = %e, "dropping malformed sensor-data message");
                                            let _ = consumer.commit(&message).await;
                                        }
                                    }
                                    if batch.len() >= batch_size {
                                        flush_batch(&aggregator, &semaphore, &mut consumer, &mut batch, &mut committed).await;
                                        flush_deadline.as_mut().reset(tokio::time::Instant::now() + batch_interval);
                                    }
                                }
                                Err(e) => warn!(partition, error = %e, "backpressure group recv failed"),
                            }
                        }
                    }
                }

                if !batch.is_empty() {
                    flush_batch(&aggregator, &semaphore, &mut consumer, &mut batch, &mut committed).await;
                }
                debug!(partition, "backpressure group worker stopped");
            })
        })
        .collect()
}

async fn flush_batch(
    aggregator: &Arc<dyn StorageAggregator>,
    semaphore: &Arc<Semaphore>,
    consumer: &mut Box<dyn Consumer>,
    batch: &mut Vec<ForwardedMessage>,
    committed: &mut Vec<fw_queue::Message>,
) {
    if batch.is_empty() {
        return;
    }
    let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
    match aggregator.aggregate(batch).await {
        Ok(()) => {
            for message in committed.drain(..) {
                if let Err(e) = consumer.commit(&message).await {
                    warn!(error = %e, "commit failed during batch flush");
                }
            }
        }
        Err(e) => {
            // Not one of the spec's classified commit-through-failure errors, so
            // the whole batch is left uncommitted and redelivered.
            warn!(error = %e, "storage aggregation failed, batch left uncommitted for redelivery");
            committed.clear();
        }
    }
    batch.clear();
    drop(permit);
}
