//! Components J/K/N: the alarm distributor. Consumes `alarm-events`, runs
//! suppression and the active-alarms index, fans each alarm out to four
//! sinks, and hosts the Sync Service plus a small HTTP surface for history
//! reads, the availability probe, and metrics.

pub mod active_alarms;
pub mod alarm_consumer;
pub mod config;
pub mod history_facade;
pub mod http;
pub mod sinks;
pub mod state;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use fw_distributor::{decorators::harden, Distributor, Sink};
use fw_hotspot::{HotspotStore, SuppressionEventPublisher};
use fw_queue::{Consumer, Topic};
use fw_sync::SyncService;
use tokio::sync::watch;
use tracing::warn;

pub use alarm_consumer::AlarmConsumer;
pub use config::AlarmDistributorConfig;
pub use state::{AppState, DistributorMetrics};

use sinks::{HistorySink, PubSubSink, SyncSink, WebsocketSink};

pub const ALARM_CONSUMER_GROUP: &str = "alarm-distributor";

/// Wraps every raw sink in the same retry/circuit/bulkhead/timeout decorator
/// stack (spec §4.K), built from `config`'s `distributor.*` keys.
pub fn harden_sink(inner: Box<dyn Sink>, config: &AlarmDistributorConfig) -> Arc<dyn Sink> {
    Arc::from(harden(
        inner,
        config.distributor_retry_max_attempts,
        Duration::from_millis(config.distributor_retry_backoff_ms),
        Duration::from_millis(config.distributor_retry_max_backoff_ms),
        config.distributor_circuit_failure_threshold,
        Duration::from_millis(config.distributor_circuit_cooldown_ms),
        config.distributor_bulkhead_concurrency,
    ))
}

/// Builds the Distributor (spec §4.K) from its four sinks, each wrapped in
/// the shared decorator stack.
pub fn build_distributor<B: fw_history::HistoryBackend + 'static>(
    history: Arc<fw_history::HistoryStore<B>>,
    websocket_producer: Arc<dyn fw_queue::Producer>,
    pubsub_producer: Arc<dyn fw_queue::Producer>,
    sync: Arc<SyncService>,
    config: &AlarmDistributorConfig,
) -> Distributor {
    let sinks: Vec<Arc<dyn Sink>> = vec![
        harden_sink(Box::new(HistorySink::new(history)), config),
        harden_sink(Box::new(WebsocketSink::new(websocket_producer)), config),
        harden_sink(Box::new(PubSubSink::new(pubsub_producer)), config),
        harden_sink(Box::new(SyncSink::new(sync)), config),
    ];
    Distributor::new(sinks, Duration::from_millis(config.distributor_per_sink_deadline_ms))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(http::health::healthz))
        .route("/metrics", get(http::metrics::get_metrics))
        .route("/alarms/recent", get(http::history::recent))
        .route("/alarms/window", get(http::history::in_window))
        .route("/alarms/page", get(http::history::page))
        .route("/alarms/cursor", get(http::history::cursor))
        .route("/alarms/device/:device_id", get(http::history::by_device))
        .route("/alarms/severity/:severity", get(http::history::by_severity))
        .route("/alarms/type/:alarm_type", get(http::history::by_type))
        .with_state(state)
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

/// Drives the `alarm-events` consumer loop (spec §4.J/§5: "one consumer
/// loop per partition per group"), committing only after the alarm has
/// been fully handed to the distributor.
pub fn spawn_alarm_consumer<S: HotspotStore + 'static, P: SuppressionEventPublisher + 'static>(
    topic: Arc<dyn Topic>,
    consumer: Arc<AlarmConsumer<S, P>>,
    metrics: Arc<DistributorMetrics>,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..topic.partition_count())
        .map(|partition| {
            let mut queue_consumer = topic.consumer(ALARM_CONSUMER_GROUP, partition);
            let consumer = consumer.clone();
            let metrics = metrics.clone();
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
                        received = queue_consumer.recv() => received,
                    };
                    let message = match message {
                        Ok(message) => message,
                        Err(e) => {
                            warn!(partition, error = %e, "alarm consumer recv failed");
                            continue;
                        }
                    };

                    match serde_json::from_slice::<fw_protocol::AlarmEvent>(&message.payload) {
                        Ok(alarm) => {
                            let now_ms = now_ms();
                            if let Err(e) = consumer.consume(alarm, now_ms).await {
                                warn!(partition, error = %e, "alarm consumption failed, not retried");
                            }
                            metrics.alarms_consumed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => warn!(partition, error = %e, "dropping malformed alarm-events message"),
                    }

                    if let Err(e) = queue_consumer.commit(&message).await {
                        warn!(partition, error = %e, "commit failed");
                    }
                }
            })
        })
        .collect()
}

/// Periodically pushes a bounded snapshot to the `snapshot` topic for
/// bootstrapping dashboard joiners (spec §4.N).
pub fn spawn_snapshot_broadcaster(
    sync: Arc<SyncService>,
    publisher: Arc<dyn fw_sync::SnapshotPublisher>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    sync.broadcast_snapshot(publisher.as_ref()).await;
                }
            }
        }
    })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_millis() as i64
}
