use std::sync::Arc;

use alarm_distributor::sinks::TopicSnapshotPublisher;
use alarm_distributor::state::{AppState, DistributorMetrics};
use alarm_distributor::{
    build_distributor, build_router, spawn_alarm_consumer, spawn_shutdown_signal, spawn_snapshot_broadcaster,
    AlarmConsumer, AlarmDistributorConfig,
};
use fw_history::redis_store::RedisHistoryBackend;
use fw_history::{HistoryStore, HistoryStoreConfig};
use fw_hotspot::redis_store::RedisHotspotStore;
use fw_hotspot::{HotspotPrimitives, HotspotPrimitivesConfig, NoopPublisher};
use fw_queue::Topic;
use fw_sync::{SyncService, SyncServiceConfig};

#[cfg(feature = "kafka")]
fn build_topic(name: &str, partitions: u32) -> Box<dyn Topic> {
    let brokers = std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
    Box::new(fw_queue::kafka::KafkaTopic::new(name, brokers, partitions))
}

#[cfg(not(feature = "kafka"))]
fn build_topic(_name: &str, partitions: u32) -> Box<dyn Topic> {
    Box::new(fw_queue::in_process::InProcessTopic::new(partitions))
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AlarmDistributorConfig::from_env();

    let history_backend = RedisHistoryBackend::connect(&config.redis_url).await.unwrap_or_else(|e| {
        eprintln!("FATAL: could not connect to Redis at {}: {e}", config.redis_url);
        std::process::exit(1);
    });
    let history = Arc::new(HistoryStore::new(
        history_backend,
        HistoryStoreConfig {
            retention_ms: config.history_retention_ms(),
            fallback_capacity: config.history_fallback_capacity,
        },
    ));

    let hotspot_store = RedisHotspotStore::connect(&config.redis_url).await.unwrap_or_else(|e| {
        eprintln!("FATAL: could not connect to Redis at {}: {e}", config.redis_url);
        std::process::exit(1);
    });
    let hotspot = Arc::new(HotspotPrimitives::new(
        hotspot_store,
        NoopPublisher,
        HotspotPrimitivesConfig {
            lock_wait: config.suppression_lock_wait,
            auto_expire_ceiling_ms: config.suppression_auto_expire_ms(),
        },
    ));

    let sync = Arc::new(SyncService::new(SyncServiceConfig {
        buffer_capacity: 10_000,
        max_events_per_snapshot: config.sync_max_events_per_snapshot,
        snapshot_interval_ms: config.sync_snapshot_interval_seconds * 1000,
    }));

    let alarm_events_topic: Arc<dyn Topic> =
        Arc::from(build_topic(fw_queue::ALARM_EVENTS_TOPIC, config.alarm_events_partitions));
    let websocket_topic: Arc<dyn Topic> = Arc::from(build_topic("websocket-alarms", 1));
    let pubsub_topic: Arc<dyn Topic> = Arc::from(build_topic("pubsub-alarms", 1));
    let snapshot_topic: Arc<dyn Topic> = Arc::from(build_topic("snapshot", 1));

    let distributor = Arc::new(build_distributor(
        history.clone(),
        websocket_topic.producer(),
        pubsub_topic.producer(),
        sync.clone(),
        &config,
    ));

    let active_alarms = Arc::new(alarm_distributor::active_alarms::ActiveAlarmIndex::new());
    let alarm_consumer = Arc::new(AlarmConsumer::new(active_alarms, hotspot, distributor));

    let metrics = Arc::new(DistributorMetrics::default());
    let shutdown = spawn_shutdown_signal();

    let mut handles = spawn_alarm_consumer(alarm_events_topic, alarm_consumer, metrics.clone(), shutdown.clone());
    handles.push(spawn_snapshot_broadcaster(
        sync.clone(),
        Arc::new(TopicSnapshotPublisher::new(snapshot_topic.producer())),
        std::time::Duration::from_secs(config.sync_broadcast_interval_seconds),
        shutdown.clone(),
    ));

    let state = AppState {
        history,
        sync,
        metrics,
    };
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.unwrap_or_else(|e| {
        eprintln!("FATAL: could not bind {}: {e}", config.bind_addr);
        std::process::exit(1);
    });
    tracing::info!(addr = %config.bind_addr, "alarm distributor http surface listening");

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                eprintln!("FATAL: http server exited with error: {e}");
                std::process::exit(1);
            }
        }
        _ = async {
            for handle in handles {
                let _ = handle.await;
            }
        } => {}
    }
}
