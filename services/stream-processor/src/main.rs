use std::sync::Arc;

use fw_dedup::redis_store::RedisDedupStore;
use fw_dedup::Deduplicator;
use fw_evaluator::Evaluator;
use fw_id::Allocator;
use fw_queue::Topic;
use fw_rules::RuleStore;
use stream_processor::alarm_producer::AlarmProducer;
use stream_processor::pipeline::Pipeline;
use stream_processor::storage_aggregator::LoggingAggregator;
use stream_processor::{spawn_consumer_groups, spawn_shutdown_signal, StreamProcessorConfig};

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

    let config = StreamProcessorConfig::from_env();

    let allocator = Arc::new(Allocator::new(config.node_id).unwrap_or_else(|e| {
        eprintln!("FATAL: could not start id allocator: {e}");
        std::process::exit(1);
    }));

    // Rule administration (create/update/delete) lives behind the admin
    // surface (non-goal); this process only evaluates against whatever
    // snapshot that surface has published into the shared rule store.
    let rule_store = Arc::new(RuleStore::new());
    let evaluator = Arc::new(Evaluator::new(rule_store.subscribe(), config.evaluator_epsilon));

    let dedup = if config.dedup_enabled {
        let store = RedisDedupStore::connect(&config.redis_url).await.unwrap_or_else(|e| {
            eprintln!("FATAL: could not connect to Redis at {}: {e}", config.redis_url);
            std::process::exit(1);
        });
        Some(Deduplicator::new(store, config.dedup_window_seconds))
    } else {
        None
    };

    let sensor_data_topic: Arc<dyn Topic> =
        Arc::from(build_topic(fw_queue::SENSOR_DATA_TOPIC, config.sensor_data_partitions));
    let alarm_events_topic: Arc<dyn Topic> =
        Arc::from(build_topic(fw_queue::ALARM_EVENTS_TOPIC, config.alarm_events_partitions));

    let alarm_producer = AlarmProducer::new(allocator.clone(), alarm_events_topic.producer());
    let pipeline = Arc::new(Pipeline::new(allocator, evaluator, dedup, alarm_producer));
    let aggregator = Arc::new(LoggingAggregator);

    let shutdown = spawn_shutdown_signal();
    let handles = spawn_consumer_groups(sensor_data_topic, pipeline, aggregator, &config, shutdown);

    for handle in handles {
        let _ = handle.await;
    }
}
