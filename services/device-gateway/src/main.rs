use std::sync::Arc;

use async_trait::async_trait;
use device_gateway::{run_gateway, session_deps, spawn_shutdown_signal, GatewayConfig};
use fw_auth::{DeviceDirectory, DeviceRecord, TokenValidator, TokenValidatorConfig};
use fw_evaluator::{PreFilter, PreFilterConfig};
use fw_queue::Topic;

/// Token issuance binds `(device_id, api_key)` to a fresh pair (spec §4.B);
/// that flow lives behind the external OAuth2/admin surface (spec §1
/// non-goals), not in this binary. The gateway only calls `validate`, which
/// never consults the directory, so a directory that issuance would need is
/// stubbed here rather than wired to a real device registry.
struct NoIssuanceDirectory;

#[async_trait]
impl DeviceDirectory for NoIssuanceDirectory {
    async fn lookup(&self, _device_id: &str) -> Option<DeviceRecord> {
        None
    }
}

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

    let config = GatewayConfig::from_env();

    let token_store = fw_auth::redis_store::RedisTokenStore::connect(&config.redis_url)
        .await
        .unwrap_or_else(|e| {
            eprintln!("FATAL: could not connect to Redis at {}: {e}", config.redis_url);
            std::process::exit(1);
        });
    let authenticator = Arc::new(TokenValidator::new(token_store, NoIssuanceDirectory, TokenValidatorConfig::default()));

    let status_store = Arc::new(
        device_gateway::device_status::redis_store::RedisDeviceStatusStore::connect(&config.redis_url)
            .await
            .unwrap_or_else(|e| {
                eprintln!("FATAL: could not connect to Redis at {}: {e}", config.redis_url);
                std::process::exit(1);
            }),
    );

    let pre_filter = Arc::new(PreFilter::new(PreFilterConfig::default()));

    let sensor_topic = build_topic(fw_queue::SENSOR_DATA_TOPIC, config.sensor_data_partitions);
    let status_topic = build_topic(fw_queue::DEVICE_STATUS_TOPIC, 1);

    let deps = session_deps(
        authenticator,
        status_store,
        pre_filter,
        sensor_topic.producer(),
        status_topic.producer(),
        &config,
    );

    let shutdown = spawn_shutdown_signal();
    if let Err(e) = run_gateway(config, deps, shutdown).await {
        eprintln!("FATAL: gateway exited with error: {e}");
        std::process::exit(1);
    }
}
