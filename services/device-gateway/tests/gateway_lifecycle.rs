//! End-to-end coverage of the gateway's accept loop against a real TCP
//! socket: a device connects, authenticates, sends data, and the gateway
//! drains cleanly on shutdown (spec §5's two-phase drain).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use device_gateway::device_status::InMemoryDeviceStatusStore;
use device_gateway::{run_gateway, session_deps, GatewayConfig};
use fw_auth::AuthError;
use fw_evaluator::{PreFilter, PreFilterConfig};
use fw_queue::in_process::InProcessTopic;
use fw_queue::Topic;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;

struct FakeAuthenticator;

#[async_trait]
impl device_gateway::auth::DeviceAuthenticator for FakeAuthenticator {
    async fn validate(&self, access_token: &str) -> Result<String, AuthError> {
        if access_token == "T1" {
            Ok("device-1".to_string())
        } else {
            Err(AuthError::TokenExpired)
        }
    }
}

async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

#[tokio::test]
async fn device_authenticates_sends_data_and_gateway_drains_on_shutdown() {
    let bind_addr = free_addr().await;
    let config = GatewayConfig {
        bind_addr: bind_addr.clone(),
        idle_timeout: Duration::from_secs(5),
        max_pending_writes: 16,
        redis_url: "unused".to_string(),
        node_id: 1,
        sensor_data_partitions: 1,
    };

    let sensor_topic = InProcessTopic::new(1);
    let mut sensor_consumer = sensor_topic.consumer("normal", 0);
    let status_topic = InProcessTopic::new(1);

    let deps = session_deps(
        Arc::new(FakeAuthenticator),
        Arc::new(InMemoryDeviceStatusStore::default()),
        Arc::new(PreFilter::new(PreFilterConfig::default())),
        sensor_topic.producer(),
        status_topic.producer(),
        &config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gateway_handle = tokio::spawn(run_gateway(config, deps, shutdown_rx));

    // Give the listener a moment to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = TcpStream::connect(&bind_addr).await.expect("connect to gateway");
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    write_half.write_all(b"{\"type\":\"auth\",\"token\":\"T1\"}\n").await.unwrap();
    let response = lines.next_line().await.unwrap().unwrap();
    assert!(response.contains("\"status\":\"success\""));

    write_half
        .write_all(b"{\"type\":\"data\",\"readings\":[{\"type\":\"temperature\",\"value\":30.0,\"unit\":\"C\"}],\"timestamp\":1700000000000}\n")
        .await
        .unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(2), sensor_consumer.recv())
        .await
        .expect("sensor-data message")
        .unwrap();
    assert_eq!(msg.key, "device-1");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), gateway_handle)
        .await
        .expect("gateway should drain and exit")
        .unwrap()
        .unwrap();
}
