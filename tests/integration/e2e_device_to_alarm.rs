//! Spec §8 scenario 3 end to end: a device authenticates over TCP, sends a
//! smoke reading that matches a configured rule, and the resulting alarm
//! shows up on `alarm-events` — exercising the gateway's session layer
//! (§4.C), the pre-filter (§4.D), the stream evaluator (§4.G), and the
//! alarm producer (§4.I) as one pipeline instead of each in isolation.

use std::time::Duration;

use firewatch_core::{now_ms, DevStack, DevStackConfig};
use fw_protocol::{AlarmEvent, Operator, Severity};
use fw_queue::{Consumer, Topic};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

#[tokio::test]
async fn device_auth_then_smoke_reading_produces_a_high_severity_alarm() {
    let stack = DevStack::build(DevStackConfig::default());
    stack
        .rule_store
        .create(fw_test_utils::sample_rule("r1", "device-1", "smoke", Operator::Gt, 50.0, 60))
        .unwrap();
    let token = stack.issue_access_token("device-1").await;

    // Drive the stream-processor's evaluate/dedup/produce pipeline over
    // whatever the gateway forwards onto `sensor-data`, mirroring
    // `stream_processor::consumer_groups::spawn_normal_group` without its
    // multi-partition/backpressure machinery.
    let mut sensor_consumer = stack.sensor_data_topic.consumer("test-normal", 0);
    let pipeline = stack.pipeline.clone();
    let pipeline_task = tokio::spawn(async move {
        loop {
            let Ok(message) = sensor_consumer.recv().await else { break };
            let forwarded = serde_json::from_slice(&message.payload).expect("well-formed forwarded message");
            let _ = pipeline.process_message(forwarded, now_ms()).await;
            let _ = sensor_consumer.commit(&message).await;
        }
    });

    let bind_addr = free_addr().await;
    let gateway_config = device_gateway::GatewayConfig {
        bind_addr: bind_addr.clone(),
        idle_timeout: Duration::from_secs(10),
        max_pending_writes: 64,
        redis_url: "unused".to_string(),
        node_id: 1,
        sensor_data_partitions: 1,
    };
    let deps = stack.session_deps.clone();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let gateway_handle = tokio::spawn(device_gateway::run_gateway(gateway_config, deps, shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = TcpStream::connect(&bind_addr).await.expect("connect to gateway");
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(format!("{{\"type\":\"auth\",\"token\":\"{token}\"}}\n").as_bytes())
        .await
        .unwrap();
    let response = lines.next_line().await.unwrap().unwrap();
    assert!(response.contains("\"status\":\"success\""), "got: {response}");

    write_half
        .write_all(b"{\"type\":\"data\",\"readings\":[{\"type\":\"smoke\",\"value\":80.0,\"unit\":\"ppm\"}],\"timestamp\":1700000000000}\n")
        .await
        .unwrap();

    let mut alarm_consumer = stack.alarm_events_topic.consumer("test-alarm-reader", 0);
    let message = tokio::time::timeout(Duration::from_secs(2), alarm_consumer.recv())
        .await
        .expect("an alarm should be published within 2s")
        .unwrap();
    let alarm: AlarmEvent = serde_json::from_slice(&message.payload).unwrap();

    assert_eq!(alarm.device_id, "device-1");
    assert_eq!(alarm.severity, Severity::High);
    assert_eq!(alarm.alarm_type, "SMOKE");
    assert!(!alarm.acknowledged);
    assert!(!alarm.resolved);

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), gateway_handle).await;
    pipeline_task.abort();
}

#[tokio::test]
async fn a_trivial_followup_reading_is_suppressed_by_the_prefilter_before_it_ever_reaches_a_rule() {
    // Spec §8 scenario 2: identical temperature readings 2s apart never
    // reach the evaluator at all, so no rule -- however permissive -- would
    // fire a second time from the prefilter's perspective.
    let stack = DevStack::build(DevStackConfig::default());
    stack
        .rule_store
        .create(fw_test_utils::sample_rule("r1", "device-1", "temperature", Operator::Gt, 0.0, 0))
        .unwrap();
    let token = stack.issue_access_token("device-1").await;

    let mut sensor_consumer = stack.sensor_data_topic.consumer("test-normal", 0);
    let pipeline = stack.pipeline.clone();
    let pipeline_task = tokio::spawn(async move {
        loop {
            let Ok(message) = sensor_consumer.recv().await else { break };
            let forwarded = serde_json::from_slice(&message.payload).expect("well-formed forwarded message");
            let _ = pipeline.process_message(forwarded, now_ms()).await;
            let _ = sensor_consumer.commit(&message).await;
        }
    });

    let bind_addr = free_addr().await;
    let gateway_config = device_gateway::GatewayConfig {
        bind_addr: bind_addr.clone(),
        idle_timeout: Duration::from_secs(10),
        max_pending_writes: 64,
        redis_url: "unused".to_string(),
        node_id: 1,
        sensor_data_partitions: 1,
    };
    let deps = stack.session_deps.clone();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let gateway_handle = tokio::spawn(device_gateway::run_gateway(gateway_config, deps, shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = TcpStream::connect(&bind_addr).await.expect("connect to gateway");
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();
    write_half
        .write_all(format!("{{\"type\":\"auth\",\"token\":\"{token}\"}}\n").as_bytes())
        .await
        .unwrap();
    lines.next_line().await.unwrap().unwrap();

    write_half
        .write_all(b"{\"type\":\"data\",\"readings\":[{\"type\":\"temperature\",\"value\":25.0,\"unit\":\"C\"}],\"timestamp\":1700000000000}\n")
        .await
        .unwrap();
    write_half
        .write_all(b"{\"type\":\"data\",\"readings\":[{\"type\":\"temperature\",\"value\":25.0,\"unit\":\"C\"}],\"timestamp\":1700000002000}\n")
        .await
        .unwrap();

    let mut alarm_consumer = stack.alarm_events_topic.consumer("test-alarm-reader", 0);
    let first = tokio::time::timeout(Duration::from_secs(2), alarm_consumer.recv())
        .await
        .expect("the first reading should still alarm")
        .unwrap();
    let alarm: AlarmEvent = serde_json::from_slice(&first.payload).unwrap();
    assert_eq!(alarm.value, 25.0);

    let second = tokio::time::timeout(Duration::from_millis(500), alarm_consumer.recv()).await;
    assert!(second.is_err(), "the repeated reading should never have reached the evaluator");

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), gateway_handle).await;
    pipeline_task.abort();
}
