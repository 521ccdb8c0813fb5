//! All-in-one development binary: runs the device gateway, stream
//! processor, and alarm distributor in a single process against the
//! in-process/in-memory stack assembled by [`firewatch_core::DevStack`].
//! Production deployments run the three services (`device-gateway`,
//! `stream-processor`, `alarm-distributor`) as independent binaries against
//! Kafka and Redis instead — see each service's own `main.rs`.

use std::sync::Arc;

use firewatch_core::{spawn_shutdown_signal, DevStack, DevStackConfig};
use fw_queue::{Consumer, Topic};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let bind_addr = std::env::var("GATEWAY_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:7000".to_string());
    let http_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8081".to_string());

    let stack = DevStack::build(DevStackConfig::default());
    let shutdown = spawn_shutdown_signal();

    let mut sensor_consumer = stack.sensor_data_topic.consumer("dev-normal", 0);
    let pipeline = stack.pipeline.clone();
    let pipeline_shutdown = shutdown.clone();
    let pipeline_task = tokio::spawn(async move {
        let mut shutdown = pipeline_shutdown;
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => if *shutdown.borrow() { break } else { continue },
                received = sensor_consumer.recv() => received,
            };
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "sensor-data recv failed");
                    continue;
                }
            };
            match serde_json::from_slice(&message.payload) {
                Ok(forwarded) => {
                    if let Err(e) = pipeline.process_message(forwarded, firewatch_core::now_ms()).await {
                        warn!(error = %e, "pipeline processing failed");
                    }
                }
                Err(e) => warn!(error = %e, "dropping malformed sensor-data message"),
            }
            let _ = sensor_consumer.commit(&message).await;
        }
    });

    let mut alarm_consumer_rx = stack.alarm_events_topic.consumer("dev-alarm-consumer", 0);
    let alarm_consumer = stack.alarm_consumer.clone();
    let alarm_shutdown = shutdown.clone();
    let alarm_task = tokio::spawn(async move {
        let mut shutdown = alarm_shutdown;
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => if *shutdown.borrow() { break } else { continue },
                received = alarm_consumer_rx.recv() => received,
            };
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "alarm-events recv failed");
                    continue;
                }
            };
            match serde_json::from_slice(&message.payload) {
                Ok(alarm) => {
                    if let Err(e) = alarm_consumer.consume(alarm, firewatch_core::now_ms()).await {
                        warn!(error = %e, "alarm consumption failed");
                    }
                }
                Err(e) => warn!(error = %e, "dropping malformed alarm-events message"),
            }
            let _ = alarm_consumer_rx.commit(&message).await;
        }
    });

    let gateway_deps = stack.session_deps.clone();
    let gateway_config = device_gateway::GatewayConfig {
        bind_addr: bind_addr.clone(),
        idle_timeout: std::time::Duration::from_secs(10),
        max_pending_writes: 64,
        redis_url: "unused".to_string(),
        node_id: 1,
        sensor_data_partitions: 1,
    };
    let gateway_shutdown = shutdown.clone();
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = device_gateway::run_gateway(gateway_config, gateway_deps, gateway_shutdown).await {
            warn!(error = %e, "gateway exited with error");
        }
    });

    let state = alarm_distributor::AppState {
        history: stack.history.clone(),
        sync: stack.sync.clone(),
        metrics: Arc::new(alarm_distributor::DistributorMetrics::default()),
    };
    let router = alarm_distributor::build_router(state);
    let listener = match tokio::net::TcpListener::bind(&http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: could not bind http surface at {http_addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(gateway_addr = %bind_addr, http_addr = %http_addr, "firewatch-core dev stack listening");

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                eprintln!("FATAL: http server exited with error: {e}");
                std::process::exit(1);
            }
        }
        _ = gateway_task => {}
    }

    let _ = pipeline_task.await;
    let _ = alarm_task.await;
}
