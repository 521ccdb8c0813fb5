//! Component C: the device gateway. Accepts authenticated device TCP
//! connections, runs the auth/heartbeat/data state machine described in
//! spec §4.C per connection, and publishes pre-filtered readings onto the
//! `sensor-data` topic.

pub mod auth;
pub mod config;
pub mod device_status;
pub mod session;
pub mod session_registry;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use config::GatewayConfig;
pub use session::{SessionDeps, SessionError};
pub use session_registry::SessionRegistry;

/// Accepts connections on `config.bind_addr` until `shutdown` fires, then
/// stops accepting new work and waits for in-flight sessions to finish
/// (spec §5's two-phase drain). Each accepted connection is served by
/// [`session::run_session`] on its own task.
pub async fn run_gateway(
    config: GatewayConfig,
    deps: SessionDeps,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "device gateway listening");

    let mut in_flight = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(?peer, "device connected");
                        let deps = deps.clone();
                        in_flight.push(tokio::spawn(async move {
                            if let Err(e) = session::run_session(stream, deps).await {
                                debug!(?peer, error = %e, "session ended");
                            }
                        }));
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                }
            }
        }
    }

    info!(in_flight = in_flight.len(), "draining in-flight sessions");
    for task in in_flight {
        let _ = task.await;
    }
    Ok(())
}

/// Installs a `ctrl_c` listener that flips `shutdown` once, matching the
/// two-phase drain every service binary performs (spec §12).
pub fn spawn_shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

/// Convenience constructor bundling an `Arc<dyn DeviceAuthenticator>`,
/// device-status store, and queue producers into [`SessionDeps`], used by
/// both `main.rs` and the root dev binary.
pub fn session_deps(
    authenticator: Arc<dyn auth::DeviceAuthenticator>,
    status_store: Arc<dyn device_status::DeviceStatusStore>,
    pre_filter: Arc<fw_evaluator::PreFilter>,
    sensor_data_producer: Arc<dyn fw_queue::Producer>,
    status_producer: Arc<dyn fw_queue::Producer>,
    config: &GatewayConfig,
) -> SessionDeps {
    SessionDeps {
        authenticator,
        status_store,
        registry: Arc::new(SessionRegistry::new()),
        pre_filter,
        sensor_data_producer,
        status_producer,
        idle_timeout: config.idle_timeout,
        max_pending_writes: config.max_pending_writes,
        status_ttl: config.device_status_ttl(),
    }
}
