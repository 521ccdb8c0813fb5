//! Component C: the per-connection session loop (spec §4.C).
//!
//! State machine: `Handshake` (first frame must be `auth`) -> `Authenticated`
//! (heartbeats refresh liveness, data forwards through the pre-filter onto
//! `sensor-data`) -> `Closing` (idle timeout, preemption by a newer session
//! for the same device, or the peer closing the connection). Writes go
//! through a bounded channel drained by a dedicated writer task; a slow
//! consumer that lets the channel fill is disconnected rather than let the
//! session block on socket backpressure (spec §5).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fw_evaluator::PreFilter;
use fw_protocol::{
    format_iso8601, AuthResponse, AuthStatus, DeviceMessage, DeviceStatusEvent, HeartbeatResponse, ServerMessage,
};
use fw_queue::Producer;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::auth::DeviceAuthenticator;
use crate::device_status::{publish_status_event, DeviceStatusStore};
use crate::session_registry::SessionRegistry;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("auth failed: {0}")]
    AuthFailed(String),
    #[error("idle timeout")]
    IdleTimeout,
    #[error("preempted by a newer session for this device")]
    Preempted,
    #[error("send queue overflowed")]
    SendQueueOverflow,
}

/// Everything the session loop needs, shared across every connection the
/// gateway serves. Cheap to clone (everything inside is an `Arc`).
#[derive(Clone)]
pub struct SessionDeps {
    pub authenticator: Arc<dyn DeviceAuthenticator>,
    pub status_store: Arc<dyn DeviceStatusStore>,
    pub registry: Arc<SessionRegistry>,
    pub pre_filter: Arc<PreFilter>,
    pub sensor_data_producer: Arc<dyn Producer>,
    pub status_producer: Arc<dyn Producer>,
    pub idle_timeout: Duration,
    pub max_pending_writes: usize,
    pub status_ttl: Duration,
}

/// Runs one device connection to completion. Never panics the caller's task
/// on a protocol violation or I/O error; the error is returned for the
/// caller to log, matching the contract the stream processor's consumer
/// loops use for per-message failures.
pub async fn run_session<IO>(io: IO, deps: SessionDeps) -> Result<(), SessionError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(io);
    let mut lines = BufReader::new(read_half).lines();

    let (write_tx, write_rx) = mpsc::channel::<String>(deps.max_pending_writes);
    let writer_task = tokio::spawn(run_writer(write_half, write_rx));

    let result = handshake_then_serve(&mut lines, &write_tx, &deps).await;

    drop(write_tx);
    let _ = writer_task.await;
    result
}

async fn run_writer<W: AsyncWrite + Unpin>(mut write_half: W, mut write_rx: mpsc::Receiver<String>) {
    while let Some(line) = write_rx.recv().await {
        if write_half.write_all(line.as_bytes()).await.is_err() {
            break;
        }
        if write_half.write_all(b"\n").await.is_err() {
            break;
        }
    }
}

/// Enqueues `message` for the writer task. Uses `try_send` rather than
/// `send` so a backed-up consumer overflows the bounded queue instead of
/// suspending the whole session on socket backpressure (spec §5).
async fn send_line(write_tx: &mpsc::Sender<String>, message: &ServerMessage) -> Result<(), SessionError> {
    let line = serde_json::to_string(message).expect("ServerMessage always serializes");
    write_tx.try_send(line).map_err(|_| SessionError::SendQueueOverflow)
}

async fn handshake_then_serve<R: AsyncRead + Unpin>(
    lines: &mut Lines<BufReader<R>>,
    write_tx: &mpsc::Sender<String>,
    deps: &SessionDeps,
) -> Result<(), SessionError> {
    let first = tokio::time::timeout(deps.idle_timeout, lines.next_line())
        .await
        .map_err(|_| SessionError::IdleTimeout)??
        .ok_or_else(|| SessionError::Protocol("connection closed before auth".to_string()))?;

    let message: DeviceMessage = serde_json::from_str(&first)
        .map_err(|e| SessionError::Protocol(format!("malformed handshake frame: {e}")))?;

    let DeviceMessage::Auth(auth) = message else {
        let _ = send_line(
            write_tx,
            &ServerMessage::AuthResponse(AuthResponse {
                status: AuthStatus::Failure,
                reason: Some("first message must be auth".to_string()),
            }),
        )
        .await;
        return Err(SessionError::Protocol("first message must be auth".to_string()));
    };

    let device_id = match deps.authenticator.validate(&auth.token).await {
        Ok(device_id) => device_id,
        Err(e) => {
            let _ = send_line(
                write_tx,
                &ServerMessage::AuthResponse(AuthResponse {
                    status: AuthStatus::Failure,
                    reason: Some(e.to_string()),
                }),
            )
            .await;
            return Err(SessionError::AuthFailed(e.to_string()));
        }
    };

    send_line(
        write_tx,
        &ServerMessage::AuthResponse(AuthResponse {
            status: AuthStatus::Success,
            reason: None,
        }),
    )
    .await?;

    let (generation, mut preempt_rx) = deps.registry.register(&device_id);
    enter_authenticated(&device_id, deps).await;
    info!(device_id = %device_id, "session authenticated");

    let result = serve_authenticated(lines, write_tx, deps, &device_id, &mut preempt_rx).await;

    deps.registry.unregister(&device_id, generation);
    leave_authenticated(&device_id, deps).await;
    info!(device_id = %device_id, result = ?result, "session closed");

    result
}

async fn serve_authenticated<R: AsyncRead + Unpin>(
    lines: &mut Lines<BufReader<R>>,
    write_tx: &mpsc::Sender<String>,
    deps: &SessionDeps,
    device_id: &str,
    preempt_rx: &mut oneshot::Receiver<()>,
) -> Result<(), SessionError> {
    loop {
        tokio::select! {
            biased;
            _ = &mut *preempt_rx => {
                return Err(SessionError::Preempted);
            }
            line = tokio::time::timeout(deps.idle_timeout, lines.next_line()) => {
                let line = match line {
                    Err(_) => return Err(SessionError::IdleTimeout),
                    Ok(Err(e)) => return Err(SessionError::Io(e)),
                    Ok(Ok(None)) => return Ok(()),
                    Ok(Ok(Some(line))) => line,
                };
                handle_line(&line, write_tx, deps, device_id).await?;
            }
        }
    }
}

async fn handle_line(
    line: &str,
    write_tx: &mpsc::Sender<String>,
    deps: &SessionDeps,
    device_id: &str,
) -> Result<(), SessionError> {
    let message: DeviceMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => return Err(SessionError::Protocol(format!("malformed frame: {e}"))),
    };

    match message {
        DeviceMessage::Auth(_) => {
            // A second auth on an already-authenticated connection is a
            // protocol violation; the "second auth for the same device"
            // case in spec §4.C is handled by the registry preempting the
            // *prior connection*, not by accepting a mid-stream re-auth here.
            Err(SessionError::Protocol("unexpected auth on an authenticated session".to_string()))
        }
        DeviceMessage::Heartbeat(_) => {
            send_line(
                write_tx,
                &ServerMessage::HeartbeatResponse(HeartbeatResponse {
                    timestamp: format_iso8601(now_epoch_ms()),
                }),
            )
            .await?;
            refresh_liveness(device_id, deps).await;
            Ok(())
        }
        DeviceMessage::Data(data) => {
            if let Some(forwarded) = deps.pre_filter.process(device_id, data.readings, data.timestamp) {
                let payload = serde_json::to_vec(&forwarded).expect("ForwardedMessage always serializes");
                if let Err(e) = deps.sensor_data_producer.send(device_id, payload).await {
                    warn!(device_id = %device_id, error = %e, "failed to publish to sensor-data");
                }
            }
            refresh_liveness(device_id, deps).await;
            Ok(())
        }
    }
}

async fn enter_authenticated(device_id: &str, deps: &SessionDeps) {
    let now_ms = now_epoch_ms();
    if let Err(e) = deps.status_store.set_connected(device_id, now_ms, deps.status_ttl).await {
        warn!(device_id = %device_id, error = %e, "device status store unavailable");
    }
    let event = DeviceStatusEvent::connected(device_id, now_ms);
    if let Err(e) = publish_status_event(deps.status_producer.as_ref(), &event).await {
        warn!(device_id = %device_id, error = %e, "failed to publish device status event");
    }
}

async fn refresh_liveness(device_id: &str, deps: &SessionDeps) {
    if let Err(e) = deps.status_store.set_connected(device_id, now_epoch_ms(), deps.status_ttl).await {
        warn!(device_id = %device_id, error = %e, "device status store unavailable");
    }
}

async fn leave_authenticated(device_id: &str, deps: &SessionDeps) {
    if let Err(e) = deps.status_store.set_disconnected(device_id).await {
        warn!(device_id = %device_id, error = %e, "device status store unavailable");
    }
    let event = DeviceStatusEvent::disconnected(device_id);
    if let Err(e) = publish_status_event(deps.status_producer.as_ref(), &event).await {
        warn!(device_id = %device_id, error = %e, "failed to publish device status event");
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}
