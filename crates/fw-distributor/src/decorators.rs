//! Composable `Sink` decorators (spec §4.K, §9): retry, circuit breaker,
//! bulkhead, and timeout, each wrapping an inner [`Sink`] and returning a
//! `Sink` with the additional behavior. The Distributor composes all four
//! around every sink in the order retry(circuit(bulkhead(timeout(inner)))),
//! matching the bullet order spec §4.K lists them in.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fw_protocol::retry::full_jitter_backoff;
use fw_protocol::AlarmEvent;

use crate::{Sink, SinkError};

/// Wraps `inner` with bounded-attempt exponential backoff and full jitter.
pub struct RetrySink {
    inner: Box<dyn Sink>,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetrySink {
    pub fn new(
        inner: Box<dyn Sink>,
        max_attempts: u32,
        base_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff,
        }
    }
}

#[async_trait]
impl Sink for RetrySink {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, alarm: &AlarmEvent, deadline: Duration) -> Result<(), SinkError> {
        let mut last_error = None;
        for attempt in 0..self.max_attempts {
            match self.inner.send(alarm, deadline).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last_error = Some(err);
                    if attempt + 1 < self.max_attempts {
                        let delay = full_jitter_backoff(
                            attempt,
                            self.base_backoff.as_millis() as u64,
                            self.max_backoff.as_millis() as u64,
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(SinkError::RetryExhausted {
            sink: self.name().to_string(),
            attempts: self.max_attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Rolling failure-rate circuit breaker: opens once `failure_threshold`
/// consecutive failures accumulate within `window`, half-opens after
/// `cooldown` to probe with a single trial call.
pub struct CircuitBreakerSink {
    inner: Box<dyn Sink>,
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<CircuitState>,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreakerSink {
    pub fn new(inner: Box<dyn Sink>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(CircuitState::Closed),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.state.lock().unwrap() = CircuitState::Closed;
        *self.opened_at.lock().unwrap() = None;
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            *self.state.lock().unwrap() = CircuitState::Open;
            *self.opened_at.lock().unwrap() = Some(Instant::now());
        }
    }

    /// Returns whether a call should proceed, transitioning Open to
    /// HalfOpen once the cooldown has elapsed.
    fn admit(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .unwrap()
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.cooldown {
                    *state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[async_trait]
impl Sink for CircuitBreakerSink {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, alarm: &AlarmEvent, deadline: Duration) -> Result<(), SinkError> {
        if !self.admit() {
            return Err(SinkError::CircuitOpen(self.name().to_string()));
        }
        match self.inner.send(alarm, deadline).await {
            Ok(()) => {
                self.record_success();
                Ok(())
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

/// Bounds concurrent in-flight calls to `inner` so one slow sink can't
/// starve the worker pool (head-of-line blocking, spec §4.K).
pub struct BulkheadSink {
    inner: Box<dyn Sink>,
    semaphore: tokio::sync::Semaphore,
}

impl BulkheadSink {
    pub fn new(inner: Box<dyn Sink>, max_concurrency: usize) -> Self {
        Self {
            inner,
            semaphore: tokio::sync::Semaphore::new(max_concurrency.max(1)),
        }
    }
}

#[async_trait]
impl Sink for BulkheadSink {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, alarm: &AlarmEvent, deadline: Duration) -> Result<(), SinkError> {
        let Ok(_permit) = self.semaphore.try_acquire() else {
            return Err(SinkError::BulkheadFull(self.name().to_string()));
        };
        self.inner.send(alarm, deadline).await
    }
}

/// Races `inner` against `deadline`, reporting a typed timeout instead of
/// suspending indefinitely (spec §5: "cancellation is cooperative via a
/// deadline carried with the alarm").
pub struct TimeoutSink {
    inner: Box<dyn Sink>,
}

impl TimeoutSink {
    pub fn new(inner: Box<dyn Sink>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Sink for TimeoutSink {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, alarm: &AlarmEvent, deadline: Duration) -> Result<(), SinkError> {
        match tokio::time::timeout(deadline, self.inner.send(alarm, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(deadline, self.name().to_string())),
        }
    }
}

/// Tracks total calls and failures per sink name; exposed for the minimal
/// `/healthz`-adjacent counters the alarm-distributor service surfaces.
#[derive(Default)]
pub struct SinkMetrics {
    pub calls: AtomicU64,
    pub failures: AtomicU64,
}

impl SinkMetrics {
    pub fn record(&self, ok: bool) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Wires the full decorator stack around `inner` in the order spec §4.K
/// lists them: retry, circuit breaker, bulkhead, timeout (innermost).
pub fn harden(
    inner: Box<dyn Sink>,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    failure_threshold: u32,
    cooldown: Duration,
    max_concurrency: usize,
) -> Box<dyn Sink> {
    let timed = Box::new(TimeoutSink::new(inner));
    let bulkheaded = Box::new(BulkheadSink::new(timed, max_concurrency));
    let breakered = Box::new(CircuitBreakerSink::new(bulkheaded, failure_threshold, cooldown));
    Box::new(RetrySink::new(
        breakered,
        max_attempts,
        base_backoff,
        max_backoff,
    ))
}
