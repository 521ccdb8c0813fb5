//! Component K: the Distributor (spec §4.K).
//!
//! Fans each alarm out to a fixed set of [`Sink`]s — history, websocket
//! topics, pub/sub topics, sync notify — concurrently and independently.
//! Every sink is wrapped with the same decorator stack (retry, circuit
//! breaker, bulkhead, timeout; spec §9's "composable decorators taking a
//! `Sink` and returning a `Sink`"), so one slow or failing channel never
//! blocks or starves the others.

pub mod decorators;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fw_protocol::AlarmEvent;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SinkError {
    #[error("sink {1} timed out after {0:?}")]
    Timeout(Duration, String),
    #[error("circuit open for sink {0}")]
    CircuitOpen(String),
    #[error("bulkhead full for sink {0}")]
    BulkheadFull(String),
    #[error("retry exhausted for sink {sink} after {attempts} attempts: {last_error}")]
    RetryExhausted {
        sink: String,
        attempts: u32,
        last_error: String,
    },
    #[error("sink {0} failed: {1}")]
    Failed(String, String),
}

/// A notification channel the Distributor can fan an alarm out to (spec
/// §9: `{name, send(alarm, deadline) -> Result}`).
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// `deadline` is the remaining budget for this call; implementations
    /// that honor cancellation should race their work against it.
    async fn send(&self, alarm: &AlarmEvent, deadline: Duration) -> Result<(), SinkError>;
}

/// Outcome of fanning one alarm out to every configured sink.
pub struct DistributionReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, SinkError)>,
}

impl DistributionReport {
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

pub struct Distributor {
    sinks: Vec<Arc<dyn Sink>>,
    per_sink_deadline: Duration,
}

impl Distributor {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, per_sink_deadline: Duration) -> Self {
        Self {
            sinks,
            per_sink_deadline,
        }
    }

    /// Runs every sink concurrently for `alarm`, isolating per-sink
    /// failures so one slow/failing channel never blocks the others
    /// (spec §4.K, §5). Callers should retain the alarm in the history
    /// fallback ring when [`DistributionReport::all_failed`] is true.
    pub async fn distribute(&self, alarm: &AlarmEvent) -> DistributionReport {
        let futures = self.sinks.iter().map(|sink| {
            let sink = Arc::clone(sink);
            let deadline = self.per_sink_deadline;
            async move {
                let result = sink.send(alarm, deadline).await;
                (sink.name().to_string(), result)
            }
        });

        let results = futures::future::join_all(futures).await;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (name, result) in results {
            match result {
                Ok(()) => succeeded.push(name),
                Err(err) => {
                    tracing::warn!(sink = %name, error = %err, "sink delivery failed");
                    failed.push((name, err));
                }
            }
        }
        DistributionReport { succeeded, failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        name: String,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Sink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _alarm: &AlarmEvent, _deadline: Duration) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SinkError::Failed(self.name.clone(), "boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn sample_alarm() -> AlarmEvent {
        fw_test_fixtures::sample_alarm()
    }

    mod fw_test_fixtures {
        use fw_protocol::{AlarmEvent, Location, Severity};

        pub fn sample_alarm() -> AlarmEvent {
            AlarmEvent {
                id: 1,
                device_id: "d1".to_string(),
                alarm_type: "FIRE".to_string(),
                severity: Severity::High,
                value: 90.0,
                unit: "C".to_string(),
                timestamp: "2023-11-14T22:13:20.000Z".to_string(),
                location: Location {
                    building: None,
                    floor: None,
                    room: None,
                    zone: None,
                },
                acknowledged: false,
                resolved: false,
                notes: None,
                metadata: None,
            }
        }
    }

    #[tokio::test]
    async fn one_failing_sink_does_not_block_the_others() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let sinks: Vec<Arc<dyn Sink>> = vec![
            Arc::new(CountingSink {
                name: "history".to_string(),
                calls: Arc::clone(&calls_a),
                fail: true,
            }),
            Arc::new(CountingSink {
                name: "sync".to_string(),
                calls: Arc::clone(&calls_b),
                fail: false,
            }),
        ];
        let distributor = Distributor::new(sinks, Duration::from_secs(1));
        let report = distributor.distribute(&sample_alarm()).await;

        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
        assert_eq!(report.succeeded, vec!["sync".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn all_sinks_failing_is_reported_as_all_failed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(CountingSink {
            name: "history".to_string(),
            calls,
            fail: true,
        })];
        let distributor = Distributor::new(sinks, Duration::from_secs(1));
        let report = distributor.distribute(&sample_alarm()).await;
        assert!(report.all_failed());
    }
}
