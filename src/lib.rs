//! The single-binary development build of firewatch-core.
//!
//! Each of the three services (device gateway, stream processor, alarm
//! distributor) ships as its own crate with its own `main.rs` meant to run
//! against real Kafka/Redis. This crate wires all three together inside one
//! process against the in-process queue and in-memory stores every crate
//! already exposes for its own tests, so the whole pipeline in spec §2's
//! data-flow diagram can be exercised — and demoed — without standing up
//! external infrastructure. It is also what `tests/integration/*.rs` link
//! against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fw_auth::{DeviceDirectory, DeviceRecord, InMemoryTokenStore, TokenValidator, TokenValidatorConfig};
use fw_dedup::in_memory::InMemoryDedupStore;
use fw_dedup::Deduplicator;
use fw_distributor::decorators::harden;
use fw_distributor::{Distributor, Sink};
use fw_evaluator::{Evaluator, PreFilter, PreFilterConfig};
use fw_history::{AlarmRecord, HistoryBackend, HistoryError, HistoryStore, HistoryStoreConfig};
use fw_hotspot::in_memory::InMemoryHotspotStore;
use fw_hotspot::{DeviceState, HotspotPrimitives, HotspotPrimitivesConfig, NoopPublisher};
use fw_id::Allocator;
use fw_queue::in_process::InProcessTopic;
use fw_queue::Topic;
use fw_rules::RuleStore;
use fw_sync::{SyncService, SyncServiceConfig};
use tokio::sync::watch;

use alarm_distributor::sinks::{HistorySink, PubSubSink, SyncSink, WebsocketSink};
use alarm_distributor::{active_alarms::ActiveAlarmIndex, AlarmConsumer};
use device_gateway::{session_deps, GatewayConfig, SessionDeps};
use stream_processor::{AlarmProducer, Pipeline};

/// A directory that onboards every `device_id` it is asked about under a
/// fixed `api_key`, so the dev stack can issue tokens for ad hoc device ids
/// without a real admin surface.
pub struct OpenDeviceDirectory {
    pub api_key: String,
}

#[async_trait]
impl DeviceDirectory for OpenDeviceDirectory {
    async fn lookup(&self, _device_id: &str) -> Option<DeviceRecord> {
        Some(DeviceRecord {
            api_key: self.api_key.clone(),
            enabled: true,
        })
    }
}

/// A [`HistoryBackend`] that always reports itself unavailable. The
/// all-in-one dev binary has no Redis to wire up, so history always runs
/// through [`fw_history::HistoryStore`]'s fallback ring (spec §4.L) — which
/// is also exactly the behavior `tests/integration/e2e_history_fallback.rs`
/// wants to exercise deliberately, rather than faking a backend outage.
#[derive(Default)]
pub struct AlwaysUnavailableHistoryBackend;

#[async_trait]
impl HistoryBackend for AlwaysUnavailableHistoryBackend {
    async fn index_write(&self, _index: &str, _score: i64, _record: &AlarmRecord) -> Result<(), HistoryError> {
        Err(HistoryError::Unavailable("no backend wired in this build".to_string()))
    }

    async fn index_recent(&self, _index: &str, _limit: usize) -> Result<Vec<AlarmRecord>, HistoryError> {
        Err(HistoryError::Unavailable("no backend wired in this build".to_string()))
    }

    async fn index_range(&self, _index: &str, _start_ms: i64, _end_ms: i64) -> Result<Vec<AlarmRecord>, HistoryError> {
        Err(HistoryError::Unavailable("no backend wired in this build".to_string()))
    }

    async fn index_page(&self, _index: &str, _offset: usize, _limit: usize) -> Result<Vec<AlarmRecord>, HistoryError> {
        Err(HistoryError::Unavailable("no backend wired in this build".to_string()))
    }

    async fn index_cursor(&self, _index: &str, _before_ms: i64, _limit: usize) -> Result<Vec<AlarmRecord>, HistoryError> {
        Err(HistoryError::Unavailable("no backend wired in this build".to_string()))
    }

    async fn trim_older_than(&self, _index: &str, _cutoff_ms: i64) -> Result<u64, HistoryError> {
        Ok(0)
    }

    async fn ping(&self) -> Result<(), HistoryError> {
        Err(HistoryError::Unavailable("no backend wired in this build".to_string()))
    }
}

/// Every component wired together in one process, built from in-process
/// topics and in-memory stores. Exposed so both `src/main.rs` and the
/// integration test suites can assemble the same stack without duplicating
/// the wiring.
pub struct DevStack {
    pub sensor_data_topic: InProcessTopic,
    pub alarm_events_topic: InProcessTopic,
    pub status_topic: InProcessTopic,

    pub rule_store: Arc<RuleStore>,
    pub allocator: Arc<Allocator>,
    pub evaluator: Arc<Evaluator>,
    pub token_validator: Arc<TokenValidator<InMemoryTokenStore, OpenDeviceDirectory>>,
    pub api_key: String,
    pub session_deps: SessionDeps,
    pub pipeline: Arc<Pipeline<InMemoryDedupStore>>,
    pub history: Arc<HistoryStore<AlwaysUnavailableHistoryBackend>>,
    pub sync: Arc<SyncService>,
    pub active_alarms: Arc<ActiveAlarmIndex>,
    pub alarm_consumer: Arc<AlarmConsumer<InMemoryHotspotStore, NoopPublisher>>,
    pub distributor: Arc<Distributor>,
}

/// Knobs a caller may want to vary without touching the wiring itself —
/// mirrors the handful of `*_seconds`/`*_ms` config keys from spec §6 that
/// matter for test timing.
pub struct DevStackConfig {
    pub node_id: u16,
    pub partitions: u32,
    pub idle_timeout: Duration,
    pub dedup_window_seconds: u64,
    pub evaluator_epsilon: f64,
    pub distributor_per_sink_deadline: Duration,
    pub api_key: String,
    /// Devices pre-marked [`DeviceState::Active`] in the hotspot store, so
    /// `activate_suppression` (spec §4.M step 1) doesn't reject them before
    /// a caller has a chance to onboard one explicitly.
    pub known_devices: Vec<String>,
}

impl Default for DevStackConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            partitions: 1,
            idle_timeout: Duration::from_secs(10),
            dedup_window_seconds: 300,
            evaluator_epsilon: 0.0,
            distributor_per_sink_deadline: Duration::from_millis(2_000),
            api_key: "dev-api-key".to_string(),
            known_devices: vec!["device-1".to_string()],
        }
    }
}

impl DevStack {
    pub fn build(config: DevStackConfig) -> Self {
        let sensor_data_topic = InProcessTopic::new(config.partitions);
        let alarm_events_topic = InProcessTopic::new(config.partitions);
        let status_topic = InProcessTopic::new(1);

        let allocator = Arc::new(Allocator::new(config.node_id).expect("dev stack node id is valid"));
        let rule_store = Arc::new(RuleStore::new());
        let evaluator = Arc::new(Evaluator::new(rule_store.subscribe(), config.evaluator_epsilon));

        let token_validator = Arc::new(TokenValidator::new(
            InMemoryTokenStore::default(),
            OpenDeviceDirectory { api_key: config.api_key.clone() },
            TokenValidatorConfig::default(),
        ));
        let pre_filter = Arc::new(PreFilter::new(PreFilterConfig::default()));
        let status_store = Arc::new(device_gateway::device_status::InMemoryDeviceStatusStore::default());

        let gateway_config = GatewayConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            idle_timeout: config.idle_timeout,
            max_pending_writes: 64,
            redis_url: "unused".to_string(),
            node_id: config.node_id,
            sensor_data_partitions: config.partitions,
        };
        let session_deps = session_deps(
            token_validator.clone(),
            status_store,
            pre_filter,
            sensor_data_topic.producer(),
            status_topic.producer(),
            &gateway_config,
        );

        let dedup = Deduplicator::new(InMemoryDedupStore::default(), config.dedup_window_seconds);
        let alarm_producer = AlarmProducer::new(allocator.clone(), alarm_events_topic.producer());
        let pipeline = Arc::new(Pipeline::new(allocator.clone(), evaluator.clone(), Some(dedup), alarm_producer));

        let history = Arc::new(HistoryStore::new(AlwaysUnavailableHistoryBackend, HistoryStoreConfig::default()));
        let sync = Arc::new(SyncService::new(SyncServiceConfig::default()));

        let websocket_topic = InProcessTopic::new(1);
        let pubsub_topic = InProcessTopic::new(1);

        let harden_sink = |inner: Box<dyn Sink>| -> Arc<dyn Sink> {
            Arc::from(harden(
                inner,
                3,
                Duration::from_millis(50),
                Duration::from_millis(500),
                5,
                Duration::from_secs(10),
                16,
            ))
        };
        let sinks: Vec<Arc<dyn Sink>> = vec![
            harden_sink(Box::new(HistorySink::new(history.clone()))),
            harden_sink(Box::new(WebsocketSink::new(websocket_topic.producer()))),
            harden_sink(Box::new(PubSubSink::new(pubsub_topic.producer()))),
            harden_sink(Box::new(SyncSink::new(sync.clone()))),
        ];
        let distributor = Arc::new(Distributor::new(sinks, config.distributor_per_sink_deadline));

        let hotspot_store = InMemoryHotspotStore::new();
        for device_id in &config.known_devices {
            hotspot_store.set_device_state(device_id, DeviceState::Active);
        }
        let hotspot = Arc::new(HotspotPrimitives::new(
            hotspot_store,
            NoopPublisher,
            HotspotPrimitivesConfig::default(),
        ));
        let active_alarms = Arc::new(ActiveAlarmIndex::new());
        let alarm_consumer = Arc::new(AlarmConsumer::new(active_alarms.clone(), hotspot, distributor.clone()));

        Self {
            sensor_data_topic,
            alarm_events_topic,
            status_topic,
            rule_store,
            allocator,
            evaluator,
            token_validator,
            api_key: config.api_key,
            session_deps,
            pipeline,
            history,
            sync,
            active_alarms,
            alarm_consumer,
            distributor,
        }
    }

    /// Issues a fresh access token for `device_id`, for tests and the dev
    /// binary that need to authenticate a device without a real admin
    /// surface (spec §4.B issuance lives behind the OAuth2 surface, spec §1
    /// non-goals).
    pub async fn issue_access_token(&self, device_id: &str) -> String {
        self.token_validator
            .issue(device_id, &self.api_key)
            .await
            .expect("open device directory always accepts the dev stack's api key")
            .access_token
    }
}

/// Installs a `ctrl_c` listener that flips `shutdown` once, matching the
/// two-phase drain every service binary in this workspace performs.
pub fn spawn_shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

/// Wall-clock time in epoch milliseconds, consistent with every other
/// service binary in this workspace.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_millis() as i64
}
