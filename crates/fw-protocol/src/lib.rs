// fw-protocol: wire types shared by every service in the telemetry pipeline.
//
// Device-facing messages use a top-level `type` field for discriminated
// deserialization (the frozen device wire protocol in spec §6). Internal
// domain types (Reading, Rule, AlarmEvent, ...) are plain structs shared
// between the stream processor and the alarm distributor.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Renders milliseconds-since-epoch as the ISO-8601 string the wire protocol
/// uses for `heartbeat_response.timestamp` and `AlarmEvent.timestamp` (§6).
pub fn format_iso8601(epoch_ms: i64) -> String {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Inverse of [`format_iso8601`]: recovers milliseconds-since-epoch from an
/// `AlarmEvent.timestamp` string for indexing and snapshot ordering.
pub fn parse_iso8601(timestamp: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

// ---------------------------------------------------------------------------
// Device wire protocol (§6): line/length-delimited JSON over TCP
// ---------------------------------------------------------------------------

/// One inbound frame from a device connection.
///
/// Any shape that doesn't match one of these variants is a protocol error
/// and closes the connection without a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum DeviceMessage {
    Auth(AuthRequest),
    Heartbeat(HeartbeatRequest),
    Data(DataMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    pub readings: Vec<RawReading>,
    pub timestamp: i64,
}

/// A single component reading as the device reports it, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
}

/// One outbound frame to a device connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    AuthResponse(AuthResponse),
    HeartbeatResponse(HeartbeatResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub status: AuthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// ISO-8601 server timestamp.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Domain model (§3): Reading, Rule, AlarmEvent, Location, SuppressionState
// ---------------------------------------------------------------------------

/// A reading after pre-filter enrichment, on its way into the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: u64,
    pub device_id: String,
    pub sensor_type: String,
    pub value: f64,
    pub unit: String,
    /// Device-reported timestamp (epoch ms); accepted as-is, not adjusted.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Set by the pre-filter at enrichment time.
    pub preprocessed_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_topic_suffix(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl Operator {
    /// Evaluate `value OP threshold`. `=`/`!=` compare within `epsilon`
    /// (defaults to exact, i.e. `epsilon == 0.0`, per spec §4.G).
    pub fn evaluate(self, value: f64, threshold: f64, epsilon: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Ge => value >= threshold,
            Operator::Lt => value < threshold,
            Operator::Le => value <= threshold,
            Operator::Eq => (value - threshold).abs() <= epsilon,
            Operator::Ne => (value - threshold).abs() > epsilon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub device_id: String,
    pub sensor_type: String,
    pub operator: Operator,
    pub threshold: f64,
    pub window_seconds: u64,
    pub severity: Severity,
    pub alarm_type: String,
    #[serde(default)]
    pub location: Option<Location>,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

/// A rule match, before ID allocation and enrichment (§4.G/§4.I).
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAlarm {
    pub rule_id: String,
    pub device_id: String,
    pub sensor_type: String,
    pub alarm_type: String,
    pub severity: Severity,
    pub value: f64,
    pub unit: String,
    pub timestamp: i64,
    pub location: Option<Location>,
    pub metadata: Option<serde_json::Value>,
}

impl CandidateAlarm {
    /// The tuple identifying a logically recurring alarm (§Glossary: Fingerprint).
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            rule_id: self.rule_id.clone(),
            device_id: self.device_id.clone(),
            sensor_type: self.sensor_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub rule_id: String,
    pub device_id: String,
    pub sensor_type: String,
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.rule_id, self.device_id, self.sensor_type)
    }
}

/// The alarm notification envelope delivered on websocket/pub-sub topics (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmEvent {
    pub id: u64,
    pub device_id: String,
    pub alarm_type: String,
    pub severity: Severity,
    pub value: f64,
    pub unit: String,
    /// ISO-8601.
    pub timestamp: String,
    pub location: Location,
    pub acknowledged: bool,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AlarmEvent {
    pub fn topic_suffixes(&self) -> [&'static str; 2] {
        ["all", self.severity.as_topic_suffix()]
    }
}

/// Suppression types, assigned by room-tag matching in §4.J.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuppressionType {
    Water,
    Foam,
    Gas,
}

impl SuppressionType {
    /// Room-tag → suppression-type mapping from §4.J: rooms matching
    /// "server"/"data" get gas, "kitchen"/"lab" get foam, otherwise water.
    pub fn from_room_tag(room: &str) -> Self {
        let lower = room.to_lowercase();
        if lower.contains("server") || lower.contains("data") {
            SuppressionType::Gas
        } else if lower.contains("kitchen") || lower.contains("lab") {
            SuppressionType::Foam
        } else {
            SuppressionType::Water
        }
    }
}

/// Suppression-activated event published after `activate_suppression` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionActivatedEvent {
    pub event: String,
    pub device_id: String,
    pub zone_id: String,
    #[serde(rename = "type")]
    pub suppression_type: SuppressionType,
    pub intensity: u8,
    pub timestamp: i64,
}

impl SuppressionActivatedEvent {
    pub fn new(
        device_id: impl Into<String>,
        zone_id: impl Into<String>,
        suppression_type: SuppressionType,
        intensity: u8,
        timestamp: i64,
    ) -> Self {
        Self {
            event: "suppression_activated".to_owned(),
            device_id: device_id.into(),
            zone_id: zone_id.into(),
            suppression_type,
            intensity,
            timestamp,
        }
    }
}

/// Device connect/disconnect event published to the device status topic on
/// `Authenticated` entry and `Closing` (§4.C). `last_seen` is `None` on a
/// disconnect publish since the field is only meaningful while connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusEvent {
    pub device_id: String,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
}

impl DeviceStatusEvent {
    pub fn connected(device_id: impl Into<String>, last_seen: i64) -> Self {
        Self {
            device_id: device_id.into(),
            connected: true,
            last_seen: Some(last_seen),
        }
    }

    pub fn disconnected(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            connected: false,
            last_seen: None,
        }
    }
}

/// Frozen HTTP error envelope used by every non-2xx response on the
/// alarm-distributor's history/health surface (§10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Shared exponential-backoff-with-full-jitter helper (spec §12): one
/// implementation, reused by the queue producer's publish retries, the
/// distributor's retry decorator, and every backing store's
/// connect-with-retry path.
pub mod retry {
    use rand::Rng;
    use std::time::Duration;

    /// `base_ms * 2^attempt`, capped at `max_ms`, then uniformly jittered
    /// down to a random point in `[0, capped)` ("full jitter").
    pub fn full_jitter_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
        let exp = base_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(max_ms).max(1);
        let jittered = rand::thread_rng().gen_range(0..=capped);
        Duration::from_millis(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_jitter_backoff_never_exceeds_the_cap() {
        for attempt in 0..10 {
            let d = retry::full_jitter_backoff(attempt, 50, 1000);
            assert!(d.as_millis() <= 1000);
        }
    }

    #[test]
    fn format_iso8601_renders_millisecond_precision_utc() {
        assert_eq!(format_iso8601(1_700_000_000_000), "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn parse_iso8601_inverts_format_iso8601() {
        let ms = 1_700_000_000_123;
        assert_eq!(parse_iso8601(&format_iso8601(ms)), Some(ms));
    }

    #[test]
    fn parse_iso8601_rejects_garbage() {
        assert_eq!(parse_iso8601("not a timestamp"), None);
    }

    #[test]
    fn device_message_auth_round_trips_through_json() {
        let msg = DeviceMessage::Auth(AuthRequest {
            token: "T1".to_owned(),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        assert_eq!(json, r#"{"type":"auth","token":"T1"}"#);
        let parsed: DeviceMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, msg);
    }

    #[test]
    fn device_message_data_round_trips_and_rejects_unknown_shape() {
        let json = r#"{"type":"data","readings":[{"type":"temperature","value":25.0,"unit":"C"}],"timestamp":1700000000000}"#;
        let parsed: DeviceMessage = serde_json::from_str(json).expect("deserialize");
        match parsed {
            DeviceMessage::Data(data) => {
                assert_eq!(data.readings.len(), 1);
                assert_eq!(data.readings[0].sensor_type, "temperature");
            }
            other => panic!("expected Data, got {other:?}"),
        }

        let bogus = r#"{"type":"unsupported_thing"}"#;
        assert!(serde_json::from_str::<DeviceMessage>(bogus).is_err());
    }

    #[test]
    fn auth_response_failure_serializes_with_reason() {
        let msg = ServerMessage::AuthResponse(AuthResponse {
            status: AuthStatus::Failure,
            reason: Some("token expired".to_owned()),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let parsed: ServerMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, msg);
    }

    #[test]
    fn operator_eq_and_ne_respect_epsilon() {
        assert!(Operator::Eq.evaluate(50.04, 50.0, 0.05));
        assert!(!Operator::Eq.evaluate(50.1, 50.0, 0.05));
        assert!(Operator::Ne.evaluate(50.1, 50.0, 0.05));
        assert!(!Operator::Eq.evaluate(50.1, 50.0, 0.0));
    }

    #[test]
    fn suppression_type_from_room_tag_matches_spec_mapping() {
        assert_eq!(
            SuppressionType::from_room_tag("Server-Rack-2"),
            SuppressionType::Gas
        );
        assert_eq!(
            SuppressionType::from_room_tag("Data Center North"),
            SuppressionType::Gas
        );
        assert_eq!(
            SuppressionType::from_room_tag("Kitchen"),
            SuppressionType::Foam
        );
        assert_eq!(
            SuppressionType::from_room_tag("Chem Lab 3"),
            SuppressionType::Foam
        );
        assert_eq!(
            SuppressionType::from_room_tag("Hallway"),
            SuppressionType::Water
        );
    }

    #[test]
    fn device_status_event_connected_round_trips_with_last_seen() {
        let event = DeviceStatusEvent::connected("device-1", 1_700_000_000_000);
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: DeviceStatusEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, event);
        assert!(json.contains("\"last_seen\":1700000000000"));
    }

    #[test]
    fn device_status_event_disconnected_omits_last_seen() {
        let event = DeviceStatusEvent::disconnected("device-1");
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(!json.contains("last_seen"));
    }

    #[test]
    fn alarm_event_topic_suffixes_include_all_and_severity() {
        let event = AlarmEvent {
            id: 1,
            device_id: "d1".to_owned(),
            alarm_type: "SMOKE".to_owned(),
            severity: Severity::High,
            value: 80.0,
            unit: "ppm".to_owned(),
            timestamp: "2026-07-28T00:00:00Z".to_owned(),
            location: Location::default(),
            acknowledged: false,
            resolved: false,
            notes: None,
            metadata: None,
        };
        assert_eq!(event.topic_suffixes(), ["all", "high"]);
    }
}
