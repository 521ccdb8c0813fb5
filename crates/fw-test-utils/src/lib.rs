//! Shared test fixtures used across crate and service test suites: an
//! in-process queue harness pre-wired with the two pipeline topics, and
//! builders for the domain types (`Reading`, `Rule`, `AlarmEvent`) and the
//! device wire protocol frames, so individual test modules don't each
//! reinvent sample data.

use std::sync::Arc;

use fw_protocol::{
    CandidateAlarm, DeviceMessage, Location, Operator, RawReading, Reading, Rule, Severity,
};
use fw_queue::in_process::InProcessTopic;
use fw_queue::{Consumer, Producer, Topic, ALARM_EVENTS_TOPIC, SENSOR_DATA_TOPIC};

/// Both pipeline topics (`sensor-data`, `alarm-events`), wired as in-process
/// logs so an end-to-end test can exercise the full pipeline without a
/// broker. Mirrors the pair every service binary wires in production, minus
/// the `kafka` feature.
pub struct TestTopics {
    pub sensor_data: InProcessTopic,
    pub alarm_events: InProcessTopic,
}

impl TestTopics {
    pub fn new(partition_count: u32) -> Self {
        Self {
            sensor_data: InProcessTopic::new(partition_count),
            alarm_events: InProcessTopic::new(partition_count),
        }
    }

    pub fn sensor_data_producer(&self) -> Arc<dyn Producer> {
        self.sensor_data.producer()
    }

    pub fn alarm_events_producer(&self) -> Arc<dyn Producer> {
        self.alarm_events.producer()
    }

    pub fn sensor_data_consumer(&self, group: &str, partition: u32) -> Box<dyn Consumer> {
        self.sensor_data.consumer(group, partition)
    }

    pub fn alarm_events_consumer(&self, group: &str, partition: u32) -> Box<dyn Consumer> {
        self.alarm_events.consumer(group, partition)
    }
}

impl Default for TestTopics {
    fn default() -> Self {
        Self::new(3)
    }
}

pub fn topic_names() -> (&'static str, &'static str) {
    (SENSOR_DATA_TOPIC, ALARM_EVENTS_TOPIC)
}

// ---------------------------------------------------------------------------
// Domain builders
// ---------------------------------------------------------------------------

pub fn sample_reading(device_id: &str, sensor_type: &str, value: f64, timestamp: i64) -> Reading {
    Reading {
        id: 1,
        device_id: device_id.to_string(),
        sensor_type: sensor_type.to_string(),
        value,
        unit: default_unit(sensor_type).to_string(),
        timestamp,
        location: None,
        metadata: None,
        preprocessed_at: timestamp,
    }
}

pub fn sample_rule(id: &str, device_id: &str, sensor_type: &str, operator: Operator, threshold: f64, window_seconds: u64) -> Rule {
    Rule {
        id: id.to_string(),
        name: format!("{sensor_type}-rule"),
        device_id: device_id.to_string(),
        sensor_type: sensor_type.to_string(),
        operator,
        threshold,
        window_seconds,
        severity: Severity::High,
        alarm_type: sensor_type.to_uppercase(),
        location: Some(Location::default()),
        enabled: true,
        metadata: None,
    }
}

pub fn sample_candidate(rule: &Rule, reading: &Reading) -> CandidateAlarm {
    CandidateAlarm {
        rule_id: rule.id.clone(),
        device_id: reading.device_id.clone(),
        sensor_type: reading.sensor_type.clone(),
        alarm_type: rule.alarm_type.clone(),
        severity: rule.severity,
        value: reading.value,
        unit: reading.unit.clone(),
        timestamp: reading.timestamp,
        location: rule.location.clone(),
        metadata: reading.metadata.clone(),
    }
}

fn default_unit(sensor_type: &str) -> &'static str {
    match sensor_type {
        "temperature" => "C",
        "humidity" => "%",
        "smoke" => "ppm",
        "co" => "ppm",
        _ => "unit",
    }
}

// ---------------------------------------------------------------------------
// Device wire protocol (§6) helpers: newline-delimited JSON frames
// ---------------------------------------------------------------------------

pub fn auth_frame(token: &str) -> String {
    format!("{{\"type\":\"auth\",\"token\":\"{token}\"}}\n")
}

pub fn heartbeat_frame() -> String {
    "{\"type\":\"heartbeat\"}\n".to_string()
}

pub fn data_frame(readings: &[RawReading], timestamp: i64) -> String {
    let msg = DeviceMessage::Data(fw_protocol::DataMessage {
        readings: readings.to_vec(),
        timestamp,
    });
    format!("{}\n", serde_json::to_string(&msg).expect("serialize data frame"))
}

pub fn raw_reading(sensor_type: &str, value: f64) -> RawReading {
    RawReading {
        sensor_type: sensor_type.to_string(),
        value,
        unit: default_unit(sensor_type).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topics_round_trip_a_message_through_the_in_process_sensor_data_topic() {
        let topics = TestTopics::default();
        let producer = topics.sensor_data_producer();
        let mut consumer = topics.sensor_data_consumer("normal", 0);

        producer.send("device-1", b"hello".to_vec()).await.unwrap();
        let msg = consumer.recv().await.unwrap();
        assert_eq!(msg.payload, b"hello");
    }

    #[test]
    fn auth_frame_is_well_formed_json_line() {
        let frame = auth_frame("T1");
        assert!(frame.ends_with('\n'));
        let parsed: DeviceMessage = serde_json::from_str(frame.trim_end()).unwrap();
        assert!(matches!(parsed, DeviceMessage::Auth(_)));
    }

    #[test]
    fn data_frame_round_trips_readings() {
        let frame = data_frame(&[raw_reading("temperature", 25.0)], 1_700_000_000_000);
        let parsed: DeviceMessage = serde_json::from_str(frame.trim_end()).unwrap();
        match parsed {
            DeviceMessage::Data(data) => assert_eq!(data.readings.len(), 1),
            other => panic!("expected Data, got {other:?}"),
        }
    }
}
