//! Component D: the pre-filter (spec §4.D).
//!
//! Drops a data message when every one of its component readings is either
//! out of the sensor's declared physical range, or a trivial change from the
//! last value seen for that `(device_id, sensor_type)`. Survivors are
//! stamped with a preprocessing timestamp and forwarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use fw_protocol::RawReading;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct PreFilterConfig {
    pub temperature_threshold: f64,
    pub humidity_threshold: f64,
    /// Accumulation-type sensors (smoke, CO) are only trivial when both the
    /// prior and current readings sit below this absolute alarm floor.
    pub accumulation_floor: f64,
}

impl Default for PreFilterConfig {
    fn default() -> Self {
        Self {
            temperature_threshold: 0.5,
            humidity_threshold: 1.0,
            accumulation_floor: 5.0,
        }
    }
}

struct RangeBounds {
    min: f64,
    max: f64,
}

fn physical_range(sensor_type: &str) -> Option<RangeBounds> {
    match sensor_type {
        "temperature" => Some(RangeBounds { min: -50.0, max: 150.0 }),
        "humidity" => Some(RangeBounds { min: 0.0, max: 100.0 }),
        "smoke" => Some(RangeBounds { min: 0.0, max: 100.0 }),
        "co" => Some(RangeBounds { min: 0.0, max: 1000.0 }),
        _ => None,
    }
}

fn is_accumulation_type(sensor_type: &str) -> bool {
    matches!(sensor_type, "smoke" | "co")
}

/// A data message that survived the pre-filter, stamped with the
/// preprocessing timestamp at which it cleared the filter. Serialized onto
/// the `sensor-data` topic by the session layer and decoded by the stream
/// processor on the other end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardedMessage {
    pub device_id: String,
    pub readings: Vec<RawReading>,
    pub device_timestamp: i64,
    pub preprocessed_at: i64,
}

#[derive(Debug, Default)]
pub struct PreFilterStats {
    pub malformed_dropped: AtomicU64,
    pub trivial_dropped: AtomicU64,
    pub forwarded: AtomicU64,
}

pub struct PreFilter {
    config: PreFilterConfig,
    last_values: Mutex<HashMap<(String, String), f64>>,
    pub stats: PreFilterStats,
}

impl PreFilter {
    pub fn new(config: PreFilterConfig) -> Self {
        Self {
            config,
            last_values: Mutex::new(HashMap::new()),
            stats: PreFilterStats::default(),
        }
    }

    /// Processes one device `data` message. Returns `None` when every
    /// reading was invalid or trivial and the message is dropped.
    pub fn process(&self, device_id: &str, readings: Vec<RawReading>, timestamp: i64) -> Option<ForwardedMessage> {
        if readings.is_empty() {
            self.stats.malformed_dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut kept = Vec::with_capacity(readings.len());
        for reading in readings {
            if self.keep_reading(device_id, &reading) {
                kept.push(reading);
            }
        }

        if kept.is_empty() {
            self.stats.trivial_dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        Some(ForwardedMessage {
            device_id: device_id.to_string(),
            readings: kept,
            device_timestamp: timestamp,
            preprocessed_at: now_epoch_ms(),
        })
    }

    fn keep_reading(&self, device_id: &str, reading: &RawReading) -> bool {
        if let Some(bounds) = physical_range(&reading.sensor_type) {
            if reading.value < bounds.min || reading.value > bounds.max {
                return false;
            }
        }

        let key = (device_id.to_string(), reading.sensor_type.clone());
        let mut last_values = self.last_values.lock().unwrap();
        let prior = last_values.get(&key).copied();
        last_values.insert(key, reading.value);
        drop(last_values);

        let Some(prior) = prior else {
            return true;
        };

        let trivial = if is_accumulation_type(&reading.sensor_type) {
            prior < self.config.accumulation_floor && reading.value < self.config.accumulation_floor
        } else {
            let threshold = match reading.sensor_type.as_str() {
                "temperature" => self.config.temperature_threshold,
                "humidity" => self.config.humidity_threshold,
                _ => return true,
            };
            (reading.value - prior).abs() < threshold
        };

        !trivial
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(sensor_type: &str, value: f64) -> RawReading {
        RawReading {
            sensor_type: sensor_type.to_string(),
            value,
            unit: "C".to_string(),
        }
    }

    #[test]
    fn first_reading_for_a_key_is_always_forwarded() {
        let filter = PreFilter::new(PreFilterConfig::default());
        let out = filter.process("d1", vec![reading("temperature", 25.0)], 1000);
        assert!(out.is_some());
    }

    #[test]
    fn trivial_temperature_change_is_dropped() {
        let filter = PreFilter::new(PreFilterConfig::default());
        filter.process("d1", vec![reading("temperature", 25.0)], 1000);
        let out = filter.process("d1", vec![reading("temperature", 25.2)], 2000);
        assert!(out.is_none());
        assert_eq!(filter.stats.trivial_dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn non_trivial_temperature_change_is_forwarded() {
        let filter = PreFilter::new(PreFilterConfig::default());
        filter.process("d1", vec![reading("temperature", 25.0)], 1000);
        let out = filter.process("d1", vec![reading("temperature", 26.0)], 2000);
        assert!(out.is_some());
    }

    #[test]
    fn out_of_range_reading_is_dropped() {
        let filter = PreFilter::new(PreFilterConfig::default());
        let out = filter.process("d1", vec![reading("temperature", 999.0)], 1000);
        assert!(out.is_none());
    }

    #[test]
    fn accumulation_sensor_below_floor_on_both_sides_is_trivial() {
        let filter = PreFilter::new(PreFilterConfig::default());
        filter.process("d1", vec![reading("smoke", 1.0)], 1000);
        let out = filter.process("d1", vec![reading("smoke", 2.0)], 2000);
        assert!(out.is_none());
    }

    #[test]
    fn accumulation_sensor_crossing_floor_is_always_forwarded() {
        let filter = PreFilter::new(PreFilterConfig::default());
        filter.process("d1", vec![reading("smoke", 1.0)], 1000);
        let out = filter.process("d1", vec![reading("smoke", 10.0)], 2000);
        assert!(out.is_some());
    }

    #[test]
    fn message_with_no_readings_is_malformed() {
        let filter = PreFilter::new(PreFilterConfig::default());
        let out = filter.process("d1", vec![], 1000);
        assert!(out.is_none());
        assert_eq!(filter.stats.malformed_dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn message_with_mixed_trivial_and_nontrivial_readings_is_forwarded_with_only_the_nontrivial_ones() {
        let filter = PreFilter::new(PreFilterConfig::default());
        filter.process("d1", vec![reading("temperature", 25.0), reading("humidity", 40.0)], 1000);
        let out = filter
            .process(
                "d1",
                vec![reading("temperature", 25.1), reading("humidity", 45.0)],
                2000,
            )
            .unwrap();
        assert_eq!(out.readings.len(), 1);
        assert_eq!(out.readings[0].sensor_type, "humidity");
    }
}
