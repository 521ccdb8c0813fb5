//! Bounded in-memory fallback ring (spec §4.L): when the backing store is
//! unreachable, writes land here instead and reads degrade to serving from
//! it. Oldest-first eviction when full; never back-filled once the backend
//! recovers (best-effort degradation, not a write-ahead log).

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::AlarmRecord;

pub struct FallbackRing {
    capacity: usize,
    entries: Mutex<VecDeque<AlarmRecord>>,
}

impl FallbackRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, record: AlarmRecord) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    pub fn recent(&self, limit: usize) -> Vec<AlarmRecord> {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn in_window(&self, start_ms: i64, end_ms: i64) -> Vec<AlarmRecord> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .rev()
            .filter(|r| r.timestamp_ms >= start_ms && r.timestamp_ms <= end_ms)
            .cloned()
            .collect()
    }

    pub fn filter_recent<F>(&self, limit: usize, predicate: F) -> Vec<AlarmRecord>
    where
        F: Fn(&AlarmRecord) -> bool,
    {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().filter(|r| predicate(r)).take(limit).cloned().collect()
    }

    pub fn page(&self, offset: usize, limit: usize) -> Vec<AlarmRecord> {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().skip(offset).take(limit).cloned().collect()
    }

    pub fn cursor(&self, before_ms: i64, limit: usize) -> Vec<AlarmRecord> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .rev()
            .filter(|r| r.timestamp_ms < before_ms)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn evict_older_than(&self, cutoff_ms: i64) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|r| r.timestamp_ms >= cutoff_ms);
    }
}
