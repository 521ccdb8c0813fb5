//! A bounded linear-counting cardinality estimator (spec §4.H/§9: "the
//! source's deduplication-rate calculation approximates cardinality via
//! union of estimators"). Advisory only — never consulted to gate
//! correctness, only to expose `unique_count`/`dedup_rate` to operators.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Bitmap size. Larger means a more accurate estimate at a fixed memory cost;
/// this is unrelated to the dedup window's TTL bookkeeping, which lives in
/// the backing store instead.
const BITMAP_BITS: usize = 1 << 16;

pub struct CardinalityEstimator {
    bits: Mutex<Vec<u64>>,
    total_seen: std::sync::atomic::AtomicU64,
    unique_seen: std::sync::atomic::AtomicU64,
}

impl CardinalityEstimator {
    pub fn new() -> Self {
        Self {
            bits: Mutex::new(vec![0u64; BITMAP_BITS / 64]),
            total_seen: std::sync::atomic::AtomicU64::new(0),
            unique_seen: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Records one occurrence. `is_new` should reflect whether the
    /// deduplicator judged this fingerprint new within its window.
    pub fn record(&self, fingerprint_key: &str, is_new: bool) {
        use std::sync::atomic::Ordering;
        self.total_seen.fetch_add(1, Ordering::Relaxed);
        if is_new {
            self.unique_seen.fetch_add(1, Ordering::Relaxed);
        }

        let mut hasher = DefaultHasher::new();
        fingerprint_key.hash(&mut hasher);
        let h = hasher.finish() as usize;
        let bit = h % BITMAP_BITS;
        let mut bits = self.bits.lock().unwrap();
        bits[bit / 64] |= 1 << (bit % 64);
    }

    /// Linear-counting estimate: `-m * ln(unset / m)`.
    pub fn unique_count(&self) -> u64 {
        let bits = self.bits.lock().unwrap();
        let set: u32 = bits.iter().map(|w| w.count_ones()).sum();
        drop(bits);
        let m = BITMAP_BITS as f64;
        let unset = (m - set as f64).max(1.0);
        (-m * (unset / m).ln()).round().max(0.0) as u64
    }

    /// Fraction of occurrences suppressed as repeats, over the lifetime of
    /// this estimator. `0.0` until at least one occurrence is recorded.
    pub fn dedup_rate(&self) -> f64 {
        use std::sync::atomic::Ordering;
        let total = self.total_seen.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let unique = self.unique_seen.load(Ordering::Relaxed);
        1.0 - (unique as f64 / total as f64)
    }
}

impl Default for CardinalityEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_count_approximates_distinct_fingerprints() {
        let est = CardinalityEstimator::new();
        for i in 0..1000 {
            est.record(&format!("fp-{i}"), true);
        }
        let estimate = est.unique_count();
        // Linear counting has bounded error; allow generous slack.
        assert!(
            (900..=1100).contains(&estimate),
            "estimate {estimate} too far from 1000"
        );
    }

    #[test]
    fn dedup_rate_reflects_repeat_fraction() {
        let est = CardinalityEstimator::new();
        est.record("fp-1", true);
        est.record("fp-1", false);
        est.record("fp-1", false);
        est.record("fp-2", true);
        // 2 unique out of 4 total seen.
        assert!((est.dedup_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn dedup_rate_is_zero_before_any_occurrence() {
        let est = CardinalityEstimator::new();
        assert_eq!(est.dedup_rate(), 0.0);
    }
}
