//! Component A: the ID allocator (spec §4.A).
//!
//! Packs a 64-bit identifier from four fields:
//!
//! ```text
//! | 41 bits: ms since epoch | 10 bits: node | 5 bits: type | 8 bits: seq |
//! ```
//!
//! Sequence resets to 0 when the millisecond advances and spin-waits for the
//! next millisecond on overflow within the same millisecond. A clock
//! regression is a fatal error: calls made while the wall clock reads behind
//! the last-seen millisecond are rejected until monotonicity is restored.
//! This mirrors the source system's behavior intentionally (spec §9) rather
//! than adopting a wait/drift-tolerant policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

const TS_BITS: u32 = 41;
const NODE_BITS: u32 = 10;
const TYPE_BITS: u32 = 5;
const SEQ_BITS: u32 = 8;

const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;
const TYPE_MASK: u64 = (1 << TYPE_BITS) - 1;
const NODE_MASK: u64 = (1 << NODE_BITS) - 1;
const TS_MASK: u64 = (1 << TS_BITS) - 1;
const MAX_NODE_ID: u16 = NODE_MASK as u16;
const MAX_TYPE_ID: u8 = TYPE_MASK as u8;

/// Fixed epoch: 2024-01-01T00:00:00Z, in milliseconds since the Unix epoch.
pub const EPOCH_MS: i64 = 1_704_067_200_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("clock moved backwards: now={now_ms}ms is behind last allocation at {last_ms}ms")]
    ClockMovedBackwards { now_ms: i64, last_ms: i64 },
    #[error("node id {0} exceeds the 10-bit range (0-1023)")]
    InvalidNodeId(u16),
    #[error("type id {0} exceeds the 5-bit range (0-31)")]
    InvalidTypeId(u8),
}

/// A decoded identifier, as returned by [`Allocator::unpack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unpacked {
    /// Milliseconds since [`EPOCH_MS`].
    pub ts_ms: u64,
    pub node: u16,
    pub type_id: u8,
    pub seq: u8,
}

/// A millisecond-resolution clock, abstracted so tests can drive it directly.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The system wall clock, measured against [`EPOCH_MS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis() as i64;
        unix_ms - EPOCH_MS
    }
}

/// Generates monotonically ordered 64-bit IDs (spec §4.A).
pub struct Allocator<C: Clock = SystemClock> {
    node_id: u16,
    clock: C,
    /// Packed `(last_ms << SEQ_BITS) | seq`, updated via compare-and-swap so
    /// concurrent callers never observe a torn read.
    state: AtomicU64,
}

impl Allocator<SystemClock> {
    /// Create an allocator with the given node ID, using the system clock.
    pub fn new(node_id: u16) -> Result<Self, IdError> {
        Self::with_clock(node_id, SystemClock)
    }

    /// Derive the node ID from the last 10 bits of the primary network
    /// interface's hardware address (spec §4.A), falling back to the
    /// supplied default when no interface is available.
    pub fn new_from_hardware_or(default_node_id: u16) -> Result<Self, IdError> {
        let node_id = mac_address::get_mac_address()
            .ok()
            .flatten()
            .map(|mac| {
                let bytes = mac.bytes();
                let last_two = u16::from_be_bytes([bytes[4], bytes[5]]);
                last_two & (NODE_MASK as u16)
            })
            .unwrap_or(default_node_id);
        Self::new(node_id)
    }
}

impl<C: Clock> Allocator<C> {
    pub fn with_clock(node_id: u16, clock: C) -> Result<Self, IdError> {
        if node_id > MAX_NODE_ID {
            return Err(IdError::InvalidNodeId(node_id));
        }
        Ok(Self {
            node_id,
            clock,
            state: AtomicU64::new(0),
        })
    }

    /// Allocate the next ID for `type_id` (0–31).
    ///
    /// Spin-waits for the next millisecond when the 256-wide sequence space
    /// for the current millisecond is exhausted. Returns
    /// [`IdError::ClockMovedBackwards`] without mutating state when the clock
    /// reads behind the last successful allocation.
    pub fn next(&self, type_id: u8) -> Result<u64, IdError> {
        if type_id > MAX_TYPE_ID {
            return Err(IdError::InvalidTypeId(type_id));
        }
        loop {
            let now_ms = self.clock.now_ms().max(0) as u64;
            let prev = self.state.load(Ordering::Acquire);
            let prev_ms = prev >> SEQ_BITS;

            if now_ms < prev_ms {
                return Err(IdError::ClockMovedBackwards {
                    now_ms: now_ms as i64,
                    last_ms: prev_ms as i64,
                });
            }

            let (new_ms, seq) = if now_ms == prev_ms {
                let seq = (prev & SEQ_MASK) + 1;
                if seq > SEQ_MASK {
                    // Sequence space exhausted for this millisecond; spin
                    // until the clock advances, then retry the whole loop.
                    std::hint::spin_loop();
                    continue;
                }
                (now_ms, seq)
            } else {
                (now_ms, 0)
            };

            let new_state = (new_ms << SEQ_BITS) | seq;
            if self
                .state
                .compare_exchange_weak(prev, new_state, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(pack(new_ms & TS_MASK, self.node_id, type_id, seq as u8));
            }
        }
    }

    pub fn unpack(id: u64) -> Unpacked {
        let seq = (id & SEQ_MASK) as u8;
        let type_id = ((id >> SEQ_BITS) & TYPE_MASK) as u8;
        let node = ((id >> (SEQ_BITS + TYPE_BITS)) & NODE_MASK) as u16;
        let ts_ms = (id >> (SEQ_BITS + TYPE_BITS + NODE_BITS)) & TS_MASK;
        Unpacked {
            ts_ms,
            node,
            type_id,
            seq,
        }
    }
}

fn pack(ts_ms: u64, node: u16, type_id: u8, seq: u8) -> u64 {
    (ts_ms << (SEQ_BITS + TYPE_BITS + NODE_BITS))
        | ((node as u64 & NODE_MASK) << (SEQ_BITS + TYPE_BITS))
        | ((type_id as u64 & TYPE_MASK) << SEQ_BITS)
        | (seq as u64 & SEQ_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    struct FakeClock(AtomicI64);

    impl FakeClock {
        fn new(ms: i64) -> Self {
            Self(AtomicI64::new(ms))
        }
        fn set(&self, ms: i64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now_ms(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn unpack_inverts_pack_for_arbitrary_fields() {
        let id = pack(123_456, 777, 9, 200);
        let unpacked = Allocator::<SystemClock>::unpack(id);
        assert_eq!(unpacked.ts_ms, 123_456);
        assert_eq!(unpacked.node, 777);
        assert_eq!(unpacked.type_id, 9);
        assert_eq!(unpacked.seq, 200);
    }

    #[test]
    fn next_ids_strictly_increase_within_same_millisecond() {
        let clock = FakeClock::new(1000);
        let alloc = Allocator::with_clock(1, clock).unwrap();
        let a = alloc.next(0).unwrap();
        let b = alloc.next(0).unwrap();
        let c = alloc.next(0).unwrap();
        assert!(a < b && b < c);
        assert_eq!(Allocator::<SystemClock>::unpack(a).seq, 0);
        assert_eq!(Allocator::<SystemClock>::unpack(b).seq, 1);
        assert_eq!(Allocator::<SystemClock>::unpack(c).seq, 2);
    }

    #[test]
    fn next_ids_strictly_increase_across_millisecond_boundary_and_resets_seq() {
        let clock = FakeClock::new(1000);
        let alloc = Allocator::with_clock(1, clock).unwrap();
        let a = alloc.next(0).unwrap();
        alloc.clock.set(1001);
        let b = alloc.next(0).unwrap();
        assert!(a < b);
        assert_eq!(Allocator::<SystemClock>::unpack(b).ts_ms, 1001);
        assert_eq!(Allocator::<SystemClock>::unpack(b).seq, 0);
    }

    #[test]
    fn next_rejects_clock_regression_until_monotonicity_restored() {
        let clock = FakeClock::new(2000);
        let alloc = Allocator::with_clock(1, clock).unwrap();
        let _ = alloc.next(0).unwrap();

        alloc.clock.set(1999);
        let err = alloc.next(0).unwrap_err();
        assert_eq!(
            err,
            IdError::ClockMovedBackwards {
                now_ms: 1999,
                last_ms: 2000
            }
        );

        // Still rejected while behind.
        assert!(alloc.next(0).is_err());

        // Recovers once the clock catches back up.
        alloc.clock.set(2000);
        assert!(alloc.next(0).is_ok());
    }

    #[test]
    fn next_rejects_node_and_type_id_out_of_range() {
        assert_eq!(
            Allocator::new(2000).unwrap_err(),
            IdError::InvalidNodeId(2000)
        );
        let alloc = Allocator::with_clock(1, FakeClock::new(0)).unwrap();
        assert_eq!(alloc.next(32).unwrap_err(), IdError::InvalidTypeId(32));
    }

    #[test]
    fn concurrent_allocations_never_collide() {
        use std::collections::HashSet;
        use std::sync::Arc;
        use std::thread;

        let alloc = Arc::new(Allocator::with_clock(1, FakeClock::new(5000)).unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let alloc = alloc.clone();
            handles.push(thread::spawn(move || {
                (0..50)
                    .map(|_| alloc.next(0).unwrap())
                    .collect::<Vec<_>>()
            }));
        }
        let mut all = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(all.insert(id), "duplicate id allocated: {id}");
            }
        }
        assert_eq!(all.len(), 400);
    }
}
