//! Monotonic time and lock-free timestamp publication

use std::sync::atomic::{fence, AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds on the process monotonic clock
pub fn monotonic_nanos() -> i64 {
    epoch().elapsed().as_nanos() as i64
}

/// Nanoseconds since the Unix epoch
pub fn realtime_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Duration of `frames` at `sample_rate`, in nanoseconds
pub fn frames_to_nanos(frames: i64, sample_rate: i32) -> i64 {
    if sample_rate <= 0 {
        return 0;
    }
    frames * NANOS_PER_SECOND / sample_rate as i64
}

/// Clock a timestamp is referenced to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockId {
    Monotonic,
    Realtime,
}

impl ClockId {
    pub fn now(self) -> i64 {
        match self {
            ClockId::Monotonic => monotonic_nanos(),
            ClockId::Realtime => realtime_nanos(),
        }
    }
}

/// Frame position observed at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub position: i64,
    pub nanos: i64,
}

impl Timestamp {
    pub fn new(position: i64, nanos: i64) -> Self {
        Self { position, nanos }
    }
}

/// Single-writer timestamp cell readable from any thread without locking.
///
/// Sequence-lock: the writer bumps the sequence to odd, stores both halves,
/// then bumps it to even. Readers retry while the sequence is odd or moved.
#[derive(Debug, Default)]
pub struct AtomicTimestamp {
    sequence: AtomicU64,
    position: AtomicI64,
    nanos: AtomicI64,
}

impl AtomicTimestamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new snapshot. Only one thread may call this at a time.
    pub fn write(&self, timestamp: Timestamp) {
        let seq = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        self.position.store(timestamp.position, Ordering::Relaxed);
        self.nanos.store(timestamp.nanos, Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Latest snapshot, or `None` if nothing was published yet
    pub fn read(&self) -> Option<Timestamp> {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before == 0 {
                return None;
            }
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let position = self.position.load(Ordering::Relaxed);
            let nanos = self.nanos.load(Ordering::Relaxed);
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == before {
                return Some(Timestamp { position, nanos });
            }
        }
    }

    /// Forget the published snapshot
    pub fn clear(&self) {
        self.sequence.store(0, Ordering::Release);
    }

    pub fn is_valid(&self) -> bool {
        self.sequence.load(Ordering::Acquire) != 0
    }
}
