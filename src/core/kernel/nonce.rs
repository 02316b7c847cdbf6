use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

/// Where a fresh sequencer takes its first value from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedPolicy {
    UnixSeconds,
    UnixMillis,
    UnixNanos,
    /// Fixed starting value, mostly for deterministic tests
    Value(u64),
}

impl SeedPolicy {
    fn seed(self) -> u64 {
        let since_epoch = || {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
        };

        let seed = match self {
            Self::UnixSeconds => since_epoch().as_secs(),
            Self::UnixMillis => since_epoch().as_millis() as u64,
            Self::UnixNanos => since_epoch().as_nanos() as u64,
            Self::Value(value) => value,
        };

        // Zero is the unseeded marker
        seed.max(1)
    }
}

/// Monotonic nonce for one credential set.
///
/// The counter is seeded lazily from wall-clock time on first use and then
/// incremented atomically, so concurrent callers never observe the same value.
///
/// Nothing is persisted: a process restart reseeds from the clock, which can
/// yield a value below one the venue already accepted if nonces were issued
/// faster than the clock advanced. Callers that care must persist the last
/// value themselves.
///
/// The counter never wraps: once it reaches `u64::MAX` it keeps returning that
/// value and logs an error, since no larger nonce exists.
#[derive(Debug, Default)]
pub struct Nonce {
    value: AtomicU64,
}

impl Nonce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current value and advance the stored value by one
    pub fn get_and_increment(&self, policy: SeedPolicy) -> u64 {
        if self.value.load(Ordering::Acquire) == 0 {
            let seed = policy.seed();
            if self
                .value
                .compare_exchange(0, seed.saturating_add(1), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return seed;
            }
        }

        match self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| value.checked_add(1))
        {
            Ok(previous) => previous,
            Err(exhausted) => {
                error!(value = exhausted, "nonce counter exhausted");
                exhausted
            }
        }
    }

    /// Decimal rendering used by header-based signers
    pub fn get_and_increment_string(&self, policy: SeedPolicy) -> String {
        self.get_and_increment(policy).to_string()
    }

    /// Next value to be issued, 0 while unseeded
    pub fn peek(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}
