use crate::core::config::ConfigError;
use crate::core::errors::ExchangeError;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// Published venue limit: `permits` calls per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub window: Duration,
    pub permits: NonZeroU32,
}

impl RateLimitRule {
    pub const fn new(window: Duration, permits: NonZeroU32) -> Self {
        Self { window, permits }
    }
}

/// A named family of REST operations sharing one venue quota.
///
/// Implemented by a venue's endpoint enum; `all` must list every variant so
/// the limiter can be checked for completeness at startup.
pub trait EndpointClass: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn all() -> &'static [Self];

    fn rule(self) -> RateLimitRule;
}

/// Sliding-window log of the last `permits` grant instants
struct Bucket {
    rule: RateLimitRule,
    grants: Mutex<VecDeque<Instant>>,
}

impl Bucket {
    fn new(rule: RateLimitRule) -> Self {
        Self {
            rule,
            grants: Mutex::new(VecDeque::with_capacity(rule.permits.get() as usize)),
        }
    }

    /// Record a grant at `now`, or return how long until the oldest grant leaves the window
    fn try_acquire(&self, now: Instant) -> Result<(), Duration> {
        let mut grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);

        while let Some(oldest) = grants.front() {
            if now.duration_since(*oldest) >= self.rule.window {
                grants.pop_front();
            } else {
                break;
            }
        }

        match grants.front() {
            Some(oldest) if grants.len() >= self.rule.permits.get() as usize => {
                Err((*oldest + self.rule.window).saturating_duration_since(now))
            }
            _ => {
                grants.push_back(now);
                Ok(())
            }
        }
    }
}

/// Per-endpoint-class token buckets.
///
/// Each class gets its own bucket that grants at most `permits` calls within
/// any `window`-long interval: the first `permits` calls pass immediately and
/// the next one waits until the oldest grant falls out of the window. Buckets
/// are independent, so waiting on one class never contends with another. The
/// class map is fixed at construction; each bucket takes a short lock per grant.
pub struct EndpointRateLimiter<E: EndpointClass> {
    buckets: HashMap<E, Bucket>,
}

impl<E: EndpointClass> fmt::Debug for EndpointRateLimiter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRateLimiter")
            .field("classes", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

impl<E: EndpointClass> EndpointRateLimiter<E> {
    /// Build one bucket for every class the venue declares
    pub fn new() -> Result<Self, ExchangeError> {
        Self::from_rules(E::all().iter().map(|class| (*class, class.rule())))
    }

    /// Build from an explicit table, e.g. to override published limits
    pub fn from_rules(
        rules: impl IntoIterator<Item = (E, RateLimitRule)>,
    ) -> Result<Self, ExchangeError> {
        let mut buckets = HashMap::new();

        for (class, rule) in rules {
            if rule.window.is_zero() {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "endpoint class {:?} has an empty rate limit window",
                    class
                ))
                .into());
            }
            if buckets.insert(class, Bucket::new(rule)).is_some() {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "endpoint class {:?} registered twice",
                    class
                ))
                .into());
            }
        }

        Ok(Self { buckets })
    }

    /// Fail if any declared class is missing a bucket
    pub fn validate(&self) -> Result<(), ExchangeError> {
        let missing: Vec<String> = E::all()
            .iter()
            .filter(|class| !self.buckets.contains_key(class))
            .map(|class| format!("{:?}", class))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidConfiguration(format!(
                "endpoint classes without a rate limit: {}",
                missing.join(", ")
            ))
            .into())
        }
    }

    pub fn rule(&self, class: E) -> Option<RateLimitRule> {
        self.buckets.get(&class).map(|bucket| bucket.rule)
    }

    fn bucket(&self, class: E) -> Result<&Bucket, ExchangeError> {
        self.buckets
            .get(&class)
            .ok_or_else(|| ExchangeError::UnregisteredEndpoint(format!("{:?}", class)))
    }

    /// Wait until a permit for `class` is available.
    ///
    /// Exhausted buckets delay the caller instead of failing it.
    #[instrument(skip(self))]
    pub async fn limit(&self, class: E) -> Result<(), ExchangeError> {
        let bucket = self.bucket(class)?;

        loop {
            match bucket.try_acquire(Instant::now()) {
                Ok(()) => {
                    trace!("permit granted");
                    return Ok(());
                }
                Err(wait) => {
                    debug!(?wait, "bucket exhausted, waiting for permit");
                    // Another waiter may take the freed slot first, so re-check after waking
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Take a permit if one is available right now
    pub fn try_limit(&self, class: E) -> Result<bool, ExchangeError> {
        Ok(self.bucket(class)?.try_acquire(Instant::now()).is_ok())
    }

    /// Like [`limit`](Self::limit) but gives up after `deadline`
    pub async fn limit_with_deadline(
        &self,
        class: E,
        deadline: Duration,
    ) -> Result<(), ExchangeError> {
        tokio::time::timeout(deadline, self.limit(class))
            .await
            .map_err(|_| {
                ExchangeError::Cancelled(format!(
                    "no permit for {:?} within {:?}",
                    class, deadline
                ))
            })?
    }

    /// Like [`limit`](Self::limit) but returns early once `shutdown` flips to true
    pub async fn limit_or_shutdown(
        &self,
        class: E,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ExchangeError> {
        let cancelled = || ExchangeError::Cancelled(format!("shutdown while waiting on {:?}", class));

        if *shutdown.borrow() {
            return Err(cancelled());
        }

        tokio::select! {
            result = self.limit(class) => result,
            _ = async {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            } => Err(cancelled()),
        }
    }
}
