// Request throttle shared by every client and stream of a process.
//
// Two token buckets are superimposed: a sustained bucket that matches the
// cloud's per-minute quota and a short burst bucket that spreads requests
// over seconds. A permit is only handed out when both buckets have a token,
// and then one token is taken from each.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Error;

// ── Configuration ────────────────────────────────────────────────────

/// Shape of one token bucket.
///
/// Refill is interval-based: every full `refill_period` that elapses adds
/// `refill_tokens`, capped at `capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub capacity: u32,
    pub refill_tokens: u32,
    #[serde(with = "duration_secs")]
    pub refill_period: Duration,
    pub initial_tokens: u32,
}

/// Tuning for [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub sustained: BucketConfig,
    pub burst: BucketConfig,
    /// Longest time a caller may wait for a permit. `None` waits forever.
    #[serde(default, with = "opt_duration_secs")]
    pub max_wait: Option<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sustained: BucketConfig {
                capacity: 50,
                refill_tokens: 50,
                refill_period: Duration::from_secs(70),
                initial_tokens: 40,
            },
            burst: BucketConfig {
                capacity: 10,
                refill_tokens: 10,
                refill_period: Duration::from_secs(1),
                initial_tokens: 0,
            },
            max_wait: Some(Duration::from_secs(150)),
        }
    }
}

// ── Bucket state ─────────────────────────────────────────────────────

#[derive(Debug)]
struct Bucket {
    config: BucketConfig,
    tokens: u32,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: BucketConfig, now: Instant) -> Self {
        Self {
            config,
            tokens: config.initial_tokens.min(config.capacity),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let period = self.config.refill_period;
        if period.is_zero() {
            self.tokens = self.config.capacity;
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let periods = u32::try_from(elapsed.as_nanos() / period.as_nanos()).unwrap_or(u32::MAX);
        if periods == 0 {
            return;
        }
        let added = periods.saturating_mul(self.config.refill_tokens);
        self.tokens = self.tokens.saturating_add(added).min(self.config.capacity);
        self.last_refill += period.saturating_mul(periods);
    }

    fn next_refill(&self) -> Instant {
        self.last_refill + self.config.refill_period
    }
}

#[derive(Debug)]
struct Buckets {
    sustained: Bucket,
    burst: Bucket,
}

// ── RateLimiter ──────────────────────────────────────────────────────

/// Process-wide throttle for read requests.
///
/// Create one and share it (`Arc<RateLimiter>`) between every
/// [`ApplianceClient`](crate::ApplianceClient) and
/// [`EventStream`](crate::EventStream) talking to the same account.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let now = Instant::now();
        Self {
            buckets: Mutex::new(Buckets {
                sustained: Bucket::new(config.sustained, now),
                burst: Bucket::new(config.burst, now),
            }),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait for and consume one permit.
    pub async fn acquire(&self) -> Result<(), Error> {
        self.acquire_cancellable(&CancellationToken::new()).await
    }

    /// Wait for and consume one permit, giving up when `cancel` fires.
    ///
    /// A cancelled or timed-out wait never consumes a token.
    pub async fn acquire_cancellable(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let started = Instant::now();
        let deadline = self.config.max_wait.map(|wait| started + wait);

        loop {
            let wake_at = match self.try_take(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(wake_at) => wake_at,
            };

            if deadline.is_some_and(|deadline| wake_at > deadline) {
                let waited = Instant::now().saturating_duration_since(started);
                debug!(waited_ms = millis(waited), "rate limiter wait would exceed max_wait");
                return Err(Error::RateLimitTimeout {
                    waited_ms: millis(waited),
                });
            }

            trace!(
                wait_ms = millis(wake_at.saturating_duration_since(Instant::now())),
                "waiting for rate limiter permit"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Tokens currently available as `(sustained, burst)`.
    pub fn available(&self) -> (u32, u32) {
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        buckets.sustained.refill(now);
        buckets.burst.refill(now);
        (buckets.sustained.tokens, buckets.burst.tokens)
    }

    /// Take one token from both buckets, or report when to try again.
    fn try_take(&self, now: Instant) -> Result<(), Instant> {
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        buckets.sustained.refill(now);
        buckets.burst.refill(now);

        if buckets.sustained.tokens > 0 && buckets.burst.tokens > 0 {
            buckets.sustained.tokens -= 1;
            buckets.burst.tokens -= 1;
            return Ok(());
        }

        let mut wake_at = now;
        if buckets.sustained.tokens == 0 {
            wake_at = wake_at.max(buckets.sustained.next_refill());
        }
        if buckets.burst.tokens == 0 {
            wake_at = wake_at.max(buckets.burst.next_refill());
        }
        Err(wake_at)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Serde helpers ────────────────────────────────────────────────────

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod opt_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
