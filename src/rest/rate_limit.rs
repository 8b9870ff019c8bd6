//! Rate limiting policies consulted before every REST attempt.
//!
//! A limiter only answers "how long must I wait before the next
//! request". The executor awaits that duration; the limiter never
//! sleeps itself. Both bundled policies reserve the slot they hand out,
//! so concurrent callers queue up instead of all waking at once.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Pluggable request pacing policy.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Time to wait before sending the next request. Zero means now.
    async fn wait_time(&self) -> Duration;
}

/// Permissive default: never waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn wait_time(&self) -> Duration {
        Duration::ZERO
    }
}

/// Token bucket with reservation semantics.
///
/// Every call takes one token. When the bucket is empty the balance goes
/// negative and the returned wait covers the deficit at the refill rate.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// # Arguments
    /// * `capacity` - Maximum burst size
    /// * `refill_per_sec` - Tokens added per second, must be positive
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity.max(1)),
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity.max(1)),
                last_update: Instant::now(),
            }),
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn wait_time(&self) -> Duration {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_update = now;

        state.tokens -= 1.0;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.refill_per_sec)
        }
    }
}

/// At most `limit` requests per fixed window.
///
/// A call that finds the current window full is assigned a slot in the
/// next window with room, and waits until that window opens.
#[derive(Debug)]
pub struct FixedWindow {
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    start: Instant,
    used: u32,
}

impl FixedWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window: window.max(Duration::from_millis(1)),
            state: Mutex::new(WindowState {
                start: Instant::now(),
                used: 0,
            }),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindow {
    async fn wait_time(&self) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        // roll forward past windows that have already ended
        let elapsed = now.saturating_duration_since(state.start);
        if elapsed >= self.window {
            let window = self.window.as_nanos();
            let skipped = elapsed.as_nanos() / window * window;
            state.start += Duration::from_nanos(u64::try_from(skipped).unwrap_or(u64::MAX));
            state.used = 0;
        }

        if state.used >= self.limit {
            state.start += self.window;
            state.used = 0;
        }

        state.used += 1;
        state.start.saturating_duration_since(now)
    }
}
