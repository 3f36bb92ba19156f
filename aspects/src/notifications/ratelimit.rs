use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Per-channel admission limits.
///
/// Both buckets must have a token for a send to be admitted; a denied send
/// makes no channel call and reports `attempts = 0`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RateLimit {
    /// Sends admitted per minute.
    pub max_per_minute: u32,
    /// Sends admitted per hour.
    pub max_per_hour: u32,
}

/// A fixed-window token bucket: the token count refills to `capacity` when
/// a full window has elapsed since the window started.
#[derive(Debug)]
struct FixedWindowBucket {
    capacity: u32,
    window: Duration,
    tokens: u32,
    window_started: Instant,
}

impl FixedWindowBucket {
    fn new(capacity: u32, window: Duration, now: Instant) -> Self {
        Self {
            capacity,
            window,
            tokens: capacity,
            window_started: now,
        }
    }

    fn refill_at(&mut self, now: Instant) {
        if now.duration_since(self.window_started) >= self.window {
            self.tokens = self.capacity;
            self.window_started = now;
        }
    }
}

/// The minute and hour buckets of one channel.
///
/// Admission checks and decrements both buckets under one `&mut self`, so a
/// send is only ever charged against both or neither.
#[derive(Debug)]
pub(super) struct ChannelRateLimiter {
    minute: FixedWindowBucket,
    hour: FixedWindowBucket,
}

impl ChannelRateLimiter {
    pub(super) fn new(limit: RateLimit) -> Self {
        Self::new_at(limit, Instant::now())
    }

    fn new_at(limit: RateLimit, now: Instant) -> Self {
        Self {
            minute: FixedWindowBucket::new(limit.max_per_minute, Duration::from_secs(60), now),
            hour: FixedWindowBucket::new(limit.max_per_hour, Duration::from_secs(3600), now),
        }
    }

    /// Returns whether a send is admitted, consuming one token from each
    /// bucket if so.
    pub(super) fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.minute.refill_at(now);
        self.hour.refill_at(now);

        if self.minute.tokens == 0 || self.hour.tokens == 0 {
            return false;
        }

        self.minute.tokens -= 1;
        self.hour.tokens -= 1;

        true
    }
}
