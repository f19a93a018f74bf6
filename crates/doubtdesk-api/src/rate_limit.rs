use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::ApiError;

/// Entries are swept once the table grows past this many callers.
const SWEEP_THRESHOLD: usize = 10_000;

/// Fixed-window limiter keyed by caller. Excess calls fail, they never queue.
pub struct RateLimiter {
    name: &'static str,
    max: u32,
    window: Duration,
    message: String,
    hits: Mutex<HashMap<String, Window>>,
}

struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(name: &'static str, max: u32, window: Duration, message: impl Into<String>) -> Self {
        Self {
            name,
            max,
            window,
            message: message.into(),
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Result<(), ApiError> {
        self.check_at(key, Instant::now())
    }

    /// Record one call for `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), ApiError> {
        let mut hits = self
            .hits
            .lock()
            .map_err(|e| anyhow::anyhow!("rate limiter lock poisoned: {}", e))?;

        if hits.len() > SWEEP_THRESHOLD {
            let window = self.window;
            hits.retain(|_, w| now.saturating_duration_since(w.started) < window);
        }

        let entry = hits.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.saturating_duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= self.max {
            warn!("Rate limit '{}' hit by {}", self.name, key);
            return Err(ApiError::RateLimited(self.message.clone()));
        }

        entry.count += 1;
        Ok(())
    }
}

/// Tunable quotas. Defaults: 5 comments and 3 doubts per minute per user.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub comments_per_minute: u32,
    pub doubts_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            comments_per_minute: 5,
            doubts_per_minute: 3,
        }
    }
}

pub struct RateLimiters {
    pub comments: RateLimiter,
    pub doubts: RateLimiter,
    pub login: RateLimiter,
    pub register: RateLimiter,
}

impl RateLimiters {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            comments: RateLimiter::new(
                "comments",
                config.comments_per_minute,
                Duration::from_secs(60),
                "You're commenting too fast. Wait a moment.",
            ),
            doubts: RateLimiter::new(
                "doubts",
                config.doubts_per_minute,
                Duration::from_secs(60),
                format!("You can only post {} doubts per minute.", config.doubts_per_minute),
            ),
            login: RateLimiter::new(
                "login",
                5,
                Duration::from_secs(5 * 60),
                "Too many login attempts. Please try again after 5 minutes.",
            ),
            register: RateLimiter::new(
                "register",
                3,
                Duration::from_secs(60 * 60),
                "Too many accounts created. Try again after an hour.",
            ),
        }
    }
}
