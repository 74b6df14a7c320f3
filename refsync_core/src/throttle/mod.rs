//! Outbound rate limiting.
//!
//! Every call class gets its own token bucket. Independently, the external service reports how
//! much of its shared error budget is left; when that drops below the configured threshold the
//! whole process pauses until the budget resets.

pub mod bucket;

use crate::client::ResponseMeta;
use crate::config::ThrottleConfig;
use bucket::TokenBucket;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RateLimiter {
    config: ThrottleConfig,
    buckets: DashMap<String, Arc<TokenBucket>>,
    cooldown_until: Mutex<Option<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            cooldown_until: Mutex::new(None),
        }
    }

    pub fn class_rate(&self, call_class: &str) -> u32 {
        self.config.rate_for(call_class)
    }

    /// Waits out any active cooldown, then takes one token for `call_class`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn acquire(&self, call_class: &str) {
        self.wait_for_cooldown().await;
        self.bucket(call_class).acquire().await;
    }

    /// Reacts to error-budget headers. Returns true when a cooldown was started or extended, in
    /// which case the caller has already slept until it ended.
    #[tracing::instrument(level = "debug", skip(self, meta))]
    pub async fn observe(&self, meta: &ResponseMeta) -> bool {
        let Some(remain) = meta.error_limit_remain else {
            return false;
        };
        if remain >= self.config.error_limit_threshold {
            return false;
        }

        let reset = meta
            .error_limit_reset
            .map(|s| Duration::from_secs(u64::from(s)))
            .unwrap_or(self.config.default_reset);
        let deadline = Instant::now() + reset + self.config.grace;
        {
            let mut until = self.cooldown_until.lock().await;
            if until.is_none_or(|current| current < deadline) {
                *until = Some(deadline);
            }
        }
        tracing::warn!(
            remain,
            cooldown_ms = (reset + self.config.grace).as_millis() as u64,
            "error budget nearly exhausted, pausing outbound calls"
        );

        self.wait_for_cooldown().await;
        true
    }

    /// Time left on the process-wide cooldown, if one is active.
    pub async fn cooldown_remaining(&self) -> Option<Duration> {
        let until = (*self.cooldown_until.lock().await)?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    async fn wait_for_cooldown(&self) {
        // Re-checked after each sleep because another caller may extend the deadline.
        while let Some(remaining) = self.cooldown_remaining().await {
            tokio::time::sleep(remaining).await;
        }
    }

    fn bucket(&self, call_class: &str) -> Arc<TokenBucket> {
        self.buckets
            .entry(call_class.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::per_second(self.config.rate_for(call_class))))
            .value()
            .clone()
    }
}
