use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket refilled in whole intervals.
pub struct TokenBucket {
    capacity: u64,
    tokens: AtomicU64,
    /// Tokens added per elapsed `refill_interval`.
    refill_rate: u64,
    refill_interval: Duration,
    last_refill: Mutex<Instant>,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u64, refill_rate: u64, refill_interval: Duration) -> Self {
        Self {
            capacity,
            tokens: AtomicU64::new(capacity),
            refill_rate,
            refill_interval,
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// `rate` permits per second, with at most one second of burst.
    #[must_use]
    pub fn per_second(rate: u32) -> Self {
        let rate = u64::from(rate.max(1));
        Self::new(rate, rate, Duration::from_secs(1))
    }

    pub async fn try_acquire(&self) -> bool {
        self.refill().await;

        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Waits until a token is available.
    pub async fn acquire(&self) {
        while !self.try_acquire().await {
            tokio::time::sleep(self.refill_interval / 10).await;
        }
    }

    pub fn available(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }

    async fn refill(&self) {
        let mut last_refill = self.last_refill.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(*last_refill);
        let intervals = (elapsed.as_nanos() / self.refill_interval.as_nanos().max(1)) as u64;
        if intervals == 0 {
            return;
        }

        let new_tokens = intervals.saturating_mul(self.refill_rate);
        loop {
            let current = self.tokens.load(Ordering::Relaxed);
            let next = current.saturating_add(new_tokens).min(self.capacity);
            if self
                .tokens
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        // Keep the partial interval so refills do not drift.
        match u32::try_from(intervals) {
            Ok(n) => *last_refill += self.refill_interval * n,
            Err(_) => *last_refill = now,
        }
    }
}
