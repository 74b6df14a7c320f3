use crate::models::Endpoint;
use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::time::Duration;

/// Orchestrator and scheduler settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay before the next run when the adapter reports no usable expiry.
    pub default_sync_delay: Duration,
    /// A claimed run older than this is terminated with a warning.
    pub max_delay: Duration,
    /// Candidates committed per store transaction.
    pub commit_batch_size: usize,
    /// Endpoints the scheduler never runs.
    pub excluded_endpoints: BTreeSet<Endpoint>,
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_sync_delay: Duration::from_secs(5 * 60),
            max_delay: Duration::from_secs(20 * 60),
            commit_batch_size: 200,
            excluded_endpoints: BTreeSet::new(),
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let cfg = Self {
            default_sync_delay: parse_ms(&var, "REFSYNC_SYNC_DELAY_MS")
                .unwrap_or(d.default_sync_delay),
            max_delay: parse_ms(&var, "REFSYNC_MAX_DELAY_MS").unwrap_or(d.max_delay),
            commit_batch_size: parse_var::<usize>(&var, "REFSYNC_COMMIT_BATCH_SIZE")
                .unwrap_or(d.commit_batch_size),
            excluded_endpoints: var("REFSYNC_EXCLUDE_SYNC")
                .map(|v| parse_excluded(&v))
                .unwrap_or_default(),
            poll_interval: parse_ms(&var, "REFSYNC_POLL_INTERVAL_MS").unwrap_or(d.poll_interval),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.default_sync_delay.is_zero() {
            return Err(Error::InvalidInput(
                "default_sync_delay must be > 0".to_string(),
            ));
        }
        if self.max_delay.is_zero() {
            return Err(Error::InvalidInput("max_delay must be > 0".to_string()));
        }
        if self.commit_batch_size == 0 {
            return Err(Error::InvalidInput(
                "commit_batch_size must be > 0".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidInput("poll_interval must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn is_excluded(&self, endpoint: &Endpoint) -> bool {
        self.excluded_endpoints.contains(endpoint)
    }
}

/// Outbound rate limiting and error-budget backoff.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Permits per second for any call class without an override.
    pub default_rate_per_sec: u32,
    pub class_rates: HashMap<String, u32>,
    /// Cooldown starts when the remaining error budget drops below this.
    pub error_limit_threshold: u32,
    /// Used when the service does not say when its error budget resets.
    pub default_reset: Duration,
    /// Added on top of the reset countdown.
    pub grace: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            default_rate_per_sec: 3,
            class_rates: HashMap::new(),
            error_limit_threshold: 5,
            default_reset: Duration::from_secs(5),
            grace: Duration::from_secs(5),
        }
    }
}

impl ThrottleConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    /// `REFSYNC_THROTTLE_CLASS_RATES` takes `class=rate` pairs separated by `|`.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let cfg = Self {
            default_rate_per_sec: parse_var::<u32>(&var, "REFSYNC_THROTTLE_RATE")
                .unwrap_or(d.default_rate_per_sec),
            class_rates: var("REFSYNC_THROTTLE_CLASS_RATES")
                .map(|v| parse_class_rates(&v))
                .unwrap_or_default(),
            error_limit_threshold: parse_var::<u32>(&var, "REFSYNC_ERROR_LIMIT_THRESHOLD")
                .unwrap_or(d.error_limit_threshold),
            default_reset: parse_ms(&var, "REFSYNC_ERROR_LIMIT_RESET_MS")
                .unwrap_or(d.default_reset),
            grace: parse_ms(&var, "REFSYNC_ERROR_LIMIT_GRACE_MS").unwrap_or(d.grace),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.default_rate_per_sec == 0 {
            return Err(Error::InvalidInput(
                "default_rate_per_sec must be > 0".to_string(),
            ));
        }
        if let Some((class, _)) = self.class_rates.iter().find(|(_, r)| **r == 0) {
            return Err(Error::InvalidInput(format!(
                "rate for call class {class} must be > 0"
            )));
        }
        Ok(())
    }

    pub fn rate_for(&self, class: &str) -> u32 {
        self.class_rates
            .get(class)
            .copied()
            .unwrap_or(self.default_rate_per_sec)
    }
}

/// Fan-out settings.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub chunk_size: usize,
    /// How often a waiting fan-out logs the number of outstanding units.
    pub liveness_interval: Duration,
    pub max_concurrency: usize,
    /// Upper bound on a whole `fetch_all`, if any.
    pub deadline: Option<Duration>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            liveness_interval: Duration::from_secs(5),
            max_concurrency: 16,
            deadline: None,
        }
    }
}

impl FetchConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let cfg = Self {
            chunk_size: parse_var::<usize>(&var, "REFSYNC_FETCH_CHUNK_SIZE")
                .unwrap_or(d.chunk_size),
            liveness_interval: parse_ms(&var, "REFSYNC_FETCH_LIVENESS_MS")
                .unwrap_or(d.liveness_interval),
            max_concurrency: parse_var::<usize>(&var, "REFSYNC_FETCH_MAX_CONCURRENCY")
                .unwrap_or(d.max_concurrency),
            deadline: parse_ms(&var, "REFSYNC_FETCH_DEADLINE_MS"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidInput("chunk_size must be > 0".to_string()));
        }
        if self.liveness_interval.is_zero() {
            return Err(Error::InvalidInput(
                "liveness_interval must be > 0".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidInput(
                "max_concurrency must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Unparseable values are logged and treated as unset.
fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

fn parse_ms(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    parse_var::<u64>(var, key).map(Duration::from_millis)
}

fn parse_excluded(raw: &str) -> BTreeSet<Endpoint> {
    raw.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Endpoint::from)
        .collect()
}

fn parse_class_rates(raw: &str) -> HashMap<String, u32> {
    let mut out = HashMap::new();
    for pair in raw.split('|').map(str::trim).filter(|s| !s.is_empty()) {
        let parsed = pair
            .split_once('=')
            .and_then(|(class, rate)| Some((class.trim(), rate.trim().parse::<u32>().ok()?)));
        match parsed {
            Some((class, rate)) if !class.is_empty() => {
                out.insert(class.to_string(), rate);
            }
            _ => tracing::warn!(entry = %pair, "ignoring malformed call class rate"),
        }
    }
    out
}
