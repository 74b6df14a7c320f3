use async_trait::async_trait;
use refsync_core::client::{
    ApiRequest, ApiResponse, ClientError, ClientHandle, ResponseMeta, WorkerPool,
};
use refsync_core::config::ThrottleConfig;
use refsync_core::throttle::RateLimiter;
use refsync_core::{Error, Result};
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::instrument;

pub const DEFAULT_BASE_URL: &str = "https://esi.evetech.net/latest";
pub const DEFAULT_USER_AGENT: &str = "refsync";
pub const DEFAULT_DATASOURCE: &str = "tranquility";

#[derive(Debug, Clone)]
pub struct EsiClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// Sent as the `datasource` query parameter on every call.
    pub datasource: String,
}

impl Default for EsiClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(20),
            datasource: DEFAULT_DATASOURCE.to_string(),
        }
    }
}

impl EsiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "esi base url must be http(s): {}",
                self.base_url
            )));
        }
        if self.user_agent.trim().is_empty() {
            return Err(Error::InvalidInput(
                "esi user agent must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidInput(
                "esi timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP client for the ESI reference endpoints.
///
/// Owns the process-wide rate limiter and the fan-out worker pool handed to adapters.
pub struct EsiClient {
    http: Client,
    config: EsiClientConfig,
    limiter: RateLimiter,
    workers: WorkerPool,
}

impl EsiClient {
    pub fn new(
        config: EsiClientConfig,
        throttle: ThrottleConfig,
        workers: WorkerPool,
    ) -> Result<Self> {
        config.validate()?;
        throttle.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::backend("build esi http client", e))?;

        Ok(Self {
            http,
            config,
            limiter: RateLimiter::new(throttle),
            workers,
        })
    }

    pub fn config(&self) -> &EsiClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ClientHandle for EsiClient {
    #[instrument(level = "debug", skip(self, request), fields(path = %request.path))]
    async fn call(&self, call_class: &str, request: ApiRequest) -> Result<ApiResponse> {
        let mut query = request.query;
        query.push(("datasource".to_string(), self.config.datasource.clone()));

        let resp = self
            .http
            .get(self.url(&request.path))
            .query(&query)
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("esi request failed: {e}")))?;

        let status = resp.status().as_u16();
        let meta = {
            let headers = resp.headers();
            ResponseMeta::from_headers(|name| headers.get(name).and_then(|v| v.to_str().ok()))
        };

        let bytes = resp.bytes().await.map_err(|e| ClientError {
            status: Some(status),
            message: format!("esi response body unreadable: {e}"),
            meta: meta.clone(),
        })?;

        let body = if bytes.is_empty() {
            None
        } else {
            match serde_json::from_slice::<serde_json::Value>(&bytes) {
                Ok(v) => Some(v),
                Err(e) if status == 200 => {
                    return Err(ClientError::malformed(
                        format!("esi response is not json: {e}"),
                        meta,
                    )
                    .into());
                }
                // Error pages are often plain text; the status is what matters.
                Err(_) => None,
            }
        };

        if status != 200 {
            tracing::debug!(
                status,
                error_limit_remain = ?meta.error_limit_remain,
                "esi returned non-success status"
            );
        }
        Ok(ApiResponse { status, meta, body })
    }

    fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn workers(&self) -> &WorkerPool {
        &self.workers
    }
}
