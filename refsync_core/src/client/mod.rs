//! The external service as seen by the engine.
//!
//! A `ClientHandle` issues one call per request and exposes the process-wide rate limiter and
//! worker pool. Concrete HTTP clients live in `refsync_integrations`.

use crate::throttle::RateLimiter;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

pub const EXPIRES_HEADER: &str = "expires";
pub const ERROR_LIMIT_REMAIN_HEADER: &str = "x-esi-error-limit-remain";
pub const ERROR_LIMIT_RESET_HEADER: &str = "x-esi-error-limit-reset";

/// Cache and error-budget metadata attached to every response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub expires: Option<DateTime<Utc>>,
    pub error_limit_remain: Option<u32>,
    /// Seconds until the error budget resets.
    pub error_limit_reset: Option<u32>,
}

impl ResponseMeta {
    /// Parses the metadata headers; absent or unparseable values become `None`.
    pub fn from_headers<'a>(header: impl Fn(&str) -> Option<&'a str>) -> Self {
        Self {
            expires: header(EXPIRES_HEADER).and_then(|v| {
                DateTime::parse_from_rfc2822(v.trim())
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }),
            error_limit_remain: header(ERROR_LIMIT_REMAIN_HEADER)
                .and_then(|v| v.trim().parse().ok()),
            error_limit_reset: header(ERROR_LIMIT_RESET_HEADER)
                .and_then(|v| v.trim().parse().ok()),
        }
    }
}

/// A failure reported by, or while talking to, the external service.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ClientError {
    /// HTTP status when the service answered.
    pub status: Option<u16>,
    pub message: String,
    pub meta: ResponseMeta,
}

impl ClientError {
    pub fn status(status: u16, meta: ResponseMeta) -> Self {
        Self {
            status: Some(status),
            message: format!("unexpected status {status}"),
            meta,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            meta: ResponseMeta::default(),
        }
    }

    pub fn malformed(message: impl Into<String>, meta: ResponseMeta) -> Self {
        Self {
            status: Some(200),
            message: message.into(),
            meta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// Path relative to the service base URL, e.g. `/alliances/99000001/`.
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub meta: ResponseMeta,
    pub body: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Common problem checks: anything but 200 with a non-null body is a client error.
    pub fn into_ok_body(self) -> std::result::Result<(serde_json::Value, ResponseMeta), ClientError> {
        if self.status != 200 {
            return Err(ClientError::status(self.status, self.meta));
        }
        match self.body {
            Some(body) if !body.is_null() => Ok((body, self.meta)),
            _ => Err(ClientError::malformed("response body is missing", self.meta)),
        }
    }

    pub fn into_json<T: DeserializeOwned>(self) -> std::result::Result<(T, ResponseMeta), ClientError> {
        let (body, meta) = self.into_ok_body()?;
        match serde_json::from_value(body) {
            Ok(v) => Ok((v, meta)),
            Err(e) => Err(ClientError::malformed(format!("malformed body: {e}"), meta)),
        }
    }
}

/// Runtime handle plus a concurrency cap for fan-out work.
#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl WorkerPool {
    pub fn new(handle: Handle, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// Pool on the runtime this is called from.
    pub fn current(max_concurrency: usize) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| Error::backend("worker_pool", e))?;
        Ok(Self::new(handle, max_concurrency))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn permits(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

/// Access to the external service.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Issues one call. Transport failures are `Error::Client`; any HTTP status is returned.
    async fn call(&self, call_class: &str, request: ApiRequest) -> Result<ApiResponse>;

    fn limiter(&self) -> &RateLimiter;

    fn workers(&self) -> &WorkerPool;
}

pub type SharedClient = Arc<dyn ClientHandle>;

/// One rate-limited call: takes a token first and reports error-budget metadata on failure.
#[tracing::instrument(level = "debug", skip(client, request), fields(path = %request.path))]
pub async fn throttled_call(
    client: &dyn ClientHandle,
    call_class: &str,
    request: ApiRequest,
) -> Result<ApiResponse> {
    client.limiter().acquire(call_class).await;
    match client.call(call_class, request).await {
        Ok(resp) => {
            if !resp.is_success() {
                client.limiter().observe(&resp.meta).await;
            }
            Ok(resp)
        }
        Err(Error::Client(e)) => {
            client.limiter().observe(&e.meta).await;
            Err(Error::Client(e))
        }
        Err(e) => Err(e),
    }
}

/// `throttled_call` followed by the common problem checks and JSON decoding.
pub async fn call_json<T: DeserializeOwned>(
    client: &dyn ClientHandle,
    call_class: &str,
    request: ApiRequest,
) -> Result<(T, ResponseMeta)> {
    let resp = throttled_call(client, call_class, request).await?;
    Ok(resp.into_json()?)
}

/// Unthrottled variant of `call_json` for fan-out units, which the fetcher already throttles.
pub async fn decode_call<T: DeserializeOwned>(
    client: &dyn ClientHandle,
    call_class: &str,
    request: ApiRequest,
) -> Result<(T, ResponseMeta)> {
    let resp = client.call(call_class, request).await?;
    Ok(resp.into_json()?)
}
