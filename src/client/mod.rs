pub mod rate_limit;
pub mod retry;
pub mod tracking;

pub use rate_limit::RateLimiter;
pub use retry::{retry_after, Backoff, RetryPolicy};
pub use tracking::{CallStatus, TrackingEntry, TrackingLog};

use anyhow::Context;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::{Mutex, MutexGuard};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use crate::pagination;

const TRACKING_ID_HEADER: &str = "trackingid";

/// A single call against the partner API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Organization the call is made on behalf of, for the tracking log.
    pub org_id: Option<String>,
    pub call_type: &'static str,
}

impl ApiRequest {
    pub fn new(method: Method, call_type: &'static str, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            body: None,
            org_id: None,
            call_type,
        }
    }

    pub fn get(call_type: &'static str, url: impl Into<String>) -> Self {
        Self::new(Method::GET, call_type, url)
    }

    pub fn post(call_type: &'static str, url: impl Into<String>) -> Self {
        Self::new(Method::POST, call_type, url)
    }

    pub fn put(call_type: &'static str, url: impl Into<String>) -> Self {
        Self::new(Method::PUT, call_type, url)
    }

    #[must_use]
    pub fn for_org(mut self, org_id: &str) -> Self {
        self.org_id = Some(org_id.to_string());
        self
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Same call against a fully qualified follow-up URL; query params are dropped.
    #[must_use]
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            ..self.clone()
        }
    }
}

/// A fully read response. The body is kept as text so it can be logged verbatim.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub tracking_id: Option<String>,
    pub body: String,
}

impl ApiResponse {
    async fn read(url: String, response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let tracking_id = headers
            .get(TRACKING_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string);
        let body = response.text().await?;
        Ok(Self {
            url,
            status,
            headers,
            tracking_id,
            body,
        })
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_str(&self.body).map_err(|err| ClientError::Decode {
            url: self.url.clone(),
            reason: err.to_string(),
        })
    }

    /// Body as JSON, or `{"raw_text": ...}` when it is not JSON.
    pub fn json_value(&self) -> Value {
        if self.body.trim().is_empty() {
            return Value::Null;
        }
        serde_json::from_str(&self.body).unwrap_or_else(|_| json!({ "raw_text": self.body }))
    }

    pub fn next_link(&self) -> Option<String> {
        pagination::next_link(&self.headers)
    }

    pub fn error_for_status(self) -> ClientResult<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        if self.status == StatusCode::FORBIDDEN {
            return Err(ClientError::Forbidden {
                url: self.url,
                tracking_id: self.tracking_id,
                body: self.body,
            });
        }
        Err(ClientError::UnexpectedStatus {
            url: self.url,
            status: self.status.as_u16(),
            tracking_id: self.tracking_id,
            body: self.body,
        })
    }
}

/// Rate-limited, retrying client for the partner API.
///
/// Calls are strictly sequential; the limiter lock is held across the wait so
/// a caller that shares the client still observes the window.
pub struct PartnerClient {
    http: reqwest::Client,
    settings: ClientSettings,
    token: String,
    limiter: tokio::sync::Mutex<RateLimiter>,
    tracking: Mutex<TrackingLog>,
}

impl PartnerClient {
    pub fn new(settings: ClientSettings, token: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("failed to build partner api client")?;
        let limiter = RateLimiter::new(settings.rate_limit_calls, settings.rate_limit_period);
        Ok(Self {
            http,
            settings,
            token: token.into(),
            limiter: tokio::sync::Mutex::new(limiter),
            tracking: Mutex::new(TrackingLog::default()),
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn endpoint(&self, path: &str) -> String {
        self.settings.endpoint(path)
    }

    /// Plain HTTP client, for URLs outside the API such as signed download links.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn tracking_entries(&self) -> Vec<TrackingEntry> {
        self.tracking_log().entries().to_vec()
    }

    pub fn take_tracking_log(&self) -> Vec<TrackingEntry> {
        self.tracking_log().take()
    }

    fn tracking_log(&self) -> MutexGuard<'_, TrackingLog> {
        self.tracking
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn build(&self, request: &ApiRequest) -> ClientResult<reqwest::Request> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder.build().map_err(|err| ClientError::InvalidUrl {
            url: request.url.clone(),
            reason: err.to_string(),
        })
    }

    fn record(&self, request: &ApiRequest, response: &ApiResponse) {
        self.tracking_log().push(TrackingEntry {
            org_id: request.org_id.clone(),
            call_type: request.call_type.to_string(),
            method: request.method.to_string(),
            url: response.url.clone(),
            status_code: CallStatus::Code(response.status_code()),
            tracking_id: response
                .tracking_id
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
            response_text: response.body.clone(),
            timestamp: chrono::Local::now(),
        });
    }

    fn record_failure(&self, request: &ApiRequest, url: &str, error: &reqwest::Error) {
        let status = if error.is_timeout() {
            CallStatus::TIMEOUT
        } else {
            CallStatus::ERROR
        };
        self.tracking_log().push(TrackingEntry {
            org_id: request.org_id.clone(),
            call_type: request.call_type.to_string(),
            method: request.method.to_string(),
            url: url.to_string(),
            status_code: status,
            tracking_id: "N/A".to_string(),
            response_text: error.to_string(),
            timestamp: chrono::Local::now(),
        });
    }

    async fn pace(&self) {
        if !self.settings.request_delay.is_zero() {
            sleep(self.settings.request_delay).await;
        }
    }

    /// Sends `request`, honouring the rate window and the retry policy.
    ///
    /// Any final response is returned as `Ok`, including 403 and other 4xx, so
    /// callers can inspect bodies; `Err` means retries were exhausted or the
    /// request never produced a response.
    pub async fn request(&self, request: &ApiRequest) -> ClientResult<ApiResponse> {
        let policy = &self.settings.retry;
        let mut failures = 0u32;
        let mut throttled = 0u32;

        loop {
            self.limiter.lock().await.acquire().await;

            let built = self.build(request)?;
            let url = built.url().to_string();
            debug!(method = %request.method, %url, call_type = request.call_type, "sending request");

            let outcome = match self.http.execute(built).await {
                Ok(response) => ApiResponse::read(url.clone(), response).await,
                Err(err) => Err(err),
            };

            let response = match outcome {
                Ok(response) => response,
                Err(source) => {
                    failures += 1;
                    self.record_failure(request, &url, &source);
                    self.pace().await;
                    if !policy.may_retry_attempt(failures) {
                        return Err(ClientError::Transport {
                            url,
                            attempts: failures,
                            source,
                        });
                    }
                    let delay = policy.backoff.delay_for(failures);
                    warn!(
                        error = %source,
                        %url,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "request failed; retrying"
                    );
                    sleep(delay).await;
                    continue;
                }
            };

            self.record(request, &response);
            self.pace().await;
            let status = response.status_code();

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                if !policy.may_retry_rate_limit(throttled) {
                    return Err(ClientError::RateLimited {
                        url,
                        retries: throttled,
                    });
                }
                throttled += 1;
                let delay = policy.rate_limit_delay(&response.headers);
                warn!(
                    %url,
                    org_id = request.org_id.as_deref().unwrap_or("-"),
                    retry = throttled,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited; sleeping"
                );
                sleep(delay).await;
                continue;
            }

            if policy.is_retryable(status) {
                failures += 1;
                if !policy.may_retry_attempt(failures) {
                    return Err(ClientError::ServerError {
                        url,
                        status,
                        attempts: failures,
                        body: response.body,
                    });
                }
                let delay = retry_after(&response.headers)
                    .unwrap_or_else(|| policy.backoff.delay_for(failures));
                warn!(
                    %url,
                    status,
                    attempt = failures,
                    tracking_id = response.tracking_id.as_deref().unwrap_or("N/A"),
                    delay_ms = delay.as_millis() as u64,
                    "server error; retrying"
                );
                sleep(delay).await;
                continue;
            }

            if throttled > 0 || failures > 0 {
                info!(
                    %url,
                    status,
                    rate_limit_retries = throttled,
                    failed_attempts = failures,
                    "request completed after retries"
                );
            }
            return Ok(response);
        }
    }

    /// `request` followed by `error_for_status`.
    pub async fn request_ok(&self, request: &ApiRequest) -> ClientResult<ApiResponse> {
        self.request(request).await?.error_for_status()
    }
}
