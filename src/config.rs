use once_cell::sync::Lazy;
use std::time::Duration;

use crate::client::{Backoff, RetryPolicy};
use crate::error::ConfigError;

pub const ACCESS_TOKEN_ENV: &str = "WEBEX_ACCESS_TOKEN";
pub const CLIENT_ID_ENV: &str = "WEBEX_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "WEBEX_CLIENT_SECRET";
pub const REFRESH_TOKEN_ENV: &str = "WEBEX_REFRESH_TOKEN";

/// Base URL of the partner REST API. Defaults to `https://webexapis.com/v1`.
pub static API_BASE_URL: Lazy<String> = Lazy::new(|| {
    read_optional_env("WEBEX_API_BASE_URL")
        .unwrap_or_else(|| "https://webexapis.com/v1".to_string())
});

/// Calls allowed per rate-limit window. Defaults to `10`.
pub static RATE_LIMIT_CALLS: Lazy<usize> = Lazy::new(|| {
    std::env::var("WEBEX_RATE_LIMIT_CALLS")
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10)
});

/// Length of the rate-limit window in seconds. Defaults to `60`.
pub static RATE_LIMIT_PERIOD_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("WEBEX_RATE_LIMIT_PERIOD_SECS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(60)
});

/// Extra pause after every call, in milliseconds. Defaults to `0`.
pub static REQUEST_DELAY_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("WEBEX_REQUEST_DELAY_MS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0)
});

/// Attempts allowed for 5xx responses and transport errors. Defaults to `4`.
pub static MAX_ATTEMPTS: Lazy<u32> = Lazy::new(|| {
    std::env::var("WEBEX_MAX_ATTEMPTS")
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(4)
});

/// Ceiling on 429 retries. `unlimited` (or `0`) removes the ceiling. Defaults to `4`.
pub static RATE_LIMIT_RETRIES: Lazy<Option<u32>> = Lazy::new(|| {
    parse_retry_ceiling(std::env::var("WEBEX_RATE_LIMIT_RETRIES").ok().as_deref())
});

pub static REQUEST_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("WEBEX_REQUEST_TIMEOUT_SECS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(60)
});

/// key: billing-report -> poll cadence
pub static REPORT_POLL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("WEBEX_REPORT_POLL_SECS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(10)
});

/// key: billing-report -> upper bound on polling before giving up
pub static REPORT_MAX_WAIT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("WEBEX_REPORT_MAX_WAIT_SECS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3600)
});

/// Provider keyword used by PSTN discovery. Defaults to `veracity`.
pub static PROVIDER_KEYWORD: Lazy<String> = Lazy::new(|| {
    read_optional_env("PSTN_PROVIDER_KEYWORD")
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| "veracity".to_string())
});

fn parse_retry_ceiling(raw: Option<&str>) -> Option<u32> {
    match raw.map(|value| value.trim().to_ascii_lowercase()) {
        None => Some(4),
        Some(value) if value.is_empty() => Some(4),
        Some(value) if value == "unlimited" || value == "0" => None,
        Some(value) => Some(value.parse::<u32>().unwrap_or(4)),
    }
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn require_env(key: &'static str) -> Result<String, ConfigError> {
    read_optional_env(key).ok_or(ConfigError::MissingEnv(key))
}

/// Everything the request client needs, resolved once and passed in explicitly.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub rate_limit_calls: usize,
    pub rate_limit_period: Duration,
    pub request_delay: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ClientSettings {
    pub fn from_env() -> Self {
        Self {
            base_url: API_BASE_URL.clone(),
            rate_limit_calls: *RATE_LIMIT_CALLS,
            rate_limit_period: Duration::from_secs(*RATE_LIMIT_PERIOD_SECS),
            request_delay: Duration::from_millis(*REQUEST_DELAY_MS),
            request_timeout: Duration::from_secs(*REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default()
                .with_max_attempts(*MAX_ATTEMPTS)
                .with_rate_limit_retries(*RATE_LIMIT_RETRIES),
        }
    }

    /// Settings for talking to a local server without pacing, used by tests.
    pub fn unthrottled(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            rate_limit_calls: 10_000,
            rate_limit_period: Duration::from_secs(1),
            request_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default()
                .with_backoff(Backoff::Linear {
                    step: Duration::ZERO,
                })
                .with_default_retry_after(Duration::ZERO),
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl ReportSettings {
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_secs(*REPORT_POLL_SECS),
            max_wait: Duration::from_secs(*REPORT_MAX_WAIT_SECS),
        }
    }
}

/// Raw bearer token flow.
#[derive(Clone)]
pub struct Credentials {
    pub access_token: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            access_token: require_env(ACCESS_TOKEN_ENV)?,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Client id/secret/refresh-token tuple for flows that refresh their own token.
#[derive(Clone)]
pub struct RefreshCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl RefreshCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        // the access token is not used directly but its absence signals a broken setup
        require_env(ACCESS_TOKEN_ENV)?;
        Ok(Self {
            client_id: require_env(CLIENT_ID_ENV)?,
            client_secret: require_env(CLIENT_SECRET_ENV)?,
            refresh_token: require_env(REFRESH_TOKEN_ENV)?,
        })
    }
}

impl std::fmt::Debug for RefreshCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_ceiling_parsing() {
        assert_eq!(parse_retry_ceiling(None), Some(4));
        assert_eq!(parse_retry_ceiling(Some("  ")), Some(4));
        assert_eq!(parse_retry_ceiling(Some("7")), Some(7));
        assert_eq!(parse_retry_ceiling(Some("Unlimited")), None);
        assert_eq!(parse_retry_ceiling(Some("0")), None);
        assert_eq!(parse_retry_ceiling(Some("bogus")), Some(4));
    }

    #[test]
    fn endpoint_joins_without_double_slashes() {
        let settings = ClientSettings::unthrottled("http://localhost:9000/v1/");
        assert_eq!(
            settings.endpoint("/organizations/abc"),
            "http://localhost:9000/v1/organizations/abc"
        );
    }
}
