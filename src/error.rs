use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy used when recording per-organization outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    Activation,
    Permission,
    RateLimit,
    Transient,
    DataShape,
    Status,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("forbidden (403) for {url}")]
    Forbidden {
        url: String,
        tracking_id: Option<String>,
        body: String,
    },
    #[error("rate limited on {url}; gave up after {retries} retries")]
    RateLimited { url: String, retries: u32 },
    #[error("server error {status} from {url} after {attempts} attempt(s)")]
    ServerError {
        url: String,
        status: u16,
        attempts: u32,
        body: String,
    },
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        tracking_id: Option<String>,
        body: String,
    },
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ClientError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ClientError::Transport { .. } | ClientError::ServerError { .. } => {
                FailureKind::Transient
            }
            ClientError::Forbidden { .. } => FailureKind::Permission,
            ClientError::RateLimited { .. } => FailureKind::RateLimit,
            ClientError::UnexpectedStatus { status, .. } if *status == 401 => FailureKind::Auth,
            ClientError::UnexpectedStatus { .. } => FailureKind::Status,
            ClientError::Decode { .. } | ClientError::InvalidUrl { .. } => FailureKind::DataShape,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClientError::Forbidden { .. } => Some(403),
            ClientError::RateLimited { .. } => Some(429),
            ClientError::ServerError { status, .. }
            | ClientError::UnexpectedStatus { status, .. } => Some(*status),
            ClientError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            ClientError::Decode { .. } | ClientError::InvalidUrl { .. } => None,
        }
    }

    /// Response body captured with the error, when the server sent one.
    pub fn body(&self) -> Option<&str> {
        match self {
            ClientError::Forbidden { body, .. }
            | ClientError::ServerError { body, .. }
            | ClientError::UnexpectedStatus { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token refresh request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token refresh rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("token refresh response did not contain an access_token")]
    MissingAccessToken,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("report creation rejected with status {status}: {body}")]
    CreateRejected { status: u16, body: String },
    #[error("report for {start}..{end} did not complete within {waited_secs}s")]
    Timeout {
        start: String,
        end: String,
        waited_secs: u64,
    },
    #[error("report {report_id} has no tempDownloadURL")]
    MissingDownloadUrl { report_id: String },
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
