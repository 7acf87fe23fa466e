use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::config::RefreshCredentials;
use crate::error::AuthError;

pub const TOKEN_PATH: &str = "access_token";

/// Successful refresh-token exchange.
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenGrant {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token_expires_in: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchanges a refresh token for a new access token.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &str,
    creds: &RefreshCredentials,
) -> Result<(TokenGrant, String), AuthError> {
    let response = http
        .post(token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.as_str()),
            ("refresh_token", creds.refresh_token.as_str()),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;
    if status.as_u16() != 200 {
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let grant: TokenGrant = serde_json::from_str(&body).map_err(|_| AuthError::Rejected {
        status: status.as_u16(),
        body: body.clone(),
    })?;
    let access_token = grant
        .access_token
        .clone()
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingAccessToken)?;
    Ok((grant, access_token))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Success,
    Failed,
    Skipped,
    Error,
}

/// One entry of the token store file, keyed by org label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenEntry {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub status: Option<RefreshStatus>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenEntry {
    fn credentials(&self) -> Option<RefreshCredentials> {
        let present = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());
        Some(RefreshCredentials {
            client_id: present(&self.client_id)?,
            client_secret: present(&self.client_secret)?,
            refresh_token: present(&self.refresh_token)?,
        })
    }
}

pub type TokenStore = BTreeMap<String, TokenEntry>;

#[derive(Debug, Clone, Serialize)]
pub struct TokenLogEntry {
    pub org: String,
    pub timestamp: String,
    pub status: RefreshStatus,
    pub error: Option<String>,
    pub response: Value,
}

/// Refreshes every entry in place. Entries missing a credential are skipped;
/// a failure never stops the remaining entries.
pub async fn refresh_store(
    http: &reqwest::Client,
    token_url: &str,
    store: &mut TokenStore,
) -> Vec<TokenLogEntry> {
    let mut log = Vec::with_capacity(store.len());

    for (org, entry) in store.iter_mut() {
        let timestamp = Local::now().to_rfc3339();
        let Some(creds) = entry.credentials() else {
            let reason = "Missing client_id, client_secret, or refresh_token".to_string();
            warn!(%org, "skipping token entry without credentials");
            entry.status = Some(RefreshStatus::Skipped);
            entry.error = Some(reason.clone());
            log.push(TokenLogEntry {
                org: org.clone(),
                timestamp,
                status: RefreshStatus::Skipped,
                error: Some(reason),
                response: Value::Null,
            });
            continue;
        };

        let (status, error, response) = match refresh_access_token(http, token_url, &creds).await
        {
            Ok((grant, access_token)) => {
                info!(%org, "token refreshed");
                entry.access_token = Some(access_token);
                if let Some(rotated) = grant.refresh_token.clone().filter(|t| !t.is_empty()) {
                    entry.refresh_token = Some(rotated);
                }
                let response = serde_json::to_value(&grant).unwrap_or(Value::Null);
                (RefreshStatus::Success, None, response)
            }
            Err(AuthError::Rejected { status, body }) => {
                warn!(%org, status, "token refresh rejected");
                (
                    RefreshStatus::Failed,
                    Some(format!("HTTP {status}: {body}")),
                    Value::String(body),
                )
            }
            Err(err @ AuthError::MissingAccessToken) => {
                warn!(%org, "token refresh returned no access token");
                (RefreshStatus::Failed, Some(err.to_string()), Value::Null)
            }
            Err(err) => {
                error!(%org, error = %err, "token refresh request error");
                (RefreshStatus::Error, Some(err.to_string()), Value::Null)
            }
        };

        entry.status = Some(status);
        entry.error = error.clone();
        log.push(TokenLogEntry {
            org: org.clone(),
            timestamp,
            status,
            error,
            response,
        });
    }

    log
}

pub fn load_store(path: &Path) -> anyhow::Result<TokenStore> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read token store {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("token store {} is not valid JSON", path.display()))
}
