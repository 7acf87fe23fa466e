use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::client::{ApiRequest, PartnerClient};
use crate::error::FailureKind;
use crate::outcome::{FailureRecord, Stage};
use crate::pagination::{fetch_all, Collected};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}

/// An organization to process, with the customer name from the input list when known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OrgTarget {
    pub org_id: String,
    pub customer_name: Option<String>,
}

impl OrgTarget {
    pub fn new(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            customer_name: None,
        }
    }

    pub fn named(org_id: impl Into<String>, customer_name: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            customer_name: Some(customer_name.into()),
        }
    }
}

/// Result of touching an organization's detail endpoint.
///
/// `raw` holds the response payload on success and the error body or
/// transport error otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct Activation {
    pub org_id: String,
    pub ok: bool,
    pub status_code: Option<u16>,
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<Organization>,
    pub raw: Value,
    #[serde(skip)]
    kind: Option<FailureKind>,
}

impl Activation {
    pub fn failure(&self) -> Option<FailureRecord> {
        if self.ok {
            return None;
        }
        let reason = match self.status_code {
            Some(status) => format!("activation returned status {status}"),
            None => "activation request failed".to_string(),
        };
        Some(
            FailureRecord::new(
                &self.org_id,
                Stage::Activate,
                self.kind.unwrap_or(FailureKind::Activation),
                reason,
            )
            .with_status(self.status_code)
            .with_detail(self.raw.clone()),
        )
    }
}

/// Activates `org_id` in partner scope by reading its detail record.
///
/// Must run before any other per-org call; a failed activation means the
/// caller should skip the org entirely.
pub async fn activate(client: &PartnerClient, org_id: &str) -> Activation {
    let request = ApiRequest::get(
        "organization",
        client.endpoint(&format!("organizations/{org_id}")),
    )
    .for_org(org_id);

    match client.request(&request).await {
        Ok(response) => {
            let raw = response.json_value();
            let organization = if response.status_code() == 200 {
                response
                    .json::<Organization>()
                    .ok()
                    .filter(|org| !org.id.trim().is_empty())
            } else {
                None
            };
            let ok = organization.is_some();
            let display_name = organization
                .as_ref()
                .and_then(|org| org.display_name.clone());
            if ok {
                info!(
                    %org_id,
                    display_name = display_name.as_deref().unwrap_or("Unknown"),
                    "activated organization"
                );
            } else {
                warn!(
                    %org_id,
                    status = response.status_code(),
                    tracking_id = response.tracking_id.as_deref().unwrap_or("N/A"),
                    "organization activation failed"
                );
            }
            Activation {
                org_id: org_id.to_string(),
                ok,
                status_code: Some(response.status_code()),
                display_name,
                organization,
                raw,
                kind: if ok { None } else { Some(FailureKind::Activation) },
            }
        }
        Err(err) => {
            warn!(%org_id, error = %err, "organization activation failed");
            Activation {
                org_id: org_id.to_string(),
                ok: false,
                status_code: err.status_code(),
                display_name: None,
                organization: None,
                raw: json!({ "error": err.to_string() }),
                kind: Some(err.kind()),
            }
        }
    }
}

/// Every organization managed by the partner account.
pub async fn list_organizations(client: &PartnerClient) -> Collected<Organization> {
    fetch_all(
        client,
        ApiRequest::get("organizations", client.endpoint("organizations")),
    )
    .await
}
