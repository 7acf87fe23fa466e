pub mod audit;
pub mod discovery;
pub mod flip;

pub use audit::{audit_pstn, AuditRun, LocationAudit, PstnAuditRow};
pub use discovery::{discover_pstn, matches_keyword, DiscoveryRun, ProviderMatch};
pub use flip::{classify_assignment, flip_pstn, AssignmentAttempt, AssignmentVerdict, FlipRun};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::client::{ApiRequest, ApiResponse, PartnerClient};
use crate::error::ClientResult;
use crate::pagination::{fetch_all, Collected};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Location {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// A carrier that can be assigned to a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PstnOption {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub async fn list_locations(client: &PartnerClient, org_id: &str) -> Collected<Location> {
    let request = ApiRequest::get("locations", client.endpoint("locations"))
        .for_org(org_id)
        .query("orgId", org_id);
    fetch_all(client, request).await
}

fn connection_url(client: &PartnerClient, location_id: &str) -> String {
    client.endpoint(&format!(
        "telephony/pstn/locations/{location_id}/connection"
    ))
}

/// Current PSTN connection of a location, as returned by the platform.
pub async fn get_connection(
    client: &PartnerClient,
    org_id: &str,
    location_id: &str,
) -> ClientResult<Value> {
    let request = ApiRequest::get("pstn_connection", connection_url(client, location_id))
        .for_org(org_id)
        .query("orgId", org_id);
    Ok(client.request_ok(&request).await?.json_value())
}

pub async fn list_connection_options(
    client: &PartnerClient,
    org_id: &str,
    location_id: &str,
) -> Collected<PstnOption> {
    let request = ApiRequest::get(
        "pstn_connection_options",
        client.endpoint(&format!(
            "telephony/pstn/locations/{location_id}/connectionOptions"
        )),
    )
    .for_org(org_id)
    .query("orgId", org_id);
    fetch_all(client, request).await
}

/// Points a location at `provider_id`. The raw response is returned so callers
/// can tell a rejected carrier apart from other failures.
pub async fn assign_connection(
    client: &PartnerClient,
    org_id: &str,
    location_id: &str,
    provider_id: &str,
) -> ClientResult<ApiResponse> {
    let request = ApiRequest::put("pstn_assign", connection_url(client, location_id))
        .for_org(org_id)
        .query("orgId", org_id)
        .json(json!({ "id": provider_id }));
    client.request(&request).await
}
