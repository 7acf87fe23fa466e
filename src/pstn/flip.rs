use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::PartnerClient;
use crate::error::FailureKind;
use crate::organizations::activate;
use crate::outcome::{FailureRecord, RunReport, Stage};

use super::{assign_connection, list_locations, Location};

const INVALID_CARRIER: &str = "New carrier is invalid for location";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentVerdict {
    Applied,
    /// The carrier cannot serve this location; the next candidate may.
    InvalidCarrier,
    Failed,
}

pub fn classify_assignment(status: u16, body: &str) -> AssignmentVerdict {
    match status {
        204 => AssignmentVerdict::Applied,
        400 if body.contains(INVALID_CARRIER) => AssignmentVerdict::InvalidCarrier,
        _ => AssignmentVerdict::Failed,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentAttempt {
    pub org_id: String,
    pub location_id: String,
    pub location_name: String,
    pub attempted_pstn_id: String,
    pub status_code: Option<u16>,
    pub response_text: String,
    pub verdict: AssignmentVerdict,
}

#[derive(Debug, Default)]
pub struct FlipRun {
    pub report: RunReport<String>,
    pub locations: BTreeMap<String, Vec<Location>>,
    pub attempts: Vec<AssignmentAttempt>,
}

impl FlipRun {
    pub fn applied(&self) -> impl Iterator<Item = &AssignmentAttempt> {
        self.attempts
            .iter()
            .filter(|attempt| attempt.verdict == AssignmentVerdict::Applied)
    }
}

/// Tries `candidates` in order on every location of every org.
///
/// A location stops at the first applied carrier or the first failure that is
/// not an invalid-carrier rejection. With one org and one candidate this is a
/// plain carrier swap.
pub async fn flip_pstn(client: &PartnerClient, org_ids: &[String], candidates: &[String]) -> FlipRun {
    let mut run = FlipRun::default();

    for org_id in org_ids {
        info!(%org_id, "processing organization");
        let activation = activate(client, org_id).await;
        if let Some(failure) = activation.failure() {
            run.report.fail(failure);
            continue;
        }

        let locations = match list_locations(client, org_id).await.into_result() {
            Ok(locations) => locations,
            Err(err) => {
                run.report
                    .fail(FailureRecord::from_client_error(org_id, Stage::Locations, &err));
                continue;
            }
        };
        info!(%org_id, locations = locations.len(), "found locations");

        for location in &locations {
            flip_location(client, &mut run, org_id, location, candidates).await;
        }

        run.locations.insert(org_id.clone(), locations);
        run.report.succeed(org_id.clone());
    }

    run
}

async fn flip_location(
    client: &PartnerClient,
    run: &mut FlipRun,
    org_id: &str,
    location: &Location,
    candidates: &[String],
) {
    let name = location.display_name().to_string();
    for candidate in candidates {
        let (status_code, response_text, transport_failed) =
            match assign_connection(client, org_id, &location.id, candidate).await {
                Ok(response) => (Some(response.status_code()), response.body, false),
                Err(err) => {
                    run.report.fail(
                        FailureRecord::from_client_error(org_id, Stage::AssignPstn, &err)
                            .with_location(&location.id),
                    );
                    (err.status_code(), err.to_string(), true)
                }
            };
        let verdict = status_code
            .map(|status| classify_assignment(status, &response_text))
            .unwrap_or(AssignmentVerdict::Failed);

        match verdict {
            AssignmentVerdict::Applied => {
                info!(%org_id, location = %name, provider = %candidate, "pstn updated")
            }
            AssignmentVerdict::InvalidCarrier => {
                info!(%org_id, location = %name, provider = %candidate, "invalid carrier, trying next")
            }
            AssignmentVerdict::Failed => {
                warn!(%org_id, location = %name, status = ?status_code, "pstn update failed");
                if let Some(status) = status_code.filter(|_| !transport_failed) {
                    run.report
                        .fail(rejected_assignment(org_id, &location.id, status, &response_text));
                }
            }
        }

        run.attempts.push(AssignmentAttempt {
            org_id: org_id.to_string(),
            location_id: location.id.clone(),
            location_name: name.clone(),
            attempted_pstn_id: candidate.clone(),
            status_code,
            response_text,
            verdict,
        });

        if verdict != AssignmentVerdict::InvalidCarrier {
            break;
        }
    }
}

/// Failure record for a carrier update the platform answered but refused.
fn rejected_assignment(org_id: &str, location_id: &str, status: u16, body: &str) -> FailureRecord {
    let kind = match status {
        401 => FailureKind::Auth,
        403 => FailureKind::Permission,
        _ => FailureKind::Status,
    };
    let detail =
        serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(body.to_string()));
    FailureRecord::new(
        org_id,
        Stage::AssignPstn,
        kind,
        format!("carrier update rejected with status {status}"),
    )
    .with_status(Some(status))
    .with_location(location_id)
    .with_detail(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_status_and_body() {
        assert_eq!(classify_assignment(204, ""), AssignmentVerdict::Applied);
        assert_eq!(
            classify_assignment(
                400,
                r#"{"errors":[{"description":"New carrier is invalid for location."}]}"#
            ),
            AssignmentVerdict::InvalidCarrier
        );
        assert_eq!(
            classify_assignment(400, r#"{"message":"bad request"}"#),
            AssignmentVerdict::Failed
        );
        assert_eq!(classify_assignment(200, ""), AssignmentVerdict::Failed);
        assert_eq!(classify_assignment(403, INVALID_CARRIER), AssignmentVerdict::Failed);
    }

    #[test]
    fn refused_updates_are_recorded_by_kind() {
        let forbidden = rejected_assignment("org-1", "loc-1", 403, r#"{"message":"nope"}"#);
        assert_eq!(forbidden.kind, FailureKind::Permission);
        assert_eq!(forbidden.stage, Stage::AssignPstn);
        assert_eq!(forbidden.status_code, Some(403));
        assert_eq!(forbidden.location_id.as_deref(), Some("loc-1"));
        assert_eq!(forbidden.detail, Some(serde_json::json!({ "message": "nope" })));

        let bad_request = rejected_assignment("org-1", "loc-2", 400, "bad request");
        assert_eq!(bad_request.kind, FailureKind::Status);
        assert_eq!(bad_request.detail, Some(Value::String("bad request".into())));
    }
}
