use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::client::PartnerClient;
use crate::error::FailureKind;
use crate::organizations::activate;
use crate::output::CsvRecord;
use crate::outcome::{FailureRecord, RunReport, Stage};

use super::{get_connection, list_locations};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationAudit {
    pub location_id: String,
    pub location_name: String,
    /// Empty object when the connection could not be read.
    pub pstn_connection: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct PstnAuditRow {
    pub org_id: String,
    pub location_id: String,
    pub location_name: String,
    pub connection_type: String,
    pub provider_id: String,
    pub provider_name: String,
}

impl CsvRecord for PstnAuditRow {
    const HEADERS: &'static [&'static str] = &[
        "org_id",
        "location_id",
        "location_name",
        "connection_type",
        "provider_id",
        "provider_name",
    ];
}

#[derive(Debug, Default)]
pub struct AuditRun {
    pub report: RunReport<String>,
    pub results: BTreeMap<String, Vec<LocationAudit>>,
}

impl AuditRun {
    pub fn flat_rows(&self) -> Vec<PstnAuditRow> {
        let text = |value: &Value, key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        self.results
            .iter()
            .flat_map(|(org_id, locations)| {
                locations.iter().map(move |location| PstnAuditRow {
                    org_id: org_id.clone(),
                    location_id: location.location_id.clone(),
                    location_name: location.location_name.clone(),
                    connection_type: text(&location.pstn_connection, "pstnConnectionType"),
                    provider_id: text(&location.pstn_connection, "id"),
                    provider_name: text(&location.pstn_connection, "displayName"),
                })
            })
            .collect()
    }
}

/// Reads the PSTN connection of every location in every org.
///
/// An org with no locations counts as failed. A location whose connection
/// cannot be read is kept with an empty connection and its failure recorded.
pub async fn audit_pstn(client: &PartnerClient, org_ids: &[String]) -> AuditRun {
    let mut run = AuditRun::default();
    let total = org_ids.len();

    for (index, org_id) in org_ids.iter().enumerate() {
        info!(index = index + 1, total, %org_id, "auditing organization");

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
        if locations.is_empty() {
            run.report.fail(FailureRecord::new(
                org_id,
                Stage::Locations,
                FailureKind::DataShape,
                "No locations found",
            ));
            continue;
        }

        let mut audited = Vec::with_capacity(locations.len());
        for location in &locations {
            let connection = match get_connection(client, org_id, &location.id).await {
                Ok(connection) => connection,
                Err(err) => {
                    run.report.fail(
                        FailureRecord::from_client_error(org_id, Stage::PstnConnection, &err)
                            .with_location(&location.id),
                    );
                    Value::Object(Default::default())
                }
            };
            audited.push(LocationAudit {
                location_id: location.id.clone(),
                location_name: location.display_name().to_string(),
                pstn_connection: connection,
            });
        }

        info!(%org_id, locations = audited.len(), "completed organization");
        run.results.insert(org_id.clone(), audited);
        run.report.succeed(org_id.clone());
    }

    run
}
