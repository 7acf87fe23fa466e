use serde::Serialize;
use tracing::info;

use crate::client::PartnerClient;
use crate::error::FailureKind;
use crate::organizations::activate;
use crate::outcome::{FailureRecord, RunReport, Stage};

use super::{list_connection_options, list_locations, Location, PstnOption};

#[derive(Debug, Clone, Serialize)]
pub struct ProviderMatch {
    pub org_id: String,
    pub location_id: String,
    pub location_name: String,
    pub provider_keyword: String,
    pub matches: Vec<PstnOption>,
}

/// Raw options fetched for one location, kept so they can be written out per location.
#[derive(Debug, Clone, Serialize)]
pub struct LocationOptions {
    pub org_id: String,
    pub location_id: String,
    pub options: Vec<PstnOption>,
}

#[derive(Debug, Default)]
pub struct DiscoveryRun {
    pub report: RunReport<String>,
    pub locations: Vec<(String, Vec<Location>)>,
    pub raw_options: Vec<LocationOptions>,
    pub matches: Vec<ProviderMatch>,
}

/// Case-insensitive substring match on the option's display name.
pub fn matches_keyword(option: &PstnOption, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    option
        .display_name
        .as_deref()
        .map(|name| name.to_lowercase().contains(&keyword))
        .unwrap_or(false)
}

/// Lists the carrier options available to every location and keeps the ones
/// whose name contains `keyword`.
pub async fn discover_pstn(
    client: &PartnerClient,
    org_ids: &[String],
    keyword: &str,
) -> DiscoveryRun {
    let mut run = DiscoveryRun::default();

    for org_id in org_ids {
        info!(%org_id, "discovering pstn options");
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
            let collected = list_connection_options(client, org_id, &location.id).await;
            if let Some(err) = &collected.error {
                run.report.fail(
                    FailureRecord::from_client_error(org_id, Stage::ConnectionOptions, err)
                        .with_location(&location.id),
                );
                continue;
            }
            let options = collected.items;
            if options.is_empty() {
                run.report.fail(
                    FailureRecord::new(
                        org_id,
                        Stage::ConnectionOptions,
                        FailureKind::DataShape,
                        "No connection options returned",
                    )
                    .with_location(&location.id),
                );
            }

            let matched: Vec<PstnOption> = options
                .iter()
                .filter(|option| matches_keyword(option, keyword))
                .cloned()
                .collect();
            if !matched.is_empty() {
                info!(
                    %org_id,
                    location = location.display_name(),
                    matches = matched.len(),
                    "matching pstn options found"
                );
                run.matches.push(ProviderMatch {
                    org_id: org_id.clone(),
                    location_id: location.id.clone(),
                    location_name: location.display_name().to_string(),
                    provider_keyword: keyword.to_string(),
                    matches: matched,
                });
            }
            run.raw_options.push(LocationOptions {
                org_id: org_id.clone(),
                location_id: location.id.clone(),
                options,
            });
        }

        run.locations.push((org_id.clone(), locations));
        run.report.succeed(org_id.clone());
    }

    run
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(name: Option<&str>) -> PstnOption {
        PstnOption {
            id: "opt".into(),
            display_name: name.map(ToString::to_string),
            extra: Default::default(),
        }
    }

    #[test]
    fn keyword_match_ignores_case() {
        assert!(matches_keyword(&option(Some("Veracity Networks")), "veracity"));
        assert!(matches_keyword(&option(Some("veracity")), "VERACITY"));
        assert!(!matches_keyword(&option(Some("CallTower")), "veracity"));
        assert!(!matches_keyword(&option(None), "veracity"));
    }
}
