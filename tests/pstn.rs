use httpmock::prelude::*;
use serde_json::json;
use webex_partner_ops::jobs;
use webex_partner_ops::output::OutputDir;
use webex_partner_ops::pstn::{audit_pstn, discover_pstn, flip_pstn, AssignmentVerdict};
use webex_partner_ops::{ClientSettings, FailureKind, PartnerClient, Stage};

const INVALID_CARRIER: &str =
    r#"{"message":"New carrier is invalid for location.","errors":[{"errorCode":25016}]}"#;

fn client(server: &MockServer) -> PartnerClient {
    PartnerClient::new(ClientSettings::unthrottled(server.base_url()), "token").unwrap()
}

fn mock_org_with_locations(server: &MockServer, org_id: &str) {
    server.mock(|when, then| {
        when.method(GET).path(format!("/organizations/{org_id}"));
        then.status(200)
            .json_body(json!({ "id": org_id, "displayName": "Acme" }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/locations").query_param("orgId", org_id);
        then.status(200).json_body(json!({ "items": [
            { "id": "loc-1", "name": "HQ" },
            { "id": "loc-2", "name": "Branch" }
        ]}));
    });
}

fn mock_assign<'a>(
    server: &'a MockServer,
    location: &str,
    provider: &str,
    status: u16,
    body: &str,
) -> httpmock::Mock<'a> {
    server.mock(|when, then| {
        when.method(PUT)
            .path(format!("/telephony/pstn/locations/{location}/connection"))
            .query_param("orgId", "org-1")
            .json_body(json!({ "id": provider }));
        then.status(status).body(body);
    })
}

#[tokio::test]
async fn flip_moves_to_the_next_provider_only_on_invalid_carrier() {
    let server = MockServer::start_async().await;
    mock_org_with_locations(&server, "org-1");
    let hq_first = mock_assign(&server, "loc-1", "prov-1", 400, INVALID_CARRIER);
    let hq_second = mock_assign(&server, "loc-1", "prov-2", 204, "");
    let branch_first = mock_assign(&server, "loc-2", "prov-1", 204, "");
    let branch_second = mock_assign(&server, "loc-2", "prov-2", 204, "");

    let candidates = vec!["prov-1".to_string(), "prov-2".to_string()];
    let run = flip_pstn(&client(&server), &["org-1".to_string()], &candidates).await;

    hq_first.assert_hits(1);
    hq_second.assert_hits(1);
    branch_first.assert_hits(1);
    branch_second.assert_hits(0);

    let verdicts: Vec<(&str, &str, AssignmentVerdict)> = run
        .attempts
        .iter()
        .map(|a| (a.location_id.as_str(), a.attempted_pstn_id.as_str(), a.verdict))
        .collect();
    assert_eq!(
        verdicts,
        vec![
            ("loc-1", "prov-1", AssignmentVerdict::InvalidCarrier),
            ("loc-1", "prov-2", AssignmentVerdict::Applied),
            ("loc-2", "prov-1", AssignmentVerdict::Applied),
        ]
    );
    assert_eq!(run.applied().count(), 2);
    assert_eq!(run.attempts[0].location_name, "HQ");
    assert_eq!(run.report.successes, vec!["org-1".to_string()]);
}

#[tokio::test]
async fn flip_stops_a_location_on_any_other_error() {
    let server = MockServer::start_async().await;
    mock_org_with_locations(&server, "org-1");
    let forbidden = mock_assign(&server, "loc-1", "prov-1", 403, r#"{"message":"nope"}"#);
    let never_tried = mock_assign(&server, "loc-1", "prov-2", 204, "");
    let bad_request = mock_assign(&server, "loc-2", "prov-1", 400, r#"{"message":"bad request"}"#);

    let candidates = vec!["prov-1".to_string(), "prov-2".to_string()];
    let run = flip_pstn(&client(&server), &["org-1".to_string()], &candidates).await;

    forbidden.assert_hits(1);
    never_tried.assert_hits(0);
    bad_request.assert_hits(1);
    assert_eq!(run.attempts[0].verdict, AssignmentVerdict::Failed);
    assert_eq!(run.attempts[0].status_code, Some(403));
    assert_eq!(run.attempts[1].verdict, AssignmentVerdict::Failed);
    assert_eq!(run.attempts.len(), 2);

    let failures: Vec<(Option<&str>, FailureKind, Option<u16>)> = run
        .report
        .failures
        .iter()
        .map(|f| (f.location_id.as_deref(), f.kind, f.status_code))
        .collect();
    assert_eq!(
        failures,
        vec![
            (Some("loc-1"), FailureKind::Permission, Some(403)),
            (Some("loc-2"), FailureKind::Status, Some(400)),
        ]
    );
    assert!(run.report.failures.iter().all(|f| f.stage == Stage::AssignPstn));
    assert_eq!(run.report.failed_org_ids(), vec!["org-1".to_string()]);
}

#[tokio::test]
async fn audit_keeps_locations_whose_connection_cannot_be_read() {
    let server = MockServer::start_async().await;
    mock_org_with_locations(&server, "org-1");
    server.mock(|when, then| {
        when.method(GET)
            .path("/telephony/pstn/locations/loc-1/connection")
            .query_param("orgId", "org-1");
        then.status(200).json_body(json!({
            "pstnConnectionType": "LOCAL_GATEWAY",
            "id": "prov-1",
            "displayName": "Veracity Networks"
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/telephony/pstn/locations/loc-2/connection");
        then.status(404).json_body(json!({ "message": "no connection" }));
    });
    let denied = server.mock(|when, then| {
        when.method(GET).path("/organizations/org-2");
        then.status(403);
    });
    let denied_locations = server.mock(|when, then| {
        when.method(GET).path("/locations").query_param("orgId", "org-2");
        then.status(200).json_body(json!({ "items": [] }));
    });

    let orgs = vec!["org-1".to_string(), "org-2".to_string()];
    let run = audit_pstn(&client(&server), &orgs).await;

    denied.assert_hits(1);
    denied_locations.assert_hits(0);
    assert_eq!(run.report.successes, vec!["org-1".to_string()]);
    assert_eq!(run.report.failed_org_ids(), vec!["org-1".to_string(), "org-2".to_string()]);

    let location_failure = &run.report.failures[0];
    assert_eq!(location_failure.stage, Stage::PstnConnection);
    assert_eq!(location_failure.location_id.as_deref(), Some("loc-2"));
    assert_eq!(location_failure.status_code, Some(404));
    assert_eq!(run.report.failures[1].stage, Stage::Activate);

    let rows = run.flat_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].provider_name, "Veracity Networks");
    assert_eq!(rows[0].connection_type, "LOCAL_GATEWAY");
    assert_eq!(rows[1].provider_id, "");
}

#[tokio::test]
async fn discovery_filters_options_by_keyword() {
    let server = MockServer::start_async().await;
    mock_org_with_locations(&server, "org-1");
    server.mock(|when, then| {
        when.method(GET)
            .path("/telephony/pstn/locations/loc-1/connectionOptions")
            .query_param("orgId", "org-1");
        then.status(200).json_body(json!({ "items": [
            { "id": "opt-a", "displayName": "VERACITY Networks", "pstnServices": ["GEOGRAPHIC_NUMBERS"] },
            { "id": "opt-b", "displayName": "Another Carrier" }
        ]}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/telephony/pstn/locations/loc-2/connectionOptions");
        then.status(403);
    });

    let run = discover_pstn(&client(&server), &["org-1".to_string()], "veracity").await;

    assert_eq!(run.matches.len(), 1);
    assert_eq!(run.matches[0].location_id, "loc-1");
    assert_eq!(run.matches[0].matches[0].id, "opt-a");
    assert_eq!(
        run.matches[0].matches[0].extra["pstnServices"],
        json!(["GEOGRAPHIC_NUMBERS"])
    );
    assert_eq!(run.raw_options.len(), 1);
    assert_eq!(run.report.failures.len(), 1);
    assert_eq!(run.report.failures[0].kind, FailureKind::Permission);
    assert_eq!(run.report.failures[0].stage, Stage::ConnectionOptions);
}

#[tokio::test]
async fn discovery_without_an_org_list_walks_every_managed_org() {
    let server = MockServer::start_async().await;
    let listing = server.mock(|when, then| {
        when.method(GET).path("/organizations");
        then.status(200)
            .json_body(json!({ "items": [ { "id": "org-1", "displayName": "Acme" } ] }));
    });
    mock_org_with_locations(&server, "org-1");
    server.mock(|when, then| {
        when.method(GET).path_contains("/connectionOptions");
        then.status(200).json_body(json!({ "items": [] }));
    });

    let dir = tempfile::tempdir().unwrap();
    let out = OutputDir::with_timestamp(dir.path(), "20250101_000000").unwrap();
    let run = jobs::pstn_discover(&client(&server), Vec::new(), "veracity", &out)
        .await
        .unwrap();

    listing.assert_hits(1);
    assert_eq!(run.report.successes, vec!["org-1".to_string()]);
    assert!(run.matches.is_empty());
    assert!(out.stamped("pstn_matches", "json").exists());
    assert!(out.stamped("tracking_log", "json").exists());
}
