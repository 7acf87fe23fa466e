use httpmock::prelude::*;
use serde_json::json;
use webex_partner_ops::client::{ApiRequest, CallStatus};
use webex_partner_ops::{ClientError, ClientSettings, FailureKind, PartnerClient};

fn client_with(settings: ClientSettings) -> PartnerClient {
    PartnerClient::new(settings, "test-token").unwrap()
}

#[tokio::test]
async fn forbidden_is_returned_once_and_never_retried() {
    let server = MockServer::start_async().await;
    let org = server.mock(|when, then| {
        when.method(GET)
            .path("/organizations/org-1")
            .header("authorization", "Bearer test-token");
        then.status(403)
            .header("trackingid", "ROUTER_403")
            .json_body(json!({ "message": "not allowed" }));
    });

    let client = client_with(ClientSettings::unthrottled(server.base_url()));
    let request = ApiRequest::get("organization", client.endpoint("organizations/org-1"));
    let response = client.request(&request).await.unwrap();
    assert_eq!(response.status_code(), 403);
    assert_eq!(response.tracking_id.as_deref(), Some("ROUTER_403"));
    org.assert_hits(1);

    let err = response.error_for_status().unwrap_err();
    assert!(matches!(err, ClientError::Forbidden { .. }));
    assert_eq!(err.kind(), FailureKind::Permission);
}

#[tokio::test]
async fn server_errors_are_retried_up_to_max_attempts() {
    let server = MockServer::start_async().await;
    let locations = server.mock(|when, then| {
        when.method(GET).path("/locations");
        then.status(503).body("busy");
    });

    let mut settings = ClientSettings::unthrottled(server.base_url());
    settings.retry = settings.retry.clone().with_max_attempts(3);
    let client = client_with(settings);

    let err = client
        .request(&ApiRequest::get("locations", client.endpoint("locations")))
        .await
        .unwrap_err();
    match &err {
        ClientError::ServerError {
            status, attempts, ..
        } => {
            assert_eq!(*status, 503);
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), FailureKind::Transient);
    locations.assert_hits(3);
}

#[tokio::test]
async fn rate_limit_retries_stop_at_the_ceiling() {
    let server = MockServer::start_async().await;
    let licenses = server.mock(|when, then| {
        when.method(GET).path("/licenses");
        then.status(429).header("Retry-After", "0");
    });

    let mut settings = ClientSettings::unthrottled(server.base_url());
    settings.retry = settings.retry.clone().with_rate_limit_retries(Some(2));
    let client = client_with(settings);

    let err = client
        .request(&ApiRequest::get("licenses", client.endpoint("licenses")))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RateLimited { retries: 2, .. }));
    assert_eq!(err.kind(), FailureKind::RateLimit);
    licenses.assert_hits(3);
}

#[tokio::test]
async fn client_errors_other_than_rate_limits_are_not_retried() {
    let server = MockServer::start_async().await;
    let missing = server.mock(|when, then| {
        when.method(GET).path("/organizations/gone");
        then.status(404).json_body(json!({ "message": "not found" }));
    });

    let client = client_with(ClientSettings::unthrottled(server.base_url()));
    let err = client
        .request_ok(&ApiRequest::get(
            "organization",
            client.endpoint("organizations/gone"),
        ))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(404));
    assert_eq!(err.kind(), FailureKind::Status);
    assert!(err.body().unwrap().contains("not found"));
    missing.assert_hits(1);
}

#[tokio::test]
async fn every_attempt_lands_in_the_tracking_log() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/locations");
        then.status(500).header("trackingid", "ROUTER_500").body("oops");
    });
    server.mock(|when, then| {
        when.method(PUT)
            .path("/telephony/pstn/locations/loc-1/connection")
            .query_param("orgId", "org-1")
            .json_body(json!({ "id": "provider-1" }));
        then.status(204);
    });

    let mut settings = ClientSettings::unthrottled(server.base_url());
    settings.retry = settings.retry.clone().with_max_attempts(2);
    let client = client_with(settings);

    let _ = client
        .request(&ApiRequest::get("locations", client.endpoint("locations")).for_org("org-1"))
        .await;
    let put = ApiRequest::put(
        "pstn_assign",
        client.endpoint("telephony/pstn/locations/loc-1/connection"),
    )
    .for_org("org-1")
    .query("orgId", "org-1")
    .json(json!({ "id": "provider-1" }));
    let response = client.request(&put).await.unwrap();
    assert_eq!(response.status_code(), 204);

    let entries = client.take_tracking_log();
    assert_eq!(entries.len(), 3);
    assert!(entries[..2]
        .iter()
        .all(|entry| entry.status_code == CallStatus::Code(500)
            && entry.tracking_id == "ROUTER_500"
            && entry.org_id.as_deref() == Some("org-1")));
    assert_eq!(entries[2].method, "PUT");
    assert_eq!(entries[2].call_type, "pstn_assign");
    assert_eq!(entries[2].tracking_id, "N/A");
    assert!(client.tracking_entries().is_empty());
}

#[tokio::test]
async fn unreachable_hosts_are_recorded_as_transport_failures() {
    // nothing listens on port 9 on the loopback interface
    let mut settings = ClientSettings::unthrottled("http://127.0.0.1:9");
    settings.retry = settings.retry.clone().with_max_attempts(2);
    let client = client_with(settings);

    let err = client
        .request(&ApiRequest::get("organizations", client.endpoint("organizations")))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Transport { attempts: 2, .. }));
    assert_eq!(err.kind(), FailureKind::Transient);

    let entries = client.tracking_entries();
    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .all(|entry| entry.status_code == CallStatus::ERROR || entry.status_code == CallStatus::TIMEOUT));
}
