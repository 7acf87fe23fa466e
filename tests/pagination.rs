use httpmock::prelude::*;
use serde_json::json;
use serde::Deserialize;
use webex_partner_ops::client::ApiRequest;
use webex_partner_ops::licenses::fetch_licenses;
use webex_partner_ops::pagination::fetch_all;
use webex_partner_ops::pstn::list_locations;
use webex_partner_ops::{ClientError, ClientSettings, PartnerClient};

fn next(server: &MockServer, path: &str) -> String {
    format!("<{}>; rel=\"next\"", server.url(path))
}

#[tokio::test]
async fn follows_next_links_until_the_last_page() {
    let server = MockServer::start_async().await;
    let first = server.mock(|when, then| {
        when.method(GET)
            .path("/licenses")
            .query_param("orgId", "org-1")
            .query_param("max", "2");
        then.status(200)
            .header("Link", next(&server, "/licenses/page/2").as_str())
            .json_body(json!({ "items": [
                { "id": "l1", "name": "Calling", "totalUnits": 10, "consumedUnits": 4 },
                { "id": "l2", "name": "Meetings", "totalUnits": 5, "consumedUnits": 5 }
            ]}));
    });
    let second = server.mock(|when, then| {
        when.method(GET).path("/licenses/page/2");
        then.status(200)
            .header("Link", next(&server, "/licenses/page/3").as_str())
            .json_body(json!({ "items": [
                { "licenseId": "l3", "name": "Webinars" },
                { "id": "l4", "name": "Messaging" }
            ]}));
    });
    let third = server.mock(|when, then| {
        when.method(GET).path("/licenses/page/3");
        then.status(200)
            .json_body(json!({ "items": [ { "id": "l5", "name": "Rooms" } ] }));
    });

    let client =
        PartnerClient::new(ClientSettings::unthrottled(server.base_url()), "token").unwrap();
    let collected = fetch_licenses(&client, "org-1", 2).await;

    assert!(collected.is_complete());
    assert_eq!(collected.pages, 3);
    let ids: Vec<&str> = collected
        .items
        .iter()
        .filter_map(|license| license.identifier())
        .collect();
    assert_eq!(ids, vec!["l1", "l2", "l3", "l4", "l5"]);
    first.assert_hits(1);
    second.assert_hits(1);
    third.assert_hits(1);
}

#[tokio::test]
async fn a_failed_page_keeps_what_was_collected() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/locations").query_param("orgId", "org-1");
        then.status(200)
            .header("Link", next(&server, "/locations/page/2").as_str())
            .json_body(json!({ "items": [
                { "id": "loc-1", "name": "HQ" },
                { "id": "loc-2", "name": "Branch" }
            ]}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/locations/page/2");
        then.status(404).json_body(json!({ "message": "cursor expired" }));
    });

    let client =
        PartnerClient::new(ClientSettings::unthrottled(server.base_url()), "token").unwrap();
    let collected = list_locations(&client, "org-1").await;

    assert!(!collected.is_complete());
    assert_eq!(collected.pages, 1);
    assert_eq!(collected.items.len(), 2);
    assert_eq!(collected.items[1].display_name(), "Branch");
    assert!(matches!(
        collected.error,
        Some(ClientError::UnexpectedStatus { status: 404, .. })
    ));
}

#[tokio::test]
async fn a_page_without_items_is_a_decode_error() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/locations");
        then.status(200).body("<html>maintenance</html>");
    });

    let client =
        PartnerClient::new(ClientSettings::unthrottled(server.base_url()), "token").unwrap();
    let result = list_locations(&client, "org-1").await.into_result();
    assert!(matches!(result, Err(ClientError::Decode { .. })));
}

#[derive(Debug, Deserialize)]
struct Workspace {
    id: String,
    capacity: u32,
}

#[tokio::test]
async fn a_page_without_an_items_key_is_an_empty_page() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/workspaces");
        then.status(200)
            .header("Link", next(&server, "/workspaces/page/2").as_str())
            .json_body(json!({ "notice": "no workspaces on this page" }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/workspaces/page/2");
        then.status(200)
            .json_body(json!({ "items": [ { "id": "ws-1", "capacity": 12 } ] }));
    });

    let client =
        PartnerClient::new(ClientSettings::unthrottled(server.base_url()), "token").unwrap();
    let request = ApiRequest::get("workspaces", client.endpoint("workspaces"));
    let collected = fetch_all::<Workspace>(&client, request).await;

    assert!(collected.is_complete());
    assert_eq!(collected.pages, 2);
    assert_eq!(collected.items.len(), 1);
    assert_eq!(collected.items[0].id, "ws-1");
    assert_eq!(collected.items[0].capacity, 12);
}
