use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use webex_partner_ops::billing::{
    download_to_file, fetch_billing_report, ReportOrchestrator, ReportPeriod,
};
use webex_partner_ops::jobs;
use webex_partner_ops::output::OutputDir;
use webex_partner_ops::{ClientSettings, PartnerClient, RefreshCredentials, ReportError, ReportSettings};

const RAW_REPORT: &str = "\
PARTNER,PARTNER_ID,CUSTOMER,CUSTOMER_ID,SUB_ID,SKU,DESCRIPTION,START,END,LOCATION,USAGE
P,p-1,Acme,c-1,sub-1,SKU-A,Calling,2025-06-01,2025-06-30,HQ,31
P,p-1,Beta,c-2,sub-2,SKU-B,Calling,2025-06-01,2025-06-30,Branch,n/a
";

fn period() -> ReportPeriod {
    ReportPeriod::parse("2025-06-01", "2025-06-30").unwrap()
}

fn quick_polling() -> ReportSettings {
    ReportSettings {
        poll_interval: Duration::from_millis(10),
        max_wait: Duration::from_secs(5),
    }
}

fn mock_listing<'a>(server: &'a MockServer, status: &str) -> httpmock::Mock<'a> {
    let status = status.to_string();
    server.mock(|when, then| {
        when.method(GET).path("/wholesale/billing/reports");
        then.status(200).json_body(json!({ "items": [
            {
                "id": "rep-old",
                "billingStartDate": "2025-05-01",
                "billingEndDate": "2025-05-31",
                "status": "COMPLETED"
            },
            {
                "id": "rep-1",
                "billingStartDate": "2025-06-01",
                "billingEndDate": "2025-06-30",
                "status": status
            }
        ]}));
    })
}

#[tokio::test]
async fn completed_report_is_downloaded_without_creating_one() {
    let server = MockServer::start_async().await;
    let listing = mock_listing(&server, "COMPLETED");
    let create = server.mock(|when, then| {
        when.method(POST).path("/wholesale/billing/reports");
        then.status(201);
    });
    let detail = server.mock(|when, then| {
        when.method(GET).path("/wholesale/billing/reports/rep-1");
        then.status(200).json_body(json!({
            "id": "rep-1",
            "status": "COMPLETED",
            "tempDownloadURL": server.url("/signed/rep-1.csv")
        }));
    });
    let download = server.mock(|when, then| {
        when.method(GET).path("/signed/rep-1.csv");
        then.status(200).body(RAW_REPORT);
    });

    let dir = tempfile::tempdir().unwrap();
    let client =
        PartnerClient::new(ClientSettings::unthrottled(server.base_url()), "token").unwrap();
    let output = fetch_billing_report(&client, quick_polling(), &period(), dir.path(), "20250701_090000")
        .await
        .unwrap();

    listing.assert_hits(1);
    create.assert_hits(0);
    detail.assert_hits(1);
    download.assert_hits(1);

    assert_eq!(output.report_id, "rep-1");
    assert_eq!(
        output.original.file_name().unwrap().to_str().unwrap(),
        "June-2025-Wholesale-Usage_20250701_090000_ORIGINAL.csv"
    );
    assert_eq!(std::fs::read_to_string(&output.original).unwrap(), RAW_REPORT);
    assert_eq!(output.bytes, RAW_REPORT.len() as u64);

    let transformed = std::fs::read_to_string(&output.transformed).unwrap();
    let lines: Vec<&str> = transformed.lines().collect();
    assert_eq!(
        lines[0],
        "SUB_ID,SKU,DESCRIPTION,START,END,LOCATION,USAGE,BILLABLE_UNITS"
    );
    assert_eq!(lines[1], "sub-1,SKU-A,Calling,2025-06-01,2025-06-30,HQ,31,2");
    assert_eq!(lines[2], "sub-2,SKU-B,Calling,2025-06-01,2025-06-30,Branch,n/a,");
    assert_eq!(output.rows, 2);
}

#[tokio::test]
async fn missing_download_url_is_fatal() {
    let server = MockServer::start_async().await;
    mock_listing(&server, "COMPLETED");
    server.mock(|when, then| {
        when.method(GET).path("/wholesale/billing/reports/rep-1");
        then.status(200).json_body(json!({ "id": "rep-1", "status": "COMPLETED" }));
    });

    let client =
        PartnerClient::new(ClientSettings::unthrottled(server.base_url()), "token").unwrap();
    let orchestrator = ReportOrchestrator::new(&client, quick_polling());
    let id = orchestrator.ensure_report(&period()).await.unwrap();
    let err = orchestrator.download_url(&id).await.unwrap_err();
    assert!(matches!(err, ReportError::MissingDownloadUrl { report_id } if report_id == "rep-1"));
}

#[tokio::test]
async fn rejected_creation_stops_the_run() {
    let server = MockServer::start_async().await;
    mock_listing(&server, "FAILED");
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/wholesale/billing/reports")
            .json_body(json!({
                "billingStartDate": "2025-06-01",
                "billingEndDate": "2025-06-30",
                "type": "CUSTOMER"
            }));
        then.status(400).json_body(json!({ "message": "period not closed" }));
    });

    let client =
        PartnerClient::new(ClientSettings::unthrottled(server.base_url()), "token").unwrap();
    let err = ReportOrchestrator::new(&client, quick_polling())
        .ensure_report(&period())
        .await
        .unwrap_err();

    create.assert_hits(1);
    match err {
        ReportError::CreateRejected { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("period not closed"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn polling_times_out_when_the_report_never_completes() {
    let server = MockServer::start_async().await;
    let listing = mock_listing(&server, "IN_PROGRESS");

    let client =
        PartnerClient::new(ClientSettings::unthrottled(server.base_url()), "token").unwrap();
    let settings = ReportSettings {
        poll_interval: Duration::from_millis(20),
        max_wait: Duration::from_millis(100),
    };
    let err = ReportOrchestrator::new(&client, settings)
        .ensure_report(&period())
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::Timeout { .. }));
    assert!(listing.hits() >= 3);
}

#[tokio::test]
async fn billing_job_refreshes_the_token_before_calling_the_api() {
    let server = MockServer::start_async().await;
    let refresh = server.mock(|when, then| {
        when.method(POST)
            .path("/access_token")
            .header("content-type", "application/x-www-form-urlencoded")
            .body_contains("grant_type=refresh_token")
            .body_contains("refresh_token=refresh-1");
        then.status(200).json_body(json!({
            "access_token": "fresh-token",
            "expires_in": 1209599,
            "refresh_token": "refresh-1"
        }));
    });
    let listing = server.mock(|when, then| {
        when.method(GET)
            .path("/wholesale/billing/reports")
            .header("authorization", "Bearer fresh-token");
        then.status(200).json_body(json!({ "items": [{
            "id": "rep-9",
            "billingStartDate": "2025-06-01",
            "billingEndDate": "2025-06-30",
            "status": "COMPLETED"
        }]}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/wholesale/billing/reports/rep-9");
        then.status(200).json_body(json!({
            "id": "rep-9",
            "tempDownloadURL": server.url("/signed/rep-9.csv")
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/signed/rep-9.csv");
        then.status(200).body(RAW_REPORT);
    });

    let dir = tempfile::tempdir().unwrap();
    let out = OutputDir::with_timestamp(dir.path(), "20250701_090000").unwrap();
    let creds = RefreshCredentials {
        client_id: "client".into(),
        client_secret: "secret".into(),
        refresh_token: "refresh-1".into(),
    };
    let output = jobs::billing_report(
        ClientSettings::unthrottled(server.base_url()),
        quick_polling(),
        &creds,
        &period(),
        &out,
    )
    .await
    .unwrap();

    refresh.assert_hits(1);
    listing.assert_hits(1);
    assert!(output.transformed.exists());
    assert_eq!(
        output.transformed,
        dir.path().join("June-2025-Wholesale-Usage_20250701_090000.csv")
    );
}

#[tokio::test]
async fn rejected_refresh_aborts_before_any_report_call() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/access_token");
        then.status(400).json_body(json!({ "message": "invalid_grant" }));
    });
    let listing = server.mock(|when, then| {
        when.method(GET).path("/wholesale/billing/reports");
        then.status(200).json_body(json!({ "items": [] }));
    });

    let dir = tempfile::tempdir().unwrap();
    let out = OutputDir::with_timestamp(dir.path(), "ts").unwrap();
    let creds = RefreshCredentials {
        client_id: "client".into(),
        client_secret: "secret".into(),
        refresh_token: "stale".into(),
    };
    let err = jobs::billing_report(
        ClientSettings::unthrottled(server.base_url()),
        quick_polling(),
        &creds,
        &period(),
        &out,
    )
    .await
    .unwrap_err();

    assert!(format!("{err:#}").contains("invalid_grant"));
    listing.assert_hits(0);
}

#[tokio::test]
async fn interrupted_download_leaves_no_file_behind() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await.unwrap();
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4096\r\n\r\nPARTNER,PARTNER_ID\n")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("June-2025-Wholesale-Usage_ts_ORIGINAL.csv");
    let err = download_to_file(
        &reqwest::Client::new(),
        &format!("http://{addr}/signed/rep-1.csv"),
        &dest,
    )
    .await
    .unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, ReportError::Download(_)));
    assert!(!dest.exists());
}
