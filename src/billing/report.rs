use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::client::{ApiRequest, PartnerClient};
use crate::config::ReportSettings;
use crate::error::{ClientError, ClientResult, ReportError};
use crate::pagination::fetch_all;

use super::period::ReportPeriod;

const REPORTS_PATH: &str = "wholesale/billing/reports";
const DOWNLOAD_BUFFER: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Requested,
    InProgress,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingReport {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub billing_start_date: Option<String>,
    #[serde(default)]
    pub billing_end_date: Option<String>,
    #[serde(default)]
    pub status: Option<ReportStatus>,
    #[serde(rename = "tempDownloadURL", default)]
    pub temp_download_url: Option<String>,
}

impl BillingReport {
    pub fn covers(&self, period: &ReportPeriod) -> bool {
        period.matches(
            self.billing_start_date.as_deref(),
            self.billing_end_date.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// 409: another caller already requested this period.
    AlreadyExists,
    Rejected { status: u16, body: String },
}

/// Where the report for one period stands, judged from a report listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportState {
    Absent,
    Pending(String),
    Completed(String),
    Failed(String),
}

impl ReportState {
    /// A completed report wins over a pending one, and a pending one over a
    /// failed one, whatever order the listing returns them in.
    pub fn from_listing(reports: &[BillingReport], period: &ReportPeriod) -> Self {
        let mut state = ReportState::Absent;
        for report in reports.iter().filter(|report| report.covers(period)) {
            let candidate = match report.status {
                Some(ReportStatus::Completed) => ReportState::Completed(report.id.clone()),
                Some(ReportStatus::Failed) => ReportState::Failed(report.id.clone()),
                _ => ReportState::Pending(report.id.clone()),
            };
            if candidate.rank() > state.rank() {
                state = candidate;
            }
        }
        state
    }

    fn rank(&self) -> u8 {
        match self {
            ReportState::Absent => 0,
            ReportState::Failed(_) => 1,
            ReportState::Pending(_) => 2,
            ReportState::Completed(_) => 3,
        }
    }
}

/// Remote operations the report flow depends on.
#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn list_reports(&self) -> ClientResult<Vec<BillingReport>>;
    async fn create_report(&self, period: &ReportPeriod) -> ClientResult<CreateOutcome>;
    async fn report_detail(&self, report_id: &str) -> ClientResult<BillingReport>;
}

#[async_trait]
impl ReportApi for PartnerClient {
    async fn list_reports(&self) -> ClientResult<Vec<BillingReport>> {
        fetch_all(
            self,
            ApiRequest::get("billing_reports", self.endpoint(REPORTS_PATH)),
        )
        .await
        .into_result()
    }

    async fn create_report(&self, period: &ReportPeriod) -> ClientResult<CreateOutcome> {
        let request = ApiRequest::post("billing_report_create", self.endpoint(REPORTS_PATH)).json(
            json!({
                "billingStartDate": period.start_date(),
                "billingEndDate": period.end_date(),
                "type": "CUSTOMER",
            }),
        );
        let response = self.request(&request).await?;
        Ok(match response.status_code() {
            409 => CreateOutcome::AlreadyExists,
            status if status >= 400 => CreateOutcome::Rejected {
                status,
                body: response.body,
            },
            _ => CreateOutcome::Created,
        })
    }

    async fn report_detail(&self, report_id: &str) -> ClientResult<BillingReport> {
        let request = ApiRequest::get(
            "billing_report_detail",
            self.endpoint(&format!("{REPORTS_PATH}/{report_id}")),
        );
        self.request_ok(&request).await?.json()
    }
}

/// Drives a billing report from "maybe absent" to a downloadable file.
pub struct ReportOrchestrator<'a, A: ReportApi + ?Sized> {
    api: &'a A,
    settings: ReportSettings,
}

impl<'a, A: ReportApi + ?Sized> ReportOrchestrator<'a, A> {
    pub fn new(api: &'a A, settings: ReportSettings) -> Self {
        Self { api, settings }
    }

    /// Returns the id of a COMPLETED report for `period`, creating one if needed.
    ///
    /// A FAILED report is never reused. A 409 on create means someone else
    /// asked first and is treated as accepted.
    pub async fn ensure_report(&self, period: &ReportPeriod) -> Result<String, ReportError> {
        let reports = self.api.list_reports().await?;
        match ReportState::from_listing(&reports, period) {
            ReportState::Completed(report_id) => {
                info!(%report_id, "using completed report");
                return Ok(report_id);
            }
            ReportState::Pending(report_id) => {
                info!(%report_id, "report already in progress, polling");
                return self.poll(period).await;
            }
            ReportState::Failed(report_id) => {
                warn!(%report_id, "found failed report, requesting a new one");
            }
            ReportState::Absent => {}
        }

        match self.api.create_report(period).await? {
            CreateOutcome::Created => info!("report creation accepted"),
            CreateOutcome::AlreadyExists => info!("report already requested, polling"),
            CreateOutcome::Rejected { status, body } => {
                return Err(ReportError::CreateRejected { status, body });
            }
        }
        self.poll(period).await
    }

    /// Re-lists reports until a COMPLETED one covers `period` or the wait
    /// budget runs out.
    pub async fn poll(&self, period: &ReportPeriod) -> Result<String, ReportError> {
        let started = Instant::now();
        loop {
            let reports = self.api.list_reports().await?;
            let completed = reports.iter().find(|report| {
                report.covers(period) && report.status == Some(ReportStatus::Completed)
            });
            if let Some(report) = completed {
                return Ok(report.id.clone());
            }

            let waited = started.elapsed();
            if waited >= self.settings.max_wait {
                return Err(ReportError::Timeout {
                    start: period.start_date(),
                    end: period.end_date(),
                    waited_secs: waited.as_secs(),
                });
            }
            info!(
                poll_secs = self.settings.poll_interval.as_secs(),
                waited_secs = waited.as_secs(),
                "waiting for report to complete"
            );
            sleep(self.settings.poll_interval).await;
        }
    }

    pub async fn download_url(&self, report_id: &str) -> Result<String, ReportError> {
        self.api
            .report_detail(report_id)
            .await?
            .temp_download_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ReportError::MissingDownloadUrl {
                report_id: report_id.to_string(),
            })
    }
}

/// Streams a signed download link to `dest`. The link carries its own
/// credentials, so no bearer token is sent.
pub async fn download_to_file(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
) -> Result<u64, ReportError> {
    let parsed = url::Url::parse(url).map_err(|err| ClientError::InvalidUrl {
        url: url.to_string(),
        reason: err.to_string(),
    })?;
    let response = http.get(parsed).send().await?.error_for_status()?;

    let file = tokio::fs::File::create(dest).await?;
    match stream_into(response, file).await {
        Ok(written) => Ok(written),
        Err(err) => {
            // no partial report survives a failed download
            if let Err(remove_err) = tokio::fs::remove_file(dest).await {
                warn!(
                    path = %dest.display(),
                    error = %remove_err,
                    "failed to remove partial download"
                );
            }
            Err(err)
        }
    }
}

async fn stream_into(
    response: reqwest::Response,
    file: tokio::fs::File,
) -> Result<u64, ReportError> {
    let mut writer = BufWriter::with_capacity(DOWNLOAD_BUFFER, file);
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk: Bytes = chunk?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}
