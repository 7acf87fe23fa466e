//! Monthly wholesale billing report: make sure one exists for the period,
//! download it, then derive billable units.

pub mod period;
pub mod report;
pub mod transform;

pub use period::{days_in_month, ReportPeriod};
pub use report::{
    download_to_file, BillingReport, CreateOutcome, ReportApi, ReportOrchestrator, ReportState,
    ReportStatus,
};
pub use transform::{billable_units, transform_billing, transform_billing_file, BILLABLE_UNITS};

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::client::PartnerClient;
use crate::config::ReportSettings;
use crate::error::ReportError;

#[derive(Debug, Clone, Serialize)]
pub struct BillingOutput {
    pub report_id: String,
    pub original: PathBuf,
    pub transformed: PathBuf,
    pub bytes: u64,
    pub rows: usize,
}

/// Ensures, downloads and transforms the report for `period` into `dir`.
pub async fn fetch_billing_report(
    client: &PartnerClient,
    settings: ReportSettings,
    period: &ReportPeriod,
    dir: &Path,
    timestamp: &str,
) -> Result<BillingOutput, ReportError> {
    info!(
        start = %period.start_date(),
        end = %period.end_date(),
        "fetching billing report"
    );
    let orchestrator = ReportOrchestrator::new(client, settings);
    let report_id = orchestrator.ensure_report(period).await?;
    info!(%report_id, "report ready");

    let url = orchestrator.download_url(&report_id).await?;
    let original = dir.join(period.original_file_name(timestamp));
    let bytes = download_to_file(client.http(), &url, &original).await?;
    info!(path = %original.display(), bytes, "downloaded report");

    let days = period.days_in_month();
    let transformed = dir.join(period.transformed_file_name(timestamp));
    let rows = transform_billing_file(&original, &transformed, days)?;
    info!(path = %transformed.display(), rows, days, "transformed report");

    Ok(BillingOutput {
        report_id,
        original,
        transformed,
        bytes,
        rows,
    })
}
