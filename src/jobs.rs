//! One function per command-line job. Each runs its per-org loop through the
//! library and writes its artifacts into an [`OutputDir`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::auth::{self, TokenLogEntry};
use crate::billing::{self, BillingOutput, ReportPeriod};
use crate::client::PartnerClient;
use crate::config::{ClientSettings, RefreshCredentials, ReportSettings};
use crate::error::FailureKind;
use crate::licenses::{self, LicenseJobOptions, LicenseRun};
use crate::organizations::{list_organizations, OrgTarget};
use crate::outcome::{FailureRecord, Stage};
use crate::output::OutputDir;
use crate::overages::{self, CustomerOrg};
use crate::pstn::{self, AuditRun, DiscoveryRun, FlipRun};
use crate::table::Table;

/// Org ids from a text file, one per line. Blank lines and `#` comments are
/// ignored; repeats keep their first position.
pub fn read_org_ids(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read org list {}", path.display()))?;
    let mut seen = HashSet::new();
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_string()))
        .map(ToString::to_string)
        .collect())
}

/// Merges explicit ids, an id file and a cleaned overages CSV into one target list.
pub fn resolve_targets(
    org_ids: &[String],
    orgs_file: Option<&Path>,
    cleaned_csv: Option<&Path>,
) -> Result<Vec<OrgTarget>> {
    let mut targets: Vec<OrgTarget> = org_ids.iter().map(OrgTarget::new).collect();
    if let Some(path) = orgs_file {
        targets.extend(read_org_ids(path)?.into_iter().map(OrgTarget::new));
    }
    if let Some(path) = cleaned_csv {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let rows = overages::read_cleaned(file)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        targets.extend(overages::to_targets(&rows));
    }

    let mut seen = HashSet::new();
    targets.retain(|target| seen.insert(target.org_id.clone()));
    if targets.is_empty() {
        bail!("no organizations to process; pass --org, --orgs-file or --csv");
    }
    Ok(targets)
}

pub fn org_ids(targets: &[OrgTarget]) -> Vec<String> {
    targets.iter().map(|target| target.org_id.clone()).collect()
}

fn write_tracking_log(client: &PartnerClient, out: &OutputDir) -> Result<PathBuf> {
    out.write_json("tracking_log", &client.take_tracking_log())
}

pub fn clean_overages(input: &Path, out: &OutputDir) -> Result<(PathBuf, Vec<CustomerOrg>)> {
    let file =
        std::fs::File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let cleaned = overages::read_raw_export(file)
        .with_context(|| format!("failed to parse {}", input.display()))?;

    let path = out.stamped("cleaned_overages", "csv");
    let file = std::fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    overages::write_cleaned(file, &cleaned)?;
    info!(path = %path.display(), rows = cleaned.len(), "wrote cleaned overages");
    Ok((path, cleaned))
}

pub async fn licenses(
    client: &PartnerClient,
    targets: &[OrgTarget],
    options: &LicenseJobOptions,
    out: &OutputDir,
) -> Result<LicenseRun> {
    let run = licenses::collect_licenses(client, targets, options).await;

    out.write_json("license_successes", &run.report.successes)?;
    out.write_json("license_failures", &run.report.failures)?;
    out.write_csv("licenses", &run.rows)?;
    out.write_csv("org_details", &run.details)?;
    write_tracking_log(client, out)?;

    info!(
        succeeded = run.report.successes.len(),
        failed = run.report.failed_org_ids().len(),
        license_rows = run.rows.len(),
        "license export complete"
    );
    Ok(run)
}

pub async fn overages(
    client: &PartnerClient,
    raw_export: &Path,
    options: &LicenseJobOptions,
    out: &OutputDir,
) -> Result<LicenseRun> {
    let (_, cleaned) = clean_overages(raw_export, out)?;
    let targets = overages::to_targets(&cleaned);
    if targets.is_empty() {
        bail!("{} contains no organizations", raw_export.display());
    }

    let run = licenses::collect_licenses(client, &targets, options).await;
    let report = licenses::overage_rows(&run.report.successes);
    out.write_csv("overage_report", &report)?;
    out.write_json("overage_failures", &run.report.failures)?;
    write_tracking_log(client, out)?;

    let overused = report
        .iter()
        .filter(|row| row.status == licenses::Utilization::Overused)
        .count();
    info!(rows = report.len(), overused, "overage report complete");
    Ok(run)
}

pub fn license_pivot(input: &Path, out: &OutputDir) -> Result<PathBuf> {
    let flat = Table::read_csv_path(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let pivot = licenses::pivot_licenses(&flat)?;
    out.write_table("license_pivot", &pivot)
}

pub async fn pstn_audit(
    client: &PartnerClient,
    org_ids: &[String],
    out: &OutputDir,
) -> Result<AuditRun> {
    let run = pstn::audit_pstn(client, org_ids).await;

    out.write_json("pstn_audit", &run.results)?;
    out.write_csv("pstn_audit", &run.flat_rows())?;
    out.write_json("pstn_audit_failures", &run.report.failures)?;
    out.write_lines("successful_orgs", &run.report.successes)?;
    out.write_lines("failed_orgs", &run.report.failed_org_ids())?;
    write_tracking_log(client, out)?;
    Ok(run)
}

/// Runs discovery over `org_ids`, or over every managed org when none are given.
pub async fn pstn_discover(
    client: &PartnerClient,
    org_ids: Vec<String>,
    keyword: &str,
    out: &OutputDir,
) -> Result<DiscoveryRun> {
    let mut listing_failure = None;
    let org_ids = if org_ids.is_empty() {
        let collected = list_organizations(client).await;
        if let Some(err) = &collected.error {
            if collected.items.is_empty() {
                bail!("failed to list organizations: {err}");
            }
            warn!(error = %err, fetched = collected.items.len(), "organization listing incomplete");
            listing_failure = Some(FailureRecord::from_client_error(
                "*",
                Stage::Organizations,
                err,
            ));
        }
        collected
            .items
            .into_iter()
            .map(|org| org.id)
            .filter(|id| !id.is_empty())
            .collect()
    } else {
        org_ids
    };
    info!(orgs = org_ids.len(), %keyword, "starting pstn discovery");

    let mut run = pstn::discover_pstn(client, &org_ids, keyword).await;
    if let Some(failure) = listing_failure {
        run.report.fail(failure);
    }

    out.write_json("locations", &run.locations)?;
    out.write_json("pstn_options", &run.raw_options)?;
    out.write_json("pstn_matches", &run.matches)?;
    out.write_json("pstn_discovery_errors", &run.report.failures)?;
    write_tracking_log(client, out)?;
    Ok(run)
}

pub async fn pstn_flip(
    client: &PartnerClient,
    org_ids: &[String],
    candidates: &[String],
    out: &OutputDir,
) -> Result<FlipRun> {
    if candidates.is_empty() {
        bail!("at least one provider id is required");
    }
    let run = pstn::flip_pstn(client, org_ids, candidates).await;

    out.write_json("location_logs", &run.locations)?;
    out.write_json("pstn_flip_logs", &run.attempts)?;
    out.write_json("pstn_flip_failures", &run.report.failures)?;
    write_tracking_log(client, out)?;
    info!(
        attempts = run.attempts.len(),
        applied = run.applied().count(),
        "pstn flip complete"
    );
    Ok(run)
}

/// Refreshes the access token, then ensures, downloads and transforms the
/// billing report for `period`.
pub async fn billing_report(
    settings: ClientSettings,
    report_settings: ReportSettings,
    creds: &RefreshCredentials,
    period: &ReportPeriod,
    out: &OutputDir,
) -> Result<BillingOutput> {
    let http = reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()
        .context("failed to build token client")?;
    let (_, access_token) =
        auth::refresh_access_token(&http, &settings.endpoint(auth::TOKEN_PATH), creds)
            .await
            .context("could not refresh access token")?;
    info!("access token refreshed");

    let client = PartnerClient::new(settings, access_token)?;
    let output = billing::fetch_billing_report(
        &client,
        report_settings,
        period,
        out.root(),
        out.timestamp(),
    )
    .await?;
    Ok(output)
}

/// Refreshes every entry of the token store, then writes a dated backup,
/// overwrites the store and writes a per-entry log.
pub async fn refresh_tokens(
    store_path: &Path,
    token_url: &str,
    timeout: std::time::Duration,
    out: &OutputDir,
) -> Result<Vec<TokenLogEntry>> {
    let mut store = auth::load_store(store_path)?;
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build token client")?;

    let log = auth::refresh_store(&http, token_url, &mut store).await;

    out.subdir("access_tokens")?.write_json("tokens", &store)?;
    let master = serde_json::to_string_pretty(&store)?;
    std::fs::write(store_path, master)
        .with_context(|| format!("failed to overwrite {}", store_path.display()))?;
    out.subdir("token_logs")?.write_json("logs", &log)?;

    let refreshed = log
        .iter()
        .filter(|entry| entry.status == auth::RefreshStatus::Success)
        .count();
    info!(entries = log.len(), refreshed, "token refresh complete");
    Ok(log)
}

pub fn transform_billing(input: &Path, output: &Path, days: u32) -> Result<usize> {
    if days == 0 {
        bail!("days must be greater than zero");
    }
    billing::transform_billing_file(input, output, days)
        .with_context(|| format!("failed to transform {}", input.display()))
}

/// Logs failure counts per kind. Per-org failures never fail the run.
pub fn summarize(failures: &[FailureRecord]) {
    for kind in [
        FailureKind::Auth,
        FailureKind::Activation,
        FailureKind::Permission,
        FailureKind::RateLimit,
        FailureKind::Transient,
        FailureKind::DataShape,
        FailureKind::Status,
    ] {
        let count = failures.iter().filter(|f| f.kind == kind).count();
        if count > 0 {
            warn!(kind = ?kind, count, "failures recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_id_files_skip_comments_and_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orgs.txt");
        std::fs::write(&path, "# customers\norg-a\n\n  org-b \norg-a\n").unwrap();
        assert_eq!(read_org_ids(&path).unwrap(), vec!["org-a", "org-b"]);
    }

    #[test]
    fn targets_merge_sources_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("cleaned.csv");
        std::fs::write(&csv, "Customer Name,Customer Org ID\nAcme,org-a\nBeta,org-c\n").unwrap();

        let targets =
            resolve_targets(&["org-a".to_string()], None, Some(csv.as_path())).unwrap();
        assert_eq!(org_ids(&targets), vec!["org-a", "org-c"]);
        assert_eq!(targets[1].customer_name.as_deref(), Some("Beta"));

        assert!(resolve_targets(&[], None, None).is_err());
    }
}
