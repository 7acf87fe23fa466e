use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::info;

use crate::client::{ApiRequest, PartnerClient};
use crate::error::FailureKind;
use crate::organizations::{activate, OrgTarget};
use crate::output::CsvRecord;
use crate::outcome::{FailureRecord, RunReport, Stage};
use crate::pagination::{fetch_all, Collected};
use crate::table::Table;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub license_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub total_units: Option<i64>,
    #[serde(default)]
    pub consumed_units: Option<i64>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sku_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub offer_id: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
}

impl License {
    pub fn identifier(&self) -> Option<&str> {
        self.id.as_deref().or(self.license_id.as_deref())
    }

    pub fn sku_code(&self) -> Option<&str> {
        self.sku_id.as_deref().or(self.sku.as_deref())
    }

    /// `consumed - total`; positive when the org uses more than it owns.
    pub fn overage(&self) -> i64 {
        self.consumed_units.unwrap_or(0) - self.total_units.unwrap_or(0)
    }

    pub fn utilization(&self) -> Utilization {
        Utilization::from_overage(self.overage())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Utilization {
    #[serde(rename = "Overused")]
    Overused,
    #[serde(rename = "Underutilized")]
    Underutilized,
    #[serde(rename = "Fully Used")]
    FullyUsed,
}

impl Utilization {
    pub fn from_overage(overage: i64) -> Self {
        match overage {
            o if o > 0 => Utilization::Overused,
            o if o < 0 => Utilization::Underutilized,
            _ => Utilization::FullyUsed,
        }
    }
}

impl fmt::Display for Utilization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Utilization::Overused => write!(f, "Overused"),
            Utilization::Underutilized => write!(f, "Underutilized"),
            Utilization::FullyUsed => write!(f, "Fully Used"),
        }
    }
}

/// One license flattened for the CSV export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRow {
    pub customer_name: Option<String>,
    pub org_id: String,
    pub license_id: Option<String>,
    pub license_name: Option<String>,
    pub total_units: Option<i64>,
    pub consumed_units: Option<i64>,
    pub subscription_id: Option<String>,
    pub status: Option<String>,
    pub sku: Option<String>,
    pub offer_id: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

impl CsvRecord for LicenseRow {
    const HEADERS: &'static [&'static str] = &[
        "customer_name",
        "org_id",
        "license_id",
        "license_name",
        "total_units",
        "consumed_units",
        "subscription_id",
        "status",
        "sku",
        "offer_id",
        "created",
        "modified",
    ];
}

pub fn normalize_license_rows(
    customer_name: Option<&str>,
    org_id: &str,
    licenses: &[License],
) -> Vec<LicenseRow> {
    licenses
        .iter()
        .map(|license| LicenseRow {
            customer_name: customer_name.map(ToString::to_string),
            org_id: org_id.to_string(),
            license_id: license.identifier().map(ToString::to_string),
            license_name: license.name.clone(),
            total_units: license.total_units,
            consumed_units: license.consumed_units,
            subscription_id: license.subscription_id.clone(),
            status: license.status.clone(),
            sku: license.sku_code().map(ToString::to_string),
            offer_id: license.offer_id.clone(),
            created: license.created.clone(),
            modified: license.modified.clone(),
        })
        .collect()
}

/// Orders rows by license name, then customer, then org; missing values sort last.
pub fn sort_license_rows(rows: &mut [LicenseRow]) {
    fn key(value: &Option<String>) -> (bool, &str) {
        match value {
            Some(value) => (false, value.as_str()),
            None => (true, ""),
        }
    }
    rows.sort_by(|a, b| {
        key(&a.license_name)
            .cmp(&key(&b.license_name))
            .then_with(|| key(&a.customer_name).cmp(&key(&b.customer_name)))
            .then_with(|| a.org_id.cmp(&b.org_id))
    });
}

pub async fn fetch_licenses(
    client: &PartnerClient,
    org_id: &str,
    page_size: u32,
) -> Collected<License> {
    let request = ApiRequest::get("licenses", client.endpoint("licenses"))
        .for_org(org_id)
        .query("orgId", org_id)
        .query("max", page_size);
    fetch_all(client, request).await
}

#[derive(Debug, Clone, Serialize)]
pub struct OrgLicenses {
    pub org_id: String,
    pub customer_name: Option<String>,
    pub org_display_name: Option<String>,
    pub created: Option<String>,
    pub country_code: Option<String>,
    pub licenses_count: usize,
    pub licenses: Vec<License>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrgDetailRow {
    #[serde(rename = "Customer Name")]
    pub customer_name: String,
    #[serde(rename = "Org ID")]
    pub org_id: String,
    #[serde(rename = "Org Display Name")]
    pub display_name: String,
    #[serde(rename = "Created")]
    pub created: String,
    #[serde(rename = "Country Code")]
    pub country_code: String,
    #[serde(rename = "License Count")]
    pub license_count: usize,
}

impl CsvRecord for OrgDetailRow {
    const HEADERS: &'static [&'static str] = &[
        "Customer Name",
        "Org ID",
        "Org Display Name",
        "Created",
        "Country Code",
        "License Count",
    ];
}

#[derive(Debug, Clone)]
pub struct LicenseJobOptions {
    pub page_size: u32,
    /// Pause between organizations.
    pub org_delay: Duration,
}

impl Default for LicenseJobOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            org_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct LicenseRun {
    pub report: RunReport<OrgLicenses>,
    pub rows: Vec<LicenseRow>,
    pub details: Vec<OrgDetailRow>,
}

/// Activates each org and pulls its full license list.
///
/// A failed activation skips the org; a failed or empty license fetch is
/// recorded and processing moves on.
pub async fn collect_licenses(
    client: &PartnerClient,
    targets: &[OrgTarget],
    options: &LicenseJobOptions,
) -> LicenseRun {
    let mut run = LicenseRun::default();
    let total = targets.len();

    for (index, target) in targets.iter().enumerate() {
        if index > 0 && !options.org_delay.is_zero() {
            sleep(options.org_delay).await;
        }
        let org_id = target.org_id.as_str();
        info!(
            index = index + 1,
            total,
            %org_id,
            customer = target.customer_name.as_deref().unwrap_or("-"),
            "processing organization"
        );

        let activation = activate(client, org_id).await;
        if let Some(failure) = activation.failure() {
            run.report
                .fail(failure.with_org_name(target.customer_name.as_deref()));
            continue;
        }
        let org = activation.organization.unwrap_or_default();
        let display_name = org.display_name.clone();

        let collected = fetch_licenses(client, org_id, options.page_size).await;
        if let Some(err) = &collected.error {
            run.report.fail(
                FailureRecord::from_client_error(org_id, Stage::FetchLicenses, err)
                    .with_org_name(display_name.as_deref()),
            );
            continue;
        }
        let licenses = collected.items;
        if licenses.is_empty() {
            run.report.fail(
                FailureRecord::new(
                    org_id,
                    Stage::FetchLicenses,
                    FailureKind::DataShape,
                    "No licenses returned",
                )
                .with_org_name(display_name.as_deref())
                .with_status(Some(200)),
            );
        } else {
            info!(%org_id, licenses = licenses.len(), pages = collected.pages, "fetched licenses");
        }

        let customer_name = target.customer_name.clone().or_else(|| display_name.clone());
        run.rows.extend(normalize_license_rows(
            customer_name.as_deref(),
            org_id,
            &licenses,
        ));
        run.details.push(OrgDetailRow {
            customer_name: customer_name.clone().unwrap_or_else(|| "Unknown".into()),
            org_id: org_id.to_string(),
            display_name: display_name.clone().unwrap_or_else(|| "Unknown".into()),
            created: org.created.clone().unwrap_or_else(|| "Unknown".into()),
            country_code: org.country_code.clone().unwrap_or_else(|| "Unknown".into()),
            license_count: licenses.len(),
        });
        run.report.succeed(OrgLicenses {
            org_id: org_id.to_string(),
            customer_name,
            org_display_name: display_name,
            created: org.created,
            country_code: org.country_code,
            licenses_count: licenses.len(),
            licenses,
        });
    }

    sort_license_rows(&mut run.rows);
    run
}

#[derive(Debug, Clone, Serialize)]
pub struct OverageRow {
    #[serde(rename = "Org Name")]
    pub org_name: String,
    #[serde(rename = "License Name")]
    pub license_name: String,
    #[serde(rename = "Total Units")]
    pub total_units: i64,
    #[serde(rename = "Consumed Units")]
    pub consumed_units: i64,
    #[serde(rename = "Status")]
    pub status: Utilization,
    #[serde(rename = "Overages")]
    pub overages: String,
}

impl CsvRecord for OverageRow {
    const HEADERS: &'static [&'static str] = &[
        "Org Name",
        "License Name",
        "Total Units",
        "Consumed Units",
        "Status",
        "Overages",
    ];
}

pub fn overage_rows(orgs: &[OrgLicenses]) -> Vec<OverageRow> {
    let mut rows = Vec::new();
    for org in orgs {
        let org_name = org
            .customer_name
            .clone()
            .unwrap_or_else(|| "Unknown Org".to_string());
        for license in &org.licenses {
            let overage = license.overage();
            rows.push(OverageRow {
                org_name: org_name.clone(),
                license_name: license.name.clone().unwrap_or_default(),
                total_units: license.total_units.unwrap_or(0),
                consumed_units: license.consumed_units.unwrap_or(0),
                status: license.utilization(),
                overages: if overage > 0 {
                    format!("+{overage}")
                } else {
                    overage.to_string()
                },
            });
        }
    }
    rows
}

#[derive(Debug, Error)]
pub enum PivotError {
    #[error("license csv is missing column `{0}`")]
    MissingColumn(&'static str),
}

const PIVOT_COLUMNS: [&str; 5] = [
    "customer_name",
    "org_id",
    "license_name",
    "total_units",
    "consumed_units",
];

/// Reshapes the flattened license export into one row per (customer, org)
/// with a `(total)` and `(consumed)` column per license name.
///
/// Values are copied as-is. License names are sorted; a repeated license for
/// the same org keeps the last value seen.
pub fn pivot_licenses(flat: &Table) -> Result<Table, PivotError> {
    let mut positions = [0usize; 5];
    for (slot, name) in positions.iter_mut().zip(PIVOT_COLUMNS) {
        *slot = flat.column(name).ok_or(PivotError::MissingColumn(name))?;
    }
    let [customer_col, org_col, name_col, total_col, consumed_col] = positions;

    let mut grouped: BTreeMap<(String, String), BTreeMap<String, (String, String)>> =
        BTreeMap::new();
    let mut license_names = BTreeSet::new();
    for row in &flat.rows {
        let cell = |idx: usize| row.get(idx).cloned().unwrap_or_default();
        let license = cell(name_col);
        license_names.insert(license.clone());
        grouped
            .entry((cell(customer_col), cell(org_col)))
            .or_default()
            .insert(license, (cell(total_col), cell(consumed_col)));
    }

    let mut headers = vec!["customer_name".to_string(), "org_id".to_string()];
    for license in &license_names {
        headers.push(format!("{license} (total)"));
        headers.push(format!("{license} (consumed)"));
    }

    let mut table = Table::new(headers);
    for ((customer, org), licenses) in grouped {
        let mut row = vec![customer, org];
        for license in &license_names {
            match licenses.get(license) {
                Some((total, consumed)) => {
                    row.push(total.clone());
                    row.push(consumed.clone());
                }
                None => {
                    row.push(String::new());
                    row.push(String::new());
                }
            }
        }
        table.rows.push(row);
    }
    Ok(table)
}
