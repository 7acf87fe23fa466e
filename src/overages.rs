//! Cleanup of the partner "overages" export.
//!
//! The export writes the customer name unquoted, so a name containing commas
//! spills into extra columns. The known good shape is six columns with the
//! customer name first and the org id second; five columns always follow the
//! org id. [`realign_row`] undoes the spill for that shape only. Rows of any
//! other layout come out with a wrong name/id split, silently.

use std::collections::HashSet;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::organizations::OrgTarget;

/// Column count of a well-formed export row.
pub const EXPORT_WIDTH: usize = 6;
/// Columns that always follow the org id in a well-formed row.
pub const FIELDS_AFTER_ORG_ID: usize = EXPORT_WIDTH - 1;

/// Realigns one export row.
///
/// - wider than [`EXPORT_WIDTH`]: everything before the last five fields is
///   the name (joined with single spaces) and the field at `len - 5` is the
///   org id; the result has two fields.
/// - narrower: right-padded with empty strings to [`EXPORT_WIDTH`].
/// - exactly [`EXPORT_WIDTH`]: unchanged.
pub fn realign_row(row: &[String]) -> Vec<String> {
    let len = row.len();
    if len > EXPORT_WIDTH {
        let org_idx = len - FIELDS_AFTER_ORG_ID;
        vec![row[..org_idx].join(" "), row[org_idx].clone()]
    } else {
        let mut fixed = row.to_vec();
        fixed.resize(EXPORT_WIDTH, String::new());
        fixed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerOrg {
    #[serde(rename = "Customer Name")]
    pub customer_name: String,
    #[serde(rename = "Customer Org ID")]
    pub org_id: String,
}

/// Realigns raw rows and keeps unique (name, org id) pairs in first-seen order.
/// Rows with fewer than two fields carry nothing useful and are dropped.
pub fn realign_rows<I>(rows: I) -> Vec<CustomerOrg>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut seen = HashSet::new();
    let mut cleaned = Vec::new();
    for row in rows {
        if row.len() < 2 {
            continue;
        }
        let mut fixed = realign_row(&row).into_iter();
        let entry = CustomerOrg {
            customer_name: fixed.next().unwrap_or_default(),
            org_id: fixed.next().unwrap_or_default(),
        };
        if seen.insert(entry.clone()) {
            cleaned.push(entry);
        }
    }
    cleaned
}

/// Reads a raw export (header row first) and realigns every data row.
pub fn read_raw_export<R: Read>(reader: R) -> Result<Vec<CustomerOrg>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| field.trim_start().to_string())
                .collect::<Vec<_>>(),
        );
    }
    Ok(realign_rows(rows))
}

pub fn write_cleaned<W: Write>(writer: W, rows: &[CustomerOrg]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    if rows.is_empty() {
        writer.write_record(["Customer Name", "Customer Org ID"])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a cleaned file; only the first two columns are used, whatever their names.
pub fn read_cleaned<R: Read>(reader: R) -> Result<Vec<CustomerOrg>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let mut rows = Vec::new();
    let mut seen = HashSet::new();
    for record in reader.records() {
        let record = record?;
        let entry = CustomerOrg {
            customer_name: record.get(0).unwrap_or_default().to_string(),
            org_id: record.get(1).unwrap_or_default().trim().to_string(),
        };
        if seen.insert(entry.clone()) {
            rows.push(entry);
        }
    }
    Ok(rows)
}

pub fn to_targets(rows: &[CustomerOrg]) -> Vec<OrgTarget> {
    rows.iter()
        .filter(|row| {
            let keep = !row.org_id.trim().is_empty();
            if !keep {
                warn!(customer = %row.customer_name, "skipping row without an org id");
            }
            keep
        })
        .map(|row| OrgTarget::named(row.org_id.trim(), row.customer_name.clone()))
        .collect()
}
