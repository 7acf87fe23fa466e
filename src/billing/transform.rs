use std::path::Path;

use crate::table::Table;

pub const BILLABLE_UNITS: &str = "BILLABLE_UNITS";
/// Leading columns of the raw report that are not carried over.
pub const DROPPED_COLUMNS: usize = 4;
/// Position of the usage column once the leading columns are gone.
pub const USAGE_COLUMN: usize = 6;

/// `ceil(usage / days)` as an integer string, or empty when the usage is not a
/// finite number.
pub fn billable_units(usage: &str, days: u32) -> String {
    usage
        .trim()
        .parse::<f64>()
        .ok()
        .map(|usage| (usage / f64::from(days)).ceil())
        .filter(|units| units.is_finite())
        .map(|units| (units as i64).to_string())
        .unwrap_or_default()
}

/// Drops the leading columns and appends [`BILLABLE_UNITS`]. Every other cell
/// passes through untouched.
pub fn transform_billing(table: &Table, days: u32) -> Table {
    if table.width() <= DROPPED_COLUMNS {
        return Table::new(vec![BILLABLE_UNITS.to_string()]);
    }

    let kept_width = table.width() - DROPPED_COLUMNS;
    let mut headers = table.headers[DROPPED_COLUMNS..].to_vec();
    headers.push(BILLABLE_UNITS.to_string());

    let rows = table
        .rows
        .iter()
        .map(|row| {
            let mut kept: Vec<String> = row.iter().skip(DROPPED_COLUMNS).cloned().collect();
            kept.resize(kept_width, String::new());
            let units = if kept_width > USAGE_COLUMN {
                billable_units(&kept[USAGE_COLUMN], days)
            } else {
                String::new()
            };
            kept.push(units);
            kept
        })
        .collect();

    Table { headers, rows }
}

pub fn transform_billing_file(input: &Path, output: &Path, days: u32) -> Result<usize, csv::Error> {
    let table = Table::read_csv_path(input)?;
    let transformed = transform_billing(&table, days);
    transformed.write_csv_path(output)?;
    Ok(transformed.rows.len())
}
