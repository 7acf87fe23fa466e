use chrono::{Datelike, NaiveDate};

use crate::error::ConfigError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive date range a wholesale billing report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ReportPeriod {
    /// The calendar month before the one `today` falls in.
    pub fn previous_month(today: NaiveDate) -> Self {
        let first_of_month = today.with_day(1).unwrap_or(today);
        let end = first_of_month.pred_opt().unwrap_or(first_of_month);
        let start = end.with_day(1).unwrap_or(end);
        Self { start, end }
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, ConfigError> {
        let parse = |key: &'static str, value: &str| {
            NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|err| {
                ConfigError::Invalid {
                    key,
                    reason: format!("{value:?}: {err}"),
                }
            })
        };
        let period = Self {
            start: parse("start", start)?,
            end: parse("end", end)?,
        };
        if period.start > period.end {
            return Err(ConfigError::Invalid {
                key: "end",
                reason: format!("{} is before {}", period.end, period.start),
            });
        }
        Ok(period)
    }

    pub fn start_date(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_date(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }

    pub fn matches(&self, start: Option<&str>, end: Option<&str>) -> bool {
        start == Some(self.start_date().as_str()) && end == Some(self.end_date().as_str())
    }

    /// Length of the month the period starts in; the divisor for billable units.
    pub fn days_in_month(&self) -> u32 {
        days_in_month(self.start)
    }

    /// `<Month>-<Year>-Wholesale-Usage_<ts>` stem, named after the starting month.
    pub fn file_stem(&self, timestamp: &str) -> String {
        format!(
            "{}-{}-Wholesale-Usage_{timestamp}",
            self.start.format("%B"),
            self.start.format("%Y")
        )
    }

    pub fn original_file_name(&self, timestamp: &str) -> String {
        format!("{}_ORIGINAL.csv", self.file_stem(timestamp))
    }

    pub fn transformed_file_name(&self, timestamp: &str) -> String {
        format!("{}.csv", self.file_stem(timestamp))
    }
}

pub fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}
