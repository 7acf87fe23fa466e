use chrono::{DateTime, Local};
use serde::Serialize;

/// Status column of a tracking entry: the HTTP code, or why there was none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CallStatus {
    Code(u16),
    NoResponse(&'static str),
}

impl CallStatus {
    pub const TIMEOUT: CallStatus = CallStatus::NoResponse("TIMEOUT");
    pub const ERROR: CallStatus = CallStatus::NoResponse("ERROR");
}

/// One HTTP call, kept for audit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEntry {
    pub org_id: Option<String>,
    pub call_type: String,
    pub method: String,
    pub url: String,
    pub status_code: CallStatus,
    pub tracking_id: String,
    pub response_text: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Default)]
pub struct TrackingLog {
    entries: Vec<TrackingEntry>,
}

impl TrackingLog {
    pub fn push(&mut self, entry: TrackingEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TrackingEntry] {
        &self.entries
    }

    pub fn take(&mut self) -> Vec<TrackingEntry> {
        std::mem::take(&mut self.entries)
    }
}
