use serde::Serialize;
use serde_json::Value;

use crate::error::{ClientError, FailureKind};

/// Step of a per-organization job that a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Organizations,
    Activate,
    FetchLicenses,
    Locations,
    PstnConnection,
    ConnectionOptions,
    AssignPstn,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Organizations => "organizations",
            Stage::Activate => "activate",
            Stage::FetchLicenses => "fetch_licenses",
            Stage::Locations => "locations",
            Stage::PstnConnection => "pstn_connection",
            Stage::ConnectionOptions => "connection_options",
            Stage::AssignPstn => "assign_pstn",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub org_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_id: Option<String>,
    pub stage: Stage,
    pub kind: FailureKind,
    pub status_code: Option<u16>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl FailureRecord {
    pub fn new(org_id: &str, stage: Stage, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            org_id: org_id.to_string(),
            org_name: None,
            location_id: None,
            stage,
            kind,
            status_code: None,
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn from_client_error(org_id: &str, stage: Stage, error: &ClientError) -> Self {
        let detail = error.body().map(|body| {
            serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(body.to_string()))
        });
        Self {
            status_code: error.status_code(),
            detail,
            ..Self::new(org_id, stage, error.kind(), error.to_string())
        }
    }

    #[must_use]
    pub fn with_org_name(mut self, name: Option<&str>) -> Self {
        self.org_name = name.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn with_location(mut self, location_id: &str) -> Self {
        self.location_id = Some(location_id.to_string());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: Option<u16>) -> Self {
        self.status_code = status;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Successes and failures accumulated by one job run.
#[derive(Debug, Serialize)]
pub struct RunReport<S> {
    pub successes: Vec<S>,
    pub failures: Vec<FailureRecord>,
}

impl<S> Default for RunReport<S> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<S> RunReport<S> {
    pub fn succeed(&mut self, success: S) {
        self.successes.push(success);
    }

    pub fn fail(&mut self, failure: FailureRecord) {
        tracing::warn!(
            org_id = %failure.org_id,
            stage = failure.stage.as_str(),
            status = ?failure.status_code,
            reason = %failure.reason,
            "recorded failure"
        );
        self.failures.push(failure);
    }

    pub fn failures_for(&self, org_id: &str) -> impl Iterator<Item = &FailureRecord> {
        let org_id = org_id.to_string();
        self.failures
            .iter()
            .filter(move |failure| failure.org_id == org_id)
    }

    pub fn failed_org_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for failure in &self.failures {
            if !ids.contains(&failure.org_id) {
                ids.push(failure.org_id.clone());
            }
        }
        ids
    }
}
