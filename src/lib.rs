pub mod auth;
pub mod billing;
pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod licenses;
pub mod organizations;
pub mod outcome;
pub mod output;
pub mod overages;
pub mod pagination;
pub mod pstn;
pub mod table;

pub use client::{ApiRequest, ApiResponse, PartnerClient};
pub use config::{ClientSettings, Credentials, RefreshCredentials, ReportSettings};
pub use error::{AuthError, ClientError, ConfigError, FailureKind, ReportError};
pub use outcome::{FailureRecord, RunReport, Stage};
