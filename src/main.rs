//! `partner-ops`: batch jobs against the Webex partner API.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use webex_partner_ops::billing::ReportPeriod;
use webex_partner_ops::config::{self, ClientSettings, Credentials, RefreshCredentials, ReportSettings};
use webex_partner_ops::error::ConfigError;
use webex_partner_ops::jobs;
use webex_partner_ops::licenses::LicenseJobOptions;
use webex_partner_ops::output::OutputDir;
use webex_partner_ops::PartnerClient;

const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "partner-ops", about = "Webex partner API batch jobs", version)]
struct Cli {
    /// Directory the run's artifacts are written to.
    #[arg(long, global = true, default_value = "output")]
    output_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

/// Where the organizations to process come from.
#[derive(Args, Debug)]
struct OrgArgs {
    /// Org id; repeatable.
    #[arg(long = "org")]
    orgs: Vec<String>,
    /// Text file with one org id per line.
    #[arg(long)]
    orgs_file: Option<PathBuf>,
    /// Cleaned overages CSV (customer name, org id).
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct LicenseArgs {
    #[arg(long, default_value_t = 100)]
    page_size: u32,
    /// Pause between organizations, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    org_delay_ms: u64,
}

impl LicenseArgs {
    fn options(&self) -> LicenseJobOptions {
        LicenseJobOptions {
            page_size: self.page_size,
            org_delay: Duration::from_millis(self.org_delay_ms),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Realign a raw overages export into a (name, org id) CSV.
    CleanOverages {
        #[arg(long)]
        input: PathBuf,
    },
    /// Activate orgs and export their licenses.
    Licenses {
        #[command(flatten)]
        orgs: OrgArgs,
        #[command(flatten)]
        license: LicenseArgs,
    },
    /// Clean a raw overages export, then report license usage per org.
    Overages {
        #[arg(long)]
        input: PathBuf,
        #[command(flatten)]
        license: LicenseArgs,
    },
    /// Pivot a flattened license CSV into one row per org.
    LicensePivot {
        #[arg(long)]
        input: PathBuf,
    },
    /// Record the PSTN connection of every location.
    PstnAudit {
        #[command(flatten)]
        orgs: OrgArgs,
    },
    /// List PSTN options per location and keep the ones matching a keyword.
    PstnDiscover {
        #[command(flatten)]
        orgs: OrgArgs,
        /// Provider keyword; defaults to PSTN_PROVIDER_KEYWORD.
        #[arg(long)]
        keyword: Option<String>,
        /// Walk every managed org instead of an explicit list.
        #[arg(long)]
        all_orgs: bool,
    },
    /// Assign the first accepted PSTN provider to every location.
    PstnFlip {
        #[command(flatten)]
        orgs: OrgArgs,
        /// Candidate provider id, tried in the given order; repeatable.
        #[arg(long = "provider", required = true)]
        providers: Vec<String>,
    },
    /// Ensure, download and transform a wholesale billing report.
    BillingReport {
        /// First day of the period (YYYY-MM-DD); defaults to last month.
        #[arg(long, requires = "end")]
        start: Option<String>,
        /// Last day of the period (YYYY-MM-DD).
        #[arg(long, requires = "start")]
        end: Option<String>,
    },
    /// Refresh every entry of a token store file.
    RefreshTokens {
        #[arg(long, default_value = "tokens_master.json")]
        store: PathBuf,
    },
    /// Run only the billing CSV transformation on a local file.
    TransformBilling {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Days in the billing month; defaults to last month's length.
        #[arg(long)]
        days: Option<u32>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

fn partner_client() -> Result<PartnerClient> {
    let creds = Credentials::from_env()?;
    PartnerClient::new(ClientSettings::from_env(), creds.access_token)
}

fn org_ids(args: &OrgArgs) -> Result<Vec<String>> {
    let targets = jobs::resolve_targets(&args.orgs, args.orgs_file.as_deref(), args.csv.as_deref())?;
    Ok(jobs::org_ids(&targets))
}

async fn run(cli: Cli) -> Result<()> {
    let out = OutputDir::create(&cli.output_dir)?;
    info!(output_dir = %out.root().display(), "starting run");

    match cli.command {
        Command::CleanOverages { input } => {
            jobs::clean_overages(&input, &out)?;
        }
        Command::Licenses { orgs, license } => {
            let targets =
                jobs::resolve_targets(&orgs.orgs, orgs.orgs_file.as_deref(), orgs.csv.as_deref())?;
            let client = partner_client()?;
            let run = jobs::licenses(&client, &targets, &license.options(), &out).await?;
            jobs::summarize(&run.report.failures);
        }
        Command::Overages { input, license } => {
            let client = partner_client()?;
            let run = jobs::overages(&client, &input, &license.options(), &out).await?;
            jobs::summarize(&run.report.failures);
        }
        Command::LicensePivot { input } => {
            jobs::license_pivot(&input, &out)?;
        }
        Command::PstnAudit { orgs } => {
            let org_ids = org_ids(&orgs)?;
            let client = partner_client()?;
            let run = jobs::pstn_audit(&client, &org_ids, &out).await?;
            jobs::summarize(&run.report.failures);
        }
        Command::PstnDiscover {
            orgs,
            keyword,
            all_orgs,
        } => {
            let org_ids = if all_orgs { Vec::new() } else { org_ids(&orgs)? };
            let keyword = keyword.unwrap_or_else(|| config::PROVIDER_KEYWORD.clone());
            let client = partner_client()?;
            let run = jobs::pstn_discover(&client, org_ids, &keyword, &out).await?;
            jobs::summarize(&run.report.failures);
        }
        Command::PstnFlip { orgs, providers } => {
            let org_ids = org_ids(&orgs)?;
            let client = partner_client()?;
            let run = jobs::pstn_flip(&client, &org_ids, &providers, &out).await?;
            jobs::summarize(&run.report.failures);
        }
        Command::BillingReport { start, end } => {
            let creds = RefreshCredentials::from_env()?;
            let period = match (start, end) {
                (Some(start), Some(end)) => ReportPeriod::parse(&start, &end)?,
                _ => ReportPeriod::previous_month(Local::now().date_naive()),
            };
            let output = jobs::billing_report(
                ClientSettings::from_env(),
                ReportSettings::from_env(),
                &creds,
                &period,
                &out,
            )
            .await?;
            info!(
                report_id = %output.report_id,
                original = %output.original.display(),
                transformed = %output.transformed.display(),
                "billing report ready"
            );
        }
        Command::RefreshTokens { store } => {
            let settings = ClientSettings::from_env();
            let token_url = settings.endpoint(webex_partner_ops::auth::TOKEN_PATH);
            jobs::refresh_tokens(&store, &token_url, settings.request_timeout, &out).await?;
        }
        Command::TransformBilling {
            input,
            output,
            days,
        } => {
            let days = days.unwrap_or_else(|| {
                ReportPeriod::previous_month(Local::now().date_naive()).days_in_month()
            });
            let output = output.unwrap_or_else(|| out.stamped("billing_transformed", "csv"));
            let rows = jobs::transform_billing(&input, &output, days)
                .with_context(|| format!("transform of {} failed", input.display()))?;
            info!(path = %output.display(), rows, days, "wrote transformed billing csv");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    tokio::select! {
        result = run(cli) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                if let Some(config_err) = err.downcast_ref::<ConfigError>() {
                    error!(error = %config_err, "configuration error");
                } else {
                    error!(error = ?err, "run failed");
                }
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            ExitCode::from(INTERRUPTED)
        }
    }
}
