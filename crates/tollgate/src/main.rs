// SPDX-FileCopyrightText: 2026 Tollgate Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tollgate - LLM cost aggregation and budget engine.
//!
//! This is the binary entry point for the `tollgate` CLI. Every command
//! prints JSON on stdout; logs go to stderr.

mod commands;
mod ingest;
mod shutdown;

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};

use tollgate_core::{AlertSeverity, BudgetScope, BudgetSpec, PeriodKind};

/// Tollgate - LLM cost aggregation and budget engine.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about, long_about = None)]
struct Cli {
    /// Load this file instead of the standard config locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Price a hypothetical call.
    Estimate {
        #[arg(long)]
        model: String,
        #[arg(long)]
        prompt: u64,
        #[arg(long)]
        completion: u64,
        #[arg(long, default_value_t = 0)]
        cached: u64,
    },
    /// Price the same call on every configured model.
    Compare {
        #[arg(long)]
        prompt: u64,
        #[arg(long)]
        completion: u64,
    },
    /// Project monthly spend from a daily request volume.
    Project {
        #[arg(long)]
        model: String,
        #[arg(long)]
        daily_requests: u64,
        #[arg(long)]
        avg_prompt: u64,
        #[arg(long)]
        avg_completion: u64,
    },
    /// Record JSON-lines usage events (stdin unless --input is given).
    Ingest {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Aggregate metrics over recorded history.
    Metrics {
        #[arg(long, value_parser = parse_instant)]
        start: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_instant)]
        end: Option<DateTime<Utc>>,
        #[arg(long)]
        user: Option<String>,
        /// Print Prometheus text exposition instead of JSON.
        #[arg(long)]
        prometheus: bool,
    },
    /// Manage budgets.
    Budgets {
        #[command(subcommand)]
        command: BudgetCommand,
    },
    /// List budget alerts.
    Alerts {
        #[arg(long)]
        acknowledged: Option<bool>,
        #[arg(long)]
        severity: Option<AlertSeverity>,
    },
    /// Acknowledge an alert by id.
    Ack { id: String },
    /// Cost by model, operation and user over a time range.
    Breakdown {
        #[arg(long, value_parser = parse_instant)]
        start: DateTime<Utc>,
        #[arg(long, value_parser = parse_instant)]
        end: DateTime<Utc>,
    },
    /// Trend and forecast over the most recent periods.
    Trend {
        #[arg(long)]
        period: Option<PeriodKind>,
        #[arg(long)]
        periods: Option<u32>,
    },
    /// Breakdown, trend, projection and anomalies in one document.
    Report {
        #[arg(long, value_parser = parse_instant)]
        start: DateTime<Utc>,
        #[arg(long, value_parser = parse_instant)]
        end: DateTime<Utc>,
    },
}

#[derive(Subcommand, Debug)]
enum BudgetCommand {
    /// List every budget.
    List,
    /// Show spend against the limit for one budget.
    Status { name: String },
    /// Create a budget.
    Create(CreateBudgetArgs),
    /// Delete a budget.
    Delete { name: String },
}

#[derive(Args, Debug)]
struct CreateBudgetArgs {
    name: String,
    #[arg(long)]
    limit: f64,
    #[arg(long, default_value = "monthly")]
    period: PeriodKind,
    /// Alert thresholds in percent, comma separated. Defaults to 75,90,100.
    #[arg(long, value_delimiter = ',')]
    thresholds: Vec<f64>,
    #[arg(long)]
    user: Option<String>,
    #[arg(long)]
    feature: Option<String>,
    /// Refuse further spend once the limit is reached.
    #[arg(long)]
    hard_limit: bool,
}

impl CreateBudgetArgs {
    fn into_spec(self) -> BudgetSpec {
        let thresholds = if self.thresholds.is_empty() {
            tollgate_config::model::default_thresholds()
        } else {
            self.thresholds
        };
        BudgetSpec {
            name: self.name,
            limit: self.limit,
            period: self.period,
            thresholds,
            scope: BudgetScope {
                user_id: self.user,
                feature: self.feature,
            },
            hard_limit: self.hard_limit,
        }
    }
}

/// Accept RFC 3339 instants or bare `YYYY-MM-DD` dates (midnight UTC).
fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
        .ok_or_else(|| format!("`{raw}` is neither an RFC 3339 timestamp nor a YYYY-MM-DD date"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => tollgate_config::load_and_validate_path(path),
        None => tollgate_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            tollgate_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log.level, config.log.json);

    match commands::run(cli.command, &config).await {
        Ok(output) => println!("{output}"),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides `level`.
fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tollgate={level},warn")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
