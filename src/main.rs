use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tourguide::config::Config;
use tourguide::logging;
use tourguide::readiness::{ReadinessPolicy, SettlementOutcome};
use tourguide::steps::{compile, parse_configuration};
use tourguide::{PageSnapshot, TourState, TourWidget};

#[derive(Parser)]
#[command(name = "tourguide")]
#[command(about = "Resolve guided-tour steps against a page")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a step configuration into ordered lookup specs
    Compile {
        /// Step configuration (JSON list)
        steps: PathBuf,
    },

    /// Resolve steps against a page snapshot and print the tour state
    Resolve {
        /// Step configuration (JSON list)
        steps: PathBuf,

        /// Page snapshot (JSON)
        #[arg(short, long)]
        page: PathBuf,

        /// Override readiness.max_attempts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Override readiness.delay_ms
        #[arg(long)]
        delay_ms: Option<u64>,
    },

    /// Resolve steps, then print the stops handed to the presentation layer
    Open {
        /// Step configuration (JSON list)
        steps: PathBuf,

        /// Page snapshot (JSON)
        #[arg(short, long)]
        page: PathBuf,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveReport {
    attempts: Option<u32>,
    outcome: Option<SettlementOutcome>,
    state: TourState,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;

    let _logging_handle = logging::init_logging(&config, cli.debug)?;

    match cli.command {
        Commands::Compile { steps } => cmd_compile(&steps)?,
        Commands::Resolve {
            steps,
            page,
            max_attempts,
            delay_ms,
        } => {
            let policy = override_policy(&config, max_attempts, delay_ms);
            cmd_resolve(&steps, &page, policy).await?;
        }
        Commands::Open { steps, page } => {
            cmd_open(&steps, &page, config.readiness_policy()).await?;
        }
    }

    Ok(())
}

fn override_policy(
    config: &Config,
    max_attempts: Option<u32>,
    delay_ms: Option<u64>,
) -> ReadinessPolicy {
    let base = config.readiness_policy();
    ReadinessPolicy::new(
        max_attempts.unwrap_or(base.max_attempts),
        delay_ms.map(Duration::from_millis).unwrap_or(base.delay),
    )
}

fn read_configuration(path: &Path) -> Result<Value> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read step configuration {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse step configuration {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn cmd_compile(steps: &Path) -> Result<()> {
    let configuration = read_configuration(steps)?;
    let entries = match parse_configuration(&configuration) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "Nothing to compile");
            Vec::new()
        }
    };
    print_json(&compile(&entries))
}

async fn resolve_widget(
    steps: &Path,
    page: &Path,
    policy: ReadinessPolicy,
) -> Result<(TourWidget, ResolveReport)> {
    let configuration = read_configuration(steps)?;
    let page = PageSnapshot::load(page)?;
    let widget = TourWidget::new(Arc::new(page), policy);

    let settlement = widget.configure(&configuration).await?;
    let report = ResolveReport {
        attempts: settlement.as_ref().map(|s| s.attempts),
        outcome: settlement.as_ref().map(|s| s.outcome),
        state: widget.state(),
    };
    Ok((widget, report))
}

async fn cmd_resolve(steps: &Path, page: &Path, policy: ReadinessPolicy) -> Result<()> {
    let (_widget, report) = resolve_widget(steps, page, policy).await?;
    print_json(&report)
}

async fn cmd_open(steps: &Path, page: &Path, policy: ReadinessPolicy) -> Result<()> {
    let (widget, report) = resolve_widget(steps, page, policy).await?;
    if report.state.tour_disabled {
        tracing::warn!("Tour is disabled: no step targets were found");
    }
    print_json(&widget.open_tour())
}
