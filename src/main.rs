use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Args, Parser, Subcommand};
use network_flows::config::Config;
use network_flows::domain::Network;
use network_flows::flows::{schedule, Backfill, FlowValidator, IntervalRunner};
use network_flows::repo::pg::PgRepo;
use network_flows::solver::{ProportionalSharingSolver, SolverAdapter};
use network_flows::telemetry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Interconnector energy and emissions flows per network region
#[derive(Parser, Debug)]
#[command(name = "network-flows")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one interval, or a closed range of intervals
    Interval(IntervalArgs),

    /// Recompute a historical range backward in blocks
    Backfill(BackfillArgs),

    /// Re-run the last N completed intervals with validation off
    LastIntervals {
        /// Number of intervals
        count: usize,
    },

    /// Re-run the last N local days
    LastDays {
        /// Number of days
        days: u32,
        /// Day to walk back from (RFC 3339), defaults to today
        #[arg(long)]
        start_date: Option<DateTime<FixedOffset>>,
    },

    /// Backfill the network's entire history
    All(ValidateArg),
}

#[derive(Args, Debug)]
struct IntervalArgs {
    /// First interval (RFC 3339)
    start: DateTime<FixedOffset>,
    /// Last interval (RFC 3339), defaults to `start`
    end: Option<DateTime<FixedOffset>>,
    #[command(flatten)]
    validation: ValidateArg,
}

#[derive(Args, Debug)]
struct BackfillArgs {
    /// Later bound to walk back from (RFC 3339)
    from: DateTime<FixedOffset>,
    /// Earlier bound (RFC 3339)
    to: DateTime<FixedOffset>,
    /// Block size in days, overrides the configured value
    #[arg(long)]
    block_days: Option<u32>,
    #[command(flatten)]
    validation: ValidateArg,
}

#[derive(Args, Debug)]
struct ValidateArg {
    /// Persist records even if they fail validation
    #[arg(long)]
    no_validate: bool,
}

impl ValidateArg {
    fn enforce(&self, cfg: &Config) -> bool {
        cfg.flows.validate && !self.no_validate
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let cfg = Config::load()?;
    let network = cfg.network.to_network()?;

    let repo = PgRepo::connect(&cfg.db).await?;
    let runner = IntervalRunner::new(
        network.clone(),
        Arc::new(repo.telemetry()),
        SolverAdapter::new(Arc::new(ProportionalSharingSolver))
            .with_tolerance(cfg.flows.solver_tolerance),
        FlowValidator::from_config(&cfg.flows),
        Arc::new(repo.flow_records()),
    );

    info!(network = %network, command = ?cli.command, "starting network flows");

    let outcome = run(cli.command, &cfg, &runner, &network).await;
    repo.close().await;
    outcome
}

async fn run(
    command: Command,
    cfg: &Config,
    runner: &IntervalRunner,
    network: &Network,
) -> Result<()> {
    match command {
        Command::Interval(args) => {
            let written = runner
                .run_interval(args.start, args.end, args.validation.enforce(cfg))
                .await?;
            info!(records = written, "interval run finished");
        }
        Command::Backfill(args) => {
            let backfill = backfill_for(cfg, args.block_days, args.validation.enforce(cfg));
            let summary = backfill.run(runner, args.from, args.to).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::LastIntervals { count } => {
            let written =
                schedule::run_flows_for_last_intervals(runner, network, count, Utc::now()).await?;
            info!(records = written, "last intervals run finished");
        }
        Command::LastDays { days, start_date } => {
            let written =
                schedule::run_flows_for_last_days(runner, network, days, start_date, Utc::now())
                    .await?;
            info!(records = written, "last days run finished");
        }
        Command::All(validation) => {
            let backfill = backfill_for(cfg, None, validation.enforce(cfg));
            let summary =
                schedule::run_flow_updates_all_for_network(runner, network, &backfill, Utc::now())
                    .await
                    .context("full network backfill")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

/// Backfill that stops between blocks once a shutdown signal arrives
fn backfill_for(cfg: &Config, block_days: Option<u32>, validate: bool) -> Backfill {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        telemetry::shutdown_signal().await;
        warn!("finishing current block before stopping");
        trigger.cancel();
    });

    let backfill = Backfill::new(block_days.unwrap_or(cfg.flows.backfill_block_days))
        .with_cancellation(token);
    if validate {
        backfill
    } else {
        backfill.without_validation()
    }
}
