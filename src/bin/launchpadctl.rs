//! launchpadctl: operator CLI over the launchpad orchestrators.
//!
//! Read-mostly: RPC probing, presale and pool inspection, vesting timelines
//! and the backend sync outbox. Output is JSON on stdout; logs go to stderr.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ethers::types::Address;
use serde_json::{json, Value};
use tracing::{info, warn};

use launchpad_orchestrator::{
    config,
    liquidity::{math::convert_fee_tier, PoolKey, Token},
    metrics::PrometheusMetrics,
    model::Project,
    presale::{is_claim_available, is_refund_available, progress},
    telemetry::{self, LoggingConfig},
    units::format_units,
    vesting::schedule::{default_anchor, timeline, MonthIndex},
    LaunchpadContext,
};

#[derive(Debug, Parser)]
#[command(name = "launchpadctl", author, version, about = "Launchpad orchestration CLI")]
struct Cli {
    /// Config file (TOML/YAML/JSON); environment overrides apply on top.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log filter override, e.g. info,launchpad_orchestrator=debug
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// JSON logs instead of text.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print Prometheus counters to stderr on exit.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Select a read endpoint for a chain.
    Probe {
        #[arg(long)]
        chain: u64,
    },
    /// Presale snapshot, progress, claim/refund gates and per-user info.
    Presale {
        /// Project JSON as served by the backend.
        #[arg(long, value_name = "FILE")]
        project: PathBuf,
        /// Presale id within the project.
        #[arg(long)]
        id: String,
        #[arg(long)]
        user: Option<Address>,
    },
    /// Pool existence and current price.
    Pool {
        #[arg(long)]
        chain: u64,
        #[arg(long)]
        token_a: Address,
        #[arg(long, default_value_t = 18)]
        decimals_a: u8,
        #[arg(long)]
        token_b: Address,
        #[arg(long, default_value_t = 18)]
        decimals_b: u8,
        /// Fee percent: 0.05, 0.3 or 1.
        #[arg(long, default_value = "0.3")]
        fee: String,
    },
    /// Cumulative vesting unlocks per allocation.
    Schedule {
        #[arg(long, value_name = "FILE")]
        project: PathBuf,
        /// First month, YYYY-MM. Defaults to the earliest allocation start.
        #[arg(long)]
        anchor: Option<MonthIndex>,
        #[arg(long, default_value_t = 36)]
        months: usize,
    },
    /// Backend sync outbox.
    Outbox {
        #[command(subcommand)]
        action: OutboxAction,
    },
}

#[derive(Debug, Subcommand)]
enum OutboxAction {
    /// List pending and rejected entries.
    Pending,
    /// Retry every pending entry now.
    Flush,
    /// Drop rejected entries: one by key, or all with --all-rejected.
    Discard {
        #[arg(required_unless_present = "all_rejected", conflicts_with = "all_rejected")]
        key: Option<String>,
        #[arg(long)]
        all_rejected: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref()).context("load config")?;

    let mut logging = LoggingConfig::from(&cfg.telemetry);
    if let Some(filter) = &cli.log_filter {
        logging.env_filter = Some(filter.clone());
    }
    if cli.json_logs {
        logging.json = true;
        logging.ansi = false;
    }
    let _guard = telemetry::init(logging)?;

    let metrics = Arc::new(PrometheusMetrics::new().context("metrics registry")?);
    info!(environment = %cfg.app.environment, "launchpadctl starting");
    let ctx = LaunchpadContext::build(cfg, metrics.clone()).await?;

    let out = run(&ctx, cli.command).await;
    if cli.metrics {
        match metrics.gather() {
            Ok(text) => eprint!("{text}"),
            Err(e) => warn!(error = %e, "metrics gather failed"),
        }
    }
    println!("{}", serde_json::to_string_pretty(&out?)?);
    Ok(())
}

async fn run(ctx: &LaunchpadContext, command: Command) -> Result<Value> {
    match command {
        Command::Probe { chain } => {
            let selected = ctx.selector.read_provider(chain).await?;
            Ok(json!({ "chainId": selected.chain_id, "url": selected.url, "source": selected.source }))
        }
        Command::Presale { project, id, user } => {
            let project = read_project(&project).await?;
            let presale = project
                .presales
                .iter()
                .find(|p| p.id == id)
                .ok_or_else(|| anyhow!("presale {id} not found in project {}", project.id))?;
            let snapshot = ctx.presale.snapshot(&project, presale).await?;
            let contribution = match user.or_else(|| ctx.wallet.address()) {
                Some(user) => Some(ctx.presale.contribution_info(&project, presale, user).await?),
                None => None,
            };
            let decimals = presale.contribution_decimals(
                project.decimals,
                ctx.registry.get(project.chain_id)?.stablecoin.decimals,
            );
            Ok(json!({
                "snapshot": snapshot,
                "totalRaised": format_units(snapshot.total_raised, decimals),
                "hardCap": format_units(snapshot.hard_cap, decimals),
                "progress": progress(&snapshot, decimals),
                "claimAvailable": is_claim_available(&snapshot),
                "refundAvailable": is_refund_available(&snapshot, Utc::now().timestamp_millis()),
                "contribution": contribution,
            }))
        }
        Command::Pool { chain, token_a, decimals_a, token_b, decimals_b, fee } => {
            let key = PoolKey {
                chain_id: chain,
                token_a: Token::new(token_a, decimals_a),
                token_b: Token::new(token_b, decimals_b),
                fee: convert_fee_tier(&fee),
            };
            let state = ctx.liquidity.pool_state(&key).await?;
            Ok(json!({ "fee": key.fee.fee(), "exists": state.is_some(), "state": state }))
        }
        Command::Schedule { project, anchor, months } => {
            let project = read_project(&project).await?;
            let anchor = anchor
                .or_else(|| default_anchor(&project))
                .ok_or_else(|| anyhow!("project {} has no allocations", project.id))?;
            let timeline = timeline(&project, anchor, months)?;
            let series: Vec<Value> = timeline
                .series
                .iter()
                .map(|s| {
                    let cumulative: Vec<String> =
                        s.cumulative.iter().map(|v| format_units(*v, project.decimals)).collect();
                    json!({ "allocationId": s.allocation_id, "name": s.name, "cumulative": cumulative })
                })
                .collect();
            Ok(json!({
                "months": timeline.months,
                "fullyUnlockedAt": timeline.fully_unlocked_at(),
                "series": series,
            }))
        }
        Command::Outbox { action: OutboxAction::Pending } => {
            let pending = ctx.outbox.pending().await?;
            let rejected = ctx.outbox.rejected().await?;
            Ok(json!({ "pending": pending, "rejected": rejected }))
        }
        Command::Outbox { action: OutboxAction::Flush } => {
            let results = ctx.outbox.flush().await?;
            let results: Vec<Value> =
                results.into_iter().map(|(key, status)| json!({ "key": key, "result": status })).collect();
            Ok(Value::Array(results))
        }
        Command::Outbox { action: OutboxAction::Discard { key: Some(key), .. } } => {
            let discarded = ctx.outbox.discard(&key).await?;
            if !discarded {
                warn!(%key, "no rejected entry with this key");
            }
            Ok(json!({ "discarded": if discarded { vec![key] } else { vec![] } }))
        }
        Command::Outbox { action: OutboxAction::Discard { key: None, .. } } => {
            let keys = ctx.outbox.purge_rejected().await?;
            Ok(json!({ "discarded": keys }))
        }
    }
}

async fn read_project(path: &Path) -> Result<Project> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse project {}", path.display()))
}
