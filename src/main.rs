use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::Parser;
use tracing::{info, warn};

use rangebreak::config::RobotConfig;
use rangebreak::events::EventLog;
use rangebreak::execution::SimAdapter;
use rangebreak::feed::{self, CsvBarSource};
use rangebreak::journal::{self, Journal};
use rangebreak::registry::InstanceRegistry;
use rangebreak::robot::{ExecutionPlan, RobotEngine};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Robot configuration file (JSON); built-in defaults when omitted
    #[arg(short, long, env = "RANGEBREAK_CONFIG")]
    config: Option<PathBuf>,

    /// Execution plan for the trading date (JSON)
    #[arg(short, long, env = "RANGEBREAK_PLAN")]
    plan: PathBuf,

    /// Bar CSV driving the replay and hydration
    #[arg(short, long)]
    bars: PathBuf,

    /// Trading date the plan must cover (defaults to today UTC)
    #[arg(short, long)]
    date: Option<NaiveDate>,

    /// Intent journal path (appended, replayed on restart)
    #[arg(short, long, default_value = "journal.jsonl")]
    journal: PathBuf,

    /// Event log path; tracing-only when omitted
    #[arg(short, long)]
    event_log: Option<PathBuf>,

    /// Simulated venue stop visibility delay in milliseconds
    #[arg(long, default_value = "250")]
    stop_visibility_ms: u64,

    /// Wall-clock pacing factor for paper runs: 1.0 replays bars at
    /// real speed, 10.0 at 10x, 0 as fast as possible
    #[arg(long, default_value = "0")]
    pace: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rangebreak=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => RobotConfig::load(path)?,
        None => {
            info!("no config file given, using built-in defaults");
            RobotConfig::default()
        }
    };

    let trading_date = args.date.unwrap_or_else(|| Utc::now().date_naive());
    let plan = ExecutionPlan::load(&args.plan, trading_date, &config)?;
    info!(
        "plan for {}: {} stream(s) enabled",
        plan.trading_date,
        plan.enabled_streams().count()
    );

    // Replay the journal before reopening it for append
    let recovered = if args.journal.exists() {
        journal::replay(&args.journal)?
    } else {
        Vec::new()
    };
    if !recovered.is_empty() {
        info!("replayed {} journal entries", recovered.len());
    }

    let event_log = match &args.event_log {
        Some(path) => EventLog::open(path)?,
        None => EventLog::tracing_only(),
    };

    let sim = SimAdapter::new(std::time::Duration::from_millis(args.stop_visibility_ms));
    let handle = sim.handle();

    let mut engine = RobotEngine::new(
        config.clone(),
        &plan,
        sim,
        Arc::new(CsvBarSource::from_path(&args.bars)?),
        Journal::open(&args.journal)?,
        event_log,
        &InstanceRegistry::new(),
    )?;

    let bars = feed::load_bars(&args.bars)?;
    if bars.is_empty() {
        bail!("bar file {:?} holds no bars", args.bars);
    }
    let bar_width = Duration::seconds(config.bar_width_secs);

    // The replay clock: each bar is observed at its close
    let start = bars[0].bar.timestamp_open_utc;
    engine.start(start).await?;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    engine.pump(start).await;
    engine.apply_recovered(&recovered, start).await;

    for feed_bar in &bars {
        if args.pace > 0.0 {
            let secs = config.bar_width_secs as f64 / args.pace;
            tokio::time::sleep(std::time::Duration::from_secs_f64(secs)).await;
        }
        let now = feed_bar.bar.timestamp_open_utc + bar_width;
        engine.on_bar(&feed_bar.symbol, &feed_bar.bar, now).await;
        // Synthesize a tick path through the bar for breach detection
        // and break-even tracking
        let bar = feed_bar.bar;
        for price in [bar.open, bar.high, bar.low, bar.close] {
            handle.on_price(price);
            engine.on_tick(&feed_bar.symbol, price, now).await;
            engine.pump(now).await;
        }
        // Late hydration requests settle between bars
        tokio::task::yield_now().await;
        engine.pump(now).await;
    }

    let end = bars
        .last()
        .map(|fb| fb.bar.timestamp_open_utc + bar_width)
        .context("no bars")?;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    engine.pump(end).await;

    if !engine.all_terminal() {
        warn!("replay ended with non-terminal streams");
    }
    engine.shutdown(end).await;

    let entries = journal::replay(&args.journal)?;
    let open = journal::open_intents(&entries);
    info!(
        "replay done: {} journal entries, {} intent(s) still open",
        entries.len(),
        open.len()
    );
    Ok(())
}
