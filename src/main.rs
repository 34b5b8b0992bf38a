//! Quantbot: autonomous equity paper-trading agent
//!
//! Scores market movers with a self-retraining predictor, trades a simulated
//! ledger under a trailing stop, and learns from every closed position.

mod agent;
mod backtest;
mod config;
mod db;
mod market;
mod metrics;
mod models;
mod predictor;
mod scheduler;
mod trading;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::agent::Agent;
use crate::backtest::{load_bars, Backtester};
use crate::config::AppConfig;
use crate::db::Database;
use crate::market::{FinnhubClient, MarketDataSource, StaticSource};
use crate::models::ExampleRecord;
use crate::scheduler::Scheduler;
use crate::trading::{BuyOutcome, Decision, SellOutcome};

/// Autonomous paper-trading agent CLI.
#[derive(Parser)]
#[command(name = "quantbot")]
#[command(about = "Paper-trade equities with a self-retraining predictor", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(
        short,
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./quantbot.db?mode=rwc"
    )]
    database: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// TOML config file (defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Finnhub API key
    #[arg(long, env = "FINNHUB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a cycle every interval until Ctrl+C
    Run {
        /// Replay a fixed batch file instead of live quotes
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Run one trading cycle now
    Cycle {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show ledger, positions and performance
    Status,

    /// Fetch and print the current market batch
    Scan {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print decisions for the current batch without trading
    Decide {
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Manually open a position
    Buy {
        symbol: String,

        /// Fill price per share
        price: Decimal,

        /// Percent change used for scoring
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        change: f64,

        /// Net sentiment in [-1, 1] used for scoring
        #[arg(long, allow_hyphen_values = true)]
        sentiment: Option<f64>,
    },

    /// Manually close a position
    Sell {
        symbol: String,

        /// Fill price per share
        price: Decimal,
    },

    /// Retrain the predictor on every stored example
    Retrain,

    /// Import training examples from a JSON file
    ImportExamples {
        /// Array of foundation records or normalized examples
        path: PathBuf,

        /// Retrain after importing
        #[arg(long)]
        retrain: bool,
    },

    /// Replay historical bars through an isolated ledger
    Backtest {
        /// JSON array of bars
        path: PathBuf,

        /// Override starting cash
        #[arg(long)]
        capital: Option<Decimal>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(cli.config.as_deref()).context("Invalid configuration")?;

    if let Commands::Config = cli.command {
        println!("\n=== Effective Configuration ===\n");
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    if let Commands::Backtest { path, capital } = &cli.command {
        let db = Arc::new(Database::new(&cli.database).await?);
        let agent = Agent::new(&config, db).await?;

        let mut backtest_config = config.clone();
        if let Some(capital) = capital {
            backtest_config.ledger.initial_cash = *capital;
        }

        let bars = load_bars(path)?;
        println!("\nReplaying {} bars from {}...", bars.len(), path.display());

        let backtester = Backtester::new(backtest_config, agent.predictor());
        let results = backtester.run(&bars).await;
        agent.shutdown().await?;

        let results = results?;
        println!("{}", results);
        if !results.open_positions.is_empty() {
            println!("\n--- Still Open ---");
            for p in &results.open_positions {
                println!("  {} {} @ {:.2} (now {:.2})", p.symbol, p.amount, p.entry_price, p.current_price);
            }
        }
        return Ok(());
    }

    let db = Arc::new(Database::new(&cli.database).await?);
    let agent = Agent::new(&config, db.clone()).await?;

    let outcome = dispatch(&cli, &config, &agent, &db).await;
    agent.shutdown().await?;
    outcome
}

async fn dispatch(cli: &Cli, config: &AppConfig, agent: &Agent, db: &Database) -> Result<()> {
    match &cli.command {
        Commands::Run { input } => {
            let source = market_source(input.as_deref(), cli.api_key.as_deref(), config)?;

            println!("\n=== Quantbot Paper Trading ===");
            println!("Interval:  {}s", config.scheduler.interval_secs);
            println!("Symbols:   {}", config.market.symbols.join(", "));
            println!("Predictor: {}", if agent.predictor().is_trained() { "trained" } else { "untrained (no buys)" });
            println!("\nPress Ctrl+C to stop.\n");

            Scheduler::new(&config.scheduler)
                .run(agent, source.as_ref())
                .await?;

            // Show final stats
            println!("{}", agent.status().await);
            println!("{}", agent.performance().await?);
        }

        Commands::Cycle { input } => {
            let source = market_source(input.as_deref(), cli.api_key.as_deref(), config)?;
            let report = agent.run_cycle(source.as_ref()).await?;
            println!("{}", report);
        }

        Commands::Status => {
            let last_run = db.get_last_run().await?;
            let examples = db.count_examples().await?;

            println!("\n=== Agent ===");
            println!(
                "Last Run:   {}",
                last_run.map_or_else(|| "Never".to_string(), |t| t.to_rfc3339())
            );
            println!("Predictor:  {}", if agent.predictor().is_trained() { "trained" } else { "untrained" });
            println!("Examples:   {}", examples);

            println!("{}", agent.status().await);
            println!("{}", agent.performance().await?);
        }

        Commands::Scan { input } => {
            let source = market_source(input.as_deref(), cli.api_key.as_deref(), config)?;
            let batch = source.fetch_batch(&agent.held_symbols().await).await?;

            match batch.market_context {
                Some(ctx) => println!("\nMarket: {:+.2}%", ctx.change_percent),
                None => println!("\nMarket: (no context)"),
            }
            println!("\n{:<8} {:>10} {:>9} {:>10}", "SYMBOL", "PRICE", "CHANGE", "SENTIMENT");
            println!("{}", "-".repeat(40));
            for o in &batch.observations {
                let sentiment = o
                    .sentiment
                    .map_or_else(|| "-".to_string(), |s| format!("{:+.2}", s));
                println!("{:<8} {:>10.2} {:>8.2}% {:>10}", o.symbol, o.price, o.change_percent, sentiment);
            }
        }

        Commands::Decide { input } => {
            let source = market_source(input.as_deref(), cli.api_key.as_deref(), config)?;
            let decisions = agent.decide(source.as_ref()).await?;
            print_decisions(&decisions);
        }

        Commands::Buy {
            symbol,
            price,
            change,
            sentiment,
        } => {
            let symbol = symbol.to_uppercase();
            match agent.buy(&symbol, *price, *change, *sentiment).await? {
                BuyOutcome::Filled(trade) => println!(
                    "Bought {} {} @ ${:.2} (confidence: {})",
                    trade.amount,
                    trade.symbol,
                    trade.price,
                    trade.confidence.map_or_else(|| "n/a".to_string(), |c| format!("{:.2}", c))
                ),
                BuyOutcome::AlreadyHolding => println!("Already holding {}", symbol),
                BuyOutcome::InsufficientFunds => {
                    println!("Not enough cash for one share of {} at ${:.2}", symbol, price)
                }
            }
        }

        Commands::Sell { symbol, price } => {
            let symbol = symbol.to_uppercase();
            match agent.sell(&symbol, *price).await? {
                SellOutcome::Closed { trade, example } => println!(
                    "Sold {} {} @ ${:.2}, P&L ${:.2} (label {})",
                    trade.amount,
                    trade.symbol,
                    trade.price,
                    trade.profit.unwrap_or_default(),
                    example.label
                ),
                SellOutcome::NoPosition => println!("No open position in {}", symbol),
            }
        }

        Commands::Retrain => {
            let summary = agent.retrain().await?;
            println!("Retrained: {}", summary);
        }

        Commands::ImportExamples { path, retrain } => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let records: Vec<ExampleRecord> =
                serde_json::from_str(&raw).context("Failed to parse example records")?;

            let (imported, rejected) = agent.import_examples(records).await?;
            println!("Imported {} examples ({} rejected)", imported, rejected);

            if *retrain {
                let summary = agent.retrain().await?;
                println!("Retrained: {}", summary);
            }
        }

        Commands::Backtest { .. } | Commands::Config => {}
    }

    Ok(())
}

/// Live Finnhub source, or a fixed batch file when `input` is given.
fn market_source(
    input: Option<&std::path::Path>,
    api_key: Option<&str>,
    config: &AppConfig,
) -> Result<Box<dyn MarketDataSource>> {
    if let Some(path) = input {
        info!(path = %path.display(), "Using static market batch");
        return Ok(Box::new(StaticSource::from_file(path)?));
    }

    let api_key = api_key
        .filter(|k| !k.is_empty())
        .context("FINNHUB_API_KEY is required for live market data (or pass --input)")?;
    Ok(Box::new(FinnhubClient::new(
        api_key.to_string(),
        config.market.clone(),
    )?))
}

fn print_decisions(decisions: &[Decision]) {
    println!("\n{:<8} {:<11} {:>10}  {}", "SYMBOL", "ACTION", "CONFIDENCE", "REASON");
    println!("{}", "-".repeat(60));
    for d in decisions {
        let confidence = d
            .confidence
            .map_or_else(|| "-".to_string(), |c| format!("{:.3}", c));
        println!("{:<8} {:<11} {:>10}  {}", d.symbol, d.action.as_str(), confidence, d.reason);
    }
}
