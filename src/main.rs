use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use quorum_trader::agents::AgentRegistry;
use quorum_trader::collector::SignalCollector;
use quorum_trader::config::{AppConfig, LoggingConfig};
use quorum_trader::consensus::ConsensusEngine;
use quorum_trader::coordination::{CircuitBreaker, ShutdownHandle};
use quorum_trader::coordinator::{CoordinatorParts, TradingCoordinator};
use quorum_trader::domain::{MarketSnapshot, PortfolioState};
use quorum_trader::events::{build_sinks, EventDispatcher};
use quorum_trader::exchange::PaperExchange;
use quorum_trader::execution::{InMemoryOrderStore, JsonFileOrderStore, OrderExecutor, OrderStore};
use quorum_trader::market::{MarketDataSource, SyntheticFeed};
use quorum_trader::performance::PerformanceTracker;
use quorum_trader::risk::ExposureLedger;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quorum", version, about = "Multi-agent consensus trading core")]
struct Cli {
    /// Configuration directory (default.toml, <QUORUM_ENV>.toml)
    #[arg(long, global = true, env = "QUORUM_CONFIG_DIR", default_value = "config")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Paper trade with the built-in agents against a synthetic market
    Run {
        /// Force the paper exchange regardless of engine.dry_run
        #[arg(long)]
        dry_run: bool,
        /// Stop each symbol after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },
    /// Load and validate the configuration, then exit
    CheckConfig {
        /// Print the effective configuration as TOML
        #[arg(long)]
        print: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::CheckConfig { print } => {
            init_logging_simple();
            config.validate()?;
            if print {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            println!(
                "Configuration OK: {} symbols, {} agents, quorum {}",
                config.engine.symbols.len(),
                config.agents.len(),
                config.consensus.min_quorum
            );
        }
        Commands::Run { dry_run, ticks } => {
            init_logging(&config.logging);
            if dry_run {
                config.engine.dry_run = true;
            }
            if ticks.is_some() {
                config.engine.max_ticks = ticks;
            }
            config.validate()?;
            run(config).await?;
        }
    }

    Ok(())
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    if !config.engine.dry_run {
        bail!("no live exchange client is configured; set engine.dry_run = true");
    }

    info!(
        symbols = ?config.engine.symbols,
        capital = %config.engine.capital,
        agents = config.agents.len(),
        "Starting quorum trader (paper)"
    );

    // Events
    let sinks = build_sinks(&config.events).await?;
    let (events, events_task) = EventDispatcher::spawn(config.events.capacity, sinks);

    // Agent weights
    let (tracker, weights) = PerformanceTracker::new(config.performance.clone());
    let (outcomes_tx, outcomes_rx) = mpsc::channel(config.performance.channel_capacity);
    let tracker_task = tracker.with_events(events.clone()).spawn(outcomes_rx);

    // Risk and execution
    let ledger = Arc::new(ExposureLedger::new(
        PortfolioState::new(config.engine.capital),
        config.risk.clone(),
    ));
    let breaker =
        Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()).with_events(events.clone()));
    let exchange = Arc::new(PaperExchange::new().with_symbols(config.engine.symbols.clone()));
    let store: Arc<dyn OrderStore> = match &config.execution.order_store_path {
        Some(path) => Arc::new(JsonFileOrderStore::open(path).await?),
        None => Arc::new(InMemoryOrderStore::new()),
    };
    let executor = Arc::new(
        OrderExecutor::new(
            exchange.clone(),
            breaker,
            ledger.clone(),
            store,
            config.execution.clone(),
        )
        .with_events(events.clone()),
    );

    // Decision pipeline
    let registry = AgentRegistry::from_specs(&config.agents)?;
    let market = Arc::new(PaperMarks {
        feed: SyntheticFeed::new(config.market_data.synthetic.clone()),
        exchange,
    });
    let coordinator = Arc::new(
        TradingCoordinator::new(
            config.engine.clone(),
            CoordinatorParts {
                collector: SignalCollector::new(registry),
                consensus: ConsensusEngine::new(config.consensus.clone()),
                weights,
                ledger,
                executor,
                market,
                outcomes: outcomes_tx,
            },
        )
        .with_collector_config(&config.collector)
        .with_market_data_config(&config.market_data)
        .with_events(events.clone()),
    );

    let recovered = coordinator.recover().await?;
    if recovered > 0 {
        info!(orders = recovered, "Reconciled orders from previous run");
    }

    let (shutdown, shutdown_rx) = ShutdownHandle::new();
    let shutdown = Arc::new(shutdown);
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.listen_for_signals().await })
    };

    coordinator.clone().run(shutdown_rx).await?;
    signals.abort();

    let portfolio = coordinator.ledger().snapshot().await;
    info!(
        realized_pnl = %portfolio.realized_pnl,
        open_positions = portfolio.positions.len(),
        "Trading loops stopped"
    );

    // Closing the last senders lets the background tasks drain and exit
    drop(coordinator);
    drop(events);
    if let Err(e) = tracker_task.await {
        warn!(error = %e, "Performance tracker task failed");
    }
    if let Err(e) = events_task.await {
        warn!(error = %e, "Event dispatcher task failed");
    }

    Ok(())
}

/// Synthetic feed that also moves the paper exchange's marks
struct PaperMarks {
    feed: SyntheticFeed,
    exchange: Arc<PaperExchange>,
}

#[async_trait]
impl MarketDataSource for PaperMarks {
    fn name(&self) -> &str {
        self.feed.name()
    }

    async fn snapshot(&self, symbol: &str) -> quorum_trader::Result<MarketSnapshot> {
        let snapshot = self.feed.snapshot(symbol).await?;
        self.exchange.set_mark(symbol, snapshot.last_price());
        Ok(snapshot)
    }
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // QUORUM_LOG_DIR wins over logging.dir; no directory means console only
    let log_dir = std::env::var("QUORUM_LOG_DIR")
        .ok()
        .map(PathBuf::from)
        .or_else(|| config.dir.clone());

    // `rolling::daily` panics if it cannot create the first file, so check writability first
    let file_layer = log_dir.and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(&log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir.display(),
                e
            );
            return None;
        }
        let test_path = log_dir.join(".quorum_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&log_dir, "quorum.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Keep the guard alive for the life of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir.display(),
                    e
                );
                None
            }
        }
    });

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if !file_logging_enabled {
        info!("File logging disabled, using console only");
    }
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
