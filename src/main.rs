mod cli;

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use cli::{CheckArgs, Cli, Commands, InitArgs, RunArgs, WatchArgs};
use pricebox::config::Config;
use pricebox::coordinator::{ChainRequest, DownloadCoordinator, TracingSink};
use pricebox::downloader::DownloaderFactory;
use pricebox::humanize::HumanDuration;
use pricebox::observability::Metrics;
use pricebox::scheduler::Scheduler;
use pricebox::storage::DownloadStore;
use pricebox::throttle::RequestThrottle;

type MainResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> MainResult {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check(args) => check(args).await,
        Commands::Watch(args) => watch_loop(args).await,
        Commands::Init(args) => init(args),
    }
}

/// The wired-up engine: one throttle, one store, one factory, one
/// coordinator — all built from the loaded configuration.
struct Engine {
    config: Arc<Config>,
    coordinator: Arc<DownloadCoordinator>,
    metrics: Arc<Metrics>,
}

impl Engine {
    fn build(config: Config, force_overwrite: bool) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());
        let throttle = Arc::new(RequestThrottle::new(config.throttle.to_settings()));
        let store = DownloadStore::new(
            config.downloads.base_dir.clone(),
            config.downloads.overwrite || force_overwrite,
        );
        let factory = Arc::new(DownloaderFactory::new(
            config.clone(),
            throttle.clone(),
            store,
            metrics.clone(),
        ));
        let coordinator = Arc::new(
            DownloadCoordinator::new(factory, &config.downloads, Arc::new(TracingSink))
                .with_throttle(throttle),
        );

        Self {
            config,
            coordinator,
            metrics,
        }
    }

    /// First Ctrl-C cancels the running batch.
    fn cancel_on_ctrl_c(&self) {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupt received, cancelling batch...");
                coordinator.cancel();
            }
        });
    }
}

async fn run(args: RunArgs) -> MainResult {
    let date = parse_date(args.date.as_deref())?;
    let engine = Engine::build(Config::load()?, args.force);
    engine.cancel_on_ctrl_c();

    let chain_ids: Vec<String> = if args.chains.is_empty() {
        engine
            .config
            .active_chains()
            .map(|c| c.id.clone())
            .collect()
    } else {
        args.chains
    };

    let requests: Vec<ChainRequest> = chain_ids
        .into_iter()
        .map(|id| ChainRequest::for_date(id, date))
        .collect();

    let result = engine.coordinator.run_batch(requests).await;

    println!("Batch for {} finished in {:.1?}", date, result.duration);
    for (chain_id, outcome) in &result.results {
        if outcome.success {
            println!(
                "  {chain_id}: ok  stores={} price={} promo={}",
                outcome.stores_files, outcome.price_files, outcome.promo_files
            );
        } else {
            println!(
                "  {chain_id}: FAILED  {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    let snapshot = engine.metrics.snapshot();
    println!(
        "Requests: {} ({} challenged), files fetched: {}",
        snapshot.requests_sent, snapshot.bot_challenges, snapshot.files_fetched
    );

    if result.succeeded() == 0 && !result.results.is_empty() {
        return Err("all chains failed".into());
    }
    Ok(())
}

async fn check(args: CheckArgs) -> MainResult {
    let date = parse_date(args.date.as_deref())?;
    let engine = Engine::build(Config::load()?, false);
    engine.cancel_on_ctrl_c();

    let report = engine.coordinator.check_availability(date).await;

    println!("Availability for {date}:");
    for (chain_id, entry) in &report {
        match entry {
            Ok(count) => println!("  {chain_id}: {count} files listed"),
            Err(error) => println!("  {chain_id}: UNAVAILABLE ({error})"),
        }
    }

    Ok(())
}

async fn watch_loop(args: WatchArgs) -> MainResult {
    let every: HumanDuration = args.every.parse()?;
    let engine = Engine::build(Config::load()?, false);

    let (stop_tx, stop_rx) = watch::channel(false);
    {
        let coordinator = engine.coordinator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupt received, stopping after the current batch...");
                let _ = stop_tx.send(true);
                coordinator.cancel();
            }
        });
    }

    let scheduler = Scheduler::new(
        engine.config.clone(),
        engine.coordinator.clone(),
        every.into(),
    );
    scheduler.run(stop_rx).await;

    Ok(())
}

fn init(args: InitArgs) -> MainResult {
    pricebox::config::write_sample(&args.path)?;
    println!("Sample configuration written to {}", args.path.display());
    println!("Edit the chain entries, then run: pricebox run");
    Ok(())
}

fn parse_date(raw: Option<&str>) -> Result<NaiveDate, Box<dyn std::error::Error + Send + Sync>> {
    match raw {
        None => Ok(Local::now().date_naive()),
        Some(raw) => NaiveDate::parse_from_str(raw, "%d/%m/%Y")
            .map_err(|_| format!("invalid date '{raw}', expected dd/MM/yyyy").into()),
    }
}
