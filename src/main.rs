//! Crawl-Throttle main entry point
//!
//! This is the command-line interface: it runs a list of targets through the
//! request scheduler using the HTTP fetcher and reports what happened.

use clap::Parser;
use crawl_throttle::config::{load_config_with_hash, Config};
use crawl_throttle::scheduler::print_statistics;
use crawl_throttle::{HttpFetcher, RequestScheduler, SchedulerEvent, ThrottleError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Crawl-Throttle: a resilient request scheduler
///
/// Fetches every target under a shared rate limit, circuit breaker and retry
/// policy, presenting a rotating browser identity on each attempt.
#[derive(Parser, Debug)]
#[command(name = "crawl-throttle")]
#[command(version = "1.0.0")]
#[command(about = "A resilient request scheduler for rate-sensitive targets", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Targets to fetch
    #[arg(value_name = "TARGETS")]
    targets: Vec<String>,

    /// Read additional targets from a file, one per line
    #[arg(long, value_name = "FILE")]
    targets_file: Option<PathBuf>,

    /// Priority assigned to every submitted target
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    priority: i32,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and list targets without fetching anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let targets = collect_targets(&cli.targets, cli.targets_file.as_deref())?;

    if cli.dry_run {
        handle_dry_run(&config, &targets);
    } else {
        handle_run(&config, targets, cli.priority).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawl_throttle=info,warn"),
            1 => EnvFilter::new("crawl_throttle=debug,info"),
            2 => EnvFilter::new("crawl_throttle=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Merges command-line targets with those read from `targets_file`
///
/// Blank lines and lines starting with `#` in the file are skipped.
fn collect_targets(
    targets: &[String],
    targets_file: Option<&Path>,
) -> crawl_throttle::Result<Vec<String>> {
    let mut collected = targets.to_vec();

    if let Some(path) = targets_file {
        let content = std::fs::read_to_string(path)?;
        collected.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    Ok(collected)
}

/// Handles the --dry-run mode: validates config and shows what would be fetched
fn handle_dry_run(config: &Config, targets: &[String]) {
    println!("=== Crawl-Throttle Dry Run ===\n");

    println!("Scheduler:");
    println!("  Max concurrency: {}", config.scheduler.max_concurrency);
    println!("  Fetch timeout: {}ms", config.scheduler.fetch_timeout_ms);
    println!(
        "  Requeue on open breaker: {}",
        config.scheduler.requeue_on_breaker_open
    );

    println!("\nRate Limit:");
    println!(
        "  {} requests per {}ms",
        config.rate_limit.max_requests, config.rate_limit.window_ms
    );

    println!("\nCircuit Breaker:");
    println!(
        "  Failure threshold: {}",
        config.circuit_breaker.failure_threshold
    );
    println!("  Open timeout: {}ms", config.circuit_breaker.open_timeout_ms);

    println!("\nRetry:");
    println!("  Max attempts: {}", config.retry.max_attempts);
    println!(
        "  Backoff: {}ms x{} up to {}ms",
        config.retry.initial_delay_ms, config.retry.multiplier, config.retry.max_delay_ms
    );

    println!("\nSessions:");
    println!(
        "  {} identities, {} requests each, {}ms TTL",
        config.session.pool_size,
        config.session.max_requests_per_identity,
        config.session.identity_ttl_ms
    );

    println!("\nTargets ({}):", targets.len());
    for target in targets {
        println!("  - {}", target);
    }

    println!("\n✓ Configuration is valid");
}

/// Runs every target through the scheduler and prints final statistics
async fn handle_run(
    config: &Config,
    targets: Vec<String>,
    priority: i32,
) -> Result<(), ThrottleError> {
    if targets.is_empty() {
        tracing::warn!("No targets given, nothing to do");
        return Ok(());
    }

    let fetcher = Arc::new(HttpFetcher::new()?);
    let scheduler = Arc::new(RequestScheduler::new(config, fetcher)?);

    let mut events = scheduler.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::CircuitStateChanged { state }) => {
                    tracing::info!("Circuit breaker is now {}", state);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Event logger skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tracing::info!("Submitting {} targets", targets.len());
    let handles: Vec<_> = targets
        .into_iter()
        .map(|target| scheduler.submit(target, priority))
        .collect();

    let interrupt = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling outstanding tasks");
                scheduler.shutdown(false).await;
            }
        })
    };

    for handle in handles {
        let outcome = handle.wait().await;
        match &outcome.result {
            Ok(response) => tracing::info!(
                "{} completed after {} attempt(s), {} bytes",
                outcome.target,
                outcome.attempts,
                response.payload.len()
            ),
            Err(e) => tracing::warn!(
                "{} failed after {} attempt(s): {}",
                outcome.target,
                outcome.attempts,
                e
            ),
        }
    }

    interrupt.abort();
    scheduler.shutdown(true).await;

    println!();
    print_statistics(&scheduler.stats());

    event_logger.abort();

    Ok(())
}
