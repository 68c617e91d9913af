//! tza-archiver - Tezos NFT artifact archiver
//!
//! With `--wallet`, archives the artifacts of tokens minted, held or issued by
//! that address and exits. Without it, runs in spider mode over random tokens
//! until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tza_archiver::config::{
    resolve_credentials, validate_limit, validate_wallet_address, ArchiverConfig, CliOverrides,
};
use tza_archiver::discovery::{artifact_cids, spider_tokens, wallet_tokens, TzktClient};
use tza_archiver::{Pipeline, RunProgress, RunReport, StateStore, WaybackClient};
use tza_common::config::{load_toml_config, write_toml_config, TomlConfig};

/// Command-line arguments for tza-archiver
#[derive(Parser, Debug)]
#[command(name = "tza-archiver")]
#[command(about = "Archive Tezos NFT artifacts from IPFS to the Wayback Machine")]
#[command(version)]
struct Args {
    /// Wallet or contract address (tz1/tz2/tz3/KT1); omit for spider mode
    #[arg(short, long)]
    wallet: Option<String>,

    /// Maximum tokens fetched per query
    #[arg(short, long)]
    limit: Option<usize>,

    /// Folder holding processed_cids.json and errors_cids.json
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// TOML config file
    #[arg(long, env = "TZA_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum simultaneous submissions
    #[arg(long)]
    concurrency: Option<usize>,

    /// IPFS gateway used to build archive URLs
    #[arg(long)]
    gateway: Option<String>,

    /// Submit without asking the availability API first
    #[arg(long)]
    no_availability_check: bool,

    /// Write a config file with default values and exit
    #[arg(long, value_name = "FILE")]
    write_default_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    dotenv::dotenv().ok();

    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        write_toml_config(&TomlConfig::default(), path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let toml_config = load_toml_config(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.as_str().into()),
        )
        .init();

    info!(
        "Starting tza-archiver v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    if let Some(wallet) = &args.wallet {
        validate_wallet_address(wallet)?;
    }
    let limit = args.limit.unwrap_or(toml_config.discovery.token_limit);
    validate_limit(limit)?;

    let config = ArchiverConfig::resolve(
        &toml_config,
        &CliOverrides {
            data_dir: args.data_dir.clone(),
            concurrency: args.concurrency,
            gateway: args.gateway.clone(),
            no_availability_check: args.no_availability_check,
        },
    )?;
    let credentials = resolve_credentials()?;

    info!("Data folder: {}", config.data_dir.display());
    let store = Arc::new(StateStore::load(&config.data_dir));

    let client = Arc::new(
        WaybackClient::new(credentials, config.save_options.clone(), config.request_timeout)
            .context("Failed to create archive client")?,
    );
    let pipeline = Pipeline::from_config(&config, Arc::clone(&store), client)
        .context("Invalid gateway")?;
    let tzkt = TzktClient::new(&config.discovery.base_url, config.discovery.requests_per_second)
        .context("Failed to create TzKT client")?;

    let progress = RunProgress::new();
    let run = async {
        match &args.wallet {
            Some(wallet) => {
                info!("Processing wallet {} (limit {})", wallet, limit);
                let tokens = wallet_tokens(&tzkt, wallet.clone(), limit);
                pipeline.run_with(artifact_cids(tokens), &progress).await
            }
            None => {
                info!("No wallet given, starting spider mode");
                let tokens = spider_tokens(
                    &tzkt,
                    config.discovery.spider_batch_size,
                    config.discovery.spider_delay,
                );
                pipeline.run_with(artifact_cids(tokens), &progress).await
            }
        }
    };

    tokio::select! {
        report = run => {
            log_report(&report);
        }
        _ = shutdown_signal() => {
            let (processed, errored) = store.counts();
            info!(
                "Interrupted. Processed CIDs: {}, error CIDs: {}",
                processed, errored
            );
            log_report(&progress.report());
        }
    }

    // Retries any record write that failed mid-run
    if let Err(e) = store.flush() {
        error!("Failed to save state on exit: {}", e);
    }

    Ok(())
}

fn log_report(report: &RunReport) {
    info!(
        "This run: {} newly archived, {} errors, {} rate limited, {} skipped",
        report.newly_processed(),
        report.errored,
        report.rate_limited,
        report.skipped()
    );
    if report.persist_failures > 0 {
        error!(
            "{} outcomes could not be saved and will be retried next run",
            report.persist_failures
        );
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
