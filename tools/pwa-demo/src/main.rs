//! Command-line driver for the PWA offline agent.
//!
//! Provides commands for:
//! - Simulating an install and update cycle against an in-memory origin
//! - Registering against a real origin and watching for new deployments
//!
//! ## Usage
//!
//! ```bash
//! # Walk through a 1.0.0 → 2.0.0 update
//! pwa-demo simulate --from 1.0.0 --to 2.0.0
//!
//! # Same, with one asset failing during the update
//! pwa-demo simulate --fail /icon-512.png
//!
//! # Install from a live origin, then re-read pwa.json every 30 seconds
//! pwa-demo run --config pwa.json --watch 30
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use pwa_common::{init_logging, LogConfig, LogFormat, PwaConfig};
use pwa_net::HttpFetcher;
use pwa_page::{AppEvent, PageController, PageSession};
use pwa_sw::{CacheStorage, FileScriptSource, MemoryCacheStorage, ServiceWorkerContainer};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

mod host;
mod simulate;

use host::TerminalHost;

#[derive(Parser)]
#[command(name = "pwa-demo")]
#[command(about = "Offline cache agent and update handshake, from the terminal")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "compact", global = true)]
    log_format: Format,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Pretty,
    Compact,
    Json,
}

impl From<Format> for LogFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Pretty => LogFormat::Pretty,
            Format::Compact => LogFormat::Compact,
            Format::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register against the origin in a config file and report lifecycle events
    Run {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Check for updates every N seconds until Ctrl-C
        #[arg(long)]
        watch: Option<u64>,
        /// Accept updates without asking
        #[arg(long)]
        auto_apply: bool,
    },

    /// Simulate a first install followed by an update
    Simulate {
        /// Version installed on the first visit
        #[arg(long, default_value = "1.0.0")]
        from: String,
        /// Version deployed afterwards
        #[arg(long, default_value = "2.0.0")]
        to: String,
        /// Manifest path that fails to download during the update
        #[arg(long)]
        fail: Option<String>,
        /// Print application events as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    log.format = cli.log_format.into();
    init_logging(log)?;

    match cli.command {
        Commands::Run {
            config,
            watch,
            auto_apply,
        } => run(&config, watch, auto_apply).await,

        Commands::Simulate {
            from,
            to,
            fail,
            json,
        } => {
            simulate::run(simulate::Options {
                from,
                to,
                fail,
                json,
            })
            .await
        }
    }
}

async fn run(config_path: &Path, watch: Option<u64>, auto_apply: bool) -> anyhow::Result<()> {
    let mut config = PwaConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if auto_apply {
        config.page.auto_apply_updates = true;
    }

    info!(origin = %config.origin, version = %config.agent.version, "Starting");

    let fetcher = Arc::new(HttpFetcher::new(&config.network)?);
    let scripts = Arc::new(FileScriptSource::new(config_path));
    let caches = MemoryCacheStorage::new();
    let container = ServiceWorkerContainer::new(Arc::new(caches.clone()), fetcher, scripts);
    let host = Arc::new(TerminalHost::default());

    // First visit installs; nothing controls the page yet.
    let first = container.attach_client(&config.origin).await;
    let session = PageSession::spawn(PageController::new(
        Arc::new(container.clone()),
        host.clone(),
        first.id,
        &config.origin,
        &config.page,
    )?)
    .await?;
    let mut app = session.subscribe();
    container.wait_for_jobs().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = app.try_recv() {
        println!("● {}", event.name());
    }
    session.close().await?;
    container.detach_client(first.id).await?;

    for name in caches.keys().await? {
        let entries = caches.entry_keys(&name).await?;
        println!("cache {name}: {} entries", entries.len());
    }

    let Some(secs) = watch else {
        return Ok(());
    };

    // Returning visit: this page is controlled, so updates wait for consent.
    let page = container.attach_client(&config.origin).await;
    match &page.controller {
        Some(worker) => println!("controlled by {} ({})", worker.id, worker.version),
        None => anyhow::bail!("install did not complete; see the log for the failing asset"),
    }

    let session = PageSession::spawn(PageController::new(
        Arc::new(container.clone()),
        host.clone(),
        page.id,
        &config.origin,
        &config.page,
    )?)
    .await?;
    let mut app = session.subscribe();

    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => session.check_for_updates().await?,
            event = app.recv() => match event {
                Ok(AppEvent::UpdateAvailable(worker)) => {
                    println!("● pwa:update (version {})", worker.version);
                    if !config.page.auto_apply_updates {
                        println!("  restart with --auto-apply to accept updates");
                    }
                }
                Ok(event) => println!("● {}", event.name()),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed application events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let state = session.close().await?;
    info!(?state, reloads = host.reloads(), "Stopped");
    container.detach_client(page.id).await?;
    Ok(())
}
