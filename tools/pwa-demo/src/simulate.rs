//! Scripted v1 → v2 update against an in-memory origin.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use pwa_common::{AgentConfig, PwaConfig};
use pwa_net::{MemoryFetcher, Request};
use pwa_page::{AppEvent, PageController, PageSession, PageState};
use pwa_sw::{CacheStorage, MemoryCacheStorage, ServiceWorkerContainer, StaticScriptSource};
use tokio::sync::broadcast;
use tracing::debug;

use crate::host::TerminalHost;

/// How long to wait for the page to react before giving up.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Options {
    pub from: String,
    pub to: String,
    /// Manifest path that fails while installing `to`.
    pub fail: Option<String>,
    pub json: bool,
}

/// Run the scenario and report what the page saw.
pub async fn run(options: Options) -> anyhow::Result<()> {
    let base = PwaConfig::default();
    let origin = base.origin.clone();
    let script_url = base.script_url()?;

    let v1 = AgentConfig {
        version: options.from.clone(),
        ..base.agent.clone()
    };
    let mut v2 = AgentConfig {
        version: options.to.clone(),
        ..base.agent.clone()
    };
    v1.validate()?;

    let fetcher = Arc::new(MemoryFetcher::new(origin.clone()));
    for path in &v1.manifest {
        fetcher
            .serve(path, format!("{path} @ {}", v1.version))
            .await?;
    }

    let scripts = Arc::new(StaticScriptSource::new());
    scripts.publish(&script_url, v1.clone()).await;

    let caches = MemoryCacheStorage::new();
    let container =
        ServiceWorkerContainer::new(Arc::new(caches.clone()), fetcher.clone(), scripts.clone());
    let host = Arc::new(TerminalHost::default());

    println!("▶ first visit ({})", v1.version);
    let first = container.attach_client(&origin).await;
    let session = PageSession::spawn(PageController::new(
        Arc::new(container.clone()),
        host.clone(),
        first.id,
        &origin,
        &base.page,
    )?)
    .await?;
    let mut app = session.subscribe();
    container.wait_for_jobs().await;
    report(&mut app, options.json).await?;
    println!("  caches: {:?}", caches.keys().await?);
    session.close().await?;
    container.detach_client(first.id).await?;

    println!("▶ returning visit");
    let page = container.attach_client(&origin).await;
    let controller = page
        .controller
        .as_ref()
        .context("page should be controlled after the first install")?;
    println!("  controlled by {} ({})", controller.id, controller.version);
    probe(&container, &origin, &v1.manifest).await?;

    println!("▶ deploying {}", v2.version);
    for path in &v1.manifest {
        fetcher
            .serve(path, format!("{path} @ {}", v2.version))
            .await?;
    }
    if let Some(path) = &options.fail {
        if !v2.manifest.contains(path) {
            v2.manifest.push(path.clone());
        }
        fetcher.fail(path, "simulated outage").await?;
        println!("  {path} will fail to download");
    }
    v2.validate()?;
    scripts.publish(&script_url, v2.clone()).await;

    let session = PageSession::spawn(PageController::new(
        Arc::new(container.clone()),
        host.clone(),
        page.id,
        &origin,
        &base.page,
    )?)
    .await?;
    let mut app = session.subscribe();
    session.check_for_updates().await?;
    container.wait_for_jobs().await;

    match next_event(&mut app).await {
        Some(event @ AppEvent::UpdateAvailable(_)) => {
            print_event(&event, options.json)?;
            println!("▶ user accepts the update");
            session.apply_update().await?;
            match next_event(&mut app).await {
                Some(event) => print_event(&event, options.json)?,
                None => bail!("update was accepted but never activated"),
            }
        }
        Some(other) => bail!("unexpected event {}", other.name()),
        None => println!("  no update offered; {} stays active", v1.version),
    }

    let state = session.close().await?;
    println!("  page state: {}", describe(&state));
    println!("  caches: {:?}", caches.keys().await?);
    println!("  reloads: {}", host.reloads());
    probe(&container, &origin, &v1.manifest).await?;

    container.detach_client(page.id).await?;
    Ok(())
}

async fn next_event(app: &mut broadcast::Receiver<AppEvent>) -> Option<AppEvent> {
    match tokio::time::timeout(EVENT_TIMEOUT, app.recv()).await {
        Ok(Ok(event)) => Some(event),
        Ok(Err(e)) => {
            debug!(error = %e, "App event stream ended");
            None
        }
        Err(_) => None,
    }
}

/// Print everything the page has published so far.
async fn report(app: &mut broadcast::Receiver<AppEvent>, json: bool) -> anyhow::Result<()> {
    // Events are produced by the session task; give it a moment to drain.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = app.try_recv() {
        print_event(&event, json)?;
    }
    Ok(())
}

fn print_event(event: &AppEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        match event {
            AppEvent::UpdateAvailable(worker) => {
                println!("  ● {} (version {})", event.name(), worker.version)
            }
            _ => println!("  ● {}", event.name()),
        }
    }
    Ok(())
}

/// Fetch every manifest path through the worker, as an offline page would.
async fn probe(
    container: &ServiceWorkerContainer,
    origin: &url::Url,
    manifest: &[String],
) -> anyhow::Result<()> {
    for path in manifest {
        let request = Request::get_path(origin, path)?;
        match container.fetch(&request).await {
            Some(response) => println!(
                "  {path} → {}",
                String::from_utf8_lossy(&response.body)
            ),
            None => println!("  {path} → (not cached)"),
        }
    }
    Ok(())
}

fn describe(state: &PageState) -> &'static str {
    match state {
        PageState::Idle => "idle",
        PageState::UpdateAvailable(_) => "update available",
        PageState::Applying(_) => "applying",
        PageState::Updated => "updated",
    }
}
