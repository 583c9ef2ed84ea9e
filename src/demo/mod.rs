//! # WatchShare Demo Module
//!
//! Runs a complete host/viewer session inside one process: in-process
//! signaling, a synthetic capture source and a surface that reports every toast,
//! clipboard write and navigation through `tracing`.
//!
//! ```bash
//! RUST_LOG=debug watchshare demo
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{debug, info};
use url::Url;

use crate::host::{HostContext, HostController, HostPhase};
use crate::media::SyntheticCapture;
use crate::share::ShareSurface;
use crate::signaling::memory::MemorySignaling;
use crate::surface::LogSurface;
use crate::viewer::{ViewerContext, ViewerController, ViewerPhase};

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "WatchShare demo - run a host and a viewer in process"
)]
pub struct Args {
    /// Origin used to build the shareable link
    #[arg(long, default_value = "http://127.0.0.1:8386")]
    pub public_url: String,

    /// Seconds to wait for each step before giving up
    #[arg(long, default_value_t = 5)]
    pub step_timeout: u64,
}

async fn step<T>(name: &str, limit: Duration, fut: impl Future<Output = Option<T>>) -> Result<T> {
    let outcome = tokio::time::timeout(limit, fut)
        .await
        .with_context(|| format!("timed out waiting for: {name}"))?;
    let value = outcome.ok_or_else(|| anyhow!("session stopped before: {name}"))?;
    info!("Demo step done: {}", name);
    Ok(value)
}

pub async fn run_demo(args: Args) -> Result<()> {
    let origin = Url::parse(&args.public_url).context("invalid --public-url")?;
    let limit = Duration::from_secs(args.step_timeout);

    let signaling = Arc::new(MemorySignaling::new());
    let capture = Arc::new(SyntheticCapture::new());
    let host_surface = Arc::new(LogSurface::new());
    let viewer_surface = Arc::new(LogSurface::new());

    let host = HostController::spawn(HostContext {
        signaling: signaling.clone(),
        capture: capture.clone(),
        notifier: host_surface.clone(),
        navigator: host_surface.clone(),
    });

    let ready = step("host identity", limit, host.wait_for(|s| s.identity.is_some())).await?;
    let room = ready
        .identity
        .context("host published no identity")?
        .to_string();

    let share = ShareSurface::new(&origin, &room);
    info!("Room ID: {}", share.room_label());
    info!("Shareable URL: {}", share.link_label());
    share.copy_link(&*host_surface, &*host_surface)?;
    let link = share.deep_link().context("no deep link for room")?;

    let viewer = ViewerController::spawn(
        ViewerContext {
            signaling: signaling.clone(),
            notifier: viewer_surface.clone(),
            video: viewer_surface.clone(),
        },
        Some(&link),
    );
    viewer.join();
    step(
        "viewer connected",
        limit,
        viewer.wait_for(|s| s.phase == ViewerPhase::Waiting),
    )
    .await?;
    step(
        "capture prompt shown",
        limit,
        host.wait_for(|s| s.phase == HostPhase::AwaitingCapture && s.prompt_visible),
    )
    .await?;

    host.start_capture();
    step(
        "viewer streaming",
        limit,
        viewer.wait_for(|s| s.phase == ViewerPhase::Streaming),
    )
    .await?;

    let stream = capture.last_issued().context("capture issued no stream")?;
    info!("Ending capture {} from the platform side", stream.id());
    if let Some(track) = stream.primary_track() {
        track.end();
    }
    step(
        "host back to awaiting capture",
        limit,
        host.wait_for(|s| s.phase == HostPhase::AwaitingCapture && s.prompt_visible),
    )
    .await?;

    host.start_capture();
    step(
        "host sharing again",
        limit,
        host.wait_for(|s| s.phase == HostPhase::Sharing && s.calls > 0),
    )
    .await?;

    host.end_session();
    step(
        "host terminated",
        limit,
        host.wait_for(|s| s.phase == HostPhase::Terminated),
    )
    .await?;
    step(
        "viewer notified",
        limit,
        viewer.wait_for(|s| s.phase == ViewerPhase::Idle),
    )
    .await?;

    viewer.unmount().await;
    let last = host.unmount().await;
    debug!("Final host state: {}", serde_json::to_string(&last)?);

    let live: usize = capture.issued().iter().map(|s| s.live_track_count()).sum();
    info!(
        "Demo finished: {} captures, {} live tracks, {} peers registered",
        capture.issued().len(),
        live,
        signaling.peer_count()
    );
    Ok(())
}
