use std::sync::Arc;

use anyhow::Context;
use tokio::{
    net::TcpListener,
    signal::unix::{self, SignalKind},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use mining_engine::{
    api::{self, AppState},
    config::Config,
    live::LiveDataAggregator,
    tracing::{self, prelude::*},
    upstream::MempoolClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let config = Config::from_env().context("loading configuration")?;
    let upstream = MempoolClient::new(&config.upstream)?;
    let live = Arc::new(LiveDataAggregator::new(
        Arc::new(upstream),
        config.live.clone(),
    ));
    let router = api::router(AppState::new(live));

    let listener = TcpListener::bind(config.api.listen)
        .await
        .with_context(|| format!("binding {}", config.api.listen))?;

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    let server = tracker.spawn({
        let running = running.clone();
        async move {
            let result = api::serve(listener, router, running.clone()).await;
            // Take the daemon down with the server.
            running.cancel();
            result
        }
    });
    tracker.close();
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = running.cancelled() => {},
    }

    trace!("Shutting down.");
    running.cancel();

    tracker.wait().await;
    server.await?.context("API server failed")?;
    info!("Exiting.");
    Ok(())
}
