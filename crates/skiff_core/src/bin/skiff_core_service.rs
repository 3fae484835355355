/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - Skiff Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use skiff_core::{server, CoreState, NodeConfig};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio::sync::watch;
use tracing::{info, warn};

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SKIFF_CONFIG").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = match config_path() {
        Some(path) => NodeConfig::load(&path)?,
        None => {
            warn!("no config given (argv[1] or SKIFF_CONFIG); using defaults");
            NodeConfig::default().normalized()
        }
    };
    let addr: SocketAddr = cfg.bind.parse().with_context(|| format!("parse bind: {}", cfg.bind))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = CoreState::open(cfg, shutdown_rx).await?;
    info!("local api key is stored in {}", state.store.root().join("account.json").display());

    let router = server::router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler: {e}");
            }
            info!("shutting down");
        })
        .await
        .context("http server")?;

    if tokio::time::timeout(Duration::from_secs(10), state.queue.wait_idle())
        .await
        .is_err()
    {
        warn!("delivery queue still busy at exit: {:?}", state.queue.stats());
    }
    let _ = shutdown_tx.send(true);
    Ok(())
}
