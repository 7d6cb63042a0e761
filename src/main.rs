// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;

mod adapters;
mod app;
mod config;
mod jobs;
mod logging;

use app::dispatcher::Dispatcher;
use app::ports::{ClockPort, ObjectStoragePort, PlatformPort};
use jobs::JobRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let config = config::load(
        opts.config,
        config::Overrides {
            database_path: opts.database_path,
            storage_path: opts.storage_path,
            port: opts.port,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    tracing::info!(
        database_path = %config.database_path.display(),
        storage_path = %config.storage_path.display(),
        port = config.port,
        "starting jobserver"
    );

    config::ensure_parent_dir(&config.database_path)?;
    let store = adapters::db::JobStore::open(&config.database_path)
        .await
        .context("failed to open job store")?;
    let store = Arc::new(adapters::db::SqliteStoreAdapter::new(store));

    let storage: Arc<dyn ObjectStoragePort> = Arc::new(adapters::storage::LocalObjectStorage::new(
        config.storage_path.clone(),
    ));
    let clock: Arc<dyn ClockPort> = Arc::new(adapters::time::SystemClock::new());
    let platform: Arc<dyn PlatformPort> = Arc::new(adapters::platform::HttpPlatform::new(
        config.platform_api_base.clone(),
        config.platform_token.clone(),
    )?);

    let bot_user = platform
        .current_user()
        .await
        .context("failed to fetch bot user from platform")?;
    tracing::info!(id = %bot_user.id, username = %bot_user.username, "authenticated with platform");

    let dispatcher = Arc::new(Dispatcher::new(
        JobRegistry::with_defaults(),
        store.clone(),
        store,
        platform,
        storage,
        clock,
        bot_user,
    ));

    // Pending rows have no runner; sweep them before accepting RPC, then
    // pick running resumable jobs back up.
    dispatcher.startup_sweep().await?;
    dispatcher.resume_ongoing().await?;

    let server_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port));
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("failed to bind {server_addr}"))?;
    tracing::info!("server listening on {server_addr}");

    let router = adapters::http::router(dispatcher.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(dispatcher))
        .await?;
    Ok(())
}

async fn shutdown_signal(dispatcher: Arc<Dispatcher>) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    tracing::info!("shutdown signal received, cancelling running jobs");
    dispatcher.shutdown();
}
