pub mod cache;
pub mod config;
pub mod dav;
pub mod debrid;
pub mod error;
pub mod types;

pub use cache::TorrentCache;
pub use config::{CliArgs, Config};
pub use dav::{router, AppState, Vfs};
pub use error::{DavError, DavResult};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cache::{spawn_refresh_workers, spawn_repair_worker};
use crate::debrid::restclient::RestClient;
use crate::debrid::DebridClient;

pub async fn run(config: Config) -> Result<()> {
    info!(operation = "startup", message = "debrid-dav starting");
    tracing::debug!(config = ?config, "Configuration loaded");

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let mut backends: HashMap<String, Arc<TorrentCache>> = HashMap::new();
    let mut workers = Vec::new();

    for backend in &config.backends {
        let client: Arc<dyn DebridClient> = Arc::new(
            RestClient::from_config(backend)
                .with_context(|| format!("Failed to create client for {}", backend.name))?,
        );
        let (cache, repair_rx) = TorrentCache::new(backend, &config.cache, client)
            .with_context(|| format!("Failed to open cache for {}", backend.name))?;

        // Populate before serving. A failed sync is not fatal; the
        // snapshot replay keeps the last known state browsable.
        match cache.full_sync(shutdown_tx.subscribe()).await {
            Ok(outcome) => info!(
                backend = %backend.name,
                added = outcome.added,
                removed = outcome.removed,
                failed = outcome.failed,
                "Initial sync complete"
            ),
            Err(e) => warn!(
                backend = %backend.name,
                error = %e,
                "Initial sync failed, serving snapshot state"
            ),
        }
        if let Err(e) = cache.refresh_links().await {
            warn!(backend = %backend.name, error = %e, "Initial link warm-up failed");
        }

        workers.push(spawn_repair_worker(
            cache.clone(),
            repair_rx,
            shutdown_tx.subscribe(),
        ));
        workers.extend(spawn_refresh_workers(cache.clone(), &shutdown_tx));
        backends.insert(backend.name.clone(), cache);
    }

    let vfs = Arc::new(Vfs::new(backends)?);
    let auth = match (&config.server.username, &config.server.password) {
        (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
        _ => None,
    };
    let app = router(AppState { vfs, auth });

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!(addr = %addr, "WebDAV server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down background workers");
    let _ = shutdown_tx.send(());
    for worker in workers {
        let _ = worker.await;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
