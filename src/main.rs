//! Courtside sync binary entrypoint wiring local storage, the cloud store,
//! the sync orchestrator and the HTTP surface.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use courtside_sync::{
    config::AppConfig,
    dao::{
        cloud_store::{
            CloudStore,
            couchdb::{CouchCloudStore, CouchConfig, CouchDaoError},
            memory::MemoryCloudStore,
        },
        kv::{FileStore, KeyValueStore, MemoryStore},
    },
    routes,
    services::connectivity::{self, CloudHealthProbe, HttpProbe, ReachabilityProbe},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let storage = open_storage(&config);
    let cloud = connect_cloud(&config).await?;

    let app_state = AppState::new(config, storage, cloud);
    start_background_tasks(&app_state).await?;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Open the on-device store, falling back to memory when the data directory is unusable.
fn open_storage(config: &AppConfig) -> Arc<dyn KeyValueStore> {
    match FileStore::open(&config.data_dir) {
        Ok(store) => {
            info!(path = %config.data_dir.display(), "using on-disk storage");
            Arc::new(store)
        }
        Err(err) => {
            warn!(
                path = %config.data_dir.display(),
                error = %err,
                "failed to open data directory; keeping games in memory only"
            );
            Arc::new(MemoryStore::new())
        }
    }
}

/// Connect to CouchDB when configured, otherwise run against an in-memory cloud.
async fn connect_cloud(config: &AppConfig) -> anyhow::Result<Arc<dyn CloudStore>> {
    let couch = match CouchConfig::from_env() {
        Ok(couch) => couch,
        Err(CouchDaoError::MissingEnvVar { .. }) => {
            warn!("CouchDB is not configured; using the in-memory cloud store");
            return Ok(Arc::new(MemoryCloudStore::new()));
        }
        Err(err) => return Err(err).context("reading CouchDB configuration"),
    };

    let store = CouchCloudStore::new(couch.with_request_timeout(config.network_timeout))
        .context("building CouchDB client")?;
    if let Err(err) = store.ensure_database().await {
        // Offline at startup is fine; the probe loop and the retry policy take over.
        warn!(error = %err, "CouchDB database check failed; continuing offline");
    }
    Ok(Arc::new(store))
}

/// Start the orchestrator loop, the cloud subscriptions and the reachability probe.
async fn start_background_tasks(state: &SharedState) -> anyhow::Result<()> {
    let orchestrator = state.orchestrator().clone();
    orchestrator.watch_library().await;
    tokio::spawn(orchestrator.run());

    let config = state.config();
    let probe: Arc<dyn ReachabilityProbe> = match &config.probe_url {
        Some(url) => Arc::new(
            HttpProbe::new(url.clone(), config.network_timeout)
                .context("building reachability probe")?,
        ),
        None => Arc::new(CloudHealthProbe::new(state.cloud().clone())),
    };
    tokio::spawn(connectivity::run_probe_loop(
        state.connectivity().clone(),
        probe,
        config.probe_interval,
        config.network_timeout,
    ));
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
