//! Nexus gateway binary
//!
//! Loads configuration, seeds the configured upstreams and virtual servers,
//! and serves the management API until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;

use nexus_api::mcp::discovery::{RefreshErrorHook, RefreshSuccessHook};
use nexus_api::mcp::{
    CapabilityCatalog, Discoverer, DiscoveryError, DiscoverySummary, RefreshScheduler,
    SseTransport, TransportRegistry,
};
use nexus_api::state::{AppState, UpstreamStore};
use nexus_api::vmcp::VmcpManager;
use nexus_api::{routes, Config};
use nexus_shared::UpstreamStatus;

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load(config_path_from_args().as_deref()) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let upstreams = Arc::new(UpstreamStore::new());
    let registry = Arc::new(TransportRegistry::new());
    let catalog = Arc::new(CapabilityCatalog::new());
    let discoverer = Arc::new(Discoverer::new(registry.clone(), catalog.clone()));

    let on_success: RefreshSuccessHook = {
        let upstreams = upstreams.clone();
        Arc::new(move |name: &str, _summary: &DiscoverySummary| {
            let upstreams = upstreams.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                upstreams.set_status(&name, UpstreamStatus::Online).await;
            });
        })
    };
    let on_error: RefreshErrorHook = {
        let upstreams = upstreams.clone();
        Arc::new(move |name: &str, _error: &DiscoveryError| {
            let upstreams = upstreams.clone();
            let name = name.to_string();
            tokio::spawn(async move {
                upstreams.set_status(&name, UpstreamStatus::Error).await;
            });
        })
    };
    let scheduler = Arc::new(RefreshScheduler::new(
        discoverer.clone(),
        config.refresh_interval(),
        on_success,
        on_error,
    ));

    let manager = Arc::new(VmcpManager::new(
        registry.clone(),
        catalog.clone(),
        upstreams.clone(),
        config.port,
        config.vmcp.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        upstreams: upstreams.clone(),
        registry: registry.clone(),
        catalog,
        discoverer: discoverer.clone(),
        scheduler: scheduler.clone(),
        manager: manager.clone(),
        started_at: OffsetDateTime::now_utc(),
    };
    state.spawn_status_observer();

    // Seed configured upstreams; discovery runs before virtual servers are
    // added so their first aggregation sees a populated catalog.
    for definition in &config.mcp_servers {
        if let Err(e) = upstreams.insert(definition.clone()).await {
            tracing::error!(upstream = %definition.name, error = %e, "Skipping configured upstream");
            continue;
        }
        let transport = SseTransport::new(
            definition.name.clone(),
            definition.url.clone(),
            config.transport_options(definition.auth_token.clone()),
        );
        if let Err(e) = registry.add(definition.name.clone(), transport).await {
            tracing::error!(upstream = %definition.name, error = %e, "Skipping configured upstream");
            continue;
        }
        if !definition.is_disabled {
            if let Err(e) = discoverer.discover(&definition.name).await {
                tracing::warn!(upstream = %definition.name, error = %e, "Initial discovery failed");
                upstreams
                    .set_status(&definition.name, UpstreamStatus::Error)
                    .await;
            } else {
                upstreams
                    .set_status(&definition.name, UpstreamStatus::Online)
                    .await;
            }
            scheduler.watch(&definition.name).await;
        }
    }

    for request in config.vmcps.clone() {
        let name = request.name.clone();
        if let Err(e) = manager.add(request).await {
            tracing::error!(vmcp = %name, error = %e, "Skipping configured virtual server");
        }
    }

    let app = routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(port = config.port, error = %e, "Cannot bind management port");
            std::process::exit(1);
        }
    };
    tracing::info!(port = config.port, "Management API listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Management server error");
    }

    tracing::info!("Shutting down");
    manager.stop_all().await;
    scheduler.shutdown().await;
    registry.close_all().await;
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
