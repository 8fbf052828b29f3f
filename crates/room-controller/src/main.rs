//! Room Controller
//!
//! Stateful signaling server for host-centric media rooms.
//!
//! # Servers
//!
//! - HTTP server for health, readiness, stats, and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Start the media-engine worker pool (fail fast if any worker dies)
//! 4. Spawn the registry actor and build the gateway
//! 5. Start the observability HTTP server
//! 6. Mark ready, wait for shutdown signal
//! 7. On shutdown: mark not ready, close all rooms, cancel the actor tree

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use room_controller::actors::{ActorMetrics, RegistryMetrics, RoomRegistryActor};
use room_controller::config::Config;
use room_controller::engine::local::LocalEngine;
use room_controller::engine::WorkerPool;
use room_controller::gateway::Gateway;
use room_controller::observability::{observability_router, HealthState};
use signal_protocol::RouterCapabilities;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        region = %config.region,
        rc_id = %config.rc_id,
        health_bind_address = %config.health_bind_address,
        worker_pool_size = config.worker_pool_size,
        announced_ip = %config.announced_ip,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;
    info!("Prometheus metrics recorder initialized");

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Start the worker pool. Any worker failing to start is fatal; better
    // to crash at boot than to limp along with degraded capacity.
    info!(pool_size = config.worker_pool_size, "Starting media worker pool...");
    let engine = LocalEngine::new();
    let pool = WorkerPool::create(&engine, config.worker_pool_size, &config.worker_settings())
        .await
        .map_err(|e| {
            error!(error = %e, "Worker pool failed to start");
            e
        })?;
    let pool = Arc::new(pool);
    info!(pool_size = pool.size(), "Media worker pool ready");

    // Initialize the actor system
    let actor_metrics = ActorMetrics::new();
    let registry_metrics = RegistryMetrics::new();
    let root_token = CancellationToken::new();

    let (registry, _registry_task) = RoomRegistryActor::spawn(
        Arc::clone(&pool),
        RouterCapabilities::default_set(),
        config.audio_observer_settings(),
        root_token.clone(),
        Arc::clone(&actor_metrics),
        Arc::clone(&registry_metrics),
    );
    info!("Actor system initialized");

    let _gateway = Arc::new(Gateway::new(registry.clone()));

    // Start observability HTTP server (must succeed; fail startup otherwise)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let app = observability_router(Arc::clone(&health_state), registry.clone()).merge(
        Router::new().route(
            "/metrics",
            axum::routing::get(move || {
                let handle = prometheus_handle.clone();
                async move { handle.render() }
            }),
        ),
    );

    // Bind before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = root_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    health_state.set_ready();
    info!("Room Controller running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the orchestrator stops sending traffic
    health_state.set_not_ready();

    // Close all rooms gracefully, then cancel the whole actor tree
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Registry shutdown error");
    }
    root_token.cancel();

    // Give remaining tasks time to wind down
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Room Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
