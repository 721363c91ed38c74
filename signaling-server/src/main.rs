use std::convert::Infallible;
use std::time::Duration;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use log::{error, info, warn};

use presence_signaling::config::ServerConfig;
use presence_signaling::server::handle_request;
use presence_signaling::state::{connect_presence, AppState, BackendKind};

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

// ============================================
// Main Entry Point
// ============================================

#[tokio::main]
async fn main() {
    // Healthcheck mode: exit 0 if server is running (port in use), exit 1 if not
    if std::env::args().any(|a| a == "--healthcheck") {
        use std::net::TcpListener;
        let port = ServerConfig::healthcheck_port(|key| std::env::var(key).ok());
        match TcpListener::bind(("127.0.0.1", port)) {
            Ok(_) => std::process::exit(1),
            Err(_) => std::process::exit(0),
        }
    }

    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let (presence, backend) = match connect_presence(&config).await {
        Ok(selected) => selected,
        Err(e) => {
            error!("Presence store unavailable at startup: {}", e);
            std::process::exit(1);
        }
    };
    let state = AppState::new(presence).with_ice(config.ice.clone());
    info!("Presence backend: {:?}", backend);

    if config.reset_presence {
        if backend == BackendKind::Redis {
            warn!("SIGNALING_RESET_PRESENCE is on: peers of other instances sharing this Redis are dropped too.");
        }
        match state.presence.reset(&state.shutdown).await {
            Ok(()) => info!("Presence reset on startup."),
            Err(e) => warn!("Presence reset failed; continuing with existing state: {}", e),
        }
    }

    let svc_state = state.clone();
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let state = svc_state.clone();
        let addr = conn.remote_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_request(req, addr, state.clone())))
        }
    });

    let shutdown = state.shutdown.clone();
    let builder = match Server::try_bind(&config.addr) {
        Ok(builder) => builder,
        Err(e) => {
            error!("Failed to bind {}: {}", config.addr, e);
            std::process::exit(1);
        }
    };
    let server = builder
        .serve(make_svc)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            shutdown.cancel();
        });

    info!("Signaling server listening on http://{}", config.addr);
    info!("WebSocket endpoint: ws://{}", config.addr);
    info!("Presence snapshot: http://{}/api/presence", config.addr);
    info!("Health check: http://{}/health", config.addr);

    if let Err(e) = server.await {
        error!("Server error: {}", e);
    }

    // Upgraded sockets outlive hyper's graceful shutdown; let them remove
    // their peers from the shared store before exiting.
    state.shutdown.cancel();
    state.tasks.close();
    if tokio::time::timeout(SHUTDOWN_DRAIN, state.tasks.wait()).await.is_err() {
        warn!("Timed out waiting for {} connection(s) to clean up", state.tasks.len());
    }
}
