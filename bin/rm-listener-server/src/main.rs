//! Routemaster Listener Server
//!
//! Hosts a webhook listener for the Routemaster bus and logs every delivered
//! event. Configuration comes from `rm-config` (`ROUTEMASTER_CONFIG`,
//! `ROUTEMASTER_UUID`, `LISTENER_*`, `DIAGNOSTICS_*`).
//!
//! ## Endpoints
//!
//! - `POST <LISTENER_PATH>` - event batches from the bus
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus metrics

use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use rm_config::{ServerConfig, SinkKind};
use rm_listener::{default_sink, handler_fn, EventBatch, HandlerError, Listener};
use rm_logmsg::{LogSink, Logger, TracingSink};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting Routemaster Listener Server");

    let config = ServerConfig::load().context("Failed to load configuration")?;
    info!(
        addr = %config.listener.bind_addr(),
        path = %config.listener.path,
        sink = %config.diagnostics.sink,
        "Configuration loaded"
    );

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let listener = Listener::builder(config.secret.clone())
        .handler(handler_fn(log_events))
        .sink(diagnostics_sink(&config)?)
        .max_body_bytes(config.listener.max_body_bytes)
        .build()?;

    let app = listener
        .into_router(&config.listener.path)
        .merge(
            Router::new()
                .route("/health", get(health_handler))
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        )
        .layer(TraceLayer::new_for_http());

    let tcp = TcpListener::bind(config.listener.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.listener.bind_addr()))?;
    info!("Listening on http://{}{}", config.listener.bind_addr(), config.listener.path);

    axum::serve(tcp, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Routemaster Listener Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn diagnostics_sink(config: &ServerConfig) -> Result<Arc<dyn LogSink>> {
    let sink: Arc<dyn LogSink> = match config.diagnostics.sink {
        SinkKind::Stderr => Arc::new(default_sink()),
        SinkKind::Tracing => Arc::new(TracingSink),
        SinkKind::File => {
            let path = config
                .diagnostics
                .file
                .as_ref()
                .context("DIAGNOSTICS_FILE is required for the file sink")?;
            Arc::new(
                Logger::file(path)
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )
        }
    };
    Ok(sink)
}

fn log_events(events: EventBatch) -> std::result::Result<(), HandlerError> {
    for event in &events {
        info!(
            topic = %event.topic(),
            event_type = %event.event_type(),
            url = %event.url(),
            timestamp = ?event.timestamp(),
            has_data = event.raw_data().is_some(),
            "Event received"
        );
    }
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
