//! Prometheus recorder with an optional HTTP endpoint.
//!
//! The recorder is process-global and installed at most once. A pipeline run
//! is short-lived, so the HTTP server only exists when an address is
//! configured and lives until the process exits.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{AddressParseSnafu, AlreadyInitializedSnafu, MetricsError, PrometheusInitSnafu};

/// Histogram buckets for duration metrics (in seconds).
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Handle onto the installed recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

impl MetricsController {
    /// The global controller, if the recorder has been installed.
    pub fn get() -> Option<&'static Self> {
        CONTROLLER.get()
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn install() -> Result<&'static MetricsController, MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())?;
    CONTROLLER.get().context(AlreadyInitializedSnafu)
}

/// Install the recorder and, when `address` is given, serve `/metrics` and
/// `/health` on it from a background task.
///
/// Must be called from within a tokio runtime when an address is given.
pub fn init_global(address: Option<&str>) -> Result<(), MetricsError> {
    let addr = address
        .map(|a| {
            a.parse::<SocketAddr>().context(AddressParseSnafu {
                address: a.to_string(),
            })
        })
        .transpose()?;

    let controller = install()?;

    if let Some(addr) = addr {
        tokio::spawn(run_server(addr, controller.handle.clone()));
        info!(%addr, "Metrics server started");
    }
    Ok(())
}

/// Install the recorder for tests; safe to call from many test threads.
pub fn init_test() {
    if install().is_err() {
        while CONTROLLER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

async fn run_server(addr: SocketAddr, handle: PrometheusHandle) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(handle));

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server error: {}", e);
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}
