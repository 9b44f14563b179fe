//! HTTP health endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use mpdex_core::{ConnectionState, Readiness};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use warp::http::StatusCode;
use warp::Filter;

#[derive(Debug, Serialize)]
struct UpstreamHealth {
    name: String,
    state: ConnectionState,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    upstreams: Vec<UpstreamHealth>,
}

impl HealthReport {
    fn collect(upstreams: &[Arc<dyn Readiness>]) -> Self {
        let upstreams: Vec<_> = upstreams
            .iter()
            .map(|upstream| UpstreamHealth {
                name: upstream.upstream().to_string(),
                state: upstream.state(),
            })
            .collect();
        let ready = upstreams
            .iter()
            .all(|upstream| upstream.state == ConnectionState::Ready);

        Self {
            status: if ready { "ok" } else { "unavailable" },
            upstreams,
        }
    }

    fn status_code(&self) -> StatusCode {
        if self.status == "ok" {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Serves `GET /healthcheck`: 200 while every upstream is ready, 503
/// otherwise, with per-upstream states in the body.
pub struct HealthServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<JoinHandle<()>>,
}

impl HealthServer {
    /// Bind `addr` and start serving. Port 0 picks a free port; see
    /// [`addr`](Self::addr).
    pub async fn start(addr: SocketAddr, upstreams: Vec<Arc<dyn Readiness>>) -> Result<Self> {
        let upstreams = Arc::new(upstreams);

        let route = warp::path("healthcheck")
            .and(warp::path::end())
            .and(warp::get())
            .map(move || {
                let report = HealthReport::collect(&upstreams);
                let code = report.status_code();
                warp::reply::with_status(warp::reply::json(&report), code)
            });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (addr, server) = warp::serve(route)
            .try_bind_with_graceful_shutdown(addr, async move {
                let _ = shutdown_rx.await;
            })
            .with_context(|| format!("Failed to bind health endpoint on {addr}"))?;

        tracing::info!("Health endpoint listening on http://{}/healthcheck", addr);
        let server_handle = tokio::spawn(server);

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting requests and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        tracing::debug!("Health endpoint stopped");
    }
}
