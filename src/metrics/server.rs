//! The `/metrics` and `/health` HTTP surface.
//!
//! Runs on a dedicated background thread owning a small multi-thread tokio
//! runtime, so the rest of the daemon (the cleanup-cycle scheduler) stays
//! synchronous per the concurrency model in spec §5.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tokio::sync::Notify;

use crate::core::errors::{Result, StorageSageError};
use crate::health::HealthChecker;
use crate::metrics::registry::Metrics;

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    health: Arc<HealthChecker>,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    healthy: bool,
    components: std::collections::BTreeMap<String, bool>,
}

/// A running metrics/health HTTP server. Dropping the handle does not stop
/// the server — call [`ServerHandle::shutdown`] explicitly.
pub struct ServerHandle {
    addr: SocketAddr,
    notify: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal graceful shutdown and wait for the server thread to exit.
    pub fn shutdown(mut self) {
        self.notify.notify_one();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Start the `/metrics` + `/health` server on `port`, bound to all interfaces.
pub fn serve(port: u16, metrics: Arc<Metrics>, health: Arc<HealthChecker>) -> Result<ServerHandle> {
    let notify = Arc::new(Notify::new());
    let notify_for_thread = Arc::clone(&notify);
    let (addr_tx, addr_rx) = std::sync::mpsc::channel();

    let join = thread::Builder::new()
        .name("storagesage-metrics".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    let _ = addr_tx.send(Err(StorageSageError::Runtime {
                        details: format!("failed to start metrics runtime: {err}"),
                    }));
                    return;
                }
            };

            runtime.block_on(async move {
                let state = AppState { metrics, health };
                let app = Router::new()
                    .route("/metrics", get(metrics_handler))
                    .route("/health", get(health_handler))
                    .with_state(state);

                let bind_addr: SocketAddr = ([0, 0, 0, 0], port).into();
                let listener = match tokio::net::TcpListener::bind(bind_addr).await {
                    Ok(l) => l,
                    Err(err) => {
                        let _ = addr_tx.send(Err(StorageSageError::Runtime {
                            details: format!("failed to bind metrics port {port}: {err}"),
                        }));
                        return;
                    }
                };
                let bound = listener.local_addr().unwrap_or(bind_addr);
                let _ = addr_tx.send(Ok(bound));

                let shutdown_signal = async move { notify_for_thread.notified().await };
                let _ = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal)
                    .await;
            });
        })
        .map_err(|err| StorageSageError::Runtime {
            details: format!("failed to spawn metrics server thread: {err}"),
        })?;

    let addr = addr_rx
        .recv()
        .map_err(|_| StorageSageError::Runtime {
            details: "metrics server thread exited before binding".to_string(),
        })??;

    Ok(ServerHandle {
        addr,
        notify,
        join: Some(join),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// `axum`'s `get()` method router answers `HEAD /health` automatically by
/// running this same handler and discarding the body, so a `HEAD` request
/// gets the identical status code and headers with no body per spec §4.9 —
/// no separate `routing::head` registration is needed.
async fn health_handler(State(state): State<AppState>) -> Response {
    let healthy = state.health.overall_healthy();
    let components = state
        .health
        .snapshot()
        .into_iter()
        .map(|c| (c.name, c.healthy))
        .collect();
    let body = HealthBody {
        status: if healthy { "healthy" } else { "unhealthy" },
        healthy,
        components,
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthChecker;

    #[test]
    fn server_binds_and_serves_metrics_and_health() {
        let metrics = Arc::new(Metrics::new("storagesage").unwrap());
        let mut checker = HealthChecker::new(Arc::clone(&metrics));
        checker.register("config", std::time::Duration::from_secs(5), || Ok(()));
        let checker = Arc::new(checker);
        checker.run_once();

        let handle = serve(0, Arc::clone(&metrics), Arc::clone(&checker)).unwrap();
        let addr = handle.addr();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let metrics_resp = reqwest_like_get(addr, "/metrics").await;
            assert!(metrics_resp.contains("storagesage_daemon_healthy"));

            let health_resp = reqwest_like_get(addr, "/health").await;
            assert!(health_resp.contains("\"healthy\":true"));
        });

        handle.shutdown();
    }

    #[test]
    fn head_health_matches_get_status_with_no_body() {
        let metrics = Arc::new(Metrics::new("storagesage").unwrap());
        let mut checker = HealthChecker::new(Arc::clone(&metrics));
        checker.register("database", std::time::Duration::from_secs(5), || {
            Err(StorageSageError::AuditIntegrity {
                details: "corrupt".to_string(),
            })
        });
        let checker = Arc::new(checker);
        checker.run_once();

        let handle = serve(0, Arc::clone(&metrics), Arc::clone(&checker)).unwrap();
        let addr = handle.addr();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let head_resp = raw_request(addr, "HEAD", "/health").await;
            assert!(head_resp.starts_with("HTTP/1.1 503"));
            let body_start = head_resp.find("\r\n\r\n").map(|i| i + 4).unwrap_or(head_resp.len());
            assert!(head_resp[body_start..].is_empty(), "HEAD response must carry no body");

            let get_resp = raw_request(addr, "GET", "/health").await;
            assert!(get_resp.starts_with("HTTP/1.1 503"));
        });

        handle.shutdown();
    }

    /// Minimal hand-rolled HTTP/1.1 GET, avoiding a dev-dependency on a full
    /// HTTP client crate just to exercise these two routes in tests.
    async fn reqwest_like_get(addr: SocketAddr, path: &str) -> String {
        raw_request(addr, "GET", path).await
    }

    async fn raw_request(addr: SocketAddr, method: &str, path: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }
}
