//! Prometheus metrics and health HTTP endpoint.
//!
//! Routes:
//! - `/metrics`: Prometheus text format
//! - `/health`: liveness probe, `ok`
//! - anything else: a fixed HTML success page

use axum::response::Html;
use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{MetricsError, PrometheusInitSnafu};

const OK_PAGE: &str = "<html><body><h1>Ok</h1></body></html>";

/// Install the Prometheus recorder and serve the HTTP endpoint on `addr`
/// in a background task.
pub fn init(addr: SocketAddr) -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(run_server(addr, handle));

    Ok(())
}

/// Build the endpoint's routes around a recorder handle.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .fallback(ok_page_handler)
        .layer(Extension(handle))
}

async fn run_server(addr: SocketAddr, handle: PrometheusHandle) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind health server to {}: {}", addr, e);
            return;
        }
    };

    info!("Health endpoint listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, router(handle)).await {
        error!("Health server error: {}", e);
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}

async fn ok_page_handler() -> Html<&'static str> {
    Html(OK_PAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn request(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_health_and_fallback_pages() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(handle)).await.unwrap();
        });

        let health = request(addr, "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.ends_with("ok\n"));

        let page = request(addr, "/anything").await;
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains(OK_PAGE));
    }
}
