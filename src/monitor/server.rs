use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::Request,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use super::api::{self, AppState};
use super::embedded::Assets;
use super::hub::Hub;

/// Configuration for the monitor server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for a locally served UI
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            dev_mode: false,
        }
    }
}

/// Build the full application router: API, live feeds and the monitoring page.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api::api_router().fallback(static_handler).with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve embedded files, or `index.html` for page routes such as `/jobs/{id}`.
/// Unknown API paths stay JSON 404s.
async fn static_handler(req: Request) -> Response {
    let path = req.uri().path().trim_start_matches('/');

    if path == "api" || path.starts_with("api/") {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("no route for /{}", path)})),
        )
            .into_response();
    }

    if !path.is_empty()
        && let Some(content) = Assets::get(path)
    {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (
            [(header::CONTENT_TYPE, mime.as_ref().to_string())],
            content.data.into_owned(),
        )
            .into_response();
    }

    match Assets::get("index.html") {
        Some(content) => Html(String::from_utf8_lossy(&content.data).into_owned()).into_response(),
        None => (StatusCode::NOT_FOUND, "Monitoring page not embedded").into_response(),
    }
}

/// Serve the monitor until Ctrl-C, then shut the hub down.
///
/// Shutting the hub down closes every live subscription, which ends the
/// open SSE and WebSocket connections so the graceful shutdown can finish.
pub async fn start_server(config: ServerConfig, state: Arc<AppState>) -> Result<()> {
    let hub = state.hub.clone();
    let app = build_router(state, config.dev_mode);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, data_dir = %hub.store().dir().display(), "Foreman monitor listening");
    println!("Foreman monitor running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub.clone()))
        .await
        .context("Server error")?;

    // No-op if the signal path already ran it.
    hub.shutdown().await;
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(hub: Hub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    hub.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::api::tests::test_state;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_via_full_router() {
        let dir = TempDir::new().unwrap();
        let app = build_router(test_state(&dir), false);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let dir = TempDir::new().unwrap();
        let app = build_router(test_state(&dir), false);
        for uri in ["/api/jobs", "/api/stats"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_unknown_api_route_is_404() {
        let dir = TempDir::new().unwrap();
        let app = build_router(test_state(&dir), false);
        let req = Request::builder()
            .uri("/api/no/such/route")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_monitoring_page_served_for_root_and_job_routes() {
        let dir = TempDir::new().unwrap();
        let app = build_router(test_state(&dir), false);
        for uri in ["/", "/jobs/job-1"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
            assert!(
                resp.headers()[header::CONTENT_TYPE]
                    .to_str()
                    .unwrap()
                    .starts_with("text/html")
            );
            let body = resp.into_body().collect().await.unwrap().to_bytes();
            let html = String::from_utf8_lossy(&body);
            assert!(html.contains("Foreman monitor"), "{uri}");
            assert!(html.contains("/api/jobs"));
            assert!(html.contains("/events"));
        }
    }

    #[tokio::test]
    async fn test_embedded_file_served_with_mime_type() {
        let dir = TempDir::new().unwrap();
        let app = build_router(test_state(&dir), false);
        let req = Request::builder()
            .uri("/index.html")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html");
    }

    #[tokio::test]
    async fn test_dev_mode_adds_cors_headers() {
        let dir = TempDir::new().unwrap();
        let app = build_router(test_state(&dir), true);
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(
            resp.headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }

    #[tokio::test]
    async fn test_no_cors_headers_by_default() {
        let dir = TempDir::new().unwrap();
        let app = build_router(test_state(&dir), false);
        let req = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(
            !resp
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }
}
