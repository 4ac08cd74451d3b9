//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use portal_guard::config::{Environment, GuardConfig};
use portal_guard::lifecycle::Shutdown;
use portal_guard::security::{CsrfToken, RateLimiter};
use portal_guard::HttpServer;

/// A gate running on an ephemeral port.
pub struct TestGate {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

#[allow(dead_code)]
impl TestGate {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestGate {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Application routes standing in for the portal's handlers.
pub fn portal_routes() -> Router {
    Router::new()
        .route("/api/students", get(list_students).post(create_student))
        .route("/api/students/{id}", delete(|| async { Json(json!({"deleted": true})) }))
        .route("/api/auth/login", post(|| async { Json(json!({"ok": true})) }))
}

async fn list_students() -> Json<Value> {
    Json(json!({"students": []}))
}

async fn create_student(
    axum::Extension(token): axum::Extension<CsrfToken>,
    Json(body): Json<Value>,
) -> Json<Value> {
    Json(json!({"created": body, "tokenLength": token.0.len()}))
}

/// Start a gate with `config` in front of [`portal_routes`].
///
/// Runs in development mode so the token cookie is not marked `Secure` and
/// travels over plain HTTP.
pub async fn spawn_gate(config: GuardConfig) -> TestGate {
    spawn_gate_with(config, |server| server).await
}

/// Like [`spawn_gate`], letting the caller adjust the server before it runs.
pub async fn spawn_gate_with<F>(mut config: GuardConfig, customize: F) -> TestGate
where
    F: FnOnce(HttpServer) -> HttpServer,
{
    config.environment = Environment::Development;
    config.listener.bind_address = "127.0.0.1:0".into();
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (_updates_tx, updates) = mpsc::unbounded_channel();
    let server = customize(
        HttpServer::with_limiter(config, RateLimiter::in_memory()).with_app_routes(portal_routes()),
    );
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, updates, server_shutdown).await;
    });

    // Wait for the server to accept connections.
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    TestGate { addr, shutdown }
}
