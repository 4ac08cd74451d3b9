//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gate's own endpoints and the app's routes
//! - Wire up middleware (request ID, tracing, timeout, body limit, gate)
//! - Bind server to listener
//! - Apply config reloads and sweep expired rate-limit windows
//! - Graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GuardConfig;
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, RequestIdExt};
use crate::security::rate_limit::RateLimitError;
use crate::security::{
    csrf_middleware, rate_limit_middleware, GuardPolicy, GuardState, IdentityResolver, RateLimiter,
};

/// HTTP server for the request gate.
pub struct HttpServer {
    config: GuardConfig,
    state: GuardState,
    app_routes: Router,
}

impl HttpServer {
    /// Create a server whose rate-limit store is the one selected in config.
    pub async fn connect(config: GuardConfig) -> Result<Self, RateLimitError> {
        let limiter = RateLimiter::connect(&config.rate_limit).await?;
        Ok(Self::with_limiter(config, limiter))
    }

    /// Create a server around an existing limiter.
    pub fn with_limiter(config: GuardConfig, limiter: RateLimiter) -> Self {
        tracing::info!(
            store = limiter.store().store_type(),
            csrf_enabled = config.csrf.enabled,
            rate_limit_enabled = config.rate_limit.enabled,
            "Request gate initialized"
        );
        let state = GuardState::new(GuardPolicy::from_config(&config), limiter);
        Self {
            config,
            state,
            app_routes: Router::new(),
        }
    }

    /// Mount application routes behind the gate.
    pub fn with_app_routes(mut self, routes: Router) -> Self {
        self.app_routes = self.app_routes.merge(routes);
        self
    }

    /// Resolve caller identities for per-user rate limiting. Runs ahead of
    /// the limiter, outside the application routes.
    pub fn with_identity_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.state = self.state.with_identity(resolver);
        self
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        Self::build_router(&self.config, self.state.clone(), self.app_routes.clone())
    }

    #[allow(deprecated)]
    fn build_router(config: &GuardConfig, state: GuardState, app_routes: Router) -> Router {
        // Layers run bottom-up: request ID first, rate limit before CSRF.
        Router::new()
            .route("/health", get(handlers::health).post(handlers::health))
            .route("/api/health", get(handlers::health))
            .route("/api/csrf-token", get(handlers::csrf_token))
            .merge(app_routes)
            .layer(middleware::from_fn_with_state(state.clone(), csrf_middleware))
            .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = request.request_id().unwrap_or("-"),
                )
            }))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// Run the server, accepting connections on the given listener until the
    /// shutdown signal fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GuardConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        // Apply hot reloads of the policy.
        let reload_state = self.state.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(config) => reload_state.reload(&config),
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        // Evict elapsed rate-limit windows.
        let sweep_every = Duration::from_secs(self.config.rate_limit.sweep_interval_secs.max(1));
        let sweep_state = self.state.clone();
        let mut sweep_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_every);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match sweep_state.limiter.store().purge_expired().await {
                            Ok(0) => {}
                            Ok(evicted) => tracing::debug!(evicted, "Purged expired rate-limit windows"),
                            Err(e) => tracing::warn!(error = %e, "Rate-limit sweep failed"),
                        }
                    }
                    _ = sweep_shutdown.recv() => break,
                }
            }
        });

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
