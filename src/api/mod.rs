use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware::{auth, headers};
use crate::AppState;

pub mod handlers;

/// Build the token API router.
/// All routes are relative; the caller mounts this under `/v3`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let authenticated = Router::new()
        .route(
            "/tokens",
            get(handlers::list_tokens).post(handlers::derive_token),
        )
        .route("/tokens/logout", post(handlers::logout_current))
        .route(
            "/tokens/:id",
            get(handlers::get_token).delete(handlers::delete_token),
        )
        .route("/tokens/:id/logout", post(handlers::logout_token))
        .layer(middleware::from_fn_with_state(state, auth::authenticate));

    Router::new()
        // Login is authenticated by the identity provider, not by a token
        .route("/tokens/login", post(handlers::login))
        .merge(authenticated)
        .fallback(fallback_404)
}

/// Top-level application: health probes, the token API under `/v3`, and
/// response hardening.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/v3", api_router(state.clone()))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(headers::security_headers))
                .layer(middleware::from_fn(headers::request_id))
                .layer(TraceLayer::new_for_http()),
        )
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
