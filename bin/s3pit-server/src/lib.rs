//! s3pit-server library crate: the router and everything it depends on,
//! split out from `main.rs` so integration tests can drive the full HTTP
//! stack in-process via `tower::ServiceExt::oneshot`.

pub mod auth_middleware;
pub mod config;
pub mod delay;
pub mod error;
pub mod handlers;
pub mod state;
pub mod xml;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, head, post, put},
    Router,
};
use state::AppState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Assemble the full S3 API router: routes, body limit, auth layer, delay
/// layer and request tracing, applied outermost last.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = DefaultBodyLimit::max(100 * 1024 * 1024);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/", get(handlers::list_buckets))
        .route("/{bucket}", put(handlers::create_bucket))
        .route("/{bucket}", delete(handlers::delete_bucket))
        .route("/{bucket}", head(handlers::head_bucket))
        .route("/{bucket}", get(handlers::list_objects))
        .route("/{bucket}", post(handlers::post_bucket))
        .route("/{bucket}/{*key}", put(handlers::put_object_dispatch))
        .route("/{bucket}/{*key}", get(handlers::get_object_dispatch))
        .route("/{bucket}/{*key}", head(handlers::head_object))
        .route(
            "/{bucket}/{*key}",
            delete(handlers::delete_object_dispatch),
        )
        .route("/{bucket}/{*key}", post(handlers::post_object_dispatch))
        .layer(body_limit)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::s3_auth_layer,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            delay::delay_layer,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
