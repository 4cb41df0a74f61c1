//! Artificial latency injection: an `axum::middleware::from_fn` that
//! wraps `next.run(request)` with a sampled or fixed sleep.

use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// One read or write delay profile: a fixed sleep, or a uniform range when
/// `min_ms > 0 && max_ms >= min_ms`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DelayParams {
    pub fixed_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayParams {
    fn sample_ms(&self) -> u64 {
        if self.min_ms > 0 && self.max_ms >= self.min_ms {
            if self.min_ms == self.max_ms {
                self.min_ms
            } else {
                rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
            }
        } else {
            self.fixed_ms
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DelayConfig {
    pub read: DelayParams,
    pub write: DelayParams,
}

fn bypasses_delay(path: &str) -> bool {
    path == "/health" || path.starts_with("/dashboard") || path.starts_with("/static/")
}

/// Sleep the configured amount for this request's read/write classification
/// before handing off to the rest of the stack.
pub async fn delay_layer(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if bypasses_delay(path) {
        return next.run(request).await;
    }

    let params = match *request.method() {
        Method::GET | Method::HEAD => state.delay.read,
        _ => state.delay.write,
    };

    let millis = params.sample_ms();
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    next.run(request).await
}
