mod lifecycle;
mod status;

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::Request,
    response::Response,
    routing::get,
};
use tower::ServiceExt;

use crate::app::health::sampler::MemoryProbe;
use crate::app::health::types::MemoryUsage;
use crate::error::AppResult;

/// Memory probe that always reports the same counters.
pub(crate) fn fixed_memory(heap_used_bytes: u64, rss_bytes: u64) -> impl MemoryProbe {
    move || -> AppResult<MemoryUsage> {
        Ok(MemoryUsage {
            heap_used_bytes,
            rss_bytes,
        })
    }
}

pub(crate) fn hello_router() -> Router {
    Router::new().route("/", get(|| async { "A" }))
}

pub(crate) async fn send(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub(crate) async fn body_text(resp: Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub(crate) async fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(resp).await).expect("json body")
}

/// Default histogram sampling publishes its first snapshot after 1s.
pub(crate) async fn first_sample() {
    tokio::time::sleep(Duration::from_millis(1100)).await;
}
