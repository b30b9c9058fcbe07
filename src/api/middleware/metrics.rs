use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Route prefix without the session token, so tokens stay out of metrics.
fn route_label(path: &str) -> &str {
    if let Some(rest) = path.strip_prefix("/uploads/") {
        if let Some(idx) = rest.find('/') {
            return &path[.."/uploads/".len() + idx];
        }
    }
    path
}

pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let route = route_label(req.uri().path()).to_string();

    let response = next.run(req).await;

    let latency = start.elapsed();
    let status = response.status();

    info!(
        target: "metrics",
        method = %method,
        route = %route,
        status = %status.as_u16(),
        latency_ms = %latency.as_millis(),
        "request_completed"
    );

    response
}
