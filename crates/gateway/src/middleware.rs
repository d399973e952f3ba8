//! Wire-level response logging.
//!
//! Every non-streaming response is buffered and logged in full after the
//! handler returns. The SSE endpoint and the two proxy trees are exempt:
//! buffering would pin their streams open forever.

use axum::body::Body;
use axum::extract::Request;
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

const BYPASS_PREFIXES: &[&str] = &["/events", "/terminal", "/preview"];

/// Streaming endpoints whose responses must pass through untouched.
pub fn bypasses_wire_log(path: &str) -> bool {
    BYPASS_PREFIXES
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}

pub async fn wire_log(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if bypasses_wire_log(&path) {
        return next.run(req).await;
    }

    let response = next.run(req).await;
    let (parts, body) = response.into_parts();

    let is_event_stream = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"));
    if is_event_stream {
        return Response::from_parts(parts, body);
    }

    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            tracing::info!(
                "WIRE_OUT {} {} [{}]: {}",
                method,
                path,
                parts.status.as_u16(),
                String::from_utf8_lossy(&bytes)
            );
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(err) => {
            tracing::error!(%method, %path, error = %err, "failed to buffer response body");
            Response::from_parts(parts, Body::empty())
        }
    }
}
