//! Terminal and preview reverse proxies.
//!
//! Both strip their route prefix, preserve the query string, rewrite
//! `Origin` to the target authority, and forward everything else verbatim,
//! including WebSocket upgrade headers. An upstream `101 Switching
//! Protocols` is answered in kind; once both sides have upgraded, bytes
//! are pumped with `copy_bidirectional`. No frame-level handling needed.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use minijinja::context;

use crate::state::AppState;
use crate::templates;

use super::template_failure;

pub async fn terminal(State(state): State<AppState>, req: Request) -> Response {
    let authority = state.sandbox.terminal_authority();
    match forward(&state.proxy_client, req, "/terminal", &authority).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(%authority, error = %err, "terminal proxy failed");
            (StatusCode::BAD_GATEWAY, "terminal unavailable").into_response()
        }
    }
}

pub async fn preview(State(state): State<AppState>, req: Request) -> Response {
    let ports = state.inspector.list_user_ports().await;
    let Some(port) = ports.first().copied() else {
        return match templates::render(&state.templates, "preview_empty.html", context! {}) {
            Ok(html) => Html(html).into_response(),
            Err(err) => template_failure(err).into_response(),
        };
    };

    let authority = format!("{}:{}", state.sandbox.app_host(), port);
    match forward(&state.proxy_client, req, "/preview", &authority).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(port, error = %err, "preview proxy failed");
            let html = templates::render(
                &state.templates,
                "preview_error.html",
                context! { port => port },
            )
            .unwrap_or_else(|_| "<h1>Application unreachable</h1>".to_string());
            (StatusCode::BAD_GATEWAY, Html(html)).into_response()
        }
    }
}

async fn forward(
    client: &reqwest::Client,
    req: Request,
    prefix: &str,
    authority: &str,
) -> anyhow::Result<Response> {
    let (mut parts, body) = req.into_parts();

    let path = parts.uri.path().strip_prefix(prefix).unwrap_or("");
    let path = if path.is_empty() { "/" } else { path };
    let target = match parts.uri.query() {
        Some(query) => format!("http://{authority}{path}?{query}"),
        None => format!("http://{authority}{path}"),
    };

    let requests_upgrade = parts.headers.contains_key(header::UPGRADE);
    let on_upgrade = parts.extensions.remove::<OnUpgrade>();
    let headers = proxy_headers(&parts.headers, authority);

    let builder = client
        .request(parts.method.clone(), &target)
        .headers(headers);
    let builder = if requests_upgrade {
        builder
    } else {
        builder.body(reqwest::Body::wrap_stream(body.into_data_stream()))
    };
    let upstream = builder.send().await?;

    if upstream.status() == StatusCode::SWITCHING_PROTOCOLS {
        return Ok(bridge_upgrade(upstream, on_upgrade));
    }

    let mut response = Response::builder().status(upstream.status());
    if let Some(headers) = response.headers_mut() {
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name.as_str()) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    Ok(response.body(Body::from_stream(upstream.bytes_stream()))?)
}

/// Forwarded request headers: everything except `Host`, with `Origin`
/// rewritten to the target (the terminal server enforces origin).
fn proxy_headers(original: &HeaderMap, authority: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in original {
        if name == header::HOST {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Ok(origin) = HeaderValue::from_str(&format!("http://{authority}")) {
        headers.insert(header::ORIGIN, origin);
    }
    headers
}

/// Answer an upstream `101` and splice the two connections together.
fn bridge_upgrade(upstream: reqwest::Response, on_upgrade: Option<OnUpgrade>) -> Response {
    let Some(on_upgrade) = on_upgrade else {
        tracing::warn!("upstream switched protocols but the request cannot upgrade");
        return (StatusCode::BAD_GATEWAY, "upgrade not supported").into_response();
    };

    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    if let Some(headers) = response.headers_mut() {
        for (name, value) in upstream.headers() {
            headers.append(name.clone(), value.clone());
        }
    }

    tokio::spawn(async move {
        let mut upstream_io = match upstream.upgrade().await {
            Ok(io) => io,
            Err(err) => {
                tracing::warn!(error = %err, "upstream upgrade failed");
                return;
            }
        };
        let downstream_io = match on_upgrade.await {
            Ok(io) => io,
            Err(err) => {
                tracing::warn!(error = %err, "downstream upgrade failed");
                return;
            }
        };
        let mut downstream_io = TokioIo::new(downstream_io);
        match tokio::io::copy_bidirectional(&mut downstream_io, &mut upstream_io).await {
            Ok((to_upstream, to_downstream)) => {
                tracing::debug!(to_upstream, to_downstream, "upgraded connection closed");
            }
            Err(err) => tracing::debug!(error = %err, "upgraded connection errored"),
        }
    });

    response
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_upgrade_headers_are_preserved() {
        let mut original = HeaderMap::new();
        original.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        original.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        original.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        original.insert(
            "sec-websocket-key",
            HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
        );
        original.insert("sec-websocket-version", HeaderValue::from_static("13"));
        original.insert(header::ORIGIN, HeaderValue::from_static("http://gateway.local"));

        let headers = proxy_headers(&original, "172.17.0.2:7681");

        assert_eq!(headers.get(header::UPGRADE).unwrap(), "websocket");
        assert_eq!(headers.get(header::CONNECTION).unwrap(), "Upgrade");
        assert_eq!(
            headers.get("sec-websocket-key").unwrap(),
            "dGhlIHNhbXBsZSBub25jZQ=="
        );
        assert_eq!(headers.get("sec-websocket-version").unwrap(), "13");
        assert_eq!(
            headers.get(header::ORIGIN).unwrap(),
            "http://172.17.0.2:7681"
        );
        assert!(headers.get(header::HOST).is_none());
    }

    #[test]
    fn hop_by_hop_headers_are_recognized() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(is_hop_by_hop("KEEP-ALIVE"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("sec-websocket-accept"));
    }
}
