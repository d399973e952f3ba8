//! Live-stream test for the limiter-gated code-updates frames. Uses a
//! hand-rolled upstream whose event stream stays open, so frame timing is
//! observable instead of racing an EOF.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use atelier::model::ProvidersResponse;
use atelier::{RefreshLimiter, SessionRegistry, UpstreamClient, WorkspaceInspector};
use atelier_gateway::router;
use atelier_gateway::sandbox::Sandbox;
use atelier_gateway::state::{AppState, proxy_client};
use atelier_gateway::templates;
use axum::body::{Body, Bytes};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

struct StubSandbox;

#[async_trait]
impl Sandbox for StubSandbox {
    fn terminal_authority(&self) -> String {
        "127.0.0.1:59998".to_string()
    }

    fn app_host(&self) -> String {
        "127.0.0.1".to_string()
    }

    async fn archive(&self) -> anyhow::Result<Body> {
        Ok(Body::empty())
    }

    async fn stop(&self) {}
}

fn shell_reply() -> serde_json::Value {
    json!({
        "parts": [{
            "id": "p1",
            "sessionID": "ws",
            "messageID": "m1",
            "type": "tool",
            "tool": "bash",
            "state": { "status": "completed", "output": "3\n42\n" }
        }]
    })
}

/// Minimal upstream: fixed session, fixed shell stats, one-shot event
/// stream fed from a channel.
async fn spawn_upstream(events: mpsc::Receiver<String>) -> SocketAddr {
    let events = Arc::new(Mutex::new(Some(events)));
    let app = Router::new()
        .route(
            "/session",
            post(|| async { Json(json!({ "id": "ses_main" })) }),
        )
        .route(
            "/session/{id}/shell",
            post(|| async { Json(shell_reply()) }),
        )
        .route(
            "/file",
            get(|| async {
                Json(json!([
                    {
                        "name": "main.py",
                        "path": "main.py",
                        "absolute": "/workspace/main.py",
                        "type": "file",
                        "ignored": false
                    }
                ]))
            }),
        )
        .route(
            "/event",
            get(move || {
                let events = events.clone();
                async move {
                    let rx = events
                        .lock()
                        .take()
                        .expect("the event stream supports a single subscriber");
                    let stream =
                        ReceiverStream::new(rx).map(|s| Ok::<_, Infallible>(Bytes::from(s)));
                    Response::builder()
                        .header("content-type", "text/event-stream")
                        .body(Body::from_stream(stream))
                        .expect("response")
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_gateway(upstream_addr: SocketAddr) -> SocketAddr {
    let upstream =
        Arc::new(UpstreamClient::new(&format!("http://{upstream_addr}")).expect("client"));
    let state = AppState {
        registry: Arc::new(SessionRegistry::new(upstream.clone())),
        inspector: Arc::new(WorkspaceInspector::new(upstream.clone(), "ws", [])),
        limiter: Arc::new(RefreshLimiter::new(Duration::from_millis(100))),
        providers: Arc::new(ProvidersResponse::default()),
        templates: Arc::new(templates::build_environment().expect("templates")),
        selected_files: Arc::new(Mutex::new(HashMap::new())),
        sandbox: Arc::new(StubSandbox),
        proxy_client: proxy_client(),
        upstream,
        workspace_session: "ws".to_string(),
    };

    let app = router(state, Path::new("static"));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn payload(value: serde_json::Value) -> String {
    format!("data: {value}\n\n")
}

#[tokio::test]
async fn step_finish_with_file_hint_emits_code_updates() {
    let (tx, rx) = mpsc::channel::<String>(16);
    let upstream_addr = spawn_upstream(rx).await;
    let gateway_addr = spawn_gateway(upstream_addr).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{gateway_addr}/events"))
        .header("Cookie", "session=sess_live")
        .send()
        .await
        .expect("open SSE");
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    let mut body = resp.bytes_stream();

    tx.send(payload(json!({
        "type": "message.part.updated",
        "properties": {
            "part": {
                "id": "T",
                "sessionID": "ses_main",
                "messageID": "M",
                "type": "tool",
                "tool": "bash",
                "state": { "status": "completed", "output": "wrote main.py" }
            }
        }
    })))
    .await
    .unwrap();
    tx.send(payload(json!({
        "type": "message.part.updated",
        "properties": {
            "part": {
                "id": "F",
                "sessionID": "ses_main",
                "messageID": "M",
                "type": "step-finish"
            }
        }
    })))
    .await
    .unwrap();

    let mut collected = String::new();
    let wait = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = body.next().await {
            let chunk = chunk.expect("chunk");
            collected.push_str(&String::from_utf8_lossy(&chunk));
            let has_complete_code_updates = collected
                .split("event: code-updates")
                .nth(1)
                .is_some_and(|rest| rest.contains("\n\n"));
            if has_complete_code_updates {
                break;
            }
        }
    })
    .await;
    assert!(wait.is_ok(), "code-updates frame never arrived: {collected}");

    assert!(collected.contains("event: message"));
    assert!(collected.contains("wrote main.py"));

    let code_updates = collected
        .split("event: code-updates")
        .nth(1)
        .expect("code-updates frame");
    assert!(code_updates.contains("3 files"));
    assert!(code_updates.contains("42 lines"));
    assert!(code_updates.contains("main.py"));
    assert!(code_updates.contains("hx-swap-oob=\"true\""));

    drop(tx);
}
