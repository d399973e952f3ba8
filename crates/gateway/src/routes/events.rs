//! The SSE demultiplexer: one long-lived handler per browser connection.
//!
//! The upstream exposes a single global event stream; this handler opens
//! its own upstream connection, filters for the browser's session, folds
//! part updates into an insertion-ordered store, and emits fully rendered
//! `message` frames. Code-tab refresh frames ride the same channel, gated
//! by the process-wide limiter.
//!
//! Lifetime wiring: the reader task owns a drop-guard on the connection's
//! cancellation token. When the browser goes away the frame channel
//! closes, the task returns, the guard cancels the token, and any pending
//! limiter fire for this connection is skipped instead of writing into a
//! closed response.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::time::Duration;

use atelier::event::{self, EventEnvelope, PartKind};
use atelier::parts::PartsStore;
use atelier::EventError;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use futures_util::{Stream, StreamExt};
use minijinja::context;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::render;
use crate::state::AppState;
use crate::templates;

use super::tabs::collect_files;
use super::{bad_request, upstream_failure};

const FRAME_BUFFER: usize = 64;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// `GET /events`
pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let token = crate::cookies::session_token(&headers)
        .ok_or_else(|| bad_request("missing session cookie"))?;
    let session_id = state
        .registry
        .get_or_create(&token)
        .await
        .map_err(upstream_failure)?;
    let mut events = state.upstream.open_events().await.map_err(upstream_failure)?;
    tracing::info!(%session_id, "SSE stream opened");

    let (tx, rx) = mpsc::channel::<Event>(FRAME_BUFFER);
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let tx_watch = tx.clone();

    let mut conn = SseConnection {
        state,
        token,
        session_id,
        parts: PartsStore::new(),
        roles: HashMap::new(),
        first_sent: HashSet::new(),
        cancel,
        tx,
    };

    tokio::spawn(async move {
        let _guard = guard;
        loop {
            tokio::select! {
                _ = tx_watch.closed() => {
                    tracing::info!(session_id = %conn.session_id, "browser disconnected");
                    break;
                }
                payload = events.next_payload() => match payload {
                    Ok(Some(payload)) => {
                        if !conn.handle_payload(&payload).await {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!(session_id = %conn.session_id, "upstream event stream ended");
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(session_id = %conn.session_id, error = %err, "upstream event stream failed");
                        break;
                    }
                }
            }
        }
        tracing::info!(session_id = %conn.session_id, "SSE stream closed");
    });

    let frames = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    ))
}

/// Per-connection view state.
struct SseConnection {
    state: AppState,
    token: String,
    session_id: String,
    /// Parts observed on this connection; message ids are scoped to the
    /// bound session, so the store lives and dies with the connection.
    parts: PartsStore,
    /// Message id to role, filled from role-announcing events.
    roles: HashMap<String, String>,
    /// Message ids that already had a frame emitted downstream.
    first_sent: HashSet<String>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Event>,
}

impl SseConnection {
    /// Process one `data:` payload. Returns false once the downstream
    /// channel is gone and the handler should wind down.
    async fn handle_payload(&mut self, payload: &str) -> bool {
        let envelope: EventEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(error = %err, "skipping malformed envelope");
                return true;
            }
        };

        if let Some((message_id, role)) = event::role_update(&envelope, &self.session_id) {
            self.roles
                .entry(message_id.to_string())
                .or_insert_with(|| role.to_string());
            return true;
        }

        let update = match event::validate_part_update(&envelope, &self.session_id) {
            Ok(update) => update,
            Err(EventError::NotAPartUpdate | EventError::SessionMismatch) => return true,
            Err(err) => {
                tracing::debug!(error = %err, "skipping invalid part update");
                return true;
            }
        };

        // User messages were already echoed synchronously by the send
        // handler; only assistant output flows through this channel.
        if self
            .roles
            .get(&update.message_id)
            .is_some_and(|role| role == "user")
        {
            return true;
        }

        let rendered = render::render_part(&update.part);
        if let Err(err) = self.parts.update_part(&update.message_id, rendered) {
            tracing::debug!(error = %err, "skipping unstorable part");
            return true;
        }
        let snapshot = self.parts.get_parts(&update.message_id);

        let oob = self.first_sent.contains(&update.message_id);
        let html = match templates::render(
            &self.state.templates,
            "message.html",
            context! {
                message_id => update.message_id,
                oob => oob,
                parts => snapshot,
            },
        ) {
            Ok(html) => html,
            Err(err) => {
                tracing::error!(error = %err, "message render failed");
                return true;
            }
        };

        if self
            .tx
            .send(Event::default().event("message").data(html))
            .await
            .is_err()
        {
            return false;
        }
        self.first_sent.insert(update.message_id.clone());

        let file_hint = snapshot
            .iter()
            .any(|part| part.kind == PartKind::Tool && render::mentions_file_change(&part.content));
        let step_finished = snapshot
            .iter()
            .any(|part| part.kind == PartKind::StepFinish);
        if (file_hint || step_finished) && step_finished {
            self.schedule_code_updates();
        }
        true
    }

    fn schedule_code_updates(&self) {
        let state = self.state.clone();
        let token = self.token.clone();
        let tx = self.tx.clone();
        self.state
            .limiter
            .try_update(self.cancel.clone(), async move {
                send_code_updates(state, token, tx).await;
            });
    }
}

/// Compose and emit one `code-updates` frame.
async fn send_code_updates(state: AppState, token: String, tx: mpsc::Sender<Event>) {
    let stats = state.inspector.workspace_stats().await;
    let files = collect_files(&state.upstream).await;
    let current = state.selected_file(&token).unwrap_or_default();

    match templates::render(
        &state.templates,
        "code_updates.html",
        context! { stats => stats, files => files, current => current },
    ) {
        Ok(html) => {
            let _ = tx
                .send(Event::default().event("code-updates").data(html))
                .await;
        }
        Err(err) => tracing::error!(error = %err, "code-updates render failed"),
    }
}
