//! Route table and shared handler error mapping.
//!
//! | Method & path | Handler |
//! |---|---|
//! | `GET /` | [`chat::index`] |
//! | `POST /send` | [`chat::send`] |
//! | `POST /clear` | [`chat::clear`] |
//! | `GET /events` | [`events::stream`] |
//! | `GET /download` | [`tabs::download`] |
//! | `GET /tab/{preview,code,terminal,deployment}` | [`tabs`] |
//! | `GET /tab/code/file` | [`tabs::code_file`] |
//! | `GET /tab/code/filelist` | [`tabs::code_filelist`] |
//! | `POST /kill-preview-port` | [`tabs::kill_preview_port`] |
//! | `ANY /terminal/{*}` | [`proxy::terminal`] |
//! | `ANY /preview/{*}` | [`proxy::preview`] |
//! | `GET /static/*` | `tower_http::services::ServeDir` |

pub mod chat;
pub mod events;
pub mod proxy;
pub mod tabs;

use std::path::Path;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{any, get, post};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::middleware::wire_log;
use crate::state::AppState;

pub fn router(state: AppState, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(chat::index))
        .route("/send", post(chat::send))
        .route("/clear", post(chat::clear))
        .route("/events", get(events::stream))
        .route("/download", get(tabs::download))
        .route("/tab/preview", get(tabs::preview_tab))
        .route("/tab/code", get(tabs::code_tab))
        .route("/tab/terminal", get(tabs::terminal_tab))
        .route("/tab/deployment", get(tabs::deployment_tab))
        .route("/tab/code/file", get(tabs::code_file))
        .route("/tab/code/filelist", get(tabs::code_filelist))
        .route("/kill-preview-port", post(tabs::kill_preview_port))
        .route("/terminal", any(proxy::terminal))
        .route("/terminal/{*rest}", any(proxy::terminal))
        .route("/preview", any(proxy::preview))
        .route("/preview/{*rest}", any(proxy::preview))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(wire_log))
        .with_state(state)
}

pub(crate) fn bad_request(message: &str) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message.to_string())
}

pub(crate) fn upstream_failure(err: atelier::UpstreamError) -> (StatusCode, String) {
    tracing::error!(error = %err, "upstream request failed");
    (StatusCode::BAD_GATEWAY, "upstream unavailable".to_string())
}

pub(crate) fn template_failure(err: minijinja::Error) -> (StatusCode, String) {
    tracing::error!(error = %err, "template render failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "template error".to_string())
}
