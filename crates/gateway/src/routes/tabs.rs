//! Workspace tab fragments, the file browser, preview port kill, and the
//! workspace download.

use std::collections::VecDeque;
use std::sync::Arc;

use atelier::UpstreamClient;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::Form;
use minijinja::context;
use serde::Deserialize;

use crate::cookies::session_token;
use crate::state::AppState;
use crate::templates;

use super::{template_failure, upstream_failure};

/// Caps for the recursive file walk behind the code tab select.
const MAX_FILES: usize = 500;
const MAX_DEPTH: usize = 4;

/// Walk the workspace tree through the upstream file API, breadth first,
/// skipping ignored entries. Listing errors prune that directory only.
pub(crate) async fn collect_files(upstream: &Arc<UpstreamClient>) -> Vec<String> {
    let mut files = Vec::new();
    let mut queue = VecDeque::from([(".".to_string(), 0usize)]);

    while let Some((dir, depth)) = queue.pop_front() {
        if files.len() >= MAX_FILES {
            break;
        }
        let nodes = match upstream.list_files(&dir).await {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::debug!(%dir, error = %err, "file listing failed");
                continue;
            }
        };
        for node in nodes {
            if node.ignored {
                continue;
            }
            if node.is_file() {
                files.push(node.path);
                if files.len() >= MAX_FILES {
                    break;
                }
            } else if node.is_directory() && depth + 1 < MAX_DEPTH {
                queue.push_back((node.path, depth + 1));
            }
        }
    }

    files.sort();
    files
}

pub async fn preview_tab(
    State(state): State<AppState>,
) -> Result<Html<String>, (StatusCode, String)> {
    render_preview_tab(&state).await
}

async fn render_preview_tab(state: &AppState) -> Result<Html<String>, (StatusCode, String)> {
    let ports = state.inspector.list_user_ports().await;
    let html = templates::render(
        &state.templates,
        "tab_preview.html",
        context! { port => ports.first().copied() },
    )
    .map_err(template_failure)?;
    Ok(Html(html))
}

pub async fn code_tab(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, (StatusCode, String)> {
    let stats = state.inspector.workspace_stats().await;
    let files = collect_files(&state.upstream).await;
    let current = session_token(&headers)
        .and_then(|token| state.selected_file(&token))
        .unwrap_or_default();

    let ctx = if current.is_empty() {
        context! { stats => stats, files => files, current => current }
    } else {
        match state.upstream.file_content(&current).await {
            Ok(content) => context! {
                stats => stats,
                files => files,
                current => current.clone(),
                path => current,
                content => content,
            },
            Err(err) => {
                tracing::warn!(path = %current, error = %err, "selected file fetch failed");
                context! { stats => stats, files => files, current => current }
            }
        }
    };

    let html = templates::render(&state.templates, "tab_code.html", ctx)
        .map_err(template_failure)?;
    Ok(Html(html))
}

pub async fn terminal_tab(
    State(state): State<AppState>,
) -> Result<Html<String>, (StatusCode, String)> {
    let html = templates::render(&state.templates, "tab_terminal.html", context! {})
        .map_err(template_failure)?;
    Ok(Html(html))
}

pub async fn deployment_tab(
    State(state): State<AppState>,
) -> Result<Html<String>, (StatusCode, String)> {
    let html = templates::render(&state.templates, "tab_deployment.html", context! {})
        .map_err(template_failure)?;
    Ok(Html(html))
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub path: String,
}

/// `GET /tab/code/file?path=...`; an empty path renders the placeholder.
pub async fn code_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FileQuery>,
) -> Result<Html<String>, (StatusCode, String)> {
    if query.path.is_empty() {
        let html = templates::render(&state.templates, "file_placeholder.html", context! {})
            .map_err(template_failure)?;
        return Ok(Html(html));
    }

    let content = state
        .upstream
        .file_content(&query.path)
        .await
        .map_err(upstream_failure)?;
    if let Some(token) = session_token(&headers) {
        state.remember_selected_file(&token, &query.path);
    }

    let html = templates::render(
        &state.templates,
        "file_view.html",
        context! { path => query.path, content => content },
    )
    .map_err(template_failure)?;
    Ok(Html(html))
}

#[derive(Debug, Deserialize)]
pub struct FileListQuery {
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub options_only: bool,
}

/// `GET /tab/code/filelist?current=...&options_only=...`; keeps `selected`
/// on the option matching `current`.
pub async fn code_filelist(
    State(state): State<AppState>,
    Query(query): Query<FileListQuery>,
) -> Result<Html<String>, (StatusCode, String)> {
    let files = collect_files(&state.upstream).await;
    let html = templates::render(
        &state.templates,
        "file_list.html",
        context! {
            files => files,
            current => query.current,
            options_only => query.options_only,
        },
    )
    .map_err(template_failure)?;
    Ok(Html(html))
}

#[derive(Debug, Deserialize)]
pub struct KillForm {
    pub port: u16,
}

/// `POST /kill-preview-port`: kill, then re-render the preview tab.
pub async fn kill_preview_port(
    State(state): State<AppState>,
    Form(form): Form<KillForm>,
) -> Result<Html<String>, (StatusCode, String)> {
    state.inspector.kill_port(form.port).await;
    render_preview_tab(&state).await
}

/// `GET /download`: stream the workspace as a zip archive.
pub async fn download(State(state): State<AppState>) -> Result<Response, (StatusCode, String)> {
    let body = state.sandbox.archive().await.map_err(|err| {
        tracing::error!(error = %err, "workspace archive failed");
        (StatusCode::BAD_GATEWAY, "archive unavailable".to_string())
    })?;

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"workspace.zip\"",
        )
        .body(body)
        .map_err(|err| {
            tracing::error!(error = %err, "archive response build failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "archive response failed".to_string(),
            )
        })?;
    Ok(response.into_response())
}
