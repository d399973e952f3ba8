//! The HTML shell, the send-message handler, and session clear.

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use minijinja::context;
use serde::{Deserialize, Serialize};

use crate::cookies::{mint_session_token, session_cookie_value, session_token};
use crate::state::AppState;
use crate::templates;

use super::{bad_request, template_failure, upstream_failure};

#[derive(Debug, Clone, Serialize)]
struct ModelOption {
    value: String,
    label: String,
    selected: bool,
}

/// Flatten the provider list into `provider/model` select options with the
/// upstream default pre-selected.
fn model_options(state: &AppState) -> Vec<ModelOption> {
    let mut options = Vec::new();
    let mut providers: Vec<_> = state.providers.providers.iter().collect();
    providers.sort_by(|a, b| a.id.cmp(&b.id));

    for provider in providers {
        let default_model = state.providers.default.get(&provider.id);
        let mut models: Vec<_> = provider.models.values().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        for model in models {
            let label_provider = if provider.name.is_empty() {
                &provider.id
            } else {
                &provider.name
            };
            let label_model = if model.name.is_empty() {
                &model.id
            } else {
                &model.name
            };
            options.push(ModelOption {
                value: format!("{}/{}", provider.id, model.id),
                label: format!("{label_provider} / {label_model}"),
                selected: default_model == Some(&model.id),
            });
        }
    }

    if !options.iter().any(|o| o.selected) {
        if let Some(first) = options.first_mut() {
            first.selected = true;
        }
    } else {
        // Several providers may carry defaults; only one option may win.
        let mut seen = false;
        for option in &mut options {
            if option.selected {
                if seen {
                    option.selected = false;
                }
                seen = true;
            }
        }
    }
    options
}

/// `GET /`: render the shell and mint the session cookie when absent.
pub async fn index(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let minted = session_token(&headers).is_none();
    let token = session_token(&headers).unwrap_or_else(mint_session_token);

    let html = templates::render(
        &state.templates,
        "shell.html",
        context! { models => model_options(&state) },
    )
    .map_err(template_failure)?;

    let mut response = Html(html).into_response();
    if minted {
        if let Ok(value) = session_cookie_value(&token).parse() {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct SendForm {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub model: String,
}

/// `POST /send`: echo the user bubble synchronously, dispatch the model
/// call in a detached task. The reply arrives over the SSE channel only.
pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SendForm>,
) -> Result<Html<String>, (StatusCode, String)> {
    let token = session_token(&headers).ok_or_else(|| bad_request("missing session cookie"))?;

    let message = form.message.trim().to_string();
    if message.is_empty() {
        return Err(bad_request("message is required"));
    }
    let (provider_id, model_id) = form
        .model
        .split_once('/')
        .filter(|(provider, model)| !provider.is_empty() && !model.is_empty())
        .ok_or_else(|| bad_request("model must be provider/id"))?;

    let session_id = state
        .registry
        .get_or_create(&token)
        .await
        .map_err(upstream_failure)?;

    let html = templates::render(
        &state.templates,
        "user_message.html",
        context! { message => message },
    )
    .map_err(template_failure)?;

    let upstream = state.upstream.clone();
    let provider_id = provider_id.to_string();
    let model_id = model_id.to_string();
    tokio::spawn(async move {
        if let Err(err) = upstream
            .post_message(&session_id, &message, &provider_id, &model_id)
            .await
        {
            tracing::error!(%session_id, error = %err, "message dispatch failed");
        }
    });

    Ok(Html(html))
}

/// `POST /clear`: delete the upstream session and drop the binding; the
/// next request under the same cookie gets a fresh session.
pub async fn clear(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<&'static str>, (StatusCode, String)> {
    let token = session_token(&headers).ok_or_else(|| bad_request("missing session cookie"))?;
    state.registry.clear(&token).await;
    Ok(Html("<!-- -->"))
}
