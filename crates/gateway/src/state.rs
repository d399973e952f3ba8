//! Shared server state, cloned per request.

use std::collections::HashMap;
use std::sync::Arc;

use atelier::model::ProvidersResponse;
use atelier::{RefreshLimiter, SessionRegistry, UpstreamClient, WorkspaceInspector};
use minijinja::Environment;
use parking_lot::Mutex;

use crate::sandbox::Sandbox;

/// Process-wide state: the session registry, the workspace session id, the
/// providers list, the template set, the refresh limiter, the selected-file
/// map, and the sandbox handle.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<UpstreamClient>,
    pub registry: Arc<SessionRegistry>,
    pub inspector: Arc<WorkspaceInspector>,
    pub limiter: Arc<RefreshLimiter>,
    pub providers: Arc<ProvidersResponse>,
    pub templates: Arc<Environment<'static>>,
    /// Cookie token to last chosen file path; advisory only.
    pub selected_files: Arc<Mutex<HashMap<String, String>>>,
    pub sandbox: Arc<dyn Sandbox>,
    /// Untimed client used by the terminal and preview proxies.
    pub proxy_client: reqwest::Client,
    pub workspace_session: String,
}

impl AppState {
    pub fn selected_file(&self, token: &str) -> Option<String> {
        self.selected_files.lock().get(token).cloned()
    }

    pub fn remember_selected_file(&self, token: &str, path: &str) {
        self.selected_files
            .lock()
            .insert(token.to_string(), path.to_string());
    }
}

/// Client for the proxies: no timeout (streams stay open indefinitely),
/// no redirect following (the browser handles those itself).
pub fn proxy_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("proxy client construction cannot fail with static options")
}
