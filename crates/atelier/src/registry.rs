//! Browser-token to upstream-session mapping.
//!
//! Bindings are created lazily on first sight of a token and destroyed
//! only by an explicit clear. Creation uses double-checked locking: the
//! common path is a shared read; a miss upgrades to the write lock,
//! re-checks, and only then creates a session upstream. The id is
//! immutable once published, so concurrent readers can never observe two
//! different sessions for one token.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::UpstreamError;
use crate::upstream::UpstreamClient;

pub struct SessionRegistry {
    upstream: Arc<UpstreamClient>,
    sessions: RwLock<HashMap<String, String>>,
}

impl SessionRegistry {
    pub fn new(upstream: Arc<UpstreamClient>) -> Self {
        Self {
            upstream,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the upstream session for `token`, creating one on first
    /// sight. On upstream failure the token stays unmapped so the next
    /// call retries.
    pub async fn get_or_create(&self, token: &str) -> Result<String, UpstreamError> {
        if let Some(id) = self.sessions.read().await.get(token) {
            return Ok(id.clone());
        }

        let mut sessions = self.sessions.write().await;
        if let Some(id) = sessions.get(token) {
            return Ok(id.clone());
        }
        let id = self.upstream.create_session().await?;
        tracing::info!(token, session_id = %id, "created upstream session");
        sessions.insert(token.to_string(), id.clone());
        Ok(id)
    }

    /// Current binding for `token`, if any. Never creates.
    pub async fn lookup(&self, token: &str) -> Option<String> {
        self.sessions.read().await.get(token).cloned()
    }

    /// Best-effort upstream delete, then drop the binding. The next access
    /// for the same token gets a fresh session.
    pub async fn clear(&self, token: &str) {
        let id = { self.sessions.read().await.get(token).cloned() };
        if let Some(id) = id {
            if let Err(err) = self.upstream.delete_session(&id).await {
                tracing::warn!(session_id = %id, error = %err, "failed to delete upstream session");
            }
        }
        self.sessions.write().await.remove(token);
    }
}
