//! Wire types for the upstream control plane.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::event::EventPart;

/// `POST /session` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
}

/// `GET /config/providers` reply.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersResponse {
    #[serde(default)]
    pub providers: Vec<Provider>,
    /// Default model id per provider id.
    #[serde(default)]
    pub default: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Provider {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub models: HashMap<String, ModelInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// One entry from `GET /file?path=...`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub absolute: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub ignored: bool,
}

impl FileNode {
    pub fn is_file(&self) -> bool {
        self.kind == "file"
    }

    pub fn is_directory(&self) -> bool {
        self.kind == "directory"
    }
}

/// `GET /file/content?path=...` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct FileContent {
    #[serde(default)]
    pub content: String,
}

/// `POST /session/{id}/message` body.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest {
    pub parts: Vec<TextPartInput>,
    pub model: ModelRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPartInput {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl TextPartInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelRef {
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

/// `POST /session/{id}/shell` body.
#[derive(Debug, Clone, Serialize)]
pub struct ShellRequest {
    pub agent: String,
    pub command: String,
}

/// Structured reply from the shell endpoint; one of its parts carries the
/// tool output string.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellResponse {
    #[serde(default)]
    pub parts: Vec<EventPart>,
}
