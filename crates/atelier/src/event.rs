//! Upstream event envelope model and the per-session part-update validator.
//!
//! The upstream emits one global SSE stream; every envelope carries a
//! `type` tag plus a `properties` object holding either a `part` (for
//! incremental message-part updates) or an `info` (for role-announcing
//! message updates). Session filtering is the gateway's responsibility,
//! so the validator takes the session id the consumer is bound to.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;

/// Envelope tag for incremental part updates.
pub const PART_UPDATED: &str = "message.part.updated";
/// Envelope tag for role-announcing message updates.
pub const MESSAGE_UPDATED: &str = "message.updated";

/// One envelope off the global upstream event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: EventProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventProperties {
    #[serde(default)]
    pub part: Option<EventPart>,
    #[serde(default)]
    pub info: Option<MessageInfo>,
}

/// Role-announcing message metadata (`message.updated`).
#[derive(Debug, Clone, Deserialize)]
pub struct MessageInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub role: String,
}

/// One incremental unit of an assistant message.
///
/// Kind-specific fields are optional; anything this model does not name is
/// preserved opaquely in `extra` so renderers can reach into it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventPart {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "sessionID")]
    pub session_id: String,
    #[serde(default, rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "type", default)]
    pub kind: PartKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ToolState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Execution state of a tool part.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ToolState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartKind {
    Text,
    Reasoning,
    Tool,
    File,
    Snapshot,
    Patch,
    Agent,
    StepStart,
    StepFinish,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PartKind {
    /// Stable lowercase name, matching the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            PartKind::Text => "text",
            PartKind::Reasoning => "reasoning",
            PartKind::Tool => "tool",
            PartKind::File => "file",
            PartKind::Snapshot => "snapshot",
            PartKind::Patch => "patch",
            PartKind::Agent => "agent",
            PartKind::StepStart => "step-start",
            PartKind::StepFinish => "step-finish",
            PartKind::Unknown => "unknown",
        }
    }
}

/// A validated part update, ready for the parts store.
#[derive(Debug, Clone, PartialEq)]
pub struct PartUpdate {
    pub message_id: String,
    pub part_id: String,
    pub part: EventPart,
}

/// Check one envelope against the session a consumer is bound to.
///
/// Pure; any error means "skip this event". Errors are checked in a fixed
/// order: envelope tag, session, message id, part id.
pub fn validate_part_update(
    envelope: &EventEnvelope,
    expected_session: &str,
) -> Result<PartUpdate, EventError> {
    if envelope.kind != PART_UPDATED {
        return Err(EventError::NotAPartUpdate);
    }
    let part = envelope
        .properties
        .part
        .as_ref()
        .ok_or(EventError::NotAPartUpdate)?;
    if part.session_id != expected_session {
        return Err(EventError::SessionMismatch);
    }
    if part.message_id.is_empty() {
        return Err(EventError::MissingMessageId);
    }
    if part.id.is_empty() {
        return Err(EventError::MissingPartId);
    }
    Ok(PartUpdate {
        message_id: part.message_id.clone(),
        part_id: part.id.clone(),
        part: part.clone(),
    })
}

/// Extract `(message_id, role)` from a role-announcing envelope bound to
/// `expected_session`, if that is what this envelope is.
pub fn role_update<'a>(
    envelope: &'a EventEnvelope,
    expected_session: &str,
) -> Option<(&'a str, &'a str)> {
    if envelope.kind != MESSAGE_UPDATED {
        return None;
    }
    let info = envelope.properties.info.as_ref()?;
    if info.session_id != expected_session || info.id.is_empty() {
        return None;
    }
    Some((&info.id, &info.role))
}
