//! Insertion-ordered message-parts store.
//!
//! Each message is an ordered map of part-id to rendered part. The position
//! of a part-id is fixed the first time it is seen and never changes under
//! later updates, which is what keeps every emitted frame a
//! superset-in-position of the previous one. An [`IndexMap`] gives exactly
//! those semantics: replace-in-place keeps the original slot, new keys
//! append.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::error::StoreError;
use crate::event::PartKind;

/// A rendered message part as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagePart {
    pub part_id: String,
    pub kind: PartKind,
    /// Derived plain-text content (used for file-change hints).
    pub content: String,
    /// Pre-rendered HTML fragment for this part.
    pub html: String,
}

type MessageParts = Arc<Mutex<IndexMap<String, MessagePart>>>;

/// Per-message ordered storage with prefix-stable update semantics.
///
/// The outer map is read-locked on the hot path; the per-message map takes
/// an exclusive lock, so contention is per-message.
#[derive(Default)]
pub struct PartsStore {
    messages: RwLock<HashMap<String, MessageParts>>,
}

impl PartsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one part. Unknown part-ids append in first-seen
    /// order; known part-ids are overwritten in place.
    pub fn update_part(&self, message_id: &str, part: MessagePart) -> Result<(), StoreError> {
        if message_id.is_empty() {
            return Err(StoreError::EmptyMessageId);
        }
        if part.part_id.is_empty() {
            return Err(StoreError::EmptyPartId);
        }

        let entry = self.message_entry(message_id);
        let mut parts = entry.lock();
        parts.insert(part.part_id.clone(), part);
        Ok(())
    }

    /// Snapshot of the current parts for a message, in first-seen order.
    ///
    /// The snapshot is copied out under the per-message lock, so it is
    /// coherent with respect to concurrent updates.
    pub fn get_parts(&self, message_id: &str) -> Vec<MessagePart> {
        let entry = { self.messages.read().get(message_id).cloned() };
        match entry {
            Some(parts) => parts.lock().values().cloned().collect(),
            None => Vec::new(),
        }
    }

    fn message_entry(&self, message_id: &str) -> MessageParts {
        if let Some(entry) = self.messages.read().get(message_id) {
            return entry.clone();
        }
        let mut messages = self.messages.write();
        messages
            .entry(message_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(IndexMap::new())))
            .clone()
    }
}
