// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session and message types
//!
//! The message log is append-only: content is mutated only by the streaming
//! finalize commit and by explicit edit/delete actions, and deletion always
//! truncates from a point forward, never leaving gaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// System notice
    System,
}

/// What a suggestion offers to save
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    Rule,
    Context,
    Both,
}

/// A user-confirmable "save as rule/context" offer inferred from a response.
///
/// Offers only; persisted settings are never written without confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub content: String,
}

/// Apply-related metadata on an assistant response
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ApplyMeta {
    /// Whether the response may be applied to the document
    pub appliable: bool,
    /// Human-readable reason when blocked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    /// Selection offsets captured at request time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_end: Option<usize>,
}

/// Edit history for a message whose content was changed after the fact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditRecord {
    pub original_content: String,
    pub edited_at: DateTime<Utc>,
}

/// Strongly-typed message metadata
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct MessageMeta {
    /// Model that produced an assistant response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Tool names currently in progress (transient, for status display)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_in_progress: Vec<String>,

    /// Tool names that completed during the response
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_used: Vec<String>,

    /// Inferred save-as-rule/context offer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,

    /// Apply-class request metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyMeta>,

    /// Set when the message was edited after creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit: Option<EditRecord>,

    /// True when a transport failure was surfaced inline
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl MessageMeta {
    /// Merge another meta into this one. Populated fields win; existing
    /// values are kept where the incoming side is empty. Used by the
    /// finalize commit, which must merge rather than replace.
    pub fn merge(&mut self, other: MessageMeta) {
        if other.model.is_some() {
            self.model = other.model;
        }
        self.tools_in_progress = other.tools_in_progress;
        if !other.tools_used.is_empty() {
            self.tools_used = other.tools_used;
        }
        if other.suggestion.is_some() {
            self.suggestion = other.suggestion;
        }
        if other.apply.is_some() {
            self.apply = other.apply;
        }
        if other.edit.is_some() {
            self.edit = other.edit;
        }
        self.error = self.error || other.error;
    }
}

/// A message in a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub meta: MessageMeta,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            meta: MessageMeta::default(),
        }
    }

    /// Record an edit, keeping the pre-edit content the first time only
    pub fn apply_edit(&mut self, new_content: impl Into<String>) {
        if self.meta.edit.is_none() {
            self.meta.edit = Some(EditRecord {
                original_content: self.content.clone(),
                edited_at: Utc::now(),
            });
        } else if let Some(edit) = self.meta.edit.as_mut() {
            edit.edited_at = Utc::now();
        }
        self.content = new_content.into();
    }
}

/// Per-session auxiliary search toggles
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AuxSearchFlags {
    #[serde(default)]
    pub glossary: bool,
    #[serde(default)]
    pub web: bool,
}

/// A chat session owned by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    /// Document blocks pinned as conversation context
    #[serde(default)]
    pub context_block_ids: Vec<String>,
    #[serde(default)]
    pub aux_search: AuxSearchFlags,
}

impl ChatSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
            messages: Vec::new(),
            context_block_ids: Vec::new(),
            aux_search: AuxSearchFlags::default(),
        }
    }

    pub fn message(&self, id: Uuid) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: Uuid) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Last `limit` messages in chronological order
    pub fn recent_messages(&self, limit: usize) -> &[ChatMessage] {
        let skip = self.messages.len().saturating_sub(limit);
        &self.messages[skip..]
    }
}
