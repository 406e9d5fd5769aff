// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session registry
//!
//! Owns the bounded set of chat sessions and the message log of each. All
//! session mutation routes through the registry; no other component touches
//! session contents directly, which serializes access through the single
//! engine actor.

use uuid::Uuid;

use crate::error::{LingoError, Result};
use crate::session::message::{ChatMessage, ChatSession};

/// Result of truncating a message log
#[derive(Debug, Clone, Default)]
pub struct TruncateOutcome {
    /// IDs removed, in chronological order. Callers must invalidate any
    /// streaming or anchor state that referenced one of these.
    pub removed: Vec<Uuid>,
}

/// Registry holding at most `cap` concurrent sessions
pub struct SessionRegistry {
    sessions: Vec<ChatSession>,
    active: Option<Uuid>,
    cap: usize,
}

impl SessionRegistry {
    pub fn new(cap: usize) -> Self {
        Self {
            sessions: Vec::new(),
            active: None,
            cap: cap.max(1),
        }
    }

    /// Create a session, or return the active session id unchanged when the
    /// cap is reached. Callers must treat creation as potentially idempotent.
    pub fn create(&mut self, name: Option<String>) -> Uuid {
        if self.sessions.len() >= self.cap {
            tracing::debug!(cap = self.cap, "session cap reached; create is a no-op");
            return self
                .active
                .or_else(|| self.sessions.first().map(|s| s.id))
                .expect("cap >= 1 implies at least one session exists");
        }

        let session = ChatSession::new(name.unwrap_or_default());
        let id = session.id;
        self.sessions.push(session);
        self.active = Some(id);
        id
    }

    pub fn switch(&mut self, id: Uuid) -> Result<()> {
        if self.sessions.iter().any(|s| s.id == id) {
            self.active = Some(id);
            Ok(())
        } else {
            Err(LingoError::Session(format!("unknown session {}", id)))
        }
    }

    /// Delete a session. Deleting the active session promotes the first
    /// remaining one; returns the new active id, if any session remains.
    pub fn delete(&mut self, id: Uuid) -> Option<Uuid> {
        self.sessions.retain(|s| s.id != id);
        if self.active == Some(id) {
            self.active = self.sessions.first().map(|s| s.id);
        }
        self.active
    }

    pub fn rename(&mut self, id: Uuid, name: impl Into<String>) -> Result<()> {
        let session = self
            .session_mut(id)
            .ok_or_else(|| LingoError::Session(format!("unknown session {}", id)))?;
        session.name = name.into();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active
    }

    pub fn active(&self) -> Option<&ChatSession> {
        self.active.and_then(|id| self.session(id))
    }

    pub fn active_mut(&mut self) -> Option<&mut ChatSession> {
        let id = self.active?;
        self.session_mut(id)
    }

    pub fn session(&self, id: Uuid) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: Uuid) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    /// Replace the whole session set, e.g. at project hydration
    pub fn hydrate(&mut self, sessions: Vec<ChatSession>, active: Option<Uuid>) {
        self.sessions = sessions;
        self.sessions.truncate(self.cap);
        self.active = active
            .filter(|id| self.sessions.iter().any(|s| s.id == *id))
            .or_else(|| self.sessions.first().map(|s| s.id));
    }

    /// Append a message to a session, returning the message id
    pub fn append_message(&mut self, session_id: Uuid, message: ChatMessage) -> Result<Uuid> {
        let session = self
            .session_mut(session_id)
            .ok_or_else(|| LingoError::Session(format!("unknown session {}", session_id)))?;
        let id = message.id;
        session.messages.push(message);
        Ok(id)
    }

    /// Mutate a message in place, searching every session
    pub fn update_message(
        &mut self,
        message_id: Uuid,
        patch: impl FnOnce(&mut ChatMessage),
    ) -> Result<()> {
        for session in &mut self.sessions {
            if let Some(message) = session.message_mut(message_id) {
                patch(message);
                return Ok(());
            }
        }
        Err(LingoError::Session(format!(
            "unknown message {}",
            message_id
        )))
    }

    pub fn find_message(&self, message_id: Uuid) -> Option<(&ChatSession, &ChatMessage)> {
        self.sessions.iter().find_map(|session| {
            session
                .message(message_id)
                .map(|message| (session, message))
        })
    }

    /// Remove a single message, leaving the rest of the log untouched.
    ///
    /// Used to reap an orphaned streaming placeholder; messages appended
    /// after it by a newer request must survive.
    pub fn remove_message(&mut self, message_id: Uuid) -> Result<()> {
        for session in &mut self.sessions {
            if let Some(idx) = session.messages.iter().position(|m| m.id == message_id) {
                session.messages.remove(idx);
                return Ok(());
            }
        }
        Err(LingoError::Session(format!(
            "unknown message {}",
            message_id
        )))
    }

    /// Remove a message and everything chronologically after it.
    ///
    /// Used by edit/delete/regenerate flows. Never leaves gaps.
    pub fn truncate_from(&mut self, message_id: Uuid) -> Result<TruncateOutcome> {
        for session in &mut self.sessions {
            if let Some(idx) = session.messages.iter().position(|m| m.id == message_id) {
                let removed = session
                    .messages
                    .drain(idx..)
                    .map(|m| m.id)
                    .collect::<Vec<_>>();
                return Ok(TruncateOutcome { removed });
            }
        }
        Err(LingoError::Session(format!(
            "unknown message {}",
            message_id
        )))
    }
}
