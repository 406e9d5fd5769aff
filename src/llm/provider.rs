// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model provider trait and streaming event vocabulary

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::glossary::GlossaryEntry;
use crate::session::Role;

/// Generation-stamped cooperative cancellation token.
///
/// Every external call receives one; a new request replaces and cancels the
/// previous generation, and stale completions are dropped by comparing
/// stamps rather than by reference identity.
#[derive(Debug, Clone)]
pub struct RequestToken {
    generation: u64,
    token: CancellationToken,
}

impl RequestToken {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            token: CancellationToken::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when the token is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// One entry of bounded recent history sent with a request
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Everything the model call needs. All free text has already been masked;
/// ghost chips never cross the process boundary in the clear.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelPayload {
    /// Model identifier, when configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Masked user content or apply instruction
    pub content: String,

    /// Bounded recent conversation history
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,

    /// Masked translator persona
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,

    /// Masked translation rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,

    /// Masked project context memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_context: Option<String>,

    /// Glossary hits embedded as reference pairs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub glossary_hits: Vec<GlossaryEntry>,

    /// Masked snapshot of the whole document, when relevant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_snapshot: Option<String>,

    /// Masked snapshot of the selection for apply-class requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_snapshot: Option<String>,

    /// Masked snapshots of pinned context blocks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_blocks: Vec<String>,
}

/// Events from a streaming model response.
///
/// `Cancelled` is a settlement, not an error: consumers treat it as a clean
/// reset of transient state.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// Partial output text
    Token(String),

    /// A tool invocation began
    ToolStart {
        name: String,
        args: serde_json::Value,
    },

    /// A tool invocation completed
    ToolEnd { name: String },

    /// Authoritative list of tools used, reported near completion
    ToolsUsed(Vec<String>),

    /// The stream completed; `final_text` replaces the token buffer when the
    /// transport provides a consolidated rendition
    Done { final_text: Option<String> },

    /// The cooperative cancellation token was observed
    Cancelled,

    /// Transport failure
    Error { message: String },
}

/// Boxed stream of model events
pub type ModelEventStream = Pin<Box<dyn Stream<Item = ModelEvent> + Send>>;

/// The external model streaming collaborator
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Start a streaming call. Implementations must observe the cancellation
    /// token and settle with `ModelEvent::Cancelled` when it fires.
    async fn invoke(&self, payload: ModelPayload, cancel: RequestToken) -> Result<ModelEventStream>;
}
