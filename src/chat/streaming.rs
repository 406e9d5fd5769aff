// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming coordinator
//!
//! Owns the single in-flight model call. Token and tool events mutate
//! transient buffers only; the session message log is touched exactly once,
//! at finalize. Starting a new request cancels the previous one — requests
//! are never queued. Cancellation settles as a clean reset: the partial
//! buffer is discarded and nothing commits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::llm::RequestToken;
use crate::session::MessageMeta;

/// Coordinator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Requesting,
    Streaming,
    Finalizing,
}

/// Typed commands mutating the transient stream state
#[derive(Debug, Clone)]
pub enum StreamCommand {
    /// A request began for the given target message
    Begin {
        message_id: Uuid,
        model: Option<String>,
    },
    /// Partial output text arrived
    Token(String),
    /// A tool invocation started
    ToolStarted { name: String },
    /// A tool invocation completed
    ToolEnded { name: String },
    /// Authoritative tools-used list
    ToolsUsed(Vec<String>),
    /// The stream completed; `final_text` replaces the token buffer if set
    Finish { final_text: Option<String> },
    /// Transport failure
    Fail { message: String },
    /// Cooperative cancellation observed
    Abort,
}

/// The one-time commit produced by finalize
#[derive(Debug, Clone)]
pub struct FinalizedCommit {
    pub message_id: Uuid,
    /// Still masked; callers restore before committing to the log
    pub content: String,
    pub meta: MessageMeta,
    /// Transport failure message, when the stream failed
    pub failure: Option<String>,
}

#[derive(Debug, Default)]
struct TransientState {
    phase: StreamPhase,
    streaming_message_id: Option<Uuid>,
    content: String,
    final_text: Option<String>,
    model: Option<String>,
    tools_in_progress: Vec<String>,
    tools_used: Vec<String>,
    failure: Option<String>,
    aborted: bool,
}

/// Owns the single in-flight streaming response
pub struct StreamingCoordinator {
    state: Mutex<TransientState>,
    generation: AtomicU64,
    current_token: Mutex<Option<RequestToken>>,
    finalizing: AtomicBool,
    finalize_done: Notify,
    finalize_wait: Duration,
}

impl StreamingCoordinator {
    pub fn new(finalize_wait: Duration) -> Self {
        Self {
            state: Mutex::new(TransientState::default()),
            generation: AtomicU64::new(0),
            current_token: Mutex::new(None),
            finalizing: AtomicBool::new(false),
            finalize_done: Notify::new(),
            finalize_wait,
        }
    }

    /// Begin a new request, cancelling any previous one. At most one request
    /// is ever in flight; the prior one is aborted, never queued behind.
    pub fn start(&self) -> RequestToken {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = RequestToken::new(generation);

        {
            let mut current = self.current_token.lock().unwrap();
            if let Some(previous) = current.replace(token.clone()) {
                previous.cancel();
            }
        }

        let mut state = self.state.lock().unwrap();
        *state = TransientState {
            phase: StreamPhase::Requesting,
            ..Default::default()
        };
        tracing::debug!(generation, "stream request started");
        token
    }

    /// Whether a token belongs to the latest generation. Events carried by a
    /// stale token must be dropped, not applied.
    pub fn is_current(&self, token: &RequestToken) -> bool {
        token.generation() == self.generation.load(Ordering::SeqCst)
    }

    /// Apply a stream command to the transient buffers
    pub fn apply(&self, command: StreamCommand) {
        let mut state = self.state.lock().unwrap();
        match command {
            StreamCommand::Begin { message_id, model } => {
                state.phase = StreamPhase::Streaming;
                state.streaming_message_id = Some(message_id);
                state.model = model;
            }
            StreamCommand::Token(text) => {
                if state.phase == StreamPhase::Streaming {
                    state.content.push_str(&text);
                }
            }
            StreamCommand::ToolStarted { name } => {
                state.tools_in_progress.push(name);
            }
            StreamCommand::ToolEnded { name } => {
                state.tools_in_progress.retain(|n| n != &name);
                if !state.tools_used.contains(&name) {
                    state.tools_used.push(name);
                }
            }
            StreamCommand::ToolsUsed(list) => {
                state.tools_used = list;
            }
            StreamCommand::Finish { final_text } => {
                state.final_text = final_text;
            }
            StreamCommand::Fail { message } => {
                state.failure = Some(message);
            }
            StreamCommand::Abort => {
                *state = TransientState {
                    aborted: true,
                    ..Default::default()
                };
            }
        }
    }

    /// Cancel the in-flight request and discard its partial buffers
    pub fn abort(&self) {
        if let Some(token) = self.current_token.lock().unwrap().as_ref() {
            token.cancel();
        }
        self.apply(StreamCommand::Abort);
        tracing::debug!("stream aborted");
    }

    pub fn phase(&self) -> StreamPhase {
        self.state.lock().unwrap().phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase() != StreamPhase::Idle
    }

    pub fn streaming_message_id(&self) -> Option<Uuid> {
        self.state.lock().unwrap().streaming_message_id
    }

    /// One-time commit of the transient buffers.
    ///
    /// Generation-guarded: a caller holding a superseded token gets `None`
    /// without touching the buffers, which by then belong to the request
    /// that replaced it. Also guarded against reentry: a concurrent caller
    /// on the live generation waits up to the configured bound for the
    /// executing finalize, then force-resets so the engine always makes
    /// forward progress. Exactly one caller per streaming id receives
    /// `Some`.
    pub async fn finalize(&self, token: &RequestToken) -> Option<FinalizedCommit> {
        if !self.is_current(token) {
            tracing::debug!(
                generation = token.generation(),
                "finalize from superseded request dropped"
            );
            return None;
        }

        if self.finalizing.swap(true, Ordering::SeqCst) {
            if tokio::time::timeout(self.finalize_wait, self.finalize_done.notified())
                .await
                .is_err()
            {
                tracing::warn!("concurrent finalize timed out; force-resetting stream state");
                self.force_reset();
            }
            return None;
        }

        let commit = {
            let mut state = self.state.lock().unwrap();
            state.phase = StreamPhase::Finalizing;

            let commit = if state.aborted {
                None
            } else {
                state.streaming_message_id.map(|message_id| {
                    let content = state
                        .final_text
                        .take()
                        .unwrap_or_else(|| std::mem::take(&mut state.content));
                    FinalizedCommit {
                        message_id,
                        content,
                        meta: MessageMeta {
                            model: state.model.take(),
                            tools_used: std::mem::take(&mut state.tools_used),
                            error: state.failure.is_some(),
                            ..Default::default()
                        },
                        failure: state.failure.take(),
                    }
                })
            };

            *state = TransientState::default();
            commit
        };

        self.finalizing.store(false, Ordering::SeqCst);
        self.finalize_done.notify_waiters();
        commit
    }

    /// Drop all transient state unconditionally
    pub fn force_reset(&self) {
        if let Some(token) = self.current_token.lock().unwrap().take() {
            token.cancel();
        }
        *self.state.lock().unwrap() = TransientState::default();
        self.finalizing.store(false, Ordering::SeqCst);
        self.finalize_done.notify_waiters();
    }
}
