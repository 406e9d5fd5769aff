// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Request orchestrator
//!
//! The single entry point for conversational requests. Owns the session
//! registry, the persisted settings, the streaming coordinator, the apply
//! anchor resolver, and the persistence scheduler, and wires them into the
//! send/stream/finalize round trip. All session mutation routes through
//! here; collaborators never touch the registry directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::anchor::{AnchorDescriptor, AnchorResolution, ApplyAnchorResolver, DocumentHandle};
use crate::chat::intent::{classify_intent, RequestIntent, TRANSLATE_REDIRECT};
use crate::chat::streaming::{StreamCommand, StreamingCoordinator};
use crate::chat::tracker::ToolCallTracker;
use crate::config::EngineConfig;
use crate::error::{LingoError, Result};
use crate::glossary::GlossaryLookup;
use crate::llm::{HistoryEntry, ModelEvent, ModelPayload, ModelProvider, RequestToken};
use crate::masking::{collect_chip_set, diff_missing, mask, restore, MaskSession};
use crate::persist::{
    FlushTarget, PersistedSettings, PersistenceScheduler, SessionSnapshot, StorageBackend,
};
use crate::session::{ApplyMeta, AuxSearchFlags, ChatMessage, ChatSession, Role, SessionRegistry};

const SESSION_NAME_CHARS: usize = 40;

/// Outcome of a send-class request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The response streamed and committed
    Completed { message_id: Uuid },
    /// A locally generated redirect was appended; no model call was made
    Redirected { message_id: Uuid },
    /// The request was cancelled; nothing committed
    Cancelled,
    /// The transport failed; the failure was surfaced inline
    Failed { message_id: Uuid, message: String },
}

/// Read-only source of referenced context blocks. The editor owns block
/// storage; the engine only snapshots current text into the payload.
pub trait ContextBlockSource: Send + Sync {
    /// Current text of a block, or `None` when it no longer exists
    fn block_text(&self, block_id: &str) -> Option<String>;
}

/// Engine state shared between the orchestrator and the flush target
struct SharedState {
    project_id: String,
    registry: SessionRegistry,
    settings: PersistedSettings,
}

/// Snapshots the shared state and upserts it to durable storage
struct StateFlusher {
    state: Arc<Mutex<SharedState>>,
    storage: Arc<dyn StorageBackend>,
}

#[async_trait::async_trait]
impl FlushTarget for StateFlusher {
    async fn flush(&self) -> Result<()> {
        // Snapshot under the lock, write outside it
        let (project_id, snapshot, settings) = {
            let state = self.state.lock().unwrap();
            (
                state.project_id.clone(),
                SessionSnapshot {
                    sessions: state.registry.sessions().to_vec(),
                    active: state.registry.active_id(),
                },
                state.settings.clone(),
            )
        };
        self.storage.save_sessions(&project_id, &snapshot).await?;
        self.storage.save_settings(&project_id, &settings).await?;
        Ok(())
    }
}

/// Inputs to one streaming round trip, gathered before the model call
struct StreamRequest {
    session_id: Uuid,
    /// Id of the trailing user message carrying the instruction; excluded
    /// from the history block
    instruction_id: Uuid,
    /// Raw instruction text, masked just before dispatch
    content: String,
    apply: Option<ApplyRequest>,
}

struct ApplyRequest {
    meta: ApplyMeta,
    /// Raw document text, when document scope
    document_text: Option<String>,
    /// Raw selection text, when selection scope
    selection_text: Option<String>,
    /// Chips that must survive the round trip for the response to be appliable
    required_chips: std::collections::BTreeSet<String>,
}

/// The conversational engine façade
pub struct RequestOrchestrator {
    config: EngineConfig,
    state: Arc<Mutex<SharedState>>,
    coordinator: Arc<StreamingCoordinator>,
    resolver: Mutex<ApplyAnchorResolver>,
    tracker: Mutex<ToolCallTracker>,
    scheduler: PersistenceScheduler,
    provider: Arc<dyn ModelProvider>,
    glossary: Option<Arc<dyn GlossaryLookup>>,
    blocks: Option<Arc<dyn ContextBlockSource>>,
    storage: Arc<dyn StorageBackend>,
    /// Bumped on every project switch; stale hydrations are discarded
    project_generation: AtomicU64,
}

impl RequestOrchestrator {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn ModelProvider>,
        storage: Arc<dyn StorageBackend>,
        glossary: Option<Arc<dyn GlossaryLookup>>,
    ) -> Self {
        let state = Arc::new(Mutex::new(SharedState {
            project_id: String::new(),
            registry: SessionRegistry::new(config.max_sessions),
            settings: PersistedSettings::default(),
        }));
        let flusher = Arc::new(StateFlusher {
            state: state.clone(),
            storage: storage.clone(),
        });
        let scheduler = PersistenceScheduler::new(flusher, config.coalesce_window());
        let coordinator = Arc::new(StreamingCoordinator::new(config.finalize_wait()));

        Self {
            config,
            state,
            coordinator,
            resolver: Mutex::new(ApplyAnchorResolver::new()),
            tracker: Mutex::new(ToolCallTracker::new()),
            scheduler,
            provider,
            glossary,
            blocks: None,
            storage,
            project_generation: AtomicU64::new(0),
        }
    }

    /// Attach the editor's context block source. Sessions referencing
    /// blocks get their current text snapshotted into each payload.
    pub fn with_block_source(mut self, blocks: Arc<dyn ContextBlockSource>) -> Self {
        self.blocks = Some(blocks);
        self
    }

    // ---- send flows ----

    /// Send a chat message on the active session and stream the response.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LingoError::InvalidInput("empty message".to_string()));
        }

        let (session_id, instruction_id, redirect) = {
            let mut state = self.state.lock().unwrap();
            let session_id = match state.registry.active_id() {
                Some(id) => id,
                None => state.registry.create(None),
            };
            let instruction_id = state
                .registry
                .append_message(session_id, ChatMessage::user(text))?;
            Self::name_session_from_first_message(&mut state.registry, session_id, text);

            let redirect = classify_intent(text) == RequestIntent::Translate
                && !state.settings.is_translation_configured();
            (session_id, instruction_id, redirect)
        };
        self.scheduler.notify_dirty();

        if redirect {
            // Translation guidance is missing; answer locally, never call out
            let message_id = {
                let mut state = self.state.lock().unwrap();
                state
                    .registry
                    .append_message(session_id, ChatMessage::assistant(TRANSLATE_REDIRECT))?
            };
            self.scheduler.notify_dirty();
            tracing::info!("translate request redirected; translation not configured");
            return Ok(SendOutcome::Redirected { message_id });
        }

        self.stream_response(StreamRequest {
            session_id,
            instruction_id,
            content: text.to_string(),
            apply: None,
        })
        .await
    }

    /// Send an apply-class request: capture the anchor and selection snapshot,
    /// then stream an edit proposal the caller may later apply.
    pub async fn send_apply_request(
        &self,
        instruction: &str,
        doc: &dyn DocumentHandle,
    ) -> Result<SendOutcome> {
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(LingoError::InvalidInput("empty instruction".to_string()));
        }

        let doc_text = doc.text();
        let selection = doc.selection().filter(|s| s.end > s.start);

        let (descriptor, apply) = match &selection {
            Some(sel) => {
                let descriptor = AnchorDescriptor::for_selection(
                    &doc_text,
                    sel,
                    self.config.anchor_context_chars,
                );
                let apply = ApplyRequest {
                    meta: ApplyMeta {
                        appliable: false,
                        blocked_reason: None,
                        selection_start: Some(sel.start),
                        selection_end: Some(sel.end),
                    },
                    document_text: None,
                    selection_text: Some(sel.text.clone()),
                    required_chips: collect_chip_set(&sel.text),
                };
                (descriptor, apply)
            }
            None => {
                let apply = ApplyRequest {
                    meta: ApplyMeta::default(),
                    document_text: Some(doc_text.clone()),
                    selection_text: None,
                    required_chips: collect_chip_set(&doc_text),
                };
                (AnchorDescriptor::for_document(), apply)
            }
        };
        self.resolver.lock().unwrap().capture(descriptor, doc);

        let (session_id, instruction_id) = {
            let mut state = self.state.lock().unwrap();
            let session_id = match state.registry.active_id() {
                Some(id) => id,
                None => state.registry.create(None),
            };
            let instruction_id = state
                .registry
                .append_message(session_id, ChatMessage::user(instruction))?;
            Self::name_session_from_first_message(&mut state.registry, session_id, instruction);
            (session_id, instruction_id)
        };
        self.scheduler.notify_dirty();

        self.stream_response(StreamRequest {
            session_id,
            instruction_id,
            content: instruction.to_string(),
            apply: Some(apply),
        })
        .await
    }

    /// Resolve the pending apply anchor against the live document. Single
    /// use: the anchor is consumed whether or not resolution succeeds.
    pub fn resolve_apply(&self, doc: &dyn DocumentHandle) -> AnchorResolution {
        self.resolver.lock().unwrap().resolve(doc)
    }

    /// Re-stream the response for an assistant message, discarding it and
    /// everything after it.
    pub async fn replay_message(&self, message_id: Uuid) -> Result<SendOutcome> {
        let (session_id, instruction_id, content) = {
            let mut state = self.state.lock().unwrap();
            let (session, message) = state
                .registry
                .find_message(message_id)
                .ok_or_else(|| LingoError::Session(format!("unknown message {}", message_id)))?;
            if message.role != Role::Assistant {
                return Err(LingoError::InvalidInput(
                    "only assistant messages can be replayed".to_string(),
                ));
            }
            let idx = session
                .messages
                .iter()
                .position(|m| m.id == message_id)
                .expect("message was just found");
            let user = session.messages[..idx]
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .ok_or_else(|| {
                    LingoError::InvalidInput("no user message precedes this response".to_string())
                })?;
            let triple = (session.id, user.id, user.content.clone());

            let removed = state.registry.truncate_from(message_id)?;
            self.invalidate_for_removed(&removed.removed);
            triple
        };
        self.scheduler.notify_dirty();

        self.stream_response(StreamRequest {
            session_id,
            instruction_id,
            content,
            apply: None,
        })
        .await
    }

    /// Edit a user message in place, discard everything after it, and
    /// re-stream the response from the edited text.
    pub async fn edit_message(&self, message_id: Uuid, new_content: &str) -> Result<SendOutcome> {
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Err(LingoError::InvalidInput("empty message".to_string()));
        }

        let session_id = {
            let mut state = self.state.lock().unwrap();
            let (session, message) = state
                .registry
                .find_message(message_id)
                .ok_or_else(|| LingoError::Session(format!("unknown message {}", message_id)))?;
            if message.role != Role::User {
                return Err(LingoError::InvalidInput(
                    "only user messages can be edited".to_string(),
                ));
            }
            let session_id = session.id;
            let idx = session
                .messages
                .iter()
                .position(|m| m.id == message_id)
                .expect("message was just found");
            let next_id = session.messages.get(idx + 1).map(|m| m.id);

            if let Some(next_id) = next_id {
                let removed = state.registry.truncate_from(next_id)?;
                self.invalidate_for_removed(&removed.removed);
            }
            state
                .registry
                .update_message(message_id, |m| m.apply_edit(new_content))?;
            session_id
        };
        self.scheduler.notify_dirty();

        self.stream_response(StreamRequest {
            session_id,
            instruction_id: message_id,
            content: new_content.to_string(),
            apply: None,
        })
        .await
    }

    /// Delete a message and everything after it.
    pub fn delete_message(&self, message_id: Uuid) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let removed = state.registry.truncate_from(message_id)?;
            self.invalidate_for_removed(&removed.removed);
        }
        self.scheduler.notify_dirty();
        Ok(())
    }

    // ---- streaming round trip ----

    async fn stream_response(&self, request: StreamRequest) -> Result<SendOutcome> {
        let mut masking = MaskSession::new();

        // Gather the payload under the lock, dispatch outside it
        let (payload_base, glossary_query, project_id, glossary_enabled, glossary_domain) = {
            let state = self.state.lock().unwrap();
            let session = state
                .registry
                .session(request.session_id)
                .ok_or_else(|| {
                    LingoError::Session(format!("unknown session {}", request.session_id))
                })?;

            let recent = session.recent_messages(self.config.history_limit + 1);
            let history: Vec<HistoryEntry> = recent
                .iter()
                .filter(|m| m.id != request.instruction_id)
                .map(|m| HistoryEntry {
                    role: m.role,
                    content: mask(&m.content, &mut masking),
                })
                .collect();

            let apply = request.apply.as_ref();
            let payload = ModelPayload {
                model: self.config.model.clone(),
                content: mask(&request.content, &mut masking),
                history,
                persona: Self::masked_nonblank(&state.settings.persona, &mut masking),
                rules: Self::masked_nonblank(&state.settings.rules, &mut masking),
                project_context: Self::masked_nonblank(
                    &state.settings.project_context,
                    &mut masking,
                ),
                glossary_hits: Vec::new(),
                document_snapshot: apply
                    .and_then(|a| a.document_text.as_deref())
                    .map(|t| mask(t, &mut masking)),
                selection_snapshot: apply
                    .and_then(|a| a.selection_text.as_deref())
                    .map(|t| mask(t, &mut masking)),
                context_blocks: self.block_snapshots(&session.context_block_ids, &mut masking),
            };
            (
                payload,
                request.content.clone(),
                state.project_id.clone(),
                // Project-wide toggle, or the session's own opt-in
                state.settings.search_toggles.glossary || session.aux_search.glossary,
                state.settings.glossary_domain.clone(),
            )
        };

        let mut payload = payload_base;
        if glossary_enabled {
            payload.glossary_hits = self
                .glossary_hits(&project_id, &glossary_query, glossary_domain.as_deref())
                .await;
        }

        // Placeholder the stream commits into
        let message_id = {
            let mut state = self.state.lock().unwrap();
            state
                .registry
                .append_message(request.session_id, ChatMessage::assistant(""))?
        };
        self.scheduler.notify_dirty();

        let token = self.coordinator.start();
        self.tracker.lock().unwrap().reset();
        self.coordinator.apply(StreamCommand::Begin {
            message_id,
            model: payload.model.clone(),
        });

        tracing::debug!(provider = self.provider.name(), "dispatching model request");
        match self.provider.invoke(payload, token.clone()).await {
            Ok(mut stream) => {
                while let Some(event) = stream.next().await {
                    if !self.coordinator.is_current(&token) {
                        tracing::debug!("dropping event from superseded request");
                        break;
                    }
                    match event {
                        ModelEvent::Token(text) => {
                            self.coordinator.apply(StreamCommand::Token(text));
                        }
                        ModelEvent::ToolStart { name, args } => {
                            self.tracker.lock().unwrap().on_tool_start(&name, &args);
                            self.coordinator.apply(StreamCommand::ToolStarted { name });
                        }
                        ModelEvent::ToolEnd { name } => {
                            self.tracker.lock().unwrap().on_tool_end(&name);
                            self.coordinator.apply(StreamCommand::ToolEnded { name });
                        }
                        ModelEvent::ToolsUsed(list) => {
                            self.tracker.lock().unwrap().on_tools_used(list.clone());
                            self.coordinator.apply(StreamCommand::ToolsUsed(list));
                        }
                        ModelEvent::Done { final_text } => {
                            self.coordinator.apply(StreamCommand::Finish { final_text });
                        }
                        ModelEvent::Cancelled => {
                            self.coordinator.apply(StreamCommand::Abort);
                            break;
                        }
                        ModelEvent::Error { message } => {
                            self.coordinator.apply(StreamCommand::Fail { message });
                        }
                    }
                }
            }
            Err(e) => {
                self.coordinator.apply(StreamCommand::Fail {
                    message: e.to_string(),
                });
            }
        }

        self.commit_finalized(message_id, &token, &masking, request.apply.as_ref())
            .await
    }

    /// Finalize the stream and commit exactly once into the message log.
    async fn commit_finalized(
        &self,
        placeholder_id: Uuid,
        token: &RequestToken,
        masking: &MaskSession,
        apply: Option<&ApplyRequest>,
    ) -> Result<SendOutcome> {
        let Some(commit) = self.coordinator.finalize(token).await else {
            // Cancelled or superseded: reap only this request's empty
            // placeholder. Messages a newer request appended after it must
            // survive. It may already be gone if a delete flow removed it.
            {
                let mut state = self.state.lock().unwrap();
                let _ = state.registry.remove_message(placeholder_id);
            }
            self.scheduler.notify_dirty();
            self.tracker.lock().unwrap().reset();
            return Ok(SendOutcome::Cancelled);
        };

        let restored = restore(&commit.content, masking);
        let suggestion = self.tracker.lock().unwrap().infer_suggestion(&restored);

        let mut meta = commit.meta;
        meta.suggestion = suggestion;

        if let Some(apply) = apply {
            let mut apply_meta = apply.meta.clone();
            if commit.failure.is_some() {
                apply_meta.appliable = false;
                apply_meta.blocked_reason = Some("response failed".to_string());
            } else {
                let missing = diff_missing(&apply.required_chips, &restored);
                if missing.is_empty() {
                    apply_meta.appliable = true;
                } else {
                    // Protected tokens were dropped; never apply a lossy edit
                    apply_meta.appliable = false;
                    apply_meta.blocked_reason =
                        Some(format!("missing placeholders: {}", missing.join(", ")));
                    tracing::warn!(
                        missing = missing.len(),
                        "apply blocked; placeholders dropped by the response"
                    );
                }
            }
            meta.apply = Some(apply_meta);
        }

        let content = match &commit.failure {
            Some(message) => format!("Response failed: {}", message),
            None => restored,
        };

        {
            let mut state = self.state.lock().unwrap();
            state.registry.update_message(commit.message_id, |m| {
                m.content = content;
                m.meta.merge(meta);
            })?;
        }
        self.scheduler.notify_dirty();
        self.tracker.lock().unwrap().reset();

        match commit.failure {
            Some(message) => Ok(SendOutcome::Failed {
                message_id: commit.message_id,
                message,
            }),
            None => Ok(SendOutcome::Completed {
                message_id: commit.message_id,
            }),
        }
    }

    /// Snapshot referenced context blocks, masked like every other payload
    /// field. Blocks the source can no longer serve are skipped.
    fn block_snapshots(&self, ids: &[String], masking: &mut MaskSession) -> Vec<String> {
        let Some(blocks) = &self.blocks else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| blocks.block_text(id))
            .map(|text| mask(&text, masking))
            .collect()
    }

    async fn glossary_hits(
        &self,
        project_id: &str,
        query: &str,
        domain: Option<&str>,
    ) -> Vec<crate::glossary::GlossaryEntry> {
        let Some(glossary) = &self.glossary else {
            return Vec::new();
        };
        // Best effort: lookup failures never block the request
        match glossary
            .search(project_id, query, domain, self.config.glossary_limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::debug!(error = %e, "glossary lookup failed; continuing without hits");
                Vec::new()
            }
        }
    }

    // ---- sessions and settings ----

    pub fn create_session(&self, name: Option<String>) -> Uuid {
        let id = self.state.lock().unwrap().registry.create(name);
        self.scheduler.notify_dirty();
        id
    }

    pub fn switch_session(&self, id: Uuid) -> Result<()> {
        self.coordinator.abort();
        self.resolver.lock().unwrap().invalidate();
        self.state.lock().unwrap().registry.switch(id)?;
        self.scheduler.notify_dirty();
        Ok(())
    }

    pub fn delete_session(&self, id: Uuid) -> Option<Uuid> {
        self.coordinator.abort();
        self.resolver.lock().unwrap().invalidate();
        let new_active = {
            let mut state = self.state.lock().unwrap();
            let new_active = state.registry.delete(id);
            if state.settings.translation_context_session_id == Some(id) {
                state.settings.translation_context_session_id = None;
            }
            new_active
        };
        self.scheduler.notify_dirty();
        new_active
    }

    pub fn rename_session(&self, id: Uuid, name: &str) -> Result<()> {
        self.state.lock().unwrap().registry.rename(id, name)?;
        self.scheduler.notify_dirty();
        Ok(())
    }

    pub fn update_settings(&self, patch: impl FnOnce(&mut PersistedSettings)) {
        patch(&mut self.state.lock().unwrap().settings);
        self.scheduler.notify_dirty();
    }

    /// Toggle a session's auxiliary search flags. A session can opt into
    /// glossary lookup even when the project-wide toggle is off.
    pub fn update_session_search(
        &self,
        session_id: Uuid,
        patch: impl FnOnce(&mut AuxSearchFlags),
    ) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let session = state.registry.session_mut(session_id).ok_or_else(|| {
                LingoError::Session(format!("unknown session {}", session_id))
            })?;
            patch(&mut session.aux_search);
        }
        self.scheduler.notify_dirty();
        Ok(())
    }

    pub fn pin_context_block(&self, session_id: Uuid, block_id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let session = state.registry.session_mut(session_id).ok_or_else(|| {
                LingoError::Session(format!("unknown session {}", session_id))
            })?;
            if !session.context_block_ids.iter().any(|b| b == block_id) {
                session.context_block_ids.push(block_id.to_string());
            }
        }
        self.scheduler.notify_dirty();
        Ok(())
    }

    pub fn unpin_context_block(&self, session_id: Uuid, block_id: &str) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            let session = state.registry.session_mut(session_id).ok_or_else(|| {
                LingoError::Session(format!("unknown session {}", session_id))
            })?;
            session.context_block_ids.retain(|b| b != block_id);
        }
        self.scheduler.notify_dirty();
        Ok(())
    }

    // ---- project lifecycle ----

    /// Open a project: flush the outgoing project, then hydrate state from
    /// storage. Safe to call while a previous open is still loading; the
    /// slower load settles as a stale no-op.
    pub async fn open_project(&self, project_id: &str) -> Result<()> {
        let generation = self.begin_project_switch(project_id).await;
        let loaded = self.load_project_state(project_id).await;
        match loaded {
            Ok((sessions, settings)) => {
                self.apply_hydration(project_id, generation, sessions, settings);
                Ok(())
            }
            Err(e) => {
                // Settle with defaults so the engine stays usable
                self.apply_hydration(project_id, generation, None, None);
                Err(e)
            }
        }
    }

    /// Phase one of a project switch: settle the outgoing project and enter
    /// hydration. Returns the generation stamp for `apply_hydration`.
    pub(crate) async fn begin_project_switch(&self, project_id: &str) -> u64 {
        // Flush the outgoing project; the scheduler drops the flush when a
        // previous hydration never finished, so defaults are never stored
        self.scheduler.flush_now().await;
        self.coordinator.abort();
        self.resolver.lock().unwrap().invalidate();
        self.scheduler.begin_hydration();
        self.state.lock().unwrap().project_id = project_id.to_string();
        self.project_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) async fn load_project_state(
        &self,
        project_id: &str,
    ) -> Result<(Option<SessionSnapshot>, Option<PersistedSettings>)> {
        let sessions = self.storage.load_sessions(project_id).await?;
        let settings = self.storage.load_settings(project_id).await?;
        Ok((sessions, settings))
    }

    /// Phase two: install loaded state, unless a newer switch superseded this
    /// one while the load was in flight.
    pub(crate) fn apply_hydration(
        &self,
        project_id: &str,
        generation: u64,
        sessions: Option<SessionSnapshot>,
        settings: Option<PersistedSettings>,
    ) -> bool {
        if self.project_generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(project_id, generation, "discarding stale hydration");
            return false;
        }

        {
            let mut state = self.state.lock().unwrap();
            let snapshot = sessions.unwrap_or_default();
            state.registry.hydrate(snapshot.sessions, snapshot.active);
            if state.registry.is_empty() {
                state.registry.create(None);
            }
            state.settings = settings.unwrap_or_default();
        }
        self.scheduler.end_hydration();
        tracing::info!(project_id, "project hydrated");
        true
    }

    /// Flush any pending durable write immediately.
    pub async fn flush(&self) {
        self.scheduler.flush_now().await;
    }

    // ---- accessors ----

    pub fn is_loading(&self) -> bool {
        self.coordinator.is_loading()
    }

    pub fn is_hydrating(&self) -> bool {
        self.scheduler.is_hydrating()
    }

    pub fn streaming_message_id(&self) -> Option<Uuid> {
        self.coordinator.streaming_message_id()
    }

    pub fn has_pending_apply(&self) -> bool {
        self.resolver.lock().unwrap().has_pending()
    }

    pub fn abort(&self) {
        self.coordinator.abort();
    }

    pub fn active_session_id(&self) -> Option<Uuid> {
        self.state.lock().unwrap().registry.active_id()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().registry.len()
    }

    pub fn sessions(&self) -> Vec<ChatSession> {
        self.state.lock().unwrap().registry.sessions().to_vec()
    }

    pub fn session_messages(&self, session_id: Uuid) -> Vec<ChatMessage> {
        self.state
            .lock()
            .unwrap()
            .registry
            .session(session_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    pub fn message(&self, message_id: Uuid) -> Option<ChatMessage> {
        self.state
            .lock()
            .unwrap()
            .registry
            .find_message(message_id)
            .map(|(_, m)| m.clone())
    }

    pub fn settings(&self) -> PersistedSettings {
        self.state.lock().unwrap().settings.clone()
    }

    // ---- helpers ----

    fn name_session_from_first_message(
        registry: &mut SessionRegistry,
        session_id: Uuid,
        text: &str,
    ) {
        if let Some(session) = registry.session_mut(session_id) {
            if session.name.is_empty() {
                session.name = text.chars().take(SESSION_NAME_CHARS).collect();
            }
        }
    }

    fn masked_nonblank(text: &str, masking: &mut MaskSession) -> Option<String> {
        if text.trim().is_empty() {
            None
        } else {
            Some(mask(text, masking))
        }
    }

    /// If a removed message was the streaming target or an apply anchor
    /// origin, invalidate that state. Called with the state lock held, which
    /// is fine: neither collaborator takes the state lock.
    fn invalidate_for_removed(&self, removed: &[Uuid]) {
        if let Some(streaming) = self.coordinator.streaming_message_id() {
            if removed.contains(&streaming) {
                self.coordinator.abort();
            }
        }
        if !removed.is_empty() {
            self.resolver.lock().unwrap().invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::Selection;
    use crate::llm::{MockProvider, MockScript};
    use crate::persist::MemoryStore;
    use std::collections::HashMap;

    fn orchestrator_with(provider: MockProvider) -> (RequestOrchestrator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let orch = RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(provider),
            store.clone(),
            None,
        );
        (orch, store)
    }

    fn configure_translation(orch: &RequestOrchestrator) {
        orch.update_settings(|s| s.rules = "formal register".to_string());
    }

    struct FixedGlossary;

    #[async_trait::async_trait]
    impl GlossaryLookup for FixedGlossary {
        async fn search(
            &self,
            _project_id: &str,
            _query: &str,
            _domain: Option<&str>,
            _limit: usize,
        ) -> Result<Vec<crate::glossary::GlossaryEntry>> {
            Ok(vec![crate::glossary::GlossaryEntry {
                source: "계약".to_string(),
                target: "contract".to_string(),
                domain: None,
                note: None,
            }])
        }
    }

    /// Document double backed by a plain string, no anchor tracking
    struct FixedDocument {
        text: Mutex<String>,
        selection: Option<Selection>,
        anchors: Mutex<HashMap<u64, (usize, usize)>>,
    }

    impl FixedDocument {
        fn new(text: &str, selection: Option<Selection>) -> Self {
            Self {
                text: Mutex::new(text.to_string()),
                selection,
                anchors: Mutex::new(HashMap::new()),
            }
        }
    }

    impl DocumentHandle for FixedDocument {
        fn text(&self) -> String {
            self.text.lock().unwrap().clone()
        }

        fn selection(&self) -> Option<Selection> {
            self.selection.clone()
        }

        fn create_anchor(&self, start: usize, end: usize) -> Option<u64> {
            let mut anchors = self.anchors.lock().unwrap();
            let handle = anchors.len() as u64 + 1;
            anchors.insert(handle, (start, end));
            Some(handle)
        }

        fn anchor_range(&self, handle: u64) -> Option<(usize, usize)> {
            self.anchors.lock().unwrap().get(&handle).copied()
        }

        fn remove_anchor(&self, handle: u64) {
            self.anchors.lock().unwrap().remove(&handle);
        }
    }

    #[tokio::test]
    async fn test_send_message_streams_and_commits() {
        let provider = MockProvider::with_script(MockScript::chunked(&["Hel", "lo"]));
        let (orch, _) = orchestrator_with(provider);

        let outcome = orch.send_message("hi there").await.unwrap();
        let SendOutcome::Completed { message_id } = outcome else {
            panic!("expected completion, got {:?}", outcome);
        };

        let message = orch.message(message_id).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "Hello");
        assert!(!orch.is_loading());
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (orch, _) = orchestrator_with(MockProvider::new());
        assert!(orch.send_message("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_first_message_names_session() {
        let (orch, _) = orchestrator_with(MockProvider::new());
        orch.send_message("explain the second clause").await.unwrap();

        let sessions = orch.sessions();
        assert_eq!(sessions[0].name, "explain the second clause");
    }

    #[tokio::test]
    async fn test_translate_without_configuration_redirects_locally() {
        let provider = MockProvider::new();
        let (orch, _) = orchestrator_with(provider.clone());

        let outcome = orch.send_message("이 문단 번역해줘").await.unwrap();
        let SendOutcome::Redirected { message_id } = outcome else {
            panic!("expected redirect, got {:?}", outcome);
        };

        // No model call, no streaming state
        assert_eq!(provider.call_count(), 0);
        assert!(!orch.is_loading());
        assert_eq!(orch.streaming_message_id(), None);

        let message = orch.message(message_id).unwrap();
        assert_eq!(message.content, TRANSLATE_REDIRECT);
    }

    #[tokio::test]
    async fn test_translate_with_configuration_reaches_model() {
        let provider = MockProvider::new();
        let (orch, _) = orchestrator_with(provider.clone());
        configure_translation(&orch);

        let outcome = orch.send_message("translate this sentence").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_chips_masked_in_payload_and_restored_in_commit() {
        let provider =
            MockProvider::with_script(MockScript::text("⟦G0⟧님, 안녕하세요 ⟦G1⟧⟦G2⟧⟦G3⟧"));
        let (orch, _) = orchestrator_with(provider.clone());

        let outcome = orch
            .send_message("greet {{user}} politely, keep <b>{count}</b>")
            .await
            .unwrap();
        let SendOutcome::Completed { message_id } = outcome else {
            panic!("expected completion");
        };

        // The payload never carried raw chips
        let payloads = provider.recorded_payloads();
        assert!(!payloads[0].content.contains("{{user}}"));
        assert!(payloads[0].content.contains("⟦G0⟧"));

        // The committed content carries the chips back
        let message = orch.message(message_id).unwrap();
        assert!(message.content.contains("{{user}}"));
        assert!(message.content.contains("{count}"));
        assert!(!message.content.contains("⟦G"));
    }

    #[tokio::test]
    async fn test_history_masked_and_excludes_instruction() {
        let provider = MockProvider::new();
        let (orch, _) = orchestrator_with(provider.clone());

        orch.send_message("first about {{user}}").await.unwrap();
        orch.send_message("second question").await.unwrap();

        let payloads = provider.recorded_payloads();
        let second = &payloads[1];
        // History holds the first exchange, never the instruction itself
        assert_eq!(second.history.len(), 2);
        assert!(second.history.iter().all(|h| h.content != "second question"));
        assert!(second
            .history
            .iter()
            .all(|h| !h.content.contains("{{user}}")));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_inline() {
        let provider = MockProvider::with_script(MockScript::error("connection reset"));
        let (orch, _) = orchestrator_with(provider);

        let outcome = orch.send_message("hello").await.unwrap();
        let SendOutcome::Failed {
            message_id,
            message,
        } = outcome
        else {
            panic!("expected failure, got {:?}", outcome);
        };
        assert_eq!(message, "connection reset");

        let committed = orch.message(message_id).unwrap();
        assert!(committed.content.contains("connection reset"));
        assert!(committed.meta.error);
        assert!(!orch.is_loading());
    }

    #[tokio::test]
    async fn test_cancelled_stream_removes_placeholder() {
        let provider = MockProvider::with_script(MockScript {
            events: vec![
                ModelEvent::Token("partial".to_string()),
                ModelEvent::Cancelled,
            ],
        });
        let (orch, _) = orchestrator_with(provider);

        let outcome = orch.send_message("hello").await.unwrap();
        assert_eq!(outcome, SendOutcome::Cancelled);

        // Only the user message remains; the placeholder is gone
        let session_id = orch.active_session_id().unwrap();
        let messages = orch.session_messages(session_id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(!orch.is_loading());
    }

    #[tokio::test]
    async fn test_apply_request_with_intact_chips_is_appliable() {
        let provider = MockProvider::with_script(MockScript::text("번역: ⟦G0⟧ 환영합니다"));
        let (orch, _) = orchestrator_with(provider);
        configure_translation(&orch);

        let doc = FixedDocument::new(
            "intro {{user}} welcome text",
            Some(Selection {
                start: 6,
                end: 27,
                text: "{{user}} welcome text".to_string(),
            }),
        );

        let outcome = orch.send_apply_request("translate this", &doc).await.unwrap();
        let SendOutcome::Completed { message_id } = outcome else {
            panic!("expected completion");
        };

        let apply = orch.message(message_id).unwrap().meta.apply.unwrap();
        assert!(apply.appliable);
        assert!(apply.blocked_reason.is_none());
        assert_eq!(apply.selection_start, Some(6));
        assert!(orch.has_pending_apply());
    }

    #[tokio::test]
    async fn test_apply_blocked_when_chip_dropped() {
        // Response omits the ⟦G0⟧ sentinel entirely
        let provider = MockProvider::with_script(MockScript::text("환영합니다"));
        let (orch, _) = orchestrator_with(provider);

        let doc = FixedDocument::new(
            "intro {{user}} welcome",
            Some(Selection {
                start: 6,
                end: 22,
                text: "{{user}} welcome".to_string(),
            }),
        );

        let outcome = orch.send_apply_request("rewrite", &doc).await.unwrap();
        let SendOutcome::Completed { message_id } = outcome else {
            panic!("expected completion");
        };

        let apply = orch.message(message_id).unwrap().meta.apply.unwrap();
        assert!(!apply.appliable);
        let reason = apply.blocked_reason.unwrap();
        assert!(reason.contains("missing placeholders"));
        assert!(reason.contains("{{user}}"));
    }

    #[tokio::test]
    async fn test_apply_without_selection_targets_document() {
        let provider = MockProvider::with_script(MockScript::text("rewritten"));
        let (orch, _) = orchestrator_with(provider.clone());

        let doc = FixedDocument::new("whole document body", None);
        orch.send_apply_request("tighten this", &doc).await.unwrap();

        let payloads = provider.recorded_payloads();
        assert_eq!(
            payloads[0].document_snapshot.as_deref(),
            Some("whole document body")
        );
        assert!(payloads[0].selection_snapshot.is_none());

        match orch.resolve_apply(&doc) {
            AnchorResolution::Resolved { start, end } => {
                assert_eq!(start, 0);
                assert_eq!(end, "whole document body".len());
            }
            other => panic!("expected resolution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replay_truncates_and_restreams() {
        let provider = MockProvider::with_scripts(vec![
            MockScript::text("first answer"),
            MockScript::text("second answer"),
        ]);
        let (orch, _) = orchestrator_with(provider.clone());

        let outcome = orch.send_message("question").await.unwrap();
        let SendOutcome::Completed { message_id } = outcome else {
            panic!("expected completion");
        };

        let outcome = orch.replay_message(message_id).await.unwrap();
        let SendOutcome::Completed {
            message_id: replayed,
        } = outcome
        else {
            panic!("expected completion");
        };

        assert_eq!(provider.call_count(), 2);
        let session_id = orch.active_session_id().unwrap();
        let messages = orch.session_messages(session_id);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, replayed);
        assert_eq!(messages[1].content, "second answer");
    }

    #[tokio::test]
    async fn test_replay_rejects_user_message() {
        let (orch, _) = orchestrator_with(MockProvider::new());
        orch.send_message("question").await.unwrap();

        let session_id = orch.active_session_id().unwrap();
        let user_id = orch.session_messages(session_id)[0].id;
        assert!(orch.replay_message(user_id).await.is_err());
    }

    #[tokio::test]
    async fn test_edit_message_records_original_and_restreams() {
        let provider = MockProvider::with_scripts(vec![
            MockScript::text("old answer"),
            MockScript::text("new answer"),
        ]);
        let (orch, _) = orchestrator_with(provider.clone());

        orch.send_message("original question").await.unwrap();
        let session_id = orch.active_session_id().unwrap();
        let user_id = orch.session_messages(session_id)[0].id;

        orch.edit_message(user_id, "revised question").await.unwrap();

        let messages = orch.session_messages(session_id);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "revised question");
        let edit = messages[0].meta.edit.clone().unwrap();
        assert_eq!(edit.original_content, "original question");
        assert_eq!(messages[1].content, "new answer");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_message_truncates_tail() {
        let (orch, _) = orchestrator_with(MockProvider::new());
        orch.send_message("one").await.unwrap();
        orch.send_message("two").await.unwrap();

        let session_id = orch.active_session_id().unwrap();
        let messages = orch.session_messages(session_id);
        assert_eq!(messages.len(), 4);

        orch.delete_message(messages[1].id).unwrap();
        let messages = orch.session_messages(session_id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "one");
    }

    #[tokio::test]
    async fn test_session_cap_create_is_idempotent() {
        let (orch, _) = orchestrator_with(MockProvider::new());
        let a = orch.create_session(Some("a".to_string()));
        let b = orch.create_session(Some("b".to_string()));
        let c = orch.create_session(Some("c".to_string()));
        assert_ne!(a, b);
        assert_ne!(b, c);

        // At the cap, creation returns the active id unchanged
        let d = orch.create_session(Some("d".to_string()));
        assert_eq!(d, c);
        assert_eq!(orch.session_count(), 3);
    }

    #[tokio::test]
    async fn test_delete_session_clears_translation_context_reference() {
        let (orch, _) = orchestrator_with(MockProvider::new());
        let id = orch.create_session(None);
        orch.update_settings(|s| s.translation_context_session_id = Some(id));

        orch.delete_session(id);
        assert!(orch.settings().translation_context_session_id.is_none());
    }

    #[tokio::test]
    async fn test_glossary_hits_gated_by_toggle() {
        let provider = MockProvider::new();
        let store = Arc::new(MemoryStore::new());
        let orch = RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(provider.clone()),
            store,
            Some(Arc::new(FixedGlossary)),
        );

        orch.send_message("define 계약").await.unwrap();
        assert!(provider.recorded_payloads()[0].glossary_hits.is_empty());

        orch.update_settings(|s| s.search_toggles.glossary = true);
        orch.send_message("define 계약 again").await.unwrap();
        assert_eq!(provider.recorded_payloads()[1].glossary_hits.len(), 1);
    }

    #[tokio::test]
    async fn test_glossary_failure_never_blocks_request() {
        struct FailingGlossary;

        #[async_trait::async_trait]
        impl GlossaryLookup for FailingGlossary {
            async fn search(
                &self,
                _project_id: &str,
                _query: &str,
                _domain: Option<&str>,
                _limit: usize,
            ) -> Result<Vec<crate::glossary::GlossaryEntry>> {
                Err(LingoError::Storage("index offline".to_string()))
            }
        }

        let store = Arc::new(MemoryStore::new());
        let orch = RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(MockProvider::new()),
            store,
            Some(Arc::new(FailingGlossary)),
        );
        orch.update_settings(|s| s.search_toggles.glossary = true);

        let outcome = orch.send_message("hello").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_session_glossary_flag_enables_lookup() {
        let provider = MockProvider::new();
        let store = Arc::new(MemoryStore::new());
        let orch = RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(provider.clone()),
            store,
            Some(Arc::new(FixedGlossary)),
        );

        // Project-wide toggle stays off; the session opts in on its own
        let session_id = orch.create_session(None);
        orch.update_session_search(session_id, |f| f.glossary = true)
            .unwrap();

        orch.send_message("define 계약").await.unwrap();
        assert_eq!(provider.recorded_payloads()[0].glossary_hits.len(), 1);
    }

    #[tokio::test]
    async fn test_glossary_domain_filter_reaches_lookup() {
        struct RecordingGlossary {
            domains: Mutex<Vec<Option<String>>>,
        }

        #[async_trait::async_trait]
        impl GlossaryLookup for RecordingGlossary {
            async fn search(
                &self,
                _project_id: &str,
                _query: &str,
                domain: Option<&str>,
                _limit: usize,
            ) -> Result<Vec<crate::glossary::GlossaryEntry>> {
                self.domains
                    .lock()
                    .unwrap()
                    .push(domain.map(str::to_string));
                Ok(Vec::new())
            }
        }

        let glossary = Arc::new(RecordingGlossary {
            domains: Mutex::new(Vec::new()),
        });
        let store = Arc::new(MemoryStore::new());
        let orch = RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(MockProvider::new()),
            store,
            Some(glossary.clone()),
        );
        orch.update_settings(|s| {
            s.search_toggles.glossary = true;
            s.glossary_domain = Some("legal".to_string());
        });

        orch.send_message("define 계약").await.unwrap();
        assert_eq!(
            glossary.domains.lock().unwrap().as_slice(),
            &[Some("legal".to_string())]
        );
    }

    #[tokio::test]
    async fn test_pinned_context_blocks_ride_in_payload() {
        struct FixedBlocks;

        impl ContextBlockSource for FixedBlocks {
            fn block_text(&self, block_id: &str) -> Option<String> {
                (block_id == "intro").then(|| "chapter intro for {{user}}".to_string())
            }
        }

        let provider = MockProvider::new();
        let store = Arc::new(MemoryStore::new());
        let orch = RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(provider.clone()),
            store,
            None,
        )
        .with_block_source(Arc::new(FixedBlocks));

        let session_id = orch.create_session(None);
        orch.pin_context_block(session_id, "intro").unwrap();
        orch.pin_context_block(session_id, "vanished").unwrap();

        orch.send_message("summarize the intro").await.unwrap();

        // Only the servable block rides along, masked like everything else
        let payloads = provider.recorded_payloads();
        assert_eq!(payloads[0].context_blocks.len(), 1);
        assert!(payloads[0].context_blocks[0].contains("chapter intro"));
        assert!(!payloads[0].context_blocks[0].contains("{{user}}"));
    }

    #[tokio::test]
    async fn test_unpinned_block_leaves_payload() {
        struct FixedBlocks;

        impl ContextBlockSource for FixedBlocks {
            fn block_text(&self, _block_id: &str) -> Option<String> {
                Some("block body".to_string())
            }
        }

        let provider = MockProvider::new();
        let store = Arc::new(MemoryStore::new());
        let orch = RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(provider.clone()),
            store,
            None,
        )
        .with_block_source(Arc::new(FixedBlocks));

        let session_id = orch.create_session(None);
        orch.pin_context_block(session_id, "intro").unwrap();
        orch.unpin_context_block(session_id, "intro").unwrap();

        orch.send_message("hello").await.unwrap();
        assert!(provider.recorded_payloads()[0].context_blocks.is_empty());
    }

    #[tokio::test]
    async fn test_superseded_request_cannot_destroy_successor_messages() {
        struct GatedProvider {
            started: Arc<tokio::sync::Notify>,
            release: Arc<tokio::sync::Notify>,
            calls: std::sync::atomic::AtomicUsize,
        }

        #[async_trait::async_trait]
        impl ModelProvider for GatedProvider {
            fn name(&self) -> &str {
                "gated"
            }

            async fn invoke(
                &self,
                _payload: ModelPayload,
                _token: RequestToken,
            ) -> Result<crate::llm::ModelEventStream> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    let started = self.started.clone();
                    let release = self.release.clone();
                    Ok(Box::pin(async_stream::stream! {
                        started.notify_one();
                        release.notified().await;
                        yield ModelEvent::Token("slow".to_string());
                        yield ModelEvent::Done {
                            final_text: Some("slow answer".to_string()),
                        };
                    }))
                } else {
                    Ok(Box::pin(async_stream::stream! {
                        yield ModelEvent::Done {
                            final_text: Some("fast answer".to_string()),
                        };
                    }))
                }
            }
        }

        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let provider = GatedProvider {
            started: started.clone(),
            release: release.clone(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let store = Arc::new(MemoryStore::new());
        let orch = Arc::new(RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(provider),
            store,
            None,
        ));

        // First request parks inside its stream; the second overtakes it
        let slow = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.send_message("first question").await.unwrap() })
        };
        started.notified().await;

        let fast = orch.send_message("second question").await.unwrap();
        let SendOutcome::Completed { message_id } = fast else {
            panic!("expected completion, got {:?}", fast);
        };

        release.notify_one();
        assert_eq!(slow.await.unwrap(), SendOutcome::Cancelled);

        // The stale request settled without committing its buffer and
        // without taking the successor's messages with it
        let session_id = orch.active_session_id().unwrap();
        let messages = orch.session_messages(session_id);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "first question");
        assert_eq!(messages[1].content, "second question");
        assert_eq!(messages[2].id, message_id);
        assert_eq!(messages[2].content, "fast answer");
    }

    #[tokio::test]
    async fn test_open_project_hydrates_sessions_and_settings() {
        let store = Arc::new(MemoryStore::new());
        let mut session = ChatSession::new("restored");
        session.messages.push(ChatMessage::user("earlier"));
        store.seed_sessions(
            "proj",
            SessionSnapshot {
                active: Some(session.id),
                sessions: vec![session.clone()],
            },
        );
        store.seed_settings(
            "proj",
            PersistedSettings {
                rules: "formal".to_string(),
                ..Default::default()
            },
        );

        let orch = RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(MockProvider::new()),
            store,
            None,
        );
        orch.open_project("proj").await.unwrap();

        assert_eq!(orch.active_session_id(), Some(session.id));
        assert_eq!(orch.sessions()[0].name, "restored");
        assert_eq!(orch.settings().rules, "formal");
        assert!(!orch.is_hydrating());
    }

    #[tokio::test]
    async fn test_open_project_without_stored_state_starts_fresh() {
        let (orch, _) = orchestrator_with(MockProvider::new());
        orch.open_project("fresh").await.unwrap();

        assert_eq!(orch.session_count(), 1);
        assert!(orch.settings().persona.is_empty());
    }

    #[tokio::test]
    async fn test_stale_hydration_discarded() {
        let store = Arc::new(MemoryStore::new());
        let orch = RequestOrchestrator::new(
            EngineConfig::default(),
            Arc::new(MockProvider::new()),
            store.clone(),
            None,
        );

        let slow_session = ChatSession::new("slow project");
        store.seed_sessions(
            "slow",
            SessionSnapshot {
                active: Some(slow_session.id),
                sessions: vec![slow_session],
            },
        );

        // A switch to "slow" begins, but "fast" supersedes it before the
        // slow load lands
        let slow_generation = orch.begin_project_switch("slow").await;
        let slow_loaded = orch.load_project_state("slow").await.unwrap();

        orch.open_project("fast").await.unwrap();

        let applied =
            orch.apply_hydration("slow", slow_generation, slow_loaded.0, slow_loaded.1);
        assert!(!applied);
        assert!(orch.sessions().iter().all(|s| s.name != "slow project"));
    }

    #[tokio::test]
    async fn test_flush_persists_state() {
        let (orch, store) = orchestrator_with(MockProvider::new());
        orch.open_project("proj").await.unwrap();
        orch.send_message("persist me").await.unwrap();

        orch.flush().await;
        let snapshot = store.stored_sessions("proj").unwrap();
        assert_eq!(snapshot.sessions[0].messages[0].content, "persist me");
    }
}
