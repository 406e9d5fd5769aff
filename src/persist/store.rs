// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Storage backends
//!
//! Durable storage is an idempotent upsert keyed by project id. The default
//! backend stores JSON files under the engine home directory; the in-memory
//! backend exists for tests and supports failure injection and load delays.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{LingoError, Result};
use crate::session::{AuxSearchFlags, ChatSession};

/// Project-scoped settings, hydrated at project open and overwritten by
/// every scheduled flush
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PersistedSettings {
    /// Translator persona text
    #[serde(default)]
    pub persona: String,
    /// Translation rules text
    #[serde(default)]
    pub rules: String,
    /// Project context memory
    #[serde(default)]
    pub project_context: String,
    /// Unsent composer draft
    #[serde(default)]
    pub composer_draft: String,
    /// Auxiliary search toggles
    #[serde(default)]
    pub search_toggles: AuxSearchFlags,
    /// Session used as translation context, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_context_session_id: Option<Uuid>,
    /// Domain filter applied to glossary lookups, e.g. "legal"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glossary_domain: Option<String>,
}

impl PersistedSettings {
    /// Whether enough translation guidance exists for translate-class
    /// requests to go to the model at all
    pub fn is_translation_configured(&self) -> bool {
        !self.persona.trim().is_empty()
            || !self.rules.trim().is_empty()
            || !self.project_context.trim().is_empty()
    }
}

/// The session state written per project
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionSnapshot {
    pub sessions: Vec<ChatSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<Uuid>,
}

/// Durable storage collaborator: idempotent upserts keyed by project id
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn load_sessions(&self, project_id: &str) -> Result<Option<SessionSnapshot>>;
    async fn save_sessions(&self, project_id: &str, snapshot: &SessionSnapshot) -> Result<()>;
    async fn load_settings(&self, project_id: &str) -> Result<Option<PersistedSettings>>;
    async fn save_settings(&self, project_id: &str, settings: &PersistedSettings) -> Result<()>;
}

/// JSON-file storage under a base directory, one subdirectory per project
pub struct JsonFileStore {
    base_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        // Project ids come from the editor layer; keep paths flat
        let safe: String = project_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(safe)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: PathBuf) -> Result<Option<T>> {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: Serialize>(&self, path: PathBuf, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(value)?;
        // Write-then-rename so a crash mid-write never truncates the file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for JsonFileStore {
    async fn load_sessions(&self, project_id: &str) -> Result<Option<SessionSnapshot>> {
        self.read_json(self.project_dir(project_id).join("sessions.json"))
            .await
    }

    async fn save_sessions(&self, project_id: &str, snapshot: &SessionSnapshot) -> Result<()> {
        self.write_json(self.project_dir(project_id).join("sessions.json"), snapshot)
            .await
    }

    async fn load_settings(&self, project_id: &str) -> Result<Option<PersistedSettings>> {
        self.read_json(self.project_dir(project_id).join("settings.json"))
            .await
    }

    async fn save_settings(&self, project_id: &str, settings: &PersistedSettings) -> Result<()> {
        self.write_json(self.project_dir(project_id).join("settings.json"), settings)
            .await
    }
}

/// In-memory storage backend for tests
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, SessionSnapshot>>,
    settings: Mutex<HashMap<String, PersistedSettings>>,
    save_count: AtomicUsize,
    fail_saves: AtomicBool,
    load_delay: Mutex<Option<std::time::Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total save calls (sessions + settings)
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    /// Make every save fail until turned off again
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Delay every load, to exercise stale-hydration handling
    pub fn set_load_delay(&self, delay: Option<std::time::Duration>) {
        *self.load_delay.lock().unwrap() = delay;
    }

    pub fn seed_sessions(&self, project_id: &str, snapshot: SessionSnapshot) {
        self.sessions
            .lock()
            .unwrap()
            .insert(project_id.to_string(), snapshot);
    }

    pub fn seed_settings(&self, project_id: &str, settings: PersistedSettings) {
        self.settings
            .lock()
            .unwrap()
            .insert(project_id.to_string(), settings);
    }

    pub fn stored_sessions(&self, project_id: &str) -> Option<SessionSnapshot> {
        self.sessions.lock().unwrap().get(project_id).cloned()
    }

    pub fn stored_settings(&self, project_id: &str) -> Option<PersistedSettings> {
        self.settings.lock().unwrap().get(project_id).cloned()
    }

    async fn maybe_delay(&self) {
        let delay = *self.load_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            Err(LingoError::Storage("injected save failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn load_sessions(&self, project_id: &str) -> Result<Option<SessionSnapshot>> {
        self.maybe_delay().await;
        Ok(self.sessions.lock().unwrap().get(project_id).cloned())
    }

    async fn save_sessions(&self, project_id: &str, snapshot: &SessionSnapshot) -> Result<()> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.sessions
            .lock()
            .unwrap()
            .insert(project_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn load_settings(&self, project_id: &str) -> Result<Option<PersistedSettings>> {
        self.maybe_delay().await;
        Ok(self.settings.lock().unwrap().get(project_id).cloned())
    }

    async fn save_settings(&self, project_id: &str, settings: &PersistedSettings) -> Result<()> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.settings
            .lock()
            .unwrap()
            .insert(project_id.to_string(), settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatMessage;
    use tempfile::TempDir;

    #[test]
    fn test_settings_translation_configured() {
        let mut settings = PersistedSettings::default();
        assert!(!settings.is_translation_configured());

        settings.rules = "use formal register".to_string();
        assert!(settings.is_translation_configured());

        settings.rules = "   ".to_string();
        assert!(!settings.is_translation_configured());

        settings.persona = "legal translator".to_string();
        assert!(settings.is_translation_configured());
    }

    #[tokio::test]
    async fn test_json_store_missing_project_loads_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().to_path_buf());

        assert!(store.load_sessions("nope").await.unwrap().is_none());
        assert!(store.load_settings("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_store_round_trip_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().to_path_buf());

        let mut session = ChatSession::new("draft review");
        session.messages.push(ChatMessage::user("hello"));
        let snapshot = SessionSnapshot {
            active: Some(session.id),
            sessions: vec![session],
        };

        store.save_sessions("proj-1", &snapshot).await.unwrap();
        let loaded = store.load_sessions("proj-1").await.unwrap().unwrap();
        assert_eq!(loaded.sessions.len(), 1);
        assert_eq!(loaded.sessions[0].name, "draft review");
        assert_eq!(loaded.active, snapshot.active);
    }

    #[tokio::test]
    async fn test_json_store_round_trip_settings() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().to_path_buf());

        let settings = PersistedSettings {
            persona: "technical translator".to_string(),
            composer_draft: "half-typed".to_string(),
            ..Default::default()
        };

        store.save_settings("proj-1", &settings).await.unwrap();
        let loaded = store.load_settings("proj-1").await.unwrap().unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn test_json_store_upsert_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().to_path_buf());

        let mut settings = PersistedSettings::default();
        store.save_settings("p", &settings).await.unwrap();
        settings.rules = "v2".to_string();
        store.save_settings("p", &settings).await.unwrap();

        let loaded = store.load_settings("p").await.unwrap().unwrap();
        assert_eq!(loaded.rules, "v2");
    }

    #[tokio::test]
    async fn test_json_store_sanitizes_project_path() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().to_path_buf());

        store
            .save_settings("../evil/project", &PersistedSettings::default())
            .await
            .unwrap();

        // Everything stays under the base directory
        assert!(temp_dir.path().join("___evil_project").exists());
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.set_fail_saves(true);

        let result = store
            .save_settings("p", &PersistedSettings::default())
            .await;
        assert!(result.is_err());
        assert_eq!(store.save_count(), 1);

        store.set_fail_saves(false);
        store
            .save_settings("p", &PersistedSettings::default())
            .await
            .unwrap();
        assert!(store.stored_settings("p").is_some());
    }
}
