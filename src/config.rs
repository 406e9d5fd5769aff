// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Engine configuration
//!
//! Tunables for the conversational engine, stored as JSON. Every field has a
//! serde default so partial config files from older versions keep loading.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Configuration for the conversational engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of concurrent chat sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Coalescing window for durable writes, in milliseconds
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_ms: u64,

    /// Characters of surrounding text captured on each side of an apply anchor
    #[serde(default = "default_anchor_context_chars")]
    pub anchor_context_chars: usize,

    /// Maximum recent messages included in a model payload
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// How long a concurrent finalize waits before force-resetting, in milliseconds
    #[serde(default = "default_finalize_wait_ms")]
    pub finalize_wait_ms: u64,

    /// Maximum glossary hits embedded per request
    #[serde(default = "default_glossary_limit")]
    pub glossary_limit: usize,

    /// Model identifier passed to the streaming collaborator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

fn default_max_sessions() -> usize {
    3
}

fn default_coalesce_ms() -> u64 {
    800
}

fn default_anchor_context_chars() -> usize {
    200
}

fn default_history_limit() -> usize {
    12
}

fn default_finalize_wait_ms() -> u64 {
    1000
}

fn default_glossary_limit() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            coalesce_ms: default_coalesce_ms(),
            anchor_context_chars: default_anchor_context_chars(),
            history_limit: default_history_limit(),
            finalize_wait_ms: default_finalize_wait_ms(),
            glossary_limit: default_glossary_limit(),
            model: None,
        }
    }
}

impl EngineConfig {
    /// Default location of the engine home directory (`~/.lingo`)
    pub fn lingo_home() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lingo")
    }

    /// Load config from a JSON file, falling back to defaults when absent
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save config as pretty-printed JSON
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Coalescing window as a `Duration`
    pub fn coalesce_window(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.coalesce_ms)
    }

    /// Finalize wait bound as a `Duration`
    pub fn finalize_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.finalize_wait_ms)
    }
}
