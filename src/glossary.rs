// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Glossary lookup collaborator
//!
//! Read-only, best-effort terminology search. Indexing internals live outside
//! the engine; lookup failures are swallowed by callers, never surfaced to
//! the conversation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A glossary entry returned by a lookup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlossaryEntry {
    /// Source-language term
    pub source: String,
    /// Approved target-language rendering
    pub target: String,
    /// Domain tag, e.g. "legal" or "medical"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Usage note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Black-box terminology lookup
#[async_trait]
pub trait GlossaryLookup: Send + Sync {
    async fn search(
        &self,
        project_id: &str,
        query: &str,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GlossaryEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serialization_skips_empty_optionals() {
        let entry = GlossaryEntry {
            source: "계약서".to_string(),
            target: "contract".to_string(),
            domain: None,
            note: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("domain"));
        assert!(!json.contains("note"));
    }

    #[test]
    fn test_entry_round_trip() {
        let entry = GlossaryEntry {
            source: "이행".to_string(),
            target: "performance".to_string(),
            domain: Some("legal".to_string()),
            note: Some("contract-law sense".to_string()),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let decoded: GlossaryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, entry);
    }
}
