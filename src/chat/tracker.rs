// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool call tracking and suggestion inference
//!
//! Records in-progress and completed tool invocations for status display,
//! and infers conservative "save as rule/context" offers from explicit
//! trigger phrasing. Inference is best-effort and non-blocking: a missed
//! match only skips the offer, and the tracker never writes settings itself.

use regex::Regex;
use std::sync::OnceLock;

use crate::session::{Suggestion, SuggestionKind};

fn rule_trigger() -> &'static Regex {
    static RULE_TRIGGER: OnceLock<Regex> = OnceLock::new();
    RULE_TRIGGER.get_or_init(|| {
        Regex::new(r"(?i)save (?:this |it )?as a rule|룰로 저장|규칙으로 저장")
            .expect("rule trigger must compile")
    })
}

fn context_trigger() -> &'static Regex {
    static CONTEXT_TRIGGER: OnceLock<Regex> = OnceLock::new();
    CONTEXT_TRIGGER.get_or_init(|| {
        Regex::new(r"(?i)save (?:this |it )?(?:as|to) (?:the )?context|컨텍스트로 저장|문맥으로 저장")
            .expect("context trigger must compile")
    })
}

/// Tool names that explicitly produce a suggestion of a given kind
const SUGGESTION_TOOLS: &[(&str, SuggestionKind)] = &[
    ("suggest_rule", SuggestionKind::Rule),
    ("suggest_context", SuggestionKind::Context),
];

/// Tracks tool activity for the current streaming response
#[derive(Debug, Default)]
pub struct ToolCallTracker {
    in_progress: Vec<String>,
    used: Vec<String>,
}

impl ToolCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tool_start(&mut self, name: &str, args: &serde_json::Value) {
        tracing::debug!(tool = name, %args, "tool started");
        self.in_progress.push(name.to_string());
    }

    pub fn on_tool_end(&mut self, name: &str) {
        self.in_progress.retain(|n| n != name);
        if !self.used.iter().any(|n| n == name) {
            self.used.push(name.to_string());
        }
    }

    /// Authoritative list reported by the transport near completion
    pub fn on_tools_used(&mut self, list: Vec<String>) {
        self.used = list;
    }

    pub fn in_progress(&self) -> &[String] {
        &self.in_progress
    }

    pub fn tools_used(&self) -> &[String] {
        &self.used
    }

    /// Clear all transient tracking between requests
    pub fn reset(&mut self) {
        self.in_progress.clear();
        self.used.clear();
    }

    /// Infer a save-as-rule/context offer from the decoded response text and
    /// the tools that fired. Conservative: only explicit trigger phrasing or
    /// an explicit suggestion-producing tool counts.
    pub fn infer_suggestion(&self, decoded_text: &str) -> Option<Suggestion> {
        let mut rule = rule_trigger().is_match(decoded_text);
        let mut context = context_trigger().is_match(decoded_text);

        for (tool, kind) in SUGGESTION_TOOLS {
            if self.used.iter().any(|n| n == tool) {
                match kind {
                    SuggestionKind::Rule => rule = true,
                    SuggestionKind::Context => context = true,
                    SuggestionKind::Both => {}
                }
            }
        }

        let kind = match (rule, context) {
            (true, true) => SuggestionKind::Both,
            (true, false) => SuggestionKind::Rule,
            (false, true) => SuggestionKind::Context,
            (false, false) => return None,
        };

        Some(Suggestion {
            kind,
            content: decoded_text.trim().to_string(),
        })
    }
}
