// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Content masking service
//!
//! A fixed lexical grammar recognizes "ghost chips": placeholder and tag
//! tokens that must survive AI transformation unmodified. Before content
//! leaves the process, every chip occurrence is substituted with a short,
//! session-stable sentinel; after the response arrives, sentinels are mapped
//! back. The masking layer never guesses: a chip that does not come back is
//! reported, not repaired.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Recognized chip classes:
/// - double-brace interpolation: `{{name}}`, `{{user.email}}`
/// - single-brace positional/named: `{0}`, `{count}`
/// - printf escapes: `%s`, `%d`, `%1$s`
/// - XML-ish structural tags: `<b>`, `</b>`, `<x id="1"/>`
fn chip_regex() -> &'static Regex {
    static CHIP_REGEX: OnceLock<Regex> = OnceLock::new();
    CHIP_REGEX.get_or_init(|| {
        Regex::new(
            r"\{\{[^{}\s][^{}]*\}\}|\{[A-Za-z0-9_]+\}|%(?:\d+\$)?[sdif]|</?[A-Za-z][A-Za-z0-9-]*(?:\s[^<>]*)?/?>",
        )
        .expect("chip grammar must compile")
    })
}

/// Sentinels are `⟦G0⟧`, `⟦G1⟧`, ... The bracket characters sit outside every
/// chip class, so masked output never re-masks, and the token is short and
/// low-entropy enough that models tend to echo it untouched.
fn sentinel_regex() -> &'static Regex {
    static SENTINEL_REGEX: OnceLock<Regex> = OnceLock::new();
    SENTINEL_REGEX.get_or_init(|| Regex::new(r"⟦G\d+⟧").expect("sentinel pattern must compile"))
}

/// Request-scoped bidirectional map between chip text and sentinels.
///
/// Lives for the duration of one request/response round trip and is never
/// persisted. The same chip text always maps to the same sentinel within one
/// session; distinct chip texts never collide.
#[derive(Debug, Default)]
pub struct MaskSession {
    forward: HashMap<String, String>,
    reverse: HashMap<String, String>,
    counter: usize,
}

impl MaskSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sentinel for a chip, allocating on first sight
    fn sentinel_for(&mut self, chip: &str) -> String {
        if let Some(existing) = self.forward.get(chip) {
            return existing.clone();
        }
        let sentinel = format!("⟦G{}⟧", self.counter);
        self.counter += 1;
        self.forward.insert(chip.to_string(), sentinel.clone());
        self.reverse.insert(sentinel.clone(), chip.to_string());
        sentinel
    }

    /// Original chip text for a sentinel, if it was issued by this session
    fn chip_for(&self, sentinel: &str) -> Option<&str> {
        self.reverse.get(sentinel).map(String::as_str)
    }

    /// Number of distinct chips seen by this session
    pub fn chip_count(&self) -> usize {
        self.forward.len()
    }
}

/// Substitute every recognized chip with its session sentinel.
pub fn mask(text: &str, session: &mut MaskSession) -> String {
    chip_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            session.sentinel_for(&caps[0])
        })
        .into_owned()
}

/// Substitute sentinels issued by this session back to their chip text.
///
/// Unknown sentinels pass through verbatim; restoration never invents chips.
pub fn restore(text: &str, session: &MaskSession) -> String {
    sentinel_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            session
                .chip_for(&caps[0])
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// The set of distinct chip texts present in `text`.
pub fn collect_chip_set(text: &str) -> BTreeSet<String> {
    chip_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Chips from `required` that are absent from the decoded text.
///
/// The returned list feeds the human-readable apply-block reason; an empty
/// list means every protected token survived the round trip.
pub fn diff_missing(required: &BTreeSet<String>, decoded: &str) -> Vec<String> {
    required
        .iter()
        .filter(|chip| !decoded.contains(chip.as_str()))
        .cloned()
        .collect()
}
