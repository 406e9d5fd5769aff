// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anchor descriptor and resolver
//!
//! An anchor is single-use: captured exactly once per apply-class request,
//! resolved exactly once against the live document, then discarded. A stale
//! anchor must never be reused across requests, and resolution never applies
//! at a guessed location — when neither the tracked range nor a verbatim
//! search succeeds, it fails with an explicit reason.

use serde::{Deserialize, Serialize};

/// A selection in the document, in byte offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Opaque handle to an editor anchor decoration
pub type AnchorHandle = u64;

/// Read/write primitives the resolver needs from the editor surface.
///
/// The resolver depends only on these, never on editor internals. Implementors
/// are expected to drop or collapse anchor ranges when the underlying text is
/// edited out from under them.
pub trait DocumentHandle: Send + Sync {
    /// Full current document text
    fn text(&self) -> String;

    /// Current user selection, if any
    fn selection(&self) -> Option<Selection>;

    /// Track a range across edits; returns None if tracking is unavailable
    fn create_anchor(&self, start: usize, end: usize) -> Option<AnchorHandle>;

    /// Live range for a previously created anchor, if still tracked
    fn anchor_range(&self, handle: AnchorHandle) -> Option<(usize, usize)>;

    /// Release a tracked range
    fn remove_anchor(&self, handle: AnchorHandle);
}

/// Whether an edit targets the selection or the whole document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorScope {
    Selection,
    Document,
}

/// Where a proposed edit should land, captured at submission time
#[derive(Debug, Clone)]
pub struct AnchorDescriptor {
    pub scope: AnchorScope,
    pub start: usize,
    pub end: usize,
    pub selection_text: String,
    pub before_text: String,
    pub after_text: String,
}

impl AnchorDescriptor {
    /// Capture a selection anchor with a bounded window of surrounding text
    pub fn for_selection(doc_text: &str, selection: &Selection, context_chars: usize) -> Self {
        let start = floor_char_boundary(doc_text, selection.start.min(doc_text.len()));
        let end = floor_char_boundary(doc_text, selection.end.min(doc_text.len()));

        let before_text = tail_chars(&doc_text[..start], context_chars);
        let after_text = head_chars(&doc_text[end..], context_chars);

        Self {
            scope: AnchorScope::Selection,
            start,
            end,
            selection_text: selection.text.clone(),
            before_text,
            after_text,
        }
    }

    /// Whole-document rewrite anchor
    pub fn for_document() -> Self {
        Self {
            scope: AnchorScope::Document,
            start: 0,
            end: 0,
            selection_text: String::new(),
            before_text: String::new(),
            after_text: String::new(),
        }
    }
}

/// Outcome of resolving an anchor against the live document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorResolution {
    Resolved { start: usize, end: usize },
    Failed { reason: String },
}

impl AnchorResolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, AnchorResolution::Resolved { .. })
    }
}

/// Holds the single pending anchor for the in-flight apply request.
#[derive(Default)]
pub struct ApplyAnchorResolver {
    pending: Option<PendingAnchor>,
}

struct PendingAnchor {
    descriptor: AnchorDescriptor,
    handle: Option<AnchorHandle>,
}

impl ApplyAnchorResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the pending anchor, replacing (and releasing) any previous one.
    pub fn capture(&mut self, descriptor: AnchorDescriptor, doc: &dyn DocumentHandle) {
        self.clear(doc);
        let handle = match descriptor.scope {
            AnchorScope::Selection => doc.create_anchor(descriptor.start, descriptor.end),
            AnchorScope::Document => None,
        };
        self.pending = Some(PendingAnchor { descriptor, handle });
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolve and consume the pending anchor.
    ///
    /// Resolution order for selection scope: live tracked range if still
    /// present and non-degenerate, then verbatim substring search for the
    /// captured selection text, then explicit failure.
    pub fn resolve(&mut self, doc: &dyn DocumentHandle) -> AnchorResolution {
        let Some(pending) = self.pending.take() else {
            return AnchorResolution::Failed {
                reason: "no pending apply anchor".to_string(),
            };
        };

        if let Some(handle) = pending.handle {
            let tracked = doc.anchor_range(handle);
            doc.remove_anchor(handle);
            let doc_len = doc.text().len();
            if let Some((start, end)) = tracked {
                if end > start && end <= doc_len {
                    tracing::debug!(start, end, "anchor resolved via tracked range");
                    return AnchorResolution::Resolved { start, end };
                }
            }
        }

        match pending.descriptor.scope {
            AnchorScope::Document => {
                let len = doc.text().len();
                AnchorResolution::Resolved { start: 0, end: len }
            }
            AnchorScope::Selection => {
                let needle = &pending.descriptor.selection_text;
                if !needle.is_empty() {
                    if let Some(idx) = doc.text().find(needle.as_str()) {
                        tracing::debug!(idx, "anchor resolved via fallback search");
                        return AnchorResolution::Resolved {
                            start: idx,
                            end: idx + needle.len(),
                        };
                    }
                }
                AnchorResolution::Failed {
                    reason: format!(
                        "selection no longer present: \"{}\"",
                        head_chars(needle, 40)
                    ),
                }
            }
        }
    }

    /// Drop the pending anchor without a document handle. The editor-side
    /// decoration, if any, is left for the editor to reap with its buffer.
    pub fn invalidate(&mut self) {
        self.pending = None;
    }

    /// Discard the pending anchor and release its decoration.
    pub fn clear(&mut self, doc: &dyn DocumentHandle) {
        if let Some(pending) = self.pending.take() {
            if let Some(handle) = pending.handle {
                doc.remove_anchor(handle);
            }
        }
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn tail_chars(text: &str, count: usize) -> String {
    let total = text.chars().count();
    text.chars().skip(total.saturating_sub(count)).collect()
}

fn head_chars(text: &str, count: usize) -> String {
    text.chars().take(count).collect()
}
