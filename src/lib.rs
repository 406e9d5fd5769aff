// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Lingo - conversational engine for AI-assisted document translation
//!
//! The engine behind a translation editor's chat panel: it masks protected
//! placeholder tokens before content leaves the process, streams model
//! responses into bounded chat sessions, anchors AI-proposed edits so they
//! land correctly in a document that may have changed, and coalesces durable
//! writes of session and settings state.
//!
//! Entry point is [`chat::RequestOrchestrator`]; the editor layer supplies a
//! [`llm::ModelProvider`] transport, a [`persist::StorageBackend`], and an
//! optional [`glossary::GlossaryLookup`].

pub mod anchor;
pub mod chat;
pub mod config;
pub mod error;
pub mod glossary;
pub mod llm;
pub mod masking;
pub mod persist;
pub mod session;

pub use error::{LingoError, Result};
