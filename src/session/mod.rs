// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat sessions and their single-writer registry

pub mod message;
pub mod registry;

pub use message::{
    ApplyMeta, AuxSearchFlags, ChatMessage, ChatSession, EditRecord, MessageMeta, Role,
    Suggestion, SuggestionKind,
};
pub use registry::{SessionRegistry, TruncateOutcome};
