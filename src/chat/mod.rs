// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversational request handling
//!
//! The orchestrator façade, the streaming coordinator it delegates to, and
//! the transient tool-call tracker.

pub mod intent;
pub mod orchestrator;
pub mod streaming;
pub mod tracker;

pub use intent::{classify_intent, RequestIntent, TRANSLATE_REDIRECT};
pub use orchestrator::{ContextBlockSource, RequestOrchestrator, SendOutcome};
pub use streaming::{FinalizedCommit, StreamCommand, StreamPhase, StreamingCoordinator};
pub use tracker::ToolCallTracker;
