// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Durable persistence
//!
//! Storage backends for session/settings state, plus the coalescing write
//! scheduler that keeps conversational mutation bursts from becoming write
//! storms.

pub mod scheduler;
pub mod store;

pub use scheduler::{FlushTarget, PersistenceScheduler};
pub use store::{JsonFileStore, MemoryStore, PersistedSettings, SessionSnapshot, StorageBackend};
