// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Model streaming collaborator
//!
//! Defines the abstraction over the external model transport. The engine
//! never speaks a wire protocol itself; it consumes a typed event stream.

pub mod mock_provider;
pub mod provider;

pub use mock_provider::{MockProvider, MockScript};
pub use provider::{
    HistoryEntry, ModelEvent, ModelEventStream, ModelPayload, ModelProvider, RequestToken,
};
