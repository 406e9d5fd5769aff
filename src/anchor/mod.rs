// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Apply-anchor capture and resolution
//!
//! Captures where a proposed AI edit should land at request time and
//! resolves that location against the live (possibly edited) document later.

pub mod resolver;

pub use resolver::{
    AnchorDescriptor, AnchorHandle, AnchorResolution, AnchorScope, ApplyAnchorResolver,
    DocumentHandle, Selection,
};
