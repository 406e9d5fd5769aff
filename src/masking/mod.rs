// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Ghost-chip content masking
//!
//! Protects non-translatable placeholder tokens across a model round trip.

pub mod service;

pub use service::{collect_chip_set, diff_missing, mask, restore, MaskSession};
