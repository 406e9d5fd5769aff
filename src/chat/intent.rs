// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Request intent classification
//!
//! A cheap keyword scan deciding whether a message is a translate-class
//! request. Translate-class requests are gated on the project having any
//! translation guidance configured; everything else goes to the model as-is.

/// Coarse request classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestIntent {
    /// Asks for translation work; gated on translation configuration
    Translate,
    /// Everything else
    Chat,
}

const TRANSLATE_KEYWORDS: &[&str] = &["번역", "translate", "translation"];

/// Canned assistant reply for translate-class requests arriving before any
/// persona, rules, or project context exist. Emitted locally; no model call.
pub const TRANSLATE_REDIRECT: &str = "번역을 시작하기 전에 프로젝트의 번역 설정이 필요합니다. \
설정에서 번역가 페르소나, 번역 규칙 또는 프로젝트 컨텍스트를 먼저 입력해 주세요.";

/// Classify a message by keyword scan over its lowercased text.
pub fn classify_intent(text: &str) -> RequestIntent {
    let lowered = text.to_lowercase();
    if TRANSLATE_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        RequestIntent::Translate
    } else {
        RequestIntent::Chat
    }
}
