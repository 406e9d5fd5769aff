// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock model provider for testing
//!
//! A configurable, scriptable implementation of the `ModelProvider` trait
//! usable in unit and integration tests without a real transport.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::llm::provider::{
    ModelEvent, ModelEventStream, ModelPayload, ModelProvider, RequestToken,
};

/// A pre-scripted streaming response
#[derive(Clone, Debug, Default)]
pub struct MockScript {
    /// Events yielded in order
    pub events: Vec<ModelEvent>,
}

impl MockScript {
    /// Stream `text` as one token followed by a done event
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            events: vec![
                ModelEvent::Token(text.clone()),
                ModelEvent::Done {
                    final_text: Some(text),
                },
            ],
        }
    }

    /// Stream a sequence of token chunks, then done with the concatenation
    pub fn chunked(chunks: &[&str]) -> Self {
        let mut events: Vec<ModelEvent> = chunks
            .iter()
            .map(|c| ModelEvent::Token((*c).to_string()))
            .collect();
        events.push(ModelEvent::Done {
            final_text: Some(chunks.concat()),
        });
        Self { events }
    }

    /// Fail immediately with a transport error
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            events: vec![ModelEvent::Error {
                message: message.into(),
            }],
        }
    }

    /// Prepend tool activity before the text events
    pub fn with_tool(mut self, name: &str, args: serde_json::Value) -> Self {
        let mut events = vec![
            ModelEvent::ToolStart {
                name: name.to_string(),
                args,
            },
            ModelEvent::ToolEnd {
                name: name.to_string(),
            },
            ModelEvent::ToolsUsed(vec![name.to_string()]),
        ];
        events.append(&mut self.events);
        self.events = events;
        self
    }
}

/// A mock model provider with scripted responses
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    scripts: Arc<Mutex<Vec<MockScript>>>,
    call_count: Arc<AtomicUsize>,
    recorded_payloads: Arc<Mutex<Vec<ModelPayload>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            scripts: Arc::new(Mutex::new(vec![MockScript::text("mock response")])),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_payloads: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Replace the script queue. Scripts are consumed in order; the last one
    /// repeats once the queue would run dry.
    pub fn with_scripts(scripts: Vec<MockScript>) -> Self {
        let provider = Self::new();
        *provider.scripts.lock().unwrap() = scripts;
        provider
    }

    pub fn with_script(script: MockScript) -> Self {
        Self::with_scripts(vec![script])
    }

    /// Number of invoke calls so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Payloads recorded from every invoke call
    pub fn recorded_payloads(&self) -> Vec<ModelPayload> {
        self.recorded_payloads.lock().unwrap().clone()
    }

    fn next_script(&self) -> MockScript {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.len() > 1 {
            scripts.remove(0)
        } else {
            scripts.first().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        payload: ModelPayload,
        cancel: RequestToken,
    ) -> Result<ModelEventStream> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.recorded_payloads.lock().unwrap().push(payload);

        let script = self.next_script();
        let stream = async_stream::stream! {
            for event in script.events {
                if cancel.is_cancelled() {
                    yield ModelEvent::Cancelled;
                    return;
                }
                yield event;
                tokio::task::yield_now().await;
            }
        };
        Ok(Box::pin(stream))
    }
}
