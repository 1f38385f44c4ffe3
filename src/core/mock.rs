//! Scripted in-process translator for tests and offline runs
//!
//! Replies are queued per needle: the first queued reply whose needle occurs in
//! the chunk text is consumed. With no script left, the translator answers with
//! `"translated: <chunk>"`.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::core::client::Translate;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{ModelSpec, TranslationResult};
use crate::core::prompt::PromptConfig;

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Succeed with this text
    Text(String),
    /// Fail with a rate-limit error
    RateLimited,
    /// Fail with a content-too-large error
    TooLarge,
    /// Fail with a generic API error
    Fail(String),
}

/// A recorded call
#[derive(Debug, Clone)]
pub struct MockCall {
    /// Chunk text as sent
    pub chunk_text: String,
    /// System prompt as sent
    pub system_prompt: String,
}

/// Holds a call open until the test releases it
#[derive(Debug, Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until the gated call is in flight
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the gated call complete
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Mock translator driven by scripts
#[derive(Debug, Default)]
pub struct MockTranslator {
    scripts: Mutex<Vec<(String, VecDeque<MockReply>)>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockTranslator {
    /// Echoing translator with no scripts
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for chunks containing `needle`
    pub fn script(self, needle: impl Into<String>, replies: Vec<MockReply>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push((needle.into(), replies.into()));
        }
        self
    }

    /// Block the next call for chunks containing `needle` until released
    pub fn gate(&self, needle: impl Into<String>) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        if let Ok(mut gates) = self.gates.lock() {
            gates.insert(needle.into(), gate.clone());
        }
        gate
    }

    /// All calls made so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls received
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn next_reply(&self, chunk_text: &str) -> Option<MockReply> {
        let mut scripts = self.scripts.lock().ok()?;
        scripts
            .iter_mut()
            .filter(|(needle, _)| chunk_text.contains(needle.as_str()))
            .find_map(|(_, replies)| replies.pop_front())
    }

    fn take_gate(&self, chunk_text: &str) -> Option<Arc<Gate>> {
        let mut gates = self.gates.lock().ok()?;
        let key = gates
            .keys()
            .find(|needle| chunk_text.contains(needle.as_str()))
            .cloned()?;
        gates.remove(&key)
    }
}

#[async_trait]
impl Translate for MockTranslator {
    async fn translate(
        &self,
        chunk_text: &str,
        prompt: &PromptConfig,
        model: &ModelSpec,
    ) -> Result<TranslationResult> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                chunk_text: chunk_text.to_string(),
                system_prompt: prompt.system_prompt.clone(),
            });
        }

        if let Some(gate) = self.take_gate(chunk_text) {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let reply = self
            .next_reply(chunk_text)
            .unwrap_or_else(|| MockReply::Text(format!("translated: {}", chunk_text)));

        match reply {
            MockReply::Text(text) => {
                let input_tokens = chunk_text.chars().count() as u64;
                let output_tokens = text.chars().count() as u64;
                Ok(TranslationResult {
                    cost: model.cost(input_tokens, output_tokens),
                    translated_text: text,
                    input_tokens,
                    output_tokens,
                })
            }
            MockReply::RateLimited => Err(TranslationError::RateLimitError { retry_after: None }),
            MockReply::TooLarge => Err(TranslationError::ContentTooLarge {
                message: "maximum context length exceeded".to_string(),
            }),
            MockReply::Fail(message) => Err(TranslationError::ApiError {
                status: 500,
                message,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> PromptConfig {
        PromptConfig {
            system_prompt: "p".to_string(),
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn test_script_then_default() {
        let mock = MockTranslator::new().script(
            "two",
            vec![MockReply::RateLimited, MockReply::Text("dois".into())],
        );
        let model = ModelSpec::new("m", 0.0, 0.0, 1024);

        assert!(mock.translate("one two", &prompt(), &model).await.is_err());
        assert_eq!(
            mock.translate("one two", &prompt(), &model).await.unwrap().translated_text,
            "dois"
        );
        assert_eq!(
            mock.translate("one two", &prompt(), &model).await.unwrap().translated_text,
            "translated: one two"
        );
        assert_eq!(mock.call_count(), 3);
    }
}
