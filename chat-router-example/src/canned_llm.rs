use std::time::Duration;

use async_trait::async_trait;
use chat_protocol::{ChatMessage, LlmChunk, LlmClient, LlmError, LlmReply};
use futures::stream::{self, BoxStream};

/// An in-memory [`LlmClient`] that echoes the last user message back one
/// word at a time, standing in for a real model backend.
///
/// Only usable in the `dev` environment; callers assert that with
/// [`chat_router::config::Environment::assert_is_dev`] before wiring this
/// in.
pub(crate) struct CannedLlm {
    known_models: Vec<String>,
}

impl CannedLlm {
    pub(crate) fn new(known_models: Vec<String>) -> Self {
        Self { known_models }
    }
}

#[async_trait]
impl LlmClient for CannedLlm {
    async fn send(&self, model_id: &str, messages: &[ChatMessage]) -> Result<LlmReply, LlmError> {
        self.validate_model(model_id).await?;
        let content = reply_text(messages);
        Ok(LlmReply {
            tokens_used: content.split_whitespace().count() as u64,
            content,
            duration: Duration::from_millis(50),
        })
    }

    fn stream<'a>(&'a self, model_id: &'a str, messages: &'a [ChatMessage]) -> BoxStream<'a, Result<LlmChunk, LlmError>> {
        if !self.known_models.is_empty() && !self.known_models.iter().any(|m| m == model_id) {
            let model_id = model_id.to_owned();
            return Box::pin(stream::once(async move { Err(LlmError::UnknownModel(model_id)) }));
        }
        let words: Vec<String> = reply_text(messages)
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        let n = words.len();
        Box::pin(stream::iter(words.into_iter().enumerate().map(move |(i, word)| {
            Ok(LlmChunk {
                content: format!("{word} "),
                done: i + 1 == n,
            })
        })))
    }

    async fn validate_model(&self, model_id: &str) -> Result<(), LlmError> {
        if self.known_models.is_empty() || self.known_models.iter().any(|m| m == model_id) {
            Ok(())
        } else {
            Err(LlmError::UnknownModel(model_id.to_owned()))
        }
    }
}

fn reply_text(messages: &[ChatMessage]) -> String {
    match messages.last() {
        Some(message) => format!("you said: {}", message.content),
        None => String::new(),
    }
}
