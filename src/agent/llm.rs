//! LLM-driven code agent.
//!
//! Sends the prompt to the model, runs the first fenced code block of each
//! reply through the [`CodeRunner`], feeds the output back, and stops when a
//! reply carries no code or the step budget is spent.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};

use super::{Agent, AgentConfig, TranscriptMessage};
use crate::error::{AgentError, DispatchError, LlmError};
use crate::execution::CodeRunner;
use crate::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};

/// Language assumed for a fence without a tag.
const UNTAGGED_LANGUAGE: &str = "python";

/// A fenced code block found in a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

/// Extracts the first fenced code block from `text`.
///
/// An unterminated fence (reply cut off by the token budget) runs to the end
/// of the text.
pub fn extract_code_block(text: &str) -> Option<CodeBlock> {
    let re = Regex::new(r"(?s)```([A-Za-z0-9_+#\-]*)[^\n]*\n(.*?)(?:```|\z)").ok()?;
    let captures = re.captures(text)?;

    let code = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
    if code.trim().is_empty() {
        return None;
    }

    let language = captures
        .get(1)
        .map(|m| m.as_str().to_lowercase())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| UNTAGGED_LANGUAGE.to_string());

    Some(CodeBlock {
        language,
        code: code.to_string(),
    })
}

/// Rough token estimate used to keep requests inside the context window.
fn estimate_tokens(message: &Message) -> usize {
    message.content.len() / 4 + 4
}

/// Drops the oldest turns after the system prompt until the estimate fits.
///
/// The system prompt and the newest message are always kept.
fn fit_context(messages: &[Message], budget: usize) -> Vec<Message> {
    let Some((system, rest)) = messages.split_first() else {
        return Vec::new();
    };

    let mut used = estimate_tokens(system);
    let mut kept: Vec<Message> = Vec::new();
    for (i, message) in rest.iter().rev().enumerate() {
        let cost = estimate_tokens(message);
        if i > 0 && used + cost > budget {
            break;
        }
        used += cost;
        kept.push(message.clone());
    }
    kept.reverse();

    let mut fitted = Vec::with_capacity(kept.len() + 1);
    fitted.push(system.clone());
    fitted.extend(kept);
    fitted
}

/// Agent backed by an OpenAI-compatible chat model.
pub struct LlmAgent {
    provider: Arc<dyn LlmProvider>,
    config: AgentConfig,
}

impl LlmAgent {
    pub fn new(provider: Arc<dyn LlmProvider>, config: AgentConfig) -> Self {
        Self { provider, config }
    }

    /// Builds an agent with a [`LiteLlmClient`] from `config`.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingApiBase` when `config.api_base` is unset.
    pub fn from_config(config: AgentConfig) -> Result<Self, AgentError> {
        let api_base = config.api_base.clone().ok_or(LlmError::MissingApiBase)?;
        let client = LiteLlmClient::new(api_base, config.api_key.clone(), config.model.clone())?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, AgentError> {
        let budget = self
            .config
            .context_window
            .saturating_sub(self.config.max_tokens as usize);
        let mut request = GenerationRequest::new(&self.config.model, fit_context(messages, budget))
            .with_max_tokens(self.config.max_tokens);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self.provider.generate(request).await?;
        response
            .first_content()
            .map(|s| s.to_string())
            .ok_or(AgentError::EmptyResponse)
    }
}

#[async_trait]
impl Agent for LlmAgent {
    async fn chat(
        &self,
        prompt: &str,
        runner: &dyn CodeRunner,
    ) -> Result<Vec<TranscriptMessage>, AgentError> {
        let mut messages = vec![
            Message::system(&self.config.system_prompt),
            Message::user(prompt),
        ];
        let mut transcript = Vec::new();

        for step in 0..self.config.max_steps.max(1) {
            let reply = self.complete(&messages).await?;
            debug!(step = step, chars = reply.len(), "Model reply received");
            messages.push(Message::assistant(&reply));
            transcript.push(TranscriptMessage::assistant(&reply));

            let block = match extract_code_block(&reply) {
                Some(block) if self.config.auto_run => block,
                _ => break,
            };

            info!(step = step, language = %block.language, "Running model code");
            let output = match runner.run_code(&block.language, &block.code).await {
                Ok(output) => output.content,
                Err(e @ DispatchError::UnsupportedLanguage(_)) => {
                    warn!(language = %block.language, "Model asked for an unsupported language");
                    e.to_string()
                }
                Err(e) => return Err(AgentError::ExecutionFailed(e.to_string())),
            };

            messages.push(Message::user(format!("Output:\n{output}")));
            transcript.push(TranscriptMessage::executor(output));
        }

        Ok(transcript)
    }
}
