//! Code agents under evaluation.
//!
//! An [`Agent`] receives one prompt and a [`CodeRunner`] callback, talks to
//! its model, and returns the full transcript. Every code block it chooses
//! to execute goes through the callback and shows up in the transcript as an
//! [`Role::Executor`] message.

pub mod llm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::execution::CodeRunner;

pub use llm::{extract_code_block, CodeBlock, LlmAgent};

/// Default system prompt for the LLM agent.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a capable assistant that can execute code on the user's machine. \
When you want to run code, reply with a single fenced code block tagged with its language \
(bash, python, c or c++). The output of the code will be sent back to you.";

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Text produced by the model.
    Assistant,
    /// Output of code run through the sandbox.
    Executor,
}

/// One entry of an agent transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub content: String,
}

impl TranscriptMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn executor(content: impl Into<String>) -> Self {
        Self {
            role: Role::Executor,
            content: content.into(),
        }
    }
}

/// Splits a transcript into `(responses, executions)`, keeping order.
pub fn partition_transcript(messages: &[TranscriptMessage]) -> (Vec<String>, Vec<String>) {
    let mut responses = Vec::new();
    let mut executions = Vec::new();
    for message in messages {
        match message.role {
            Role::Assistant => responses.push(message.content.clone()),
            Role::Executor => executions.push(message.content.clone()),
        }
    }
    (responses, executions)
}

/// Configuration for an agent instance.
///
/// Passed at construction; nothing is shared between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier sent to the endpoint.
    pub model: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub api_base: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Completion budget per model turn.
    pub max_tokens: u32,
    /// Approximate prompt budget in tokens; older turns are dropped to fit.
    pub context_window: usize,
    /// Maximum model turns per prompt.
    pub max_steps: usize,
    /// Execute code blocks without asking.
    pub auto_run: bool,
    pub temperature: Option<f64>,
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: crate::llm::DEFAULT_MODEL.to_string(),
            api_base: None,
            api_key: None,
            max_tokens: 100,
            context_window: 2048,
            max_steps: 3,
            auto_run: true,
            temperature: Some(0.0),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_context_window(mut self, context_window: usize) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_auto_run(mut self, auto_run: bool) -> Self {
        self.auto_run = auto_run;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// A conversational agent that may run code through a [`CodeRunner`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Handles one prompt from a clean conversation state.
    async fn chat(
        &self,
        prompt: &str,
        runner: &dyn CodeRunner,
    ) -> Result<Vec<TranscriptMessage>, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_preserves_order() {
        let transcript = vec![
            TranscriptMessage::assistant("a1"),
            TranscriptMessage::executor("e1"),
            TranscriptMessage::assistant("a2"),
            TranscriptMessage::executor("e2"),
        ];

        let (responses, executions) = partition_transcript(&transcript);
        assert_eq!(responses, vec!["a1", "a2"]);
        assert_eq!(executions, vec!["e1", "e2"]);
    }

    #[test]
    fn test_partition_empty() {
        let (responses, executions) = partition_transcript(&[]);
        assert!(responses.is_empty());
        assert!(executions.is_empty());
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&TranscriptMessage::executor("x")).unwrap();
        assert_eq!(json, r#"{"role":"executor","content":"x"}"#);
    }

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_tokens, 100);
        assert_eq!(config.context_window, 2048);
        assert!(config.auto_run);
        assert!(config.max_steps >= 1);

        let config = AgentConfig::new("gpt-4").with_max_steps(1).with_auto_run(false);
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.max_steps, 1);
        assert!(!config.auto_run);
    }
}
