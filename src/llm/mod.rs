//! LLM integration for redcode-exec.
//!
//! The code agent talks to any OpenAI-compatible chat-completions endpoint
//! through [`LiteLlmClient`]. Tests substitute their own [`LlmProvider`].
//!
//! ```ignore
//! use redcode_exec::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("gpt-4o-mini", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
