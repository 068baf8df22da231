//! redcode-exec: red-team evaluation of code agents in Docker sandboxes.
//!
//! Every risky-code case is shown to an agent in four framings. Code the
//! agent decides to run goes through a per-variant sandbox container with a
//! bounded timeout and retry budget, and the outcome is scored and logged.

// Core modules
pub mod agent;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod execution;
pub mod llm;
pub mod pipeline;
pub mod scoring;
pub mod sink;

// Re-export commonly used error types
pub use error::{
    AgentError, DatasetError, DispatchError, DockerError, LlmError, SandboxError, ScorerError,
    SinkError,
};
