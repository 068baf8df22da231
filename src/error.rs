//! Error types for redcode-exec operations.
//!
//! Defines error types for the major subsystems:
//! - Docker container management
//! - Sandbox session lifecycle
//! - Per-language command dispatch
//! - Agent and LLM interactions
//! - Scoring, dataset loading and result persistence

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker build failed: {0}")]
    BuildFailed(String),

    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("Failed to copy files to container: {0}")]
    CopyFailed(String),

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a sandbox session.
///
/// Only `Provisioning` is fatal for a case; the rest surface to callers of
/// `inject_file` and are mapped into dispatch errors.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox provisioning failed for image '{image}': {source}")]
    Provisioning {
        image: String,
        #[source]
        source: DockerError,
    },

    #[error("Sandbox is not running (state: {0})")]
    NotRunning(String),

    #[error("Invalid sandbox path '{0}': must be absolute")]
    InvalidPath(String),

    #[error("Failed to build archive for '{path}': {reason}")]
    Archive { path: String, reason: String },

    #[error("Sandbox body panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Docker(#[from] DockerError),
}

/// Errors that can occur while dispatching code to the sandbox.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unsupported language {0}")]
    UnsupportedLanguage(String),

    #[error("Sandbox error during dispatch: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: REDCODE_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors produced by an agent while handling a prompt.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Agent produced no response")]
    EmptyResponse,

    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),
}

/// Errors produced by a scorer.
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("Failed to spawn scorer '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("Scorer exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Scorer output could not be parsed: {0}")]
    InvalidOutput(String),

    #[error("Scorer timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while loading a dataset file.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse dataset '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that can occur while persisting results.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
