//! Bounded retry execution with a per-attempt deadline.
//!
//! Every command that reaches the sandbox goes through
//! [`BoundedRetryExecutor::execute`]. Each attempt is raced against a
//! `tokio::time::timeout` deadline; timed-out and failed attempts are retried
//! until the budget is spent, while an input-starvation failure ends the
//! command immediately.
//!
//! ```text
//! Idle → Attempting → Completed
//!                   → RetryableFailure → Attempting (next index)
//!                   → Exhausted ("Execution timed out")
//!                   → Blocked   ("Execution blocked due to EOFError")
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::DockerError;
use crate::execution::runtime::ExecResult;

/// Output returned once every attempt timed out or failed.
pub const TIMEOUT_SENTINEL: &str = "Execution timed out";

/// Output returned when the program tried to read interactive input.
pub const BLOCKED_SENTINEL: &str = "Execution blocked due to EOFError";

/// Substring identifying interpreter-level input starvation.
pub const INPUT_STARVATION_SIGNATURE: &str = "EOFError";

/// Timeout and retry budget for a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for one attempt.
    pub timeout: Duration,
    /// Total number of attempts, at least 1.
    pub retries: u32,
    /// Pause between consecutive attempts.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, retries: u32, retry_delay: Duration) -> Self {
        Self {
            timeout,
            retries: retries.max(1),
            retry_delay,
        }
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the attempt budget (clamped to at least 1).
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    /// Sets the delay between attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed { exit_code: i64, output: String },
    TimedOut,
    Blocked(String),
    RuntimeError(String),
}

impl AttemptOutcome {
    /// Whether another attempt may follow this one.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut | Self::RuntimeError(_))
    }

    /// Result for an attempt that ends the command.
    fn finish(self, label: &str, attempts: u32) -> ExecutionResult {
        match self {
            Self::Completed { exit_code, output } => {
                debug!(attempt = attempts, exit_code = exit_code, "Finished exec");
                ExecutionResult::completed(output, exit_code, attempts)
            }
            Self::Blocked(output) => {
                error!(
                    command = label,
                    output = %output,
                    "EOFError detected in command output"
                );
                ExecutionResult::blocked(attempts)
            }
            Self::TimedOut | Self::RuntimeError(_) => ExecutionResult::exhausted(attempts),
        }
    }

    fn classify(result: Result<Result<ExecResult, DockerError>, tokio::time::error::Elapsed>) -> Self {
        match result {
            Err(_) => Self::TimedOut,
            Ok(Err(e)) => Self::RuntimeError(e.to_string()),
            Ok(Ok(exec)) if exec.output.contains(INPUT_STARVATION_SIGNATURE) => {
                Self::Blocked(exec.output)
            }
            Ok(Ok(exec)) => Self::Completed {
                exit_code: exec.exit_code,
                output: exec.output,
            },
        }
    }
}

/// Terminal classification of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    TimedOut,
    Blocked,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Final result of one executor invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Raw output, or a sentinel for non-completed commands.
    pub output: String,
    pub status: ExecutionStatus,
    /// Number of attempts actually made.
    pub attempts: u32,
    /// Exit code of the completing attempt.
    pub exit_code: Option<i64>,
}

impl ExecutionResult {
    fn completed(output: String, exit_code: i64, attempts: u32) -> Self {
        Self {
            output,
            status: ExecutionStatus::Completed,
            attempts,
            exit_code: Some(exit_code),
        }
    }

    fn blocked(attempts: u32) -> Self {
        Self {
            output: BLOCKED_SENTINEL.to_string(),
            status: ExecutionStatus::Blocked,
            attempts,
            exit_code: None,
        }
    }

    fn exhausted(attempts: u32) -> Self {
        Self {
            output: TIMEOUT_SENTINEL.to_string(),
            status: ExecutionStatus::TimedOut,
            attempts,
            exit_code: None,
        }
    }

    /// True when the command completed with exit code 0.
    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.exit_code == Some(0)
    }
}

/// Runs a command under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct BoundedRetryExecutor {
    policy: RetryPolicy,
}

impl BoundedRetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `attempt` until it completes, blocks, or the budget is spent.
    ///
    /// `attempt` is invoked once per try; the future it returns is dropped
    /// when the deadline fires. Never fails: exhaustion yields
    /// [`TIMEOUT_SENTINEL`] and input starvation yields [`BLOCKED_SENTINEL`].
    pub async fn execute<F, Fut>(&self, label: &str, mut attempt: F) -> ExecutionResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ExecResult, DockerError>>,
    {
        let retries = self.policy.retries.max(1);

        for index in 1..=retries {
            debug!(attempt = index, command = label, "Starting exec");
            let outcome =
                AttemptOutcome::classify(tokio::time::timeout(self.policy.timeout, attempt()).await);

            if !outcome.is_retryable() {
                return outcome.finish(label, index);
            }

            match &outcome {
                AttemptOutcome::TimedOut => warn!(
                    attempt = index,
                    timeout_secs = self.policy.timeout.as_secs_f64(),
                    command = label,
                    "Command execution timed out in sandbox"
                ),
                AttemptOutcome::RuntimeError(detail) => {
                    error!(attempt = index, command = label, error = %detail, "Error while executing in sandbox")
                }
                _ => {}
            }

            if index < retries {
                info!(delay_secs = self.policy.retry_delay.as_secs_f64(), "Retrying");
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        ExecutionResult::exhausted(retries)
    }
}
