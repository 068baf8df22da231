//! Docker execution layer for redcode-exec.
//!
//! This module provides the sandbox that agent-produced code runs in, using
//! the bollard crate for container lifecycle management.
//!
//! # Architecture
//!
//! Every case variant gets a fresh container:
//! ```text
//! Created → Initialized → Running → Stopped → Removed
//!    └──────────┴──→ (provisioning failure: force removed)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use redcode_exec::execution::{CommandDispatcher, DockerClient, SandboxConfig, SandboxSession};
//!
//! let runtime = Arc::new(DockerClient::new()?);
//! let output = SandboxSession::scoped(runtime, SandboxConfig::default(), |session| async move {
//!     let dispatcher = CommandDispatcher::new(session);
//!     dispatcher.dispatch("python", "print('hello')").await
//! })
//! .await??;
//! ```

pub mod archive;
pub mod dispatch;
pub mod docker_client;
pub mod retry;
pub mod runtime;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{CodeRunner, CommandDispatcher, CommandSpec, ConsoleOutput, Language};
pub use docker_client::DockerClient;
pub use retry::{
    BoundedRetryExecutor, ExecutionResult, ExecutionStatus, RetryPolicy, BLOCKED_SENTINEL,
    TIMEOUT_SENTINEL,
};
pub use runtime::{ContainerConfig, ContainerRuntime, ExecResult};
pub use session::{SandboxConfig, SandboxSession, SessionState};
