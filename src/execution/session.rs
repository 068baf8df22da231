//! Sandbox session lifecycle management.
//!
//! A [`SandboxSession`] owns exactly one container from `open` until
//! `close`. Sessions are never reused: every variant of every case gets a
//! fresh container built from the shared base image.
//!
//! ```text
//! Created → Initialized → Running → Stopped → Removed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use redcode_exec::execution::{DockerClient, SandboxConfig, SandboxSession};
//!
//! let runtime = Arc::new(DockerClient::new()?);
//! let output = SandboxSession::scoped(runtime, SandboxConfig::default(), |session| async move {
//!     session.execute(&["echo".into(), "hello".into()]).await
//! })
//! .await?;
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DockerError, SandboxError};
use crate::execution::archive::single_file_archive;
use crate::execution::retry::{BoundedRetryExecutor, ExecutionResult, RetryPolicy};
use crate::execution::runtime::{ContainerConfig, ContainerRuntime, ExecResult};

/// Label carrying the session's container name.
pub const SESSION_LABEL: &str = "redcode.session";

/// Default base image name.
pub const DEFAULT_IMAGE: &str = "redcode";

/// Configuration for opening sandbox sessions.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Base image; built from `build_context` when missing.
    pub image: String,
    /// Directory holding the Dockerfile for the base image.
    pub build_context: PathBuf,
    /// Command run once after the container starts.
    pub init_command: Vec<String>,
    /// Directory inside the container for injected sources and binaries.
    pub work_dir: String,
    /// Network mode for the container, Docker's default when `None`.
    pub network_mode: Option<String>,
    /// Timeout and retry budget for every executed command.
    pub retry: RetryPolicy,
}

impl SandboxConfig {
    /// Creates a sandbox configuration with defaults for the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            build_context: PathBuf::from("environment"),
            init_command: vec!["bash".to_string(), "/app/init.sh".to_string()],
            work_dir: "/tmp/redcode".to_string(),
            network_mode: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the image build context directory.
    pub fn with_build_context(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_context = dir.into();
        self
    }

    /// Sets the initialization command.
    pub fn with_init_command(mut self, cmd: Vec<String>) -> Self {
        self.init_command = cmd;
        self
    }

    /// Sets the work directory used for injected files.
    pub fn with_work_dir(mut self, dir: impl Into<String>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Sets the network mode.
    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initialized,
    Running,
    Stopped,
    Removed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Initialized => write!(f, "initialized"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopped => write!(f, "stopped"),
            SessionState::Removed => write!(f, "removed"),
        }
    }
}

/// One isolated, disposable container.
pub struct SandboxSession {
    runtime: Arc<dyn ContainerRuntime>,
    config: SandboxConfig,
    container_id: String,
    container_name: String,
    executor: BoundedRetryExecutor,
    state: Mutex<SessionState>,
    closed: AtomicBool,
}

impl SandboxSession {
    /// Provisions a container and runs the init command inside it.
    ///
    /// # Errors
    ///
    /// Returns `SandboxError::Provisioning` if the image cannot be built or
    /// the container cannot be created, started or initialized. A container
    /// that was already created is force-removed first.
    pub async fn open(
        runtime: Arc<dyn ContainerRuntime>,
        config: SandboxConfig,
    ) -> Result<Self, SandboxError> {
        let provisioning = |source: DockerError| SandboxError::Provisioning {
            image: config.image.clone(),
            source,
        };

        if !runtime.image_exists(&config.image).await {
            info!(image = %config.image, "Image not found. Building the image from Dockerfile.");
            runtime
                .build_image(&config.image, &config.build_context)
                .await
                .map_err(|e| {
                    error!(image = %config.image, error = %e, "Failed to build image");
                    provisioning(e)
                })?;
        }

        let container_name = container_name_for(&config.image);
        let mut container_config = ContainerConfig::new(&container_name, &config.image)
            .with_working_dir(&config.work_dir)
            .with_label(SESSION_LABEL, &container_name);
        if let Some(mode) = &config.network_mode {
            container_config = container_config.with_network_mode(mode);
        }

        let container_id = runtime
            .create_container(&container_config)
            .await
            .map_err(provisioning)?;

        let session = Self {
            runtime: Arc::clone(&runtime),
            executor: BoundedRetryExecutor::new(config.retry),
            container_id,
            container_name,
            config: config.clone(),
            state: Mutex::new(SessionState::Created),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = session.start_and_initialize().await {
            session.discard().await;
            return Err(provisioning(e));
        }

        session.set_state(SessionState::Running);
        info!(container = %session.container_name, image = %session.config.image, "Sandbox started");
        Ok(session)
    }

    /// Opens a session, runs `body`, and closes the session on every exit path.
    ///
    /// A panic inside `body` is caught, the container is torn down, and the
    /// panic is reported as `SandboxError::Panicked`.
    pub async fn scoped<F, Fut, T>(
        runtime: Arc<dyn ContainerRuntime>,
        config: SandboxConfig,
        body: F,
    ) -> Result<T, SandboxError>
    where
        F: FnOnce(Arc<SandboxSession>) -> Fut,
        Fut: Future<Output = T>,
    {
        let session = Arc::new(Self::open(runtime, config).await?);
        let outcome = AssertUnwindSafe(body(Arc::clone(&session)))
            .catch_unwind()
            .await;

        if let Err(e) = session.close().await {
            warn!(container = %session.container_name, error = %e, "Sandbox teardown failed");
        }

        outcome.map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            SandboxError::Panicked(message)
        })
    }

    async fn start_and_initialize(&self) -> Result<(), DockerError> {
        self.runtime.start_container(&self.container_id).await?;
        debug!(container = %self.container_name, "Container started");

        if !self.config.init_command.is_empty() {
            let init = self
                .runtime
                .exec_command(&self.container_id, &self.config.init_command)
                .await?;
            if init.is_success() {
                info!(container = %self.container_name, output = %init.output.trim_end(), "Container init output");
            } else {
                warn!(
                    container = %self.container_name,
                    exit_code = init.exit_code,
                    output = %init.output.trim_end(),
                    "Container init command failed"
                );
            }
        }

        self.set_state(SessionState::Initialized);
        Ok(())
    }

    /// Force-removes a container whose startup failed.
    async fn discard(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Err(e) = self.runtime.remove_container(&self.container_id, true).await {
            warn!(container = %self.container_name, error = %e, "Failed to remove container after startup failure");
        }
        self.set_state(SessionState::Removed);
    }

    /// Writes `content` to the absolute `path` inside the container.
    ///
    /// The file travels as an in-memory tar archive through the Docker
    /// archive API; missing parent directories are created on extraction.
    pub async fn inject_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.ensure_running()?;
        if !path.starts_with('/') {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }

        let archive = single_file_archive(path, content, 0o755).map_err(|e| {
            SandboxError::Archive {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;

        self.runtime
            .upload_archive(&self.container_id, "/", archive)
            .await?;
        debug!(container = %self.container_name, path = path, bytes = content.len(), "Injected file");
        Ok(())
    }

    /// Runs `argv` once inside the container, without timeout or retry.
    pub async fn run(&self, argv: &[String]) -> Result<ExecResult, DockerError> {
        self.ensure_running()
            .map_err(|e| DockerError::RunFailed(e.to_string()))?;
        self.runtime.exec_command(&self.container_id, argv).await
    }

    /// Runs `argv` under the session's timeout and retry budget.
    pub async fn execute(&self, argv: &[String]) -> ExecutionResult {
        let label = argv.join(" ");
        self.executor.execute(&label, || self.run(argv)).await
    }

    /// Stops and removes the container.
    ///
    /// Safe to call more than once; only the first call reaches Docker.
    pub async fn close(&self) -> Result<(), SandboxError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.runtime.stop_container(&self.container_id).await {
            warn!(container = %self.container_name, error = %e, "Failed to stop container gracefully");
        }
        self.set_state(SessionState::Stopped);

        self.runtime
            .remove_container(&self.container_id, true)
            .await?;
        self.set_state(SessionState::Removed);

        info!(container = %self.container_name, "Sandbox removed");
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), SandboxError> {
        match self.state() {
            SessionState::Running => Ok(()),
            other => Err(SandboxError::NotRunning(other.to_string())),
        }
    }

    fn set_state(&self, state: SessionState) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *guard = state;
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the Docker container ID.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Returns the container name.
    pub fn name(&self) -> &str {
        &self.container_name
    }

    /// Returns the base image name.
    pub fn image(&self) -> &str {
        &self.config.image
    }

    /// Returns the directory used for injected files.
    pub fn work_dir(&self) -> &str {
        &self.config.work_dir
    }
}

/// Best-effort removal when a session is dropped without `close`.
impl Drop for SandboxSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(container = %self.container_name, "Sandbox dropped without close, removing in background");
        let runtime = Arc::clone(&self.runtime);
        let id = self.container_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = runtime.remove_container(&id, true).await {
                        warn!(container = %id, error = %e, "Background sandbox removal failed");
                    }
                });
            }
            Err(_) => {
                error!(container = %self.container_name, "No async runtime available, container leaked");
            }
        }
    }
}

fn container_name_for(image: &str) -> String {
    let safe: String = image
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    format!("{}-{}", safe, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::testing::FakeRuntime;
    use std::time::Duration;

    fn config() -> SandboxConfig {
        SandboxConfig::default().with_retry(RetryPolicy::new(
            Duration::from_millis(50),
            3,
            Duration::from_millis(1),
        ))
    }

    #[test]
    fn test_sandbox_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.image, "redcode");
        assert_eq!(config.init_command, vec!["bash", "/app/init.sh"]);
        assert_eq!(config.work_dir, "/tmp/redcode");
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn test_container_name_is_unique_and_safe() {
        let a = container_name_for("registry/redcode:latest");
        let b = container_name_for("registry/redcode:latest");
        assert!(a.starts_with("registry-redcode-latest-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Created.to_string(), "created");
        assert_eq!(SessionState::Removed.to_string(), "removed");
    }

    #[tokio::test]
    async fn test_open_runs_init_and_close_tears_down_once() {
        let runtime = Arc::new(FakeRuntime::new());
        let session = SandboxSession::open(runtime.clone(), config())
            .await
            .expect("open");

        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(runtime.executed()[0], vec!["bash", "/app/init.sh"]);

        session.close().await.expect("close");
        session.close().await.expect("second close is a no-op");

        assert_eq!(session.state(), SessionState::Removed);
        assert_eq!(runtime.counts(), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_container_uses_work_dir_and_session_label() {
        let runtime = Arc::new(FakeRuntime::new());
        let session = SandboxSession::open(runtime.clone(), config().with_work_dir("/srv/run"))
            .await
            .expect("open");
        session.close().await.expect("close");

        let configs = runtime.container_configs();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].working_dir.as_deref(), Some("/srv/run"));
        assert_eq!(
            configs[0].labels.get(SESSION_LABEL).map(String::as_str),
            Some(session.name())
        );
        assert_eq!(
            configs[0].labels.get("created_by").map(String::as_str),
            Some("code-agent-evaluation")
        );
    }

    #[tokio::test]
    async fn test_missing_image_is_built_once() {
        let runtime = Arc::new(FakeRuntime::new().without_image());
        let session = SandboxSession::open(runtime.clone(), config())
            .await
            .expect("open");
        session.close().await.expect("close");

        assert_eq!(runtime.builds(), 1);
    }

    #[tokio::test]
    async fn test_build_failure_is_provisioning_error() {
        let runtime = Arc::new(FakeRuntime::new().without_image().failing_build());
        let result = SandboxSession::open(runtime.clone(), config()).await;

        assert!(matches!(result, Err(SandboxError::Provisioning { .. })));
        assert_eq!(runtime.counts(), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_start_failure_removes_created_container() {
        let runtime = Arc::new(FakeRuntime::new().failing_start());
        let result = SandboxSession::open(runtime.clone(), config()).await;

        assert!(matches!(result, Err(SandboxError::Provisioning { .. })));
        assert_eq!(runtime.removes(), 1);
    }

    #[tokio::test]
    async fn test_inject_file_uploads_archive_at_root() {
        let runtime = Arc::new(FakeRuntime::new());
        let session = SandboxSession::open(runtime.clone(), config())
            .await
            .expect("open");

        session
            .inject_file("/tmp/redcode/script.py", "print('x')\n")
            .await
            .expect("inject");
        assert_eq!(
            runtime.file("/tmp/redcode/script.py").as_deref(),
            Some("print('x')\n")
        );

        let relative = session.inject_file("script.py", "").await;
        assert!(matches!(relative, Err(SandboxError::InvalidPath(_))));

        session.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_run_after_close_fails() {
        let runtime = Arc::new(FakeRuntime::new());
        let session = SandboxSession::open(runtime.clone(), config())
            .await
            .expect("open");
        session.close().await.expect("close");

        assert!(session.run(&["true".to_string()]).await.is_err());
        let inject = session.inject_file("/tmp/a", "").await;
        assert!(matches!(inject, Err(SandboxError::NotRunning(_))));
    }

    #[tokio::test]
    async fn test_scoped_tears_down_on_success() {
        let runtime = Arc::new(FakeRuntime::new());
        let result = SandboxSession::scoped(runtime.clone(), config(), |session| async move {
            session.execute(&["echo".into(), "hi".into()]).await
        })
        .await
        .expect("scoped");

        assert_eq!(result.output, "hi\n");
        assert_eq!(runtime.counts(), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_scoped_tears_down_on_error() {
        let runtime = Arc::new(FakeRuntime::new());
        let result: Result<Result<(), String>, SandboxError> =
            SandboxSession::scoped(runtime.clone(), config(), |_session| async move {
                Err("agent failed".to_string())
            })
            .await;

        assert_eq!(result.expect("scoped"), Err("agent failed".to_string()));
        assert_eq!(runtime.counts(), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_scoped_tears_down_on_timeout() {
        let runtime = Arc::new(FakeRuntime::new().with_slow_program("sleep", Duration::from_secs(5)));
        let result = SandboxSession::scoped(runtime.clone(), config(), |session| async move {
            session.execute(&["sleep".into(), "100".into()]).await
        })
        .await
        .expect("scoped");

        assert_eq!(result.output, crate::execution::TIMEOUT_SENTINEL);
        assert_eq!(result.attempts, 3);
        assert_eq!(runtime.counts(), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_scoped_tears_down_on_panic() {
        let runtime = Arc::new(FakeRuntime::new());
        let result: Result<(), SandboxError> =
            SandboxSession::scoped(runtime.clone(), config(), |_session| async move {
                panic!("agent exploded");
            })
            .await;

        match result {
            Err(SandboxError::Panicked(message)) => assert!(message.contains("agent exploded")),
            other => panic!("expected panic error, got {other:?}"),
        }
        assert_eq!(runtime.counts(), (1, 1, 1));
    }
}
