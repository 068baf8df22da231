//! Container runtime abstraction.
//!
//! `SandboxSession` talks to Docker only through [`ContainerRuntime`], so
//! the lifecycle and retry logic can be exercised against test doubles.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::DockerError;

/// Label attached to every container created by the harness.
pub const CREATED_BY_LABEL: (&str, &str) = ("created_by", "code-agent-evaluation");

/// Configuration for creating a new container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Unique name for the container.
    pub name: String,
    /// Docker image to use.
    pub image: String,
    /// Labels attached to the container.
    pub labels: HashMap<String, String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Network mode (e.g., "none", "bridge").
    pub network_mode: Option<String>,
}

impl ContainerConfig {
    /// Creates a new container configuration with the given name and image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        let mut labels = HashMap::new();
        labels.insert(CREATED_BY_LABEL.0.to_string(), CREATED_BY_LABEL.1.to_string());
        Self {
            name: name.into(),
            image: image.into(),
            labels,
            working_dir: None,
            network_mode: None,
        }
    }

    /// Sets the working directory.
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the network mode.
    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    /// Adds a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Result of executing a command in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code of the command, -1 when Docker did not report one.
    pub exit_code: i64,
    /// Combined stdout and stderr, in arrival order.
    pub output: String,
}

impl ExecResult {
    pub fn new(exit_code: i64, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Checks if the command exited with code 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Operations a sandbox session needs from the container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Checks if an image exists locally.
    async fn image_exists(&self, image: &str) -> bool;

    /// Builds `image` from the Dockerfile in `context_dir`.
    async fn build_image(&self, image: &str, context_dir: &Path) -> Result<(), DockerError>;

    /// Creates a container and returns its ID.
    async fn create_container(&self, config: &ContainerConfig) -> Result<String, DockerError>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    /// Runs `cmd` inside a running container and waits for it to finish.
    async fn exec_command(&self, id: &str, cmd: &[String]) -> Result<ExecResult, DockerError>;

    /// Extracts a tar archive into the container at `dest`.
    async fn upload_archive(
        &self,
        id: &str,
        dest: &str,
        archive: Vec<u8>,
    ) -> Result<(), DockerError>;

    /// Stops a running container.
    async fn stop_container(&self, id: &str) -> Result<(), DockerError>;

    /// Removes a container.
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_config_builder() {
        let config = ContainerConfig::new("redcode-1", "redcode")
            .with_working_dir("/app")
            .with_network_mode("none")
            .with_label("case", "1_1");

        assert_eq!(config.name, "redcode-1");
        assert_eq!(config.image, "redcode");
        assert_eq!(config.working_dir.as_deref(), Some("/app"));
        assert_eq!(config.network_mode.as_deref(), Some("none"));
        assert_eq!(
            config.labels.get("created_by").map(String::as_str),
            Some("code-agent-evaluation")
        );
        assert_eq!(config.labels.get("case").map(String::as_str), Some("1_1"));
    }

    #[test]
    fn test_exec_result() {
        let ok = ExecResult::new(0, "hello\n");
        assert!(ok.is_success());

        let failed = ExecResult::new(1, "boom");
        assert!(!failed.is_success());
        assert_eq!(failed.output, "boom");
    }
}
