//! Evaluation run configuration.
//!
//! Values come from [`EvalConfig::default`], an optional YAML file, then
//! `REDCODE_*` environment variables, and finally command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentConfig;
use crate::execution::session::DEFAULT_IMAGE;
use crate::execution::{RetryPolicy, SandboxConfig};
use crate::pipeline::DEFAULT_TASK_LABEL;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// The configuration file could not be parsed.
    #[error("Failed to parse config file '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for an evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    // Sandbox settings
    /// Base image for every sandbox.
    pub image: String,
    /// Directory holding the Dockerfile used when the image is missing.
    pub build_context: PathBuf,
    /// Command run once inside each new container.
    pub init_command: Vec<String>,
    /// Directory for injected sources inside the container.
    pub work_dir: String,
    /// Docker network mode, daemon default when unset.
    pub network_mode: Option<String>,
    /// Per-attempt execution timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts per command.
    pub retries: u32,
    /// Delay between attempts in seconds.
    pub retry_delay_secs: u64,

    // Agent settings
    pub model: String,
    pub api_base: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub context_window: usize,
    pub max_steps: usize,
    pub auto_run: bool,

    // Output settings
    /// Root directory for conversation and run logs.
    pub output_dir: PathBuf,
    /// Task label written into run summaries.
    pub task: String,
    /// External scorer command line; the heuristic scorer is used when unset.
    pub scorer_command: Option<String>,
    /// Timeout for one external scorer invocation, in seconds.
    pub scorer_timeout_secs: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        let sandbox = SandboxConfig::default();
        let retry = RetryPolicy::default();
        let agent = AgentConfig::default();

        Self {
            image: DEFAULT_IMAGE.to_string(),
            build_context: sandbox.build_context,
            init_command: sandbox.init_command,
            work_dir: sandbox.work_dir,
            network_mode: None,
            timeout_secs: retry.timeout.as_secs(),
            retries: retry.retries,
            retry_delay_secs: retry.retry_delay.as_secs(),
            model: agent.model,
            api_base: None,
            api_key: None,
            max_tokens: agent.max_tokens,
            context_window: agent.context_window,
            max_steps: agent.max_steps,
            auto_run: agent.auto_run,
            output_dir: PathBuf::from("results"),
            task: DEFAULT_TASK_LABEL.to_string(),
            scorer_command: None,
            scorer_timeout_secs: 120,
        }
    }
}

impl EvalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a YAML configuration file; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read and
    /// `ConfigError::Parse` if it is not valid YAML for this structure.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Creates a configuration from defaults overlaid with environment variables.
    ///
    /// Reads the following environment variables:
    /// - `REDCODE_IMAGE`, `REDCODE_BUILD_CONTEXT`, `REDCODE_WORK_DIR`, `REDCODE_NETWORK_MODE`
    /// - `REDCODE_TIMEOUT_SECS`, `REDCODE_RETRIES`, `REDCODE_RETRY_DELAY_SECS`
    /// - `REDCODE_MODEL`, `REDCODE_API_BASE`, `REDCODE_API_KEY`, `REDCODE_MAX_TOKENS`,
    ///   `REDCODE_CONTEXT_WINDOW`, `REDCODE_MAX_STEPS`, `REDCODE_AUTO_RUN`
    /// - `REDCODE_OUTPUT_DIR`, `REDCODE_TASK`, `REDCODE_SCORER_COMMAND`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// result fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays values returned by `lookup` for the `REDCODE_*` keys.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Sandbox settings
        if let Some(val) = lookup("REDCODE_IMAGE") {
            self.image = val;
        }
        if let Some(val) = lookup("REDCODE_BUILD_CONTEXT") {
            self.build_context = PathBuf::from(val);
        }
        if let Some(val) = lookup("REDCODE_WORK_DIR") {
            self.work_dir = val;
        }
        if let Some(val) = lookup("REDCODE_NETWORK_MODE") {
            self.network_mode = Some(val);
        }
        if let Some(val) = lookup("REDCODE_TIMEOUT_SECS") {
            self.timeout_secs = parse_env_value(&val, "REDCODE_TIMEOUT_SECS")?;
        }
        if let Some(val) = lookup("REDCODE_RETRIES") {
            self.retries = parse_env_value(&val, "REDCODE_RETRIES")?;
        }
        if let Some(val) = lookup("REDCODE_RETRY_DELAY_SECS") {
            self.retry_delay_secs = parse_env_value(&val, "REDCODE_RETRY_DELAY_SECS")?;
        }

        // Agent settings
        if let Some(val) = lookup("REDCODE_MODEL") {
            self.model = val;
        }
        if let Some(val) = lookup("REDCODE_API_BASE") {
            self.api_base = Some(val);
        }
        if let Some(val) = lookup("REDCODE_API_KEY") {
            self.api_key = Some(val);
        }
        if let Some(val) = lookup("REDCODE_MAX_TOKENS") {
            self.max_tokens = parse_env_value(&val, "REDCODE_MAX_TOKENS")?;
        }
        if let Some(val) = lookup("REDCODE_CONTEXT_WINDOW") {
            self.context_window = parse_env_value(&val, "REDCODE_CONTEXT_WINDOW")?;
        }
        if let Some(val) = lookup("REDCODE_MAX_STEPS") {
            self.max_steps = parse_env_value(&val, "REDCODE_MAX_STEPS")?;
        }
        if let Some(val) = lookup("REDCODE_AUTO_RUN") {
            self.auto_run = parse_env_bool(&val, "REDCODE_AUTO_RUN")?;
        }

        // Output settings
        if let Some(val) = lookup("REDCODE_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("REDCODE_TASK") {
            self.task = val;
        }
        if let Some(val) = lookup("REDCODE_SCORER_COMMAND") {
            self.scorer_command = Some(val);
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.image.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "image cannot be empty".to_string(),
            ));
        }

        if !self.work_dir.starts_with('/') {
            return Err(ConfigError::ValidationFailed(
                "work_dir must be an absolute path".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "retries must be greater than 0".to_string(),
            ));
        }

        if self.model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model cannot be empty".to_string(),
            ));
        }

        if self.max_steps == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_steps must be greater than 0".to_string(),
            ));
        }

        if self.max_tokens as usize >= self.context_window {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be smaller than context_window".to_string(),
            ));
        }

        Ok(())
    }

    /// Retry policy for sandbox commands.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.timeout_secs),
            self.retries,
            Duration::from_secs(self.retry_delay_secs),
        )
    }

    /// Sandbox configuration derived from these settings.
    pub fn sandbox_config(&self) -> SandboxConfig {
        let mut sandbox = SandboxConfig::new(&self.image)
            .with_build_context(&self.build_context)
            .with_init_command(self.init_command.clone())
            .with_work_dir(&self.work_dir)
            .with_retry(self.retry_policy());
        if let Some(mode) = &self.network_mode {
            sandbox = sandbox.with_network_mode(mode);
        }
        sandbox
    }

    /// Agent configuration derived from these settings.
    pub fn agent_config(&self) -> AgentConfig {
        let mut agent = AgentConfig::new(&self.model)
            .with_max_tokens(self.max_tokens)
            .with_context_window(self.context_window)
            .with_max_steps(self.max_steps)
            .with_auto_run(self.auto_run);
        if let Some(base) = &self.api_base {
            agent = agent.with_api_base(base);
        }
        if let Some(key) = &self.api_key {
            agent = agent.with_api_key(key);
        }
        agent
    }

    /// Builder method to set the base image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Builder method to set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Builder method to set the attempt budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set the API base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Builder method to set the task label.
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    /// Builder method to set the external scorer command.
    pub fn with_scorer_command(mut self, command: impl Into<String>) -> Self {
        self.scorer_command = Some(command.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
