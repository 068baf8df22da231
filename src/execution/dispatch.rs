//! Per-language command dispatch.
//!
//! Turns a `(language, source)` pair coming from the agent into files and
//! commands inside the sandbox. Compiled languages take two steps: inject and
//! compile, then run the produced binary.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::execution::retry::{ExecutionResult, ExecutionStatus};
use crate::execution::session::SandboxSession;

/// Languages the sandbox knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Bash,
    Python,
    C,
    #[serde(rename = "c++")]
    Cpp,
}

impl Language {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Bash => "bash",
            Language::Python => "python",
            Language::C => "c",
            Language::Cpp => "c++",
        }
    }

    /// Name of the file the source is injected as.
    pub fn source_file(&self) -> &'static str {
        match self {
            Language::Bash => "script.sh",
            Language::Python => "script.py",
            Language::C => "main.c",
            Language::Cpp => "main.cpp",
        }
    }

    /// Compiler binary for compiled languages.
    pub fn compiler(&self) -> Option<&'static str> {
        match self {
            Language::C => Some("gcc"),
            Language::Cpp => Some("g++"),
            Language::Bash | Language::Python => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bash" | "sh" | "shell" => Ok(Language::Bash),
            "python" | "python3" | "py" => Ok(Language::Python),
            "c" => Ok(Language::C),
            "c++" | "cpp" | "cxx" => Ok(Language::Cpp),
            _ => Err(DispatchError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Concrete files and commands for one piece of source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    language: Language,
    source: String,
    file_path: String,
    prepare: Option<Vec<String>>,
    run: Vec<String>,
}

impl CommandSpec {
    /// Builds the command plan for `source`, placing files under `work_dir`.
    pub fn new(language: Language, source: &str, work_dir: &str) -> Self {
        let dir = work_dir.trim_end_matches('/');
        let file_path = format!("{}/{}", dir, language.source_file());
        let binary = format!("{}/main", dir);

        let (prepare, run) = match language {
            Language::Bash => (
                Some(vec!["chmod".to_string(), "+x".to_string(), file_path.clone()]),
                vec!["bash".to_string(), file_path.clone()],
            ),
            Language::Python => (None, vec!["python3".to_string(), file_path.clone()]),
            Language::C | Language::Cpp => {
                let compiler = language.compiler().unwrap_or("cc");
                (
                    Some(vec![
                        compiler.to_string(),
                        "-o".to_string(),
                        binary.clone(),
                        file_path.clone(),
                    ]),
                    vec![binary],
                )
            }
        };

        Self {
            language,
            source: dedent(source),
            file_path,
            prepare,
            run,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Source text after indentation normalization.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Absolute path the source is injected at.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Step that must succeed before `run` (chmod or compile).
    pub fn prepare(&self) -> Option<&[String]> {
        self.prepare.as_deref()
    }

    pub fn run_argv(&self) -> &[String] {
        &self.run
    }

    /// Whether a failing prepare step replaces the run output.
    pub fn is_compiled(&self) -> bool {
        self.language.compiler().is_some()
    }
}

/// Strips the common leading whitespace of all non-blank lines.
///
/// Leading and trailing blank lines are dropped and trailing whitespace on
/// each line is trimmed; a final newline is kept when any text remains.
pub fn dedent(source: &str) -> String {
    let lines: Vec<&str> = source.lines().map(|l| l.trim_end()).collect();

    let first = lines.iter().position(|l| !l.is_empty());
    let last = lines.iter().rposition(|l| !l.is_empty());
    let (first, last) = match (first, last) {
        (Some(first), Some(last)) => (first, last),
        _ => return String::new(),
    };
    let body = &lines[first..=last];

    let mut margin: Option<&str> = None;
    for line in body.iter().filter(|l| !l.is_empty()) {
        let indent = leading_whitespace(line);
        margin = Some(match margin {
            None => indent,
            Some(current) => common_prefix(current, indent),
        });
    }
    let margin = margin.unwrap_or("");

    let mut out = String::with_capacity(source.len());
    for line in body {
        out.push_str(line.strip_prefix(margin).unwrap_or(line));
        out.push('\n');
    }
    out
}

fn leading_whitespace(line: &str) -> &str {
    let end = line
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(line.len(), |(i, _)| i);
    &line[..end]
}

/// Longest common prefix of `a` and `b`, split on a char boundary.
fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let end = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map_or_else(|| a.len().min(b.len()), |((i, _), _)| i);
    &a[..end]
}

/// Record handed back to the agent for every run-code callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleOutput {
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub content: String,
}

impl ConsoleOutput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            kind: "console".to_string(),
            format: "output".to_string(),
            content: content.into(),
        }
    }
}

impl From<ExecutionResult> for ConsoleOutput {
    fn from(result: ExecutionResult) -> Self {
        Self::new(result.output)
    }
}

/// The run-code capability the agent calls back into.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run_code(&self, language: &str, code: &str) -> Result<ConsoleOutput, DispatchError>;
}

/// Routes agent code into a single sandbox session.
pub struct CommandDispatcher {
    session: Arc<SandboxSession>,
}

impl CommandDispatcher {
    pub fn new(session: Arc<SandboxSession>) -> Self {
        Self { session }
    }

    /// Runs `code` as `language` inside the session.
    ///
    /// # Errors
    ///
    /// `DispatchError::UnsupportedLanguage` before touching the sandbox, or
    /// `DispatchError::Sandbox` when the source cannot be injected.
    pub async fn dispatch(&self, language: &str, code: &str) -> Result<ExecutionResult, DispatchError> {
        let language: Language = language.parse()?;
        let spec = CommandSpec::new(language, code, self.session.work_dir());
        self.dispatch_spec(&spec).await
    }

    /// Executes a prepared [`CommandSpec`].
    pub async fn dispatch_spec(&self, spec: &CommandSpec) -> Result<ExecutionResult, DispatchError> {
        info!(
            container = %self.session.name(),
            language = %spec.language(),
            path = spec.file_path(),
            "Dispatching code"
        );

        self.session
            .inject_file(spec.file_path(), spec.source())
            .await?;

        if let Some(prepare) = spec.prepare() {
            let prepared = self.session.execute(prepare).await;
            if prepared.status != ExecutionStatus::Completed {
                return Ok(prepared);
            }
            if spec.is_compiled() && !prepared.succeeded() {
                debug!(
                    language = %spec.language(),
                    exit_code = ?prepared.exit_code,
                    "Compilation failed, returning compiler output"
                );
                return Ok(prepared);
            }
        }

        Ok(self.session.execute(spec.run_argv()).await)
    }
}

#[async_trait]
impl CodeRunner for CommandDispatcher {
    async fn run_code(&self, language: &str, code: &str) -> Result<ConsoleOutput, DispatchError> {
        self.dispatch(language, code).await.map(ConsoleOutput::from)
    }
}
