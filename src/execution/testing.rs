//! In-memory container runtime used by unit tests.
//!
//! `FakeRuntime` records every lifecycle call and "executes" a tiny subset of
//! bash, python, C and C++: enough to print literals, read from stdin, and
//! fail to compile.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::error::DockerError;
use crate::execution::runtime::{ContainerConfig, ContainerRuntime, ExecResult};

#[derive(Default)]
struct State {
    created: Vec<String>,
    configs: Vec<ContainerConfig>,
    starts: usize,
    stops: usize,
    removes: usize,
    builds: usize,
    executed: Vec<Vec<String>>,
    files: HashMap<String, String>,
    binaries: HashMap<String, String>,
}

pub(crate) struct FakeRuntime {
    has_image: bool,
    fail_build: bool,
    fail_start: bool,
    slow_program: Option<(String, Duration)>,
    state: Mutex<State>,
}

impl FakeRuntime {
    pub(crate) fn new() -> Self {
        Self {
            has_image: true,
            fail_build: false,
            fail_start: false,
            slow_program: None,
            state: Mutex::new(State::default()),
        }
    }

    pub(crate) fn without_image(mut self) -> Self {
        self.has_image = false;
        self
    }

    pub(crate) fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    pub(crate) fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Makes every exec of `program` take `delay`.
    pub(crate) fn with_slow_program(mut self, program: &str, delay: Duration) -> Self {
        self.slow_program = Some((program.to_string(), delay));
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("lock poisoned")
    }

    /// (starts, stops, removes)
    pub(crate) fn counts(&self) -> (usize, usize, usize) {
        let state = self.state();
        (state.starts, state.stops, state.removes)
    }

    pub(crate) fn removes(&self) -> usize {
        self.state().removes
    }

    pub(crate) fn builds(&self) -> usize {
        self.state().builds
    }

    pub(crate) fn created(&self) -> Vec<String> {
        self.state().created.clone()
    }

    pub(crate) fn container_configs(&self) -> Vec<ContainerConfig> {
        self.state().configs.clone()
    }

    pub(crate) fn executed(&self) -> Vec<Vec<String>> {
        self.state().executed.clone()
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    fn interpret(&self, cmd: &[String]) -> ExecResult {
        let mut state = self.state();
        let program = cmd.first().map(String::as_str).unwrap_or_default();
        let arg = |i: usize| cmd.get(i).cloned().unwrap_or_default();

        match program {
            "bash" if arg(1) == "/app/init.sh" => ExecResult::new(0, "init done\n"),
            "echo" => ExecResult::new(0, format!("{}\n", cmd[1..].join(" "))),
            "chmod" | "sleep" | "true" => ExecResult::new(0, ""),
            "bash" | "python3" => match state.files.get(&arg(1)) {
                Some(source) => run_script(source),
                None => ExecResult::new(127, format!("{}: No such file\n", arg(1))),
            },
            "gcc" | "g++" => {
                let output = arg(2);
                let source = state.files.get(&arg(3)).cloned().unwrap_or_default();
                if !source.contains("main(") {
                    return ExecResult::new(1, "error: undefined reference to `main'\n");
                }
                let printed = literals(&source, r#"(?:printf|puts)\("([^"\\]*)(?:\\n)?"\)|cout << "([^"]*)""#);
                state.binaries.insert(output, printed);
                ExecResult::new(0, "")
            }
            other => match state.binaries.get(other) {
                Some(printed) => ExecResult::new(0, printed.clone()),
                None => ExecResult::new(127, format!("{other}: command not found\n")),
            },
        }
    }
}

fn literals(source: &str, pattern: &str) -> String {
    let re = Regex::new(pattern).expect("valid regex");
    re.captures_iter(source)
        .filter_map(|c| c.iter().skip(1).flatten().next().map(|m| format!("{}\n", m.as_str())))
        .collect()
}

fn run_script(source: &str) -> ExecResult {
    if source.contains("input(") || source.contains("read -r") {
        return ExecResult::new(
            1,
            "Traceback (most recent call last):\nEOFError: EOF when reading a line\n",
        );
    }
    if source.starts_with(' ') || source.starts_with('\t') {
        return ExecResult::new(1, "IndentationError: unexpected indent\n");
    }
    let printed = literals(source, r#"print\(['"]([^'"]*)['"]\)|echo ['"]?([^'"\n]*)['"]?"#);
    ExecResult::new(0, printed)
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, _image: &str) -> bool {
        self.has_image || self.state().builds > 0
    }

    async fn build_image(&self, _image: &str, _context_dir: &Path) -> Result<(), DockerError> {
        if self.fail_build {
            return Err(DockerError::BuildFailed("no Dockerfile".to_string()));
        }
        self.state().builds += 1;
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String, DockerError> {
        let mut state = self.state();
        let id = format!("container-{}", state.created.len() + 1);
        state.created.push(format!("{id}:{}", config.name));
        state.configs.push(config.clone());
        Ok(id)
    }

    async fn start_container(&self, _id: &str) -> Result<(), DockerError> {
        if self.fail_start {
            return Err(DockerError::RunFailed("port already allocated".to_string()));
        }
        self.state().starts += 1;
        Ok(())
    }

    async fn exec_command(&self, _id: &str, cmd: &[String]) -> Result<ExecResult, DockerError> {
        self.state().executed.push(cmd.to_vec());
        if let Some((program, delay)) = &self.slow_program {
            if cmd.first() == Some(program) {
                tokio::time::sleep(*delay).await;
            }
        }
        Ok(self.interpret(cmd))
    }

    async fn upload_archive(
        &self,
        _id: &str,
        dest: &str,
        archive: Vec<u8>,
    ) -> Result<(), DockerError> {
        let mut reader = tar::Archive::new(archive.as_slice());
        let entries = reader.entries().map_err(|e| DockerError::CopyFailed(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| DockerError::CopyFailed(e.to_string()))?;
            let relative = entry
                .path()
                .map_err(|e| DockerError::CopyFailed(e.to_string()))?
                .to_string_lossy()
                .to_string();
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            let path = format!("{}/{}", dest.trim_end_matches('/'), relative);
            self.state().files.insert(path, content);
        }
        Ok(())
    }

    async fn stop_container(&self, _id: &str) -> Result<(), DockerError> {
        self.state().stops += 1;
        Ok(())
    }

    async fn remove_container(&self, _id: &str, _force: bool) -> Result<(), DockerError> {
        self.state().removes += 1;
        Ok(())
    }
}
