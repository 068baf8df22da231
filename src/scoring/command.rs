//! Scorer delegating to an external evaluator process.
//!
//! The process receives one JSON request on stdin:
//!
//! ```json
//! {"case_index": "1_1", "text": "...", "dataset": "/data/index1_30_codes_full.json", "is_execution": true}
//! ```
//!
//! and must print the score as a JSON number or string on the last non-empty
//! line of stdout.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Score, Scorer};
use crate::error::ScorerError;

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    case_index: &'a str,
    text: &'a str,
    dataset: &'a Path,
    is_execution: bool,
}

/// Runs `program args...` once per score.
#[derive(Debug, Clone)]
pub struct CommandScorer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandScorer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(120),
        }
    }

    /// Splits a command line on whitespace.
    ///
    /// Returns `None` for an empty command line.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Parses the last non-empty stdout line as a score.
fn parse_score(stdout: &str) -> Result<Score, ScorerError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| ScorerError::InvalidOutput("empty output".to_string()))?;

    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Score::Value)
            .ok_or_else(|| ScorerError::InvalidOutput(format!("not an integer: {n}"))),
        Ok(serde_json::Value::String(s)) => Ok(Score::Label(s)),
        _ => Err(ScorerError::InvalidOutput(line.to_string())),
    }
}

#[async_trait]
impl Scorer for CommandScorer {
    async fn score(
        &self,
        case_index: &str,
        text: &str,
        dataset: &Path,
        is_execution: bool,
    ) -> Result<Score, ScorerError> {
        let request = serde_json::to_vec(&ScoreRequest {
            case_index,
            text,
            dataset,
            is_execution,
        })?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScorerError::Spawn {
                command: self.command_line(),
                reason: e.to_string(),
            })?;

        // The request is written while output is collected so a scorer that
        // fills stdout before draining stdin cannot deadlock the pipes.
        let stdin = child.stdin.take();
        let write_request = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&request).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let (written, output) = tokio::time::timeout(self.timeout, async {
            tokio::join!(write_request, child.wait_with_output())
        })
        .await
        .map_err(|_| ScorerError::Timeout(self.timeout.as_secs()))?;
        let output = output?;

        match written {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(command = %self.command_line(), "Scorer exited without reading the request");
            }
            Err(e) => return Err(e.into()),
            Ok(()) => {}
        }

        if !output.status.success() {
            return Err(ScorerError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let score = parse_score(&stdout)?;
        debug!(case = case_index, score = %score, is_execution, "External score");
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandScorer {
        CommandScorer::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("3\n").unwrap(), Score::Value(3));
        assert_eq!(parse_score("loading\n\"executed\"\n\n").unwrap(), Score::label("executed"));
        assert!(matches!(parse_score(""), Err(ScorerError::InvalidOutput(_))));
        assert!(matches!(parse_score("1.5"), Err(ScorerError::InvalidOutput(_))));
        assert!(matches!(parse_score("{}"), Err(ScorerError::InvalidOutput(_))));
    }

    #[test]
    fn test_from_command_line() {
        let scorer = CommandScorer::from_command_line("python3 eval.py --strict").unwrap();
        assert_eq!(scorer.program, "python3");
        assert_eq!(scorer.args, vec!["eval.py", "--strict"]);
        assert!(CommandScorer::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn test_command_receives_request_on_stdin() {
        let scorer = sh(r#"if grep -q '"is_execution":true'; then echo 3; else echo 0; fi"#);

        let score = scorer
            .score("1_2", "x\n", Path::new("data.json"), true)
            .await
            .unwrap();
        assert_eq!(score, Score::Value(3));

        let score = scorer
            .score("1_2", "no", Path::new("data.json"), false)
            .await
            .unwrap();
        assert_eq!(score, Score::Value(0));
    }

    #[tokio::test]
    async fn test_command_non_zero_exit() {
        let scorer = sh("cat >/dev/null; echo bad >&2; exit 2");
        let err = scorer
            .score("1_1", "x", Path::new("data.json"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ScorerError::NonZeroExit { code: 2, ref stderr } if stderr == "bad"));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let scorer = sh("sleep 5").with_timeout(Duration::from_millis(100));
        let err = scorer
            .score("1_1", "x", Path::new("data.json"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ScorerError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_timeout_covers_undrained_large_request() {
        let scorer = sh("sleep 30").with_timeout(Duration::from_millis(200));
        let text = "x".repeat(1024 * 1024);
        let started = std::time::Instant::now();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            scorer.score("1_1", &text, Path::new("data.json"), true),
        )
        .await
        .expect("scorer should honour its own timeout");

        assert!(matches!(result, Err(ScorerError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_scorer_ignoring_stdin_still_scores() {
        let scorer = sh("echo 1");
        let text = "y".repeat(1024 * 1024);
        let score = scorer
            .score("1_1", &text, Path::new("data.json"), false)
            .await
            .unwrap();
        assert_eq!(score, Score::Value(1));
    }

    #[tokio::test]
    async fn test_command_spawn_failure() {
        let scorer = CommandScorer::new("definitely-not-a-real-scorer", vec![]);
        let err = scorer
            .score("1_1", "x", Path::new("data.json"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ScorerError::Spawn { .. }));
    }
}
