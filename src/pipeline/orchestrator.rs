//! Case orchestrator driving agent, sandbox, scorer and sink.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use super::types::{CaseRunRecord, CaseVariant, RunSummary, VariantKind};
use crate::agent::{partition_transcript, Agent};
use crate::dataset::{load_dataset, Case, Dataset};
use crate::error::DatasetError;
use crate::execution::{CommandDispatcher, ContainerRuntime, SandboxConfig, SandboxSession};
use crate::scoring::{Score, Scorer};
use crate::sink::ResultSink;

/// Task label written into run summaries by default.
pub const DEFAULT_TASK_LABEL: &str = "python_eval_OpenCode";

/// Runs every variant of every case, one sandbox session per variant.
pub struct CaseOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    sandbox: SandboxConfig,
    agent: Arc<dyn Agent>,
    scorer: Arc<dyn Scorer>,
    sink: Arc<dyn ResultSink>,
    task: String,
}

impl CaseOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        sandbox: SandboxConfig,
        agent: Arc<dyn Agent>,
        scorer: Arc<dyn Scorer>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            runtime,
            sandbox,
            agent,
            scorer,
            sink,
            task: DEFAULT_TASK_LABEL.to_string(),
        }
    }

    /// Sets the task label recorded in run summaries.
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    pub fn sandbox_config(&self) -> &SandboxConfig {
        &self.sandbox
    }

    /// Loads the dataset at `path` and runs it.
    ///
    /// # Errors
    ///
    /// Returns `DatasetError` if the dataset cannot be loaded. Failures of
    /// individual variants never abort the run.
    pub async fn run_path(&self, path: &Path) -> Result<RunSummary, DatasetError> {
        let dataset = load_dataset(path)?;
        Ok(self.run_dataset(&dataset).await)
    }

    /// Runs all cases of `dataset` sequentially and persists the summary.
    pub async fn run_dataset(&self, dataset: &Dataset) -> RunSummary {
        let started = Instant::now();
        info!(dataset = %dataset.id, cases = dataset.len(), "Starting dataset run");

        let mut scores: BTreeMap<VariantKind, Vec<Score>> = BTreeMap::new();
        for case in &dataset.cases {
            let records = self.run_case(case, &dataset.path).await;
            let line: Vec<String> = records.iter().map(|r| r.score.to_string()).collect();
            for record in records {
                scores.entry(record.variant).or_default().push(record.score);
            }
            info!(case = %case.index, scores = %line.join(" "), "Case done");
        }

        let summary = RunSummary::from_scores(
            &dataset.id,
            dataset.path.clone(),
            &self.task,
            &scores,
            started.elapsed().as_secs_f64(),
        );

        if let Err(e) = self.sink.append_summary(&summary) {
            error!(dataset = %dataset.id, error = %e, "Failed to persist run summary");
        }

        info!(
            dataset = %dataset.id,
            duration_secs = summary.duration,
            final_result = ?summary.final_result,
            "Dataset run complete"
        );
        summary
    }

    /// Runs the four variants of `case` and persists each record.
    pub async fn run_case(&self, case: &Case, dataset: &Path) -> Vec<CaseRunRecord> {
        let mut records = Vec::with_capacity(VariantKind::ALL.len());
        for variant in CaseVariant::variants_for(case) {
            let record = self.run_variant(&variant, dataset).await;
            if let Err(e) = self.sink.append_record(&record) {
                error!(case = %record.index, variant = %record.variant, error = %e, "Failed to persist record");
            }
            records.push(record);
        }
        records
    }

    /// Runs one variant in a fresh sandbox and scores the transcript.
    ///
    /// Provisioning, agent and scorer failures yield a `no_signal` record
    /// carrying the error text.
    pub async fn run_variant(&self, variant: &CaseVariant, dataset: &Path) -> CaseRunRecord {
        let agent = Arc::clone(&self.agent);
        let prompt = variant.prompt.clone();

        let outcome = SandboxSession::scoped(
            Arc::clone(&self.runtime),
            self.sandbox.clone(),
            |session| async move {
                let dispatcher = CommandDispatcher::new(session);
                agent.chat(&prompt, &dispatcher).await
            },
        )
        .await;

        let transcript = match outcome {
            Ok(Ok(transcript)) => transcript,
            Ok(Err(e)) => {
                warn!(case = %variant.case_index, variant = %variant.kind, error = %e, "Agent failed");
                return CaseRunRecord::failed(variant, e.to_string());
            }
            Err(e) => {
                warn!(case = %variant.case_index, variant = %variant.kind, error = %e, "Sandbox failed");
                return CaseRunRecord::failed(variant, e.to_string());
            }
        };

        let (responses, executions) = partition_transcript(&transcript);
        let execution_str = executions.join(" ");
        let response_str = responses.join(" ");

        let is_execution = !executions.is_empty();
        let text = if is_execution {
            &execution_str
        } else {
            info!(case = %variant.case_index, variant = %variant.kind, "No execution result found");
            &response_str
        };

        let (score, error) = match self
            .scorer
            .score(&variant.case_index, text, dataset, is_execution)
            .await
        {
            Ok(score) => (score, None),
            Err(e) => {
                warn!(case = %variant.case_index, variant = %variant.kind, error = %e, "Scorer failed");
                (Score::no_signal(), Some(e.to_string()))
            }
        };

        CaseRunRecord {
            index: variant.case_index.clone(),
            variant: variant.kind,
            execution_str,
            response_str,
            score,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{extract_code_block, TranscriptMessage};
    use crate::error::{AgentError, ScorerError, SinkError};
    use crate::execution::testing::FakeRuntime;
    use crate::execution::{CodeRunner, RetryPolicy};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Agent that runs the prompt's code block in a fixed language.
    struct ScriptedAgent {
        language: String,
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        async fn chat(
            &self,
            prompt: &str,
            runner: &dyn CodeRunner,
        ) -> Result<Vec<TranscriptMessage>, AgentError> {
            match extract_code_block(prompt) {
                Some(block) => {
                    let output = runner
                        .run_code(&self.language, &block.code)
                        .await
                        .map_err(|e| AgentError::ExecutionFailed(e.to_string()))?;
                    Ok(vec![
                        TranscriptMessage::assistant("Running the code."),
                        TranscriptMessage::executor(output.content),
                        TranscriptMessage::assistant("Done."),
                    ])
                }
                None => Ok(vec![TranscriptMessage::assistant("I won't do that.")]),
            }
        }
    }

    /// Scorer returning 3 for executions and 0 otherwise.
    #[derive(Default)]
    struct StubScorer {
        calls: Mutex<Vec<(String, String, bool)>>,
    }

    #[async_trait]
    impl Scorer for StubScorer {
        async fn score(
            &self,
            case_index: &str,
            text: &str,
            _dataset: &Path,
            is_execution: bool,
        ) -> Result<Score, ScorerError> {
            self.calls.lock().expect("lock poisoned").push((
                case_index.to_string(),
                text.to_string(),
                is_execution,
            ));
            Ok(Score::Value(if is_execution { 3 } else { 0 }))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<CaseRunRecord>>,
        summaries: Mutex<Vec<RunSummary>>,
    }

    impl ResultSink for MemorySink {
        fn append_record(&self, record: &CaseRunRecord) -> Result<(), SinkError> {
            self.records.lock().expect("lock poisoned").push(record.clone());
            Ok(())
        }

        fn append_summary(&self, summary: &RunSummary) -> Result<(), SinkError> {
            self.summaries.lock().expect("lock poisoned").push(summary.clone());
            Ok(())
        }
    }

    fn dataset(cases: Vec<Case>) -> Dataset {
        Dataset {
            id: "1".to_string(),
            path: PathBuf::from("index1_30_codes_full.json"),
            cases,
        }
    }

    fn python_case(index: &str) -> Case {
        Case {
            index: index.to_string(),
            language: "python".to_string(),
            code: "print('x')".to_string(),
            text_summary: "Print x.".to_string(),
            text_details: "Print the letter x to stdout.".to_string(),
        }
    }

    fn orchestrator(
        runtime: Arc<FakeRuntime>,
        scorer: Arc<StubScorer>,
        sink: Arc<MemorySink>,
    ) -> CaseOrchestrator {
        let sandbox = SandboxConfig::default().with_retry(RetryPolicy::new(
            Duration::from_millis(200),
            3,
            Duration::from_millis(1),
        ));
        let agent = Arc::new(ScriptedAgent {
            language: "python".to_string(),
        });
        CaseOrchestrator::new(runtime, sandbox, agent, scorer, sink)
    }

    #[tokio::test]
    async fn test_each_variant_gets_its_own_container() {
        let runtime = Arc::new(FakeRuntime::new());
        let sink = Arc::new(MemorySink::default());
        let orch = orchestrator(runtime.clone(), Arc::new(StubScorer::default()), sink.clone());

        let records = orch.run_case(&python_case("1_1"), Path::new("d.json")).await;

        assert_eq!(records.len(), 4);
        let created = runtime.created();
        assert_eq!(created.len(), 4);
        let mut unique = created.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 4);
        assert_eq!(runtime.counts(), (4, 4, 4));
        assert_eq!(sink.records.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_code_variant_end_to_end() {
        let runtime = Arc::new(FakeRuntime::new());
        let scorer = Arc::new(StubScorer::default());
        let orch = orchestrator(runtime, scorer.clone(), Arc::new(MemorySink::default()));

        let variant = CaseVariant::variants_for(&python_case("1_1")).remove(0);
        let record = orch.run_variant(&variant, Path::new("d.json")).await;

        assert_eq!(record.variant, VariantKind::Code);
        assert_eq!(record.execution_str, "x\n");
        assert_eq!(record.response_str, "Running the code. Done.");
        assert_eq!(record.score, Score::Value(3));
        assert!(record.error.is_none());
        assert_eq!(
            scorer.calls.lock().unwrap().as_slice(),
            &[("1_1".to_string(), "x\n".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_text_variant_scores_response() {
        let runtime = Arc::new(FakeRuntime::new());
        let scorer = Arc::new(StubScorer::default());
        let orch = orchestrator(runtime, scorer.clone(), Arc::new(MemorySink::default()));

        let variant = CaseVariant::variants_for(&python_case("1_1")).remove(2);
        let record = orch.run_variant(&variant, Path::new("d.json")).await;

        assert_eq!(record.variant, VariantKind::Summary);
        assert_eq!(record.execution_str, "");
        assert_eq!(record.score, Score::Value(0));
        let calls = scorer.calls.lock().unwrap();
        assert_eq!(calls[0].1, "I won't do that.");
        assert!(!calls[0].2);
    }

    #[tokio::test]
    async fn test_run_dataset_summary_and_determinism() {
        let cases = vec![python_case("1_1"), python_case("1_2")];

        let mut results = Vec::new();
        for _ in 0..2 {
            let sink = Arc::new(MemorySink::default());
            let orch = orchestrator(
                Arc::new(FakeRuntime::new()),
                Arc::new(StubScorer::default()),
                sink.clone(),
            );
            let summary = orch.run_dataset(&dataset(cases.clone())).await;
            assert_eq!(sink.summaries.lock().unwrap().len(), 1);
            assert_eq!(sink.records.lock().unwrap().len(), 8);
            results.push(summary.final_result);
        }

        assert_eq!(results[0], results[1]);
        let code = &results[0][&VariantKind::Code];
        assert_eq!(code.get("3"), Some(&2));
        let details = &results[0][&VariantKind::Details];
        assert_eq!(details.get("0"), Some(&2));
    }

    #[tokio::test]
    async fn test_provisioning_failure_continues_with_no_signal() {
        let runtime = Arc::new(FakeRuntime::new().without_image().failing_build());
        let scorer = Arc::new(StubScorer::default());
        let sink = Arc::new(MemorySink::default());
        let orch = orchestrator(runtime.clone(), scorer.clone(), sink.clone());

        let summary = orch.run_dataset(&dataset(vec![python_case("1_1")])).await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.score.is_no_signal()));
        assert!(records[0]
            .error
            .as_deref()
            .unwrap()
            .contains("provisioning failed"));
        assert!(scorer.calls.lock().unwrap().is_empty());
        assert_eq!(runtime.counts(), (0, 0, 0));
        for kind in VariantKind::ALL {
            assert_eq!(summary.final_result[&kind].get("no_signal"), Some(&1));
        }
    }

    #[tokio::test]
    async fn test_run_path_missing_dataset_is_fatal() {
        let orch = orchestrator(
            Arc::new(FakeRuntime::new()),
            Arc::new(StubScorer::default()),
            Arc::new(MemorySink::default()),
        );
        let result = orch.run_path(Path::new("/nonexistent/index9_30_codes_full.json")).await;
        assert!(matches!(result, Err(DatasetError::Read { .. })));
    }
}
