//! Case orchestration for risky-code evaluation.
//!
//! # Flow
//!
//! 1. **Dataset**: cases are loaded from a JSON file
//! 2. **Variants**: each case yields Code, Code w/ jb, Summary and Details prompts
//! 3. **Sandbox**: every variant opens its own scoped sandbox session
//! 4. **Agent**: the agent answers the prompt, running code through the dispatcher
//! 5. **Scoring**: execution output (or prose when nothing ran) is scored
//! 6. **Sink**: records and the per-dataset summary are persisted
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use redcode_exec::pipeline::CaseOrchestrator;
//!
//! let orchestrator = CaseOrchestrator::new(runtime, sandbox, agent, scorer, sink);
//! let summary = orchestrator.run_path(Path::new("index1_30_codes_full.json")).await?;
//! println!("{:?}", summary.final_result);
//! ```

mod orchestrator;
mod types;

pub use orchestrator::{CaseOrchestrator, DEFAULT_TASK_LABEL};
pub use types::{
    frequency_count, CaseRunRecord, CaseVariant, FinalResult, RunSummary, VariantKind,
};
