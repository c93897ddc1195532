//! Context Processor Pipeline (C6) and Context Compiler (C7), spec §4.4/4.5.

pub mod compiler;
pub mod handoff;
pub mod pipeline;
pub mod tokens;

pub use compiler::{CompileForAgentRequest, CompileForOrchestratorRequest, CompileOutcome, ContextCompiler};
pub use handoff::{HandoffMode, HandoffRule};
pub use pipeline::{CompactionConfig, ContextProcessor, Pipeline, PipelineContext, ProcessorOutcome};
pub use tokens::{ContextLineageRecord, HeuristicTokenEstimator, ProcessorExecutionEntry, TokenEstimator};
