//! LLM clients, the Context Processor Pipeline/Compiler, and the worker and
//! orchestrator ReAct loops (spec §4.4-§4.7). Depends only on
//! `conclave-contracts`/`conclave-models`/`conclave-traits` so `conclave-core`
//! can depend on this crate (to spawn the loops) without a cycle.

pub mod context;
pub mod error;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod reasoning;
pub mod schema;
pub mod tools;
pub mod worker;

pub use error::{AiError, Result};
pub use orchestrator::{OrchestratorLoop, OrchestratorOutcome, OrchestratorStatus};
pub use tools::{HttpToolsGateway, NullToolsGateway};
pub use worker::{WorkerInput, WorkerLoop, WorkerOutcome, WorkerStatus};
