//! Shared data model for the orchestration platform (spec §3): the
//! registry object kinds, session/event stream shapes, checkpoint
//! lifecycle, memory and artifact records, and the compiled-context shape
//! produced by the context pipeline.

pub mod agent;
pub mod artifact;
pub mod checkpoint;
pub mod context;
pub mod event;
pub mod memory;
pub mod model_profile;
pub mod session;
pub mod workflow;

pub use agent::{Agent, ArtifactAccessMode, BudgetAllocation, ContextRequirements, LoopBounds};
pub use artifact::ArtifactVersion;
pub use checkpoint::{
    CheckpointConfig, CheckpointInstance, CheckpointResolution, CheckpointStatus, CheckpointType,
    ResolutionAction, TimeoutAction, TimeoutConfig, TriggerCondition, TriggerConditionType,
    TriggerPoint,
};
pub use context::{CompiledContext, ContextScope};
pub use event::{Event, EventPayload};
pub use memory::{Memory, RetrievalMode};
pub use model_profile::{ModelProfile, Provider, RetryPolicy};
pub use session::{Session, SessionStatus};
pub mod tool;
pub use tool::Tool;
pub use workflow::{CompletionCriterion, Workflow, WorkflowMode};
