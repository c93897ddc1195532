//! The engine's stateful singletons (spec §2 C1-C5, C8-C10, C13): the
//! Registry, Governance Enforcer, Event Log/Progress Store/SSE
//! Broadcaster, HITL Checkpoint Manager, Memory Store, Artifact Store, and
//! the Workflow Executor that ties them together with `conclave-ai`'s
//! worker/orchestrator loops. Grounded on `restflow-core`'s split between
//! "the engine that owns state" and "the transport that shapes requests
//! onto it" (spec §9 "Ordering-sensitive mutable singletons ... reified as
//! explicit process-wide state owned by a startup routine").

pub mod artifact;
pub mod checkpoint;
pub mod error;
pub mod events;
pub mod executor;
pub mod governance;
pub mod memory;
pub mod registry;

pub use artifact::{ArtifactStore, SharedArtifactStore};
pub use checkpoint::{CheckpointManager, SharedCheckpointManager};
pub use error::{CoreError, RegistryValidationError, Result};
pub use events::{EventHub, SessionProgress, SharedEventHub};
pub use executor::{RunningSession, WorkflowExecutor};
pub use governance::{Governance, GovernancePolicy};
pub use memory::{MemoryStore, SharedMemoryStore};
pub use registry::{Registry, RegistryPaths, SharedRegistry, ORCHESTRATOR_AGENT_ID};
