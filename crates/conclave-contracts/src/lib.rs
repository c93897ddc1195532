//! Shared identifiers and marker types used across the orchestration platform.
//!
//! Kept deliberately tiny: this crate has no business logic, only the id
//! newtypes and the `RegistryKind` tag that every higher crate depends on
//! without pulling in the rest of the object model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The five kinds of objects the Registry (C1) holds (spec §3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Agent,
    Tool,
    ModelProfile,
    Workflow,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistryKind::Agent => "agent",
            RegistryKind::Tool => "tool",
            RegistryKind::ModelProfile => "model_profile",
            RegistryKind::Workflow => "workflow",
        };
        f.write_str(s)
    }
}

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(AgentId);
id_newtype!(ToolId);
id_newtype!(ModelProfileId);
id_newtype!(WorkflowId);
id_newtype!(SessionId);
id_newtype!(CheckpointConfigId);
id_newtype!(CheckpointInstanceId);
id_newtype!(MemoryId);
id_newtype!(ArtifactId);

/// Generate a session id in the `{unix_ms}_{rand6}` shape used by the
/// Executor (spec §4.11 step 1: "timestamp + short random").
pub fn new_session_id(now_ms: i64) -> SessionId {
    SessionId::new(format!("{now_ms}_{}", short_rand()))
}

/// Generate a non-session-ordered id in the `{YYYYMMDDHHMMSS}_{rand8}` shape
/// for identifiers that need a roughly-sortable unique label but no per-
/// session ordering guarantee (compaction archive ids, memory ids,
/// compilation ids). Session event ids have a stricter requirement (spec §9
/// "ids must be monotonically non-decreasing per session") and are assigned
/// by `EventHub::record`'s own per-session counter instead, not this
/// function's random suffix.
pub fn new_event_id(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!("{}_{}", timestamp.format("%Y%m%d%H%M%S"), hex_rand8())
}

fn short_rand() -> String {
    hex_rand8()[..6].to_string()
}

fn hex_rand8() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    // Deliberately dependency-free: a cheap xorshift seeded from the clock's
    // nanosecond component. Collision risk is acceptable for id suffixes
    // disambiguated by the caller's own sequence counter.
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let mut x = nanos ^ 0x9E3779B9;
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    format!("{:08x}", x)
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("unknown registry kind: {0}")]
    UnknownKind(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_roundtrips_through_json() {
        let id = AgentId::new("fraud_agent");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"fraud_agent\"");
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn event_id_has_expected_shape() {
        let id = new_event_id(chrono::Utc::now());
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 14);
        assert_eq!(parts[1].len(), 8);
    }
}
