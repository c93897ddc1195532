//! Tool registry object (spec §3 "Tool").

use conclave_contracts::ToolId;
use serde::{Deserialize, Serialize};

/// A tool the Tools Gateway knows how to execute. Schemas are plain
/// `serde_json::Value` holding a JSON-Schema draft 2020-12 document; we do
/// not parse or validate the draft itself here (spec §1 puts the Tools
/// Gateway HTTP service out of scope), only well-formedness at registry
/// write time (spec §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub tool_id: ToolId,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    /// Opaque reference the Tools Gateway resolves; e.g. a path or URL.
    pub endpoint: String,
    #[serde(default)]
    pub lineage_tags: Vec<String>,
}
