//! Artifact version type (spec §3 "Artifact version", §4.10).

use chrono::{DateTime, Utc};
use conclave_contracts::ArtifactId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub artifact_id: ArtifactId,
    pub version: u32,
    #[serde(default)]
    pub parent_version: Option<u32>,
    pub handle: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactVersion {
    pub fn handle_for(artifact_id: &ArtifactId, version: u32) -> String {
        format!("artifact://{artifact_id}/v{version}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_has_expected_shape() {
        let id = ArtifactId::new("evidence_map");
        assert_eq!(
            ArtifactVersion::handle_for(&id, 3),
            "artifact://evidence_map/v3"
        );
    }
}
