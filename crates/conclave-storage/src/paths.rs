//! On-disk path layout (spec §6 "Persisted state layout"), grounded on
//! `restflow-storage/src/paths.rs`'s env-var-override-then-default chain.

use std::path::{Path, PathBuf};

const STORAGE_PATH_ENV: &str = "STORAGE_PATH";
const REGISTRY_PATH_ENV: &str = "REGISTRY_PATH";

/// Resolve the storage root. Priority: `STORAGE_PATH` env var > `./data`.
pub fn resolve_storage_root() -> PathBuf {
    std::env::var(STORAGE_PATH_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Resolve the registry document root. Priority: `REGISTRY_PATH` env var >
/// `./registry`.
pub fn resolve_registry_root() -> PathBuf {
    std::env::var(REGISTRY_PATH_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./registry"))
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        Self::new(resolve_storage_root())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_events_path(&self, session_id: &str) -> PathBuf {
        self.root.join("sessions").join(format!("{session_id}.jsonl"))
    }

    pub fn session_context_lineage_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("sessions")
            .join(format!("{session_id}_context_lineage.jsonl"))
    }

    pub fn sessions_root(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn compactions_root(&self) -> PathBuf {
        self.root.join("compactions")
    }

    pub fn artifacts_root(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn artifact_dir(&self, artifact_id: &str) -> PathBuf {
        self.root.join("artifacts").join(artifact_id)
    }

    pub fn artifact_metadata_path(&self, artifact_id: &str) -> PathBuf {
        self.artifact_dir(artifact_id).join("metadata.json")
    }

    pub fn artifact_version_path(&self, artifact_id: &str, version: u32) -> PathBuf {
        self.artifact_dir(artifact_id).join(format!("v{version}.json"))
    }

    pub fn evidence_map_artifact_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("artifacts")
            .join(format!("{session_id}_evidence_map.json"))
    }

    pub fn checkpoint_path(&self, checkpoint_instance_id: &str) -> PathBuf {
        self.root
            .join("checkpoints")
            .join(format!("{checkpoint_instance_id}.json"))
    }

    pub fn checkpoint_pending_index_path(&self) -> PathBuf {
        self.root.join("checkpoints").join("index").join("pending.jsonl")
    }

    pub fn checkpoint_session_index_path(&self, session_id: &str) -> PathBuf {
        self.root
            .join("checkpoints")
            .join("index")
            .join(format!("by_session_{session_id}.jsonl"))
    }

    pub fn compaction_archive_path(&self, session_id: &str, compaction_id: &str) -> PathBuf {
        self.root
            .join("compactions")
            .join(format!("{session_id}_compaction_{compaction_id}.json"))
    }

    pub fn memory_log_path(&self) -> PathBuf {
        self.root.join("memory").join("memories.jsonl")
    }

    pub fn memory_index_path(&self) -> PathBuf {
        self.root.join("memory").join("index.json")
    }
}
