//! Artifact Store (C9, spec §4.10): one directory per artifact holding
//! `metadata.json` (the version list) and `v{n}.json` payload files.
//! Versions form a forest by `parent_version` (spec I5); handles are
//! stable once published. Grounded on `conclave-core::registry`'s
//! validate-then-persist-then-reload shape, retargeted at a per-artifact
//! append-only version list instead of a single reloadable document.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use conclave_contracts::ArtifactId;
use conclave_models::ArtifactVersion;
use conclave_storage::StorageLayout;
use conclave_traits::ArtifactLookup;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;

pub struct ArtifactStore {
    layout: Arc<StorageLayout>,
    lock: Mutex<()>,
}

impl ArtifactStore {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self {
            layout,
            lock: Mutex::new(()),
        }
    }

    async fn load_versions(&self, artifact_id: &ArtifactId) -> Result<Vec<ArtifactVersion>> {
        Ok(conclave_storage::atomic::read_json(&self.layout.artifact_metadata_path(artifact_id.as_str()))
            .await?
            .unwrap_or_default())
    }

    async fn persist_versions(&self, artifact_id: &ArtifactId, versions: &[ArtifactVersion]) -> Result<()> {
        conclave_storage::atomic::write_json_atomic(&self.layout.artifact_metadata_path(artifact_id.as_str()), &versions.to_vec()).await?;
        Ok(())
    }

    /// `new_version = max(existing) + 1` (or 1), writes the payload file,
    /// and atomically updates `metadata.json` with the new version's entry
    /// (spec §4.10 `save`).
    pub async fn save(
        &self,
        artifact_id: &ArtifactId,
        content: Value,
        parent_version: Option<u32>,
        metadata: Value,
        tags: Vec<String>,
    ) -> Result<ArtifactVersion> {
        let _guard = self.lock.lock().await;
        let mut versions = self.load_versions(artifact_id).await?;
        let new_version = versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;

        let bytes = serde_json::to_vec(&content)?;
        conclave_storage::atomic::write_json_atomic(&self.layout.artifact_version_path(artifact_id.as_str(), new_version), &content).await?;

        let entry = ArtifactVersion {
            artifact_id: artifact_id.clone(),
            version: new_version,
            parent_version,
            handle: ArtifactVersion::handle_for(artifact_id, new_version),
            size_bytes: bytes.len() as u64,
            metadata,
            tags,
            created_at: Utc::now(),
        };
        versions.push(entry.clone());
        self.persist_versions(artifact_id, &versions).await?;
        Ok(entry)
    }

    /// Returns the payload and metadata for `version`, or the latest
    /// version if `None` (spec §4.10 `get`).
    pub async fn get(&self, artifact_id: &ArtifactId, version: Option<u32>) -> Result<Option<(Value, ArtifactVersion)>> {
        let versions = self.load_versions(artifact_id).await?;
        let target = match version {
            Some(v) => versions.into_iter().find(|entry| entry.version == v),
            None => versions.into_iter().max_by_key(|entry| entry.version),
        };
        let Some(entry) = target else { return Ok(None) };
        let content: Option<Value> =
            conclave_storage::atomic::read_json(&self.layout.artifact_version_path(artifact_id.as_str(), entry.version)).await?;
        Ok(content.map(|c| (c, entry)))
    }

    pub async fn list_versions(&self, artifact_id: &ArtifactId) -> Result<Vec<ArtifactVersion>> {
        let mut versions = self.load_versions(artifact_id).await?;
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    /// Lists every artifact id with at least one version on disk (spec
    /// §4.10 `list_all_artifacts`).
    pub async fn list_all_artifacts(&self) -> Result<Vec<String>> {
        Ok(conclave_storage::atomic::list_subdirs(&self.layout.artifacts_root()).await?)
    }

    /// Walks `parent_version` back to a root (spec §4.10
    /// `get_version_lineage`); returns the chain from `version` down to the
    /// root, i.e. `[version, parent, grandparent, ..., root]`.
    pub async fn get_version_lineage(&self, artifact_id: &ArtifactId, version: u32) -> Result<Vec<ArtifactVersion>> {
        let versions = self.load_versions(artifact_id).await?;
        let by_version: std::collections::HashMap<u32, ArtifactVersion> =
            versions.into_iter().map(|v| (v.version, v)).collect();
        let mut chain = Vec::new();
        let mut current = by_version.get(&version).cloned();
        let mut seen = std::collections::HashSet::new();
        while let Some(entry) = current {
            if !seen.insert(entry.version) {
                break; // defensive: a cyclic parent pointer would otherwise loop forever
            }
            let next = entry.parent_version.and_then(|p| by_version.get(&p).cloned());
            chain.push(entry);
            current = next;
        }
        Ok(chain)
    }

    /// Keeps the most recent `max_versions` plus the immediate parent of
    /// any kept version, deleting the rest (spec §4.10
    /// `apply_version_limit`).
    pub async fn apply_version_limit(&self, artifact_id: &ArtifactId, max_versions: usize) -> Result<Vec<u32>> {
        let _guard = self.lock.lock().await;
        let mut versions = self.load_versions(artifact_id).await?;
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        if versions.len() <= max_versions {
            return Ok(Vec::new());
        }

        let by_version: std::collections::HashMap<u32, ArtifactVersion> =
            versions.iter().map(|v| (v.version, v.clone())).collect();
        let mut keep: std::collections::HashSet<u32> = versions.iter().take(max_versions).map(|v| v.version).collect();
        // Spec: "plus any that are parents of kept versions" — one hop,
        // not the full transitive ancestry (which would keep everything
        // in a linear chain and defeat the limit entirely).
        let direct_parents: Vec<u32> = keep
            .iter()
            .filter_map(|version| by_version.get(version).and_then(|v| v.parent_version))
            .collect();
        keep.extend(direct_parents);

        let mut removed = Vec::new();
        for version in &versions {
            if !keep.contains(&version.version) {
                conclave_storage::atomic::remove_file_if_exists(&self.layout.artifact_version_path(artifact_id.as_str(), version.version))
                    .await?;
                removed.push(version.version);
            }
        }
        let kept_versions: Vec<ArtifactVersion> = versions.into_iter().filter(|v| keep.contains(&v.version)).collect();
        self.persist_versions(artifact_id, &kept_versions).await?;
        removed.sort_unstable();
        Ok(removed)
    }

    pub async fn delete_version(&self, artifact_id: &ArtifactId, version: u32) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut versions = self.load_versions(artifact_id).await?;
        let found = versions.iter().any(|v| v.version == version);
        if !found {
            return Ok(false);
        }
        versions.retain(|v| v.version != version);
        conclave_storage::atomic::remove_file_if_exists(&self.layout.artifact_version_path(artifact_id.as_str(), version)).await?;
        self.persist_versions(artifact_id, &versions).await?;
        Ok(true)
    }
}

#[async_trait]
impl ArtifactLookup for ArtifactStore {
    async fn get(&self, artifact_id: &str, version: Option<u32>) -> Option<Value> {
        self.get(&ArtifactId::new(artifact_id), version)
            .await
            .ok()
            .flatten()
            .map(|(content, _)| content)
    }
}

pub type SharedArtifactStore = Arc<ArtifactStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_assigns_contiguous_versions_and_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let store = ArtifactStore::new(layout);
        let id = ArtifactId::new("evidence_map");

        let v1 = store.save(&id, serde_json::json!({"n": 1}), None, Value::Null, vec![]).await.unwrap();
        assert_eq!(v1.version, 1);
        let v2 = store.save(&id, serde_json::json!({"n": 2}), Some(1), Value::Null, vec![]).await.unwrap();
        assert_eq!(v2.version, 2);

        let (content, entry) = store.get(&id, Some(1)).await.unwrap().unwrap();
        assert_eq!(content, serde_json::json!({"n": 1}));
        assert_eq!(entry.handle, "artifact://evidence_map/v1");

        let (latest, _) = store.get(&id, None).await.unwrap().unwrap();
        assert_eq!(latest, serde_json::json!({"n": 2}));
    }

    #[tokio::test]
    async fn lineage_walks_parent_chain_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let store = ArtifactStore::new(layout);
        let id = ArtifactId::new("a1");
        store.save(&id, serde_json::json!(1), None, Value::Null, vec![]).await.unwrap();
        store.save(&id, serde_json::json!(2), Some(1), Value::Null, vec![]).await.unwrap();
        store.save(&id, serde_json::json!(3), Some(2), Value::Null, vec![]).await.unwrap();

        let lineage = store.get_version_lineage(&id, 3).await.unwrap();
        let versions: Vec<u32> = lineage.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn apply_version_limit_keeps_recent_and_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let store = ArtifactStore::new(layout);
        let id = ArtifactId::new("a1");
        for n in 1..=5u32 {
            let parent = if n == 1 { None } else { Some(n - 1) };
            store.save(&id, serde_json::json!(n), parent, Value::Null, vec![]).await.unwrap();
        }

        let removed = store.apply_version_limit(&id, 2).await.unwrap();
        assert_eq!(removed, vec![1, 2]);
        let remaining = store.list_versions(&id).await.unwrap();
        let versions: Vec<u32> = remaining.iter().map(|v| v.version).collect();
        assert_eq!(versions, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn list_all_artifacts_is_empty_before_any_save() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path()));
        let store = ArtifactStore::new(layout);
        assert!(store.list_all_artifacts().await.unwrap().is_empty());
    }
}
