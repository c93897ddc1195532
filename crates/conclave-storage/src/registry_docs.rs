//! Loading/writing the Registry's backing documents (spec §4.1: "Loaded
//! from a set of declarative documents at startup ... write the backing
//! document to a temporary file, atomically rename over the original,
//! then reload to confirm").

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Read a YAML document holding a list of registry objects. Missing files
/// are treated as an empty catalog (a freshly-initialized registry).
pub async fn load_yaml_list<T: for<'de> Deserialize<'de> + Send + 'static>(path: &Path) -> Result<Vec<T>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<T>> {
        match std::fs::read(&path) {
            Ok(bytes) => Ok(serde_yaml::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    })
    .await
    .map_err(|e| crate::error::StorageError::Lock(e.to_string()))?
}

/// Atomically overwrite a YAML document with the given list, via a
/// sibling temp file + rename (spec §4.1 write path).
pub async fn save_yaml_list<T: Serialize>(path: &Path, values: &[T]) -> Result<()> {
    let yaml = serde_yaml::to_string(values)?;
    crate::atomic::write_text_atomic(path, &yaml).await
}
