//! Atomic file primitives: write-temp-then-rename for whole-file writes
//! (spec §4.1, §6), and OS-level exclusive-lock append for JSONL logs
//! (spec §4.3 "both in-process mutex and OS-level exclusive file lock ...
//! flushed + fsynced before returning").
//!
//! Grounded on the teacher's async/error-propagation idiom
//! (`restflow-ai/src/error.rs`); the atomic-rename and file-locking
//! primitives themselves are sourced from the wider example pack since
//! the teacher persists through `redb` and has no file-based equivalent
//! (`unicity-astrid-astrid`'s workspace pulls in `fs2` for exactly this).

use std::io::Write;
use std::path::Path;

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, StorageError};

/// Serialize `value` and write it to `path` atomically: write to a sibling
/// temp file in the same directory, fsync, then rename over the target.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let path = path.to_path_buf();
    let json = serde_json::to_vec_pretty(value)?;
    tokio::task::spawn_blocking(move || write_bytes_atomic(&path, &json))
        .await
        .map_err(|e| StorageError::Lock(e.to_string()))?
}

/// Write arbitrary text to `path` atomically (used for non-JSON documents
/// such as the Registry's YAML catalogs).
pub async fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    let path = path.to_path_buf();
    let bytes = text.as_bytes().to_vec();
    tokio::task::spawn_blocking(move || write_bytes_atomic(&path, &bytes))
        .await
        .map_err(|e| StorageError::Lock(e.to_string()))?
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ))
    })?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

/// Read and deserialize a JSON file, if present.
pub async fn read_json<T: DeserializeOwned + Send + 'static>(path: &Path) -> Result<Option<T>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Option<T>> {
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    })
    .await
    .map_err(|e| StorageError::Lock(e.to_string()))?
}

/// Append one JSON-serialized line under an OS-level exclusive file lock,
/// flushing and fsyncing before returning. Intended to be combined with an
/// in-process per-key mutex by the caller (spec §4.3, §5 "Shared-resource
/// policy").
pub async fn append_jsonl_locked<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let path = path.to_path_buf();
    let line = serde_json::to_string(value)?;
    tokio::task::spawn_blocking(move || -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.lock_exclusive()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        let result = (|| -> Result<()> {
            let mut file = &file;
            writeln!(file, "{line}")?;
            file.sync_all()?;
            Ok(())
        })();
        let _ = file.unlock();
        result
    })
    .await
    .map_err(|e| StorageError::Lock(e.to_string()))?
}

/// Read a JSONL file line by line, skipping and logging malformed lines
/// rather than failing the whole read (spec §4.3 "Readers tolerate and
/// skip malformed lines").
pub async fn read_jsonl<T: DeserializeOwned + Send + 'static>(path: &Path) -> Result<Vec<T>> {
    let path_buf = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<T>> {
        let content = match std::fs::read_to_string(&path_buf) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(value) => out.push(value),
                Err(err) => {
                    tracing::warn!(
                        path = %path_buf.display(),
                        line = idx + 1,
                        error = %err,
                        "skipping malformed JSONL line"
                    );
                }
            }
        }
        Ok(out)
    })
    .await
    .map_err(|e| StorageError::Lock(e.to_string()))?
}

/// Lists the names of immediate subdirectories of `path`, empty if `path`
/// doesn't exist yet. Used by the Artifact Store to enumerate
/// `artifacts/{id}/` directories (spec §4.10 `list_all_artifacts`).
pub async fn list_subdirs(path: &Path) -> Result<Vec<String>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    })
    .await
    .map_err(|e| StorageError::Lock(e.to_string()))?
}

/// Removes a file if present; a missing file is not an error (used by
/// version-limit pruning, which may race a concurrent delete).
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    })
    .await
    .map_err(|e| StorageError::Lock(e.to_string()))?
}

/// Lists file name stems (name with `suffix` stripped) of immediate
/// entries in `dir` whose name ends with `suffix`, empty if `dir` doesn't
/// exist. Used for `GET /sessions` to enumerate `sessions/{id}.jsonl`
/// without a separate session index.
pub async fn list_file_stems_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<String>> {
    let dir = dir.to_path_buf();
    let suffix = suffix.to_string();
    tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(&suffix) {
                    out.push(stem.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    })
    .await
    .map_err(|e| StorageError::Lock(e.to_string()))?
}

/// Removes every immediate entry in `dir` whose name starts with `prefix`;
/// a missing directory is not an error. Used to clear a session's
/// compaction archives on `DELETE /sessions/{id}` (spec §6).
pub async fn remove_files_with_prefix(dir: &Path, prefix: &str) -> Result<()> {
    let dir = dir.to_path_buf();
    let prefix = prefix.to_string();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(&prefix) {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Lock(e.to_string()))?
}

/// Removes a directory and everything under it; a missing directory is
/// not an error. Used to delete a whole artifact (every version) in one
/// shot, e.g. a session's evidence-map artifact on `DELETE /sessions/{id}`.
pub async fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        match std::fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    })
    .await
    .map_err(|e| StorageError::Lock(e.to_string()))?
}

/// Rewrite a JSONL file from scratch (used by delete/retention-sweep
/// operations that must drop specific entries), atomically.
pub async fn rewrite_jsonl_atomic<T: Serialize>(path: &Path, values: &[T]) -> Result<()> {
    let mut buf = Vec::new();
    for value in values {
        serde_json::to_writer(&mut buf, value)?;
        buf.push(b'\n');
    }
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_bytes_atomic(&path, &buf))
        .await
        .map_err(|e| StorageError::Lock(e.to_string()))?
}
