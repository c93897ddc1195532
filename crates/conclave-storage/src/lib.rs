//! File-based persistence primitives (spec §4.1, §4.3, §6): atomic
//! write-temp-then-rename for whole-file writes, OS-level exclusive-lock
//! append for JSONL logs, and the on-disk path layout. Diverges from the
//! teacher's `redb`-backed storage crate by design — see `DESIGN.md`.

pub mod atomic;
pub mod error;
pub mod paths;
pub mod registry_docs;

pub use error::{Result, StorageError};
pub use paths::StorageLayout;
