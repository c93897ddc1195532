//! Context compaction used by the processor pipeline (C6) when events
//! grow past threshold (spec §4.4 `compaction_checker`, §4.10).

pub mod compaction;
