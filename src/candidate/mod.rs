/// Candidate identity shared by deduplication, markers, and rollback.
pub mod key;
/// Override candidates, their lifecycle, and the deduplicated working set.
pub mod override_fn;
/// SQL text for existence checks, test and exploit definitions, and drops.
pub mod render;
