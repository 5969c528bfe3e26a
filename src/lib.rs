//! Discover, verify and deploy `PostgreSQL` functions that shadow catalog
//! built-ins through overload resolution.
#![warn(missing_docs)]

/// Override candidates: identity, lifecycle, and rendered SQL.
pub mod candidate;
/// Catalog introspection and target selection.
pub mod catalog;
/// Payload deployment, rollback ledger, and tracking tables.
pub mod deploy;
/// Error taxonomy.
pub mod error;
/// Test-before-deploy verification.
pub mod harness;
/// Artifact files and the markdown report.
pub mod output;
/// The end-to-end run and its configuration.
pub mod pipeline;
/// Type canonicalization and override signature expansion.
pub mod resolution;
/// The database session seam.
pub mod session;
