/// Type-name canonicalization and resolver compatibility classes.
pub mod types;
/// Expansion of declared signatures into competing override signatures.
pub mod variants;
