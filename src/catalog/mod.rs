/// Catalog queries and filters that select shadowing targets.
pub mod discovery;
/// Immutable snapshot of one catalog function.
pub mod function;
/// Identifier quoting, normalization, and reserved-name checks.
pub mod names;
/// Hints for functions reached by privileged background activity.
pub mod priority;
