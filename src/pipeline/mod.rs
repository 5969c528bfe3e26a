/// Cooperative cancellation shared with the signal watcher.
pub mod cancel;
/// Run-mode toggles and the collision policy.
pub mod config;
/// Run outcome, the in-memory report, and the text artifacts.
pub mod outcome;
/// The sequential discover, expand, check, test, deploy workflow.
pub mod run;
