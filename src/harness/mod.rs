/// Pluggable strategies for observing that an override was invoked.
pub mod detector;
/// Install, observe, and remove a benign override for one candidate.
pub mod probe;
