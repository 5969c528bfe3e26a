/// Payload deployment with best-effort semantics.
pub mod exploit;
/// Drop statements recorded as each mutation happens.
pub mod ledger;
/// Tracking and probe tables the overrides write into.
pub mod tracking;
