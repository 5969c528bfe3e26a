use tracing::info;

use crate::error::SessionError;
use crate::session::Session;

/// Schema holding the tracking and probe tables.
pub const TRACKING_SCHEMA: &str = "pgshadow";
/// One row per invocation of a deployed override.
pub const TRIGGERS_TABLE: &str = "pgshadow.triggers";
/// One row per invocation of a test override (background detection).
pub const PROBES_TABLE: &str = "pgshadow.probes";

/// DDL creating the tracking schema and tables. Idempotent.
pub fn provisioning_statements() -> Vec<String> {
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {TRACKING_SCHEMA}"),
        format!(
            "CREATE TABLE IF NOT EXISTS {TRIGGERS_TABLE} (
    id SERIAL PRIMARY KEY,
    fname VARCHAR(255),
    params TEXT,
    current_query TEXT,
    created_at TIMESTAMP WITHOUT TIME ZONE DEFAULT (pg_catalog.now() AT TIME ZONE 'utc')
)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {PROBES_TABLE} (
    id SERIAL PRIMARY KEY,
    tag TEXT NOT NULL,
    invoked_by TEXT NOT NULL,
    observed_at TIMESTAMP WITH TIME ZONE DEFAULT pg_catalog.now()
)"
        ),
        // Privileged callers write here under their own identity.
        format!("GRANT USAGE ON SCHEMA {TRACKING_SCHEMA} TO PUBLIC"),
        format!("GRANT INSERT ON {TRIGGERS_TABLE}, {PROBES_TABLE} TO PUBLIC"),
        format!("GRANT USAGE ON ALL SEQUENCES IN SCHEMA {TRACKING_SCHEMA} TO PUBLIC"),
    ]
}

/// Create the tracking structures before a tracking-enabled run.
pub fn provision<S: Session + ?Sized>(session: &mut S) -> Result<(), SessionError> {
    for statement in provisioning_statements() {
        session.execute(&statement)?;
    }
    info!(schema = TRACKING_SCHEMA, "tracking tables ready");
    Ok(())
}
