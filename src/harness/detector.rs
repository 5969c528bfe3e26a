use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::candidate::override_fn::OverrideCandidate;
use crate::deploy::tracking::PROBES_TABLE;
use crate::error::SessionError;
use crate::pipeline::cancel::CancelFlag;
use crate::session::{quote_literal, Session};

/// Upper bound on polls in one observation window.
const MAX_POLLS: u128 = 10_000;

/// Evidence gathered for one installed test override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The marker was observed as required.
    Observed,
    /// No marker within the window.
    NotObserved,
    /// Some but not all confirmation rounds hit.
    Inconclusive(String),
    /// Cancellation was requested while observing.
    Interrupted,
}

/// How invocation of a test override is detected.
///
/// The tool never acts as the privileged caller itself; a strategy either
/// provokes resolution with a direct call or waits for the target's own
/// activity to leave a marker behind.
pub trait InvocationDetector {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// PL/pgSQL statements the test override runs to leave a marker.
    fn marker(&self, tag: &str) -> String;

    /// Clear any marker left for `tag` by an earlier attempt.
    fn arm(&mut self, session: &mut dyn Session, tag: &str) -> Result<(), SessionError>;

    /// Gather evidence that the installed override is being invoked.
    fn observe(
        &mut self,
        session: &mut dyn Session,
        candidate: &OverrideCandidate,
        cancel: &CancelFlag,
    ) -> Result<Observation, SessionError>;
}

fn setting_name(tag: &str) -> String {
    format!("pgshadow.probe_{tag}")
}

/// Synchronous proxy call in the tool's own session.
///
/// The marker is a session setting. Each round clears it, issues the
/// unqualified test call, and reads it back; every round must hit. This
/// proves the resolver binds the override for that call site before anything
/// relies on background invocation.
#[derive(Debug, Clone)]
pub struct ProxyCallDetector {
    confirmations: u32,
}

impl ProxyCallDetector {
    /// Require `confirmations` consecutive hits (at least one).
    pub fn new(confirmations: u32) -> Self {
        Self {
            confirmations: confirmations.max(1),
        }
    }
}

impl Default for ProxyCallDetector {
    fn default() -> Self {
        Self::new(2)
    }
}

impl InvocationDetector for ProxyCallDetector {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn marker(&self, tag: &str) -> String {
        format!(
            "PERFORM pg_catalog.set_config({}, 'hit', false);",
            quote_literal(&setting_name(tag))
        )
    }

    fn arm(&mut self, session: &mut dyn Session, tag: &str) -> Result<(), SessionError> {
        session.execute(&format!(
            "SELECT pg_catalog.set_config({}, '', false)",
            quote_literal(&setting_name(tag))
        ))
    }

    fn observe(
        &mut self,
        session: &mut dyn Session,
        candidate: &OverrideCandidate,
        cancel: &CancelFlag,
    ) -> Result<Observation, SessionError> {
        let tag = candidate.key().tag();
        let read = format!(
            "SELECT pg_catalog.current_setting({}, true) AS marker",
            quote_literal(&setting_name(&tag))
        );
        let mut hits = 0u32;
        for round in 1..=self.confirmations {
            if cancel.is_cancelled() {
                return Ok(Observation::Interrupted);
            }
            self.arm(session, &tag)?;
            session.execute(candidate.test_query())?;
            let rows = session.query(&read)?;
            let hit = rows
                .first()
                .and_then(|row| row.text("marker"))
                .is_some_and(|value| value == "hit");
            debug!(key = %candidate.key(), round, hit, "proxy call");
            if hit {
                hits += 1;
            }
        }
        Ok(match hits {
            0 => Observation::NotObserved,
            n if n == self.confirmations => Observation::Observed,
            n => Observation::Inconclusive(format!(
                "marker seen in {n} of {} rounds",
                self.confirmations
            )),
        })
    }
}

/// Background activity leaves rows in the probe table; the harness polls
/// for a row written by any role other than the session principal.
#[derive(Debug, Clone)]
pub struct MarkerTableDetector {
    timeout: Duration,
    interval: Duration,
}

impl MarkerTableDetector {
    /// Poll every `interval` for at most `timeout`.
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Number of polls in one window (at least one).
    pub fn attempts(&self) -> u128 {
        (self.timeout.as_millis() / self.interval.as_millis().max(1)).clamp(1, MAX_POLLS)
    }
}

impl InvocationDetector for MarkerTableDetector {
    fn name(&self) -> &'static str {
        "background"
    }

    fn marker(&self, tag: &str) -> String {
        format!(
            "INSERT INTO {PROBES_TABLE} (tag, invoked_by) VALUES ({}, current_user::text);",
            quote_literal(tag)
        )
    }

    fn arm(&mut self, session: &mut dyn Session, tag: &str) -> Result<(), SessionError> {
        session.execute(&format!(
            "DELETE FROM {PROBES_TABLE} WHERE tag = {}",
            quote_literal(tag)
        ))
    }

    fn observe(
        &mut self,
        session: &mut dyn Session,
        candidate: &OverrideCandidate,
        cancel: &CancelFlag,
    ) -> Result<Observation, SessionError> {
        let poll = format!(
            "SELECT pg_catalog.count(*)::int AS hits FROM {PROBES_TABLE} \
             WHERE tag = {} AND invoked_by <> current_user::text",
            quote_literal(&candidate.key().tag())
        );
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Ok(Observation::Interrupted);
            }
            let rows = session.query(&poll)?;
            let hits = rows.first().and_then(|row| row.integer("hits")).unwrap_or(0);
            debug!(key = %candidate.key(), attempt, hits, "marker poll");
            if hits > 0 {
                return Ok(Observation::Observed);
            }
            if attempt < attempts {
                thread::sleep(self.interval);
            }
        }
        Ok(Observation::NotObserved)
    }
}
