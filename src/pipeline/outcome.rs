use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::candidate::key::CandidateKey;
use crate::deploy::ledger::{join_statements, RollbackLedger};
use crate::error::ShadowError;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// Every phase ran.
    Completed,
    /// Testing found nothing to deploy.
    NoExploitable,
    /// A collision stopped the run under the abort policy.
    AbortedOnCollision(CandidateKey),
    /// Cancellation was requested.
    Interrupted,
    /// The session failed; only partial results exist.
    Failed(String),
}

impl RunOutcome {
    /// Process exit code for the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::NoExploitable
            | RunOutcome::AbortedOnCollision(_)
            | RunOutcome::Interrupted => 1,
            RunOutcome::Failed(_) => 2,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::NoExploitable => write!(f, "no exploitable functions found"),
            RunOutcome::AbortedOnCollision(key) => {
                write!(f, "aborted: {key} already exists on the target")
            }
            RunOutcome::Interrupted => write!(f, "interrupted"),
            RunOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Final state of one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateRecord {
    /// Override identity.
    pub key: CandidateKey,
    /// Shadowed catalog function.
    pub original: String,
    /// Lifecycle state at the end of the run.
    pub state: String,
}

/// Everything a run produced, in memory.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Role the session ran as.
    pub principal: Option<String>,
    /// Detection strategy used by the test phase.
    pub detector: String,
    /// Catalog functions kept after filtering.
    pub discovered: usize,
    /// Catalog rows filtered out.
    pub excluded: usize,
    /// Every distinct candidate with its final state.
    pub candidates: Vec<CandidateRecord>,
    /// Candidates that already existed on the target.
    pub collisions: Vec<CandidateKey>,
    /// Candidates with a positive verdict, in test order.
    pub exploitable: Vec<CandidateKey>,
    /// Test invocations of the exploitable candidates, in test order.
    pub exploitable_statements: Vec<String>,
    /// Deployed candidates, in deployment order.
    pub deployed: Vec<CandidateKey>,
    /// Functions still on the target and their drops.
    pub ledger: RollbackLedger,
    /// Per-candidate failures and collisions.
    pub error_log: Vec<String>,
    /// Phase and verdict log.
    pub test_log: Vec<String>,
}

impl RunReport {
    /// Empty report for a run that has not started.
    pub fn new(detector: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::Completed,
            principal: None,
            detector: detector.into(),
            discovered: 0,
            excluded: 0,
            candidates: Vec::new(),
            collisions: Vec::new(),
            exploitable: Vec::new(),
            exploitable_statements: Vec::new(),
            deployed: Vec::new(),
            ledger: RollbackLedger::new(),
            error_log: Vec::new(),
            test_log: Vec::new(),
        }
    }

    /// Replayable test invocations, one terminated statement per line.
    pub fn exploitables_sql(&self) -> String {
        join_statements(self.exploitable_statements.iter().map(String::as_str))
    }

    /// Drops for every function this run left on the target.
    pub fn drop_script(&self) -> String {
        self.ledger.drop_script()
    }

    /// Error log as plain text.
    pub fn errors_text(&self) -> String {
        lines(&self.error_log)
    }

    /// Test log as plain text.
    pub fn test_log_text(&self) -> String {
        lines(&self.test_log)
    }
}

fn lines(entries: &[String]) -> String {
    entries.iter().map(|line| format!("{line}\n")).collect()
}

/// A fatal error stopped the run. The partial report still holds every
/// artifact accumulated so far.
#[derive(Debug, Error)]
#[error("run aborted: {error}")]
pub struct RunAborted {
    /// What stopped the run.
    pub error: ShadowError,
    /// Results up to the failure.
    pub report: Box<RunReport>,
}
