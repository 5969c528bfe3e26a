use thiserror::Error;

use crate::candidate::key::CandidateKey;

/// Failure raised by a [`Session`](crate::session::Session) round trip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The connection is gone or unusable. Fatal for the whole run.
    #[error("connection error: {0}")]
    Connection(String),
    /// The server rejected a single statement.
    #[error("statement failed: {0}")]
    Statement(String),
    /// The server answered with something the session could not decode.
    #[error("malformed result set: {0}")]
    Decode(String),
}

impl SessionError {
    /// True when the run cannot continue on this session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Connection(_))
    }
}

/// Crate-wide error taxonomy.
#[derive(Debug, Error)]
pub enum ShadowError {
    /// A session round trip failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The candidate already exists on the target.
    #[error("{0} is already defined on the target")]
    Collision(CandidateKey),
    /// Installing or probing the benign test function failed.
    #[error("verification of {key} failed: {reason}")]
    Verification {
        /// Candidate under test.
        key: CandidateKey,
        /// Server or harness message.
        reason: String,
    },
    /// Promoting a candidate to a payload-bearing override failed.
    #[error("deployment of {key} failed: {reason}")]
    Deployment {
        /// Candidate being deployed.
        key: CandidateKey,
        /// Server or harness message.
        reason: String,
    },
    /// A candidate was asked to move backwards or skip a required phase.
    #[error("invalid transition for {key}: {from} -> {to}")]
    InvalidTransition {
        /// Candidate identity.
        key: CandidateKey,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },
    /// A catalog row did not have the expected shape.
    #[error("catalog row is missing `{0}`")]
    Catalog(String),
    /// A rollback script contained something other than function drops.
    #[error("rollback script rejected: {0}")]
    Rollback(String),
}

impl ShadowError {
    /// True when the error must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShadowError::Session(e) if e.is_fatal())
    }
}
