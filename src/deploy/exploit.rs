use tracing::{info, warn};

use crate::candidate::override_fn::{CandidateState, OverrideCandidate};
use crate::deploy::ledger::{InstallKind, RollbackLedger};
use crate::error::ShadowError;
use crate::session::Session;

/// Replace a candidate's body with the payload-bearing definition.
///
/// The candidate must already be `Checked` (tests skipped) or
/// `Tested(Exploitable)`. The inverse is recorded as soon as the definition
/// is in place.
pub fn deploy<S: Session + ?Sized>(
    session: &mut S,
    candidate: &mut OverrideCandidate,
    ledger: &mut RollbackLedger,
) -> Result<(), ShadowError> {
    if !candidate.state().allows(CandidateState::Deployed) {
        return Err(ShadowError::InvalidTransition {
            key: candidate.key().clone(),
            from: candidate.state().to_string(),
            to: CandidateState::Deployed.to_string(),
        });
    }

    let definition = candidate.render_exploit_definition().to_string();
    if let Err(e) = session.execute(&definition) {
        if e.is_fatal() {
            return Err(e.into());
        }
        warn!(key = %candidate.key(), error = %e, "exploit function not created");
        candidate.advance(CandidateState::Errored)?;
        return Err(ShadowError::Deployment {
            key: candidate.key().clone(),
            reason: e.to_string(),
        });
    }

    ledger.record(
        candidate.key(),
        InstallKind::Exploit,
        candidate.inverse_statement(),
    );
    candidate.advance(CandidateState::Deployed)?;
    info!(key = %candidate.key(), "exploit function created");
    Ok(())
}

/// Undo a deployed candidate, restoring any definition it replaced, and
/// move it to `Reverted`.
pub fn revert<S: Session + ?Sized>(
    session: &mut S,
    candidate: &mut OverrideCandidate,
    ledger: &mut RollbackLedger,
) -> Result<(), ShadowError> {
    if !candidate.state().allows(CandidateState::Reverted) {
        return Err(ShadowError::InvalidTransition {
            key: candidate.key().clone(),
            from: candidate.state().to_string(),
            to: CandidateState::Reverted.to_string(),
        });
    }
    session.execute(candidate.inverse_statement())?;
    ledger.release(candidate.key(), InstallKind::Exploit);
    candidate.advance(CandidateState::Reverted)
}
