use serde::Serialize;
use tracing::{debug, info, warn};

use crate::candidate::key::CandidateKey;
use crate::candidate::override_fn::{CandidateState, OverrideCandidate, Verdict};
use crate::deploy::ledger::{InstallKind, RollbackLedger};
use crate::error::{SessionError, ShadowError};
use crate::harness::detector::{InvocationDetector, Observation};
use crate::pipeline::cancel::CancelFlag;
use crate::session::Session;

/// What testing one candidate produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    /// Tested candidate.
    pub key: CandidateKey,
    /// Verdict, or `None` when the test failed or was interrupted.
    pub verdict: Option<Verdict>,
    /// Why the test failed.
    pub diagnostic: Option<String>,
    /// Remarks that do not change the verdict.
    pub notes: Vec<String>,
    /// Observation stopped because cancellation was requested.
    pub interrupted: bool,
}

impl TestResult {
    fn new(key: &CandidateKey) -> Self {
        Self {
            key: key.clone(),
            verdict: None,
            diagnostic: None,
            notes: Vec::new(),
            interrupted: false,
        }
    }

    /// Only a clean, positive observation counts.
    pub fn is_exploitable(&self) -> bool {
        self.verdict == Some(Verdict::Exploitable) && self.diagnostic.is_none()
    }
}

/// Installs a benign test override, gathers evidence, and removes it again.
pub struct TestHarness {
    detector: Box<dyn InvocationDetector>,
}

impl TestHarness {
    /// Harness using `detector` for every candidate.
    pub fn new(detector: Box<dyn InvocationDetector>) -> Self {
        Self { detector }
    }

    /// Name of the detection strategy.
    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Test one `Checked` candidate.
    ///
    /// Statement failures become a diagnostic on the result and move the
    /// candidate to `Errored`. Only a fatal session error is returned; the
    /// probe then stays in the ledger.
    pub fn probe(
        &mut self,
        session: &mut dyn Session,
        candidate: &mut OverrideCandidate,
        ledger: &mut RollbackLedger,
        cancel: &CancelFlag,
    ) -> Result<TestResult, SessionError> {
        let mut result = TestResult::new(candidate.key());
        if candidate.state() != CandidateState::Checked {
            result.diagnostic = Some(format!("cannot test a {} candidate", candidate.state()));
            return Ok(result);
        }

        let tag = candidate.key().tag();
        let definition = candidate.render_test_definition(&self.detector.marker(&tag));
        let installed = self
            .detector
            .arm(session, &tag)
            .and_then(|()| session.execute(&definition));
        if let Err(e) = installed {
            return fail(candidate, result, e);
        }
        ledger.record(
            candidate.key(),
            InstallKind::Probe,
            candidate.inverse_statement(),
        );
        debug!(key = %candidate.key(), detector = self.detector.name(), "probe installed");

        let observation = self.detector.observe(session, candidate, cancel);
        if let Err(e) = &observation {
            if e.is_fatal() {
                return Err(e.clone());
            }
        }

        // Drops the test function, or puts back the definition it replaced.
        match session.execute(candidate.inverse_statement()) {
            Ok(()) => ledger.release(candidate.key(), InstallKind::Probe),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(key = %candidate.key(), error = %e, "probe not dropped");
                result.notes.push(format!("probe left in place: {e}"));
            }
        }

        let verdict = match observation {
            Err(e) => return fail(candidate, result, e),
            Ok(Observation::Interrupted) => {
                result.interrupted = true;
                return Ok(result);
            }
            Ok(Observation::Observed) => Verdict::Exploitable,
            Ok(Observation::NotObserved) => Verdict::Inert,
            Ok(Observation::Inconclusive(reason)) => {
                result.notes.push(reason);
                Verdict::Inert
            }
        };
        if candidate.advance(CandidateState::Tested(verdict)).is_ok() {
            result.verdict = Some(verdict);
        }
        info!(key = %candidate.key(), %verdict, "tested");
        Ok(result)
    }
}

fn fail(
    candidate: &mut OverrideCandidate,
    mut result: TestResult,
    error: SessionError,
) -> Result<TestResult, SessionError> {
    if error.is_fatal() {
        return Err(error);
    }
    warn!(key = %candidate.key(), error = %error, "test failed");
    // Checked -> Errored is always legal here.
    let _ = candidate.advance(CandidateState::Errored);
    result.diagnostic = Some(
        ShadowError::Verification {
            key: candidate.key().clone(),
            reason: error.to_string(),
        }
        .to_string(),
    );
    Ok(result)
}
