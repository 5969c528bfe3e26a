use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info, warn};

use crate::candidate::override_fn::{CandidateSet, CandidateState, OverrideCandidate, Verdict};
use crate::catalog::discovery::CandidateDiscovery;
use crate::catalog::priority::PriorityRegistry;
use crate::deploy::exploit;
use crate::error::ShadowError;
use crate::harness::detector::{InvocationDetector, ProxyCallDetector};
use crate::harness::probe::TestHarness;
use crate::pipeline::cancel::CancelFlag;
use crate::pipeline::config::{CollisionPolicy, RunConfig};
use crate::pipeline::outcome::{CandidateRecord, RunAborted, RunOutcome, RunReport};
use crate::resolution::types::TypeConversions;
use crate::resolution::variants::{Signature, TypeResolutionModel};
use crate::session::Session;

/// Discovery, expansion, existence checks, testing and deployment, one
/// phase after the other over a single session.
pub struct Pipeline {
    config: RunConfig,
    discovery: CandidateDiscovery,
    model: TypeResolutionModel,
    harness: TestHarness,
    cancel: CancelFlag,
}

impl Pipeline {
    /// Pipeline with the built-in priorities, `PostgreSQL` conversion classes
    /// and the proxy-call detector.
    pub fn new(config: RunConfig) -> Self {
        let discovery =
            CandidateDiscovery::new(config.discovery.clone(), PriorityRegistry::builtin());
        let model = TypeResolutionModel::default().with_zero_arity(config.include_zero_arity);
        Self {
            config,
            discovery,
            model,
            harness: TestHarness::new(Box::new(ProxyCallDetector::default())),
            cancel: CancelFlag::new(),
        }
    }

    /// Replace the priority hints used to order discovered functions.
    pub fn with_priorities(mut self, priorities: PriorityRegistry) -> Self {
        self.discovery = CandidateDiscovery::new(self.config.discovery.clone(), priorities);
        self
    }

    /// Replace the type-conversion collaborator.
    pub fn with_conversions(mut self, conversions: Box<dyn TypeConversions>) -> Self {
        self.model =
            TypeResolutionModel::new(conversions).with_zero_arity(self.config.include_zero_arity);
        self
    }

    /// Replace the detection strategy.
    pub fn with_detector(mut self, detector: Box<dyn InvocationDetector>) -> Self {
        self.harness = TestHarness::new(detector);
        self
    }

    /// Observe `cancel` between candidates and polls.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run every phase.
    ///
    /// Per-candidate failures end up in the report. Only a fatal session
    /// error returns `Err`, carrying the partial report.
    pub fn run(&mut self, session: &mut dyn Session) -> Result<RunReport, RunAborted> {
        let mut report = RunReport::new(self.harness.detector_name());
        let mut candidates = CandidateSet::new();

        match self.execute(session, &mut report, &mut candidates) {
            Ok(outcome) => {
                info!(%outcome, deployed = report.deployed.len(), "run finished");
                report.outcome = outcome;
                report.candidates = records(&candidates);
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, left_on_target = report.ledger.entries().len(), "run aborted");
                report.outcome = RunOutcome::Failed(e.to_string());
                report.error_log.push(format!("Run aborted: {e}"));
                report.candidates = records(&candidates);
                Err(RunAborted {
                    error: e,
                    report: Box::new(report),
                })
            }
        }
    }

    fn execute(
        &mut self,
        session: &mut dyn Session,
        report: &mut RunReport,
        candidates: &mut CandidateSet,
    ) -> Result<RunOutcome, ShadowError> {
        // Discovery.
        let scan = self.discovery.discover(session)?;
        report.principal = Some(scan.principal().to_string());
        report.excluded = scan.excluded().len();
        let functions: Vec<_> = scan.collect();
        report.discovered = functions.len();
        info!(
            functions = report.discovered,
            excluded = report.excluded,
            "discovery done"
        );

        // Expansion and deduplication. A variant equal to any catalog overload
        // of the same name never wins resolution, since the catalog schema is
        // searched first.
        let mut declared: HashMap<&str, HashSet<Signature>> = HashMap::new();
        for function in &functions {
            declared
                .entry(function.name.as_str())
                .or_default()
                .insert(Signature::new(&function.params_type));
        }
        let options = self.config.override_options();
        for function in &functions {
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            let siblings = declared.get(function.name.as_str());
            let mut variants: Vec<Signature> = self
                .model
                .expand(&function.params_type)
                .into_iter()
                .filter(|signature| {
                    let taken = siblings.is_some_and(|s| s.contains(signature));
                    if taken {
                        debug!(function = %function, %signature, "variant matches a catalog overload");
                    }
                    !taken
                })
                .collect();
            if let Some(limit) = self.config.max_variants {
                if variants.len() > limit {
                    let total = variants.len();
                    variants.truncate(limit);
                    warn!(function = %function, total, limit, "variants truncated");
                    report.test_log.push(format!(
                        "{function}: {} of {total} variants not tried (limit {limit})",
                        total - limit
                    ));
                }
            }
            for signature in variants {
                let candidate =
                    OverrideCandidate::new(function.clone(), signature, options.clone());
                let key = candidate.key().clone();
                if !candidates.insert(candidate) {
                    debug!(%key, "duplicate candidate dropped");
                }
            }
        }
        info!(candidates = candidates.len(), "expansion done");
        report
            .test_log
            .push(format!("{} candidate functions", candidates.len()));

        // Existence checks. Nothing is created before all of them ran.
        for candidate in candidates.iter_mut() {
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            if let Some(outcome) = self.check_existing(session, candidate, report)? {
                return Ok(outcome);
            }
        }

        // Tests.
        if self.config.run_tests {
            for candidate in candidates.iter_mut() {
                if candidate.state() != CandidateState::Checked {
                    continue;
                }
                if self.cancel.is_cancelled() {
                    return Ok(RunOutcome::Interrupted);
                }
                let result = self.harness.probe(
                    session,
                    candidate,
                    &mut report.ledger,
                    &self.cancel,
                )?;
                for note in &result.notes {
                    report.test_log.push(format!("{}: {note}", result.key));
                }
                if result.interrupted {
                    return Ok(RunOutcome::Interrupted);
                }
                if let Some(diagnostic) = &result.diagnostic {
                    report
                        .error_log
                        .push(format!("Exception testing function: {diagnostic}"));
                    continue;
                }
                if let Some(verdict) = result.verdict {
                    report.test_log.push(format!("{}: {verdict}", result.key));
                }
                if result.is_exploitable() {
                    report.exploitable.push(result.key.clone());
                    report
                        .exploitable_statements
                        .push(candidate.test_query().to_string());
                }
            }
            if report.exploitable.is_empty() {
                let outcome = RunOutcome::NoExploitable;
                report.test_log.push(outcome.to_string());
                return Ok(outcome);
            }
        } else {
            report.test_log.push("tests skipped".to_string());
        }

        // Deployment.
        if !self.config.create_exploits {
            report
                .test_log
                .push("exploit creation disabled".to_string());
            return Ok(RunOutcome::Completed);
        }
        let deployable = if self.config.run_tests {
            CandidateState::Tested(Verdict::Exploitable)
        } else {
            CandidateState::Checked
        };
        for candidate in candidates.iter_mut() {
            if candidate.state() != deployable {
                continue;
            }
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            match exploit::deploy(session, candidate, &mut report.ledger) {
                Ok(()) => {
                    report.deployed.push(candidate.key().clone());
                    report
                        .test_log
                        .push(format!("Created exploit function {}", candidate.key()));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.error_log.push(format!(
                    "Exception creating exploit function {}: {e}",
                    candidate.key()
                )),
            }
        }
        Ok(RunOutcome::Completed)
    }

    /// Move a candidate out of `Created`. Returns an outcome when the run
    /// must stop here.
    fn check_existing(
        &self,
        session: &mut dyn Session,
        candidate: &mut OverrideCandidate,
        report: &mut RunReport,
    ) -> Result<Option<RunOutcome>, ShadowError> {
        let exists = match candidate.exists_on_target(session) {
            Ok(exists) => exists,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(key = %candidate.key(), error = %e, "existence check failed");
                candidate.advance(CandidateState::Errored)?;
                report.error_log.push(format!(
                    "Exception checking function {}: {e}",
                    candidate.key()
                ));
                return Ok(None);
            }
        };
        if !exists {
            candidate.advance(CandidateState::Checked)?;
            return Ok(None);
        }

        let collision = ShadowError::Collision(candidate.key().clone());
        match self.config.collision {
            CollisionPolicy::Overwrite => {
                // The replaced body is the inverse of an overwrite.
                let definition = match candidate.read_existing_definition(session) {
                    Ok(Some(definition)) => definition,
                    Ok(None) => {
                        return refuse_overwrite(candidate, report, "no definition returned")
                    }
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => return refuse_overwrite(candidate, report, &e.to_string()),
                };
                candidate.keep_replaced_definition(definition);
                report
                    .test_log
                    .push(format!("{} already exists and will be replaced", candidate.key()));
                candidate.advance(CandidateState::Checked)?;
                Ok(None)
            }
            CollisionPolicy::Skip => {
                warn!(key = %candidate.key(), "collision, skipped");
                candidate.advance(CandidateState::Skipped)?;
                report.collisions.push(candidate.key().clone());
                report.error_log.push(format!("Collision: {collision}"));
                Ok(None)
            }
            CollisionPolicy::Abort => {
                warn!(key = %candidate.key(), "collision, aborting");
                candidate.advance(CandidateState::Skipped)?;
                report.collisions.push(candidate.key().clone());
                report.error_log.push(format!("Collision: {collision}"));
                Ok(Some(RunOutcome::AbortedOnCollision(candidate.key().clone())))
            }
        }
    }
}

fn refuse_overwrite(
    candidate: &mut OverrideCandidate,
    report: &mut RunReport,
    reason: &str,
) -> Result<Option<RunOutcome>, ShadowError> {
    warn!(key = %candidate.key(), reason, "existing definition unreadable, not overwritten");
    candidate.advance(CandidateState::Errored)?;
    report.error_log.push(format!(
        "Exception reading existing definition of {}: {reason}",
        candidate.key()
    ));
    Ok(None)
}

fn records(candidates: &CandidateSet) -> Vec<CandidateRecord> {
    candidates
        .iter()
        .map(|candidate| CandidateRecord {
            key: candidate.key().clone(),
            original: candidate.original().to_string(),
            state: candidate.state().to_string(),
        })
        .collect()
}
