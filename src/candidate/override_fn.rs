use std::cell::OnceCell;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::candidate::key::CandidateKey;
use crate::candidate::render::{self, ExploitBody};
use crate::catalog::function::CatalogFunction;
use crate::error::{SessionError, ShadowError};
use crate::resolution::variants::Signature;
use crate::session::Session;

/// Options every candidate of one run shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideOptions {
    /// Schema overrides are created in.
    pub target_schema: String,
    /// SQL executed by deployed overrides.
    pub payload: String,
    /// Swallow payload errors so callers see the original behavior.
    pub stealth: bool,
    /// Record every invocation in the tracking table.
    pub tracking: bool,
    /// Use `CREATE OR REPLACE` instead of `CREATE`.
    pub replace_existing: bool,
}

impl Default for OverrideOptions {
    fn default() -> Self {
        Self {
            target_schema: "public".to_string(),
            payload: String::new(),
            stealth: true,
            tracking: false,
            replace_existing: true,
        }
    }
}

/// Outcome of testing one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Verdict {
    /// The resolver bound the override and the marker was observed.
    Exploitable,
    /// No marker was observed within the window.
    Inert,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Exploitable => write!(f, "exploitable"),
            Verdict::Inert => write!(f, "inert"),
        }
    }
}

/// Lifecycle of one candidate. Only forward moves are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CandidateState {
    /// Produced by expansion.
    Created,
    /// Existence check done, no blocking collision.
    Checked,
    /// Left alone because of a collision.
    Skipped,
    /// Test harness verdict.
    Tested(Verdict),
    /// Verification or deployment failed.
    Errored,
    /// Payload-bearing override installed.
    Deployed,
    /// Deployed override dropped again.
    Reverted,
}

impl CandidateState {
    /// True when `next` is a legal successor of `self`.
    pub fn allows(self, next: CandidateState) -> bool {
        use CandidateState::*;
        matches!(
            (self, next),
            (Created, Checked | Skipped | Errored)
                | (Checked, Tested(_) | Errored | Deployed)
                | (Tested(Verdict::Exploitable), Deployed | Errored)
                | (Deployed, Reverted)
        )
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateState::Created => write!(f, "created"),
            CandidateState::Checked => write!(f, "checked"),
            CandidateState::Skipped => write!(f, "skipped"),
            CandidateState::Tested(verdict) => write!(f, "tested: {verdict}"),
            CandidateState::Errored => write!(f, "error"),
            CandidateState::Deployed => write!(f, "deployed"),
            CandidateState::Reverted => write!(f, "reverted"),
        }
    }
}

/// One shadow-function candidate: a catalog function, one override
/// signature, and the run options.
///
/// Equality and hashing use [`CandidateKey`] only.
#[derive(Debug, Clone)]
pub struct OverrideCandidate {
    key: CandidateKey,
    original: CatalogFunction,
    options: OverrideOptions,
    state: CandidateState,
    exists_query: OnceCell<String>,
    exploit_definition: OnceCell<String>,
    drop_statement: OnceCell<String>,
    test_query: OnceCell<String>,
    replaced_definition: Option<String>,
}

impl OverrideCandidate {
    /// Pair a catalog function with one signature variant.
    pub fn new(original: CatalogFunction, signature: Signature, options: OverrideOptions) -> Self {
        let key = CandidateKey::new(
            options.target_schema.clone(),
            original.name.clone(),
            signature,
        );
        Self {
            key,
            original,
            options,
            state: CandidateState::Created,
            exists_query: OnceCell::new(),
            exploit_definition: OnceCell::new(),
            drop_statement: OnceCell::new(),
            test_query: OnceCell::new(),
            replaced_definition: None,
        }
    }

    /// Identity.
    pub fn key(&self) -> &CandidateKey {
        &self.key
    }

    /// Shadowed catalog function.
    pub fn original(&self) -> &CatalogFunction {
        &self.original
    }

    /// Run options.
    pub fn options(&self) -> &OverrideOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CandidateState {
        self.state
    }

    /// Move to `next`, rejecting backward or phase-skipping moves.
    pub fn advance(&mut self, next: CandidateState) -> Result<(), ShadowError> {
        if !self.state.allows(next) {
            return Err(ShadowError::InvalidTransition {
                key: self.key.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Read-only query telling whether this exact override already exists.
    pub fn exists_query(&self) -> &str {
        self.exists_query
            .get_or_init(|| render::exists_query(&self.key))
    }

    /// Check the target for an existing function with this name and signature.
    pub fn exists_on_target<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> Result<bool, SessionError> {
        let rows = session.query(self.exists_query())?;
        Ok(rows
            .first()
            .and_then(|row| row.boolean("present"))
            .unwrap_or(false))
    }

    /// Read the definition currently installed under this key, if any.
    pub fn read_existing_definition<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> Result<Option<String>, SessionError> {
        let rows = session.query(&render::definition_query(&self.key))?;
        Ok(rows
            .first()
            .and_then(|row| row.text("definition"))
            .filter(|definition| !definition.trim().is_empty()))
    }

    /// Remember the definition an overwrite will replace, so undoing the
    /// override restores it instead of dropping the function.
    pub fn keep_replaced_definition(&mut self, definition: String) {
        self.replaced_definition = Some(definition);
    }

    /// Definition that existed before this run, when one is being overwritten.
    pub fn replaced_definition(&self) -> Option<&str> {
        self.replaced_definition.as_deref()
    }

    /// Statement that puts the target back the way it was: the replaced
    /// definition, or a drop.
    pub fn inverse_statement(&self) -> &str {
        self.replaced_definition
            .as_deref()
            .unwrap_or_else(|| self.render_drop_statement())
    }

    /// Benign definition that runs `marker` and otherwise passes through.
    ///
    /// The marker is supplied by the detection strategy, so this one is not
    /// cached.
    pub fn render_test_definition(&self, marker: &str) -> String {
        render::test_definition(
            &self.key,
            &self.original,
            marker,
            self.options.replace_existing,
        )
    }

    /// Payload-bearing definition.
    pub fn render_exploit_definition(&self) -> &str {
        self.exploit_definition.get_or_init(|| {
            render::exploit_definition(
                &self.key,
                &self.original,
                &ExploitBody {
                    payload: &self.options.payload,
                    stealth: self.options.stealth,
                    tracking: self.options.tracking,
                },
                self.options.replace_existing,
            )
        })
    }

    /// Inverse of either definition.
    pub fn render_drop_statement(&self) -> &str {
        self.drop_statement
            .get_or_init(|| render::drop_statement(&self.key))
    }

    /// Call site used to prove the resolver picks this override.
    pub fn test_query(&self) -> &str {
        self.test_query.get_or_init(|| render::test_query(&self.key))
    }
}

impl PartialEq for OverrideCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for OverrideCandidate {}

impl Hash for OverrideCandidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for OverrideCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Ordered working set with no two candidates sharing a key.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    seen: HashSet<CandidateKey>,
    items: Vec<OverrideCandidate>,
}

impl CandidateSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate unless one with the same key is present.
    /// Returns whether it was added.
    pub fn insert(&mut self, candidate: OverrideCandidate) -> bool {
        if !self.seen.insert(candidate.key.clone()) {
            return false;
        }
        self.items.push(candidate);
        true
    }

    /// Number of distinct candidates.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Candidates in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, OverrideCandidate> {
        self.items.iter()
    }

    /// Mutable candidates in insertion order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, OverrideCandidate> {
        self.items.iter_mut()
    }

    /// Consume the set.
    pub fn into_vec(self) -> Vec<OverrideCandidate> {
        self.items
    }
}
