use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::resolution::types::{
    canonical_type_name, is_pseudo_type, PostgresTypeConversions, TypeConversions,
};

/// An ordered parameter-type list, in canonical spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Signature(Vec<String>);

impl Signature {
    /// Canonicalize and wrap a list of type names.
    pub fn new<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Signature(
            types
                .into_iter()
                .map(|ty| canonical_type_name(ty.as_ref()))
                .collect(),
        )
    }

    /// The empty signature of a zero-argument function.
    pub fn empty() -> Self {
        Signature(Vec::new())
    }

    /// Parameter types in order.
    pub fn types(&self) -> &[String] {
        &self.0
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a zero-argument signature.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

/// The target's overload-resolution rules, reduced to what is needed to
/// enumerate override signatures.
pub struct TypeResolutionModel {
    conversions: Box<dyn TypeConversions>,
    include_zero_arity: bool,
}

impl TypeResolutionModel {
    /// Model over an arbitrary conversion collaborator.
    pub fn new(conversions: Box<dyn TypeConversions>) -> Self {
        Self {
            conversions,
            include_zero_arity: false,
        }
    }

    /// Let zero-parameter functions produce the single empty variant.
    pub fn with_zero_arity(mut self, include: bool) -> Self {
        self.include_zero_arity = include;
        self
    }

    /// Every distinct signature the resolver would also bind for calls
    /// currently bound to `declared`, excluding `declared` itself.
    ///
    /// Each variant has the same length as `declared`. Parameters outside any
    /// compatibility class keep their declared type; a pseudo-typed parameter
    /// makes the whole function ineligible.
    pub fn expand<T: AsRef<str>>(&self, declared: &[T]) -> Vec<Signature> {
        if declared.is_empty() {
            return if self.include_zero_arity {
                vec![Signature::empty()]
            } else {
                Vec::new()
            };
        }
        if declared.iter().any(|ty| is_pseudo_type(ty.as_ref())) {
            return Vec::new();
        }

        let original = Signature::new(declared);
        let choices: Vec<Vec<String>> = original
            .types()
            .iter()
            .map(|ty| {
                let mut options = vec![ty.clone()];
                for alt in self.conversions.alternatives(ty) {
                    let alt = canonical_type_name(&alt);
                    if !options.contains(&alt) {
                        options.push(alt);
                    }
                }
                options
            })
            .collect();

        let mut seen = BTreeSet::new();
        let mut variants = Vec::new();
        for combination in cartesian(&choices) {
            let candidate = Signature(combination);
            if candidate != original && seen.insert(candidate.clone()) {
                variants.push(candidate);
            }
        }
        variants
    }
}

impl Default for TypeResolutionModel {
    fn default() -> Self {
        Self::new(Box::new(PostgresTypeConversions))
    }
}

fn cartesian(choices: &[Vec<String>]) -> Vec<Vec<String>> {
    choices.iter().fold(vec![Vec::new()], |acc, options| {
        acc.iter()
            .flat_map(|prefix| {
                options.iter().map(move |option| {
                    let mut next = prefix.clone();
                    next.push(option.clone());
                    next
                })
            })
            .collect()
    })
}
