use std::fmt;

use serde::Serialize;
use xxhash_rust::xxh3::xxh3_64;

use crate::catalog::names::{quote_identifier, quote_identifier_if_needed};
use crate::resolution::variants::Signature;

/// Identity of an override: where it is created, its name, and its
/// parameter types. Payload and run options never take part in identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CandidateKey {
    /// Schema the override is created in.
    pub schema: String,
    /// Function name, identical to the shadowed catalog function.
    pub name: String,
    /// Override parameter types.
    pub signature: Signature,
}

impl CandidateKey {
    /// Build a key.
    pub fn new(schema: impl Into<String>, name: impl Into<String>, signature: Signature) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            signature,
        }
    }

    /// `schema."name"` as used in DDL.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier_if_needed(&self.schema),
            quote_identifier(&self.name)
        )
    }

    /// `schema."name"(type, ...)`, the regprocedure spelling.
    pub fn regprocedure(&self) -> String {
        format!("{}({})", self.qualified_name(), self.signature)
    }

    /// Short tag for markers and log correlation: xxh3 of the regprocedure
    /// spelling, so it is the same across runs and builds.
    pub fn tag(&self) -> String {
        format!("{:016x}", xxh3_64(self.regprocedure().as_bytes()))
    }
}

impl fmt::Display for CandidateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.schema, self.name, self.signature)
    }
}
