use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::candidate::override_fn::OverrideOptions;
use crate::catalog::discovery::DiscoveryOptions;
use crate::catalog::names::quote_identifier;

/// What happens when a candidate already exists on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CollisionPolicy {
    /// Replace it with `CREATE OR REPLACE` and note it in the test log.
    #[default]
    Overwrite,
    /// Leave it alone and record a collision.
    Skip,
    /// Stop the whole run at the first collision, before any mutation.
    Abort,
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionPolicy::Overwrite => write!(f, "overwrite"),
            CollisionPolicy::Skip => write!(f, "skip"),
            CollisionPolicy::Abort => write!(f, "abort"),
        }
    }
}

impl FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(CollisionPolicy::Overwrite),
            "skip" => Ok(CollisionPolicy::Skip),
            "abort" => Ok(CollisionPolicy::Abort),
            _ => Err(format!(
                "Invalid collision policy '{s}': expected overwrite, skip or abort"
            )),
        }
    }
}

/// Default cap on override signatures per catalog function.
pub const DEFAULT_MAX_VARIANTS: usize = 256;

/// Everything one run is parameterized by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Hide payload errors from callers of deployed overrides.
    pub stealth: bool,
    /// Deployed overrides log each invocation to the tracking table.
    pub tracking: bool,
    /// Test every candidate before deploying.
    pub run_tests: bool,
    /// Deploy payload-bearing overrides at all.
    pub create_exploits: bool,
    /// Behavior on pre-existing overrides.
    pub collision: CollisionPolicy,
    /// SQL run by deployed overrides.
    pub payload: String,
    /// Schema the overrides are created in.
    pub target_schema: String,
    /// Catalog scope.
    pub discovery: DiscoveryOptions,
    /// Let zero-parameter functions produce a candidate.
    pub include_zero_arity: bool,
    /// Most override signatures tried per catalog function; `None` is
    /// unbounded.
    pub max_variants: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stealth: true,
            tracking: false,
            run_tests: true,
            create_exploits: true,
            collision: CollisionPolicy::Overwrite,
            payload: String::new(),
            target_schema: "public".to_string(),
            discovery: DiscoveryOptions::default(),
            include_zero_arity: false,
            max_variants: Some(DEFAULT_MAX_VARIANTS),
        }
    }
}

impl RunConfig {
    /// Default payload granting superuser to `username`.
    pub fn superuser_payload(username: &str) -> String {
        format!("ALTER USER {} WITH SUPERUSER", quote_identifier(username))
    }

    /// Options every candidate of this run is built with.
    pub fn override_options(&self) -> OverrideOptions {
        OverrideOptions {
            target_schema: self.target_schema.clone(),
            payload: self.payload.clone(),
            stealth: self.stealth,
            tracking: self.tracking,
            replace_existing: self.collision == CollisionPolicy::Overwrite,
        }
    }
}
