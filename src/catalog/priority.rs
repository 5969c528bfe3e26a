use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::catalog::names::normalize_function_name;

/// Why a function is likely to be reached by a privileged caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityHint {
    /// Higher weights are tested first.
    pub weight: u32,
    /// Free-form note carried into the report.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Functions routinely called from maintenance jobs, monitoring agents and
/// admin tooling that run as superuser with the default search path.
const MAINTENANCE_FUNCTIONS: &[(&str, u32)] = &[
    ("lower", 30),
    ("upper", 30),
    ("length", 25),
    ("replace", 25),
    ("concat", 25),
    ("array_to_string", 20),
    ("split_part", 20),
    ("substr", 20),
    ("btrim", 20),
    ("ltrim", 15),
    ("rtrim", 15),
    ("left", 15),
    ("right", 15),
    ("md5", 15),
    ("to_char", 15),
    ("date_trunc", 15),
    ("to_timestamp", 10),
    ("regexp_replace", 10),
    ("quote_ident", 10),
    ("quote_literal", 10),
    ("pg_size_pretty", 10),
    ("row_to_json", 5),
    ("to_json", 5),
];

/// Registry of functions known to be invoked by elevated background activity.
#[derive(Debug, Clone)]
pub struct PriorityRegistry {
    /// Normalized function name → hint.
    pub functions: HashMap<String, PriorityHint>,
}

impl PriorityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry seeded with the built-in maintenance list.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (name, weight) in MAINTENANCE_FUNCTIONS {
            registry.functions.insert(
                (*name).to_string(),
                PriorityHint {
                    weight: *weight,
                    reason: Some("common in maintenance and monitoring queries".to_string()),
                },
            );
        }
        registry
    }

    /// Load hints from a JSON object of `name → {weight, reason}`.
    pub fn load_from_json(&mut self, json: &str) -> Result<(), String> {
        let parsed: HashMap<String, PriorityHint> = serde_json::from_str(json)
            .map_err(|e| format!("Invalid priority registry JSON: {e}"))?;
        // Loaded entries take precedence over the built-in list
        for (name, hint) in parsed {
            self.functions.insert(normalize_function_name(&name), hint);
        }
        Ok(())
    }

    /// Get the hint for a function by name.
    pub fn get(&self, name: &str) -> Option<&PriorityHint> {
        self.functions.get(&normalize_function_name(name))
    }

    /// Sort weight for a function; unknown functions weigh zero.
    pub fn weight(&self, name: &str) -> u32 {
        self.get(name).map_or(0, |hint| hint.weight)
    }
}

impl Default for PriorityRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
