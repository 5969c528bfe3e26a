use std::collections::HashMap;

use sqlparser::ast::{DataType, TimezoneInfo};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Types that only exist as pseudo-types: they cannot be declared by a
/// PL/pgSQL override or cast to in a delegating call.
const PSEUDO_TYPES: &[&str] = &[
    "any",
    "\"any\"",
    "anyelement",
    "anyarray",
    "anynonarray",
    "anyenum",
    "anyrange",
    "anymultirange",
    "anycompatible",
    "anycompatiblearray",
    "anycompatiblenonarray",
    "anycompatiblerange",
    "anycompatiblemultirange",
    "internal",
    "cstring",
    "record",
    "trigger",
    "event_trigger",
    "language_handler",
    "fdw_handler",
    "index_am_handler",
    "tsm_handler",
    "table_am_handler",
    "pg_ddl_command",
    "opaque",
    "unknown",
    "void",
];

/// Single-step compatibility classes, in canonical `format_type` spelling.
///
/// A parameter may be swapped only within its own class. Cross-class
/// substitutions are never generated.
const COMPATIBILITY_CLASSES: &[&[&str]] = &[
    &["smallint", "integer", "bigint"],
    &["numeric", "real", "double precision"],
    &["text", "character varying", "character", "name"],
    &[
        "date",
        "timestamp without time zone",
        "timestamp with time zone",
    ],
];

/// Canonicalize a type name to the spelling `format_type` produces.
///
/// `int4`, `INT`, and `integer` all become `integer`; `varchar(20)` becomes
/// `character varying`. Names the parser does not know (domains, `name`,
/// arrays, quoted types) are kept, lowercased unless quoted.
pub fn canonical_type_name(type_name: &str) -> String {
    let trimmed = type_name.trim();
    let parsed = Parser::new(&PostgreSqlDialect {})
        .try_with_sql(trimmed)
        .and_then(|mut parser| parser.parse_data_type());
    if let Ok(data_type) = parsed {
        if let Some(canonical) = canonical_from_data_type(&data_type) {
            return canonical.to_string();
        }
    }
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.contains('"') {
        collapsed
    } else {
        collapsed.to_ascii_lowercase()
    }
}

fn canonical_from_data_type(data_type: &DataType) -> Option<&'static str> {
    match data_type {
        DataType::SmallInt(_) | DataType::Int2(_) => Some("smallint"),
        DataType::Int(_) | DataType::Integer(_) | DataType::Int4(_) => Some("integer"),
        DataType::BigInt(_) | DataType::Int8(_) => Some("bigint"),
        DataType::Real | DataType::Float4 => Some("real"),
        DataType::DoublePrecision | DataType::Float8 => Some("double precision"),
        DataType::Numeric(_) | DataType::Decimal(_) => Some("numeric"),
        DataType::Text => Some("text"),
        DataType::Varchar(_) | DataType::CharacterVarying(_) => Some("character varying"),
        DataType::Char(_) | DataType::Character(_) => Some("character"),
        DataType::Date => Some("date"),
        DataType::Timestamp(_, TimezoneInfo::Tz | TimezoneInfo::WithTimeZone) => {
            Some("timestamp with time zone")
        }
        DataType::Timestamp(_, _) => Some("timestamp without time zone"),
        DataType::Bool | DataType::Boolean => Some("boolean"),
        DataType::Bytea => Some("bytea"),
        DataType::Uuid => Some("uuid"),
        DataType::JSON => Some("json"),
        DataType::JSONB => Some("jsonb"),
        _ => None,
    }
}

/// True for pseudo-types an override can neither declare nor cast to.
pub fn is_pseudo_type(type_name: &str) -> bool {
    let canonical = canonical_type_name(type_name);
    PSEUDO_TYPES.contains(&canonical.as_str())
}

/// True when a function with this result cannot be shadowed by a scalar
/// PL/pgSQL override. `void` is allowed.
pub fn is_unsupported_return_type(return_type: &str) -> bool {
    let lower = return_type.trim().to_ascii_lowercase();
    if lower.starts_with("setof ") || lower.starts_with("table(") {
        return true;
    }
    lower != "void" && is_pseudo_type(&lower)
}

/// Maps a declared parameter type to the types the resolver would also bind
/// for the same call site.
pub trait TypeConversions {
    /// Alternatives for one parameter type, excluding the type itself.
    fn alternatives(&self, type_name: &str) -> Vec<String>;
}

/// `PostgreSQL` compatibility classes: integer widths, numeric kinds, textual
/// types, and date/time types.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTypeConversions;

impl TypeConversions for PostgresTypeConversions {
    fn alternatives(&self, type_name: &str) -> Vec<String> {
        let canonical = canonical_type_name(type_name);
        COMPATIBILITY_CLASSES
            .iter()
            .find(|class| class.contains(&canonical.as_str()))
            .map(|class| {
                class
                    .iter()
                    .filter(|member| **member != canonical)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Explicit conversion table, for targets with custom casts.
#[derive(Debug, Clone, Default)]
pub struct ConversionTable {
    entries: HashMap<String, Vec<String>>,
}

impl ConversionTable {
    /// Build a table from `(type, alternatives)` pairs.
    pub fn from_pairs<'a, I, A>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, A)>,
        A: IntoIterator<Item = &'a str>,
    {
        let entries = pairs
            .into_iter()
            .map(|(ty, alts)| {
                (
                    canonical_type_name(ty),
                    alts.into_iter().map(canonical_type_name).collect(),
                )
            })
            .collect();
        Self { entries }
    }
}

impl TypeConversions for ConversionTable {
    fn alternatives(&self, type_name: &str) -> Vec<String> {
        let canonical = canonical_type_name(type_name);
        self.entries
            .get(&canonical)
            .map(|alts| {
                alts.iter()
                    .filter(|alt| **alt != canonical)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
