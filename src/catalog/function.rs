use serde::Serialize;
use std::fmt;

use crate::catalog::names::quote_identifier;
use crate::error::ShadowError;
use crate::session::Row;

/// `pg_proc.provolatile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Volatility {
    /// `i`: same result for the same arguments, forever.
    Immutable,
    /// `s`: same result within one statement.
    Stable,
    /// `v`: may change at any call, may have side effects.
    Volatile,
}

impl Volatility {
    /// Parse the single-letter catalog code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(Volatility::Immutable),
            "s" => Some(Volatility::Stable),
            "v" => Some(Volatility::Volatile),
            _ => None,
        }
    }

    /// SQL keyword used in `CREATE FUNCTION`.
    pub fn keyword(self) -> &'static str {
        match self {
            Volatility::Immutable => "IMMUTABLE",
            Volatility::Stable => "STABLE",
            Volatility::Volatile => "VOLATILE",
        }
    }
}

impl fmt::Display for Volatility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One function snapshot read from the system catalog at discovery time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogFunction {
    /// Owning schema (namespace).
    pub schema: String,
    /// Function name, exactly as stored in `pg_proc.proname`.
    pub name: String,
    /// Declared parameter types as rendered by `format_type`.
    pub params_type: Vec<String>,
    /// Result type as rendered by `pg_get_function_result`.
    pub return_type: String,
    /// Volatility class.
    pub volatility: Volatility,
    /// Owning role.
    pub owner: String,
}

impl CatalogFunction {
    /// Build from one discovery row.
    pub fn from_row(row: &Row) -> Result<Self, ShadowError> {
        let field = |column: &str| {
            row.text(column)
                .ok_or_else(|| ShadowError::Catalog(column.to_string()))
        };
        let volatility = Volatility::from_code(&field("volatility")?)
            .ok_or_else(|| ShadowError::Catalog("volatility".to_string()))?;
        Ok(Self {
            schema: field("schema")?,
            name: field("name")?,
            params_type: row
                .text_list("params")
                .ok_or_else(|| ShadowError::Catalog("params".to_string()))?,
            return_type: field("result")?,
            volatility,
            owner: field("owner")?,
        })
    }

    /// Schema-qualified, quoted name (`"pg_catalog"."lower"`).
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.name)
        )
    }

    /// Number of declared parameters.
    pub fn arity(&self) -> usize {
        self.params_type.len()
    }

    /// True when the function returns nothing.
    pub fn returns_void(&self) -> bool {
        self.return_type.eq_ignore_ascii_case("void")
    }
}

impl fmt::Display for CatalogFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({})",
            self.schema,
            self.name,
            self.params_type.join(", ")
        )
    }
}
