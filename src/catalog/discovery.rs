use std::fmt;

use tracing::debug;

use crate::catalog::function::CatalogFunction;
use crate::catalog::names::{is_reserved_function_name, normalize_function_name};
use crate::catalog::priority::PriorityRegistry;
use crate::error::ShadowError;
use crate::resolution::types::{is_pseudo_type, is_unsupported_return_type};
use crate::session::{quote_literal, Session};

/// Which catalog rows are considered at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Schemas whose functions may be shadowed.
    pub catalog_schemas: Vec<String>,
    /// When non-empty, only these function names are kept.
    pub only: Vec<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            catalog_schemas: vec!["pg_catalog".to_string()],
            only: Vec::new(),
        }
    }
}

/// Why a catalog row was not turned into a [`CatalogFunction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    /// Already owned by the session principal.
    OwnedByPrincipal,
    /// Reached only through parser-qualified calls or internal upgrade paths.
    ReservedName,
    /// A parameter or the result uses a type an override cannot declare.
    UnsupportedType(String),
    /// Not on the explicit allow-list.
    NotSelected,
    /// The row could not be decoded.
    Malformed(String),
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::OwnedByPrincipal => write!(f, "owned by the session principal"),
            Exclusion::ReservedName => write!(f, "reserved name"),
            Exclusion::UnsupportedType(ty) => write!(f, "unsupported type {ty}"),
            Exclusion::NotSelected => write!(f, "not selected"),
            Exclusion::Malformed(reason) => write!(f, "malformed catalog row: {reason}"),
        }
    }
}

/// Selects catalog functions worth expanding into override candidates.
#[derive(Debug, Clone, Default)]
pub struct CandidateDiscovery {
    options: DiscoveryOptions,
    priorities: PriorityRegistry,
}

impl CandidateDiscovery {
    /// Discovery with explicit options and priority hints.
    pub fn new(options: DiscoveryOptions, priorities: PriorityRegistry) -> Self {
        Self {
            options,
            priorities,
        }
    }

    /// Priority hints in use.
    pub fn priorities(&self) -> &PriorityRegistry {
        &self.priorities
    }

    /// Read-only query listing plain, fixed-arity, scalar functions.
    pub fn catalog_query(&self) -> String {
        let schemas = self
            .options
            .catalog_schemas
            .iter()
            .map(|schema| quote_literal(schema))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT n.nspname::text AS schema, \
p.proname::text AS name, \
ARRAY(SELECT pg_catalog.format_type(a.oid, NULL) \
FROM pg_catalog.unnest(p.proargtypes::oid[]) WITH ORDINALITY AS a(oid, ord) \
ORDER BY a.ord) AS params, \
pg_catalog.pg_get_function_result(p.oid) AS result, \
p.provolatile::text AS volatility, \
pg_catalog.pg_get_userbyid(p.proowner)::text AS owner \
FROM pg_catalog.pg_proc p \
JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace \
WHERE p.prokind = 'f' AND NOT p.proretset AND p.provariadic = 0 \
AND n.nspname IN ({schemas}) \
ORDER BY n.nspname, p.proname, p.oid"
        )
    }

    /// Role the session is running as.
    pub fn principal<S: Session + ?Sized>(&self, session: &mut S) -> Result<String, ShadowError> {
        let rows = session.query("SELECT current_user::text AS principal")?;
        rows.first()
            .and_then(|row| row.text("principal"))
            .ok_or_else(|| ShadowError::Catalog("principal".to_string()))
    }

    /// Query the catalog once and return the selected functions, highest
    /// priority first. Read-only.
    pub fn discover<S: Session + ?Sized>(
        &self,
        session: &mut S,
    ) -> Result<CatalogScan, ShadowError> {
        let principal = self.principal(session)?;
        let rows = session.query(&self.catalog_query())?;

        let mut selected = Vec::new();
        let mut excluded = Vec::new();
        for row in &rows {
            let function = match CatalogFunction::from_row(row) {
                Ok(function) => function,
                Err(e) => {
                    let name = row.text("name").unwrap_or_default();
                    excluded.push((name, Exclusion::Malformed(e.to_string())));
                    continue;
                }
            };
            match self.exclusion(&function, &principal) {
                Some(reason) => {
                    debug!(function = %function, %reason, "excluded");
                    excluded.push((function.to_string(), reason));
                }
                None => selected.push(function),
            }
        }

        // Stable: catalog order is kept among equal weights.
        selected.sort_by_key(|f| std::cmp::Reverse(self.priorities.weight(&f.name)));

        Ok(CatalogScan {
            principal,
            functions: selected.into_iter(),
            excluded,
        })
    }

    fn exclusion(&self, function: &CatalogFunction, principal: &str) -> Option<Exclusion> {
        if !self.options.only.is_empty()
            && !self
                .options
                .only
                .iter()
                .any(|name| normalize_function_name(name) == function.name.to_ascii_lowercase())
        {
            return Some(Exclusion::NotSelected);
        }
        if function.owner == principal {
            return Some(Exclusion::OwnedByPrincipal);
        }
        if is_reserved_function_name(&function.name) {
            return Some(Exclusion::ReservedName);
        }
        if let Some(ty) = function.params_type.iter().find(|ty| is_pseudo_type(ty)) {
            return Some(Exclusion::UnsupportedType(ty.clone()));
        }
        if is_unsupported_return_type(&function.return_type) {
            return Some(Exclusion::UnsupportedType(function.return_type.clone()));
        }
        None
    }
}

/// One pass over discovered functions. Not restartable; query again instead.
#[derive(Debug)]
pub struct CatalogScan {
    principal: String,
    functions: std::vec::IntoIter<CatalogFunction>,
    excluded: Vec<(String, Exclusion)>,
}

impl CatalogScan {
    /// Role the catalog was read as.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Rows that were read but filtered out, with the reason.
    pub fn excluded(&self) -> &[(String, Exclusion)] {
        &self.excluded
    }
}

impl Iterator for CatalogScan {
    type Item = CatalogFunction;

    fn next(&mut self) -> Option<Self::Item> {
        self.functions.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.functions.size_hint()
    }
}

impl ExactSizeIterator for CatalogScan {}
