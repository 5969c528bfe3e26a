/// Return the identifier without surrounding double quotes.
pub fn unquote_identifier(ident: &str) -> &str {
    ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(ident)
}

/// Normalize an identifier for case-insensitive matching.
///
/// Trims whitespace, removes surrounding double quotes on a single identifier,
/// and lowercases the result.
pub fn normalize_identifier(ident: &str) -> String {
    unquote_identifier(ident.trim()).to_ascii_lowercase()
}

/// Always double-quote an identifier, doubling embedded quotes.
///
/// Catalog names are exact, so quoting keeps their case and lets names that
/// collide with keywords (`left`, `right`, ...) be called and created.
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote an identifier only when `PostgreSQL` would otherwise fold or reject it.
pub fn quote_identifier_if_needed(ident: &str) -> String {
    let plain = !ident.is_empty()
        && ident
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        ident.to_string()
    } else {
        quote_identifier(ident)
    }
}

/// Split a potentially schema-qualified name into `(schema, name)`.
///
/// Handles dots inside quoted identifiers, e.g. `"my.schema"."fn.name"`.
pub fn split_qualified_name(name: &str) -> Option<(String, String)> {
    let mut in_quotes = false;
    let mut start = 0usize;
    let mut parts: Vec<&str> = Vec::new();

    for (idx, ch) in name.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                parts.push(name[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(name[start..].trim());

    if parts.len() < 2 {
        return None;
    }

    let schema = unquote_identifier(parts[parts.len() - 2]).to_string();
    let relation = unquote_identifier(parts[parts.len() - 1]).to_string();
    Some((schema, relation))
}

/// Normalize a function name to its terminal identifier.
///
/// Examples:
/// - `"pg_catalog.lower"` -> `"lower"`
/// - `"\"pg_catalog\".\"Upper\""` -> `"upper"`
pub fn normalize_function_name(name: &str) -> String {
    if let Some((_, relation)) = split_qualified_name(name.trim()) {
        return normalize_identifier(&relation);
    }
    normalize_identifier(name)
}

/// Functions the parser rewrites into schema-qualified calls from special
/// syntax (`SUBSTRING(x FROM y)`, `EXTRACT(...)`, `x AT TIME ZONE y`, ...).
///
/// Those call sites never go through search-path resolution, so a same-named
/// function in another schema is never selected.
const PARSER_QUALIFIED_NAMES: &[&str] = &[
    "substring",
    "position",
    "overlay",
    "extract",
    "overlaps",
    "normalize",
    "is_normalized",
    "timezone",
    "collation_for",
    "xmlexists",
    "system_user",
];

/// True for names that cannot be usefully shadowed.
pub fn is_reserved_function_name(name: &str) -> bool {
    let name = normalize_function_name(name);
    PARSER_QUALIFIED_NAMES.contains(&name.as_str()) || name.starts_with("binary_upgrade_")
}
