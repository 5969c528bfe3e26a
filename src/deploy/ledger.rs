use serde::Serialize;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::{info, warn};

use crate::candidate::key::CandidateKey;
use crate::error::{SessionError, ShadowError};
use crate::session::Session;

/// What kind of override an entry undoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallKind {
    /// Benign test definition, normally dropped right after observation.
    Probe,
    /// Payload-bearing definition.
    Exploit,
}

/// One function currently left on the target, with its inverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Installed override.
    pub key: CandidateKey,
    /// Which definition was installed.
    pub kind: InstallKind,
    /// Statement that undoes it: a drop, or the definition it replaced.
    pub inverse: String,
}

/// Inverse statements, recorded the moment each definition is installed.
///
/// The ledger always describes what is on the target right now, so a run
/// that stops anywhere still has a complete drop script.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackLedger {
    entries: Vec<LedgerEntry>,
}

impl RollbackLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an installed definition. A later definition of the same
    /// function supersedes the earlier entry, since one inverse undoes both.
    pub fn record(&mut self, key: &CandidateKey, kind: InstallKind, inverse: &str) {
        self.entries.retain(|entry| entry.key != *key);
        self.entries.push(LedgerEntry {
            key: key.clone(),
            kind,
            inverse: inverse.to_string(),
        });
    }

    /// Forget a definition after its inverse succeeded.
    pub fn release(&mut self, key: &CandidateKey, kind: InstallKind) {
        self.entries
            .retain(|entry| !(entry.key == *key && entry.kind == kind));
    }

    /// Entries in installation order.
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Keys of deployed exploit overrides, in deployment order.
    pub fn deployed(&self) -> Vec<&CandidateKey> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == InstallKind::Exploit)
            .map(|entry| &entry.key)
            .collect()
    }

    /// True when nothing is left on the target.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every inverse, terminated by `;`, in installation order.
    pub fn drop_script(&self) -> String {
        join_statements(self.entries.iter().map(|e| e.inverse.as_str()))
    }

    /// Execute every recorded inverse independently. Failures are reported and
    /// their entries kept; a fatal session error stops immediately.
    pub fn revert_all<S: Session + ?Sized>(
        &mut self,
        session: &mut S,
    ) -> Result<Vec<(CandidateKey, String)>, SessionError> {
        let mut failures = Vec::new();
        let mut kept = Vec::new();
        let entries = std::mem::take(&mut self.entries);
        let mut pending = entries.into_iter();
        while let Some(entry) = pending.next() {
            match session.execute(&entry.inverse) {
                Ok(()) => info!(key = %entry.key, "reverted"),
                Err(e) if e.is_fatal() => {
                    kept.push(entry);
                    kept.extend(pending);
                    self.entries = kept;
                    return Err(e);
                }
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "revert failed");
                    failures.push((entry.key.clone(), e.to_string()));
                    kept.push(entry);
                }
            }
        }
        self.entries = kept;
        Ok(failures)
    }
}

/// Terminate each statement with `;` and put one per line.
pub fn join_statements<'a>(statements: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for statement in statements {
        out.push_str(statement.trim_end().trim_end_matches(';'));
        out.push_str(";\n");
    }
    out
}

/// Split a rollback script into statements and accept it only if every
/// statement drops a function or recreates one. Statements are returned
/// verbatim, so restored bodies run exactly as they were captured.
pub fn parse_drop_script(script: &str) -> Result<Vec<String>, ShadowError> {
    let tokens = Tokenizer::new(&PostgreSqlDialect {}, script)
        .with_unescape(false)
        .tokenize()
        .map_err(|e| ShadowError::Rollback(e.to_string()))?;

    let mut statements = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    for token in tokens {
        if token == Token::SemiColon {
            push_statement(&mut statements, std::mem::take(&mut current))?;
        } else {
            current.push(token);
        }
    }
    push_statement(&mut statements, current)?;
    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, tokens: Vec<Token>) -> Result<(), ShadowError> {
    let sql: String = tokens.iter().map(ToString::to_string).collect();
    let sql = sql.trim();
    if sql.is_empty() {
        return Ok(());
    }

    let leading: Vec<String> = tokens
        .iter()
        .filter(|token| !matches!(token, Token::Whitespace(_)))
        .take(4)
        .map(|token| match token {
            Token::Word(word) if word.quote_style.is_none() => word.value.to_ascii_uppercase(),
            other => other.to_string(),
        })
        .collect();
    let leading: Vec<&str> = leading.iter().map(String::as_str).collect();
    match leading.as_slice() {
        ["DROP", "FUNCTION", ..]
        | ["CREATE", "FUNCTION", ..]
        | ["CREATE", "OR", "REPLACE", "FUNCTION"] => {
            statements.push(sql.to_string());
            Ok(())
        }
        _ => Err(ShadowError::Rollback(format!(
            "only DROP FUNCTION and CREATE OR REPLACE FUNCTION statements are allowed, found `{sql}`"
        ))),
    }
}

/// Run a previously emitted drop script. Each statement is independent.
pub fn execute_drop_script<S: Session + ?Sized>(
    session: &mut S,
    script: &str,
) -> Result<Vec<String>, ShadowError> {
    let mut failures = Vec::new();
    for statement in parse_drop_script(script)? {
        match session.execute(&statement) {
            Ok(()) => info!(%statement, "reverted"),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => failures.push(format!("{statement}: {e}")),
        }
    }
    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::variants::Signature;

    fn key(name: &str, ty: &str) -> CandidateKey {
        CandidateKey::new("public", name, Signature::new([ty]))
    }

    #[test]
    fn releasing_a_probe_keeps_other_entries_in_order() {
        let mut ledger = RollbackLedger::new();
        ledger.record(&key("lower", "varchar"), InstallKind::Exploit, "DROP A");
        ledger.record(&key("upper", "varchar"), InstallKind::Probe, "DROP B");
        ledger.record(&key("md5", "varchar"), InstallKind::Exploit, "DROP C;");

        ledger.release(&key("upper", "varchar"), InstallKind::Probe);

        assert_eq!(ledger.drop_script(), "DROP A;\nDROP C;\n");
        assert_eq!(
            ledger.deployed(),
            vec![&key("lower", "varchar"), &key("md5", "varchar")]
        );
    }

    #[test]
    fn redefinition_keeps_a_single_drop() {
        let mut ledger = RollbackLedger::new();
        ledger.record(&key("lower", "varchar"), InstallKind::Probe, "DROP A");
        ledger.record(&key("lower", "varchar"), InstallKind::Exploit, "DROP A");
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.entries()[0].kind, InstallKind::Exploit);
    }

    #[test]
    fn drop_script_parser_accepts_only_function_drops() {
        let script = "DROP FUNCTION IF EXISTS public.\"lower\"(character varying);\n\
                      DROP FUNCTION IF EXISTS public.\"upper\"(name);\n";
        let statements = parse_drop_script(script).expect("drop script should parse");
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("\"lower\""));

        let err = parse_drop_script("DROP FUNCTION f(integer); DROP TABLE users;")
            .expect_err("table drops are not rollback statements");
        assert!(err.to_string().contains("only DROP FUNCTION"), "got {err}");
    }

    #[test]
    fn restored_definitions_survive_verbatim() {
        let restore = "CREATE OR REPLACE FUNCTION public.lower(character varying)\n \
                       RETURNS text\n LANGUAGE plpgsql\n\
                       AS $function$\nBEGIN\n    RETURN 'it''s; kept';\nEND\n$function$";
        let script = join_statements([
            r#"DROP FUNCTION IF EXISTS public."upper"(name)"#,
            restore,
        ]);

        let statements = parse_drop_script(&script).expect("restores are accepted");
        assert_eq!(
            statements,
            vec![
                r#"DROP FUNCTION IF EXISTS public."upper"(name)"#.to_string(),
                restore.to_string(),
            ]
        );
    }

    #[test]
    fn empty_script_is_empty() {
        assert!(parse_drop_script("").unwrap().is_empty());
        assert_eq!(RollbackLedger::new().drop_script(), "");
    }
}
