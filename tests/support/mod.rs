#![allow(dead_code)]

use serde_json::{json, Value};

use pgshadow::catalog::function::{CatalogFunction, Volatility};
use pgshadow::error::SessionError;
use pgshadow::session::{Row, Session};

/// Scripted session: every statement is logged, the first failure rule whose
/// needle occurs in the statement fires, and queries answer with the rows of
/// the first matching response rule (or no rows).
#[derive(Default)]
pub(crate) struct FakeSession {
    responses: Vec<(String, Vec<Value>)>,
    failures: Vec<(String, SessionError)>,
    pub(crate) log: Vec<String>,
    pub(crate) closed: bool,
}

impl FakeSession {
    /// A session logged in as `principal` whose catalog holds `functions`.
    pub(crate) fn with_catalog(principal: &str, functions: &[Value]) -> Self {
        FakeSession::default()
            .respond(
                "current_user::text AS principal",
                vec![json!({ "principal": principal })],
            )
            .respond("FROM pg_catalog.pg_proc", functions.to_vec())
    }

    pub(crate) fn respond(mut self, needle: &str, rows: Vec<Value>) -> Self {
        self.responses.push((needle.to_string(), rows));
        self
    }

    pub(crate) fn fail_on(mut self, needle: &str, error: SessionError) -> Self {
        self.failures.push((needle.to_string(), error));
        self
    }

    /// Make `to_regprocedure` report `regprocedure` as already present, with
    /// a placeholder SQL body.
    pub(crate) fn existing(self, regprocedure: &str) -> Self {
        let definition = format!(
            "CREATE OR REPLACE FUNCTION {regprocedure}\n RETURNS text\n LANGUAGE sql\n\
             AS $function$SELECT NULL::text$function$\n"
        );
        self.existing_with_definition(regprocedure, &definition)
    }

    /// Make `regprocedure` present, with `pg_get_functiondef` returning
    /// `definition`.
    pub(crate) fn existing_with_definition(self, regprocedure: &str, definition: &str) -> Self {
        let literal = format!("to_regprocedure('{}')", regprocedure.replace('\'', "''"));
        self.respond(
            &format!("{literal} IS NOT NULL"),
            vec![json!({ "present": true })],
        )
        .respond(
            &format!("pg_get_functiondef(pg_catalog.{literal})"),
            vec![json!({ "definition": definition })],
        )
    }

    /// Make the proxy detector read a hit for the candidate tagged `tag`.
    pub(crate) fn proxy_hit(self, tag: &str) -> Self {
        let needle = format!("current_setting('pgshadow.probe_{tag}'");
        self.respond(&needle, vec![json!({ "marker": "hit" })])
    }

    /// Index of the first logged statement containing `needle`.
    pub(crate) fn position(&self, needle: &str) -> Option<usize> {
        self.log.iter().position(|sql| sql.contains(needle))
    }

    /// Logged statements containing `needle`.
    pub(crate) fn matching(&self, needle: &str) -> Vec<&str> {
        self.log
            .iter()
            .filter(|sql| sql.contains(needle))
            .map(String::as_str)
            .collect()
    }

    fn check(&mut self, sql: &str) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Connection("session already closed".to_string()));
        }
        self.log.push(sql.to_string());
        match self.failures.iter().find(|(needle, _)| sql.contains(needle.as_str())) {
            Some((_, error)) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Session for FakeSession {
    fn execute(&mut self, sql: &str) -> Result<(), SessionError> {
        self.check(sql)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, SessionError> {
        self.check(sql)?;
        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.iter().cloned().map(Row::from_json).collect())
            .unwrap_or_default())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// One discovery row as the catalog query returns it.
pub(crate) fn catalog_row(name: &str, params: &[&str], result: &str) -> Value {
    json!({
        "schema": "pg_catalog",
        "name": name,
        "params": params,
        "result": result,
        "volatility": "i",
        "owner": "postgres",
    })
}

pub(crate) fn catalog_function(name: &str, params: &[&str], result: &str) -> CatalogFunction {
    CatalogFunction {
        schema: "pg_catalog".to_string(),
        name: name.to_string(),
        params_type: params.iter().map(ToString::to_string).collect(),
        return_type: result.to_string(),
        volatility: Volatility::Immutable,
        owner: "postgres".to_string(),
    }
}
