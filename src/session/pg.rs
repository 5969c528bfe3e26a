use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{ConnectionError, DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::Text;
use tracing::debug;

use super::{Row, Session};
use crate::error::SessionError;

/// Connection settings for [`PgSession::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Login role.
    pub username: String,
    /// Password, when the server asks for one.
    pub password: Option<String>,
    /// Database name.
    pub database: String,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// libpq `sslmode`, passed through verbatim.
    pub sslmode: Option<String>,
}

impl ConnectOptions {
    /// Render a libpq keyword/value connection string.
    pub fn conninfo(&self) -> String {
        let mut parts = vec![
            format!("host={}", conninfo_value(&self.host)),
            format!("port={}", self.port),
            format!("user={}", conninfo_value(&self.username)),
            format!("dbname={}", conninfo_value(&self.database)),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", conninfo_value(password)));
        }
        if let Some(mode) = &self.sslmode {
            parts.push(format!("sslmode={}", conninfo_value(mode)));
        }
        parts.join(" ")
    }
}

fn conninfo_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[derive(QueryableByName)]
struct JsonRows {
    #[diesel(sql_type = Text)]
    doc: String,
}

/// A [`Session`] over one long-lived diesel `PgConnection`.
pub struct PgSession {
    conn: Option<PgConnection>,
}

impl PgSession {
    /// Connect with a libpq URL or keyword/value string.
    pub fn establish(database_url: &str) -> Result<Self, SessionError> {
        let conn = PgConnection::establish(database_url).map_err(connection_error)?;
        Ok(Self { conn: Some(conn) })
    }

    /// Connect with discrete settings.
    pub fn connect(options: &ConnectOptions) -> Result<Self, SessionError> {
        Self::establish(&options.conninfo())
    }

    fn conn(&mut self) -> Result<&mut PgConnection, SessionError> {
        self.conn
            .as_mut()
            .ok_or_else(|| SessionError::Connection("session already closed".to_string()))
    }
}

impl Session for PgSession {
    fn execute(&mut self, sql: &str) -> Result<(), SessionError> {
        debug!(sql, "execute");
        self.conn()?.batch_execute(sql).map_err(statement_error)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, SessionError> {
        debug!(sql, "query");
        let inner = sql.trim().trim_end_matches(';');
        let wrapped = format!(
            "SELECT COALESCE(pg_catalog.json_agg(q), '[]'::json)::text AS doc FROM ({inner}) AS q"
        );
        let rows: JsonRows = diesel::sql_query(wrapped)
            .get_result(self.conn()?)
            .map_err(statement_error)?;
        serde_json::from_str(&rows.doc).map_err(|e| SessionError::Decode(e.to_string()))
    }

    fn close(&mut self) {
        // Dropping the connection sends the terminate message.
        self.conn.take();
    }
}

fn connection_error(error: ConnectionError) -> SessionError {
    SessionError::Connection(error.to_string())
}

fn statement_error(error: DieselError) -> SessionError {
    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            SessionError::Connection(info.message().to_string())
        }
        DieselError::BrokenTransactionManager => {
            SessionError::Connection("broken transaction manager".to_string())
        }
        other => SessionError::Statement(other.to_string()),
    }
}
