//! Database engine boundary
//!
//! The engine is an external collaborator treated as a black box. The
//! control plane needs exactly three capabilities from it:
//! - SQL-like statement execution for slot management and status queries
//! - a physical base backup bound to a replication slot
//! - a lightweight liveness probe
//!
//! `CommandEngine` reaches a real server through its client tools;
//! `SimulatedEngine` models a set of servers in-process.

mod command;
mod errors;
mod lsn;
pub mod sim;
mod statement;

pub use command::CommandEngine;
pub use errors::{EngineError, EngineErrorKind, EngineResult};
pub use lsn::Lsn;
pub use sim::SimulatedEngine;
pub use statement::{parse_bool, quote_literal, Row, Rows, Statement};

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Credentials;

/// Connection information for one engine server.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, credentials: &Credentials) -> Self {
        Self {
            host: host.into(),
            port,
            user: credentials.user.clone(),
            password: credentials.password.clone(),
            database: credentials.database.clone(),
        }
    }

    /// `host:port`, used as identity in logs and in the simulator.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection string a standby uses to stream from this server.
    pub fn conninfo(&self, application_name: &str) -> String {
        let mut parts = vec![
            format!("host={}", conninfo_value(&self.host)),
            format!("port={}", self.port),
            format!("user={}", conninfo_value(&self.user)),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", conninfo_value(password)));
        }
        parts.push(format!("application_name={}", conninfo_value(application_name)));
        parts.join(" ")
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Quote a conninfo value when it contains spaces, quotes or backslashes.
fn conninfo_value(value: &str) -> String {
    if !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\')
    {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Parse a `key=value` connection string, honoring single-quoted values.
pub fn parse_conninfo(conninfo: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let mut chars = conninfo.chars().peekable();

    loop {
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }
        if chars.next_if_eq(&'=').is_none() {
            break;
        }
        while chars.peek().map_or(false, |c| c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '\'' => break,
                    other => value.push(other),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        params.insert(key, value);
    }

    params
}

/// Parameters of a physical base backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseBackupRequest {
    /// Server the copy is taken from
    pub source: Endpoint,
    /// Replica data directory receiving the copy
    pub target_dir: PathBuf,
    /// Pre-created slot retaining WAL from the backup start point
    pub slot_name: String,
    /// Application name the backup connection reports
    pub application_name: String,
}

/// Capabilities the control plane consumes from the database engine.
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Lightweight liveness check.
    async fn probe(&self, endpoint: &Endpoint) -> EngineResult<()>;

    /// Execute one statement and return its rows.
    async fn execute(&self, endpoint: &Endpoint, statement: &Statement) -> EngineResult<Rows>;

    /// Stream a full physical copy of `request.source` into `request.target_dir`.
    async fn base_backup(&self, request: &BaseBackupRequest) -> EngineResult<()>;
}

/// Type alias for a shared engine
pub type DynEngine = Arc<dyn DatabaseEngine>;

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(password: Option<&str>) -> Credentials {
        Credentials {
            user: "replicator".into(),
            password: password.map(str::to_string),
            database: "postgres".into(),
        }
    }

    #[test]
    fn test_conninfo_plain() {
        let ep = Endpoint::new("db1", 5432, &creds(Some("secret")));
        assert_eq!(
            ep.conninfo("replica_1"),
            "host=db1 port=5432 user=replicator password=secret application_name=replica_1"
        );
    }

    #[test]
    fn test_conninfo_quotes_special_values() {
        let ep = Endpoint::new("db1", 5432, &creds(Some("it's a pw")));
        assert!(ep.conninfo("r").contains(r"password='it\'s a pw'"));
    }

    #[test]
    fn test_conninfo_without_password() {
        let ep = Endpoint::new("db1", 5433, &creds(None));
        assert!(!ep.conninfo("r").contains("password"));
    }

    #[test]
    fn test_parse_conninfo_round_trips_quoted_values() {
        let ep = Endpoint::new("db1", 5433, &creds(Some("it's a pw")));
        let params = parse_conninfo(&ep.conninfo("replica_1"));
        assert_eq!(params["host"], "db1");
        assert_eq!(params["port"], "5433");
        assert_eq!(params["password"], "it's a pw");
        assert_eq!(params["application_name"], "replica_1");
    }

    #[test]
    fn test_parse_conninfo_ignores_trailing_garbage() {
        let params = parse_conninfo("host=db1   port = 5432 dangling");
        assert_eq!(params.len(), 2);
        assert_eq!(params["port"], "5432");
    }

    #[test]
    fn test_debug_hides_password() {
        let ep = Endpoint::new("db1", 5432, &creds(Some("secret")));
        assert!(!format!("{:?}", ep).contains("secret"));
    }
}
