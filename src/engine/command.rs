//! Engine adapter driving the server's own client tools.
//!
//! `pg_isready` for liveness, `psql` for statements, `pg_basebackup` for
//! the physical copy. The password travels in the child's environment,
//! never on the command line. Every invocation is bounded by a timeout and
//! the child is killed when the timeout fires.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::errors::{EngineError, EngineErrorKind, EngineResult};
use super::statement::{Row, Rows, Statement};
use super::{BaseBackupRequest, DatabaseEngine, Endpoint};
use crate::config::EngineConfig;

/// Field separator for unaligned `psql` output (ASCII unit separator).
const FIELD_SEPARATOR: &str = "\u{1f}";

/// Text `psql` prints for SQL NULL.
const NULL_MARKER: &str = "\\N";

/// Engine reached through `pg_isready` / `psql` / `pg_basebackup`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    bin_dir: Option<PathBuf>,
    command_timeout: Duration,
    backup_timeout: Duration,
}

impl CommandEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            bin_dir: config.bin_dir.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            backup_timeout: Duration::from_secs(config.base_backup_timeout_secs),
        }
    }

    fn tool(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn command(&self, tool: &str, endpoint: &Endpoint) -> Command {
        let mut cmd = Command::new(self.tool(tool));
        cmd.arg("-h")
            .arg(&endpoint.host)
            .arg("-p")
            .arg(endpoint.port.to_string())
            .arg("-U")
            .arg(&endpoint.user)
            .env("PGCONNECT_TIMEOUT", self.command_timeout.as_secs().max(1).to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match &endpoint.password {
            Some(password) => {
                cmd.env("PGPASSWORD", password);
            }
            None => {
                cmd.env_remove("PGPASSWORD");
            }
        }
        cmd
    }

    async fn run(&self, mut cmd: Command, limit: Duration, what: &str) -> EngineResult<Output> {
        let child = cmd.output();
        match tokio::time::timeout(limit, child).await {
            Err(_) => Err(EngineError::timeout(format!(
                "{} did not finish within {:?}",
                what, limit
            ))),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(EngineError::new(
                EngineErrorKind::ToolMissing,
                format!("{}: {}", what, e),
            )),
            Ok(Err(e)) => Err(EngineError::new(
                EngineErrorKind::ToolMissing,
                format!("failed to launch {}: {}", what, e),
            )),
            Ok(Ok(output)) => Ok(output),
        }
    }
}

/// Map tool stderr onto an error kind, falling back to `default`.
pub(crate) fn classify_stderr(stderr: &str, default: EngineErrorKind) -> EngineErrorKind {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("password authentication failed")
        || lower.contains("no pg_hba.conf entry")
        || lower.contains("authentication failed")
    {
        EngineErrorKind::Authentication
    } else if lower.contains("already exists") {
        EngineErrorKind::AlreadyExists
    } else if lower.contains("is active for pid") {
        EngineErrorKind::ObjectInUse
    } else if lower.contains("could not connect")
        || lower.contains("connection refused")
        || lower.contains("timeout expired")
        || lower.contains("the database system is starting up")
        || lower.contains("the database system is shutting down")
        || lower.contains("server closed the connection")
    {
        EngineErrorKind::Unreachable
    } else if lower.contains("does not exist") {
        EngineErrorKind::NotFound
    } else {
        default
    }
}

/// Parse unaligned, tuples-only `psql` output.
pub(crate) fn parse_rows(stdout: &str) -> Rows {
    let rows: Vec<Row> = stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split(FIELD_SEPARATOR)
                .map(|field| {
                    if field == NULL_MARKER {
                        None
                    } else {
                        Some(field.to_string())
                    }
                })
                .collect()
        })
        .collect();
    Rows::new(rows)
}

fn failure(output: &Output, default: EngineErrorKind, what: &str) -> EngineError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let kind = classify_stderr(&stderr, default);
    EngineError::new(kind, format!("{} failed: {}", what, stderr.trim()))
}

#[async_trait]
impl DatabaseEngine for CommandEngine {
    async fn probe(&self, endpoint: &Endpoint) -> EngineResult<()> {
        let mut cmd = self.command("pg_isready", endpoint);
        cmd.arg("-d")
            .arg(&endpoint.database)
            .arg("-t")
            .arg(self.command_timeout.as_secs().max(1).to_string());

        let output = self.run(cmd, self.command_timeout, "pg_isready").await?;
        match output.status.code() {
            Some(0) => Ok(()),
            // 1: rejecting connections, 2: no response
            Some(1) | Some(2) => Err(EngineError::unreachable(format!(
                "{} is not accepting connections",
                endpoint
            ))),
            _ => Err(failure(&output, EngineErrorKind::QueryFailed, "pg_isready")),
        }
    }

    async fn execute(&self, endpoint: &Endpoint, statement: &Statement) -> EngineResult<Rows> {
        let sql = statement.to_sql()?;
        let mut cmd = self.command("psql", endpoint);
        cmd.arg("-d")
            .arg(&endpoint.database)
            .arg("-X")
            .arg("-w")
            .arg("-q")
            .arg("-A")
            .arg("-t")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-F")
            .arg(FIELD_SEPARATOR)
            .arg("-P")
            .arg(format!("null={}", NULL_MARKER))
            .arg("-c")
            .arg(&sql);

        let output = self.run(cmd, self.command_timeout, statement.name()).await?;
        match output.status.code() {
            Some(0) => Ok(parse_rows(&String::from_utf8_lossy(&output.stdout))),
            // psql exit code 2: the connection to the server went bad
            Some(2) => Err(failure(&output, EngineErrorKind::Unreachable, statement.name())),
            _ => Err(failure(&output, EngineErrorKind::QueryFailed, statement.name())),
        }
    }

    async fn base_backup(&self, request: &BaseBackupRequest) -> EngineResult<()> {
        let mut cmd = self.command("pg_basebackup", &request.source);
        cmd.arg("-w")
            .arg("-D")
            .arg(&request.target_dir)
            .arg("-S")
            .arg(&request.slot_name)
            .arg("-X")
            .arg("stream")
            .arg("-c")
            .arg("fast")
            .env("PGAPPNAME", &request.application_name);

        let output = self.run(cmd, self.backup_timeout, "pg_basebackup").await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(failure(&output, EngineErrorKind::BackupFailed, "pg_basebackup"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_authentication() {
        let stderr = "psql: error: connection to server at \"db0\" failed: FATAL:  password authentication failed for user \"replicator\"";
        assert_eq!(
            classify_stderr(stderr, EngineErrorKind::Unreachable),
            EngineErrorKind::Authentication
        );
    }

    #[test]
    fn test_classify_unreachable() {
        let stderr = "psql: error: connection to server at \"db0\" (10.0.0.1), port 5432 failed: Connection refused";
        assert_eq!(
            classify_stderr(stderr, EngineErrorKind::QueryFailed),
            EngineErrorKind::Unreachable
        );
    }

    #[test]
    fn test_classify_slot_errors() {
        assert_eq!(
            classify_stderr(
                "ERROR:  replication slot \"r1_slot\" already exists",
                EngineErrorKind::QueryFailed
            ),
            EngineErrorKind::AlreadyExists
        );
        assert_eq!(
            classify_stderr(
                "ERROR:  replication slot \"r1_slot\" is active for PID 4242",
                EngineErrorKind::QueryFailed
            ),
            EngineErrorKind::ObjectInUse
        );
        assert_eq!(
            classify_stderr(
                "ERROR:  replication slot \"r1_slot\" does not exist",
                EngineErrorKind::QueryFailed
            ),
            EngineErrorKind::NotFound
        );
    }

    #[test]
    fn test_classify_default() {
        assert_eq!(
            classify_stderr("ERROR:  syntax error", EngineErrorKind::QueryFailed),
            EngineErrorKind::QueryFailed
        );
    }

    #[test]
    fn test_parse_rows_with_null() {
        let out = "r1_slot\u{1f}physical\u{1f}t\u{1f}0/3000060\nr2_slot\u{1f}physical\u{1f}f\u{1f}\\N\n";
        let rows = parse_rows(out);
        assert_eq!(rows.len(), 2);
        let second: Vec<_> = rows.iter().nth(1).unwrap().clone();
        assert_eq!(second[0].as_deref(), Some("r2_slot"));
        assert_eq!(second[3], None);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_rows("").is_empty());
    }

    #[tokio::test]
    async fn test_missing_tool_is_reported() {
        let engine = CommandEngine::new(&EngineConfig {
            bin_dir: Some(PathBuf::from("/nonexistent/replctl-test-bin")),
            command_timeout_secs: 2,
            base_backup_timeout_secs: 2,
        });
        let creds = crate::config::Credentials {
            user: "u".into(),
            password: None,
            database: "postgres".into(),
        };
        let err = engine
            .probe(&Endpoint::new("localhost", 5432, &creds))
            .await
            .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::ToolMissing);
        assert!(!err.is_transient());
    }
}
