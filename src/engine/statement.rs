//! Statement vocabulary for slot management and status queries.
//!
//! The control plane only ever issues these statements. Adapters render
//! them to SQL with `to_sql`; the simulated engine interprets them directly.

use super::errors::{EngineError, EngineResult};

/// One row of a result set. `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

/// Statements the control plane issues against an engine server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// All replication slots with their activity state
    ListSlots,
    /// Create a physical slot reserving WAL immediately
    CreatePhysicalSlot { name: String },
    /// Drop a slot
    DropSlot { name: String },
    /// Terminate the walsender currently consuming a slot
    TerminateSlotConsumer { name: String },
    /// Whether the server is replaying WAL (standby)
    IsInRecovery,
    /// Current write position (primary only)
    CurrentWalLsn,
    /// Last replayed position (standby only; NULL on a primary)
    LastReplayLsn,
    /// End recovery, waiting up to `wait_secs`
    Promote { wait_secs: u32 },
    /// Persist a server parameter
    AlterSystem { parameter: String, value: String },
    /// Reload server configuration
    ReloadConf,
}

impl Statement {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Statement::ListSlots => "list_slots",
            Statement::CreatePhysicalSlot { .. } => "create_physical_slot",
            Statement::DropSlot { .. } => "drop_slot",
            Statement::TerminateSlotConsumer { .. } => "terminate_slot_consumer",
            Statement::IsInRecovery => "is_in_recovery",
            Statement::CurrentWalLsn => "current_wal_lsn",
            Statement::LastReplayLsn => "last_replay_lsn",
            Statement::Promote { .. } => "promote",
            Statement::AlterSystem { .. } => "alter_system",
            Statement::ReloadConf => "reload_conf",
        }
    }

    /// Render to SQL.
    pub fn to_sql(&self) -> EngineResult<String> {
        Ok(match self {
            Statement::ListSlots => {
                "SELECT slot_name, slot_type, active, restart_lsn FROM pg_replication_slots ORDER BY slot_name"
                    .to_string()
            }
            Statement::CreatePhysicalSlot { name } => format!(
                "SELECT slot_name FROM pg_create_physical_replication_slot({}, true)",
                quote_literal(name)
            ),
            Statement::DropSlot { name } => {
                format!("SELECT pg_drop_replication_slot({})", quote_literal(name))
            }
            Statement::TerminateSlotConsumer { name } => format!(
                "SELECT pg_terminate_backend(active_pid) FROM pg_replication_slots \
                 WHERE slot_name = {} AND active_pid IS NOT NULL",
                quote_literal(name)
            ),
            Statement::IsInRecovery => "SELECT pg_is_in_recovery()".to_string(),
            Statement::CurrentWalLsn => "SELECT pg_current_wal_lsn()".to_string(),
            Statement::LastReplayLsn => "SELECT pg_last_wal_replay_lsn()".to_string(),
            Statement::Promote { wait_secs } => format!("SELECT pg_promote(true, {})", wait_secs),
            Statement::AlterSystem { parameter, value } => {
                if !is_identifier(parameter) {
                    return Err(EngineError::protocol(format!(
                        "invalid parameter name: {}",
                        parameter
                    )));
                }
                format!("ALTER SYSTEM SET {} = {}", parameter, quote_literal(value))
            }
            Statement::ReloadConf => "SELECT pg_reload_conf()".to_string(),
        })
    }
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Parse the engine's boolean text form.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "t" | "true" | "on" => Some(true),
        "f" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Result set of a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rows {
    rows: Vec<Row>,
}

impl Rows {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A single-row, single-column result.
    pub fn single(value: Option<String>) -> Self {
        Self {
            rows: vec![vec![value]],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    /// First column of the first row.
    pub fn scalar(&self) -> EngineResult<Option<&str>> {
        self.rows
            .first()
            .and_then(|row| row.first())
            .map(|value| value.as_deref())
            .ok_or_else(|| EngineError::protocol("expected a single-value result, got no rows"))
    }

    /// First column of the first row as a boolean.
    pub fn scalar_bool(&self) -> EngineResult<bool> {
        let value = self
            .scalar()?
            .ok_or_else(|| EngineError::protocol("expected boolean, got NULL"))?;
        parse_bool(value)
            .ok_or_else(|| EngineError::protocol(format!("expected boolean, got '{}'", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("abc"), "'abc'");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn test_create_slot_sql() {
        let sql = Statement::CreatePhysicalSlot {
            name: "replica_1_slot".into(),
        }
        .to_sql()
        .unwrap();
        assert_eq!(
            sql,
            "SELECT slot_name FROM pg_create_physical_replication_slot('replica_1_slot', true)"
        );
    }

    #[test]
    fn test_alter_system_rejects_bad_parameter() {
        let stmt = Statement::AlterSystem {
            parameter: "primary_conninfo; DROP".into(),
            value: "x".into(),
        };
        assert!(stmt.to_sql().is_err());
    }

    #[test]
    fn test_alter_system_quotes_value() {
        let sql = Statement::AlterSystem {
            parameter: "primary_conninfo".into(),
            value: "host=db1 password='p'".into(),
        }
        .to_sql()
        .unwrap();
        assert_eq!(
            sql,
            "ALTER SYSTEM SET primary_conninfo = 'host=db1 password=''p'''"
        );
    }

    #[test]
    fn test_scalar_bool() {
        assert!(Rows::single(Some("t".into())).scalar_bool().unwrap());
        assert!(!Rows::single(Some("f".into())).scalar_bool().unwrap());
        assert!(Rows::single(None).scalar_bool().is_err());
        assert!(Rows::empty().scalar_bool().is_err());
    }
}
