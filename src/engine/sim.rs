//! In-process model of a set of engine servers.
//!
//! Each server is keyed by its `host:port` address and tracks reachability,
//! recovery mode, its WAL position, its replication slots and (for
//! standbys) which upstream slot it consumes. Faults can be injected
//! (unreachable servers, rejected credentials, failing base backups,
//! failing promotion, failing slot listings) so the control plane can be exercised end to end.
//!
//! `start_standby` plays the part of the server start that follows a
//! bootstrap: it reads the standby configuration bootstrap wrote into the
//! data directory and attaches the standby to the slot named there.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::errors::{EngineError, EngineErrorKind, EngineResult};
use super::lsn::Lsn;
use super::statement::{Rows, Statement};
use super::{parse_conninfo, BaseBackupRequest, DatabaseEngine, Endpoint};
use crate::bootstrap::{read_standby_config, STANDBY_SIGNAL_FILE};

/// Starting WAL position of a fresh primary.
const INITIAL_LSN: Lsn = Lsn(0x0300_0060);

#[derive(Debug, Clone)]
struct SimSlot {
    consumer: Option<String>,
    restart_lsn: Lsn,
}

#[derive(Debug, Clone)]
struct Upstream {
    address: String,
    slot: String,
}

#[derive(Debug, Clone)]
struct SimServer {
    reachable: bool,
    reject_auth: bool,
    in_recovery: bool,
    lsn: Lsn,
    slots: BTreeMap<String, SimSlot>,
    upstream: Option<Upstream>,
    conf: BTreeMap<String, String>,
    promote_fails: bool,
    listing_fails: bool,
}

impl SimServer {
    fn offline() -> Self {
        Self {
            reachable: false,
            reject_auth: false,
            in_recovery: false,
            lsn: Lsn::ZERO,
            slots: BTreeMap::new(),
            upstream: None,
            conf: BTreeMap::new(),
            promote_fails: false,
            listing_fails: false,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    servers: HashMap<String, SimServer>,
    failing_backups: u32,
    backups_taken: u32,
}

impl SimState {
    fn server(&self, address: &str) -> EngineResult<&SimServer> {
        self.servers
            .get(address)
            .ok_or_else(|| EngineError::unreachable(format!("could not connect to {}", address)))
    }

    fn server_mut(&mut self, address: &str) -> EngineResult<&mut SimServer> {
        self.servers
            .get_mut(address)
            .ok_or_else(|| EngineError::unreachable(format!("could not connect to {}", address)))
    }

    /// Reachability and credential check performed by every session.
    fn connect(&self, address: &str) -> EngineResult<()> {
        let server = self.server(address)?;
        if !server.reachable {
            return Err(EngineError::unreachable(format!(
                "could not connect to {}: Connection refused",
                address
            )));
        }
        if server.reject_auth {
            return Err(EngineError::authentication(format!(
                "password authentication failed at {}",
                address
            )));
        }
        Ok(())
    }

    fn release_consumer(&mut self, upstream: &Upstream) {
        if let Some(slot) = self
            .servers
            .get_mut(&upstream.address)
            .and_then(|s| s.slots.get_mut(&upstream.slot))
        {
            slot.consumer = None;
        }
    }

    /// Attach `standby` to `upstream`, consuming its slot when available.
    fn attach(&mut self, standby: &str, upstream: Upstream) {
        let mut caught_up = None;
        if let Some(server) = self.servers.get_mut(&upstream.address) {
            if server.reachable {
                if let Some(slot) = server.slots.get_mut(&upstream.slot) {
                    slot.consumer = Some(standby.to_string());
                    caught_up = Some(server.lsn);
                }
            }
        }
        if let Some(server) = self.servers.get_mut(standby) {
            if let Some(lsn) = caught_up {
                server.lsn = lsn;
            }
            server.upstream = Some(upstream);
        }
    }
}

/// Simulated engine; see module docs.
#[derive(Debug, Default)]
pub struct SimulatedEngine {
    state: Mutex<SimState>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a running primary.
    pub fn add_primary(&self, endpoint: &Endpoint) {
        let mut server = SimServer::offline();
        server.reachable = true;
        server.lsn = INITIAL_LSN;
        self.lock().servers.insert(endpoint.address(), server);
    }

    /// Register a host with no running server yet (a fresh replica).
    pub fn add_server(&self, endpoint: &Endpoint) {
        self.lock()
            .servers
            .entry(endpoint.address())
            .or_insert_with(SimServer::offline);
    }

    pub fn set_reachable(&self, endpoint: &Endpoint, reachable: bool) {
        if let Some(server) = self.lock().servers.get_mut(&endpoint.address()) {
            server.reachable = reachable;
        }
    }

    pub fn set_auth_failure(&self, endpoint: &Endpoint, reject: bool) {
        if let Some(server) = self.lock().servers.get_mut(&endpoint.address()) {
            server.reject_auth = reject;
        }
    }

    pub fn set_promote_failure(&self, endpoint: &Endpoint, fail: bool) {
        if let Some(server) = self.lock().servers.get_mut(&endpoint.address()) {
            server.promote_fails = fail;
        }
    }

    /// Put a server in or out of recovery, as during crash recovery after a
    /// restart.
    pub fn set_in_recovery(&self, endpoint: &Endpoint, in_recovery: bool) {
        if let Some(server) = self.lock().servers.get_mut(&endpoint.address()) {
            server.in_recovery = in_recovery;
        }
    }

    /// Make slot listings on `endpoint` time out while other queries succeed.
    pub fn set_slot_listing_failure(&self, endpoint: &Endpoint, fail: bool) {
        if let Some(server) = self.lock().servers.get_mut(&endpoint.address()) {
            server.listing_fails = fail;
        }
    }

    /// Make the next `count` base backups fail midway.
    pub fn fail_base_backups(&self, count: u32) {
        self.lock().failing_backups = count;
    }

    /// Number of successful base backups taken so far.
    pub fn base_backups_taken(&self) -> u32 {
        self.lock().backups_taken
    }

    /// Simulate writes on a primary.
    pub fn advance_wal(&self, endpoint: &Endpoint, bytes: u64) {
        if let Some(server) = self.lock().servers.get_mut(&endpoint.address()) {
            server.lsn = server.lsn.advance(bytes);
        }
    }

    /// Bring a standby's replay position level with its upstream.
    pub fn catch_up(&self, endpoint: &Endpoint) {
        let mut state = self.lock();
        let upstream_lsn = state
            .servers
            .get(&endpoint.address())
            .and_then(|s| s.upstream.as_ref())
            .and_then(|u| state.servers.get(&u.address))
            .map(|u| u.lsn);
        if let (Some(lsn), Some(server)) = (upstream_lsn, state.servers.get_mut(&endpoint.address())) {
            server.lsn = lsn;
        }
    }

    /// Start a server from a bootstrapped data directory as a standby.
    pub fn start_standby(&self, endpoint: &Endpoint, data_dir: &Path) -> EngineResult<()> {
        if !data_dir.join(STANDBY_SIGNAL_FILE).exists() {
            return Err(EngineError::new(
                EngineErrorKind::QueryFailed,
                format!("{} is not a standby data directory", data_dir.display()),
            ));
        }
        let standby = read_standby_config(data_dir)
            .map_err(|e| EngineError::protocol(e.to_string()))?
            .ok_or_else(|| EngineError::protocol("standby configuration missing"))?;
        let params = parse_conninfo(&standby.primary_conninfo);
        let host = params
            .get("host")
            .ok_or_else(|| EngineError::protocol("primary_conninfo without host"))?;
        let port = params.get("port").map(String::as_str).unwrap_or("5432");
        let upstream = Upstream {
            address: format!("{}:{}", host, port),
            slot: standby.primary_slot_name.clone(),
        };

        let mut state = self.lock();
        let address = endpoint.address();
        let server = state.servers.entry(address.clone()).or_insert_with(SimServer::offline);
        server.reachable = true;
        server.in_recovery = true;
        state.attach(&address, upstream);
        Ok(())
    }

    pub fn slot_names(&self, endpoint: &Endpoint) -> Vec<String> {
        self.lock()
            .servers
            .get(&endpoint.address())
            .map(|s| s.slots.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Address of the standby consuming `slot` on `endpoint`, if any.
    pub fn slot_consumer(&self, endpoint: &Endpoint, slot: &str) -> Option<String> {
        self.lock()
            .servers
            .get(&endpoint.address())
            .and_then(|s| s.slots.get(slot))
            .and_then(|s| s.consumer.clone())
    }

    /// `(upstream address, slot)` a standby streams from.
    pub fn upstream_of(&self, endpoint: &Endpoint) -> Option<(String, String)> {
        self.lock()
            .servers
            .get(&endpoint.address())
            .and_then(|s| s.upstream.as_ref())
            .map(|u| (u.address.clone(), u.slot.clone()))
    }

    pub fn is_in_recovery(&self, endpoint: &Endpoint) -> bool {
        self.lock()
            .servers
            .get(&endpoint.address())
            .map(|s| s.in_recovery)
            .unwrap_or(false)
    }

    /// Value last written with `ALTER SYSTEM`.
    pub fn conf_value(&self, endpoint: &Endpoint, parameter: &str) -> Option<String> {
        self.lock()
            .servers
            .get(&endpoint.address())
            .and_then(|s| s.conf.get(parameter).cloned())
    }

    fn apply(&self, address: &str, statement: &Statement) -> EngineResult<Rows> {
        let mut state = self.lock();
        state.connect(address)?;

        match statement {
            Statement::ListSlots => {
                let server = state.server(address)?;
                if server.listing_fails {
                    return Err(EngineError::timeout(format!(
                        "canceling statement due to statement timeout on {}",
                        address
                    )));
                }
                let rows = server
                    .slots
                    .iter()
                    .map(|(name, slot)| {
                        vec![
                            Some(name.clone()),
                            Some("physical".to_string()),
                            Some(if slot.consumer.is_some() { "t" } else { "f" }.to_string()),
                            Some(slot.restart_lsn.to_string()),
                        ]
                    })
                    .collect();
                Ok(Rows::new(rows))
            }
            Statement::CreatePhysicalSlot { name } => {
                let server = state.server_mut(address)?;
                if server.slots.contains_key(name) {
                    return Err(EngineError::new(
                        EngineErrorKind::AlreadyExists,
                        format!("replication slot \"{}\" already exists", name),
                    ));
                }
                let restart_lsn = server.lsn;
                server.slots.insert(
                    name.clone(),
                    SimSlot {
                        consumer: None,
                        restart_lsn,
                    },
                );
                Ok(Rows::single(Some(name.clone())))
            }
            Statement::DropSlot { name } => {
                let server = state.server_mut(address)?;
                let in_use = server.slots.get(name).map(|slot| slot.consumer.is_some());
                match in_use {
                    None => Err(EngineError::new(
                        EngineErrorKind::NotFound,
                        format!("replication slot \"{}\" does not exist", name),
                    )),
                    Some(true) => Err(EngineError::new(
                        EngineErrorKind::ObjectInUse,
                        format!("replication slot \"{}\" is active for PID 4242", name),
                    )),
                    Some(false) => {
                        server.slots.remove(name);
                        Ok(Rows::single(Some(String::new())))
                    }
                }
            }
            Statement::TerminateSlotConsumer { name } => {
                let server = state.server_mut(address)?;
                let consumer = server.slots.get_mut(name).and_then(|s| s.consumer.take());
                match consumer {
                    Some(_) => Ok(Rows::single(Some("t".to_string()))),
                    None => Ok(Rows::empty()),
                }
            }
            Statement::IsInRecovery => {
                let server = state.server(address)?;
                Ok(Rows::single(Some(
                    if server.in_recovery { "t" } else { "f" }.to_string(),
                )))
            }
            Statement::CurrentWalLsn => {
                let server = state.server(address)?;
                if server.in_recovery {
                    return Err(EngineError::new(
                        EngineErrorKind::QueryFailed,
                        "recovery is in progress",
                    ));
                }
                Ok(Rows::single(Some(server.lsn.to_string())))
            }
            Statement::LastReplayLsn => {
                let server = state.server(address)?;
                if server.in_recovery {
                    Ok(Rows::single(Some(server.lsn.to_string())))
                } else {
                    Ok(Rows::single(None))
                }
            }
            Statement::Promote { .. } => {
                let server = state.server_mut(address)?;
                if !server.in_recovery {
                    return Err(EngineError::new(
                        EngineErrorKind::QueryFailed,
                        "recovery is not in progress",
                    ));
                }
                if server.promote_fails {
                    return Ok(Rows::single(Some("f".to_string())));
                }
                server.in_recovery = false;
                let upstream = server.upstream.take();
                if let Some(upstream) = upstream {
                    state.release_consumer(&upstream);
                }
                Ok(Rows::single(Some("t".to_string())))
            }
            Statement::AlterSystem { parameter, value } => {
                statement.to_sql()?;
                let server = state.server_mut(address)?;
                server.conf.insert(parameter.clone(), value.clone());
                Ok(Rows::empty())
            }
            Statement::ReloadConf => {
                let server = state.server(address)?;
                let target = match (
                    server.in_recovery,
                    server.conf.get("primary_conninfo"),
                    server.conf.get("primary_slot_name"),
                ) {
                    (true, Some(conninfo), Some(slot)) => {
                        let params = parse_conninfo(conninfo);
                        params.get("host").map(|host| Upstream {
                            address: format!(
                                "{}:{}",
                                host,
                                params.get("port").map(String::as_str).unwrap_or("5432")
                            ),
                            slot: slot.clone(),
                        })
                    }
                    _ => None,
                };
                if let Some(target) = target {
                    let previous = state.server_mut(address)?.upstream.take();
                    if let Some(previous) = previous {
                        state.release_consumer(&previous);
                    }
                    state.attach(address, target);
                }
                Ok(Rows::single(Some("t".to_string())))
            }
        }
    }
}

#[async_trait]
impl DatabaseEngine for SimulatedEngine {
    async fn probe(&self, endpoint: &Endpoint) -> EngineResult<()> {
        let state = self.lock();
        let server = state.server(&endpoint.address())?;
        if server.reachable {
            Ok(())
        } else {
            Err(EngineError::unreachable(format!(
                "{} is not accepting connections",
                endpoint
            )))
        }
    }

    async fn execute(&self, endpoint: &Endpoint, statement: &Statement) -> EngineResult<Rows> {
        self.apply(&endpoint.address(), statement)
    }

    async fn base_backup(&self, request: &BaseBackupRequest) -> EngineResult<()> {
        let target = &request.target_dir;
        if dir_has_entries(target).await {
            return Err(EngineError::new(
                EngineErrorKind::BackupFailed,
                format!("directory \"{}\" exists but is not empty", target.display()),
            ));
        }

        let fail_midway = {
            let mut state = self.lock();
            let address = request.source.address();
            state.connect(&address)?;
            let server = state.server_mut(&address)?;
            let lsn = server.lsn;
            let slot = server.slots.get_mut(&request.slot_name).ok_or_else(|| {
                EngineError::new(
                    EngineErrorKind::NotFound,
                    format!("replication slot \"{}\" does not exist", request.slot_name),
                )
            })?;
            slot.restart_lsn = lsn;

            if state.failing_backups > 0 {
                state.failing_backups -= 1;
                true
            } else {
                state.backups_taken += 1;
                false
            }
        };

        let io_err = |e: std::io::Error| EngineError::new(EngineErrorKind::BackupFailed, e.to_string());
        tokio::fs::create_dir_all(target.join("base")).await.map_err(io_err)?;

        if fail_midway {
            tokio::fs::write(target.join("base").join("partial"), b"partial")
                .await
                .map_err(io_err)?;
            return Err(EngineError::new(
                EngineErrorKind::BackupFailed,
                "could not receive data from WAL stream: server closed the connection unexpectedly",
            ));
        }

        tokio::fs::write(target.join("PG_VERSION"), b"16\n").await.map_err(io_err)?;
        tokio::fs::write(target.join("postgresql.conf"), b"# copied from primary\n")
            .await
            .map_err(io_err)?;
        Ok(())
    }
}

async fn dir_has_entries(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    fn ep(host: &str) -> Endpoint {
        Endpoint::new(
            host,
            5432,
            &Credentials {
                user: "replicator".into(),
                password: Some("pw".into()),
                database: "postgres".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_unknown_server_is_unreachable() {
        let engine = SimulatedEngine::new();
        let err = engine.probe(&ep("nowhere")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_slot_lifecycle() {
        let engine = SimulatedEngine::new();
        let primary = ep("db0");
        engine.add_primary(&primary);

        let create = Statement::CreatePhysicalSlot { name: "s1".into() };
        engine.execute(&primary, &create).await.unwrap();
        let dup = engine.execute(&primary, &create).await.unwrap_err();
        assert_eq!(dup.kind, EngineErrorKind::AlreadyExists);

        let rows = engine.execute(&primary, &Statement::ListSlots).await.unwrap();
        assert_eq!(rows.len(), 1);

        engine
            .execute(&primary, &Statement::DropSlot { name: "s1".into() })
            .await
            .unwrap();
        assert!(engine.slot_names(&primary).is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_is_permanent() {
        let engine = SimulatedEngine::new();
        let primary = ep("db0");
        engine.add_primary(&primary);
        engine.set_auth_failure(&primary, true);

        let err = engine
            .execute(&primary, &Statement::IsInRecovery)
            .await
            .unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Authentication);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_primary_has_no_replay_lsn() {
        let engine = SimulatedEngine::new();
        let primary = ep("db0");
        engine.add_primary(&primary);

        let rows = engine.execute(&primary, &Statement::LastReplayLsn).await.unwrap();
        assert_eq!(rows.scalar().unwrap(), None);
        let rows = engine.execute(&primary, &Statement::CurrentWalLsn).await.unwrap();
        assert_eq!(rows.scalar().unwrap(), Some(INITIAL_LSN.to_string().as_str()));
    }
}
