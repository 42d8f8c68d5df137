//! Replication slot management
//!
//! Slots live on the current primary. Creation is idempotent: asking for a
//! slot that already exists reports its state instead of failing, so a
//! re-run bootstrap never trips over its own slot.
//!
//! Calls for the same slot name are serialized through a per-name
//! critical section; calls for distinct names run independently.

mod errors;

pub use errors::{SlotError, SlotResult};

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::validate_slot_name;
use crate::engine::{parse_bool, DynEngine, EngineError, EngineErrorKind, Endpoint, Lsn, Row, Statement};
use crate::observability::Event;
use crate::topology::{ClusterTopology, SlotState};

const PHYSICAL: &str = "physical";

/// A slot as reported by the primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotRecord {
    pub name: String,
    pub kind: String,
    /// A consumer is attached
    pub active: bool,
    pub restart_lsn: Option<Lsn>,
}

impl SlotRecord {
    fn from_row(row: &Row) -> Result<Self, EngineError> {
        let column = |i: usize| row.get(i).and_then(|v| v.as_deref());
        let name = column(0)
            .ok_or_else(|| EngineError::protocol("slot row without name"))?
            .to_string();
        let kind = column(1).unwrap_or_default().to_string();
        let active = column(2)
            .and_then(parse_bool)
            .ok_or_else(|| EngineError::protocol(format!("slot {} without active flag", name)))?;
        let restart_lsn = column(3).map(str::parse::<Lsn>).transpose()?;
        Ok(Self {
            name,
            kind,
            active,
            restart_lsn,
        })
    }

    pub fn is_physical(&self) -> bool {
        self.kind == PHYSICAL
    }

    /// Topology state implied by this record.
    pub fn state(&self) -> SlotState {
        if self.active {
            SlotState::Active
        } else {
            SlotState::Created
        }
    }
}

/// State of `name` in a slot listing.
pub fn observed_state(records: &[SlotRecord], name: &str) -> SlotState {
    records
        .iter()
        .find(|r| r.name == name)
        .map(SlotRecord::state)
        .unwrap_or(SlotState::Absent)
}

/// Physical slots on the primary that no live replica is bound to.
///
/// These retain WAL indefinitely until reclaimed.
pub fn orphaned_slots(topology: &ClusterTopology, records: &[SlotRecord]) -> Vec<String> {
    let bound: BTreeSet<&str> = topology
        .replica_nodes()
        .filter_map(|n| n.slot_name.as_deref())
        .collect();
    records
        .iter()
        .filter(|r| r.is_physical() && !bound.contains(r.name.as_str()))
        .map(|r| r.name.clone())
        .collect()
}

/// Creates, inspects and drops physical replication slots.
pub struct ReplicationSlotManager {
    engine: DynEngine,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ReplicationSlotManager {
    pub fn new(engine: DynEngine) -> Self {
        Self {
            engine,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    /// Forget the critical section of `name` once nobody else holds it.
    ///
    /// Holders clone under the map lock, so the count cannot grow while
    /// it is checked.
    fn release_lock(&self, name: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(name);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Create physical slot `name` on `primary` unless it already exists.
    ///
    /// Returns `Created` for a fresh or idle slot, `Active` when a consumer
    /// is already streaming from it.
    pub async fn ensure_slot(&self, primary: &Endpoint, name: &str) -> SlotResult<SlotState> {
        validate_slot_name(name).map_err(|_| SlotError::InvalidName(name.to_string()))?;

        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        if let Some(state) = self.existing_state(primary, name).await? {
            tracing::debug!(event = %Event::SlotExists, slot = name, state = %state, primary = %primary, "slot already present");
            return Ok(state);
        }

        let create = Statement::CreatePhysicalSlot {
            name: name.to_string(),
        };
        match self.engine.execute(primary, &create).await {
            Ok(_) => {
                tracing::info!(event = %Event::SlotCreated, slot = name, primary = %primary, "replication slot created");
                Ok(SlotState::Created)
            }
            // Created behind our back between the listing and the create.
            Err(e) if e.kind == EngineErrorKind::AlreadyExists => self
                .existing_state(primary, name)
                .await?
                .ok_or_else(|| SlotError::Engine(e)),
            Err(e) => Err(e.into()),
        }
    }

    async fn existing_state(&self, primary: &Endpoint, name: &str) -> SlotResult<Option<SlotState>> {
        let records = self.list_slots(primary).await?;
        match records.into_iter().find(|r| r.name == name) {
            None => Ok(None),
            Some(record) if !record.is_physical() => Err(SlotError::WrongKind {
                name: record.name,
                kind: record.kind,
            }),
            Some(record) => Ok(Some(record.state())),
        }
    }

    /// Every slot on `primary` with its activity state.
    pub async fn list_slots(&self, primary: &Endpoint) -> SlotResult<Vec<SlotRecord>> {
        let rows = self.engine.execute(primary, &Statement::ListSlots).await?;
        rows.iter()
            .map(|row| SlotRecord::from_row(row).map_err(SlotError::from))
            .collect()
    }

    /// Drop slot `name` from `primary`.
    ///
    /// An actively consumed slot is refused with `SlotInUse` unless `force`
    /// is set, in which case its consumer is terminated first.
    pub async fn drop_slot(&self, primary: &Endpoint, name: &str, force: bool) -> SlotResult<()> {
        let lock = self.lock_for(name);
        let result = {
            let _guard = lock.lock().await;
            self.drop_locked(primary, name, force).await
        };
        self.release_lock(name, lock);
        result
    }

    async fn drop_locked(&self, primary: &Endpoint, name: &str, force: bool) -> SlotResult<()> {
        let records = self.list_slots(primary).await?;
        let record = records
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| SlotError::NotFound(name.to_string()))?;

        if record.active {
            if !force {
                return Err(SlotError::SlotInUse(name.to_string()));
            }
            let terminate = Statement::TerminateSlotConsumer {
                name: name.to_string(),
            };
            self.engine.execute(primary, &terminate).await?;
        }

        let drop = Statement::DropSlot {
            name: name.to_string(),
        };
        match self.engine.execute(primary, &drop).await {
            Ok(_) => {
                tracing::info!(event = %Event::SlotDropped, slot = name, primary = %primary, force, "replication slot dropped");
                Ok(())
            }
            Err(e) if e.kind == EngineErrorKind::ObjectInUse => {
                Err(SlotError::SlotInUse(name.to_string()))
            }
            Err(e) if e.kind == EngineErrorKind::NotFound => Err(SlotError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
