//! Replica bootstrap executor
//!
//! Drives one replica through:
//! 1. wait for the primary (bounded fixed-backoff retry)
//! 2. idempotency check: a valid standby is already Ready
//! 3. clean slate: wipe a data directory that is not a valid standby
//! 4. base backup bound to the replica's pre-created slot
//! 5. standby configuration, marker written last
//!
//! Every phase boundary is persisted as a checkpoint and is the only place
//! cancellation takes effect. Steps within one replica never overlap.

use std::path::PathBuf;

use serde::Serialize;

use super::checkpoint::{BootstrapCheckpoint, BootstrapPhase, CheckpointStore};
use super::errors::{BootstrapError, BootstrapResult};
use super::standby::{self, StandbyConfig};
use crate::cancel::CancelToken;
use crate::config::BootstrapConfig;
use crate::engine::{BaseBackupRequest, DynEngine, EngineError, EngineErrorKind, Endpoint, Statement};
use crate::observability::Event;
use crate::retry::{retry, RetryError};
use crate::topology::NodeId;

/// Everything needed to bootstrap one replica.
#[derive(Debug, Clone)]
pub struct BootstrapTarget {
    pub node_id: NodeId,
    pub data_dir: PathBuf,
    pub slot_name: String,
    pub application_name: String,
    /// Primary the base backup is taken from and the standby streams from
    pub primary: Endpoint,
}

/// Successful bootstrap outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ready {
    pub node_id: NodeId,
    /// The data directory already was a valid standby; nothing was copied
    pub already_bootstrapped: bool,
}

/// Runs the bootstrap protocol against the engine.
pub struct BootstrapExecutor {
    engine: DynEngine,
    config: BootstrapConfig,
    checkpoints: CheckpointStore,
}

impl BootstrapExecutor {
    pub fn new(engine: DynEngine, config: BootstrapConfig, checkpoints: CheckpointStore) -> Self {
        Self {
            engine,
            config,
            checkpoints,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub async fn bootstrap(
        &self,
        target: &BootstrapTarget,
        cancel: &CancelToken,
    ) -> BootstrapResult<Ready> {
        let node = &target.node_id;
        let mut checkpoint = self
            .checkpoints
            .load(node)?
            .unwrap_or_else(|| BootstrapCheckpoint::new(node.clone()));

        tracing::info!(
            event = %Event::BootstrapStart,
            node = %node,
            primary = %target.primary,
            slot = %target.slot_name,
            resume_from = checkpoint.phase.as_str(),
            "bootstrap started"
        );

        if checkpoint.failed_base_backups >= self.config.max_base_backup_attempts {
            return Err(BootstrapError::Irrecoverable {
                node: node.to_string(),
                attempts: checkpoint.failed_base_backups,
                last: checkpoint.last_error.clone().unwrap_or_default(),
            });
        }

        // 1. Wait for primary
        self.boundary(cancel, BootstrapPhase::WaitingForPrimary)?;
        self.wait_for_primary(target, cancel).await?;
        self.advance(&mut checkpoint, BootstrapPhase::PrimaryReachable)?;

        // 2. Idempotency check
        self.boundary(cancel, BootstrapPhase::PrimaryReachable)?;
        if standby::is_valid_standby(&target.data_dir) {
            self.advance(&mut checkpoint, BootstrapPhase::Ready)?;
            tracing::info!(
                event = %Event::BootstrapAlreadyReady,
                node = %node,
                data_dir = %target.data_dir.display(),
                "replica already a valid standby"
            );
            return Ok(Ready {
                node_id: node.clone(),
                already_bootstrapped: true,
            });
        }

        // 3. Clean slate, unless the last run stopped right after its copy.
        // A Ready checkpoint over a directory that is no longer a standby is
        // diverged data and is wiped like any other.
        let copy_in_place = matches!(
            checkpoint.phase,
            BootstrapPhase::BaseBackupComplete | BootstrapPhase::StandbyConfigured
        ) && target.data_dir.join(standby::VERSION_FILE).is_file();
        if !copy_in_place {
            self.boundary(cancel, BootstrapPhase::CleanSlate)?;
            if standby::has_entries(&target.data_dir)? {
                tracing::warn!(
                    event = %Event::BootstrapCleanSlate,
                    node = %node,
                    data_dir = %target.data_dir.display(),
                    "wiping data directory that is not a valid standby"
                );
            }
            standby::wipe_data_dir(&target.data_dir)?;
            checkpoint.phase = BootstrapPhase::CleanSlate;
            self.checkpoints.save(&mut checkpoint)?;

            // 4. Base backup
            self.boundary(cancel, BootstrapPhase::BaseBackupComplete)?;
            self.base_backup(target, &mut checkpoint).await?;
            self.advance(&mut checkpoint, BootstrapPhase::BaseBackupComplete)?;
        }

        // 5. Standby configuration
        self.boundary(cancel, BootstrapPhase::StandbyConfigured)?;
        let config = StandbyConfig {
            primary_conninfo: target.primary.conninfo(&target.application_name),
            primary_slot_name: target.slot_name.clone(),
        };
        standby::write_standby_config(&target.data_dir, &config)?;
        self.advance(&mut checkpoint, BootstrapPhase::StandbyConfigured)?;

        // 6. Ready
        checkpoint.failed_base_backups = 0;
        checkpoint.last_error = None;
        self.advance(&mut checkpoint, BootstrapPhase::Ready)?;
        tracing::info!(event = %Event::BootstrapComplete, node = %node, "bootstrap complete");

        Ok(Ready {
            node_id: node.clone(),
            already_bootstrapped: false,
        })
    }

    fn boundary(&self, cancel: &CancelToken, next: BootstrapPhase) -> BootstrapResult<()> {
        if cancel.is_cancelled() {
            return Err(BootstrapError::Cancelled { phase: next });
        }
        Ok(())
    }

    fn advance(&self, checkpoint: &mut BootstrapCheckpoint, phase: BootstrapPhase) -> BootstrapResult<()> {
        if phase > checkpoint.phase || phase == BootstrapPhase::Ready {
            checkpoint.phase = phase;
        }
        self.checkpoints.save(checkpoint)?;
        tracing::debug!(
            event = %Event::BootstrapCheckpoint,
            node = %checkpoint.node_id,
            phase = checkpoint.phase.as_str(),
            "bootstrap checkpoint persisted"
        );
        Ok(())
    }

    /// Poll the primary until it accepts an authenticated session outside
    /// recovery. Authentication failures end the wait immediately.
    async fn wait_for_primary(&self, target: &BootstrapTarget, cancel: &CancelToken) -> BootstrapResult<()> {
        let engine = &self.engine;
        let primary = &target.primary;
        let node = &target.node_id;
        let policy = self.config.primary_wait_policy();

        let outcome = retry(&policy, cancel, EngineError::is_transient, |attempt| async move {
            if attempt > 1 {
                tracing::debug!(
                    event = %Event::BootstrapWaitPrimary,
                    node = %node,
                    primary = %primary,
                    attempt,
                    "waiting for primary"
                );
            }
            engine.probe(primary).await?;
            let in_recovery = engine
                .execute(primary, &Statement::IsInRecovery)
                .await?
                .scalar_bool()?;
            if in_recovery {
                return Err(EngineError::unreachable(format!(
                    "{} is still in recovery",
                    primary
                )));
            }
            Ok::<(), EngineError>(())
        })
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(RetryError::Exhausted { attempts, last }) => Err(BootstrapError::PrimaryUnreachable {
                attempts,
                last: last.message,
            }),
            Err(RetryError::Permanent(e)) => Err(BootstrapError::Engine(e)),
            Err(RetryError::Cancelled { .. }) => Err(BootstrapError::Cancelled {
                phase: BootstrapPhase::PrimaryReachable,
            }),
        }
    }

    async fn base_backup(
        &self,
        target: &BootstrapTarget,
        checkpoint: &mut BootstrapCheckpoint,
    ) -> BootstrapResult<()> {
        let request = BaseBackupRequest {
            source: target.primary.clone(),
            target_dir: target.data_dir.clone(),
            slot_name: target.slot_name.clone(),
            application_name: target.application_name.clone(),
        };

        let error = match self.engine.base_backup(&request).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        // Configuration problems are not the data's fault and do not
        // consume the attempt budget.
        if matches!(
            error.kind,
            EngineErrorKind::Authentication | EngineErrorKind::ToolMissing | EngineErrorKind::NotFound
        ) {
            tracing::error!(event = %Event::BootstrapFailed, node = %target.node_id, error = %error, "base backup rejected");
            return Err(BootstrapError::Engine(error));
        }

        checkpoint.failed_base_backups += 1;
        checkpoint.last_error = Some(error.message.clone());
        self.checkpoints.save(checkpoint)?;

        let attempts = checkpoint.failed_base_backups;
        tracing::error!(
            event = %Event::BootstrapFailed,
            node = %target.node_id,
            attempt = attempts,
            error = %error,
            "base backup failed"
        );

        if attempts >= self.config.max_base_backup_attempts {
            Err(BootstrapError::Irrecoverable {
                node: target.node_id.to_string(),
                attempts,
                last: error.message,
            })
        } else {
            Err(BootstrapError::BaseBackupFailed {
                attempt: attempts,
                source: error,
            })
        }
    }
}
