//! Bootstrap resumption and idempotence
//!
//! A failed base backup leaves the replica restartable, the failure budget
//! survives a controller restart, and a finished replica is never copied
//! twice.

mod common;

use common::{id, Cluster, PRIMARY};
use replctl::bootstrap::{
    is_valid_standby, read_standby_config, BootstrapPhase, CheckpointStore, STANDBY_SIGNAL_FILE,
};
use replctl::cancel::CancelToken;
use replctl::error::ErrorClass;
use replctl::topology::NodeState;

#[tokio::test]
async fn test_fresh_bootstrap_writes_standby_config() {
    let cluster = Cluster::new(&["replica_1"]);

    let ready = cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &CancelToken::new())
        .await
        .unwrap();
    assert!(!ready.already_bootstrapped);
    assert_eq!(cluster.engine.base_backups_taken(), 1);

    let data_dir = cluster.data_dir("replica_1");
    assert!(is_valid_standby(&data_dir));
    let standby = read_standby_config(&data_dir).unwrap().unwrap();
    assert_eq!(standby.primary_slot_name, "replica_1_slot");
    assert!(standby.primary_conninfo.contains("application_name=replica_1"));

    let node = cluster
        .controller
        .get_topology()
        .await
        .node(&id("replica_1"))
        .unwrap()
        .clone();
    assert!(node.bootstrap_complete);
    assert_eq!(node.state, NodeState::Bootstrapping);
}

#[tokio::test]
async fn test_second_bootstrap_copies_nothing() {
    let cluster = Cluster::new(&["replica_1"]);
    let cancel = CancelToken::new();

    cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap();
    let again = cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap();

    assert!(again.already_bootstrapped);
    assert_eq!(cluster.engine.base_backups_taken(), 1);
}

#[tokio::test]
async fn test_replica_that_left_standby_is_rebuilt() {
    let cluster = Cluster::new(&["replica_1"]);
    let cancel = CancelToken::new();
    let data_dir = cluster.data_dir("replica_1");
    cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap();

    std::fs::remove_file(data_dir.join(STANDBY_SIGNAL_FILE)).unwrap();
    std::fs::write(data_dir.join("diverged_timeline"), b"x").unwrap();

    let ready = cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap();
    assert!(!ready.already_bootstrapped);
    assert_eq!(cluster.engine.base_backups_taken(), 2);
    assert!(!data_dir.join("diverged_timeline").exists());
    assert!(is_valid_standby(&data_dir));
}

#[tokio::test]
async fn test_failed_base_backup_resumes_from_clean_slate() {
    let cluster = Cluster::new(&["replica_1"]);
    let cancel = CancelToken::new();
    cluster.engine.fail_base_backups(1);

    let err = cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REPL_BASE_BACKUP_FAILED");
    assert_eq!(err.class(), ErrorClass::TransientNetwork);

    let topology = cluster.controller.get_topology().await;
    let node = topology.node(&id("replica_1")).unwrap();
    assert!(!node.bootstrap_complete);
    assert!(node.last_error.is_some());
    assert!(!is_valid_standby(&cluster.data_dir("replica_1")));

    let ready = cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap();
    assert!(!ready.already_bootstrapped);
    assert_eq!(cluster.engine.base_backups_taken(), 1);

    let topology = cluster.controller.get_topology().await;
    let node = topology.node(&id("replica_1")).unwrap();
    assert!(node.bootstrap_complete);
    assert!(node.last_error.is_none());

    let checkpoints = CheckpointStore::new(cluster.config.checkpoint_dir());
    let checkpoint = checkpoints.load(&id("replica_1")).unwrap().unwrap();
    assert_eq!(checkpoint.phase, BootstrapPhase::Ready);
    assert_eq!(checkpoint.failed_base_backups, 0);
}

#[tokio::test]
async fn test_failure_budget_survives_restart() {
    let cluster = Cluster::new(&["replica_1"]);
    let cancel = CancelToken::new();
    cluster.engine.fail_base_backups(2);

    let first = cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(first.code(), "REPL_BASE_BACKUP_FAILED");

    let restarted = cluster.reopen();
    let second = restarted
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(second.code(), "REPL_BOOTSTRAP_IRRECOVERABLE");
    assert_eq!(second.class(), ErrorClass::IrrecoverableState);

    // Healthy backups do not lift the verdict; the operator must.
    let third = restarted
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(third.code(), "REPL_BOOTSTRAP_IRRECOVERABLE");
    assert_eq!(cluster.engine.base_backups_taken(), 0);
}

#[tokio::test]
async fn test_unreachable_primary_exhausts_wait() {
    let cluster = Cluster::new(&["replica_1"]);
    cluster.engine.set_reachable(&cluster.endpoint(PRIMARY), false);

    let err = cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::TransientNetwork);
    assert_eq!(cluster.engine.base_backups_taken(), 0);
}

#[tokio::test]
async fn test_rejected_credentials_fail_fast() {
    let cluster = Cluster::new(&["replica_1"]);
    cluster.engine.set_auth_failure(&cluster.endpoint(PRIMARY), true);

    let err = cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &CancelToken::new())
        .await
        .unwrap_err();
    assert_ne!(err.class(), ErrorClass::TransientNetwork);
}

#[tokio::test]
async fn test_cancelled_bootstrap_stops_at_boundary() {
    let cluster = Cluster::new(&["replica_1"]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = cluster
        .controller
        .bootstrap_replica(&id("replica_1"), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Cancelled);
    assert_eq!(cluster.engine.base_backups_taken(), 0);
}

#[tokio::test]
async fn test_bootstrap_all_reports_per_replica() {
    let cluster = Cluster::new(&["replica_1", "replica_2"]);

    let results = cluster.controller.bootstrap_all(&CancelToken::new()).await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, result)| result.is_ok()));
    assert_eq!(cluster.engine.base_backups_taken(), 2);
}
