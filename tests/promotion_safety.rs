//! Promotion safety
//!
//! A replica is never promoted while the primary answers, unless forced;
//! denied and failed attempts leave the topology untouched; only one
//! promotion runs at a time.

mod common;

use std::time::Duration;

use common::{id, Cluster, PRIMARY};
use replctl::cancel::CancelToken;
use replctl::config::ReplicaConfig;
use replctl::error::{ControlError, ErrorClass};
use replctl::promotion::{DenialReason, PromotionOutcome, PromotionRequest};
use replctl::topology::{NodeState, Role};

#[tokio::test]
async fn test_refused_while_primary_alive() {
    let cluster = Cluster::streaming(&["replica_1", "replica_2"]).await;
    let before = cluster.controller.get_topology().await;

    let err = cluster
        .controller
        .promote(&id("replica_1"), false, &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REPL_STALE_PRIMARY_STILL_ALIVE");
    assert_eq!(err.class(), ErrorClass::PreconditionFailed);

    assert_eq!(cluster.controller.get_topology().await, before);
    assert!(!cluster.engine.is_in_recovery(&cluster.endpoint(PRIMARY)));
    assert!(cluster.engine.is_in_recovery(&cluster.endpoint("replica_1")));

    let explanation = cluster.controller.last_promotion().unwrap();
    assert_eq!(
        explanation.outcome,
        PromotionOutcome::Denied {
            reason: DenialReason::PrimaryStillAlive
        }
    );
    assert!(explanation.checks.iter().any(|c| !c.passed));
}

#[tokio::test]
async fn test_forced_promotion_demotes_live_primary() {
    let cluster = Cluster::streaming(&["replica_1", "replica_2"]).await;

    let report = cluster
        .controller
        .promote(&id("replica_1"), true, &CancelToken::new())
        .await
        .unwrap();
    assert!(report.explanation.force);
    assert!(report.explanation.checks.iter().all(|c| c.passed));

    let topology = cluster.controller.get_topology().await;
    assert_eq!(topology.primary, id("replica_1"));
    let old = topology.node(&id(PRIMARY)).unwrap();
    assert_eq!(old.role, Role::Replica);
    assert_eq!(old.state, NodeState::Unreachable);
    assert!(old.demoted_at.is_some());
    topology.check_invariants().unwrap();

    // Still writable, so health reports it as diverged; it never comes back
    // as a streaming replica on its own.
    cluster.poll(1).await;
    let topology = cluster.controller.get_topology().await;
    assert_eq!(topology.node(&id(PRIMARY)).unwrap().state, NodeState::Unreachable);
}

#[tokio::test]
async fn test_demoted_primary_decommissioned_after_grace() {
    let cluster = Cluster::with_config(&["replica_1"], |config| {
        config.promotion.decommission_grace_secs = 0;
    });
    cluster.start_all().await;

    cluster
        .controller
        .promote(&id("replica_1"), true, &CancelToken::new())
        .await
        .unwrap();
    cluster.engine.set_reachable(&cluster.endpoint(PRIMARY), false);
    cluster.poll(1).await;

    let topology = cluster.controller.get_topology().await;
    assert_eq!(
        topology.node(&id(PRIMARY)).unwrap().state,
        NodeState::Decommissioned
    );
    topology.check_invariants().unwrap();
}

#[tokio::test]
async fn test_unknown_candidate_denied() {
    let cluster = Cluster::streaming(&["replica_1"]).await;
    cluster.engine.set_reachable(&cluster.endpoint(PRIMARY), false);

    let err = cluster
        .controller
        .promote(&id("ghost"), false, &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REPL_INVALID_CANDIDATE");
}

#[tokio::test]
async fn test_primary_cannot_be_promoted() {
    let cluster = Cluster::streaming(&["replica_1"]).await;

    let err = cluster
        .controller
        .promote(&id(PRIMARY), true, &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REPL_INVALID_CANDIDATE");
    assert_eq!(cluster.controller.get_topology().await.primary, id(PRIMARY));
}

#[tokio::test]
async fn test_unbootstrapped_candidate_denied() {
    let cluster = Cluster::streaming(&["replica_1"]).await;
    cluster
        .controller
        .add_replica(ReplicaConfig::new(
            "replica_3",
            "replica_3",
            5432,
            cluster.data_dir("replica_3"),
        ))
        .await
        .unwrap();

    let err = cluster
        .controller
        .promote(&id("replica_3"), true, &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::PreconditionFailed);

    let explanation = cluster.controller.last_promotion().unwrap();
    assert_eq!(
        explanation.outcome,
        PromotionOutcome::Denied {
            reason: DenialReason::NotBootstrapped
        }
    );
}

#[tokio::test]
async fn test_unconfirmed_promotion_leaves_topology() {
    let cluster = Cluster::streaming(&["replica_1"]).await;
    let primary = cluster.endpoint(PRIMARY);
    cluster.engine.set_reachable(&primary, false);
    cluster.poll(2).await;
    cluster
        .engine
        .set_promote_failure(&cluster.endpoint("replica_1"), true);
    let before = cluster.controller.get_topology().await;

    let err = cluster
        .controller
        .promote(&id("replica_1"), false, &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REPL_PROMOTION_FAILED");
    assert_eq!(cluster.controller.get_topology().await, before);

    let explanation = cluster.controller.last_promotion().unwrap();
    assert!(matches!(explanation.outcome, PromotionOutcome::Failed { .. }));
    assert!(explanation.finished_at.is_some());
}

#[tokio::test]
async fn test_concurrent_promotion_rejected() {
    let cluster = Cluster::streaming(&["replica_1", "replica_2"]).await;
    cluster.engine.set_reachable(&cluster.endpoint(PRIMARY), false);
    cluster.poll(2).await;
    // Keeps the first attempt waiting for confirmation.
    cluster
        .engine
        .set_promote_failure(&cluster.endpoint("replica_1"), true);

    let cancel = CancelToken::new();
    let (first, second) = tokio::join!(
        cluster
            .controller
            .submit_promotion(PromotionRequest::new(id("replica_1")), &cancel),
        cluster
            .controller
            .submit_promotion(PromotionRequest::new(id("replica_2")), &cancel),
    );

    assert_eq!(first.unwrap_err().code(), "REPL_PROMOTION_FAILED");
    let second = second.unwrap_err();
    assert!(matches!(second, ControlError::PromotionInProgress));
    assert_eq!(second.class(), ErrorClass::ResourceConflict);
    assert_eq!(cluster.controller.get_topology().await.primary, id(PRIMARY));
}

#[tokio::test]
async fn test_promotion_rejected_while_bootstrap_runs() {
    let cluster = Cluster::with_config(&["replica_1", "replica_2"], |config| {
        config.bootstrap.primary_wait_interval_ms = 60_000;
        config.bootstrap.primary_wait_attempts = 10;
    });
    cluster.start_all().await;
    let before = cluster.controller.get_topology().await;

    // Keeps the bootstrap waiting for the primary to leave recovery.
    cluster.engine.set_in_recovery(&cluster.endpoint(PRIMARY), true);

    let stop_bootstrap = CancelToken::new();
    let replica_2 = id("replica_2");
    let bootstrap = cluster
        .controller
        .bootstrap_replica(&replica_2, &stop_bootstrap);
    let promotion = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = cluster
            .controller
            .submit_promotion(
                PromotionRequest::new(id("replica_1")).with_force(true),
                &CancelToken::new(),
            )
            .await;
        stop_bootstrap.cancel();
        result
    };
    let (bootstrap, promotion) = tokio::join!(bootstrap, promotion);

    let err = promotion.unwrap_err();
    assert!(matches!(err, ControlError::PromotionInProgress));
    assert_eq!(err.class(), ErrorClass::ResourceConflict);
    assert_eq!(bootstrap.unwrap_err().class(), ErrorClass::Cancelled);

    let after = cluster.controller.get_topology().await;
    assert_eq!(after.primary, before.primary);
    assert!(cluster.engine.is_in_recovery(&cluster.endpoint("replica_1")));
}

#[tokio::test]
async fn test_cancelled_request_has_no_effect() {
    let cluster = Cluster::streaming(&["replica_1"]).await;
    cluster.engine.set_reachable(&cluster.endpoint(PRIMARY), false);
    cluster.poll(2).await;
    let before = cluster.controller.get_topology().await;

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = cluster
        .controller
        .promote(&id("replica_1"), false, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Cancelled);
    assert_eq!(cluster.controller.get_topology().await, before);
    assert!(cluster.engine.is_in_recovery(&cluster.endpoint("replica_1")));
}
