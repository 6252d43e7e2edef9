//! Reject, withdraw, reclaim, delegation, jump and node insertion.

use serde_json::json;
use uuid::Uuid;

use db::models::{TaskState, TaskType};
use model::{InsertPosition, ModelError, NodeAssignee, NodeKind, NodeModel, PerformType, Variables};

use crate::test_support::{actor, approval, creator, process, single, Harness};
use crate::EngineError;

fn three_steps() -> model::ProcessModel {
    process("steps", vec![single("a", "u1"), single("b", "u2"), single("c", "u3")])
}

/// Latest archived task at `key`.
async fn his_id(h: &Harness, instance_id: Uuid, key: &str) -> Uuid {
    h.engine
        .his_tasks(instance_id)
        .await
        .expect("history")
        .into_iter()
        .filter(|t| t.task.task_key == key)
        .last()
        .expect("archived task")
        .id()
}

async fn assert_no_orphan_actors(h: &Harness) {
    let tables = h.store.snapshot().await;
    for row in &tables.task_actors {
        assert!(tables.tasks.iter().any(|t| t.id == row.task_id), "orphan actor row {row:?}");
    }
}

// ============================================================
// Reject
// ============================================================

#[tokio::test]
async fn reject_returns_to_the_previous_task() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    h.complete(instance.id, "a", "u1").await;
    let b = h.task_for(instance.id, "b", "u2").await;

    let restored = h.engine.reject_task(b.id, &actor("u2"), Variables::new()).await.expect("reject");
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].task_key, "a");
    assert_eq!(h.task_keys(instance.id).await, vec!["a"]);
    assert!(h.history(instance.id).await.contains(&("b".to_string(), TaskState::Rejected)));
    let row = h.engine.instance(instance.id).await.unwrap().expect("running");
    assert_eq!(row.current_node_key, "a");

    h.complete(instance.id, "a", "u1").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["b"]);
    assert_no_orphan_actors(&h).await;
}

#[tokio::test]
async fn rejecting_the_first_task_returns_to_the_initiator() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    let a = h.task_for(instance.id, "a", "u1").await;
    h.engine.reject_task(a.id, &actor("u1"), Variables::new()).await.expect("reject");

    let major = h.task_for(instance.id, "start", "creator").await;
    assert_eq!(major.task_type, TaskType::Major);

    let err = h.engine.reject_task(major.id, &creator(), Variables::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NoParentTask(id) if id == major.id));

    h.engine.execute_task(major.id, &creator(), Variables::new()).await.expect("resubmit");
    assert_eq!(h.task_keys(instance.id).await, vec!["a"]);
}

#[tokio::test]
async fn countersign_reject_closes_every_signer() {
    let h = Harness::new();
    let model = process("cs", vec![approval("sign", PerformType::Countersign, &["u1", "u2"])]);
    let instance = h.start(&model, json!({})).await;
    let task = h.task_for(instance.id, "sign", "u1").await;

    h.engine.reject_task(task.id, &actor("u1"), Variables::new()).await.expect("reject");
    assert_eq!(h.task_keys(instance.id).await, vec!["start"]);
    let rejected = h.history(instance.id).await.into_iter().filter(|(_, s)| *s == TaskState::Rejected).count();
    assert_eq!(rejected, 2);
    assert_no_orphan_actors(&h).await;
}

// ============================================================
// Withdraw
// ============================================================

#[tokio::test]
async fn withdraw_removes_successors_and_restores_the_task() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    h.complete(instance.id, "a", "u1").await;
    let a = his_id(&h, instance.id, "a").await;

    let restored = h.engine.withdraw_task(a, &actor("u1")).await.expect("withdraw");
    assert_eq!(restored[0].task_key, "a");
    assert_eq!(h.task_keys(instance.id).await, vec!["a"]);
    assert!(!h.history(instance.id).await.iter().any(|(key, _)| key == "b"));
    assert_no_orphan_actors(&h).await;
}

#[tokio::test]
async fn only_the_finisher_may_withdraw() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    h.complete(instance.id, "a", "u1").await;
    let a = his_id(&h, instance.id, "a").await;

    let err = h.engine.withdraw_task(a, &actor("u2")).await.unwrap_err();
    assert!(matches!(err, EngineError::PermissionDenied { .. }));
}

#[tokio::test]
async fn withdraw_after_successor_acted_fails() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    h.complete(instance.id, "a", "u1").await;
    h.complete(instance.id, "b", "u2").await;
    let a = his_id(&h, instance.id, "a").await;

    let err = h.engine.withdraw_task(a, &actor("u1")).await.unwrap_err();
    assert!(matches!(err, EngineError::NothingToWithdraw(id) if id == a));
    assert_eq!(h.task_keys(instance.id).await, vec!["c"]);
}

#[tokio::test]
async fn countersign_withdraw_restores_every_signer() {
    let h = Harness::new();
    let model = process("cs", vec![approval("sign", PerformType::Countersign, &["u1", "u2"]), single("next", "u9")]);
    let instance = h.start(&model, json!({})).await;
    h.complete(instance.id, "sign", "u1").await;
    h.complete(instance.id, "sign", "u2").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);

    let last = his_id(&h, instance.id, "sign").await;
    h.engine.withdraw_task(last, &actor("u2")).await.expect("withdraw");

    assert_eq!(h.task_keys(instance.id).await, vec!["sign", "sign"]);
    h.task_for(instance.id, "sign", "u1").await;
    h.task_for(instance.id, "sign", "u2").await;
    assert_no_orphan_actors(&h).await;
}

#[tokio::test]
async fn withdraw_after_passing_vote_restores_every_voter() {
    let h = Harness::new();
    let vote = NodeModel::new("vote", "Vote", NodeKind::Approval).with_assignees(
        PerformType::VoteSign,
        vec![NodeAssignee::weighted("u60", "U60", 60), NodeAssignee::weighted("u40", "U40", 40)],
    );
    let instance = h.start(&process("v", vec![vote, single("next", "u9")]), json!({})).await;
    h.complete(instance.id, "vote", "u60").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);

    let cast = h
        .engine
        .his_tasks(instance.id)
        .await
        .expect("history")
        .into_iter()
        .find(|t| t.task.task_key == "vote" && t.state == TaskState::Complete)
        .expect("cast vote")
        .id();
    let restored = h.engine.withdraw_task(cast, &actor("u60")).await.expect("withdraw");
    assert_eq!(restored.len(), 2);
    assert_eq!(h.task_keys(instance.id).await, vec!["vote", "vote"]);

    for (voter, weight) in [("u60", 60), ("u40", 40)] {
        let task = h.task_for(instance.id, "vote", voter).await;
        let rows = h.engine.task_actors(task.id).await.unwrap();
        assert_eq!(rows[0].weight, Some(weight));
    }
    assert_no_orphan_actors(&h).await;

    // The restored vote still needs its pass weight.
    h.complete(instance.id, "vote", "u40").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["vote"]);
    h.complete(instance.id, "vote", "u60").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
}

// ============================================================
// Reclaim
// ============================================================

#[tokio::test]
async fn reclaim_revokes_successors() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    h.complete(instance.id, "a", "u1").await;
    let a = his_id(&h, instance.id, "a").await;

    h.engine.reclaim_task(a, &actor("u1")).await.expect("reclaim");
    assert_eq!(h.task_keys(instance.id).await, vec!["a"]);
    assert!(h.history(instance.id).await.contains(&("b".to_string(), TaskState::Revoked)));
}

#[tokio::test]
async fn reclaim_after_successor_acted_is_refused() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    h.complete(instance.id, "a", "u1").await;
    h.complete(instance.id, "b", "u2").await;
    let a = his_id(&h, instance.id, "a").await;

    let err = h.engine.reclaim_task(a, &actor("u1")).await.unwrap_err();
    assert!(matches!(err, EngineError::ReclaimNotAllowed { .. }));
}

// ============================================================
// Delegate, resolve and transfer
// ============================================================

#[tokio::test]
async fn delegated_task_returns_to_the_assignor() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    let task = h.task_for(instance.id, "a", "u1").await;

    let delegated = h
        .engine
        .delegate_task(task.id, &actor("u1"), model::ActorSpec::user("u5", "U5"))
        .await
        .expect("delegate");
    assert_eq!(delegated.task_type, TaskType::Delegate);
    assert_eq!(delegated.assignor_id.as_deref(), Some("u1"));

    let again = h.engine.delegate_task(task.id, &actor("u5"), model::ActorSpec::user("u6", "U6")).await;
    assert!(matches!(again, Err(EngineError::AlreadyAssigned(_))));
    let denied = h.engine.execute_task(task.id, &actor("u1"), Variables::new()).await;
    assert!(matches!(denied, Err(EngineError::PermissionDenied { .. })));

    let back = h.engine.resolve_task(task.id, &actor("u5"), Variables::new()).await.expect("resolve");
    assert_eq!(back.task_type, TaskType::DelegateReturn);
    let rows = h.engine.task_actors(task.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].actor_id, "u1");

    h.complete(instance.id, "a", "u1").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["b"]);
}

#[tokio::test]
async fn executing_a_delegated_task_resolves_it() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    let task = h.task_for(instance.id, "a", "u1").await;
    h.engine.delegate_task(task.id, &actor("u1"), model::ActorSpec::user("u5", "U5")).await.expect("delegate");

    h.engine.execute_task(task.id, &actor("u5"), Variables::new()).await.expect("delegate acts");
    assert_eq!(h.task_keys(instance.id).await, vec!["a"]);
    h.task_for(instance.id, "a", "u1").await;
}

#[tokio::test]
async fn transfer_moves_the_task_for_good() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    let task = h.task_for(instance.id, "a", "u1").await;
    let moved = h.engine.transfer_task(task.id, &actor("u1"), model::ActorSpec::user("u7", "U7")).await.expect("transfer");
    assert_eq!(moved.task_type, TaskType::Transfer);

    h.complete(instance.id, "a", "u7").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["b"]);
}

#[tokio::test]
async fn resolving_an_undelegated_task_fails() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    let task = h.task_for(instance.id, "a", "u1").await;
    let err = h.engine.resolve_task(task.id, &actor("u1"), Variables::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotDelegated(_)));
}

// ============================================================
// Jump
// ============================================================

#[tokio::test]
async fn jump_restarts_at_an_earlier_node() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    h.complete(instance.id, "a", "u1").await;
    h.complete(instance.id, "b", "u2").await;
    let c = h.task_for(instance.id, "c", "u3").await;

    assert_eq!(h.engine.previous_node_keys(c.id).await.unwrap(), vec!["b", "a", "start"]);
    h.engine.jump_task(c.id, Some("a"), &actor("u3"), Variables::new()).await.expect("jump");
    assert_eq!(h.task_keys(instance.id).await, vec!["a"]);
    assert!(h.history(instance.id).await.contains(&("c".to_string(), TaskState::Jump)));
}

#[tokio::test]
async fn jump_without_target_goes_to_the_parent_node() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    h.complete(instance.id, "a", "u1").await;
    let b = h.task_for(instance.id, "b", "u2").await;

    h.engine.jump_task(b.id, None, &actor("u2"), Variables::new()).await.expect("jump");
    assert_eq!(h.task_keys(instance.id).await, vec!["a"]);
}

#[tokio::test]
async fn jump_to_start_hands_back_to_the_initiator() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    let a = h.task_for(instance.id, "a", "u1").await;

    h.engine.jump_task(a.id, Some("start"), &actor("u1"), Variables::new()).await.expect("jump");
    let major = h.task_for(instance.id, "start", "creator").await;
    assert_eq!(major.task_type, TaskType::Major);
}

#[tokio::test]
async fn jump_to_unknown_node_fails() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    let a = h.task_for(instance.id, "a", "u1").await;
    let err = h.engine.jump_task(a.id, Some("nope"), &actor("u1"), Variables::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::NodeNotFound(ref key) if key == "nope"));
    assert_eq!(h.task_keys(instance.id).await, vec!["a"]);
}

// ============================================================
// Node insertion
// ============================================================

#[tokio::test]
async fn node_inserted_after_runs_next() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    let a = h.task_for(instance.id, "a", "u1").await;

    h.engine
        .insert_node(a.id, single("extra", "u5"), InsertPosition::After, &actor("u1"))
        .await
        .expect("insert");
    h.complete(instance.id, "a", "u1").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["extra"]);
    h.complete(instance.id, "extra", "u5").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["b"]);

    let private = h.engine.instance_model(instance.id).await.unwrap();
    assert!(private.get_node("extra").is_some());
}

#[tokio::test]
async fn node_inserted_before_takes_over_immediately() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    h.complete(instance.id, "a", "u1").await;
    let b = h.task_for(instance.id, "b", "u2").await;

    h.engine
        .insert_node(b.id, single("check", "u5"), InsertPosition::Before, &actor("u2"))
        .await
        .expect("insert");
    assert_eq!(h.task_keys(instance.id).await, vec!["check"]);
    assert!(h.history(instance.id).await.contains(&("b".to_string(), TaskState::Jump)));

    h.complete(instance.id, "check", "u5").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["b"]);
}

#[tokio::test]
async fn inserting_a_duplicate_key_changes_nothing() {
    let h = Harness::new();
    let instance = h.start(&three_steps(), json!({})).await;
    let a = h.task_for(instance.id, "a", "u1").await;
    let before = h.engine.instance_model(instance.id).await.unwrap();

    let err = h
        .engine
        .insert_node(a.id, single("b", "u5"), InsertPosition::After, &actor("u1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Model(ModelError::DuplicateNodeKey(_))));
    assert_eq!(*h.engine.instance_model(instance.id).await.unwrap(), *before);
}
