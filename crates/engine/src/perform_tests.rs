//! Performance-type rules: countersign, vote-sign, sort and or-sign.

use serde_json::json;

use db::models::TaskState;
use model::{ActorSpec, NodeAssignee, NodeKind, NodeModel, PerformType, Variables};

use crate::test_support::{actor, approval, process, single, Harness};
use crate::{EngineError, TaskEventKind};

// ============================================================
// Countersign
// ============================================================

#[tokio::test]
async fn countersign_waits_for_every_actor() {
    let h = Harness::new();
    let model = process("cs", vec![approval("sign", PerformType::Countersign, &["u1", "u2", "u3"]), single("next", "u9")]);
    let instance = h.start(&model, json!({})).await;
    assert_eq!(h.task_keys(instance.id).await, vec!["sign", "sign", "sign"]);

    h.complete(instance.id, "sign", "u1").await;
    h.complete(instance.id, "sign", "u3").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["sign"]);

    h.complete(instance.id, "sign", "u2").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
}

// ============================================================
// Vote-sign
// ============================================================

fn vote(pass: Option<u32>) -> NodeModel {
    let mut node = NodeModel::new("vote", "Vote", NodeKind::Approval).with_assignees(
        PerformType::VoteSign,
        vec![NodeAssignee::weighted("u1", "U1", 60), NodeAssignee::weighted("u2", "U2", 40)],
    );
    node.pass_weight = pass;
    node
}

#[tokio::test]
async fn heavy_vote_passes_and_closes_the_rest() {
    let h = Harness::new();
    let instance = h.start(&process("v", vec![vote(None), single("next", "u9")]), json!({})).await;

    h.complete(instance.id, "vote", "u1").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
    let history = h.history(instance.id).await;
    assert!(history.contains(&("vote".to_string(), TaskState::VoteClosed)));
    assert!(h.events.task_events().contains(&(TaskEventKind::VoteClosed, "vote".to_string())));
}

#[tokio::test]
async fn light_vote_waits_below_pass_weight() {
    let h = Harness::new();
    let instance = h.start(&process("v", vec![vote(None), single("next", "u9")]), json!({})).await;

    h.complete(instance.id, "vote", "u2").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["vote"]);

    h.complete(instance.id, "vote", "u1").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
}

#[tokio::test]
async fn node_pass_weight_overrides_the_default() {
    let h = Harness::new();
    let instance = h.start(&process("v", vec![vote(Some(70)), single("next", "u9")]), json!({})).await;

    h.complete(instance.id, "vote", "u1").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["vote"]);
}

#[tokio::test]
async fn unweighted_votes_share_equally() {
    let h = Harness::new();
    let model = process("v", vec![approval("vote", PerformType::VoteSign, &["u1", "u2"]), single("next", "u9")]);
    let instance = h.start(&model, json!({})).await;
    let task = h.task_for(instance.id, "vote", "u1").await;
    let rows = h.engine.task_actors(task.id).await.unwrap();
    assert_eq!(rows[0].weight, Some(50));

    h.complete(instance.id, "vote", "u1").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
}

// ============================================================
// Sort
// ============================================================

#[tokio::test]
async fn sort_hands_the_task_down_the_list() {
    let h = Harness::new();
    let model = process("s", vec![approval("seq", PerformType::Sort, &["a", "b", "c"]), single("next", "u9")]);
    let instance = h.start(&model, json!({})).await;

    for (holder, following) in [("a", "b"), ("b", "c")] {
        h.complete(instance.id, "seq", holder).await;
        let task = h.tasks(instance.id).await.remove(0);
        assert_eq!(task.task_key, "seq");
        let rows = h.engine.task_actors(task.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].actor_id, following);
    }

    h.complete(instance.id, "seq", "c").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
}

#[tokio::test]
async fn transferred_sort_task_keeps_its_place() {
    let h = Harness::new();
    let model = process("s", vec![approval("seq", PerformType::Sort, &["a", "b"]), single("next", "u9")]);
    let instance = h.start(&model, json!({})).await;
    let task = h.task_for(instance.id, "seq", "a").await;

    h.engine.transfer_task(task.id, &actor("a"), ActorSpec::user("x", "X")).await.expect("transfer");
    h.complete(instance.id, "seq", "x").await;

    let next = h.task_for(instance.id, "seq", "b").await;
    assert_eq!(next.task_key, "seq");
}

// ============================================================
// Or-sign and single with several actors
// ============================================================

#[tokio::test]
async fn or_sign_is_one_task_closed_by_any_actor() {
    let h = Harness::new();
    let model = process("o", vec![approval("any", PerformType::OrSign, &["u1", "u2", "u3"]), single("next", "u9")]);
    let instance = h.start(&model, json!({})).await;

    let tasks = h.tasks(instance.id).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(h.engine.task_actors(tasks[0].id).await.unwrap().len(), 3);

    h.complete(instance.id, "any", "u2").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
    let tables = h.store.snapshot().await;
    assert!(tables.task_actors.iter().all(|row| row.task_id != tasks[0].id));
    assert_eq!(tables.his_task_actors.iter().filter(|row| row.task_id == tasks[0].id).count(), 3);
}

#[tokio::test]
async fn single_with_several_actors_behaves_like_or_sign() {
    let h = Harness::new();
    let instance = h.start(&process("o", vec![approval("any", PerformType::Single, &["u1", "u2"])]), json!({})).await;
    assert_eq!(h.tasks(instance.id).await.len(), 1);
    h.complete(instance.id, "any", "u2").await;
    assert!(h.is_finished(instance.id).await);
}

// ============================================================
// Actor changes
// ============================================================

#[tokio::test]
async fn countersign_actors_can_be_added_and_removed() {
    let h = Harness::new();
    let model = process("cs", vec![approval("sign", PerformType::Countersign, &["u1", "u2"]), single("next", "u9")]);
    let instance = h.start(&model, json!({})).await;
    let task = h.task_for(instance.id, "sign", "u1").await;

    h.engine.add_task_actors(task.id, &actor("u1"), vec![ActorSpec::user("u3", "U3")]).await.expect("add");
    assert_eq!(h.task_keys(instance.id).await.len(), 3);

    h.engine.remove_task_actors(task.id, &actor("u1"), &["u2".to_string()]).await.expect("remove");
    assert_eq!(h.task_keys(instance.id).await.len(), 2);
    assert!(h.history(instance.id).await.contains(&("sign".to_string(), TaskState::Revoked)));

    h.complete(instance.id, "sign", "u1").await;
    h.complete(instance.id, "sign", "u3").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
}

#[tokio::test]
async fn last_actor_cannot_be_removed() {
    let h = Harness::new();
    let instance = h.start(&process("p", vec![single("a", "u1")]), json!({})).await;
    let task = h.task_for(instance.id, "a", "u1").await;

    h.engine.add_task_actors(task.id, &actor("u1"), vec![ActorSpec::user("u2", "U2")]).await.expect("add");
    assert_eq!(h.engine.task_actors(task.id).await.unwrap().len(), 2);

    let err = h
        .engine
        .remove_task_actors(task.id, &actor("u1"), &["u1".to_string(), "u2".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    h.engine.execute_task(task.id, &actor("u2"), Variables::new()).await.expect("added actor completes");
}

fn three_way_vote() -> model::ProcessModel {
    let vote = NodeModel::new("vote", "Vote", NodeKind::Approval).with_assignees(
        PerformType::VoteSign,
        vec![
            NodeAssignee::weighted("u1", "U1", 30),
            NodeAssignee::weighted("u2", "U2", 30),
            NodeAssignee::weighted("u3", "U3", 40),
        ],
    );
    process("v", vec![vote, single("next", "u9")])
}

#[tokio::test]
async fn removing_a_voter_that_tips_the_vote_advances() {
    let h = Harness::new();
    let instance = h.start(&three_way_vote(), json!({})).await;
    h.complete(instance.id, "vote", "u1").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["vote", "vote"]);

    let task = h.task_for(instance.id, "vote", "u2").await;
    h.engine.remove_task_actors(task.id, &actor("u2"), &["u3".to_string()]).await.expect("remove");

    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
    let history = h.history(instance.id).await;
    assert!(history.contains(&("vote".to_string(), TaskState::Revoked)));
    assert!(history.contains(&("vote".to_string(), TaskState::VoteClosed)));
    let created = h
        .events
        .task_events()
        .into_iter()
        .filter(|(kind, key)| *kind == TaskEventKind::Create && key == "next")
        .count();
    assert_eq!(created, 1);
}

#[tokio::test]
async fn removing_a_voter_below_the_pass_weight_keeps_waiting() {
    let h = Harness::new();
    let instance = h.start(&three_way_vote(), json!({})).await;
    let task = h.task_for(instance.id, "vote", "u1").await;

    h.engine.remove_task_actors(task.id, &actor("u1"), &["u3".to_string()]).await.expect("remove");
    assert_eq!(h.task_keys(instance.id).await, vec!["vote", "vote"]);

    h.complete(instance.id, "vote", "u1").await;
    assert_eq!(h.task_keys(instance.id).await, vec!["next"]);
}
