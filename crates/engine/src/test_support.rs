//! Fixtures shared by the engine test modules.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use db::models::{InstanceRow, TaskRow, TaskState};
use db::MemoryStore;
use model::{
    ConditionNode, NodeAssignee, NodeExpression, NodeKind, NodeModel, PerformType, ProcessModel,
    Variables,
};

use crate::{FlowActor, FlowEngine, FlowEngineBuilder, ProcessRef, RecordingListener};

pub(crate) fn actor(id: &str) -> FlowActor {
    FlowActor::new(id, id.to_uppercase())
}

pub(crate) fn creator() -> FlowActor {
    actor("creator")
}

pub(crate) fn vars(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        _ => Variables::new(),
    }
}

pub(crate) fn approval(key: &str, mode: PerformType, ids: &[&str]) -> NodeModel {
    NodeModel::new(key, key.to_uppercase(), NodeKind::Approval).with_assignees(
        mode,
        ids.iter().map(|id| NodeAssignee::new(*id, id.to_uppercase())).collect(),
    )
}

pub(crate) fn single(key: &str, id: &str) -> NodeModel {
    approval(key, PerformType::Single, &[id])
}

/// Link `nodes` through `childNode`, first to last.
pub(crate) fn chain(mut nodes: Vec<NodeModel>) -> Option<NodeModel> {
    let mut next: Option<NodeModel> = None;
    while let Some(mut node) = nodes.pop() {
        node.child_node = next.map(Box::new);
        next = Some(node);
    }
    next
}

/// `start → body…`
pub(crate) fn process(key: &str, body: Vec<NodeModel>) -> ProcessModel {
    let mut start = NodeModel::new("start", "Start", NodeKind::Start);
    start.child_node = chain(body).map(Box::new);
    ProcessModel::new(key, key, start)
}

/// A condition branch on `amount > 100` with a default branch.
pub(crate) fn amount_branch(high: NodeModel, low: NodeModel) -> NodeModel {
    let mut route = NodeModel::new("route", "Route", NodeKind::ConditionBranch);
    route.condition_nodes = vec![
        ConditionNode::new("high", "High", 1)
            .when(vec![NodeExpression::new("amount", ">", json!(100))])
            .then(high),
        ConditionNode::new("low", "Low", 2).then(low),
    ];
    route
}

/// `fork{ left | right }` joined at `join`.
pub(crate) fn fork(left: NodeModel, right: NodeModel, join: NodeModel) -> NodeModel {
    let mut fork = NodeModel::new("fork", "Fork", NodeKind::ParallelBranch);
    fork.parallel_nodes = vec![left, right];
    fork.child_node = Some(Box::new(join));
    fork
}

pub(crate) struct Harness {
    pub engine: Arc<FlowEngine>,
    pub store: MemoryStore,
    pub events: Arc<RecordingListener>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    pub fn with(configure: impl FnOnce(FlowEngineBuilder) -> FlowEngineBuilder) -> Self {
        let store = MemoryStore::new();
        let events = Arc::new(RecordingListener::new());
        let builder = FlowEngine::builder(Arc::new(store.clone())).listener(events.clone());
        let engine = Arc::new(configure(builder).build());
        Self { engine, store, events }
    }

    pub async fn deploy(&self, model: &ProcessModel) -> Uuid {
        let content = model.to_json().expect("serialize model");
        self.engine.deploy(&content, &creator(), false).await.expect("deploy")
    }

    pub async fn start(&self, model: &ProcessModel, args: Value) -> InstanceRow {
        let process_id = self.deploy(model).await;
        self.engine
            .start_instance(ProcessRef::Id(process_id), &creator(), vars(args))
            .await
            .expect("start instance")
    }

    pub async fn tasks(&self, instance_id: Uuid) -> Vec<TaskRow> {
        self.engine.active_tasks(instance_id).await.expect("active tasks")
    }

    pub async fn task_keys(&self, instance_id: Uuid) -> Vec<String> {
        self.tasks(instance_id).await.into_iter().map(|t| t.task_key).collect()
    }

    /// The live task at `key` held by `actor_id`.
    pub async fn task_for(&self, instance_id: Uuid, key: &str, actor_id: &str) -> TaskRow {
        for task in self.tasks(instance_id).await {
            if task.task_key != key {
                continue;
            }
            let actors = self.engine.task_actors(task.id).await.expect("task actors");
            if actors.iter().any(|a| a.actor_id == actor_id) {
                return task;
            }
        }
        panic!("no task at '{key}' for '{actor_id}'");
    }

    pub async fn complete(&self, instance_id: Uuid, key: &str, actor_id: &str) {
        let task = self.task_for(instance_id, key, actor_id).await;
        self.engine
            .execute_task(task.id, &actor(actor_id), Variables::new())
            .await
            .expect("execute task");
    }

    /// `(node key, state)` of every archived task, in archive order.
    pub async fn history(&self, instance_id: Uuid) -> Vec<(String, TaskState)> {
        self.engine
            .his_tasks(instance_id)
            .await
            .expect("history")
            .into_iter()
            .map(|h| (h.task.task_key, h.state))
            .collect()
    }

    pub async fn is_finished(&self, instance_id: Uuid) -> bool {
        self.engine.instance(instance_id).await.expect("instance").is_none()
    }
}
