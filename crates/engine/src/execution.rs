//! The per-step execution context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use db::models::{InstanceRow, TaskRow};
use model::{ActorSpec, NodeContext, ProcessModel, Variables};

/// Who is driving an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowActor {
    pub tenant_id: Option<String>,
    pub id: String,
    pub name: String,
}

impl FlowActor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { tenant_id: None, id: id.into(), name: name.into() }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// State carried through one traversal step.
#[derive(Debug, Clone)]
pub struct Execution {
    /// The instance's private model copy.
    pub model: Arc<ProcessModel>,
    pub instance: InstanceRow,
    /// Task whose completion drives this step; new tasks take it as parent.
    pub task: Option<TaskRow>,
    pub args: Variables,
    pub actor: FlowActor,
    /// Sort-mode actor the next task must be assigned to.
    pub(crate) next_actor: Option<ActorSpec>,
}

impl Execution {
    pub fn new(
        model: Arc<ProcessModel>,
        instance: InstanceRow,
        task: Option<TaskRow>,
        args: Variables,
        actor: FlowActor,
    ) -> Self {
        Self { model, instance, task, args, actor, next_actor: None }
    }

    pub fn node_context(&self) -> NodeContext {
        NodeContext {
            tenant_id: self.instance.tenant_id.clone(),
            process_id: self.instance.process_id,
            instance_id: self.instance.id,
            task_id: self.task.as_ref().map(|t| t.id),
            creator_id: self.instance.create_id.clone(),
            creator_name: self.instance.create_by.clone(),
            actor_id: self.actor.id.clone(),
            variables: self.args.clone(),
        }
    }
}
