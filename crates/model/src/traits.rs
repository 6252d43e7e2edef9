//! Collaborator contracts the engine calls out to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::node::{ActorKind, NodeModel, SetType, Variables};
use crate::HandlerError;

/// Snapshot of the running step handed to collaborators.
///
/// Defined here (in the model crate) so both the engine and collaborator
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub tenant_id: Option<String>,
    pub process_id: Uuid,
    pub instance_id: Uuid,
    /// Task whose completion led to this step, if any.
    pub task_id: Option<Uuid>,
    /// Instance creator.
    pub creator_id: String,
    pub creator_name: String,
    /// Actor driving the current operation.
    pub actor_id: String,
    pub variables: Variables,
}

/// An eligible participant resolved for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSpec {
    pub actor_id: String,
    pub actor_name: String,
    pub kind: ActorKind,
    pub weight: Option<u32>,
}

impl ActorSpec {
    pub fn user(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { actor_id: id.into(), actor_name: name.into(), kind: ActorKind::User, weight: None }
    }

    pub fn with_kind(mut self, kind: ActorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Resolves who may act on a node.
#[async_trait]
pub trait ActorProvider: Send + Sync {
    /// Ordered list of actors for `node`.
    async fn task_actors(
        &self,
        node: &NodeModel,
        ctx: &NodeContext,
    ) -> Result<Vec<ActorSpec>, HandlerError>;

    /// Whether `actor_id` may act through the recorded `candidate` row.
    ///
    /// The default only matches the exact id; providers backing roles or
    /// departments override this with a membership lookup.
    async fn is_allowed(
        &self,
        _node: &NodeModel,
        actor_id: &str,
        candidate: &ActorSpec,
    ) -> Result<bool, HandlerError> {
        Ok(candidate.actor_id == actor_id)
    }
}

/// Uses the assignee list stored in the model.
///
/// Initiator nodes resolve to the instance creator. Dynamic nodes resolve
/// to nothing, so engines needing them must install their own provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticActorProvider;

#[async_trait]
impl ActorProvider for StaticActorProvider {
    async fn task_actors(
        &self,
        node: &NodeModel,
        ctx: &NodeContext,
    ) -> Result<Vec<ActorSpec>, HandlerError> {
        if node.set_type == SetType::Initiator {
            return Ok(vec![ActorSpec::user(ctx.creator_id.clone(), ctx.creator_name.clone())]);
        }
        let kind = node.set_type.actor_kind();
        Ok(node
            .node_assignee_list
            .iter()
            .map(|a| ActorSpec {
                actor_id: a.id.clone(),
                actor_name: a.name.clone(),
                kind,
                weight: a.weight,
            })
            .collect())
    }
}

/// External logic run by trigger nodes.
#[async_trait]
pub trait TaskTrigger: Send + Sync {
    /// Run the trigger for `node`. An error aborts the surrounding operation.
    async fn execute(&self, node: &NodeModel, ctx: &NodeContext) -> Result<(), HandlerError>;
}
