//! Test doubles for the collaborator traits.
//!
//! Useful in unit and integration tests where a real trigger or actor
//! directory is either unavailable or irrelevant.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::traits::{ActorProvider, ActorSpec, NodeContext, TaskTrigger};
use crate::{HandlerError, NodeModel};

/// Behaviour injected into `MockTrigger` at construction time.
pub enum MockBehaviour {
    Succeed,
    /// Fail with `HandlerError::Rejected`.
    Fail(String),
}

/// A trigger that records every call it receives and returns a
/// programmer-specified result.
pub struct MockTrigger {
    pub behaviour: MockBehaviour,
    /// Node keys seen by this trigger (in call order).
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockTrigger {
    pub fn succeeding() -> Self {
        Self { behaviour: MockBehaviour::Succeed, calls: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn failing(msg: impl Into<String>) -> Self {
        Self { behaviour: MockBehaviour::Fail(msg.into()), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Number of times this trigger has fired.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl TaskTrigger for MockTrigger {
    async fn execute(&self, node: &NodeModel, _ctx: &NodeContext) -> Result<(), HandlerError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(node.node_key.clone());

        match &self.behaviour {
            MockBehaviour::Succeed => Ok(()),
            MockBehaviour::Fail(msg) => Err(HandlerError::Rejected(msg.clone())),
        }
    }
}

/// Returns a fixed actor list for every node and grants access to listed
/// group members.
pub struct MockActorProvider {
    pub actors: Vec<ActorSpec>,
    /// `(group id, member id)` pairs accepted by `is_allowed`.
    pub members: Vec<(String, String)>,
    /// Node keys this provider was asked about.
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockActorProvider {
    pub fn returning(actors: Vec<ActorSpec>) -> Self {
        Self { actors, members: Vec::new(), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn with_member(mut self, group: impl Into<String>, member: impl Into<String>) -> Self {
        self.members.push((group.into(), member.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ActorProvider for MockActorProvider {
    async fn task_actors(
        &self,
        node: &NodeModel,
        _ctx: &NodeContext,
    ) -> Result<Vec<ActorSpec>, HandlerError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(node.node_key.clone());
        Ok(self.actors.clone())
    }

    async fn is_allowed(
        &self,
        _node: &NodeModel,
        actor_id: &str,
        candidate: &ActorSpec,
    ) -> Result<bool, HandlerError> {
        Ok(candidate.actor_id == actor_id
            || self
                .members
                .iter()
                .any(|(group, member)| *group == candidate.actor_id && member == actor_id))
    }
}
