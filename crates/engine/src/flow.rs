//! The workflow engine.
//!
//! `FlowEngine` owns its collaborators explicitly: a storage [`Store`], an
//! [`ActorProvider`], a trigger registry, an [`Expression`] evaluator and the
//! hook lists. Every public operation below:
//! 1. Opens one transaction.
//! 2. Runs the operation, which may traverse the graph and create or
//!    archive any number of rows.
//! 3. Commits and delivers listener events, or rolls back on any error.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use db::models::{
    HisInstanceRow, HisTaskActorRow, HisTaskRow, InstanceRow, InstanceState, ProcessRow,
    TaskActorRow, TaskRow, TaskType,
};
use db::Store;
use model::{
    ActorProvider, ActorSpec, Expression, InsertPosition, NodeAssignee, NodeModel, ProcessModel,
    SimpleExpression, StaticActorProvider, TaskTrigger, Variables,
};

use crate::cache::ModelCache;
use crate::config::EngineConfig;
use crate::execution::FlowActor;
use crate::hooks::{FlowListener, Hooks, TaskCreateInterceptor};
use crate::perform::Completion;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Trigger registry
// ---------------------------------------------------------------------------

/// Maps `extendConfig.trigger` ids to handlers.
pub type TriggerRegistry = HashMap<String, Arc<dyn TaskTrigger>>;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Which definition to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessRef {
    Id(Uuid),
    /// Latest active version unless `version` is given.
    Key { key: String, version: Option<i32> },
}

impl ProcessRef {
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key { key: key.into(), version: None }
    }
}

impl From<Uuid> for ProcessRef {
    fn from(id: Uuid) -> Self {
        Self::Id(id)
    }
}

/// Optional settings for [`FlowEngine::start_instance_with`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub(crate) business_key: Option<String>,
    pub(crate) priority: i32,
    pub(crate) assignees: HashMap<String, Vec<NodeAssignee>>,
    pub(crate) parent_instance_id: Option<Uuid>,
    pub(crate) instance_id: Option<Uuid>,
}

impl StartOptions {
    pub fn business_key(mut self, key: impl Into<String>) -> Self {
        self.business_key = Some(key.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Assign actors to `node_key` for this instance only.
    pub fn assignees(mut self, node_key: impl Into<String>, list: Vec<NodeAssignee>) -> Self {
        self.assignees.insert(node_key.into(), list);
        self
    }
}

// ---------------------------------------------------------------------------
// FlowEngine
// ---------------------------------------------------------------------------

pub struct FlowEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) cache: ModelCache,
    pub(crate) actors: Arc<dyn ActorProvider>,
    pub(crate) triggers: TriggerRegistry,
    pub(crate) default_trigger: Option<Arc<dyn TaskTrigger>>,
    pub(crate) expression: Arc<dyn Expression>,
    pub(crate) hooks: Hooks,
    pub(crate) config: EngineConfig,
}

/// Builder for [`FlowEngine`]. Only the store is required.
pub struct FlowEngineBuilder {
    store: Arc<dyn Store>,
    actors: Arc<dyn ActorProvider>,
    triggers: TriggerRegistry,
    default_trigger: Option<Arc<dyn TaskTrigger>>,
    expression: Arc<dyn Expression>,
    hooks: Hooks,
    config: EngineConfig,
}

impl FlowEngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn actor_provider(mut self, provider: Arc<dyn ActorProvider>) -> Self {
        self.actors = provider;
        self
    }

    pub fn trigger(mut self, id: impl Into<String>, handler: Arc<dyn TaskTrigger>) -> Self {
        self.triggers.insert(id.into(), handler);
        self
    }

    /// Handler for trigger nodes without a registered id.
    pub fn default_trigger(mut self, handler: Arc<dyn TaskTrigger>) -> Self {
        self.default_trigger = Some(handler);
        self
    }

    pub fn expression(mut self, expression: Arc<dyn Expression>) -> Self {
        self.expression = expression;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn FlowListener>) -> Self {
        self.hooks.add_listener(listener);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn TaskCreateInterceptor>) -> Self {
        self.hooks.add_interceptor(interceptor);
        self
    }

    pub fn build(self) -> FlowEngine {
        FlowEngine {
            store: self.store,
            cache: ModelCache::new(),
            actors: self.actors,
            triggers: self.triggers,
            default_trigger: self.default_trigger,
            expression: self.expression,
            hooks: self.hooks,
            config: self.config,
        }
    }
}

impl FlowEngine {
    pub fn builder(store: Arc<dyn Store>) -> FlowEngineBuilder {
        FlowEngineBuilder {
            store,
            actors: Arc::new(StaticActorProvider),
            triggers: TriggerRegistry::new(),
            default_trigger: None,
            expression: Arc::new(SimpleExpression),
            hooks: Hooks::default(),
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Actor recorded on automatic operations.
    pub fn system_actor(&self) -> FlowActor {
        FlowActor::new(self.config.system_actor_id.clone(), self.config.system_actor_name.clone())
    }

    // -----------------------------------------------------------------------
    // Process definitions
    // -----------------------------------------------------------------------

    /// Deploy a model document and return the process id.
    ///
    /// With `repeat == false` an already deployed key returns the existing
    /// id unchanged; otherwise a new version is inserted and the previous
    /// one becomes historical.
    #[instrument(skip(self, content, creator), fields(actor = %creator.id))]
    pub async fn deploy(
        &self,
        content: &str,
        creator: &FlowActor,
        repeat: bool,
    ) -> Result<Uuid, EngineError> {
        let mut s = self.begin().await?;
        let result = self.deploy_in(&mut s, content, creator, repeat).await;
        self.finish(s, result).await
    }

    /// Deploy a new version of the definition behind `process_id`.
    #[instrument(skip(self, content, creator), fields(actor = %creator.id))]
    pub async fn redeploy(
        &self,
        process_id: Uuid,
        content: &str,
        creator: &FlowActor,
    ) -> Result<Uuid, EngineError> {
        let mut s = self.begin().await?;
        let result = self.redeploy_in(&mut s, process_id, content, creator).await;
        self.finish(s, result).await
    }

    /// Disable a definition. Running instances are unaffected.
    #[instrument(skip(self))]
    pub async fn undeploy(&self, process_id: Uuid) -> Result<(), EngineError> {
        let mut s = self.begin().await?;
        let result = self.undeploy_in(&mut s, process_id).await;
        self.finish(s, result).await
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    pub async fn start_instance(
        &self,
        process: ProcessRef,
        actor: &FlowActor,
        args: Variables,
    ) -> Result<InstanceRow, EngineError> {
        self.start_instance_with(process, actor, args, StartOptions::default()).await
    }

    /// Start an instance and run it until it waits on tasks or ends.
    #[instrument(skip(self, actor, args, options), fields(actor = %actor.id))]
    pub async fn start_instance_with(
        &self,
        process: ProcessRef,
        actor: &FlowActor,
        args: Variables,
        options: StartOptions,
    ) -> Result<InstanceRow, EngineError> {
        let mut s = self.begin().await?;
        let result = async {
            let row = self.resolve_process(&mut s, actor.tenant_id.as_deref(), &process).await?;
            self.start_instance_in(&mut s, row, actor.clone(), args, options).await
        }
        .await;
        let instance = self.finish(s, result).await?;
        info!(instance_id = %instance.id, "instance started");
        Ok(instance)
    }

    /// Close every task of the instance family as terminated.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn terminate_instance(&self, instance_id: Uuid, actor: &FlowActor) -> Result<(), EngineError> {
        self.force_complete(instance_id, actor, InstanceState::Terminated).await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn reject_instance(&self, instance_id: Uuid, actor: &FlowActor) -> Result<(), EngineError> {
        self.force_complete(instance_id, actor, InstanceState::Rejected).await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn revoke_instance(&self, instance_id: Uuid, actor: &FlowActor) -> Result<(), EngineError> {
        self.force_complete(instance_id, actor, InstanceState::Revoked).await
    }

    /// Expire an instance on behalf of the system actor.
    #[instrument(skip(self))]
    pub async fn expire_instance(&self, instance_id: Uuid) -> Result<(), EngineError> {
        let actor = self.system_actor();
        self.force_complete(instance_id, &actor, InstanceState::Expired).await
    }

    async fn force_complete(
        &self,
        instance_id: Uuid,
        actor: &FlowActor,
        state: InstanceState,
    ) -> Result<(), EngineError> {
        let mut s = self.begin().await?;
        let result = self.force_complete_in(&mut s, instance_id, actor, state).await;
        self.finish(s, result).await
    }

    /// Set instance variables; supplied keys overwrite existing ones.
    #[instrument(skip(self, args, actor), fields(actor = %actor.id))]
    pub async fn add_variables(
        &self,
        instance_id: Uuid,
        args: Variables,
        actor: &FlowActor,
    ) -> Result<InstanceRow, EngineError> {
        let mut s = self.begin().await?;
        let result = self.add_variables_in(&mut s, instance_id, args, actor).await;
        self.finish(s, result).await
    }

    /// Splice `node` into the instance's private model next to the node of
    /// `task_id`. Inserting before jumps the instance to the new node.
    #[instrument(skip(self, node, actor), fields(node = %node.node_key, actor = %actor.id))]
    pub async fn insert_node(
        &self,
        task_id: Uuid,
        node: NodeModel,
        position: InsertPosition,
        actor: &FlowActor,
    ) -> Result<(), EngineError> {
        let mut s = self.begin().await?;
        let result = self.insert_node_in(&mut s, task_id, node, position, actor).await;
        self.finish(s, result).await
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Complete a task and advance the instance.
    #[instrument(skip(self, actor, args), fields(actor = %actor.id))]
    pub async fn execute_task(
        &self,
        task_id: Uuid,
        actor: &FlowActor,
        args: Variables,
    ) -> Result<(), EngineError> {
        let mut s = self.begin().await?;
        let result = self.complete_task(&mut s, task_id, actor, args, Completion::Manual).await;
        self.finish(s, result).await
    }

    /// Complete a task as the system actor without a permission check.
    #[instrument(skip(self, args))]
    pub async fn auto_complete_task(&self, task_id: Uuid, args: Variables) -> Result<(), EngineError> {
        let actor = self.system_actor();
        let mut s = self.begin().await?;
        let result = self.complete_task(&mut s, task_id, &actor, args, Completion::Auto).await;
        self.finish(s, result).await
    }

    /// Move past an expired timer or delayed trigger.
    #[instrument(skip(self, args))]
    pub async fn auto_jump_task(&self, task_id: Uuid, args: Variables) -> Result<(), EngineError> {
        let actor = self.system_actor();
        let mut s = self.begin().await?;
        let result = self.complete_task(&mut s, task_id, &actor, args, Completion::AutoJump).await;
        self.finish(s, result).await
    }

    #[instrument(skip(self, args))]
    pub async fn auto_reject_task(&self, task_id: Uuid, args: Variables) -> Result<Vec<TaskRow>, EngineError> {
        let actor = self.system_actor();
        let mut s = self.begin().await?;
        let result = self.reject_in(&mut s, task_id, &actor, args, true).await;
        self.finish(s, result).await
    }

    /// Reject a task back to the task that created it. Returns the restored
    /// tasks.
    #[instrument(skip(self, actor, args), fields(actor = %actor.id))]
    pub async fn reject_task(
        &self,
        task_id: Uuid,
        actor: &FlowActor,
        args: Variables,
    ) -> Result<Vec<TaskRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.reject_in(&mut s, task_id, actor, args, false).await;
        self.finish(s, result).await
    }

    /// Take back a completed task whose successors have not acted yet.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn withdraw_task(
        &self,
        his_task_id: Uuid,
        actor: &FlowActor,
    ) -> Result<Vec<TaskRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.withdraw_in(&mut s, his_task_id, actor).await;
        self.finish(s, result).await
    }

    /// Like withdraw, but revokes the active successors instead of deleting them.
    #[instrument(skip(self, actor), fields(actor = %actor.id))]
    pub async fn reclaim_task(
        &self,
        his_task_id: Uuid,
        actor: &FlowActor,
    ) -> Result<Vec<TaskRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.reclaim_in(&mut s, his_task_id, actor).await;
        self.finish(s, result).await
    }

    /// Close every active task and restart at `target`, or at the parent of
    /// the task's node when `target` is `None`.
    #[instrument(skip(self, actor, args), fields(actor = %actor.id))]
    pub async fn jump_task(
        &self,
        task_id: Uuid,
        target: Option<&str>,
        actor: &FlowActor,
        args: Variables,
    ) -> Result<(), EngineError> {
        let mut s = self.begin().await?;
        let target = target.map(str::to_owned);
        let result = self.jump_in(&mut s, task_id, target, actor, args).await;
        self.finish(s, result).await
    }

    /// Hand a task to `assignee` until they resolve it back.
    #[instrument(skip(self, actor, assignee), fields(actor = %actor.id, assignee = %assignee.actor_id))]
    pub async fn delegate_task(
        &self,
        task_id: Uuid,
        actor: &FlowActor,
        assignee: ActorSpec,
    ) -> Result<TaskRow, EngineError> {
        let mut s = self.begin().await?;
        let result = self.assign_in(&mut s, task_id, actor, assignee, TaskType::Delegate).await;
        self.finish(s, result).await
    }

    /// Hand a task to `assignee` for good.
    #[instrument(skip(self, actor, assignee), fields(actor = %actor.id, assignee = %assignee.actor_id))]
    pub async fn transfer_task(
        &self,
        task_id: Uuid,
        actor: &FlowActor,
        assignee: ActorSpec,
    ) -> Result<TaskRow, EngineError> {
        let mut s = self.begin().await?;
        let result = self.assign_in(&mut s, task_id, actor, assignee, TaskType::Transfer).await;
        self.finish(s, result).await
    }

    /// Return a delegated task to its assignor.
    #[instrument(skip(self, actor, args), fields(actor = %actor.id))]
    pub async fn resolve_task(
        &self,
        task_id: Uuid,
        actor: &FlowActor,
        args: Variables,
    ) -> Result<TaskRow, EngineError> {
        let mut s = self.begin().await?;
        let result = self.resolve_in(&mut s, task_id, actor, args).await;
        self.finish(s, result).await
    }

    #[instrument(skip(self, actor, actors), fields(actor = %actor.id))]
    pub async fn add_task_actors(
        &self,
        task_id: Uuid,
        actor: &FlowActor,
        actors: Vec<ActorSpec>,
    ) -> Result<(), EngineError> {
        let mut s = self.begin().await?;
        let result = self.add_actors_in(&mut s, task_id, actor, actors).await;
        self.finish(s, result).await
    }

    #[instrument(skip(self, actor, actor_ids), fields(actor = %actor.id))]
    pub async fn remove_task_actors(
        &self,
        task_id: Uuid,
        actor: &FlowActor,
        actor_ids: &[String],
    ) -> Result<(), EngineError> {
        let mut s = self.begin().await?;
        let result = self.remove_actors_in(&mut s, task_id, actor, actor_ids).await;
        self.finish(s, result).await
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn process(&self, process_id: Uuid) -> Result<ProcessRow, EngineError> {
        let mut s = self.begin().await?;
        let result = self.resolve_process(&mut s, None, &ProcessRef::Id(process_id)).await;
        self.finish(s, result).await
    }

    pub async fn process_by_key(
        &self,
        tenant_id: Option<&str>,
        key: &str,
        version: Option<i32>,
    ) -> Result<ProcessRow, EngineError> {
        let mut s = self.begin().await?;
        let process = ProcessRef::Key { key: key.to_owned(), version };
        let result = self.resolve_process(&mut s, tenant_id, &process).await;
        self.finish(s, result).await
    }

    pub async fn instance(&self, instance_id: Uuid) -> Result<Option<InstanceRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.query_instance(&mut s, instance_id).await;
        self.finish(s, result).await
    }

    pub async fn his_instance(&self, instance_id: Uuid) -> Result<Option<HisInstanceRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.query_his_instance(&mut s, instance_id).await;
        self.finish(s, result).await
    }

    /// The instance's private model copy.
    pub async fn instance_model(&self, instance_id: Uuid) -> Result<Arc<ProcessModel>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.load_instance_model(&mut s, instance_id).await;
        self.finish(s, result).await
    }

    pub async fn active_tasks(&self, instance_id: Uuid) -> Result<Vec<TaskRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.query_active_tasks(&mut s, instance_id).await;
        self.finish(s, result).await
    }

    pub async fn task_actors(&self, task_id: Uuid) -> Result<Vec<TaskActorRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.query_task_actors(&mut s, task_id).await;
        self.finish(s, result).await
    }

    pub async fn his_tasks(&self, instance_id: Uuid) -> Result<Vec<HisTaskRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.query_his_tasks(&mut s, instance_id).await;
        self.finish(s, result).await
    }

    pub async fn his_task_actors(&self, task_id: Uuid) -> Result<Vec<HisTaskActorRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.query_his_task_actors(&mut s, task_id).await;
        self.finish(s, result).await
    }

    /// Timer and delayed-trigger tasks due at `now`, for an external scheduler.
    pub async fn expired_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRow>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.query_expired_tasks(&mut s, now).await;
        self.finish(s, result).await
    }

    /// Work-bearing node keys before the node of `task_id`, nearest first.
    /// Candidates for [`jump_task`](Self::jump_task).
    pub async fn previous_node_keys(&self, task_id: Uuid) -> Result<Vec<String>, EngineError> {
        let mut s = self.begin().await?;
        let result = self.query_previous_node_keys(&mut s, task_id).await;
        self.finish(s, result).await
    }
}
