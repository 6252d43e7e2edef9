//! Task creation at task-bearing nodes.

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use db::models::{HisTaskRow, ProcessState, TaskActorRow, TaskRow, TaskState, TaskType};
use db::{DbError, HistoryRepository, InstanceRepository, ProcessRepository, TaskRepository};
use model::{ActorKind, ActorSpec, ModelError, NodeKind, NodeModel, PerformType};

use crate::execution::{Execution, FlowActor};
use crate::flow::StartOptions;
use crate::history;
use crate::hooks::TaskEventKind;
use crate::session::Session;
use crate::{EngineError, FlowEngine};

impl FlowEngine {
    /// Create the work for a task-bearing node.
    ///
    /// Nodes that finish immediately (carbon copy, undelayed trigger) also
    /// advance the instance.
    #[instrument(skip_all, fields(node = %node.node_key, instance_id = %exe.instance.id))]
    pub(crate) async fn create_task(
        &self,
        s: &mut Session,
        exe: &mut Execution,
        node: &NodeModel,
    ) -> Result<(), EngineError> {
        self.hooks.before(exe, node)?;

        let mut created = Vec::new();
        let mut advance = false;
        match node.kind {
            NodeKind::Cc => {
                self.save_cc(s, exe, node).await?;
                advance = true;
            }
            NodeKind::Approval => {
                self.update_current_node(s, exe, node).await?;
                let actors = self.resolve_actors(exe, node).await?;
                let task = self.task_base(exe, node, TaskType::Approval);
                if actors.is_empty() && self.config.skip_empty_approval {
                    let system = self.system_actor();
                    let his = HisTaskRow::archive(task, TaskState::AutoComplete, &system.id, &system.name, Utc::now());
                    DbError::ensure_rows("insert history task", 1, s.tx.insert_his_task(&his).await?)?;
                    s.task_event(TaskEventKind::AutoComplete, &his.task, &system);
                    info!(node = %node.node_key, "approval without actors skipped");
                    advance = true;
                } else {
                    created = self.save_task(s, exe, task, actors).await?;
                }
            }
            NodeKind::Timer => {
                self.update_current_node(s, exe, node).await?;
                let delay = node.delay()?.ok_or_else(|| ModelError::InvalidTimer {
                    node_key: node.node_key.clone(),
                    value: String::new(),
                })?;
                let mut task = self.task_base(exe, node, TaskType::Timer);
                task.expire_time = Some(Utc::now() + delay);
                created = self.save_task(s, exe, task, Vec::new()).await?;
            }
            NodeKind::Trigger => {
                self.update_current_node(s, exe, node).await?;
                let mut task = self.task_base(exe, node, TaskType::Trigger);
                match node.delay()? {
                    Some(delay) => {
                        task.expire_time = Some(Utc::now() + delay);
                        created = self.save_task(s, exe, task, Vec::new()).await?;
                    }
                    None => {
                        self.fire_trigger(exe, node).await?;
                        let his = HisTaskRow::archive(
                            task,
                            TaskState::Complete,
                            &exe.actor.id,
                            &exe.actor.name,
                            Utc::now(),
                        );
                        DbError::ensure_rows("insert history task", 1, s.tx.insert_his_task(&his).await?)?;
                        s.task_event(TaskEventKind::Trigger, &his.task, &exe.actor);
                        advance = true;
                    }
                }
            }
            NodeKind::CallProcess => {
                self.update_current_node(s, exe, node).await?;
                self.call_process(s, exe, node).await?;
            }
            other => {
                return Err(EngineError::InvalidRequest(format!(
                    "node '{}' of kind {other} does not create tasks",
                    node.node_key
                )))
            }
        }

        self.hooks.after(exe, node, &created);
        if advance {
            self.continue_after(s, exe, node.node_key.clone()).await?;
        }
        Ok(())
    }

    /// Common row contents for a task at `node`.
    pub(crate) fn task_base(&self, exe: &Execution, node: &NodeModel, task_type: TaskType) -> TaskRow {
        TaskRow {
            id: Uuid::new_v4(),
            tenant_id: exe.instance.tenant_id.clone(),
            instance_id: exe.instance.id,
            parent_task_id: exe.task.as_ref().map(|t| t.id),
            task_name: node.node_name.clone(),
            task_key: node.node_key.clone(),
            task_type,
            perform_type: node.perform_type(),
            variables: exe.args.clone(),
            assignor_id: None,
            assignor: None,
            expire_time: None,
            create_id: exe.actor.id.clone(),
            create_by: exe.actor.name.clone(),
            create_time: Utc::now(),
        }
    }

    pub(crate) async fn resolve_actors(
        &self,
        exe: &Execution,
        node: &NodeModel,
    ) -> Result<Vec<ActorSpec>, EngineError> {
        self.actors
            .task_actors(node, &exe.node_context())
            .await
            .map_err(|source| EngineError::ActorProvider { node_key: node.node_key.clone(), source })
    }

    /// Persist the live rows for `task` according to its performance type.
    pub(crate) async fn save_task(
        &self,
        s: &mut Session,
        exe: &mut Execution,
        task: TaskRow,
        mut actors: Vec<ActorSpec>,
    ) -> Result<Vec<TaskRow>, EngineError> {
        let mut created = Vec::new();
        match task.perform_type {
            PerformType::Timer | PerformType::Trigger => {
                history::insert_task(s, &task, &[]).await?;
                created.push(task);
            }
            PerformType::Single | PerformType::OrSign => {
                if actors.is_empty() {
                    return Err(EngineError::NoActors(task.task_key));
                }
                let rows: Vec<TaskActorRow> =
                    actors.iter().map(|a| TaskActorRow::for_task(&task, a)).collect();
                history::insert_task(s, &task, &rows).await?;
                created.push(task);
            }
            PerformType::Sort => {
                let first = exe
                    .next_actor
                    .take()
                    .or_else(|| actors.first().cloned())
                    .ok_or_else(|| EngineError::NoActors(task.task_key.clone()))?;
                let row = TaskActorRow::for_task(&task, &first);
                history::insert_task(s, &task, &[row]).await?;
                created.push(task);
            }
            PerformType::Countersign | PerformType::VoteSign => {
                if actors.is_empty() {
                    return Err(EngineError::NoActors(task.task_key));
                }
                if task.perform_type == PerformType::VoteSign {
                    share_vote_weights(&mut actors, &task.task_key)?;
                }
                for actor in &actors {
                    let row_task = task.renewed(task.create_time);
                    let row = TaskActorRow::for_task(&row_task, actor);
                    history::insert_task(s, &row_task, &[row]).await?;
                    created.push(row_task);
                }
            }
            PerformType::Start | PerformType::Copy => {
                return Err(EngineError::InvalidRequest(format!(
                    "{} tasks are archived directly",
                    task.perform_type
                )))
            }
        }

        for task in &created {
            s.task_event(TaskEventKind::Create, task, &exe.actor);
        }
        debug!(count = created.len(), "tasks created");
        Ok(created)
    }

    /// Archive the initiator's task at the start node.
    pub(crate) async fn save_start_task(
        &self,
        s: &mut Session,
        exe: &mut Execution,
        node: &NodeModel,
    ) -> Result<(), EngineError> {
        let task = self.task_base(exe, node, TaskType::Major);
        let his = HisTaskRow::archive(task, TaskState::Complete, &exe.actor.id, &exe.actor.name, Utc::now());
        DbError::ensure_rows("insert history task", 1, s.tx.insert_his_task(&his).await?)?;
        let creator = TaskActorRow::for_task(&his.task, &ActorSpec::user(exe.actor.id.clone(), exe.actor.name.clone()));
        DbError::ensure_rows("insert history actor", 1, s.tx.insert_his_task_actor(&creator).await?)?;
        s.task_event(TaskEventKind::Complete, &his.task, &exe.actor);
        exe.task = Some(his.task);
        Ok(())
    }

    /// Record a carbon copy as already completed history.
    async fn save_cc(&self, s: &mut Session, exe: &Execution, node: &NodeModel) -> Result<(), EngineError> {
        let recipients = self.resolve_actors(exe, node).await?;
        let task = self.task_base(exe, node, TaskType::Cc);
        let his = HisTaskRow::archive(task, TaskState::Complete, &exe.actor.id, &exe.actor.name, Utc::now());
        DbError::ensure_rows("insert history task", 1, s.tx.insert_his_task(&his).await?)?;
        for recipient in &recipients {
            let row = TaskActorRow::for_task(&his.task, recipient);
            DbError::ensure_rows("insert history actor", 1, s.tx.insert_his_task_actor(&row).await?)?;
        }
        s.task_event(TaskEventKind::Cc, &his.task, &exe.actor);
        debug!(recipients = recipients.len(), "carbon copy recorded");
        Ok(())
    }

    /// Start the sub-process of a call node.
    ///
    /// The open call task is recorded before the child starts so a child
    /// that finishes immediately can resume this instance.
    async fn call_process(&self, s: &mut Session, exe: &mut Execution, node: &NodeModel) -> Result<(), EngineError> {
        let target = node
            .call_process
            .as_deref()
            .ok_or_else(|| ModelError::MissingCallProcess(node.node_key.clone()))?;
        let process = self.resolve_call_target(s, exe.instance.tenant_id.as_deref(), target).await?;
        if process.state != ProcessState::Active {
            return Err(EngineError::ProcessInactive(process.id));
        }

        let child_id = Uuid::new_v4();
        let task = self.task_base(exe, node, TaskType::CallProcess);
        let mut his = HisTaskRow::archive(task, TaskState::Active, &exe.actor.id, &exe.actor.name, Utc::now());
        his.call_process_id = Some(process.id);
        his.call_instance_id = Some(child_id);
        DbError::ensure_rows("insert history task", 1, s.tx.insert_his_task(&his).await?)?;
        s.task_event(TaskEventKind::CallProcess, &his.task, &exe.actor);

        let mut options = StartOptions::default();
        options.parent_instance_id = Some(exe.instance.id);
        options.instance_id = Some(child_id);
        options.business_key = exe.instance.business_key.clone();
        info!(parent = %exe.instance.id, %child_id, process = %process.process_key, "starting sub-process");
        self.start_instance_in(s, process, exe.actor.clone(), exe.args.clone(), options).await?;
        Ok(())
    }

    /// `id:name`, a bare id, or a process key.
    async fn resolve_call_target(
        &self,
        s: &mut Session,
        tenant_id: Option<&str>,
        target: &str,
    ) -> Result<db::models::ProcessRow, EngineError> {
        let id_part = target.split_once(':').map_or(target, |(id, _)| id);
        if let Ok(id) = Uuid::parse_str(id_part.trim()) {
            return s
                .tx
                .get_process(id)
                .await?
                .ok_or_else(|| EngineError::ProcessNotFound(target.to_owned()));
        }
        s.tx
            .list_processes_by_key(tenant_id, target)
            .await?
            .into_iter()
            .find(|p| p.state == ProcessState::Active)
            .ok_or_else(|| EngineError::ProcessNotFound(target.to_owned()))
    }

    pub(crate) async fn fire_trigger(&self, exe: &Execution, node: &NodeModel) -> Result<(), EngineError> {
        let handler = node
            .trigger_id()
            .and_then(|id| self.triggers.get(id))
            .or(self.default_trigger.as_ref())
            .ok_or_else(|| EngineError::TriggerNotRegistered(node.node_key.clone()))?;
        handler
            .execute(node, &exe.node_context())
            .await
            .map_err(|source| EngineError::TriggerFailed { node_key: node.node_key.clone(), source })?;
        info!(node = %node.node_key, "trigger executed");
        Ok(())
    }

    /// Record `node` as the instance's current node.
    pub(crate) async fn update_current_node(
        &self,
        s: &mut Session,
        exe: &mut Execution,
        node: &NodeModel,
    ) -> Result<(), EngineError> {
        let mut instance = s
            .tx
            .get_instance(exe.instance.id)
            .await?
            .ok_or(EngineError::InstanceNotFound(exe.instance.id))?;
        instance.current_node_key = node.node_key.clone();
        instance.current_node_name = node.node_name.clone();
        instance.last_update_by = Some(exe.actor.name.clone());
        instance.last_update_time = Some(Utc::now());
        DbError::ensure_rows("update instance", 1, s.tx.update_instance(&instance).await?)?;
        exe.instance = instance;
        Ok(())
    }

    /// Check `actor` may act on `task`; returns the matching actor row.
    ///
    /// A task without actor rows is open to anyone. User rows match by id;
    /// role and department rows ask the actor provider.
    pub(crate) async fn ensure_allowed(
        &self,
        s: &mut Session,
        task: &TaskRow,
        node: &NodeModel,
        actor: &FlowActor,
    ) -> Result<Option<TaskActorRow>, EngineError> {
        let rows = s.tx.list_task_actors(task.id).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        for row in &rows {
            if row.actor_kind == ActorKind::User {
                if row.actor_id == actor.id {
                    return Ok(Some(row.clone()));
                }
                continue;
            }
            let allowed = self
                .actors
                .is_allowed(node, &actor.id, &row.to_spec())
                .await
                .map_err(|source| EngineError::ActorProvider { node_key: node.node_key.clone(), source })?;
            if allowed {
                return Ok(Some(row.clone()));
            }
        }
        Err(EngineError::PermissionDenied { actor_id: actor.id.clone(), task_id: task.id })
    }
}

/// Give unweighted vote-sign actors an equal share and cap the total at 100.
fn share_vote_weights(actors: &mut [ActorSpec], node_key: &str) -> Result<(), EngineError> {
    let share = 100 / actors.len() as u32;
    for actor in actors.iter_mut() {
        actor.weight.get_or_insert(share);
    }
    let total: u32 = actors.iter().filter_map(|a| a.weight).sum();
    if total > 100 {
        return Err(ModelError::InvalidWeight {
            node_key: node_key.to_owned(),
            reason: format!("vote weights sum to {total}"),
        }
        .into());
    }
    Ok(())
}
