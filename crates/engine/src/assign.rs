//! Changing who holds a task: delegate, transfer, resolve, and actor
//! add/remove.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use db::models::{TaskActorRow, TaskRow, TaskState, TaskType};
use db::{DbError, InstanceRepository, TaskRepository};
use model::{ActorSpec, ModelError, PerformType, Variables};

use crate::execution::{Execution, FlowActor};
use crate::history;
use crate::hooks::TaskEventKind;
use crate::session::Session;
use crate::{EngineError, FlowEngine};

impl FlowEngine {
    /// Load and lock a live task, check `actor` may act on it, and return
    /// the matching actor row.
    async fn held_task(
        &self,
        s: &mut Session,
        task_id: Uuid,
        actor: &FlowActor,
    ) -> Result<(TaskRow, Option<TaskActorRow>), EngineError> {
        let task = s.tx.get_task(task_id).await?.ok_or(EngineError::TaskNotFound(task_id))?;
        s.tx.lock_instance(task.instance_id).await?;
        let model = self.load_instance_model(s, task.instance_id).await?;
        let node = model
            .get_node(&task.task_key)
            .ok_or_else(|| EngineError::NodeNotFound(task.task_key.clone()))?;
        let row = self.ensure_allowed(s, &task, node, actor).await?;
        Ok((task, row))
    }

    pub(crate) async fn assign_in(
        &self,
        s: &mut Session,
        task_id: Uuid,
        actor: &FlowActor,
        assignee: ActorSpec,
        task_type: TaskType,
    ) -> Result<TaskRow, EngineError> {
        let (mut task, row) = self.held_task(s, task_id, actor).await?;
        if task.task_type == TaskType::Delegate {
            return Err(EngineError::AlreadyAssigned(task_id));
        }

        if let Some(row) = row {
            DbError::ensure_rows("delete task actor", 1, s.tx.delete_task_actor(row.id).await?)?;
        }
        let new_row = TaskActorRow::for_task(&task, &assignee);
        DbError::ensure_rows("insert task actor", 1, s.tx.insert_task_actor(&new_row).await?)?;

        // A transfer chain keeps its first assignor so sort order survives.
        if task_type == TaskType::Delegate || task.task_type != TaskType::Transfer {
            task.assignor_id = Some(actor.id.clone());
            task.assignor = Some(actor.name.clone());
        }
        task.task_type = task_type;
        DbError::ensure_rows("update task", 1, s.tx.update_task(&task).await?)?;

        let kind = if task_type == TaskType::Delegate { TaskEventKind::Delegate } else { TaskEventKind::Transfer };
        s.task_event(kind, &task, actor);
        info!(%task_id, to = %assignee.actor_id, %task_type, "task reassigned");
        Ok(task)
    }

    pub(crate) async fn resolve_in(
        &self,
        s: &mut Session,
        task_id: Uuid,
        actor: &FlowActor,
        args: Variables,
    ) -> Result<TaskRow, EngineError> {
        let (task, _) = self.held_task(s, task_id, actor).await?;
        self.merge_variables(s, task.instance_id, &args, actor).await?;
        self.return_delegation(s, task, actor).await
    }

    /// Hand a delegated task back to its assignor.
    pub(crate) async fn return_delegation(
        &self,
        s: &mut Session,
        mut task: TaskRow,
        actor: &FlowActor,
    ) -> Result<TaskRow, EngineError> {
        if task.task_type != TaskType::Delegate {
            return Err(EngineError::NotDelegated(task.id));
        }
        let (Some(assignor_id), Some(assignor)) = (task.assignor_id.clone(), task.assignor.clone()) else {
            return Err(EngineError::NotDelegated(task.id));
        };

        for row in s.tx.list_task_actors(task.id).await? {
            if row.actor_id == actor.id {
                DbError::ensure_rows("delete task actor", 1, s.tx.delete_task_actor(row.id).await?)?;
            }
        }
        let back = TaskActorRow::for_task(&task, &ActorSpec::user(assignor_id, assignor));
        DbError::ensure_rows("insert task actor", 1, s.tx.insert_task_actor(&back).await?)?;

        task.task_type = TaskType::DelegateReturn;
        task.assignor_id = Some(actor.id.clone());
        task.assignor = Some(actor.name.clone());
        DbError::ensure_rows("update task", 1, s.tx.update_task(&task).await?)?;
        s.task_event(TaskEventKind::Resolve, &task, actor);
        info!(task_id = %task.id, "delegated task resolved");
        Ok(task)
    }

    /// Countersign and vote-sign nodes get one new task per actor; other
    /// nodes get extra actor rows on the same task.
    pub(crate) async fn add_actors_in(
        &self,
        s: &mut Session,
        task_id: Uuid,
        actor: &FlowActor,
        actors: Vec<ActorSpec>,
    ) -> Result<(), EngineError> {
        let (task, _) = self.held_task(s, task_id, actor).await?;
        match task.perform_type {
            PerformType::Countersign | PerformType::VoteSign => {
                let siblings: Vec<TaskRow> = s
                    .tx
                    .list_tasks_by_instance(task.instance_id)
                    .await?
                    .into_iter()
                    .filter(|t| t.task_key == task.task_key)
                    .collect();
                let mut held = Vec::new();
                for sibling in &siblings {
                    held.extend(s.tx.list_task_actors(sibling.id).await?);
                }
                if task.perform_type == PerformType::VoteSign {
                    let total: u32 = held
                        .iter()
                        .filter_map(|r| r.weight)
                        .chain(actors.iter().filter_map(|a| a.weight))
                        .sum();
                    if total > 100 {
                        return Err(ModelError::InvalidWeight {
                            node_key: task.task_key.clone(),
                            reason: format!("vote weights sum to {total}"),
                        }
                        .into());
                    }
                }
                for spec in actors.iter().filter(|a| !held.iter().any(|r| r.actor_id == a.actor_id)) {
                    let added = task.renewed(Utc::now());
                    let row = TaskActorRow::for_task(&added, spec);
                    history::insert_task(s, &added, &[row]).await?;
                    s.task_event(TaskEventKind::AddActor, &added, actor);
                }
            }
            _ => {
                let held = s.tx.list_task_actors(task.id).await?;
                for spec in actors.iter().filter(|a| !held.iter().any(|r| r.actor_id == a.actor_id)) {
                    let row = TaskActorRow::for_task(&task, spec);
                    DbError::ensure_rows("insert task actor", 1, s.tx.insert_task_actor(&row).await?)?;
                }
                s.task_event(TaskEventKind::AddActor, &task, actor);
            }
        }
        info!(%task_id, added = actors.len(), "task actors added");
        Ok(())
    }

    /// The task must keep at least one actor.
    pub(crate) async fn remove_actors_in(
        &self,
        s: &mut Session,
        task_id: Uuid,
        actor: &FlowActor,
        actor_ids: &[String],
    ) -> Result<(), EngineError> {
        let (task, _) = self.held_task(s, task_id, actor).await?;
        match task.perform_type {
            PerformType::Countersign | PerformType::VoteSign => {
                let mut doomed = Vec::new();
                let mut kept = 0usize;
                for sibling in s.tx.list_tasks_by_instance(task.instance_id).await? {
                    if sibling.task_key != task.task_key {
                        continue;
                    }
                    let rows = s.tx.list_task_actors(sibling.id).await?;
                    if rows.iter().any(|r| actor_ids.contains(&r.actor_id)) {
                        doomed.push(sibling);
                    } else {
                        kept += 1;
                    }
                }
                if kept == 0 {
                    return Err(EngineError::InvalidRequest("cannot remove every actor of a task".into()));
                }
                for sibling in &doomed {
                    history::archive_task(s, sibling, TaskState::Revoked, actor).await?;
                    s.task_event(TaskEventKind::RemoveActor, sibling, actor);
                }
                if task.perform_type == PerformType::VoteSign {
                    self.recount_vote(s, &task, actor).await?;
                }
            }
            _ => {
                let rows = s.tx.list_task_actors(task.id).await?;
                let (doomed, kept): (Vec<_>, Vec<_>) =
                    rows.into_iter().partition(|r| actor_ids.contains(&r.actor_id));
                if kept.is_empty() {
                    return Err(EngineError::InvalidRequest("cannot remove every actor of a task".into()));
                }
                for row in &doomed {
                    DbError::ensure_rows("delete task actor", 1, s.tx.delete_task_actor(row.id).await?)?;
                }
                s.task_event(TaskEventKind::RemoveActor, &task, actor);
            }
        }
        info!(%task_id, removed = actor_ids.len(), "task actors removed");
        Ok(())
    }

    /// Re-run the pass rule once removed voters no longer hold weight, and
    /// advance when the vote now passes.
    async fn recount_vote(&self, s: &mut Session, task: &TaskRow, actor: &FlowActor) -> Result<(), EngineError> {
        let remaining: Vec<TaskRow> = s
            .tx
            .list_tasks_by_instance(task.instance_id)
            .await?
            .into_iter()
            .filter(|t| t.task_key == task.task_key)
            .collect();
        let Some(anchor) = remaining.first().cloned() else {
            return Ok(());
        };
        let model = self.load_instance_model(s, task.instance_id).await?;
        let node = model
            .get_node(&task.task_key)
            .ok_or_else(|| EngineError::NodeNotFound(task.task_key.clone()))?;
        if !self.close_passed_vote(s, node, &remaining, actor).await? {
            return Ok(());
        }
        let instance = s
            .tx
            .get_instance(task.instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(task.instance_id))?;
        let vars = instance.variables.clone();
        let mut exe = Execution::new(model.clone(), instance, Some(anchor), vars, actor.clone());
        self.continue_after(s, &mut exe, task.task_key.clone()).await
    }
}
