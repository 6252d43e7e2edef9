//! Task completion and the performance-type rules that decide whether a
//! node is done.

use chrono::Utc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use db::models::{InstanceRow, TaskRow, TaskState, TaskType};
use db::{DbError, HistoryRepository, InstanceRepository, TaskRepository};
use model::{ActorSpec, NodeModel, PerformType, Variables};

use crate::execution::{Execution, FlowActor};
use crate::history;
use crate::hooks::TaskEventKind;
use crate::session::Session;
use crate::{EngineError, FlowEngine};

/// How a task is being completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// By an actor, with a permission check.
    Manual,
    Auto,
    AutoJump,
}

impl Completion {
    fn state(self) -> TaskState {
        match self {
            Self::Manual   => TaskState::Complete,
            Self::Auto     => TaskState::AutoComplete,
            Self::AutoJump => TaskState::AutoJump,
        }
    }

    fn event(self) -> TaskEventKind {
        match self {
            Self::Manual   => TaskEventKind::Complete,
            Self::Auto     => TaskEventKind::AutoComplete,
            Self::AutoJump => TaskEventKind::AutoJump,
        }
    }
}

impl FlowEngine {
    #[instrument(skip(self, s, actor, args), fields(actor = %actor.id))]
    pub(crate) async fn complete_task(
        &self,
        s: &mut Session,
        task_id: Uuid,
        actor: &FlowActor,
        args: Variables,
        completion: Completion,
    ) -> Result<(), EngineError> {
        let task = s.tx.get_task(task_id).await?.ok_or(EngineError::TaskNotFound(task_id))?;
        s.tx.lock_instance(task.instance_id).await?;
        // Re-read under the lock: a concurrent completion may have archived it.
        let task = s.tx.get_task(task_id).await?.ok_or(EngineError::TaskNotFound(task_id))?;

        let model = self.load_instance_model(s, task.instance_id).await?;
        let node = model
            .get_node(&task.task_key)
            .ok_or_else(|| EngineError::NodeNotFound(task.task_key.clone()))?;

        if completion == Completion::Manual {
            self.ensure_allowed(s, &task, node, actor).await?;
            if task.task_type == TaskType::Delegate {
                self.merge_variables(s, task.instance_id, &args, actor).await?;
                self.return_delegation(s, task, actor).await?;
                return Ok(());
            }
        }

        let instance = self.merge_variables(s, task.instance_id, &args, actor).await?;
        history::archive_task(s, &task, completion.state(), actor).await?;
        s.task_event(completion.event(), &task, actor);
        info!(task_id = %task.id, node = %task.task_key, "task completed");

        let vars = instance.variables.clone();
        let mut exe = Execution::new(model.clone(), instance, Some(task.clone()), vars, actor.clone());
        self.after_done(s, &mut exe, &task, node).await
    }

    /// Apply the node's performance rule, then advance if the node is done.
    async fn after_done(
        &self,
        s: &mut Session,
        exe: &mut Execution,
        task: &TaskRow,
        node: &NodeModel,
    ) -> Result<(), EngineError> {
        match task.perform_type {
            PerformType::Countersign => {
                if !self.remaining_at(s, task).await?.is_empty() {
                    debug!(node = %task.task_key, "countersign waiting on other actors");
                    return Ok(());
                }
            }
            PerformType::VoteSign => {
                let remaining = self.remaining_at(s, task).await?;
                if !remaining.is_empty() && !self.close_passed_vote(s, node, &remaining, &exe.actor).await? {
                    return Ok(());
                }
            }
            PerformType::Sort => {
                if let Some(next) = self.next_sort_actor(s, exe, task, node).await? {
                    debug!(next = %next.actor_id, "handing sort task to next actor");
                    exe.next_actor = Some(next);
                    let base = self.task_base(exe, node, TaskType::Approval);
                    self.save_task(s, exe, base, Vec::new()).await?;
                    return Ok(());
                }
            }
            PerformType::Trigger => self.fire_trigger(exe, node).await?,
            _ => {}
        }
        self.continue_after(s, exe, task.task_key.clone()).await
    }

    /// Apply the vote-sign pass rule to the node's still open `remaining`
    /// tasks: weight not held by an open task counts as cast. On a pass the
    /// open tasks are closed and `true` is returned.
    pub(crate) async fn close_passed_vote(
        &self,
        s: &mut Session,
        node: &NodeModel,
        remaining: &[TaskRow],
        actor: &FlowActor,
    ) -> Result<bool, EngineError> {
        let mut outstanding = 0u32;
        for open in remaining {
            for row in s.tx.list_task_actors(open.id).await? {
                outstanding += row.weight.unwrap_or(0);
            }
        }
        let voted = 100u32.saturating_sub(outstanding);
        let pass = node.pass_weight.unwrap_or(self.config.default_pass_weight);
        if voted < pass {
            debug!(voted, pass, "vote below pass weight");
            return Ok(false);
        }
        for open in remaining {
            history::archive_task(s, open, TaskState::VoteClosed, actor).await?;
            s.task_event(TaskEventKind::VoteClosed, open, actor);
        }
        info!(voted, pass, node = %node.node_key, "vote passed");
        Ok(true)
    }

    /// Other live tasks at the same node.
    async fn remaining_at(&self, s: &mut Session, task: &TaskRow) -> Result<Vec<TaskRow>, EngineError> {
        Ok(s
            .tx
            .list_tasks_by_instance(task.instance_id)
            .await?
            .into_iter()
            .filter(|t| t.task_key == task.task_key && t.id != task.id)
            .collect())
    }

    /// The actor after the current holder in the node's ordered list.
    async fn next_sort_actor(
        &self,
        s: &mut Session,
        exe: &Execution,
        task: &TaskRow,
        node: &NodeModel,
    ) -> Result<Option<ActorSpec>, EngineError> {
        let current = if task.task_type == TaskType::Transfer {
            task.assignor_id.clone()
        } else {
            s.tx.list_his_task_actors(task.id).await?.first().map(|a| a.actor_id.clone())
        };
        let current = current.unwrap_or_else(|| exe.actor.id.clone());

        let ordered = self.resolve_actors(exe, node).await?;
        Ok(ordered
            .iter()
            .position(|a| a.actor_id == current)
            .and_then(|pos| ordered.get(pos + 1))
            .cloned())
    }

    /// Add `args` to the instance variables; existing keys keep their value.
    pub(crate) async fn merge_variables(
        &self,
        s: &mut Session,
        instance_id: Uuid,
        args: &Variables,
        actor: &FlowActor,
    ) -> Result<InstanceRow, EngineError> {
        let mut instance = s
            .tx
            .get_instance(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;
        if args.is_empty() {
            return Ok(instance);
        }
        for (key, value) in args {
            instance.variables.entry(key.clone()).or_insert_with(|| value.clone());
        }
        instance.last_update_by = Some(actor.name.clone());
        instance.last_update_time = Some(Utc::now());
        DbError::ensure_rows("update instance", 1, s.tx.update_instance(&instance).await?)?;
        Ok(instance)
    }
}
