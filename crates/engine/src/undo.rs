//! Operations that move an instance backwards: reject, withdraw, reclaim
//! and jump.

use tracing::{debug, info};
use uuid::Uuid;

use db::models::{HisTaskActorRow, HisTaskRow, TaskRow, TaskState, TaskType};
use db::{HistoryRepository, InstanceRepository, TaskRepository};
use model::{ActorSpec, NodeKind, PerformType, Variables};

use crate::execution::{Execution, FlowActor};
use crate::history;
use crate::hooks::TaskEventKind;
use crate::session::Session;
use crate::{EngineError, FlowEngine};

impl FlowEngine {
    pub(crate) async fn reject_in(
        &self,
        s: &mut Session,
        task_id: Uuid,
        actor: &FlowActor,
        args: Variables,
        automatic: bool,
    ) -> Result<Vec<TaskRow>, EngineError> {
        let task = s.tx.get_task(task_id).await?.ok_or(EngineError::TaskNotFound(task_id))?;
        s.tx.lock_instance(task.instance_id).await?;
        let model = self.load_instance_model(s, task.instance_id).await?;
        let node = model
            .get_node(&task.task_key)
            .ok_or_else(|| EngineError::NodeNotFound(task.task_key.clone()))?;
        if !automatic {
            self.ensure_allowed(s, &task, node, actor).await?;
        }
        let parent_id = task.parent_task_id.ok_or(EngineError::NoParentTask(task_id))?;
        let parent = s
            .tx
            .get_his_task(parent_id)
            .await?
            .ok_or(EngineError::HistoryTaskNotFound(parent_id))?;

        self.merge_variables(s, task.instance_id, &args, actor).await?;
        let state = if automatic { TaskState::AutoReject } else { TaskState::Rejected };
        history::archive_task(s, &task, state, actor).await?;
        s.task_event(TaskEventKind::Reject, &task, actor);

        if matches!(task.perform_type, PerformType::Countersign | PerformType::VoteSign) {
            for sibling in s.tx.list_tasks_by_instance(task.instance_id).await? {
                if sibling.task_key == task.task_key {
                    history::archive_task(s, &sibling, state, actor).await?;
                }
            }
        }

        let restored = self.undo_his_task(s, &parent, actor).await?;
        info!(%task_id, to = %parent.task.task_key, "task rejected");
        Ok(restored)
    }

    pub(crate) async fn withdraw_in(
        &self,
        s: &mut Session,
        his_task_id: Uuid,
        actor: &FlowActor,
    ) -> Result<Vec<TaskRow>, EngineError> {
        let his = self.finished_by(s, his_task_id, actor).await?;

        let mut downstream = Vec::new();
        if his.task.perform_type == PerformType::Countersign {
            downstream = s.tx.list_tasks_by_parent(his.id()).await?;
        } else {
            for id in self.sibling_history_ids(s, &his).await? {
                downstream.extend(s.tx.list_tasks_by_parent(id).await?);
            }
        }
        if downstream.is_empty() {
            return Err(EngineError::NothingToWithdraw(his_task_id));
        }

        for task in &downstream {
            history::delete_task(s, task).await?;
            s.task_event(TaskEventKind::Withdraw, task, actor);
        }
        let restored = self.undo_his_task(s, &his, actor).await?;
        info!(%his_task_id, removed = downstream.len(), "task withdrawn");
        Ok(restored)
    }

    pub(crate) async fn reclaim_in(
        &self,
        s: &mut Session,
        his_task_id: Uuid,
        actor: &FlowActor,
    ) -> Result<Vec<TaskRow>, EngineError> {
        let his = self.finished_by(s, his_task_id, actor).await?;

        // Sequential and countersign nodes may still hold open siblings; only
        // require untouched successors once the node itself is done.
        let node_done = match (his.task.perform_type, his.task.parent_task_id) {
            (PerformType::Sort | PerformType::Countersign, Some(parent)) => {
                s.tx.list_tasks_by_parent(parent).await?.is_empty()
            }
            _ => true,
        };
        if node_done && s.tx.list_tasks_by_parent(his.id()).await?.is_empty() {
            return Err(EngineError::ReclaimNotAllowed {
                task_id: his_task_id,
                reason: "downstream tasks already processed",
            });
        }

        let active = s.tx.list_tasks_by_instance(his.task.instance_id).await?;
        let Some(first) = active.first() else {
            return Err(EngineError::ReclaimNotAllowed { task_id: his_task_id, reason: "no active tasks" });
        };
        if first.perform_type != PerformType::Countersign && first.parent_task_id != Some(his.id()) {
            return Err(EngineError::ReclaimNotAllowed {
                task_id: his_task_id,
                reason: "active tasks do not follow this task",
            });
        }

        for task in &active {
            history::archive_task(s, task, TaskState::Revoked, actor).await?;
            s.task_event(TaskEventKind::Reclaim, task, actor);
        }
        let restored = self.undo_his_task(s, &his, actor).await?;
        info!(%his_task_id, revoked = active.len(), "task reclaimed");
        Ok(restored)
    }

    pub(crate) async fn jump_in(
        &self,
        s: &mut Session,
        task_id: Uuid,
        target: Option<String>,
        actor: &FlowActor,
        args: Variables,
    ) -> Result<(), EngineError> {
        let task = s.tx.get_task(task_id).await?.ok_or(EngineError::TaskNotFound(task_id))?;
        s.tx.lock_instance(task.instance_id).await?;
        let model = self.load_instance_model(s, task.instance_id).await?;
        let node = model
            .get_node(&task.task_key)
            .ok_or_else(|| EngineError::NodeNotFound(task.task_key.clone()))?;
        self.ensure_allowed(s, &task, node, actor).await?;

        let target = match target {
            Some(key) => model.get_node(&key).ok_or(EngineError::NodeNotFound(key))?,
            None => model
                .parent_of(&task.task_key)
                .ok_or_else(|| EngineError::NodeNotFound(task.task_key.clone()))?,
        };

        let instance = self.merge_variables(s, task.instance_id, &args, actor).await?;
        for open in s.tx.list_tasks_by_instance(task.instance_id).await? {
            history::archive_task(s, &open, TaskState::Jump, actor).await?;
            s.task_event(TaskEventKind::Jump, &open, actor);
        }

        let vars = instance.variables.clone();
        let mut exe = Execution::new(model.clone(), instance, Some(task.clone()), vars, actor.clone());
        info!(%task_id, from = %task.task_key, to = %target.node_key, "jumping");
        if target.kind == NodeKind::Start {
            // Back to the initiator.
            self.update_current_node(s, &mut exe, target).await?;
            let restart = self.task_base(&exe, target, TaskType::Major);
            let creator = ActorSpec::user(exe.instance.create_id.clone(), exe.instance.create_by.clone());
            let row = db::models::TaskActorRow::for_task(&restart, &creator);
            history::insert_task(s, &restart, &[row]).await?;
            s.task_event(TaskEventKind::Create, &restart, actor);
            Ok(())
        } else {
            self.execute_node(s, &mut exe, target.node_key.clone()).await
        }
    }

    /// Bring an archived task back to life and point the instance at it.
    ///
    /// Countersign and vote-sign tasks restore the whole group: the latest
    /// archived row of every signer with the same parent and node, weights
    /// included. Signers still holding a live task at the node are skipped.
    pub(crate) async fn undo_his_task(
        &self,
        s: &mut Session,
        his: &HisTaskRow,
        actor: &FlowActor,
    ) -> Result<Vec<TaskRow>, EngineError> {
        let mut latest: Vec<(String, HisTaskRow, Vec<HisTaskActorRow>)> = Vec::new();
        if matches!(his.task.perform_type, PerformType::Countersign | PerformType::VoteSign) {
            let mut live = Vec::new();
            for task in s.tx.list_tasks_by_instance(his.task.instance_id).await? {
                if task.task_key == his.task.task_key {
                    live.extend(s.tx.list_task_actors(task.id).await?.into_iter().map(|a| a.actor_id));
                }
            }
            let group = match his.task.parent_task_id {
                Some(parent) => s.tx.list_his_tasks_by_parent(parent).await?,
                None => vec![his.clone()],
            };
            for row in group {
                if row.task.instance_id != his.task.instance_id || row.task.task_key != his.task.task_key {
                    continue;
                }
                let actors = s.tx.list_his_task_actors(row.id()).await?;
                let signer = actors.first().map(|a| a.actor_id.clone()).unwrap_or_default();
                if live.contains(&signer) {
                    continue;
                }
                match latest.iter_mut().find(|(id, _, _)| *id == signer) {
                    Some(entry) => *entry = (signer, row, actors),
                    None => latest.push((signer, row, actors)),
                }
            }
        } else {
            let actors = s.tx.list_his_task_actors(his.id()).await?;
            latest.push((String::new(), his.clone(), actors));
        }

        let mut restored = Vec::new();
        for (_, row, actors) in &latest {
            let task = history::restore_task(s, row, actors).await?;
            s.task_event(TaskEventKind::Recreate, &task, actor);
            restored.push(task);
        }

        let mut instance = s
            .tx
            .get_instance(his.task.instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(his.task.instance_id))?;
        instance.current_node_key = his.task.task_key.clone();
        instance.current_node_name = his.task.task_name.clone();
        instance.last_update_by = Some(actor.name.clone());
        instance.last_update_time = Some(chrono::Utc::now());
        db::DbError::ensure_rows("update instance", 1, s.tx.update_instance(&instance).await?)?;
        debug!(restored = restored.len(), node = %his.task.task_key, "history task undone");
        Ok(restored)
    }

    /// History task `his_task_id`, checked to be finished by `actor` on a
    /// still running instance.
    async fn finished_by(
        &self,
        s: &mut Session,
        his_task_id: Uuid,
        actor: &FlowActor,
    ) -> Result<HisTaskRow, EngineError> {
        let his = s
            .tx
            .get_his_task(his_task_id)
            .await?
            .ok_or(EngineError::HistoryTaskNotFound(his_task_id))?;
        s.tx.lock_instance(his.task.instance_id).await?;
        if s.tx.get_instance(his.task.instance_id).await?.is_none() {
            return Err(EngineError::InstanceNotFound(his.task.instance_id));
        }
        if his.finish_id != actor.id {
            return Err(EngineError::PermissionDenied { actor_id: actor.id.clone(), task_id: his_task_id });
        }
        Ok(his)
    }

    /// Ids of history rows at the same node sharing `his`'s parent.
    async fn sibling_history_ids(&self, s: &mut Session, his: &HisTaskRow) -> Result<Vec<Uuid>, EngineError> {
        let Some(parent) = his.task.parent_task_id else {
            return Ok(vec![his.id()]);
        };
        Ok(s
            .tx
            .list_his_tasks_by_parent(parent)
            .await?
            .into_iter()
            .filter(|h| h.task.instance_id == his.task.instance_id && h.task.task_key == his.task.task_key)
            .map(|h| h.id())
            .collect())
    }
}
