//! Graph traversal: node activation, branch selection and instance end.
//!
//! Traversal recurses through branches, joins and sub-process resumption,
//! so the recursive entry points return boxed futures.

use futures::future::BoxFuture;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chrono::Utc;
use db::models::{duration_ms, InstanceState, TaskState, TaskType};
use db::{DbError, HistoryRepository, InstanceRepository, TaskRepository};
use model::{ConditionNode, NodeKind, NodeModel, Successor, Variables};

use crate::cache::CacheKey;
use crate::execution::{Execution, FlowActor};
use crate::history;
use crate::hooks::InstanceEventKind;
use crate::session::Session;
use crate::{EngineError, FlowEngine};

impl FlowEngine {
    /// Activate the node `node_key` of the execution's model.
    pub(crate) fn execute_node<'a>(
        &'a self,
        s: &'a mut Session,
        exe: &'a mut Execution,
        node_key: String,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let model = exe.model.clone();
            let node = model
                .get_node(&node_key)
                .ok_or_else(|| EngineError::NodeNotFound(node_key.clone()))?;
            debug!(node = %node.node_key, kind = %node.kind, "activating node");

            match node.kind {
                NodeKind::ConditionBranch => {
                    let branch = self.select_condition(node, &exe.args)?;
                    self.enter_branch(s, exe, node, branch).await
                }
                NodeKind::InclusiveBranch => {
                    for branch in self.select_inclusive(node, &exe.args)? {
                        self.enter_branch(s, exe, node, branch).await?;
                    }
                    Ok(())
                }
                NodeKind::ParallelBranch => {
                    for root in &node.parallel_nodes {
                        let target = match (root.kind, root.child_node.as_deref()) {
                            (NodeKind::ConditionNode, Some(child)) => child,
                            _ => root,
                        };
                        self.execute_node(s, exe, target.node_key.clone()).await?;
                    }
                    Ok(())
                }
                NodeKind::ConditionNode => match node.child_node.as_deref() {
                    Some(child) => self.execute_node(s, exe, child.node_key.clone()).await,
                    None => self.continue_after(s, exe, node.node_key.clone()).await,
                },
                NodeKind::Start => self.continue_after(s, exe, node.node_key.clone()).await,
                NodeKind::End => self.end_instance(s, exe, Some(node.node_key.clone())).await,
                NodeKind::Approval
                | NodeKind::Cc
                | NodeKind::CallProcess
                | NodeKind::Timer
                | NodeKind::Trigger => self.create_task(s, exe, node).await,
            }
        })
    }

    /// Advance past the completed node `node_key`.
    pub(crate) fn continue_after<'a>(
        &'a self,
        s: &'a mut Session,
        exe: &'a mut Execution,
        node_key: String,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let active: Vec<String> = s
                .tx
                .list_tasks_by_instance(exe.instance.id)
                .await?
                .into_iter()
                .map(|t| t.task_key)
                .collect();
            let model = exe.model.clone();

            match model.successor(&node_key, &active)? {
                Successor::Node(next) => self.execute_node(s, exe, next.node_key.clone()).await,
                Successor::Waiting => {
                    debug!(node = %node_key, "join waiting on sibling branches");
                    Ok(())
                }
                Successor::Exhausted if active.is_empty() => {
                    self.end_instance(s, exe, Some(node_key)).await
                }
                Successor::Exhausted => Ok(()),
            }
        })
    }

    /// Enter the chosen branch of a condition or inclusive node.
    async fn enter_branch(
        &self,
        s: &mut Session,
        exe: &mut Execution,
        branch_node: &NodeModel,
        branch: &ConditionNode,
    ) -> Result<(), EngineError> {
        let target = branch.child_node.as_deref().or(branch_node.child_node.as_deref());
        debug!(branch = %branch.node_key, "branch selected");
        match target {
            Some(node) => self.execute_node(s, exe, node.node_key.clone()).await,
            None => self.continue_after(s, exe, branch_node.node_key.clone()).await,
        }
    }

    /// First matching branch by ascending priority, else the default.
    fn select_condition<'n>(
        &self,
        node: &'n NodeModel,
        args: &Variables,
    ) -> Result<&'n ConditionNode, EngineError> {
        let mut ordered: Vec<&ConditionNode> = node.condition_nodes.iter().collect();
        ordered.sort_by_key(|c| c.priority_level);
        for branch in &ordered {
            if !branch.is_default() && self.expression.eval(&branch.condition_list, args)? {
                return Ok(branch);
            }
        }
        ordered
            .into_iter()
            .find(|c| c.is_default())
            .ok_or_else(|| EngineError::NoConditionMatched(node.node_key.clone()))
    }

    /// Every matching branch, or the default when none match.
    fn select_inclusive<'n>(
        &self,
        node: &'n NodeModel,
        args: &Variables,
    ) -> Result<Vec<&'n ConditionNode>, EngineError> {
        let mut ordered: Vec<&ConditionNode> = node.inclusive_nodes.iter().collect();
        ordered.sort_by_key(|c| c.priority_level);
        let mut matched = Vec::new();
        for branch in &ordered {
            if !branch.is_default() && self.expression.eval(&branch.condition_list, args)? {
                matched.push(*branch);
            }
        }
        if matched.is_empty() {
            let default = ordered
                .into_iter()
                .find(|c| c.is_default())
                .ok_or_else(|| EngineError::NoConditionMatched(node.node_key.clone()))?;
            matched.push(default);
        }
        Ok(matched)
    }

    /// Archive the instance as complete and resume its parent, if any.
    pub(crate) fn end_instance<'a>(
        &'a self,
        s: &'a mut Session,
        exe: &'a mut Execution,
        end_key: Option<String>,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let instance_id = exe.instance.id;
            let Some(mut instance) = s.tx.get_instance(instance_id).await? else {
                debug!(%instance_id, "instance already ended");
                return Ok(());
            };

            let open = s.tx.list_tasks_by_instance(instance_id).await?;
            if open.iter().any(|t| t.task_type == TaskType::Major) {
                return Err(EngineError::UnfinishedMajorTask(instance_id));
            }
            for task in &open {
                history::archive_task(s, task, TaskState::Complete, &exe.actor).await?;
            }

            if let Some(node) = end_key.as_deref().and_then(|k| exe.model.get_node(k)) {
                instance.current_node_key = node.node_key.clone();
                instance.current_node_name = node.node_name.clone();
            }
            history::archive_instance(s, &instance, InstanceState::Complete).await?;
            self.cache.invalidate(&CacheKey::Instance(instance_id));
            s.instance_event(InstanceEventKind::End, &instance, &exe.actor);
            info!(%instance_id, "instance completed");

            if let Some(parent_id) = instance.parent_instance_id {
                self.resume_parent(s, parent_id, instance_id, &exe.actor).await?;
            }
            Ok(())
        })
    }

    /// Close the call task that spawned `child_id` and advance the parent.
    async fn resume_parent(
        &self,
        s: &mut Session,
        parent_id: Uuid,
        child_id: Uuid,
        actor: &FlowActor,
    ) -> Result<(), EngineError> {
        let Some(mut call) = s.tx.find_his_task_by_call_instance(child_id).await? else {
            warn!(%parent_id, %child_id, "no call task recorded for sub-process");
            return Ok(());
        };
        let now = Utc::now();
        call.state = TaskState::Complete;
        call.finish_id = actor.id.clone();
        call.finish_by = actor.name.clone();
        call.finish_time = now;
        call.duration_ms = duration_ms(call.task.create_time, now);
        DbError::ensure_rows("update call task", 1, s.tx.update_his_task(&call).await?)?;

        let parent = s
            .tx
            .get_instance(parent_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(parent_id))?;
        let model = self.load_instance_model(s, parent_id).await?;
        let args = parent.variables.clone();
        let mut parent_exe = Execution::new(model, parent, Some(call.task.clone()), args, actor.clone());
        info!(%parent_id, %child_id, "resuming parent instance");
        self.continue_after(s, &mut parent_exe, call.task.task_key.clone()).await
    }
}
