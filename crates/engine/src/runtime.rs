//! Instance lifecycle: start, forced completion, variables and model
//! mutation.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, info};
use uuid::Uuid;

use db::models::{
    InstanceModelRow, InstanceRow, InstanceState, ProcessRow, ProcessState, TaskState,
};
use db::{DbError, HistoryRepository, InstanceRepository, ProcessRepository, TaskRepository};
use model::{validate_model, InsertPosition, NodeModel, ProcessModel, Variables};

use crate::cache::CacheKey;
use crate::execution::{Execution, FlowActor};
use crate::flow::{ProcessRef, StartOptions};
use crate::history;
use crate::hooks::{InstanceEventKind, TaskEventKind};
use crate::session::Session;
use crate::{EngineError, FlowEngine};

impl FlowEngine {
    /// Create the instance rows, archive the initiator's start task and run
    /// until the instance waits or ends.
    pub(crate) fn start_instance_in<'a>(
        &'a self,
        s: &'a mut Session,
        process: ProcessRow,
        actor: FlowActor,
        args: Variables,
        options: StartOptions,
    ) -> BoxFuture<'a, Result<InstanceRow, EngineError>> {
        Box::pin(async move {
            if process.state != ProcessState::Active {
                return Err(EngineError::ProcessInactive(process.id));
            }
            let definition = self.cache.get_or_parse(CacheKey::Process(process.id), &process.model_content)?;
            let content = if options.assignees.is_empty() {
                process.model_content.clone()
            } else {
                let mut private = (*definition).clone();
                private.apply_dynamic_assignees(&options.assignees)?;
                private.to_json()?
            };

            let start = definition.start_node()?;
            let now = Utc::now();
            let instance = InstanceRow {
                id: options.instance_id.unwrap_or_else(Uuid::new_v4),
                tenant_id: actor.tenant_id.clone(),
                process_id: process.id,
                parent_instance_id: options.parent_instance_id,
                priority: options.priority,
                business_key: options.business_key.clone(),
                variables: args.clone(),
                current_node_name: start.node_name.clone(),
                current_node_key: start.node_key.clone(),
                create_id: actor.id.clone(),
                create_by: actor.name.clone(),
                create_time: now,
                last_update_by: None,
                last_update_time: None,
            };
            DbError::ensure_rows("insert instance", 1, s.tx.insert_instance(&instance).await?)?;
            let model_row = InstanceModelRow {
                instance_id: instance.id,
                process_id: process.id,
                model_content: content,
            };
            DbError::ensure_rows("insert instance model", 1, s.tx.insert_instance_model(&model_row).await?)?;
            s.instance_event(InstanceEventKind::Start, &instance, &actor);

            let model = self.cache.get_or_parse(CacheKey::Instance(instance.id), &model_row.model_content)?;
            let start = model.start_node()?.clone();
            let mut exe = Execution::new(model, instance.clone(), None, args, actor);
            self.save_start_task(s, &mut exe, &start).await?;
            info!(instance_id = %instance.id, process = %process.process_key, "instance created");
            self.continue_after(s, &mut exe, start.node_key.clone()).await?;
            Ok(instance)
        })
    }

    /// Close the whole instance family of `instance_id` under `state`.
    ///
    /// The walk climbs to the root instance, then closes every descendant
    /// (children before parents) together with their open tasks.
    pub(crate) async fn force_complete_in(
        &self,
        s: &mut Session,
        instance_id: Uuid,
        actor: &FlowActor,
        state: InstanceState,
    ) -> Result<(), EngineError> {
        let mut root = s
            .tx
            .get_instance(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;
        s.tx.lock_instance(root.id).await?;
        while let Some(parent_id) = root.parent_instance_id {
            match s.tx.get_instance(parent_id).await? {
                Some(parent) => root = parent,
                None => break,
            }
        }

        let mut family = vec![root];
        let mut cursor = 0;
        while cursor < family.len() {
            let children = s.tx.list_instances_by_parent(family[cursor].id).await?;
            family.extend(children);
            cursor += 1;
        }

        let task_state = TaskState::from(state);
        let (instance_event, task_event) = match state {
            InstanceState::Rejected => (InstanceEventKind::Reject, TaskEventKind::Reject),
            InstanceState::Expired => (InstanceEventKind::Expire, TaskEventKind::Terminate),
            InstanceState::Revoked => (InstanceEventKind::Revoke, TaskEventKind::Terminate),
            _ => (InstanceEventKind::Terminate, TaskEventKind::Terminate),
        };
        for instance in family.iter().rev() {
            for task in s.tx.list_tasks_by_instance(instance.id).await? {
                history::archive_task(s, &task, task_state, actor).await?;
                s.task_event(task_event, &task, actor);
            }
            for mut call in s.tx.list_his_tasks_by_instance(instance.id).await? {
                if call.state == TaskState::Active {
                    call.state = task_state;
                    call.finish_id = actor.id.clone();
                    call.finish_by = actor.name.clone();
                    call.finish_time = Utc::now();
                    DbError::ensure_rows("update call task", 1, s.tx.update_his_task(&call).await?)?;
                }
            }
            history::archive_instance(s, instance, state).await?;
            self.cache.invalidate(&CacheKey::Instance(instance.id));
            s.instance_event(instance_event, instance, actor);
            debug!(instance_id = %instance.id, %state, "instance closed");
        }
        info!(%instance_id, closed = family.len(), %state, "instance family closed");
        Ok(())
    }

    pub(crate) async fn add_variables_in(
        &self,
        s: &mut Session,
        instance_id: Uuid,
        args: Variables,
        actor: &FlowActor,
    ) -> Result<InstanceRow, EngineError> {
        s.tx.lock_instance(instance_id).await?;
        let mut instance = s
            .tx
            .get_instance(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;
        instance.variables.extend(args);
        instance.last_update_by = Some(actor.name.clone());
        instance.last_update_time = Some(Utc::now());
        DbError::ensure_rows("update instance", 1, s.tx.update_instance(&instance).await?)?;
        Ok(instance)
    }

    pub(crate) async fn insert_node_in(
        &self,
        s: &mut Session,
        task_id: Uuid,
        node: NodeModel,
        position: InsertPosition,
        actor: &FlowActor,
    ) -> Result<(), EngineError> {
        let task = s.tx.get_task(task_id).await?.ok_or(EngineError::TaskNotFound(task_id))?;
        s.tx.lock_instance(task.instance_id).await?;
        let model = self.load_instance_model(s, task.instance_id).await?;
        let anchor = model
            .get_node(&task.task_key)
            .ok_or_else(|| EngineError::NodeNotFound(task.task_key.clone()))?;
        self.ensure_allowed(s, &task, anchor, actor).await?;

        let new_key = node.node_key.clone();
        let mut private = (*model).clone();
        private.insert_node(&task.task_key, node, position)?;
        validate_model(&private)?;

        let mut row = s
            .tx
            .get_instance_model(task.instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(task.instance_id))?;
        row.model_content = private.to_json()?;
        DbError::ensure_rows("update instance model", 1, s.tx.update_instance_model(&row).await?)?;
        self.cache.invalidate(&CacheKey::Instance(task.instance_id));
        info!(%task_id, node = %new_key, ?position, "node inserted");

        if position == InsertPosition::Before {
            self.jump_in(s, task_id, Some(new_key), actor, Variables::new()).await?;
        }
        Ok(())
    }

    /// Parsed private model of a running instance.
    pub(crate) async fn load_instance_model(
        &self,
        s: &mut Session,
        instance_id: Uuid,
    ) -> Result<Arc<ProcessModel>, EngineError> {
        let row = s
            .tx
            .get_instance_model(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;
        Ok(self.cache.get_or_parse(CacheKey::Instance(instance_id), &row.model_content)?)
    }

    pub(crate) async fn resolve_process(
        &self,
        s: &mut Session,
        tenant_id: Option<&str>,
        process: &ProcessRef,
    ) -> Result<ProcessRow, EngineError> {
        match process {
            ProcessRef::Id(id) => s
                .tx
                .get_process(*id)
                .await?
                .ok_or_else(|| EngineError::ProcessNotFound(id.to_string())),
            ProcessRef::Key { key, version } => s
                .tx
                .list_processes_by_key(tenant_id, key)
                .await?
                .into_iter()
                .find(|p| match version {
                    Some(v) => p.process_version == *v,
                    None => p.state == ProcessState::Active,
                })
                .ok_or_else(|| EngineError::ProcessNotFound(key.clone())),
        }
    }
}
