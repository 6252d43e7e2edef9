//! Read-only lookups.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use db::models::{HisInstanceRow, HisTaskActorRow, HisTaskRow, InstanceRow, TaskActorRow, TaskRow};
use db::{HistoryRepository, InstanceRepository, TaskRepository};

use crate::session::Session;
use crate::{EngineError, FlowEngine};

impl FlowEngine {
    pub(crate) async fn query_instance(&self, s: &mut Session, id: Uuid) -> Result<Option<InstanceRow>, EngineError> {
        Ok(s.tx.get_instance(id).await?)
    }

    pub(crate) async fn query_his_instance(
        &self,
        s: &mut Session,
        id: Uuid,
    ) -> Result<Option<HisInstanceRow>, EngineError> {
        Ok(s.tx.get_his_instance(id).await?)
    }

    pub(crate) async fn query_active_tasks(&self, s: &mut Session, instance_id: Uuid) -> Result<Vec<TaskRow>, EngineError> {
        Ok(s.tx.list_tasks_by_instance(instance_id).await?)
    }

    pub(crate) async fn query_task_actors(&self, s: &mut Session, task_id: Uuid) -> Result<Vec<TaskActorRow>, EngineError> {
        Ok(s.tx.list_task_actors(task_id).await?)
    }

    pub(crate) async fn query_his_tasks(&self, s: &mut Session, instance_id: Uuid) -> Result<Vec<HisTaskRow>, EngineError> {
        Ok(s.tx.list_his_tasks_by_instance(instance_id).await?)
    }

    pub(crate) async fn query_his_task_actors(
        &self,
        s: &mut Session,
        task_id: Uuid,
    ) -> Result<Vec<HisTaskActorRow>, EngineError> {
        Ok(s.tx.list_his_task_actors(task_id).await?)
    }

    pub(crate) async fn query_expired_tasks(
        &self,
        s: &mut Session,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRow>, EngineError> {
        Ok(s.tx.list_expired_tasks(now).await?)
    }

    pub(crate) async fn query_previous_node_keys(&self, s: &mut Session, task_id: Uuid) -> Result<Vec<String>, EngineError> {
        let task = s.tx.get_task(task_id).await?.ok_or(EngineError::TaskNotFound(task_id))?;
        let model = self.load_instance_model(s, task.instance_id).await?;
        Ok(model.previous_node_keys(&task.task_key))
    }
}
