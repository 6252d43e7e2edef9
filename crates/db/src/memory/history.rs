use async_trait::async_trait;
use uuid::Uuid;

use super::{insert_row, update_row, MemoryTransaction};
use crate::models::{HisInstanceRow, HisTaskActorRow, HisTaskRow};
use crate::store::HistoryRepository;
use crate::DbError;

#[async_trait]
impl HistoryRepository for MemoryTransaction {
    async fn insert_his_instance(&mut self, row: &HisInstanceRow) -> Result<u64, DbError> {
        insert_row(&mut self.tables_mut()?.his_instances, row, row.instance.id, |r| r.instance.id)
    }

    async fn get_his_instance(&self, id: Uuid) -> Result<Option<HisInstanceRow>, DbError> {
        Ok(self.tables()?.his_instances.iter().find(|r| r.instance.id == id).cloned())
    }

    async fn insert_his_task(&mut self, row: &HisTaskRow) -> Result<u64, DbError> {
        insert_row(&mut self.tables_mut()?.his_tasks, row, row.task.id, |r| r.task.id)
    }

    async fn update_his_task(&mut self, row: &HisTaskRow) -> Result<u64, DbError> {
        Ok(update_row(&mut self.tables_mut()?.his_tasks, row, row.task.id, |r| r.task.id))
    }

    async fn get_his_task(&self, id: Uuid) -> Result<Option<HisTaskRow>, DbError> {
        Ok(self.tables()?.his_tasks.iter().find(|r| r.task.id == id).cloned())
    }

    async fn list_his_tasks_by_instance(&self, instance_id: Uuid) -> Result<Vec<HisTaskRow>, DbError> {
        Ok(self
            .tables()?
            .his_tasks
            .iter()
            .filter(|r| r.task.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn list_his_tasks_by_parent(&self, parent_task_id: Uuid) -> Result<Vec<HisTaskRow>, DbError> {
        Ok(self
            .tables()?
            .his_tasks
            .iter()
            .filter(|r| r.task.parent_task_id == Some(parent_task_id))
            .cloned()
            .collect())
    }

    async fn find_his_task_by_call_instance(&self, call_instance_id: Uuid) -> Result<Option<HisTaskRow>, DbError> {
        Ok(self
            .tables()?
            .his_tasks
            .iter()
            .find(|r| r.call_instance_id == Some(call_instance_id))
            .cloned())
    }

    async fn insert_his_task_actor(&mut self, row: &HisTaskActorRow) -> Result<u64, DbError> {
        insert_row(&mut self.tables_mut()?.his_task_actors, row, row.id, |r| r.id)
    }

    async fn list_his_task_actors(&self, task_id: Uuid) -> Result<Vec<HisTaskActorRow>, DbError> {
        Ok(self
            .tables()?
            .his_task_actors
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }
}
