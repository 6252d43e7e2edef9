use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{delete_rows, insert_row, update_row, MemoryTransaction};
use crate::models::{TaskActorRow, TaskRow};
use crate::store::TaskRepository;
use crate::DbError;

#[async_trait]
impl TaskRepository for MemoryTransaction {
    async fn insert_task(&mut self, row: &TaskRow) -> Result<u64, DbError> {
        insert_row(&mut self.tables_mut()?.tasks, row, row.id, |r| r.id)
    }

    async fn update_task(&mut self, row: &TaskRow) -> Result<u64, DbError> {
        Ok(update_row(&mut self.tables_mut()?.tasks, row, row.id, |r| r.id))
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<TaskRow>, DbError> {
        Ok(self.tables()?.tasks.iter().find(|r| r.id == id).cloned())
    }

    async fn delete_task(&mut self, id: Uuid) -> Result<u64, DbError> {
        Ok(delete_rows(&mut self.tables_mut()?.tasks, |r| r.id == id))
    }

    async fn list_tasks_by_instance(&self, instance_id: Uuid) -> Result<Vec<TaskRow>, DbError> {
        Ok(self
            .tables()?
            .tasks
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn list_tasks_by_parent(&self, parent_task_id: Uuid) -> Result<Vec<TaskRow>, DbError> {
        Ok(self
            .tables()?
            .tasks
            .iter()
            .filter(|r| r.parent_task_id == Some(parent_task_id))
            .cloned()
            .collect())
    }

    async fn list_expired_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRow>, DbError> {
        Ok(self
            .tables()?
            .tasks
            .iter()
            .filter(|r| r.expire_time.is_some_and(|t| t <= now))
            .cloned()
            .collect())
    }

    async fn insert_task_actor(&mut self, row: &TaskActorRow) -> Result<u64, DbError> {
        insert_row(&mut self.tables_mut()?.task_actors, row, row.id, |r| r.id)
    }

    async fn delete_task_actor(&mut self, id: Uuid) -> Result<u64, DbError> {
        Ok(delete_rows(&mut self.tables_mut()?.task_actors, |r| r.id == id))
    }

    async fn list_task_actors(&self, task_id: Uuid) -> Result<Vec<TaskActorRow>, DbError> {
        Ok(self
            .tables()?
            .task_actors
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn list_task_actors_by_instance(&self, instance_id: Uuid) -> Result<Vec<TaskActorRow>, DbError> {
        Ok(self
            .tables()?
            .task_actors
            .iter()
            .filter(|r| r.instance_id == instance_id)
            .cloned()
            .collect())
    }
}
