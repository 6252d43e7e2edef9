//! Storage contract.
//!
//! A [`Store`] hands out [`Transaction`]s. Every engine operation runs inside
//! exactly one transaction: reads see the transaction's own writes, and
//! nothing becomes visible to other transactions until [`Transaction::commit`].
//! Dropping a transaction without committing rolls it back.
//!
//! Write methods return the number of affected rows so callers can detect
//! integrity failures the same way they would with a SQL driver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    HisInstanceRow, HisTaskActorRow, HisTaskRow, InstanceModelRow, InstanceRow, ProcessRow,
    TaskActorRow, TaskRow,
};
use crate::DbError;

/// Entry point for opening transactions.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError>;
}

/// A unit of work over every repository.
#[async_trait]
pub trait Transaction:
    ProcessRepository + InstanceRepository + TaskRepository + HistoryRepository + Send + Sync
{
    /// Take the instance-scoped lock for the rest of the transaction.
    ///
    /// SQL backends issue `SELECT … FOR UPDATE` on the instance row here.
    async fn lock_instance(&mut self, instance_id: Uuid) -> Result<(), DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;
}

#[async_trait]
pub trait ProcessRepository: Send + Sync {
    async fn insert_process(&mut self, row: &ProcessRow) -> Result<u64, DbError>;
    async fn update_process(&mut self, row: &ProcessRow) -> Result<u64, DbError>;
    async fn get_process(&self, id: Uuid) -> Result<Option<ProcessRow>, DbError>;
    /// Every version of `key` for the tenant, newest first.
    async fn list_processes_by_key(
        &self,
        tenant_id: Option<&str>,
        key: &str,
    ) -> Result<Vec<ProcessRow>, DbError>;
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn insert_instance(&mut self, row: &InstanceRow) -> Result<u64, DbError>;
    async fn update_instance(&mut self, row: &InstanceRow) -> Result<u64, DbError>;
    async fn get_instance(&self, id: Uuid) -> Result<Option<InstanceRow>, DbError>;
    async fn delete_instance(&mut self, id: Uuid) -> Result<u64, DbError>;
    async fn list_instances_by_parent(&self, parent_id: Uuid) -> Result<Vec<InstanceRow>, DbError>;

    async fn insert_instance_model(&mut self, row: &InstanceModelRow) -> Result<u64, DbError>;
    async fn update_instance_model(&mut self, row: &InstanceModelRow) -> Result<u64, DbError>;
    async fn get_instance_model(&self, instance_id: Uuid) -> Result<Option<InstanceModelRow>, DbError>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert_task(&mut self, row: &TaskRow) -> Result<u64, DbError>;
    async fn update_task(&mut self, row: &TaskRow) -> Result<u64, DbError>;
    async fn get_task(&self, id: Uuid) -> Result<Option<TaskRow>, DbError>;
    async fn delete_task(&mut self, id: Uuid) -> Result<u64, DbError>;
    /// Active tasks of an instance in creation order.
    async fn list_tasks_by_instance(&self, instance_id: Uuid) -> Result<Vec<TaskRow>, DbError>;
    async fn list_tasks_by_parent(&self, parent_task_id: Uuid) -> Result<Vec<TaskRow>, DbError>;
    /// Tasks whose expiry is at or before `now`.
    async fn list_expired_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRow>, DbError>;

    async fn insert_task_actor(&mut self, row: &TaskActorRow) -> Result<u64, DbError>;
    async fn delete_task_actor(&mut self, id: Uuid) -> Result<u64, DbError>;
    async fn list_task_actors(&self, task_id: Uuid) -> Result<Vec<TaskActorRow>, DbError>;
    async fn list_task_actors_by_instance(&self, instance_id: Uuid) -> Result<Vec<TaskActorRow>, DbError>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn insert_his_instance(&mut self, row: &HisInstanceRow) -> Result<u64, DbError>;
    async fn get_his_instance(&self, id: Uuid) -> Result<Option<HisInstanceRow>, DbError>;

    async fn insert_his_task(&mut self, row: &HisTaskRow) -> Result<u64, DbError>;
    async fn update_his_task(&mut self, row: &HisTaskRow) -> Result<u64, DbError>;
    async fn get_his_task(&self, id: Uuid) -> Result<Option<HisTaskRow>, DbError>;
    /// Archived tasks of an instance in archive order.
    async fn list_his_tasks_by_instance(&self, instance_id: Uuid) -> Result<Vec<HisTaskRow>, DbError>;
    async fn list_his_tasks_by_parent(&self, parent_task_id: Uuid) -> Result<Vec<HisTaskRow>, DbError>;
    async fn find_his_task_by_call_instance(&self, call_instance_id: Uuid) -> Result<Option<HisTaskRow>, DbError>;

    async fn insert_his_task_actor(&mut self, row: &HisTaskActorRow) -> Result<u64, DbError>;
    async fn list_his_task_actors(&self, task_id: Uuid) -> Result<Vec<HisTaskActorRow>, DbError>;
}
