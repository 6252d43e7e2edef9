//! In-memory [`Store`] backend.
//!
//! The whole table set sits behind one `tokio::sync::Mutex`. A transaction
//! holds the owned guard for its entire lifetime and works on a private copy
//! of the tables; `commit` swaps the copy in, anything else discards it.
//! Transactions are therefore fully serialized, which subsumes the
//! instance-scoped locking a SQL backend provides.

mod history;
mod instances;
mod processes;
mod tasks;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    HisInstanceRow, HisTaskActorRow, HisTaskRow, InstanceModelRow, InstanceRow, ProcessRow,
    TaskActorRow, TaskRow,
};
use crate::store::{Store, Transaction};
use crate::DbError;

/// Every table, rows kept in insertion order.
#[derive(Debug, Default, Clone)]
pub struct Tables {
    pub processes: Vec<ProcessRow>,
    pub instances: Vec<InstanceRow>,
    pub instance_models: Vec<InstanceModelRow>,
    pub tasks: Vec<TaskRow>,
    pub task_actors: Vec<TaskActorRow>,
    pub his_instances: Vec<HisInstanceRow>,
    pub his_tasks: Vec<HisTaskRow>,
    pub his_task_actors: Vec<HisTaskActorRow>,
}

/// Shared handle; clones point at the same tables.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state. Waits for any open transaction.
    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working, finished: false }))
    }
}

/// An open transaction against a [`MemoryStore`].
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    finished: bool,
}

impl MemoryTransaction {
    fn tables(&self) -> Result<&Tables, DbError> {
        if self.finished {
            return Err(DbError::Finished);
        }
        Ok(&self.working)
    }

    fn tables_mut(&mut self) -> Result<&mut Tables, DbError> {
        if self.finished {
            return Err(DbError::Finished);
        }
        Ok(&mut self.working)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn lock_instance(&mut self, instance_id: Uuid) -> Result<(), DbError> {
        self.tables()?;
        debug!(%instance_id, "instance lock held by transaction");
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        let working = std::mem::take(self.tables_mut()?);
        *self.guard = working;
        self.finished = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.tables_mut()?;
        self.working = Tables::default();
        self.finished = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row helpers shared by the repository impls
// ---------------------------------------------------------------------------

pub(crate) fn insert_row<T: Clone>(
    rows: &mut Vec<T>,
    row: &T,
    id: Uuid,
    id_of: impl Fn(&T) -> Uuid,
) -> Result<u64, DbError> {
    if rows.iter().any(|r| id_of(r) == id) {
        return Err(DbError::Duplicate(id));
    }
    rows.push(row.clone());
    Ok(1)
}

pub(crate) fn update_row<T: Clone>(rows: &mut [T], row: &T, id: Uuid, id_of: impl Fn(&T) -> Uuid) -> u64 {
    match rows.iter_mut().find(|r| id_of(r) == id) {
        Some(slot) => {
            *slot = row.clone();
            1
        }
        None => 0,
    }
}

pub(crate) fn delete_rows<T>(rows: &mut Vec<T>, doomed: impl Fn(&T) -> bool) -> u64 {
    let before = rows.len();
    rows.retain(|r| !doomed(r));
    (before - rows.len()) as u64
}
