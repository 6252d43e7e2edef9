use async_trait::async_trait;
use uuid::Uuid;

use super::{insert_row, update_row, MemoryTransaction};
use crate::models::ProcessRow;
use crate::store::ProcessRepository;
use crate::DbError;

#[async_trait]
impl ProcessRepository for MemoryTransaction {
    async fn insert_process(&mut self, row: &ProcessRow) -> Result<u64, DbError> {
        insert_row(&mut self.tables_mut()?.processes, row, row.id, |r| r.id)
    }

    async fn update_process(&mut self, row: &ProcessRow) -> Result<u64, DbError> {
        Ok(update_row(&mut self.tables_mut()?.processes, row, row.id, |r| r.id))
    }

    async fn get_process(&self, id: Uuid) -> Result<Option<ProcessRow>, DbError> {
        Ok(self.tables()?.processes.iter().find(|r| r.id == id).cloned())
    }

    async fn list_processes_by_key(
        &self,
        tenant_id: Option<&str>,
        key: &str,
    ) -> Result<Vec<ProcessRow>, DbError> {
        let mut rows: Vec<ProcessRow> = self
            .tables()?
            .processes
            .iter()
            .filter(|r| r.process_key == key && r.tenant_id.as_deref() == tenant_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.process_version.cmp(&a.process_version));
        Ok(rows)
    }
}
