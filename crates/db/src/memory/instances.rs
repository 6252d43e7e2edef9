use async_trait::async_trait;
use uuid::Uuid;

use super::{delete_rows, insert_row, update_row, MemoryTransaction};
use crate::models::{InstanceModelRow, InstanceRow};
use crate::store::InstanceRepository;
use crate::DbError;

#[async_trait]
impl InstanceRepository for MemoryTransaction {
    async fn insert_instance(&mut self, row: &InstanceRow) -> Result<u64, DbError> {
        insert_row(&mut self.tables_mut()?.instances, row, row.id, |r| r.id)
    }

    async fn update_instance(&mut self, row: &InstanceRow) -> Result<u64, DbError> {
        Ok(update_row(&mut self.tables_mut()?.instances, row, row.id, |r| r.id))
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<InstanceRow>, DbError> {
        Ok(self.tables()?.instances.iter().find(|r| r.id == id).cloned())
    }

    async fn delete_instance(&mut self, id: Uuid) -> Result<u64, DbError> {
        Ok(delete_rows(&mut self.tables_mut()?.instances, |r| r.id == id))
    }

    async fn list_instances_by_parent(&self, parent_id: Uuid) -> Result<Vec<InstanceRow>, DbError> {
        Ok(self
            .tables()?
            .instances
            .iter()
            .filter(|r| r.parent_instance_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn insert_instance_model(&mut self, row: &InstanceModelRow) -> Result<u64, DbError> {
        insert_row(&mut self.tables_mut()?.instance_models, row, row.instance_id, |r| r.instance_id)
    }

    async fn update_instance_model(&mut self, row: &InstanceModelRow) -> Result<u64, DbError> {
        Ok(update_row(&mut self.tables_mut()?.instance_models, row, row.instance_id, |r| r.instance_id))
    }

    async fn get_instance_model(&self, instance_id: Uuid) -> Result<Option<InstanceModelRow>, DbError> {
        Ok(self
            .tables()?
            .instance_models
            .iter()
            .find(|r| r.instance_id == instance_id)
            .cloned())
    }
}
