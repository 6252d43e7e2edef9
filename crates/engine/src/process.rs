//! Deploying and retiring process definitions.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use db::models::{ProcessRow, ProcessState};
use db::{DbError, ProcessRepository};
use model::{validate_model, ProcessModel};

use crate::cache::CacheKey;
use crate::execution::FlowActor;
use crate::session::Session;
use crate::{EngineError, FlowEngine};

impl FlowEngine {
    pub(crate) async fn deploy_in(
        &self,
        s: &mut Session,
        content: &str,
        creator: &FlowActor,
        repeat: bool,
    ) -> Result<Uuid, EngineError> {
        let model = ProcessModel::parse(content)?;
        validate_model(&model)?;
        for node in model.unset_assignee_nodes() {
            warn!(process = %model.key, node = %node.node_key, "node has no assignees");
        }

        let versions = s.tx.list_processes_by_key(creator.tenant_id.as_deref(), &model.key).await?;
        let latest = versions.into_iter().next();
        if let Some(existing) = &latest {
            if !repeat {
                info!(process_id = %existing.id, key = %model.key, "process already deployed");
                return Ok(existing.id);
            }
        }

        let version = match latest {
            Some(mut previous) => {
                if previous.state == ProcessState::Active {
                    previous.state = ProcessState::Historical;
                    DbError::ensure_rows("update process", 1, s.tx.update_process(&previous).await?)?;
                }
                self.cache.invalidate(&CacheKey::Process(previous.id));
                previous.process_version + 1
            }
            None => 1,
        };

        let row = ProcessRow {
            id: Uuid::new_v4(),
            tenant_id: creator.tenant_id.clone(),
            process_key: model.key.clone(),
            process_name: model.name.clone(),
            process_version: version,
            model_content: content.to_owned(),
            state: ProcessState::Active,
            create_id: creator.id.clone(),
            create_by: creator.name.clone(),
            create_time: Utc::now(),
        };
        DbError::ensure_rows("insert process", 1, s.tx.insert_process(&row).await?)?;
        info!(process_id = %row.id, key = %row.process_key, version, "process deployed");
        Ok(row.id)
    }

    /// New version of an existing definition; the key must not change.
    pub(crate) async fn redeploy_in(
        &self,
        s: &mut Session,
        process_id: Uuid,
        content: &str,
        creator: &FlowActor,
    ) -> Result<Uuid, EngineError> {
        let current = s
            .tx
            .get_process(process_id)
            .await?
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))?;
        let model = ProcessModel::parse(content)?;
        if model.key != current.process_key {
            return Err(EngineError::InvalidRequest(format!(
                "redeploy changes key '{}' to '{}'",
                current.process_key, model.key
            )));
        }
        let actor = FlowActor { tenant_id: current.tenant_id.clone(), ..creator.clone() };
        self.deploy_in(s, content, &actor, true).await
    }

    pub(crate) async fn undeploy_in(&self, s: &mut Session, process_id: Uuid) -> Result<(), EngineError> {
        let mut row = s
            .tx
            .get_process(process_id)
            .await?
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))?;
        row.state = ProcessState::Disabled;
        DbError::ensure_rows("update process", 1, s.tx.update_process(&row).await?)?;
        self.cache.invalidate(&CacheKey::Process(process_id));
        info!(%process_id, "process disabled");
        Ok(())
    }
}
