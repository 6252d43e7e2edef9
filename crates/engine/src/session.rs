//! One transaction plus the events it raised.

use tracing::{debug, warn};

use db::models::{InstanceRow, TaskRow};
use db::Transaction;

use crate::execution::FlowActor;
use crate::hooks::{FlowEvent, InstanceEventKind, TaskEventKind};
use crate::{EngineError, FlowEngine};

pub(crate) struct Session {
    pub(crate) tx: Box<dyn Transaction>,
    events: Vec<FlowEvent>,
}

impl Session {
    pub(crate) fn task_event(&mut self, kind: TaskEventKind, task: &TaskRow, actor: &FlowActor) {
        self.events.push(FlowEvent::Task { kind, task: task.clone(), actor: actor.clone() });
    }

    pub(crate) fn instance_event(
        &mut self,
        kind: InstanceEventKind,
        instance: &InstanceRow,
        actor: &FlowActor,
    ) {
        self.events.push(FlowEvent::Instance {
            kind,
            instance_id: instance.id,
            process_id: instance.process_id,
            actor: actor.clone(),
        });
    }
}

impl FlowEngine {
    pub(crate) async fn begin(&self) -> Result<Session, EngineError> {
        let tx = self.store.begin().await?;
        Ok(Session { tx, events: Vec::new() })
    }

    /// Commit on success and deliver buffered events; roll back on error.
    pub(crate) async fn finish<T>(
        &self,
        session: Session,
        result: Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let Session { mut tx, events } = session;
        match result {
            Ok(value) => {
                tx.commit().await?;
                debug!(events = events.len(), "transaction committed");
                self.hooks.dispatch(&events);
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                warn!(error = %err, "operation rolled back");
                Err(err)
            }
        }
    }
}
