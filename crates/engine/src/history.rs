//! Moving rows between the live and history tables.
//!
//! Every move checks affected row counts; a mismatch surfaces as
//! [`EngineError::Integrity`] and rolls the operation back.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use db::models::{
    HisInstanceRow, HisTaskActorRow, HisTaskRow, InstanceRow, InstanceState, TaskActorRow,
    TaskRow, TaskState,
};
use db::{DbError, HistoryRepository, InstanceRepository, TaskRepository};

use crate::execution::FlowActor;
use crate::session::Session;
use crate::EngineError;

/// Archive a live task and its actors under `state`.
pub(crate) async fn archive_task(
    s: &mut Session,
    task: &TaskRow,
    state: TaskState,
    actor: &FlowActor,
) -> Result<HisTaskRow, EngineError> {
    let actors = s.tx.list_task_actors(task.id).await?;
    let his = HisTaskRow::archive(task.clone(), state, &actor.id, &actor.name, Utc::now());

    DbError::ensure_rows("insert history task", 1, s.tx.insert_his_task(&his).await?)?;
    DbError::ensure_rows("delete task", 1, s.tx.delete_task(task.id).await?)?;
    for row in &actors {
        DbError::ensure_rows("delete task actor", 1, s.tx.delete_task_actor(row.id).await?)?;
        DbError::ensure_rows("insert history actor", 1, s.tx.insert_his_task_actor(row).await?)?;
    }
    debug!(task_id = %task.id, %state, "task archived");
    Ok(his)
}

/// Drop a live task and its actors without leaving history.
pub(crate) async fn delete_task(s: &mut Session, task: &TaskRow) -> Result<(), EngineError> {
    for row in s.tx.list_task_actors(task.id).await? {
        DbError::ensure_rows("delete task actor", 1, s.tx.delete_task_actor(row.id).await?)?;
    }
    DbError::ensure_rows("delete task", 1, s.tx.delete_task(task.id).await?)?;
    Ok(())
}

/// Insert a task with one actor row per entry.
pub(crate) async fn insert_task(
    s: &mut Session,
    task: &TaskRow,
    actors: &[TaskActorRow],
) -> Result<(), EngineError> {
    DbError::ensure_rows("insert task", 1, s.tx.insert_task(task).await?)?;
    for row in actors {
        DbError::ensure_rows("insert task actor", 1, s.tx.insert_task_actor(row).await?)?;
    }
    Ok(())
}

/// Bring an archived task back as a live one under a fresh id.
pub(crate) async fn restore_task(
    s: &mut Session,
    his: &HisTaskRow,
    actors: &[HisTaskActorRow],
) -> Result<TaskRow, EngineError> {
    let task = his.task.renewed(Utc::now());
    let rows: Vec<TaskActorRow> = actors
        .iter()
        .map(|a| TaskActorRow { id: Uuid::new_v4(), task_id: task.id, ..a.clone() })
        .collect();
    insert_task(s, &task, &rows).await?;
    debug!(from = %his.id(), task_id = %task.id, "task restored");
    Ok(task)
}

/// Archive a live instance under `state` and drop the live row.
pub(crate) async fn archive_instance(
    s: &mut Session,
    instance: &InstanceRow,
    state: InstanceState,
) -> Result<HisInstanceRow, EngineError> {
    let his = HisInstanceRow::archive(instance.clone(), state, Utc::now());
    DbError::ensure_rows("insert history instance", 1, s.tx.insert_his_instance(&his).await?)?;
    DbError::ensure_rows("delete instance", 1, s.tx.delete_instance(instance.id).await?)?;
    Ok(his)
}
