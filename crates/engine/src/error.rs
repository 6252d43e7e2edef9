//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use db::DbError;
use model::{HandlerError, ModelError};

/// Coarse class of an [`EngineError`], for callers mapping failures to
/// responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Permission,
    State,
    Integrity,
    Collaborator,
}

/// Errors produced by the workflow engine.
///
/// Any error returned from a public operation means its transaction was
/// rolled back.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// The model failed to parse or validate.
    #[error("invalid process model: {0}")]
    Model(#[from] ModelError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // ------ Permission errors ------

    #[error("actor '{actor_id}' may not act on task {task_id}")]
    PermissionDenied {
        actor_id: String,
        task_id: Uuid,
    },

    // ------ State errors ------

    #[error("process '{0}' not found")]
    ProcessNotFound(String),

    #[error("process {0} is not active")]
    ProcessInactive(Uuid),

    #[error("instance {0} not found or already finished")]
    InstanceNotFound(Uuid),

    #[error("task {0} not found or already completed")]
    TaskNotFound(Uuid),

    #[error("history task {0} not found")]
    HistoryTaskNotFound(Uuid),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("node '{0}' resolved no actors")]
    NoActors(String),

    #[error("no branch of '{0}' matched and no default branch exists")]
    NoConditionMatched(String),

    /// Reject needs a predecessor to return to.
    #[error("task {0} has no parent task to return to")]
    NoParentTask(Uuid),

    #[error("downstream tasks of {0} already completed or not present")]
    NothingToWithdraw(Uuid),

    #[error("task {task_id} cannot be reclaimed: {reason}")]
    ReclaimNotAllowed {
        task_id: Uuid,
        reason: &'static str,
    },

    #[error("task {0} is already delegated")]
    AlreadyAssigned(Uuid),

    #[error("task {0} is not delegated")]
    NotDelegated(Uuid),

    #[error("instance {0} still has an open initiator task")]
    UnfinishedMajorTask(Uuid),

    // ------ Integrity errors ------

    /// A history write touched the wrong number of rows.
    #[error("integrity failure: {0}")]
    Integrity(DbError),

    #[error("database error: {0}")]
    Database(DbError),

    // ------ Collaborator errors ------

    #[error("no trigger registered for node '{0}'")]
    TriggerNotRegistered(String),

    #[error("trigger for node '{node_key}' failed: {source}")]
    TriggerFailed {
        node_key: String,
        source: HandlerError,
    },

    #[error("actor provider failed for node '{node_key}': {source}")]
    ActorProvider {
        node_key: String,
        source: HandlerError,
    },

    /// A task-create interceptor vetoed the operation.
    #[error("task creation at '{node_key}' vetoed: {reason}")]
    Intercepted {
        node_key: String,
        reason: String,
    },
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::RowCount { .. } | DbError::Duplicate(_) => Self::Integrity(err),
            other => Self::Database(other),
        }
    }
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Model(_) | Self::InvalidRequest(_) => ErrorClass::Validation,
            Self::PermissionDenied { .. } => ErrorClass::Permission,
            Self::Integrity(_) | Self::Database(_) => ErrorClass::Integrity,
            Self::TriggerNotRegistered(_)
            | Self::TriggerFailed { .. }
            | Self::ActorProvider { .. }
            | Self::Intercepted { .. } => ErrorClass::Collaborator,
            _ => ErrorClass::State,
        }
    }
}
