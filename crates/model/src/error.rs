//! Model-level error types.

use thiserror::Error;

use crate::node::PerformType;

/// Errors raised while parsing, validating or mutating a process model.
///
/// All of these surface before the engine touches storage.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Deployed content was empty or whitespace.
    #[error("process model content is empty")]
    EmptyContent,

    /// Content is not a valid model document.
    #[error("invalid process model JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The root of the graph is not a start node.
    #[error("process model has no start node")]
    MissingStartNode,

    #[error("start node '{0}' may only appear at the root of the graph")]
    NestedStartNode(String),

    #[error("node '{0}' has an empty key")]
    EmptyNodeKey(String),

    /// Two nodes share the same key.
    #[error("duplicate node key: '{0}'")]
    DuplicateNodeKey(String),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    /// A condition group is structurally invalid.
    #[error("malformed condition on node '{node_key}': {reason}")]
    MalformedCondition {
        node_key: String,
        reason: String,
    },

    #[error("branch node '{0}' has no branches")]
    EmptyBranch(String),

    #[error("invalid weight on node '{node_key}': {reason}")]
    InvalidWeight {
        node_key: String,
        reason: String,
    },

    #[error("node '{node_key}' cannot use performance type '{perform_type}'")]
    InvalidPerformType {
        node_key: String,
        perform_type: PerformType,
    },

    #[error("invalid delay on node '{node_key}': '{value}'")]
    InvalidTimer {
        node_key: String,
        value: String,
    },

    #[error("call-process node '{0}' does not name a process")]
    MissingCallProcess(String),

    #[error("cannot insert a node before the root node '{0}'")]
    InsertBeforeRoot(String),

    #[error("unsupported condition operator '{0}'")]
    UnknownOperator(String),
}

/// Errors returned by collaborator callbacks (actor providers, triggers).
///
/// The engine treats both variants as fatal for the current operation and
/// rolls the surrounding transaction back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The collaborator ran and reported failure.
    #[error("handler rejected the request: {0}")]
    Rejected(String),

    /// The collaborator could not be reached.
    #[error("handler unavailable: {0}")]
    Unavailable(String),
}
