//! `model` crate: the process graph, its JSON format, and the collaborator
//! traits the engine calls out to.
//!
//! Everything here is storage-free: parse a [`ProcessModel`], validate it,
//! walk it, evaluate branch conditions, and mutate a private copy.

pub mod error;
pub mod node;
pub mod process;
pub mod validate;
pub mod expression;
pub mod traits;
pub mod mock;

pub use error::{HandlerError, ModelError};
pub use node::{
    ActorKind, ConditionNode, NodeAssignee, NodeExpression, NodeKind, NodeModel, PerformType,
    SetType, Variables,
};
pub use process::{InsertPosition, ProcessModel, Successor};
pub use validate::validate_model;
pub use expression::{Expression, SimpleExpression};
pub use traits::{ActorProvider, ActorSpec, NodeContext, StaticActorProvider, TaskTrigger};
