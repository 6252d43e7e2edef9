//! The BPM execution engine: deployment, instance
//! traversal, task performance rules and undo operations over a
//! transactional [`db::Store`].

pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod flow;
pub mod hooks;

mod assign;
mod history;
mod perform;
mod process;
mod query;
mod runtime;
mod session;
mod tasks;
mod traversal;
mod undo;

pub use cache::{CacheKey, ModelCache};
pub use config::EngineConfig;
pub use error::{EngineError, ErrorClass};
pub use execution::{Execution, FlowActor};
pub use flow::{FlowEngine, FlowEngineBuilder, ProcessRef, StartOptions, TriggerRegistry};
pub use hooks::{
    FlowEvent, FlowListener, InstanceEventKind, RecordingListener, TaskCreateInterceptor,
    TaskEventKind,
};

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod perform_tests;
#[cfg(test)]
mod undo_tests;
