//! Listeners and interceptors.
//!
//! Interceptors run inside the operation's transaction around task creation;
//! `before` may veto it. Listener events are buffered per operation and only
//! delivered after a successful commit, in the order they were raised.

use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use db::models::TaskRow;
use model::NodeModel;

use crate::execution::{Execution, FlowActor};
use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventKind {
    Create,
    /// A previously archived task came back (reject, withdraw, reclaim).
    Recreate,
    Complete,
    AutoComplete,
    AutoJump,
    Reject,
    Withdraw,
    Reclaim,
    Jump,
    Delegate,
    Resolve,
    Transfer,
    Cc,
    Trigger,
    CallProcess,
    AddActor,
    RemoveActor,
    VoteClosed,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceEventKind {
    Start,
    End,
    Terminate,
    Reject,
    Expire,
    Revoke,
}

#[derive(Debug, Clone)]
pub enum FlowEvent {
    Task {
        kind: TaskEventKind,
        task: TaskRow,
        actor: FlowActor,
    },
    Instance {
        kind: InstanceEventKind,
        instance_id: Uuid,
        process_id: Uuid,
        actor: FlowActor,
    },
}

/// Receives committed engine events.
pub trait FlowListener: Send + Sync {
    fn on_event(&self, event: &FlowEvent);
}

/// Runs around the creation of tasks at a node.
pub trait TaskCreateInterceptor: Send + Sync {
    /// Return an error to abort the whole operation.
    fn before(&self, _execution: &Execution, _node: &NodeModel) -> Result<(), EngineError> {
        Ok(())
    }

    fn after(&self, _execution: &Execution, _node: &NodeModel, _tasks: &[TaskRow]) {}
}

/// Ordered hook lists installed on an engine.
#[derive(Clone, Default)]
pub struct Hooks {
    listeners: Vec<Arc<dyn FlowListener>>,
    interceptors: Vec<Arc<dyn TaskCreateInterceptor>>,
}

impl Hooks {
    pub fn add_listener(&mut self, listener: Arc<dyn FlowListener>) {
        self.listeners.push(listener);
    }

    pub fn add_interceptor(&mut self, interceptor: Arc<dyn TaskCreateInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub(crate) fn before(&self, execution: &Execution, node: &NodeModel) -> Result<(), EngineError> {
        for interceptor in &self.interceptors {
            interceptor.before(execution, node)?;
        }
        Ok(())
    }

    pub(crate) fn after(&self, execution: &Execution, node: &NodeModel, tasks: &[TaskRow]) {
        for interceptor in &self.interceptors {
            interceptor.after(execution, node, tasks);
        }
    }

    pub(crate) fn dispatch(&self, events: &[FlowEvent]) {
        for event in events {
            for listener in &self.listeners {
                listener.on_event(event);
            }
        }
    }
}

/// Keeps every event it receives. Handy in tests and the CLI simulator.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<FlowEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `(kind, node key)` of every task event.
    pub fn task_events(&self) -> Vec<(TaskEventKind, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                FlowEvent::Task { kind, task, .. } => Some((kind, task.task_key)),
                FlowEvent::Instance { .. } => None,
            })
            .collect()
    }

    pub fn instance_events(&self) -> Vec<InstanceEventKind> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                FlowEvent::Instance { kind, .. } => Some(kind),
                FlowEvent::Task { .. } => None,
            })
            .collect()
    }
}

impl FlowListener for RecordingListener {
    fn on_event(&self, event: &FlowEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
    }
}
