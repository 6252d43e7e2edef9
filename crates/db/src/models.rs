//! Row structs for every record the engine persists.
//!
//! These are *persistence* models. They carry no domain behaviour beyond
//! construction helpers. Graph semantics live in the `model` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use model::{ActorKind, ActorSpec, PerformType, Variables};

/// Milliseconds between two instants, never negative.
pub fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}

// ---------------------------------------------------------------------------
// processes
// ---------------------------------------------------------------------------

/// Lifecycle of a deployed definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Active,
    Disabled,
    Historical,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Disabled => write!(f, "disabled"),
            Self::Historical => write!(f, "historical"),
        }
    }
}

impl std::str::FromStr for ProcessState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active"     => Ok(Self::Active),
            "disabled"   => Ok(Self::Disabled),
            "historical" => Ok(Self::Historical),
            other        => Err(format!("unknown process state: {other}")),
        }
    }
}

/// A deployed process definition. Only `state` changes after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRow {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub process_key: String,
    pub process_name: String,
    pub process_version: i32,
    /// Full JSON model document.
    pub model_content: String,
    pub state: ProcessState,
    pub create_id: String,
    pub create_by: String,
    pub create_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// instances
// ---------------------------------------------------------------------------

/// Final (or current, for history rows still open) state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Active,
    Complete,
    Rejected,
    Revoked,
    Expired,
    Terminated,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active     => write!(f, "active"),
            Self::Complete   => write!(f, "complete"),
            Self::Rejected   => write!(f, "rejected"),
            Self::Revoked    => write!(f, "revoked"),
            Self::Expired    => write!(f, "expired"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// A running process instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRow {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub process_id: Uuid,
    /// Set for sub-process instances.
    pub parent_instance_id: Option<Uuid>,
    pub priority: i32,
    pub business_key: Option<String>,
    pub variables: Variables,
    pub current_node_name: String,
    pub current_node_key: String,
    pub create_id: String,
    pub create_by: String,
    pub create_time: DateTime<Utc>,
    pub last_update_by: Option<String>,
    pub last_update_time: Option<DateTime<Utc>>,
}

/// An archived instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HisInstanceRow {
    #[serde(flatten)]
    pub instance: InstanceRow,
    pub state: InstanceState,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

impl HisInstanceRow {
    pub fn archive(instance: InstanceRow, state: InstanceState, now: DateTime<Utc>) -> Self {
        let duration_ms = duration_ms(instance.create_time, now);
        Self { instance, state, end_time: now, duration_ms }
    }
}

/// The private model copy owned by one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceModelRow {
    pub instance_id: Uuid,
    pub process_id: Uuid,
    pub model_content: String,
}

// ---------------------------------------------------------------------------
// tasks
// ---------------------------------------------------------------------------

/// What kind of work a task row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// The initiator's task at the start node.
    Major,
    Approval,
    Cc,
    CallProcess,
    Timer,
    Trigger,
    Transfer,
    Delegate,
    DelegateReturn,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Major          => write!(f, "major"),
            Self::Approval       => write!(f, "approval"),
            Self::Cc             => write!(f, "cc"),
            Self::CallProcess    => write!(f, "call_process"),
            Self::Timer          => write!(f, "timer"),
            Self::Trigger        => write!(f, "trigger"),
            Self::Transfer       => write!(f, "transfer"),
            Self::Delegate       => write!(f, "delegate"),
            Self::DelegateReturn => write!(f, "delegate_return"),
        }
    }
}

/// State recorded on an archived task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Open history row (sub-process call in progress).
    Active,
    Complete,
    Rejected,
    Jump,
    Revoked,
    Terminated,
    Expired,
    /// Closed because a vote-sign node already passed.
    VoteClosed,
    AutoComplete,
    AutoJump,
    AutoReject,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active       => write!(f, "active"),
            Self::Complete     => write!(f, "complete"),
            Self::Rejected     => write!(f, "rejected"),
            Self::Jump         => write!(f, "jump"),
            Self::Revoked      => write!(f, "revoked"),
            Self::Terminated   => write!(f, "terminated"),
            Self::Expired      => write!(f, "expired"),
            Self::VoteClosed   => write!(f, "vote_closed"),
            Self::AutoComplete => write!(f, "auto_complete"),
            Self::AutoJump     => write!(f, "auto_jump"),
            Self::AutoReject   => write!(f, "auto_reject"),
        }
    }
}

impl From<InstanceState> for TaskState {
    fn from(state: InstanceState) -> Self {
        match state {
            InstanceState::Active | InstanceState::Complete => Self::Complete,
            InstanceState::Rejected => Self::Rejected,
            InstanceState::Revoked => Self::Revoked,
            InstanceState::Expired => Self::Expired,
            InstanceState::Terminated => Self::Terminated,
        }
    }
}

/// One unit of pending work at one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub instance_id: Uuid,
    /// Task whose completion created this one.
    pub parent_task_id: Option<Uuid>,
    pub task_name: String,
    pub task_key: String,
    pub task_type: TaskType,
    pub perform_type: PerformType,
    pub variables: Variables,
    /// Original holder of a delegated or transferred task.
    pub assignor_id: Option<String>,
    pub assignor: Option<String>,
    pub expire_time: Option<DateTime<Utc>>,
    pub create_id: String,
    pub create_by: String,
    pub create_time: DateTime<Utc>,
}

impl TaskRow {
    /// Same task contents under a fresh id and creation time.
    pub fn renewed(&self, now: DateTime<Utc>) -> Self {
        Self { id: Uuid::new_v4(), create_time: now, ..self.clone() }
    }
}

/// A participant of a live task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskActorRow {
    pub id: Uuid,
    pub tenant_id: Option<String>,
    pub instance_id: Uuid,
    pub task_id: Uuid,
    pub actor_id: String,
    pub actor_name: String,
    pub actor_kind: ActorKind,
    /// Vote weight (0–100).
    pub weight: Option<u32>,
}

impl TaskActorRow {
    pub fn for_task(task: &TaskRow, actor: &ActorSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: task.tenant_id.clone(),
            instance_id: task.instance_id,
            task_id: task.id,
            actor_id: actor.actor_id.clone(),
            actor_name: actor.actor_name.clone(),
            actor_kind: actor.kind,
            weight: actor.weight,
        }
    }

    pub fn to_spec(&self) -> ActorSpec {
        ActorSpec {
            actor_id: self.actor_id.clone(),
            actor_name: self.actor_name.clone(),
            kind: self.actor_kind,
            weight: self.weight,
        }
    }
}

/// History actor rows keep the live shape.
pub type HisTaskActorRow = TaskActorRow;

/// An archived task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HisTaskRow {
    #[serde(flatten)]
    pub task: TaskRow,
    pub state: TaskState,
    /// Actor who closed the task.
    pub finish_id: String,
    pub finish_by: String,
    pub finish_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub call_process_id: Option<Uuid>,
    pub call_instance_id: Option<Uuid>,
}

impl HisTaskRow {
    pub fn archive(
        task: TaskRow,
        state: TaskState,
        finish_id: impl Into<String>,
        finish_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let duration_ms = duration_ms(task.create_time, now);
        Self {
            task,
            state,
            finish_id: finish_id.into(),
            finish_by: finish_by.into(),
            finish_time: now,
            duration_ms,
            call_process_id: None,
            call_instance_id: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.task.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(now: DateTime<Utc>) -> TaskRow {
        TaskRow {
            id: Uuid::new_v4(),
            tenant_id: None,
            instance_id: Uuid::new_v4(),
            parent_task_id: None,
            task_name: "approve".into(),
            task_key: "a".into(),
            task_type: TaskType::Approval,
            perform_type: PerformType::Single,
            variables: Variables::new(),
            assignor_id: None,
            assignor: None,
            expire_time: None,
            create_id: "u".into(),
            create_by: "U".into(),
            create_time: now,
        }
    }

    #[test]
    fn archive_computes_duration_from_creation() {
        let start = Utc::now();
        let his = HisTaskRow::archive(task(start), TaskState::Complete, "u", "U", start + Duration::seconds(3));
        assert_eq!(his.duration_ms, 3000);
        assert_eq!(his.state, TaskState::Complete);
    }

    #[test]
    fn renewed_task_keeps_contents_under_new_id() {
        let original = task(Utc::now());
        let renewed = original.renewed(Utc::now());
        assert_ne!(renewed.id, original.id);
        assert_eq!(renewed.task_key, original.task_key);
    }

    #[test]
    fn process_state_round_trips_through_text() {
        for state in [ProcessState::Active, ProcessState::Disabled, ProcessState::Historical] {
            assert_eq!(state.to_string().parse::<ProcessState>(), Ok(state));
        }
    }

    #[test]
    fn history_rows_flatten_the_live_row() {
        let his = HisTaskRow::archive(task(Utc::now()), TaskState::Rejected, "u", "U", Utc::now());
        let json = serde_json::to_value(&his).expect("serialize");
        assert_eq!(json["task_key"], "a");
        assert_eq!(json["state"], "rejected");
    }
}
