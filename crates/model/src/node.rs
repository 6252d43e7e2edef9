//! Process graph node types and their JSON shape.
//!
//! The document is a tree: every [`NodeModel`] owns its `childNode` and its
//! branch sub-graphs. Upward links are never stored here; see
//! [`crate::ProcessModel`] for the parent index.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ModelError;

/// Instance and task variables.
pub type Variables = Map<String, Value>;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Closed set of node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    Approval,
    Cc,
    /// Wrapper around a single branch (used as a parallel branch root).
    ConditionNode,
    ConditionBranch,
    CallProcess,
    Timer,
    Trigger,
    ParallelBranch,
    InclusiveBranch,
    End,
}

impl NodeKind {
    /// Condition wrapper or exclusive branch.
    pub fn is_condition(self) -> bool {
        matches!(self, Self::ConditionNode | Self::ConditionBranch)
    }

    /// Parallel or inclusive fork.
    pub fn is_fork(self) -> bool {
        matches!(self, Self::ParallelBranch | Self::InclusiveBranch)
    }

    /// Kinds that produce task rows (or history rows) when reached.
    pub fn creates_task(self) -> bool {
        matches!(
            self,
            Self::Approval | Self::Cc | Self::CallProcess | Self::Timer | Self::Trigger
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Approval => "approval",
            Self::Cc => "cc",
            Self::ConditionNode => "condition_node",
            Self::ConditionBranch => "condition_branch",
            Self::CallProcess => "call_process",
            Self::Timer => "timer",
            Self::Trigger => "trigger",
            Self::ParallelBranch => "parallel_branch",
            Self::InclusiveBranch => "inclusive_branch",
            Self::End => "end",
        };
        f.write_str(name)
    }
}

/// How the actors of a node share the work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformType {
    /// Initiator's own task at the start node.
    Start,
    /// One task, any listed actor completes it.
    Single,
    /// Actors act one after another.
    Sort,
    /// Every actor must act.
    Countersign,
    /// First actor to act completes the node.
    OrSign,
    /// Weighted voting against a pass weight.
    VoteSign,
    Timer,
    Trigger,
    /// Carbon copy, archived immediately.
    Copy,
}

impl PerformType {
    /// Modes an approval node may declare in its `examineMode`.
    pub fn is_examine_mode(self) -> bool {
        matches!(
            self,
            Self::Single | Self::Sort | Self::Countersign | Self::OrSign | Self::VoteSign
        )
    }
}

impl std::fmt::Display for PerformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Single => write!(f, "single"),
            Self::Sort => write!(f, "sort"),
            Self::Countersign => write!(f, "countersign"),
            Self::OrSign => write!(f, "or_sign"),
            Self::VoteSign => write!(f, "vote_sign"),
            Self::Timer => write!(f, "timer"),
            Self::Trigger => write!(f, "trigger"),
            Self::Copy => write!(f, "copy"),
        }
    }
}

impl std::str::FromStr for PerformType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start"       => Ok(Self::Start),
            "single"      => Ok(Self::Single),
            "sort"        => Ok(Self::Sort),
            "countersign" => Ok(Self::Countersign),
            "or_sign"     => Ok(Self::OrSign),
            "vote_sign"   => Ok(Self::VoteSign),
            "timer"       => Ok(Self::Timer),
            "trigger"     => Ok(Self::Trigger),
            "copy"        => Ok(Self::Copy),
            other         => Err(format!("unknown perform type: {other}")),
        }
    }
}

/// Kind of participant recorded on a task actor row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    #[default]
    User,
    Role,
    Department,
}

/// Where a node's assignees come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetType {
    /// Static list of users.
    #[default]
    Member,
    /// Static list of roles.
    Role,
    /// Static list of departments.
    Department,
    /// The instance creator.
    Initiator,
    /// Chosen by the initiator at start time.
    InitiatorSelect,
    /// Resolved by the external actor provider.
    Dynamic,
}

impl SetType {
    pub fn actor_kind(self) -> ActorKind {
        match self {
            Self::Role => ActorKind::Role,
            Self::Department => ActorKind::Department,
            _ => ActorKind::User,
        }
    }
}

// ---------------------------------------------------------------------------
// Graph documents
// ---------------------------------------------------------------------------

/// A statically configured assignee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAssignee {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Vote weight (0–100), only meaningful under vote-sign.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl NodeAssignee {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), tenant_id: None, weight: None }
    }

    pub fn weighted(id: impl Into<String>, name: impl Into<String>, weight: u32) -> Self {
        Self { weight: Some(weight), ..Self::new(id, name) }
    }
}

/// One comparison inside a condition group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExpression {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub field: String,
    pub operator: String,
    pub value: Value,
}

impl NodeExpression {
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: Value) -> Self {
        Self { label: None, field: field.into(), operator: operator.into(), value }
    }
}

/// A guarded branch of a condition or inclusive fork.
///
/// `condition_list` is an OR of AND groups. An empty list marks the default
/// branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionNode {
    pub node_name: String,
    pub node_key: String,
    #[serde(default)]
    pub priority_level: i32,
    #[serde(default)]
    pub condition_list: Vec<Vec<NodeExpression>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_node: Option<Box<NodeModel>>,
}

impl ConditionNode {
    pub fn new(key: impl Into<String>, name: impl Into<String>, priority_level: i32) -> Self {
        Self {
            node_name: name.into(),
            node_key: key.into(),
            priority_level,
            condition_list: Vec::new(),
            child_node: None,
        }
    }

    pub fn is_default(&self) -> bool {
        self.condition_list.is_empty()
    }

    pub fn when(mut self, group: Vec<NodeExpression>) -> Self {
        self.condition_list.push(group);
        self
    }

    pub fn then(mut self, child: NodeModel) -> Self {
        self.child_node = Some(Box::new(child));
        self
    }
}

/// A node of the process graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeModel {
    pub node_name: String,
    pub node_key: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub set_type: SetType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_assignee_list: Vec<NodeAssignee>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examine_mode: Option<PerformType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_weight: Option<u32>,
    /// `processId:processName` or a process key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_process: Option<String>,
    /// Free-form settings: `time` for timers/triggers, `trigger` for the handler id.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extend_config: Variables,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition_nodes: Vec<ConditionNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel_nodes: Vec<NodeModel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusive_nodes: Vec<ConditionNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_node: Option<Box<NodeModel>>,
}

impl NodeModel {
    /// A bare node of the given kind with no assignees, branches or child.
    pub fn new(key: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            node_name: name.into(),
            node_key: key.into(),
            kind,
            set_type: SetType::Member,
            node_assignee_list: Vec::new(),
            examine_mode: None,
            pass_weight: None,
            call_process: None,
            extend_config: Map::new(),
            condition_nodes: Vec::new(),
            parallel_nodes: Vec::new(),
            inclusive_nodes: Vec::new(),
            child_node: None,
        }
    }

    pub fn with_child(mut self, child: NodeModel) -> Self {
        self.child_node = Some(Box::new(child));
        self
    }

    pub fn with_assignees(mut self, mode: PerformType, assignees: Vec<NodeAssignee>) -> Self {
        self.examine_mode = Some(mode);
        self.node_assignee_list = assignees;
        self
    }

    /// Depth-first lookup: self, condition branches, parallel branches,
    /// inclusive branches, then the child chain.
    pub fn get_node(&self, key: &str) -> Option<&NodeModel> {
        if self.node_key == key {
            return Some(self);
        }
        self.branch_roots()
            .find_map(|root| root.get_node(key))
            .or_else(|| self.child_node.as_deref().and_then(|child| child.get_node(key)))
    }

    pub(crate) fn get_node_mut(&mut self, key: &str) -> Option<&mut NodeModel> {
        if self.node_key == key {
            return Some(self);
        }
        let branch = self
            .condition_nodes
            .iter_mut()
            .chain(self.inclusive_nodes.iter_mut())
            .filter_map(|c| c.child_node.as_deref_mut())
            .chain(self.parallel_nodes.iter_mut())
            .find(|root| root.get_node(key).is_some());
        if let Some(root) = branch {
            return root.get_node_mut(key);
        }
        self.child_node.as_deref_mut().and_then(|child| child.get_node_mut(key))
    }

    /// Roots of every branch sub-graph, in lookup order. Excludes `childNode`.
    pub fn branch_roots(&self) -> impl Iterator<Item = &NodeModel> {
        self.condition_nodes
            .iter()
            .filter_map(|c| c.child_node.as_deref())
            .chain(self.parallel_nodes.iter())
            .chain(self.inclusive_nodes.iter().filter_map(|c| c.child_node.as_deref()))
    }

    /// Self and every node below it, in lookup order.
    pub fn descendants(&self) -> Vec<&NodeModel> {
        let mut out = Vec::new();
        collect_descendants(self, &mut out);
        out
    }

    /// Keys of every work-bearing node a branch of this node can still hold.
    ///
    /// For branch nodes this covers each branch's whole sub-graph, nested
    /// branch nodes and their `childNode` chains included, but not this
    /// node's own `childNode`. For other nodes it is the node itself and its
    /// child chain. Carbon copy nodes are skipped since they never hold an
    /// active task.
    pub fn all_next_condition_node_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if self.kind.is_fork() || self.kind == NodeKind::ConditionBranch {
            for root in self.branch_roots() {
                collect_chain_keys(root, &mut keys);
            }
        } else {
            collect_chain_keys(self, &mut keys);
        }
        keys
    }

    /// Delay configured in `extendConfig.time`, if any.
    pub fn delay(&self) -> Result<Option<Duration>, ModelError> {
        let Some(raw) = self.extend_config.get("time") else {
            return Ok(None);
        };
        let text = match raw {
            Value::String(s) => s.clone(),
            Value::Null => return Ok(None),
            other => other.to_string(),
        };
        parse_delay(&text).map(Some).ok_or_else(|| ModelError::InvalidTimer {
            node_key: self.node_key.clone(),
            value: text,
        })
    }

    /// Trigger handler identifier from `extendConfig.trigger`.
    pub fn trigger_id(&self) -> Option<&str> {
        self.extend_config.get("trigger").and_then(Value::as_str)
    }

    /// Performance type the node's tasks will carry.
    pub fn perform_type(&self) -> PerformType {
        match self.kind {
            NodeKind::Start => PerformType::Start,
            NodeKind::Cc => PerformType::Copy,
            NodeKind::Timer => PerformType::Timer,
            NodeKind::Trigger => PerformType::Trigger,
            _ => self.examine_mode.unwrap_or(PerformType::Single),
        }
    }
}

fn collect_descendants<'a>(node: &'a NodeModel, out: &mut Vec<&'a NodeModel>) {
    out.push(node);
    for root in node.branch_roots() {
        collect_descendants(root, out);
    }
    if let Some(child) = node.child_node.as_deref() {
        collect_descendants(child, out);
    }
}

fn collect_chain_keys(node: &NodeModel, keys: &mut Vec<String>) {
    if node.kind.creates_task() && node.kind != NodeKind::Cc {
        keys.push(node.node_key.clone());
    }
    for root in node.branch_roots() {
        collect_chain_keys(root, keys);
    }
    if let Some(child) = node.child_node.as_deref() {
        collect_chain_keys(child, keys);
    }
}

/// Parse `N:d`, `N:h`, `N:m` or `HH:MM:SS` into a relative delay.
pub fn parse_delay(value: &str) -> Option<Duration> {
    let parts: Vec<&str> = value.split(':').map(str::trim).collect();
    match parts.as_slice() {
        [amount, unit] => {
            let amount: i64 = amount.parse().ok().filter(|n| *n >= 0)?;
            match *unit {
                "d" => Some(Duration::days(amount)),
                "h" => Some(Duration::hours(amount)),
                "m" => Some(Duration::minutes(amount)),
                _ => None,
            }
        }
        [h, m, s] => {
            let h: i64 = h.parse().ok().filter(|n| *n >= 0)?;
            let m: i64 = m.parse().ok().filter(|n| (0..60).contains(n))?;
            let s: i64 = s.parse().ok().filter(|n| (0..60).contains(n))?;
            Some(Duration::hours(h) + Duration::minutes(m) + Duration::seconds(s))
        }
        _ => None,
    }
}
