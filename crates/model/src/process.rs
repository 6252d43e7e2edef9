//! The parsed process graph plus its transient parent index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::node::{NodeAssignee, NodeKind, NodeModel};
use crate::ModelError;

/// Result of asking the graph what follows a completed node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Successor<'a> {
    /// Activate this node next.
    Node(&'a NodeModel),
    /// A join is still waiting on active sibling branches.
    Waiting,
    /// Nothing follows; the instance may end.
    Exhausted,
}

/// Where [`ProcessModel::insert_node`] places the new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    Before,
    After,
}

/// A process definition document.
///
/// The parent index maps each node key to the key of the node that owns it
/// (through `childNode` or a branch). It is rebuilt on every parse or
/// mutation and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessModel {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    pub node_config: NodeModel,
    #[serde(skip)]
    parents: HashMap<String, String>,
}

impl PartialEq for ProcessModel {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.key == other.key
            && self.instance_url == other.instance_url
            && self.node_config == other.node_config
    }
}

impl ProcessModel {
    pub fn new(name: impl Into<String>, key: impl Into<String>, node_config: NodeModel) -> Self {
        let mut model = Self {
            name: name.into(),
            key: key.into(),
            instance_url: None,
            node_config,
            parents: HashMap::new(),
        };
        model.build_parent_index();
        model
    }

    /// Parse model content and build the parent index.
    pub fn parse(content: &str) -> Result<Self, ModelError> {
        if content.trim().is_empty() {
            return Err(ModelError::EmptyContent);
        }
        let mut model: Self = serde_json::from_str(content)?;
        model.build_parent_index();
        Ok(model)
    }

    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The root node, which must be a start node.
    pub fn start_node(&self) -> Result<&NodeModel, ModelError> {
        if self.node_config.kind == NodeKind::Start {
            Ok(&self.node_config)
        } else {
            Err(ModelError::MissingStartNode)
        }
    }

    pub fn get_node(&self, key: &str) -> Option<&NodeModel> {
        self.node_config.get_node(key)
    }

    pub fn parent_of(&self, key: &str) -> Option<&NodeModel> {
        self.parents.get(key).and_then(|parent| self.get_node(parent))
    }

    /// Decide what follows `key` given the keys of the instance's active tasks.
    ///
    /// A `childNode` always wins. Otherwise the walk climbs the parent index:
    /// a condition branch resumes at its merge node, a fork resumes at its
    /// `childNode` only once no active key lies inside any of its branches.
    pub fn successor(&self, key: &str, active: &[String]) -> Result<Successor<'_>, ModelError> {
        let node = self
            .get_node(key)
            .ok_or_else(|| ModelError::NodeNotFound(key.to_owned()))?;
        if let Some(child) = node.child_node.as_deref() {
            return Ok(Successor::Node(child));
        }
        Ok(self.find_next_node(node, active))
    }

    /// Convenience wrapper over [`successor`](Self::successor) returning only
    /// a node to activate.
    pub fn next_node(&self, key: &str, active: &[String]) -> Option<&NodeModel> {
        match self.successor(key, active) {
            Ok(Successor::Node(node)) => Some(node),
            _ => None,
        }
    }

    fn find_next_node<'a>(&'a self, node: &'a NodeModel, active: &[String]) -> Successor<'a> {
        let mut current = node;
        loop {
            let Some(parent) = self.parent_of(&current.node_key) else {
                return Successor::Exhausted;
            };
            if parent.kind == NodeKind::Start {
                return Successor::Exhausted;
            }

            let on_trunk = parent
                .child_node
                .as_deref()
                .is_some_and(|child| child.node_key == current.node_key);

            if !on_trunk {
                if parent.kind.is_condition() {
                    if let Some(child) = parent.child_node.as_deref() {
                        return Successor::Node(child);
                    }
                } else if parent.kind.is_fork() {
                    let branch_keys = parent.all_next_condition_node_keys();
                    if active.iter().any(|key| branch_keys.contains(key)) {
                        return Successor::Waiting;
                    }
                    if let Some(child) = parent.child_node.as_deref() {
                        return Successor::Node(child);
                    }
                }
            }
            current = parent;
        }
    }

    /// Keys of every work-bearing node inside the branches of `key`.
    pub fn all_next_condition_node_keys(&self, key: &str) -> Vec<String> {
        self.get_node(key)
            .map(NodeModel::all_next_condition_node_keys)
            .unwrap_or_default()
    }

    /// Keys of the work-bearing ancestors of `key`, nearest first.
    pub fn previous_node_keys(&self, key: &str) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let mut cursor = self.parent_of(key);
        while let Some(node) = cursor {
            let bearing = node.kind == NodeKind::Start || node.kind.creates_task();
            if bearing && node.kind != NodeKind::Cc && !keys.contains(&node.node_key) {
                keys.push(node.node_key.clone());
            }
            cursor = self.parent_of(&node.node_key);
        }
        keys
    }

    /// Every node in the graph, in lookup order.
    pub fn all_nodes(&self) -> Vec<&NodeModel> {
        self.node_config.descendants()
    }

    /// Approval and carbon-copy nodes that still need assignees.
    pub fn unset_assignee_nodes(&self) -> Vec<&NodeModel> {
        use crate::node::SetType;
        self.all_nodes()
            .into_iter()
            .filter(|n| matches!(n.kind, NodeKind::Approval | NodeKind::Cc))
            .filter(|n| n.node_assignee_list.is_empty())
            .filter(|n| !matches!(n.set_type, SetType::Initiator | SetType::Dynamic))
            .collect()
    }

    /// Replace the assignee lists of the given nodes.
    pub fn apply_dynamic_assignees(
        &mut self,
        assignees: &HashMap<String, Vec<NodeAssignee>>,
    ) -> Result<(), ModelError> {
        for (key, list) in assignees {
            let node = self
                .node_config
                .get_node_mut(key)
                .ok_or_else(|| ModelError::NodeNotFound(key.clone()))?;
            node.node_assignee_list = list.clone();
        }
        Ok(())
    }

    /// Splice `node` into the graph next to `anchor_key`.
    ///
    /// `After` makes `node` the anchor's child and hands it the anchor's old
    /// child. `Before` puts `node` into whichever slot of the anchor's parent
    /// currently holds the anchor (trunk, condition branch, inclusive branch
    /// or parallel branch) with the anchor as its child.
    pub fn insert_node(
        &mut self,
        anchor_key: &str,
        mut node: NodeModel,
        position: InsertPosition,
    ) -> Result<(), ModelError> {
        for inserted in node.descendants() {
            if self.get_node(&inserted.node_key).is_some() {
                return Err(ModelError::DuplicateNodeKey(inserted.node_key.clone()));
            }
        }
        if self.get_node(anchor_key).is_none() {
            return Err(ModelError::NodeNotFound(anchor_key.to_owned()));
        }

        match position {
            InsertPosition::After => {
                let anchor = self
                    .node_config
                    .get_node_mut(anchor_key)
                    .ok_or_else(|| ModelError::NodeNotFound(anchor_key.to_owned()))?;
                node.child_node = anchor.child_node.take();
                anchor.child_node = Some(Box::new(node));
            }
            InsertPosition::Before => {
                let parent_key = self
                    .parents
                    .get(anchor_key)
                    .cloned()
                    .ok_or_else(|| ModelError::InsertBeforeRoot(anchor_key.to_owned()))?;
                let parent = self
                    .node_config
                    .get_node_mut(&parent_key)
                    .ok_or_else(|| ModelError::NodeNotFound(parent_key.clone()))?;
                splice_before(parent, anchor_key, node)?;
            }
        }

        self.build_parent_index();
        Ok(())
    }

    fn build_parent_index(&mut self) {
        let mut parents = HashMap::new();
        index_children(&self.node_config, &mut parents);
        self.parents = parents;
    }
}

fn index_children(node: &NodeModel, parents: &mut HashMap<String, String>) {
    for root in node.branch_roots() {
        parents.insert(root.node_key.clone(), node.node_key.clone());
        index_children(root, parents);
    }
    if let Some(child) = node.child_node.as_deref() {
        parents.insert(child.node_key.clone(), node.node_key.clone());
        index_children(child, parents);
    }
}

fn splice_before(parent: &mut NodeModel, anchor_key: &str, mut node: NodeModel) -> Result<(), ModelError> {
    let holds = |slot: &Option<Box<NodeModel>>| {
        slot.as_deref().is_some_and(|n| n.node_key == anchor_key)
    };

    if holds(&parent.child_node) {
        node.child_node = parent.child_node.take();
        parent.child_node = Some(Box::new(node));
        return Ok(());
    }

    let branch = parent
        .condition_nodes
        .iter_mut()
        .chain(parent.inclusive_nodes.iter_mut())
        .find(|c| holds(&c.child_node));
    if let Some(branch) = branch {
        node.child_node = branch.child_node.take();
        branch.child_node = Some(Box::new(node));
        return Ok(());
    }

    if let Some(slot) = parent.parallel_nodes.iter_mut().find(|n| n.node_key == anchor_key) {
        let anchor = std::mem::replace(slot, node);
        slot.child_node = Some(Box::new(anchor));
        return Ok(());
    }

    Err(ModelError::NodeNotFound(anchor_key.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ConditionNode, NodeExpression, PerformType};
    use serde_json::json;

    fn approval(key: &str) -> NodeModel {
        NodeModel::new(key, key, NodeKind::Approval)
            .with_assignees(PerformType::Single, vec![NodeAssignee::new("u1", "User 1")])
    }

    /// start → condition(amount > 100 ? big : default small) → merge → end
    fn condition_model() -> ProcessModel {
        let mut branch = NodeModel::new("route", "route", NodeKind::ConditionBranch);
        branch.condition_nodes = vec![
            ConditionNode::new("c_big", "big", 1)
                .when(vec![NodeExpression::new("amount", ">", json!(100))])
                .then(approval("big")),
            ConditionNode::new("c_small", "small", 2).then(approval("small")),
        ];
        let branch = branch.with_child(approval("merge").with_child(NodeModel::new("end", "end", NodeKind::End)));
        ProcessModel::new("expense", "expense", NodeModel::new("start", "start", NodeKind::Start).with_child(branch))
    }

    /// start → parallel(a1 → a2 | b1) → join → end
    fn parallel_model() -> ProcessModel {
        let mut fork = NodeModel::new("fork", "fork", NodeKind::ParallelBranch);
        fork.parallel_nodes = vec![approval("a1").with_child(approval("a2")), approval("b1")];
        let fork = fork.with_child(approval("join"));
        ProcessModel::new("p", "p", NodeModel::new("start", "start", NodeKind::Start).with_child(fork))
    }

    fn keys(active: &[&str]) -> Vec<String> {
        active.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn get_node_finds_nodes_inside_branches() {
        let model = condition_model();
        assert_eq!(model.get_node("small").map(|n| n.kind), Some(NodeKind::Approval));
        assert_eq!(model.get_node("end").map(|n| n.kind), Some(NodeKind::End));
        assert!(model.get_node("ghost").is_none());
    }

    #[test]
    fn parent_index_links_branch_roots_to_their_branch_node() {
        let model = condition_model();
        assert_eq!(model.parent_of("big").map(|n| n.node_key.as_str()), Some("route"));
        assert_eq!(model.parent_of("merge").map(|n| n.node_key.as_str()), Some("route"));
        assert_eq!(model.parent_of("route").map(|n| n.node_key.as_str()), Some("start"));
        assert!(model.parent_of("start").is_none());
    }

    #[test]
    fn branch_leaf_resumes_at_merge_node() {
        let model = condition_model();
        assert_eq!(model.next_node("big", &[]).map(|n| n.node_key.as_str()), Some("merge"));
        assert_eq!(model.next_node("merge", &[]).map(|n| n.node_key.as_str()), Some("end"));
        assert_eq!(model.successor("end", &[]).ok(), Some(Successor::Exhausted));
    }

    #[test]
    fn join_waits_while_a_sibling_branch_is_active() {
        let model = parallel_model();
        assert_eq!(model.successor("b1", &keys(&["a1"])).ok(), Some(Successor::Waiting));
        assert_eq!(model.successor("b1", &keys(&["a2"])).ok(), Some(Successor::Waiting));
        assert_eq!(model.next_node("a1", &keys(&["b1"])).map(|n| n.node_key.as_str()), Some("a2"));
        assert_eq!(model.next_node("b1", &[]).map(|n| n.node_key.as_str()), Some("join"));
        assert_eq!(model.successor("join", &[]).ok(), Some(Successor::Exhausted));
    }

    #[test]
    fn active_tasks_outside_the_fork_do_not_block_the_join() {
        let model = parallel_model();
        assert_eq!(
            model.next_node("a2", &keys(&["elsewhere"])).map(|n| n.node_key.as_str()),
            Some("join")
        );
    }

    #[test]
    fn nested_fork_without_child_climbs_to_outer_trunk() {
        let mut inner = NodeModel::new("inner", "inner", NodeKind::ParallelBranch);
        inner.parallel_nodes = vec![approval("x"), approval("y")];
        let mut route = NodeModel::new("route", "route", NodeKind::ConditionBranch);
        route.condition_nodes = vec![ConditionNode::new("c", "c", 1).then(inner)];
        let route = route.with_child(approval("after"));
        let model = ProcessModel::new("n", "n", NodeModel::new("start", "start", NodeKind::Start).with_child(route));

        assert_eq!(model.successor("x", &keys(&["y"])).ok(), Some(Successor::Waiting));
        assert_eq!(model.next_node("y", &[]).map(|n| n.node_key.as_str()), Some("after"));
    }

    #[test]
    fn outer_join_waits_on_nested_fork_trunk() {
        // start → outer{ a → inner{x | y} → z | b } → join
        let mut inner = NodeModel::new("inner", "inner", NodeKind::ParallelBranch);
        inner.parallel_nodes = vec![approval("x"), approval("y")];
        let inner = inner.with_child(approval("z"));
        let mut outer = NodeModel::new("outer", "outer", NodeKind::ParallelBranch);
        outer.parallel_nodes = vec![approval("a").with_child(inner), approval("b")];
        let outer = outer.with_child(approval("join"));
        let model = ProcessModel::new("n", "n", NodeModel::new("start", "start", NodeKind::Start).with_child(outer));

        assert_eq!(model.next_node("y", &keys(&["b"])).map(|n| n.node_key.as_str()), Some("z"));
        assert_eq!(model.successor("b", &keys(&["z"])).ok(), Some(Successor::Waiting));
        assert_eq!(model.successor("z", &keys(&["b"])).ok(), Some(Successor::Waiting));
        assert_eq!(model.next_node("z", &[]).map(|n| n.node_key.as_str()), Some("join"));
    }

    #[test]
    fn serialize_then_parse_reproduces_the_graph() {
        let model = condition_model();
        let json = model.to_json().expect("serialize");
        assert!(!json.contains("parent"));
        let reparsed = ProcessModel::parse(&json).expect("parse");
        assert_eq!(reparsed, model);
        assert_eq!(reparsed.parent_of("small").map(|n| n.node_key.as_str()), Some("route"));
    }

    #[test]
    fn empty_content_is_rejected() {
        assert!(matches!(ProcessModel::parse("  "), Err(ModelError::EmptyContent)));
        assert!(matches!(ProcessModel::parse("{"), Err(ModelError::Json(_))));
    }

    #[test]
    fn insert_after_takes_over_the_child() {
        let mut model = condition_model();
        model
            .insert_node("merge", approval("extra"), InsertPosition::After)
            .expect("insert");
        assert_eq!(model.next_node("merge", &[]).map(|n| n.node_key.as_str()), Some("extra"));
        assert_eq!(model.next_node("extra", &[]).map(|n| n.node_key.as_str()), Some("end"));
    }

    #[test]
    fn insert_before_a_branch_root_splices_into_the_branch() {
        let mut model = condition_model();
        model
            .insert_node("small", approval("pre"), InsertPosition::Before)
            .expect("insert");
        assert_eq!(model.parent_of("pre").map(|n| n.node_key.as_str()), Some("route"));
        assert_eq!(model.next_node("pre", &[]).map(|n| n.node_key.as_str()), Some("small"));
    }

    #[test]
    fn insert_before_a_parallel_root_replaces_the_slot() {
        let mut model = parallel_model();
        model
            .insert_node("b1", approval("b0"), InsertPosition::Before)
            .expect("insert");
        assert_eq!(model.parent_of("b0").map(|n| n.node_key.as_str()), Some("fork"));
        assert_eq!(model.parent_of("b1").map(|n| n.node_key.as_str()), Some("b0"));
        assert_eq!(model.successor("a2", &keys(&["b1"])).ok(), Some(Successor::Waiting));
    }

    #[test]
    fn insert_rejects_duplicate_keys_and_root_before() {
        let mut model = condition_model();
        assert!(matches!(
            model.insert_node("merge", approval("big"), InsertPosition::After),
            Err(ModelError::DuplicateNodeKey(k)) if k == "big"
        ));
        assert!(matches!(
            model.insert_node("start", approval("zz"), InsertPosition::Before),
            Err(ModelError::InsertBeforeRoot(_))
        ));
    }

    #[test]
    fn previous_keys_skip_branch_nodes() {
        let model = condition_model();
        let previous = model.previous_node_keys("end");
        assert_eq!(previous, vec!["merge", "start"]);
    }

    #[test]
    fn dynamic_assignees_replace_node_lists() {
        let mut model = condition_model();
        let mut map = HashMap::new();
        map.insert("big".to_string(), vec![NodeAssignee::new("boss", "Boss")]);
        model.apply_dynamic_assignees(&map).expect("apply");
        assert_eq!(model.get_node("big").map(|n| n.node_assignee_list[0].id.as_str()), Some("boss"));

        map.insert("ghost".to_string(), vec![]);
        assert!(model.apply_dynamic_assignees(&map).is_err());
    }
}
