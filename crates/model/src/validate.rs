//! Model validation. Run this before persisting a definition or a mutated
//! instance copy.
//!
//! Rules enforced:
//! 1. The root is a start node and no other start node exists.
//! 2. Node keys are non-empty and unique across the graph, condition branch
//!    keys included.
//! 3. Branch nodes have branches with at most one default, and every
//!    expression is well formed.
//! 4. Approval modes are real examine modes; vote weights stay within 100.
//! 5. Timer delays parse; call-process nodes name a process.
//!
//! Returns every node key in lookup order on success.

use std::collections::HashSet;

use crate::expression::check_expression;
use crate::node::{ConditionNode, NodeKind, NodeModel, PerformType};
use crate::{ModelError, ProcessModel};

/// Validate the model and return its node keys in lookup order.
///
/// # Errors
/// The first [`ModelError`] found, checking the rules above in order.
pub fn validate_model(model: &ProcessModel) -> Result<Vec<String>, ModelError> {
    // -----------------------------------------------------------------------
    // 1. Start node
    // -----------------------------------------------------------------------
    model.start_node()?;

    let nodes = model.all_nodes();

    // -----------------------------------------------------------------------
    // 2. Keys
    // -----------------------------------------------------------------------
    let mut seen: HashSet<&str> = HashSet::new();
    for (index, node) in nodes.iter().enumerate() {
        if node.node_key.trim().is_empty() {
            return Err(ModelError::EmptyNodeKey(node.node_name.clone()));
        }
        if !seen.insert(node.node_key.as_str()) {
            return Err(ModelError::DuplicateNodeKey(node.node_key.clone()));
        }
        // Branch keys share the node key space.
        for branch in node.condition_nodes.iter().chain(&node.inclusive_nodes) {
            if !seen.insert(branch.node_key.as_str()) {
                return Err(ModelError::DuplicateNodeKey(branch.node_key.clone()));
            }
        }
        if index > 0 && node.kind == NodeKind::Start {
            return Err(ModelError::NestedStartNode(node.node_key.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 3–5. Per-node rules
    // -----------------------------------------------------------------------
    for node in &nodes {
        check_node(node)?;
    }

    Ok(nodes.into_iter().map(|n| n.node_key.clone()).collect())
}

fn check_node(node: &NodeModel) -> Result<(), ModelError> {
    match node.kind {
        NodeKind::ConditionBranch => check_conditions(node, &node.condition_nodes),
        NodeKind::InclusiveBranch => check_conditions(node, &node.inclusive_nodes),
        NodeKind::ParallelBranch if node.parallel_nodes.is_empty() => {
            Err(ModelError::EmptyBranch(node.node_key.clone()))
        }
        NodeKind::Approval => check_approval(node),
        NodeKind::Timer => match node.delay()? {
            Some(_) => Ok(()),
            None => Err(ModelError::InvalidTimer {
                node_key: node.node_key.clone(),
                value: String::new(),
            }),
        },
        NodeKind::Trigger => node.delay().map(|_| ()),
        NodeKind::CallProcess => match node.call_process.as_deref() {
            Some(target) if !target.trim().is_empty() => Ok(()),
            _ => Err(ModelError::MissingCallProcess(node.node_key.clone())),
        },
        _ => Ok(()),
    }
}

fn check_conditions(node: &NodeModel, branches: &[ConditionNode]) -> Result<(), ModelError> {
    if branches.is_empty() {
        return Err(ModelError::EmptyBranch(node.node_key.clone()));
    }

    let malformed = |reason: String| ModelError::MalformedCondition {
        node_key: node.node_key.clone(),
        reason,
    };

    let mut defaults = 0usize;
    for branch in branches {
        if branch.is_default() {
            defaults += 1;
        }
        for group in &branch.condition_list {
            if group.is_empty() {
                return Err(malformed(format!("branch '{}' has an empty group", branch.node_key)));
            }
            for expr in group {
                check_expression(expr).map_err(|e| malformed(format!("branch '{}': {e}", branch.node_key)))?;
            }
        }
    }
    if defaults > 1 {
        return Err(malformed("more than one default branch".into()));
    }
    Ok(())
}

fn check_approval(node: &NodeModel) -> Result<(), ModelError> {
    let mode = node.perform_type();
    if !mode.is_examine_mode() {
        return Err(ModelError::InvalidPerformType {
            node_key: node.node_key.clone(),
            perform_type: mode,
        });
    }
    if mode != PerformType::VoteSign {
        return Ok(());
    }

    let invalid = |reason: &str| ModelError::InvalidWeight {
        node_key: node.node_key.clone(),
        reason: reason.to_owned(),
    };
    if node.pass_weight.is_some_and(|w| w > 100) {
        return Err(invalid("pass weight exceeds 100"));
    }
    let total: u32 = node.node_assignee_list.iter().filter_map(|a| a.weight).sum();
    if total > 100 {
        return Err(invalid("assignee weights exceed 100"));
    }
    Ok(())
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeAssignee, NodeExpression};
    use serde_json::json;

    fn start_with(child: NodeModel) -> ProcessModel {
        ProcessModel::new("t", "t", NodeModel::new("start", "start", NodeKind::Start).with_child(child))
    }

    fn approval(key: &str) -> NodeModel {
        NodeModel::new(key, key, NodeKind::Approval)
    }

    #[test]
    fn valid_model_returns_keys_in_lookup_order() {
        let model = start_with(approval("a").with_child(NodeModel::new("end", "end", NodeKind::End)));
        let keys = validate_model(&model).expect("should be valid");
        assert_eq!(keys, vec!["start", "a", "end"]);
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let model = start_with(approval("a").with_child(approval("a")));
        assert!(matches!(
            validate_model(&model),
            Err(ModelError::DuplicateNodeKey(k)) if k == "a"
        ));
    }

    #[test]
    fn branch_key_clashing_with_a_node_key_is_rejected() {
        let mut route = NodeModel::new("route", "route", NodeKind::ConditionBranch);
        route.condition_nodes = vec![ConditionNode::new("a", "a", 1).then(approval("b")), ConditionNode::new("c2", "c2", 2)];
        let model = start_with(route.with_child(approval("a")));
        assert!(matches!(
            validate_model(&model),
            Err(ModelError::DuplicateNodeKey(k)) if k == "a"
        ));
    }

    #[test]
    fn branch_keys_are_unique_across_branch_nodes() {
        let mut first = NodeModel::new("first", "first", NodeKind::ConditionBranch);
        first.condition_nodes = vec![ConditionNode::new("c", "c", 1)];
        let mut second = NodeModel::new("second", "second", NodeKind::InclusiveBranch);
        second.inclusive_nodes = vec![ConditionNode::new("c", "c", 1)];
        let model = start_with(first.with_child(second));
        assert!(matches!(
            validate_model(&model),
            Err(ModelError::DuplicateNodeKey(k)) if k == "c"
        ));
    }

    #[test]
    fn missing_start_is_rejected() {
        let model = ProcessModel::new("t", "t", approval("a"));
        assert!(matches!(validate_model(&model), Err(ModelError::MissingStartNode)));
    }

    #[test]
    fn nested_start_is_rejected() {
        let model = start_with(NodeModel::new("again", "again", NodeKind::Start));
        assert!(matches!(validate_model(&model), Err(ModelError::NestedStartNode(_))));
    }

    #[test]
    fn two_default_branches_are_malformed() {
        let mut route = NodeModel::new("route", "route", NodeKind::ConditionBranch);
        route.condition_nodes = vec![ConditionNode::new("c1", "c1", 1), ConditionNode::new("c2", "c2", 2)];
        assert!(matches!(
            validate_model(&start_with(route)),
            Err(ModelError::MalformedCondition { node_key, .. }) if node_key == "route"
        ));
    }

    #[test]
    fn bad_operator_is_malformed() {
        let mut route = NodeModel::new("route", "route", NodeKind::ConditionBranch);
        route.condition_nodes = vec![
            ConditionNode::new("c1", "c1", 1).when(vec![NodeExpression::new("x", "~", json!(1))]),
            ConditionNode::new("c2", "c2", 2),
        ];
        assert!(matches!(
            validate_model(&start_with(route)),
            Err(ModelError::MalformedCondition { .. })
        ));
    }

    #[test]
    fn empty_parallel_branch_is_rejected() {
        let fork = NodeModel::new("fork", "fork", NodeKind::ParallelBranch);
        assert!(matches!(validate_model(&start_with(fork)), Err(ModelError::EmptyBranch(_))));
    }

    #[test]
    fn vote_weights_over_one_hundred_are_rejected() {
        let vote = approval("vote").with_assignees(
            PerformType::VoteSign,
            vec![NodeAssignee::weighted("a", "A", 70), NodeAssignee::weighted("b", "B", 40)],
        );
        assert!(matches!(
            validate_model(&start_with(vote)),
            Err(ModelError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn approval_cannot_use_internal_perform_types() {
        let node = approval("a").with_assignees(PerformType::Copy, vec![]);
        assert!(matches!(
            validate_model(&start_with(node)),
            Err(ModelError::InvalidPerformType { .. })
        ));
    }

    #[test]
    fn timer_requires_a_delay() {
        let timer = NodeModel::new("wait", "wait", NodeKind::Timer);
        assert!(matches!(validate_model(&start_with(timer)), Err(ModelError::InvalidTimer { .. })));
    }

    #[test]
    fn call_process_requires_a_target() {
        let call = NodeModel::new("sub", "sub", NodeKind::CallProcess);
        assert!(matches!(
            validate_model(&start_with(call)),
            Err(ModelError::MissingCallProcess(k)) if k == "sub"
        ));
    }
}
