//! Condition trees.
//!
//! Rules store their conditions flat, with `group_id`, `parent_id` and
//! `nesting_level` describing the intended structure. The tree is built
//! once when a rule is compiled and reused for every evaluation.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::CompileError;
use crate::models::{Condition, LogicalOperator};

/// A node of a compiled condition tree.
///
/// `link` is the operator joining the node to its next sibling.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Leaf {
        /// Position of the condition in the rule's condition list.
        index: usize,
        required: bool,
        link: LogicalOperator,
    },
    Group {
        id: String,
        children: Vec<ConditionNode>,
        /// True when any descendant is required.
        required: bool,
        /// Operator of the group's last member.
        link: LogicalOperator,
    },
}

impl ConditionNode {
    pub fn required(&self) -> bool {
        match self {
            ConditionNode::Leaf { required, .. } | ConditionNode::Group { required, .. } => *required,
        }
    }

    pub fn link(&self) -> LogicalOperator {
        match self {
            ConditionNode::Leaf { link, .. } | ConditionNode::Group { link, .. } => *link,
        }
    }

    fn value(&self, passed: &[bool]) -> bool {
        match self {
            ConditionNode::Leaf { index, .. } => passed.get(*index).copied().unwrap_or(false),
            ConditionNode::Group { children, .. } => combine(children, passed),
        }
    }

    /// True when every required leaf under this node passed.
    fn required_met(&self, passed: &[bool]) -> bool {
        match self {
            ConditionNode::Leaf { required: false, .. } => true,
            ConditionNode::Leaf { index, .. } => passed.get(*index).copied().unwrap_or(false),
            ConditionNode::Group { required: false, .. } => true,
            ConditionNode::Group { children, .. } => children.iter().all(|child| child.required_met(passed)),
        }
    }
}

/// Fold sibling values left to right, each joined to the next by its own
/// link operator. An empty list is true.
fn combine(nodes: &[ConditionNode], passed: &[bool]) -> bool {
    let mut iter = nodes.iter();
    let Some(first) = iter.next() else {
        return true;
    };
    let mut value = first.value(passed);
    let mut link = first.link();
    for node in iter {
        value = link.combine(value, node.value(passed));
        link = node.link();
    }
    value
}

/// Logical outcome of a tree for one set of condition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeVerdict {
    /// Left-to-right value of the root.
    pub logical_result: bool,
    /// Every required condition passed, wherever it sits in the tree.
    pub required_passed: bool,
}

/// The compiled structure of a rule's conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTree {
    roots: Vec<ConditionNode>,
    ids: Vec<u64>,
}

/// Entry of a container before the tree is assembled.
enum Slot {
    Leaf(usize),
    Group(String),
}

struct Builder<'a> {
    rule_id: u64,
    conditions: &'a [Condition],
    /// Parent of each group, `None` for top-level groups.
    parents: HashMap<&'a str, Option<&'a str>>,
    depths: HashMap<&'a str, u32>,
    placed: HashSet<&'a str>,
    slots: HashMap<Option<&'a str>, Vec<Slot>>,
}

impl ConditionTree {
    /// Build and validate the tree for a rule's conditions.
    pub fn build(rule_id: u64, conditions: &[Condition]) -> Result<Self, CompileError> {
        let mut builder = Builder {
            rule_id,
            conditions,
            parents: HashMap::new(),
            depths: HashMap::new(),
            placed: HashSet::new(),
            slots: HashMap::new(),
        };
        builder.collect_groups()?;
        builder.compute_depths()?;
        builder.check_nesting()?;

        for (index, condition) in conditions.iter().enumerate() {
            let container = match condition.group_id.as_deref() {
                Some(group) => Some(group),
                None => condition.parent_id.as_deref(),
            };
            if let Some(group) = container {
                builder.place_group(group);
            }
            builder.slots.entry(container).or_default().push(Slot::Leaf(index));
        }

        let roots = builder.assemble(None);
        Ok(Self {
            roots,
            ids: conditions.iter().map(|c| c.id).collect(),
        })
    }

    pub fn roots(&self) -> &[ConditionNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Combine per-condition pass flags, indexed like the rule's
    /// condition list.
    pub fn evaluate(&self, passed: &[bool]) -> TreeVerdict {
        TreeVerdict {
            logical_result: combine(&self.roots, passed),
            required_passed: self.roots.iter().all(|node| node.required_met(passed)),
        }
    }

    fn render(&self, nodes: &[ConditionNode], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in nodes.iter().enumerate() {
            if i > 0 {
                let link = nodes[i - 1].link();
                write!(f, " {} ", if link == LogicalOperator::And { "and" } else { "or" })?;
            }
            match node {
                ConditionNode::Leaf { index, required, .. } => {
                    write!(f, "#{}", self.ids.get(*index).copied().unwrap_or_default())?;
                    if *required {
                        write!(f, "!")?;
                    }
                }
                ConditionNode::Group { id, children, .. } => {
                    write!(f, "{}(", id)?;
                    self.render(children, f)?;
                    write!(f, ")")?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConditionTree {
    /// Compact form such as `g1(#1! and #2) or #3`; `!` marks required
    /// conditions.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.roots.is_empty() {
            return write!(f, "(always)");
        }
        self.render(&self.roots, f)
    }
}

impl<'a> Builder<'a> {
    fn collect_groups(&mut self) -> Result<(), CompileError> {
        for condition in self.conditions {
            let Some(group) = condition.group_id.as_deref() else {
                continue;
            };
            let parent = condition.parent_id.as_deref();
            match self.parents.get(group).copied() {
                None => {
                    self.parents.insert(group, parent);
                }
                Some(None) => {
                    if parent.is_some() {
                        self.parents.insert(group, parent);
                    }
                }
                Some(Some(existing)) => {
                    if parent.is_some_and(|p| p != existing) {
                        return Err(CompileError::ConflictingParent {
                            rule_id: self.rule_id,
                            group_id: group.to_string(),
                        });
                    }
                }
            }
        }

        let referenced = self
            .parents
            .values()
            .flatten()
            .copied()
            .chain(
                self.conditions
                    .iter()
                    .filter(|c| c.group_id.is_none())
                    .filter_map(|c| c.parent_id.as_deref()),
            );
        for parent in referenced {
            if !self.parents.contains_key(parent) {
                return Err(CompileError::UnknownParentGroup {
                    rule_id: self.rule_id,
                    parent_id: parent.to_string(),
                });
            }
        }
        Ok(())
    }

    fn compute_depths(&mut self) -> Result<(), CompileError> {
        let mut groups: Vec<&'a str> = self.parents.keys().copied().collect();
        groups.sort_unstable();

        for group in groups {
            let mut chain = vec![group];
            let mut current = group;
            while let Some(Some(parent)) = self.parents.get(current).copied() {
                if chain.contains(&parent) {
                    return Err(CompileError::CyclicConditionTree {
                        rule_id: self.rule_id,
                        group_id: parent.to_string(),
                    });
                }
                chain.push(parent);
                current = parent;
            }
            let depth = chain.len() as u32 - 1;
            self.depths.insert(group, depth);
        }
        Ok(())
    }

    /// A non-zero declared level must match the computed depth.
    fn check_nesting(&self) -> Result<(), CompileError> {
        for condition in self.conditions {
            let expected = match (condition.group_id.as_deref(), condition.parent_id.as_deref()) {
                (Some(group), _) => self.depths.get(group).copied().unwrap_or(0),
                (None, Some(parent)) => self.depths.get(parent).copied().unwrap_or(0) + 1,
                (None, None) => 0,
            };
            if condition.nesting_level != 0 && condition.nesting_level != expected {
                return Err(CompileError::InconsistentNesting {
                    rule_id: self.rule_id,
                    condition_id: condition.id,
                    declared: condition.nesting_level,
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Put a group into its container at its first appearance, parents
    /// first.
    fn place_group(&mut self, group: &'a str) {
        if self.placed.contains(group) {
            return;
        }
        self.placed.insert(group);
        let parent = self.parents.get(group).copied().flatten();
        if let Some(parent) = parent {
            self.place_group(parent);
        }
        self.slots
            .entry(parent)
            .or_default()
            .push(Slot::Group(group.to_string()));
    }

    fn assemble(&mut self, container: Option<&'a str>) -> Vec<ConditionNode> {
        let slots = self.slots.remove(&container).unwrap_or_default();
        let mut nodes = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Leaf(index) => {
                    let condition = &self.conditions[index];
                    nodes.push(ConditionNode::Leaf {
                        index,
                        required: condition.is_required,
                        link: condition.logical_operator,
                    });
                }
                Slot::Group(id) => {
                    let key = self.parents.get_key_value(id.as_str()).map(|(k, _)| *k);
                    let children = match key {
                        Some(key) => self.assemble(Some(key)),
                        None => Vec::new(),
                    };
                    let required = children.iter().any(ConditionNode::required);
                    let link = children.last().map(ConditionNode::link).unwrap_or_default();
                    nodes.push(ConditionNode::Group {
                        id,
                        children,
                        required,
                        link,
                    });
                }
            }
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operator;
    use pretty_assertions::assert_eq;

    fn cond(id: u64) -> Condition {
        Condition::field(format!("f{}", id), Operator::IsNotEmpty, "").with_id(id)
    }

    #[test]
    fn test_ungrouped_conditions_are_top_level_leaves() {
        let tree = ConditionTree::build(1, &[cond(1), cond(2).then(LogicalOperator::Or), cond(3)]).unwrap();
        assert_eq!(tree.roots().len(), 3);
        assert_eq!(tree.to_string(), "#1 and #2 or #3");

        // (T and F) or T
        assert!(tree.evaluate(&[true, false, true]).logical_result);
        // (F and T) or F
        assert!(!tree.evaluate(&[false, true, false]).logical_result);
    }

    #[test]
    fn test_group_links_with_last_member_operator() {
        let conditions = [
            cond(1).in_group("g1"),
            cond(2).in_group("g1").then(LogicalOperator::Or),
            cond(3),
        ];
        let tree = ConditionTree::build(1, &conditions).unwrap();
        assert_eq!(tree.to_string(), "g1(#1 and #2) or #3");

        assert!(tree.evaluate(&[true, true, false]).logical_result);
        assert!(tree.evaluate(&[true, false, true]).logical_result);
        assert!(!tree.evaluate(&[true, false, false]).logical_result);
    }

    #[test]
    fn test_children_keep_first_appearance_order() {
        let conditions = [
            cond(1),
            cond(2).in_group("g1"),
            cond(3),
            cond(4).in_group("g1"),
        ];
        let tree = ConditionTree::build(1, &conditions).unwrap();
        assert_eq!(tree.to_string(), "#1 and g1(#2 and #4) and #3");
    }

    #[test]
    fn test_nested_groups() {
        let conditions = [
            cond(1).in_group("outer").then(LogicalOperator::Or),
            cond(2).in_group("inner").with_parent("outer", 1),
            cond(3).in_group("inner"),
            cond(4),
        ];
        let tree = ConditionTree::build(7, &conditions).unwrap();
        assert_eq!(tree.to_string(), "outer(#1 or inner(#2 and #3)) and #4");

        assert!(tree.evaluate(&[false, true, true, true]).logical_result);
        assert!(!tree.evaluate(&[false, true, false, true]).logical_result);
    }

    #[test]
    fn test_required_conditions_gate_inside_groups() {
        let conditions = [
            cond(1).required().in_group("either").then(LogicalOperator::Or),
            cond(2).required().in_group("either"),
            cond(3),
        ];
        let tree = ConditionTree::build(1, &conditions).unwrap();
        assert!(tree.roots()[0].required());
        assert!(!tree.roots()[1].required());

        let verdict = tree.evaluate(&[false, true, false]);
        assert!(verdict.logical_result);
        assert!(!verdict.required_passed);
        assert!(!tree.evaluate(&[false, false, true]).required_passed);
        assert!(tree.evaluate(&[true, true, false]).required_passed);
    }

    #[test]
    fn test_optional_group_member_does_not_gate() {
        let conditions = [
            cond(1).required().in_group("g").then(LogicalOperator::Or),
            cond(2).in_group("g"),
        ];
        let tree = ConditionTree::build(1, &conditions).unwrap();
        assert!(tree.evaluate(&[true, false]).required_passed);
        assert!(!tree.evaluate(&[false, true]).required_passed);
    }

    #[test]
    fn test_required_leaf_false_fails_gate() {
        let conditions = [cond(1).required(), cond(2).then(LogicalOperator::Or), cond(3)];
        let tree = ConditionTree::build(1, &conditions).unwrap();
        let verdict = tree.evaluate(&[false, true, true]);
        assert!(!verdict.required_passed);
    }

    #[test]
    fn test_empty_tree_is_true() {
        let tree = ConditionTree::build(1, &[]).unwrap();
        assert!(tree.is_empty());
        assert_eq!(
            tree.evaluate(&[]),
            TreeVerdict {
                logical_result: true,
                required_passed: true
            }
        );
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let err = ConditionTree::build(3, &[cond(1).in_group("g1").with_parent("nope", 1)]).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownParentGroup {
                rule_id: 3,
                parent_id: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_conflicting_parents_are_rejected() {
        let conditions = [
            cond(1).in_group("a"),
            cond(2).in_group("b"),
            cond(3).in_group("c").with_parent("a", 1),
            cond(4).in_group("c").with_parent("b", 1),
        ];
        let err = ConditionTree::build(3, &conditions).unwrap_err();
        assert_eq!(
            err,
            CompileError::ConflictingParent {
                rule_id: 3,
                group_id: "c".to_string()
            }
        );
    }

    #[test]
    fn test_parent_cycle_is_rejected() {
        let conditions = [
            cond(1).in_group("a").with_parent("b", 0),
            cond(2).in_group("b").with_parent("a", 0),
        ];
        let err = ConditionTree::build(3, &conditions).unwrap_err();
        assert!(matches!(err, CompileError::CyclicConditionTree { rule_id: 3, .. }));

        let selfish = ConditionTree::build(3, &[cond(1).in_group("a").with_parent("a", 0)]).unwrap_err();
        assert!(matches!(selfish, CompileError::CyclicConditionTree { .. }));
    }

    #[test]
    fn test_inconsistent_nesting_is_rejected() {
        let conditions = [
            cond(1).in_group("outer"),
            cond(2).in_group("inner").with_parent("outer", 3),
        ];
        let err = ConditionTree::build(3, &conditions).unwrap_err();
        assert_eq!(
            err,
            CompileError::InconsistentNesting {
                rule_id: 3,
                condition_id: 2,
                declared: 3,
                expected: 1
            }
        );
    }

    #[test]
    fn test_ungrouped_condition_under_parent() {
        let conditions = [cond(1).in_group("g"), cond(2).with_parent("g", 1)];
        let tree = ConditionTree::build(1, &conditions).unwrap();
        assert_eq!(tree.to_string(), "g(#1 and #2)");
    }
}
