//! Point-in-time view of a component tree

use crate::action::{ActionSnapshot, ActionStatus};
use crate::component::ComponentKind;
use crate::key::ChildId;

/// One node of the live tree: its identity, declared actions and children
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub kind: ComponentKind,
    /// `None` for the root
    pub key: Option<ChildId>,
    pub actions: Vec<ActionSnapshot>,
    pub children: Vec<NodeSnapshot>,
}

impl NodeSnapshot {
    /// Resolved keys of the direct children, in declaration order
    pub fn child_keys(&self) -> Vec<&ChildId> {
        self.children.iter().filter_map(|c| c.key.as_ref()).collect()
    }

    pub fn running_actions(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Running)
            .count()
    }

    /// Depth-first search for the first node of `kind`
    pub fn find(&self, kind: ComponentKind) -> Option<&NodeSnapshot> {
        if self.kind == kind {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(kind))
    }

    /// Number of nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(NodeSnapshot::node_count).sum::<usize>()
    }
}
