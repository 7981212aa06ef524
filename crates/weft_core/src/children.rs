//! Keyed registry of child component instances
//!
//! Children are created lazily the first time an evaluation declares them
//! and live as long as every later evaluation keeps declaring them. A child
//! missing from an evaluation is detached and terminated during commit.

use crate::component::ComponentKind;
use crate::key::{ChildId, ChildKey, KeyRound};
use crate::snapshot::NodeSnapshot;
use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashSet};
use std::any::Any;
use std::sync::Arc;

type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// A type-erased component instance
pub(crate) trait ChildNode: Send + Sync {
    fn kind(&self) -> ComponentKind;

    fn as_any(&self) -> &dyn Any;

    /// Tear down this node and its subtree; idempotent
    fn terminate(&self);

    /// Apply the declarations of the last evaluation. False when the pass
    /// moved and the remaining work was deferred.
    fn commit(&self, pass: u64) -> bool;

    fn snapshot(&self) -> NodeSnapshot;
}

/// Result of resolving a declared child key
pub(crate) struct ResolvedChild {
    pub id: ChildId,
    /// Set the first time this key collides in this parent
    pub first_collision: bool,
}

#[derive(Default)]
pub(crate) struct ChildrenRegistry {
    entries: FxIndexMap<ChildId, Arc<dyn ChildNode>>,
    round: KeyRound<ChildKey>,
    reported: FxHashSet<ChildKey>,
    detached: Vec<Arc<dyn ChildNode>>,
}

impl ChildrenRegistry {
    pub fn begin_round(&mut self) {
        self.round.begin();
    }

    pub fn resolve(&mut self, key: ChildKey) -> ResolvedChild {
        let id = self.round.resolve(key);
        let first_collision = id.index > 0 && self.reported.insert(id.key.clone());
        ResolvedChild {
            id,
            first_collision,
        }
    }

    /// Existing instance for `id`, or a new one from `create`
    pub fn get_or_insert_with(
        &mut self,
        id: &ChildId,
        create: impl FnOnce() -> Arc<dyn ChildNode>,
    ) -> Arc<dyn ChildNode> {
        if let Some(node) = self.entries.get(id) {
            return Arc::clone(node);
        }
        let node = create();
        self.entries.insert(id.clone(), Arc::clone(&node));
        node
    }

    /// Detach every child the latest evaluation did not declare
    pub fn finish_round(&mut self) {
        let stale: Vec<ChildId> = self
            .entries
            .keys()
            .filter(|id| !self.round.contains(id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(node) = self.entries.shift_remove(&id) {
                tracing::trace!(kind = %node.kind(), child = %id, "child detached");
                self.detached.push(node);
            }
        }
    }

    /// Child keys declared by the latest evaluation, in order
    pub fn declared(&self) -> Vec<ChildId> {
        self.round.declared().to_vec()
    }

    pub fn take_detached(&mut self) -> Vec<Arc<dyn ChildNode>> {
        std::mem::take(&mut self.detached)
    }

    /// Live children in declaration order
    pub fn live(&self) -> Vec<Arc<dyn ChildNode>> {
        self.entries.values().cloned().collect()
    }

    /// Remove everything for termination, live children first
    pub fn take_all(&mut self) -> Vec<Arc<dyn ChildNode>> {
        let mut all: Vec<_> = self.entries.drain(..).map(|(_, node)| node).collect();
        all.append(&mut self.detached);
        all
    }
}
