//! Narrow node-to-ancestor capability
//!
//! A node never holds its parent. It holds the parent's [`NodeLink`], which
//! can only mark the chain invalid so the next pass re-evaluates it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct NodeLink {
    parent: Option<Arc<NodeLink>>,
    alive: AtomicBool,
    invalidated: AtomicBool,
    generation: AtomicU64,
}

impl NodeLink {
    pub fn root() -> Arc<Self> {
        Self::with_parent(None)
    }

    pub fn child(parent: &Arc<NodeLink>) -> Arc<Self> {
        Self::with_parent(Some(Arc::clone(parent)))
    }

    fn with_parent(parent: Option<Arc<NodeLink>>) -> Arc<Self> {
        Arc::new(Self {
            parent,
            alive: AtomicBool::new(true),
            invalidated: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Returns true the first time only
    pub fn mark_dead(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Mark this node and every ancestor for re-evaluation
    pub fn invalidate(&self) {
        let mut link = Some(self);
        while let Some(current) = link {
            current.invalidated.store(true, Ordering::Release);
            link = current.parent.as_deref();
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    pub fn clear_invalidated(&self) {
        self.invalidated.store(false, Ordering::Release);
    }

    /// Generation of the last completed evaluation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn publish(&self, generation: u64) {
        self.generation.store(generation, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_reaches_ancestors() {
        let root = NodeLink::root();
        let child = NodeLink::child(&root);
        let leaf = NodeLink::child(&child);

        leaf.invalidate();
        assert!(leaf.is_invalidated());
        assert!(child.is_invalidated());
        assert!(root.is_invalidated());

        child.clear_invalidated();
        leaf.clear_invalidated();
        assert!(root.is_invalidated());
    }

    #[test]
    fn test_mark_dead_once() {
        let link = NodeLink::root();
        assert!(link.mark_dead());
        assert!(!link.mark_dead());
        assert!(!link.is_alive());
    }
}
