//! Type-erased handle over a derived or effect.
//!
//! Execution strategies and [`bulk_update`](super::bulk_update) work on
//! nodes of any value type, so they see deriveds and effects through this
//! handle.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::SignalError;
use crate::graph::{Dependent, NodeId, NodeKind, Version};

/// A derived or effect, with its value type erased.
#[derive(Clone)]
pub struct NodeHandle {
    node: Arc<dyn Dependent>,
}

impl NodeHandle {
    pub(crate) fn from_dependent(node: Arc<dyn Dependent>) -> Self {
        Self { node }
    }

    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// [`NodeKind::Derived`] or [`NodeKind::Effect`].
    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }

    pub fn version(&self) -> Version {
        self.node.version()
    }

    pub fn is_dropped(&self) -> bool {
        self.node.is_dropped()
    }

    /// Whether a trigger advanced since the node last ran.
    pub fn needs_update(&self) -> bool {
        self.node.needs_update()
    }

    /// Recompute a derived or invoke an effect if it is stale.
    ///
    /// Returns whether the calculation or action ran.
    pub fn update(&self) -> Result<bool, SignalError> {
        self.node.update()
    }

    /// Silence the node permanently. See [`Derived::drop_node`].
    ///
    /// [`Derived::drop_node`]: super::Derived::drop_node
    pub fn drop_node(&self) {
        self.node.mark_dropped();
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for NodeHandle {}

impl Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("dropped", &self.is_dropped())
            .finish()
    }
}
