//! Graph Nodes
//!
//! This module defines the node identities and the two edge-facing traits of
//! the dependency graph.
//!
//! - [`Upstream`] is anything a dependent can read from (sources and
//!   deriveds). It owns the weak reverse edges to its dependents.
//! - [`Dependent`] is anything that re-runs when its inputs move (deriveds
//!   and effects). It owns strong edges down to its dependencies.
//!
//! A derived is both. Keeping the reverse edges weak means a long-lived
//! signal never keeps an otherwise unreferenced derived or effect alive;
//! dead entries are swept whenever the list is traversed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::version::Version;
use crate::error::SignalError;

/// Unique identifier for a node in the dependency graph.
///
/// The id belongs to the node, not to the handle: a [`Signal`] and the
/// [`ReadSignal`] view over it report the same id.
///
/// [`Signal`]: crate::reactive::Signal
/// [`ReadSignal`]: crate::reactive::ReadSignal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A source node (signal). These are the leaves on the input side.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node. These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect node. These are leaves on the output side.
    /// They have dependencies but no dependents.
    Effect,
}

/// Common base of every node.
pub trait Node: Send + Sync {
    fn id(&self) -> NodeId;

    fn kind(&self) -> NodeKind;

    /// Version at which the node's value or effect was last meaningfully
    /// updated.
    fn version(&self) -> Version;
}

/// A node that can be read from.
pub trait Upstream: Node {
    /// Add every source node this node ultimately reads from.
    ///
    /// A source adds itself. A derived adds its own trigger set, so the
    /// result is already transitive.
    fn collect_triggers(&self, into: &mut Triggers);

    /// Reverse edges to the nodes that read from this one.
    fn subscribers(&self) -> &Subscribers;
}

/// A node that re-runs when its dependencies move.
pub trait Dependent: Node {
    fn is_dropped(&self) -> bool;

    /// Silence the node permanently. Idempotent.
    fn mark_dropped(&self);

    /// Whether any trigger advanced past the last recomputation.
    fn needs_update(&self) -> bool;

    /// Run the check-and-recompute protocol. Returns whether the
    /// calculation or action actually ran.
    fn update(&self) -> Result<bool, SignalError>;

    /// Reverse edges to this node's own dependents, if it can have any.
    fn downstream(&self) -> Option<&Subscribers>;
}

/// Shared version stamp of a source node.
///
/// Trigger sets hold these directly, so judging dirtiness never has to walk
/// through intermediate deriveds.
#[derive(Debug)]
pub struct Stamp {
    id: NodeId,
    current: AtomicU64,
}

impl Stamp {
    pub fn new(id: NodeId, version: Version) -> Self {
        Self {
            id,
            current: AtomicU64::new(version.raw()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn current(&self) -> Version {
        Version::from(self.current.load(Ordering::SeqCst))
    }

    pub fn advance(&self, version: Version) {
        self.current.store(version.raw(), Ordering::SeqCst);
    }
}

/// The transitive set of source stamps a dependent reaches.
pub type Triggers = IndexMap<NodeId, Arc<Stamp>>;

/// Highest stamp in a trigger set, or [`Version::MIN`] if it is empty.
pub fn max_trigger(triggers: &Triggers) -> Version {
    triggers
        .values()
        .map(|stamp| stamp.current())
        .max()
        .unwrap_or(Version::MIN)
}

/// Weak reverse edges from an upstream node to its dependents, in the order
/// they subscribed.
#[derive(Default)]
pub struct Subscribers {
    entries: Mutex<IndexMap<NodeId, Weak<dyn Dependent>>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dependent. Registering the same id twice keeps one entry.
    pub fn insert(&self, id: NodeId, dependent: Weak<dyn Dependent>) {
        self.entries.lock().insert(id, dependent);
    }

    pub fn remove(&self, id: NodeId) {
        self.entries.lock().shift_remove(&id);
    }

    /// Upgrade every live entry, sweeping the dead ones.
    pub fn live(&self) -> Vec<Arc<dyn Dependent>> {
        let mut entries = self.entries.lock();
        let mut live = Vec::with_capacity(entries.len());
        entries.retain(|_, weak| match weak.upgrade() {
            Some(dependent) => {
                live.push(dependent);
                true
            }
            None => false,
        });
        live
    }

    /// Number of live dependents.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.lock().keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct Watcher {
        id: NodeId,
        dropped: AtomicBool,
    }

    impl Watcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: NodeId::new(),
                dropped: AtomicBool::new(false),
            })
        }
    }

    impl Node for Watcher {
        fn id(&self) -> NodeId {
            self.id
        }

        fn kind(&self) -> NodeKind {
            NodeKind::Effect
        }

        fn version(&self) -> Version {
            Version::MIN
        }
    }

    impl Dependent for Watcher {
        fn is_dropped(&self) -> bool {
            self.dropped.load(Ordering::SeqCst)
        }

        fn mark_dropped(&self) {
            self.dropped.store(true, Ordering::SeqCst);
        }

        fn needs_update(&self) -> bool {
            false
        }

        fn update(&self) -> Result<bool, SignalError> {
            Ok(false)
        }

        fn downstream(&self) -> Option<&Subscribers> {
            None
        }
    }

    fn weak(watcher: &Arc<Watcher>) -> Weak<dyn Dependent> {
        let dependent: Arc<dyn Dependent> = watcher.clone();
        Arc::downgrade(&dependent)
    }

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn subscribers_dedup_by_id() {
        let subscribers = Subscribers::new();
        let watcher = Watcher::new();

        subscribers.insert(watcher.id, weak(&watcher));
        subscribers.insert(watcher.id, weak(&watcher));

        assert_eq!(subscribers.len(), 1);
    }

    #[test]
    fn dead_subscribers_are_swept() {
        let subscribers = Subscribers::new();
        let kept = Watcher::new();
        let gone = Watcher::new();

        subscribers.insert(kept.id, weak(&kept));
        subscribers.insert(gone.id, weak(&gone));
        drop(gone);

        let live = subscribers.live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id(), kept.id);
        assert_eq!(subscribers.len(), 1);
    }

    #[test]
    fn subscribers_keep_registration_order() {
        let subscribers = Subscribers::new();
        let watchers: Vec<_> = (0..4).map(|_| Watcher::new()).collect();
        for watcher in watchers.iter().rev() {
            subscribers.insert(watcher.id, weak(watcher));
        }
        subscribers.remove(watchers[2].id);

        let order: Vec<_> = subscribers.live().iter().map(|d| d.id()).collect();
        assert_eq!(order, vec![watchers[3].id, watchers[1].id, watchers[0].id]);
    }

    #[test]
    fn max_trigger_of_empty_set_is_min() {
        assert_eq!(max_trigger(&Triggers::new()), Version::MIN);

        let mut triggers = Triggers::new();
        let low = Arc::new(Stamp::new(NodeId::new(), Version::from(3)));
        let high = Arc::new(Stamp::new(NodeId::new(), Version::from(9)));
        triggers.insert(low.id(), low.clone());
        triggers.insert(high.id(), high);
        assert_eq!(max_trigger(&triggers), Version::from(9));

        low.advance(Version::from(12));
        assert_eq!(max_trigger(&triggers), Version::from(12));
    }
}
