//! Execution Strategies
//!
//! An execution strategy decides when the deriveds and effects affected by a
//! change actually run. The runtime calls [`ExecutionStrategy::on_changed`]
//! whenever a signal is written or a derived or effect is constructed.
//!
//! Reads stay lazy no matter which strategy is active: reading a derived
//! always brings it up to date first. A strategy only decides what runs
//! *without* being read.
//!
//! # Built-in Strategies
//!
//! - [`ManualStrategy`]: runs nothing. Callers invoke effects directly or
//!   hand a list to [`bulk_update`](super::bulk_update). This is the default.
//! - [`ImmediateStrategy`]: runs every affected derived, then every affected
//!   effect, before the write returns.
//! - [`DelayedStrategy`]: queues affected nodes until
//!   [`DelayedStrategy::drain_update`] is called.
//!
//! Anything implementing [`ExecutionStrategy`] can be installed with
//! [`set_execution_strategy`](super::set_execution_strategy).

use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::handle::NodeHandle;
use super::runtime;
use crate::error::SignalError;
use crate::graph::{NodeId, NodeKind};

/// Default number of node updates an [`ImmediateStrategy`] performs in one
/// drain before giving up.
pub const DEFAULT_UPDATE_LIMIT: usize = 10_000;

/// What a single notification is about.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    changed: SmallVec<[NodeId; 1]>,
    deriveds: Vec<NodeHandle>,
    effects: Vec<NodeHandle>,
}

impl ChangeSet {
    pub(crate) fn new(
        changed: SmallVec<[NodeId; 1]>,
        deriveds: Vec<NodeHandle>,
        effects: Vec<NodeHandle>,
    ) -> Self {
        Self {
            changed,
            deriveds,
            effects,
        }
    }

    /// The written signals or newly constructed nodes.
    ///
    /// Holds more than one id only when notifications were merged while
    /// updates were suspended.
    pub fn changed(&self) -> &[NodeId] {
        &self.changed
    }

    /// Affected deriveds, in the order the reverse-edge walk found them.
    pub fn deriveds(&self) -> &[NodeHandle] {
        &self.deriveds
    }

    /// Affected effects, in the order the reverse-edge walk found them.
    pub fn effects(&self) -> &[NodeHandle] {
        &self.effects
    }

    pub fn is_empty(&self) -> bool {
        self.deriveds.is_empty() && self.effects.is_empty()
    }
}

/// Policy deciding when affected nodes run.
pub trait ExecutionStrategy: Send + Sync {
    /// Called after a signal write or a node construction.
    fn on_changed(&self, changes: &ChangeSet) -> Result<(), SignalError>;

    /// Called when an effect invocation returns and no other calculation or
    /// action is running.
    fn on_idle(&self) -> Result<(), SignalError> {
        Ok(())
    }
}

/// Runs nothing on notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualStrategy;

impl ExecutionStrategy for ManualStrategy {
    fn on_changed(&self, changes: &ChangeSet) -> Result<(), SignalError> {
        tracing::trace!(
            deriveds = changes.deriveds().len(),
            effects = changes.effects().len(),
            "manual strategy ignoring change"
        );
        Ok(())
    }
}

/// Affected nodes, deduplicated by id. Deriveds come out before effects.
#[derive(Debug, Default)]
struct Queue {
    deriveds: IndexMap<NodeId, NodeHandle>,
    effects: IndexMap<NodeId, NodeHandle>,
}

impl Queue {
    fn extend(&mut self, changes: &ChangeSet) {
        for node in changes.deriveds() {
            self.deriveds.entry(node.id()).or_insert_with(|| node.clone());
        }
        for node in changes.effects() {
            self.effects.entry(node.id()).or_insert_with(|| node.clone());
        }
    }

    fn pop(&mut self) -> Option<NodeHandle> {
        self.deriveds
            .shift_remove_index(0)
            .or_else(|| self.effects.shift_remove_index(0))
            .map(|(_, node)| node)
    }

    fn len(&self) -> usize {
        self.deriveds.len() + self.effects.len()
    }

    fn is_empty(&self) -> bool {
        self.deriveds.is_empty() && self.effects.is_empty()
    }

    fn clear(&mut self) {
        self.deriveds.clear();
        self.effects.clear();
    }

    fn nodes(&self) -> Vec<NodeHandle> {
        self.deriveds.values().chain(self.effects.values()).cloned().collect()
    }
}

/// Runs affected nodes before the write that caused them returns.
///
/// # Reentrant Notifications
///
/// An effect run by this strategy may itself write signals. Those
/// notifications are queued rather than handled recursively, and the drain
/// that is already in progress picks them up. A notification that arrives
/// while a calculation or action is running outside a drain is queued too
/// and handled once that invocation returns.
///
/// Two effects that keep writing each other's sources would never settle, so
/// a single drain performs at most `limit` updates and then fails with
/// [`SignalError::Unsettled`].
///
/// # Failures
///
/// A failed drain discards whatever is still queued, whether it hit the
/// limit or a node returned an error. There is no later drain call to retry
/// them from, and the error already reached the write that started the drain.
/// Discarded nodes stay stale, so the next read, write or
/// [`bulk_update`](crate::reactive::bulk_update) still brings them up to date.
#[derive(Debug)]
pub struct ImmediateStrategy {
    limit: usize,
    queue: Mutex<Queue>,
    draining: AtomicBool,
}

impl ImmediateStrategy {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_UPDATE_LIMIT)
    }

    /// Create a strategy that gives up after `limit` updates per drain.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            queue: Mutex::new(Queue::default()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn drain_if_idle(&self) -> Result<(), SignalError> {
        if !ReactiveContext::is_idle() || runtime::is_suspended() {
            return Ok(());
        }
        if self.draining.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _draining = DrainingFlag(&self.draining);

        let mut updates = 0;
        loop {
            let Some(node) = self.queue.lock().pop() else {
                break;
            };
            if updates == self.limit {
                self.queue.lock().clear();
                tracing::debug!(limit = self.limit, "immediate drain did not settle");
                return Err(SignalError::Unsettled { limit: self.limit });
            }
            updates += 1;
            if let Err(error) = node.update() {
                let discarded = {
                    let mut queue = self.queue.lock();
                    let discarded = queue.len();
                    queue.clear();
                    discarded
                };
                tracing::debug!(node = %node.id(), discarded, %error, "immediate drain failed");
                return Err(error);
            }
        }

        tracing::debug!(updates, "immediate drain finished");
        Ok(())
    }
}

impl Default for ImmediateStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStrategy for ImmediateStrategy {
    fn on_changed(&self, changes: &ChangeSet) -> Result<(), SignalError> {
        self.queue.lock().extend(changes);
        self.drain_if_idle()
    }

    fn on_idle(&self) -> Result<(), SignalError> {
        self.drain_if_idle()
    }
}

/// Clears the draining flag when a drain ends, including by error or panic.
struct DrainingFlag<'a>(&'a AtomicBool);

impl Drop for DrainingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Queues affected nodes until [`drain_update`](Self::drain_update) is
/// called.
///
/// A node touched by several writes between drains is queued once.
///
/// # Example
///
/// ```rust,ignore
/// let delayed = Arc::new(DelayedStrategy::new());
/// set_execution_strategy(delayed.clone());
///
/// count.set(1)?;
/// count.set(2)?;
///
/// // Each affected derived and effect runs once
/// let ran = delayed.drain_update()?;
/// ```
#[derive(Debug, Default)]
pub struct DelayedStrategy {
    queue: Mutex<Queue>,
}

impl DelayedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run everything queued so far and return the nodes that actually ran.
    ///
    /// Nodes queued while the drain runs (for example by an effect that
    /// writes a signal) are left for the next drain. If a node fails, the
    /// nodes after it are put back in the queue and the error is returned.
    pub fn drain_update(&self) -> Result<Vec<NodeHandle>, SignalError> {
        let queued = std::mem::take(&mut *self.queue.lock()).nodes();
        tracing::debug!(queued = queued.len(), "draining delayed updates");

        let mut ran = Vec::with_capacity(queued.len());
        let mut remaining = queued.into_iter();
        while let Some(node) = remaining.next() {
            match node.update() {
                Ok(true) => ran.push(node),
                Ok(false) => {}
                Err(error) => {
                    self.requeue(remaining);
                    return Err(error);
                }
            }
        }
        Ok(ran)
    }

    fn requeue(&self, nodes: impl Iterator<Item = NodeHandle>) {
        let (effects, deriveds): (Vec<_>, Vec<_>) =
            nodes.partition(|node| node.kind() == NodeKind::Effect);
        let changes = ChangeSet::new(SmallVec::new(), deriveds, effects);
        self.queue.lock().extend(&changes);
    }

    /// Nodes waiting for the next drain, deriveds first.
    pub fn pending(&self) -> Vec<NodeHandle> {
        self.queue.lock().nodes()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl ExecutionStrategy for DelayedStrategy {
    fn on_changed(&self, changes: &ChangeSet) -> Result<(), SignalError> {
        let mut queue = self.queue.lock();
        queue.extend(changes);
        tracing::trace!(pending = queue.len(), "delayed updates queued");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReentryError;
    use crate::reactive::runtime::testing::install;
    use crate::reactive::{Derived, Effect, Signal};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn immediate_runs_affected_effects_on_write() {
        let signal = Signal::new(1);
        let doubled = Derived::with_sources(signal.clone(), |x| x * 2).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _effect = Effect::with_sources(doubled.clone(), move |x| {
            seen_clone.lock().push(x);
            Ok(())
        })
        .unwrap();

        let _restore = install(Arc::new(ImmediateStrategy::new()));
        signal.set(5).unwrap();
        signal.set(5).unwrap();
        signal.set(6).unwrap();

        assert_eq!(*seen.lock(), vec![10, 12]);
    }

    #[test]
    fn immediate_runs_new_nodes_on_construction() {
        let _restore = install(Arc::new(ImmediateStrategy::new()));
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let signal = Signal::new(1);
        let derived = Derived::with_sources(signal.clone(), |x| x + 1).unwrap();
        assert!(derived.has_value());

        let _effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn immediate_queues_writes_made_by_effects() {
        let first = Signal::new(0);
        let second = Signal::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let second_clone = second.clone();
        let _forward = Effect::with_sources(first.clone(), move |x| {
            second_clone.set(x * 10)
        })
        .unwrap();

        let seen_clone = seen.clone();
        let _observer = Effect::with_sources(second.clone(), move |x| {
            seen_clone.lock().push(x);
            Ok(())
        })
        .unwrap();

        let _restore = install(Arc::new(ImmediateStrategy::new()));
        first.set(3).unwrap();

        assert_eq!(second.get_untracked(), 30);
        assert_eq!(seen.lock().last(), Some(&30));
    }

    #[test]
    fn immediate_feedback_loop_hits_the_limit() {
        let a = Signal::new(0);
        let b = Signal::new(0);

        let b_clone = b.clone();
        let _ab = Effect::with_sources(a.clone(), move |x| {
            b_clone.set(x + 1)
        })
        .unwrap();
        let a_clone = a.clone();
        let _ba = Effect::with_sources(b.clone(), move |x| {
            a_clone.set(x + 1)
        })
        .unwrap();

        let strategy = Arc::new(ImmediateStrategy::with_limit(50));
        let _restore = install(strategy.clone());

        assert_eq!(a.set(1).unwrap_err(), SignalError::Unsettled { limit: 50 });
        assert!(strategy.queue.lock().is_empty());
        assert!(!strategy.draining.load(Ordering::SeqCst));
    }

    #[test]
    fn immediate_failure_discards_the_rest_of_the_queue() {
        let signal = Signal::new(0);
        let inner = Effect::new(|| Ok(())).unwrap();
        let runs = Arc::new(AtomicI32::new(0));

        let inner_clone = inner.clone();
        let _failing = Effect::with_sources(signal.clone(), move |_| {
            inner_clone.invoke().map(|_| ())
        })
        .unwrap();
        let runs_clone = runs.clone();
        let after = Effect::with_sources(signal.clone(), move |_| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let strategy = Arc::new(ImmediateStrategy::new());
        let _restore = install(strategy.clone());

        assert_eq!(
            signal.set(1).unwrap_err(),
            SignalError::from(ReentryError::EffectInReaction { effect: inner.id() })
        );
        assert_eq!(signal.get_untracked(), 1);
        assert!(strategy.queue.lock().is_empty());
        assert!(!strategy.draining.load(Ordering::SeqCst));

        // Discarded, not forgotten: it is still stale.
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(after.handle().needs_update());
        assert!(after.invoke().unwrap());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delayed_failure_keeps_the_rest_for_the_next_drain() {
        let signal = Signal::new(0);
        let inner = Effect::new(|| Ok(())).unwrap();
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let before = Effect::with_sources(signal.clone(), move |_| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        let inner_clone = inner.clone();
        let failing = Effect::with_sources(signal.clone(), move |_| {
            inner_clone.invoke().map(|_| ())
        })
        .unwrap();
        let runs_clone = runs.clone();
        let after = Effect::with_sources(signal.clone(), move |_| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let delayed = Arc::new(DelayedStrategy::new());
        let _restore = install(delayed.clone());

        signal.set(1).unwrap();
        assert_eq!(
            delayed.pending(),
            vec![before.handle(), failing.handle(), after.handle()]
        );

        assert_eq!(
            delayed.drain_update().unwrap_err(),
            SignalError::from(ReentryError::EffectInReaction { effect: inner.id() })
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(delayed.pending(), vec![after.handle()]);
        assert!(failing.handle().needs_update());

        assert_eq!(delayed.drain_update().unwrap(), vec![after.handle()]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(delayed.is_empty());
    }

    #[test]
    fn delayed_queues_each_node_once() {
        let signal = Signal::new(1);
        let derived = Derived::with_sources(signal.clone(), |x| x + 1).unwrap();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();
        let effect = Effect::with_sources(derived.clone(), move |_| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let delayed = Arc::new(DelayedStrategy::new());
        let _restore = install(delayed.clone());

        signal.set(2).unwrap();
        signal.set(3).unwrap();
        assert_eq!(delayed.len(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        let ran = delayed.drain_update().unwrap();
        assert_eq!(ran, vec![derived.handle(), effect.handle()]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(derived.get().unwrap(), 4);

        assert!(delayed.is_empty());
        assert!(delayed.drain_update().unwrap().is_empty());
    }

    #[test]
    fn delayed_leaves_writes_from_effects_for_the_next_drain() {
        let first = Signal::new(0);
        let second = Signal::new(0);

        let second_clone = second.clone();
        let forward = Effect::with_sources(first.clone(), move |x| {
            second_clone.set(x + 1)
        })
        .unwrap();
        let observer = Effect::with_sources(second.clone(), |_| Ok(())).unwrap();

        let delayed = Arc::new(DelayedStrategy::new());
        let _restore = install(delayed.clone());

        first.set(1).unwrap();
        assert_eq!(delayed.drain_update().unwrap(), vec![forward.handle()]);
        assert_eq!(delayed.pending(), vec![observer.handle()]);
        assert_eq!(delayed.drain_update().unwrap(), vec![observer.handle()]);
    }

    #[test]
    fn change_set_reports_emptiness() {
        let changes = ChangeSet::new(SmallVec::new(), Vec::new(), Vec::new());
        assert!(changes.is_empty());
        assert!(changes.changed().is_empty());
    }
}
