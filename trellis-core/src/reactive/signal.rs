//! Signal Implementation
//!
//! A Signal is the source node of the graph. It holds a value and the
//! version at which that value last changed.
//!
//! # How Signals Work
//!
//! 1. Writing a different value advances the version clock, stamps the
//!    signal and notifies the active execution strategy.
//!
//! 2. Writing an equal value is a no-op: no clock bump, no notification.
//!
//! 3. Reading inside a dynamic calculation or action records the signal as
//!    a dependency of that callback. Reading inside a static calculation is
//!    rejected unless wrapped in [`untracked`](super::untracked).
//!
//! # Handles
//!
//! [`Signal`] can read and write. [`ReadSignal`] is a read-only view over the
//! same node (same id, same value). It has no setter, so attempting to write
//! through it does not compile.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::runtime;
use super::sources::Readable;
use crate::error::SignalError;
use crate::graph::{next_version, Node, NodeId, NodeKind, Origin, Stamp, Subscribers, Triggers, Upstream, Version};

pub(crate) struct SourceNode<T> {
    value: RwLock<T>,
    stamp: Arc<Stamp>,
    subscribers: Subscribers,
}

impl<T> Node for SourceNode<T>
where
    T: Send + Sync,
{
    fn id(&self) -> NodeId {
        self.stamp.id()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }

    fn version(&self) -> Version {
        self.stamp.current()
    }
}

impl<T> Upstream for SourceNode<T>
where
    T: Send + Sync,
{
    fn collect_triggers(&self, into: &mut Triggers) {
        into.entry(self.stamp.id())
            .or_insert_with(|| Arc::clone(&self.stamp));
    }

    fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }
}

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be
///   `Clone + PartialEq + Send + Sync`. `PartialEq` decides whether a write
///   is a change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get()?;
///
/// // Update the value (stamps a new version and notifies)
/// count.set(5)?;
/// ```
pub struct Signal<T> {
    node: Arc<SourceNode<T>>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        let id = NodeId::new();
        let version = next_version();
        tracing::trace!(node = %id, %version, "signal created");

        Self {
            node: Arc::new(SourceNode {
                value: RwLock::new(value),
                stamp: Arc::new(Stamp::new(id, version)),
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Version at which the value last changed.
    pub fn version(&self) -> Version {
        self.node.version()
    }

    /// Get the current value.
    ///
    /// Inside a dynamic calculation or action this also records the signal
    /// as a dependency of that callback.
    pub fn get(&self) -> Result<T, SignalError> {
        read(&self.node)
    }

    /// Get the current value without recording a dependency.
    ///
    /// Reads are always permitted this way, even inside a static calculation.
    pub fn get_untracked(&self) -> T {
        self.node.value.read().clone()
    }

    /// Set a new value.
    ///
    /// Writing a value equal to the current one does nothing. Otherwise the
    /// signal is stamped with a new version and the execution strategy is
    /// notified. Fails with a [`ReentryError`](crate::ReentryError) inside a
    /// calculation; nothing is changed in that case.
    ///
    /// An error returned by the strategy (for example from an effect it ran
    /// eagerly) is passed through; the new value is stored regardless.
    pub fn set(&self, value: T) -> Result<(), SignalError> {
        let id = self.node.id();
        {
            let mut guard = self.node.value.write();
            if *guard == value {
                return Ok(());
            }
            ReactiveContext::check_write(id)?;
            *guard = value;
        }

        let version = next_version();
        self.node.stamp.advance(version);
        tracing::trace!(node = %id, %version, "signal written");

        runtime::notify(Origin::Changed(self.node.clone()))
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F) -> Result<(), SignalError>
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.node.value.read();
            f(&guard)
        };
        self.set(next)
    }

    /// Create a read-only view of this signal.
    pub fn read_only(&self) -> ReadSignal<T> {
        ReadSignal {
            node: Arc::clone(&self.node),
        }
    }

    /// Get the number of live dependents.
    pub fn subscriber_count(&self) -> usize {
        self.node.subscribers.len()
    }
}

/// A read-only view of a [`Signal`].
pub struct ReadSignal<T> {
    node: Arc<SourceNode<T>>,
}

impl<T> ReadSignal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    pub fn version(&self) -> Version {
        self.node.version()
    }

    /// Get the current value. See [`Signal::get`].
    pub fn get(&self) -> Result<T, SignalError> {
        read(&self.node)
    }

    pub fn get_untracked(&self) -> T {
        self.node.value.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.node.subscribers.len()
    }
}

fn read<T>(node: &Arc<SourceNode<T>>) -> Result<T, SignalError>
where
    T: Clone + Send + Sync + 'static,
{
    let upstream: Arc<dyn Upstream> = node.clone();
    ReactiveContext::observe(&upstream)?;
    Ok(node.value.read().clone())
}

impl<T> From<Signal<T>> for ReadSignal<T> {
    fn from(signal: Signal<T>) -> Self {
        Self { node: signal.node }
    }
}

impl<T> Readable for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Value = T;

    fn upstream(&self) -> Arc<dyn Upstream> {
        self.node.clone()
    }

    fn fetch(&self) -> Result<T, SignalError> {
        Ok(self.get_untracked())
    }
}

impl<T> Readable for ReadSignal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    type Value = T;

    fn upstream(&self) -> Arc<dyn Upstream> {
        self.node.clone()
    }

    fn fetch(&self) -> Result<T, SignalError> {
        Ok(self.get_untracked())
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("version", &self.version())
            .field("value", &self.get_untracked())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T> Debug for ReadSignal<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadSignal")
            .field("id", &self.id())
            .field("version", &self.version())
            .field("value", &self.get_untracked())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context::Mode;
    use crate::ReentryError;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get().unwrap(), 0);

        signal.set(42).unwrap();
        assert_eq!(signal.get().unwrap(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5).unwrap();
        assert_eq!(signal.get().unwrap(), 15);
    }

    #[test]
    fn write_stamps_a_newer_version() {
        let signal = Signal::new(1);
        let before = signal.version();

        signal.set(2).unwrap();

        assert!(signal.version() > before);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let signal = Signal::new(String::from("same"));
        let before = signal.version();

        signal.set(String::from("same")).unwrap();

        assert_eq!(signal.version(), before);
    }

    #[test]
    fn signal_clone_shares_state() {
        let signal1 = Signal::new(0);
        let signal2 = signal1.clone();

        signal1.set(42).unwrap();
        assert_eq!(signal2.get().unwrap(), 42);

        signal2.set(100).unwrap();
        assert_eq!(signal1.get().unwrap(), 100);
    }

    #[test]
    fn read_only_view_shares_the_node() {
        let signal = Signal::new(1);
        let view = signal.read_only();

        assert_eq!(view.id(), signal.id());
        signal.set(7).unwrap();
        assert_eq!(view.get().unwrap(), 7);
        assert_eq!(view.version(), signal.version());
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn write_inside_calculation_changes_nothing() {
        let signal = Signal::new(1);
        let before = signal.version();
        let calculation = NodeId::new();

        let result = {
            let _ctx = ReactiveContext::enter(calculation, Mode::Calculating { tracked: true }).unwrap();
            signal.set(2)
        };

        assert_eq!(
            result,
            Err(SignalError::from(ReentryError::WriteInCalculation {
                calculation,
                node: signal.id(),
            }))
        );
        assert_eq!(signal.get_untracked(), 1);
        assert_eq!(signal.version(), before);
    }

    #[test]
    fn equal_write_inside_calculation_is_still_a_no_op() {
        let signal = Signal::new(1);
        let _ctx = ReactiveContext::enter(NodeId::new(), Mode::Calculating { tracked: true }).unwrap();
        assert!(signal.set(1).is_ok());
    }
}
