//! Derived Implementation
//!
//! A Derived is a cached value computed from other signals and deriveds.
//!
//! # How Deriveds Work
//!
//! 1. Nothing runs at construction. The calculation runs on first read (or
//!    when the execution strategy updates the node).
//!
//! 2. A read first checks whether any source the derived transitively
//!    depends on was written since it last recomputed. If not, the cached
//!    value is returned as is.
//!
//! 3. Otherwise the inputs are brought up to date first, then the
//!    calculation runs. Since every read catches its input up before using
//!    it, a calculation never sees a half-updated upstream.
//!
//! # Dependency Flavors
//!
//! - [`Derived::with_sources`] declares the inputs up front. The calculation
//!   receives their values and may not read any other node, except inside
//!   [`untracked`](super::untracked).
//! - [`Derived::new`] discovers the inputs by recording every read during the
//!   calculation. The set is replaced on every run, so it may change between
//!   runs.
//!
//! # Purity
//!
//! Calculations must not write signals or invoke effects. Either fails with
//! a [`ReentryError`](crate::ReentryError).

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::context::{Mode, ReactiveContext};
use super::dependent::{run_dynamic, run_static, Check, DependentCore, Tracking};
use super::handle::NodeHandle;
use super::runtime;
use super::sources::{Readable, Sources};
use crate::error::{SignalError, SuspendError};
use crate::graph::{Dependent, Node, NodeId, NodeKind, Origin, Subscribers, Triggers, Upstream, Version};

type StaticCalculation<T> = Box<dyn Fn(NodeId) -> Result<T, SignalError> + Send + Sync>;
type DynamicCalculation<T> = Box<dyn Fn() -> Result<T, SignalError> + Send + Sync>;

enum Calculation<T> {
    Static(StaticCalculation<T>),
    Dynamic(DynamicCalculation<T>),
}

pub(crate) struct DerivedNode<T> {
    this: Weak<DerivedNode<T>>,
    core: DependentCore,
    calculation: Calculation<T>,
    value: RwLock<Option<T>>,
    subscribers: Subscribers,
}

impl<T> DerivedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Run the check-and-recompute protocol.
    fn refresh(&self) -> Result<bool, SignalError> {
        let Check::Stale { check } = self.core.check() else {
            return Ok(false);
        };

        let id = self.core.id();
        if runtime::is_suspended() {
            if self.value.read().is_some() {
                return Ok(false);
            }
            return Err(SuspendError::UninitializedWhileSuspended { node: id }.into());
        }

        let (value, discovered) = match &self.calculation {
            Calculation::Static(calculate) => (calculate(id)?, None),
            Calculation::Dynamic(calculate) => {
                let (value, read) = run_dynamic(id, Mode::Calculating { tracked: true }, calculate)?;
                (value?, Some(read))
            }
        };

        *self.value.write() = Some(value);
        let this: Weak<dyn Dependent> = self.this.clone();
        self.core.finish(check, discovered, &this);
        tracing::trace!(node = %id, %check, "derived recomputed");
        Ok(true)
    }

    fn cached(&self) -> Result<T, SignalError> {
        self.value
            .read()
            .clone()
            .ok_or(SignalError::Uninitialized { node: self.core.id() })
    }
}

impl<T> Node for DerivedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.core.id()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Derived
    }

    fn version(&self) -> Version {
        self.core.current()
    }
}

impl<T> Upstream for DerivedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn collect_triggers(&self, into: &mut Triggers) {
        self.core.collect_triggers(into);
    }

    fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }
}

impl<T> Dependent for DerivedNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn is_dropped(&self) -> bool {
        self.core.is_dropped()
    }

    fn mark_dropped(&self) {
        self.core.mark_dropped();
    }

    fn needs_update(&self) -> bool {
        self.core.needs_update()
    }

    fn update(&self) -> Result<bool, SignalError> {
        self.refresh()
    }

    fn downstream(&self) -> Option<&Subscribers> {
        Some(&self.subscribers)
    }
}

/// A cached value computed from other nodes.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be `Clone + Send + Sync`.
///
/// # Example
///
/// ```rust,ignore
/// let s = Signal::new(1);
/// let t = Signal::new(2);
///
/// // Declared sources
/// let c = Derived::with_sources((s.clone(), t.clone()), |(x, y)| 2 * x + y)?;
///
/// // Discovered sources
/// let d = Derived::new(move || Ok(c.get()? + 1))?;
/// ```
pub struct Derived<T> {
    node: Arc<DerivedNode<T>>,
}

impl<T> Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a derived that discovers its dependencies while calculating.
    ///
    /// Every signal or derived read through `get` during the calculation
    /// becomes a dependency for the next run.
    pub fn new<F>(calculation: F) -> Result<Self, SignalError>
    where
        F: Fn() -> Result<T, SignalError> + Send + Sync + 'static,
    {
        Self::build(
            Tracking::Dynamic,
            Vec::new(),
            Calculation::Dynamic(Box::new(calculation)),
            None,
        )
    }

    /// Create a derived over a declared list of sources.
    ///
    /// Fails with [`SignalError::NoSources`] if `sources` is an empty `Vec`.
    pub fn with_sources<S, F>(sources: S, calculation: F) -> Result<Self, SignalError>
    where
        S: Sources,
        F: Fn(S::Values) -> T + Send + Sync + 'static,
    {
        Self::build_static(sources, calculation, None)
    }

    /// Like [`new`](Self::new), seeded with a value that is returned while
    /// updates are suspended or after the node is dropped, until the first
    /// calculation replaces it.
    pub fn with_initial<F>(initial: T, calculation: F) -> Result<Self, SignalError>
    where
        F: Fn() -> Result<T, SignalError> + Send + Sync + 'static,
    {
        Self::build(
            Tracking::Dynamic,
            Vec::new(),
            Calculation::Dynamic(Box::new(calculation)),
            Some(initial),
        )
    }

    /// Like [`with_sources`](Self::with_sources), seeded with a value.
    pub fn with_sources_and_initial<S, F>(
        sources: S,
        initial: T,
        calculation: F,
    ) -> Result<Self, SignalError>
    where
        S: Sources,
        F: Fn(S::Values) -> T + Send + Sync + 'static,
    {
        Self::build_static(sources, calculation, Some(initial))
    }

    fn build_static<S, F>(sources: S, calculation: F, initial: Option<T>) -> Result<Self, SignalError>
    where
        S: Sources,
        F: Fn(S::Values) -> T + Send + Sync + 'static,
    {
        let dependencies = sources.upstreams()?;
        let calculate = move |node| {
            run_static(node, &sources, Mode::Calculating { tracked: false }, &calculation)
        };
        Self::build(
            Tracking::Static,
            dependencies,
            Calculation::Static(Box::new(calculate)),
            initial,
        )
    }

    fn build(
        tracking: Tracking,
        dependencies: Vec<Arc<dyn Upstream>>,
        calculation: Calculation<T>,
        initial: Option<T>,
    ) -> Result<Self, SignalError> {
        let node = Arc::new_cyclic(|this| DerivedNode {
            this: this.clone(),
            core: DependentCore::new(NodeKind::Derived, tracking, dependencies),
            calculation,
            value: RwLock::new(initial),
            subscribers: Subscribers::new(),
        });

        let this: Weak<dyn Dependent> = node.this.clone();
        node.core.link(&this);
        tracing::trace!(
            node = %node.core.id(),
            ?tracking,
            dependencies = node.core.dependency_count(),
            "derived created"
        );

        runtime::notify(Origin::Created(node.clone()))?;
        Ok(Self { node })
    }

    /// Get the derived's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.core.id()
    }

    /// Version at which the value was last recomputed.
    pub fn version(&self) -> Version {
        self.node.core.current()
    }

    /// Get the current value, recomputing first if an input moved.
    ///
    /// Inside a dynamic calculation or action this also records the derived
    /// as a dependency of that callback.
    pub fn get(&self) -> Result<T, SignalError> {
        let upstream: Arc<dyn Upstream> = self.node.clone();
        ReactiveContext::observe(&upstream)?;
        self.node.refresh()?;
        self.node.cached()
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> Result<T, SignalError> {
        super::untracked(|| self.get())
    }

    /// Whether a value is cached, computed or seeded.
    pub fn has_value(&self) -> bool {
        self.node.value.read().is_some()
    }

    /// Get the number of live dependents.
    pub fn subscriber_count(&self) -> usize {
        self.node.subscribers.len()
    }

    /// Number of direct dependencies, as of the last calculation for the
    /// dynamic flavor.
    pub fn dependency_count(&self) -> usize {
        self.node.core.dependency_count()
    }

    /// Type-erased handle for strategies and [`bulk_update`](super::bulk_update).
    pub fn handle(&self) -> NodeHandle {
        NodeHandle::from_dependent(self.node.clone())
    }

    /// Stop recomputing, permanently.
    ///
    /// Reads keep returning the last cached value. Edges are left in place;
    /// they go away with the node itself.
    pub fn drop_node(&self) {
        self.node.core.mark_dropped();
    }

    pub fn is_dropped(&self) -> bool {
        self.node.core.is_dropped()
    }
}

impl<T> Readable for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn upstream(&self) -> Arc<dyn Upstream> {
        self.node.clone()
    }

    fn fetch(&self) -> Result<T, SignalError> {
        self.node.refresh()?;
        self.node.cached()
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.id())
            .field("version", &self.version())
            .field("value", &*self.node.value.read())
            .field("dropped", &self.is_dropped())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
