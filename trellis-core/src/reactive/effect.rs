//! Effect Implementation
//!
//! An Effect is a side-effecting action over signals and deriveds.
//!
//! # How Effects Work
//!
//! 1. Nothing runs at construction. The action runs when the effect is
//!    invoked, either by the caller or by the execution strategy.
//!
//! 2. Invoking runs the same check as reading a derived: if no source the
//!    effect transitively depends on was written since the last run, the
//!    invocation does nothing.
//!
//! 3. Otherwise the inputs are brought up to date and the action runs.
//!
//! # Differences from Derived
//!
//! - Deriveds produce a cached value; effects do not.
//! - Calculations must be pure. Actions may read any node and write any
//!   signal, which is how feedback between signals is set up on purpose.
//! - Effects cannot be invoked from inside a calculation or another action.
//!   Each invocation is a bounded snapshot, never a live loop.

use std::convert::identity;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use super::context::{Mode, ReactiveContext};
use super::dependent::{run_dynamic, run_static, Check, DependentCore, Tracking};
use super::handle::NodeHandle;
use super::runtime;
use super::sources::Sources;
use crate::error::{SignalError, SuspendError};
use crate::graph::{Dependent, Node, NodeId, NodeKind, Origin, Subscribers, Upstream, Version};

type StaticAction = Box<dyn Fn(NodeId) -> Result<(), SignalError> + Send + Sync>;
type DynamicAction = Box<dyn Fn() -> Result<(), SignalError> + Send + Sync>;

enum Action {
    Static(StaticAction),
    Dynamic(DynamicAction),
}

pub(crate) struct EffectNode {
    this: Weak<EffectNode>,
    core: DependentCore,
    action: Action,
    run_count: AtomicUsize,
}

impl EffectNode {
    fn invoke(&self) -> Result<bool, SignalError> {
        let id = self.core.id();
        ReactiveContext::check_invoke(id)?;
        if self.core.is_dropped() {
            return Ok(false);
        }
        if runtime::is_suspended() {
            return Err(SuspendError::EffectWhileSuspended { effect: id }.into());
        }

        let Check::Stale { check } = self.core.check() else {
            return Ok(false);
        };

        let discovered = match &self.action {
            Action::Static(act) => {
                act(id)?;
                None
            }
            Action::Dynamic(act) => {
                let (outcome, read) = run_dynamic(id, Mode::Acting { tracked: true }, act)?;
                outcome?;
                Some(read)
            }
        };

        let this: Weak<dyn Dependent> = self.this.clone();
        self.core.finish(check, discovered, &this);
        let runs = self.run_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(effect = %id, %check, runs, "effect ran");

        // Writes made by the action may have left work for the strategy.
        runtime::settle()?;
        Ok(true)
    }
}

impl Node for EffectNode {
    fn id(&self) -> NodeId {
        self.core.id()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Effect
    }

    fn version(&self) -> Version {
        self.core.current()
    }
}

impl Dependent for EffectNode {
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
        self.invoke()
    }

    fn downstream(&self) -> Option<&Subscribers> {
        None
    }
}

/// A side-effecting action over signals and deriveds.
///
/// # Example
///
/// ```rust,ignore
/// let s = Signal::new(1);
/// let t = Signal::new(2);
/// let c = Derived::with_sources((s.clone(), t.clone()), |(x, y)| 2 * x + y)?;
///
/// let e = Effect::with_sources(c.clone(), |value| {
///     println!("{value}");
///     Ok(())
/// })?;
///
/// e.invoke()?;  // Prints: "4"
/// e.invoke()?;  // Prints nothing
///
/// s.set(20)?;
/// e.invoke()?;  // Prints: "42"
/// ```
pub struct Effect {
    node: Arc<EffectNode>,
}

impl Effect {
    /// Create an effect that discovers its dependencies while acting.
    pub fn new<F>(action: F) -> Result<Self, SignalError>
    where
        F: Fn() -> Result<(), SignalError> + Send + Sync + 'static,
    {
        Self::build(Tracking::Dynamic, Vec::new(), Action::Dynamic(Box::new(action)))
    }

    /// Create an effect over a declared list of sources.
    ///
    /// The action receives the sources' values. It may still read other
    /// nodes; those reads are not recorded.
    pub fn with_sources<S, F>(sources: S, action: F) -> Result<Self, SignalError>
    where
        S: Sources,
        F: Fn(S::Values) -> Result<(), SignalError> + Send + Sync + 'static,
    {
        let dependencies = sources.upstreams()?;
        let act = move |node| {
            run_static(node, &sources, Mode::Acting { tracked: false }, &action).and_then(identity)
        };
        Self::build(Tracking::Static, dependencies, Action::Static(Box::new(act)))
    }

    fn build(
        tracking: Tracking,
        dependencies: Vec<Arc<dyn Upstream>>,
        action: Action,
    ) -> Result<Self, SignalError> {
        let node = Arc::new_cyclic(|this| EffectNode {
            this: this.clone(),
            core: DependentCore::new(NodeKind::Effect, tracking, dependencies),
            action,
            run_count: AtomicUsize::new(0),
        });

        let this: Weak<dyn Dependent> = node.this.clone();
        node.core.link(&this);
        tracing::trace!(
            effect = %node.core.id(),
            ?tracking,
            dependencies = node.core.dependency_count(),
            "effect created"
        );

        runtime::notify(Origin::Created(node.clone()))?;
        Ok(Self { node })
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> NodeId {
        self.node.core.id()
    }

    /// Run the action if a source moved since the last run.
    ///
    /// Returns whether the action ran. Fails with
    /// [`ReentryError::EffectInReaction`](crate::ReentryError::EffectInReaction)
    /// while a calculation or action is running, and with
    /// [`SuspendError::EffectWhileSuspended`] while updates are suspended.
    pub fn invoke(&self) -> Result<bool, SignalError> {
        self.node.invoke()
    }

    /// Get the number of times the action has run.
    pub fn run_count(&self) -> usize {
        self.node.run_count.load(Ordering::SeqCst)
    }

    /// Number of direct dependencies, as of the last run for the dynamic
    /// flavor.
    pub fn dependency_count(&self) -> usize {
        self.node.core.dependency_count()
    }

    /// Type-erased handle for strategies and [`bulk_update`](super::bulk_update).
    pub fn handle(&self) -> NodeHandle {
        NodeHandle::from_dependent(self.node.clone())
    }

    /// Stop running, permanently.
    pub fn drop_node(&self) {
        self.node.core.mark_dropped();
    }

    pub fn is_dropped(&self) -> bool {
        self.node.core.is_dropped()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("dropped", &self.is_dropped())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
