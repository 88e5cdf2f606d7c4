//! Dependent Node Core
//!
//! State and check-and-recompute protocol shared by deriveds and effects.
//!
//! # Protocol
//!
//! 1. Let `check` be the current clock value.
//! 2. If the node is dropped, or nothing moved since `checked`, stop.
//! 3. If no trigger is newer than `current` (the version the node last
//!    recomputed at), just advance `checked` and stop. Separating "checked"
//!    from "recomputed" is what keeps diamonds from recomputing twice.
//! 4. Otherwise bring the inputs up to date and run the callback. The
//!    owning node does this part, because only it knows whether it caches a
//!    value or performs an action.
//! 5. Rebuild the trigger set from the (possibly new) dependencies and stamp
//!    `current` and `checked`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::{Mode, ReactiveContext};
use super::sources::Sources;
use crate::error::SignalError;
use crate::graph::{current_version, max_trigger, Dependent, Node, NodeId, NodeKind, Triggers, Upstream, Version};

/// How a dependent learns its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tracking {
    /// Declared up front; fixed for the node's lifetime.
    Static,

    /// Discovered by recording every read during the callback; replaced on
    /// every run.
    Dynamic,
}

/// Result of the cheap part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Check {
    /// Nothing to do.
    Fresh,

    /// The callback has to run; `check` is the clock value seen before it.
    Stale { check: Version },
}

struct State {
    checked: Version,
    current: Version,
    computed: bool,
    dependencies: Vec<Arc<dyn Upstream>>,
    triggers: Triggers,
}

pub(crate) struct DependentCore {
    id: NodeId,
    kind: NodeKind,
    tracking: Tracking,
    dropped: AtomicBool,
    state: Mutex<State>,
}

impl DependentCore {
    pub fn new(kind: NodeKind, tracking: Tracking, dependencies: Vec<Arc<dyn Upstream>>) -> Self {
        let mut triggers = Triggers::new();
        for dependency in &dependencies {
            dependency.collect_triggers(&mut triggers);
        }

        Self {
            id: NodeId::new(),
            kind,
            tracking,
            dropped: AtomicBool::new(false),
            state: Mutex::new(State {
                checked: Version::MIN,
                current: Version::MIN,
                computed: false,
                dependencies,
                triggers,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn mark_dropped(&self) {
        if !self.dropped.swap(true, Ordering::SeqCst) {
            tracing::debug!(node = %self.id, kind = ?self.kind, "node dropped");
        }
    }

    /// Version the node last recomputed at.
    pub fn current(&self) -> Version {
        self.state.lock().current
    }

    pub fn dependency_count(&self) -> usize {
        self.state.lock().dependencies.len()
    }

    /// Extend `into` with this node's trigger set.
    pub fn collect_triggers(&self, into: &mut Triggers) {
        let state = self.state.lock();
        for (id, stamp) in &state.triggers {
            into.entry(*id).or_insert_with(|| Arc::clone(stamp));
        }
    }

    /// Steps 1 to 3 of the protocol.
    pub fn check(&self) -> Check {
        if self.is_dropped() {
            return Check::Fresh;
        }

        let check = current_version();
        let mut state = self.state.lock();
        if state.computed {
            if check <= state.checked {
                return Check::Fresh;
            }
            if max_trigger(&state.triggers) <= state.current {
                state.checked = check;
                return Check::Fresh;
            }
        }
        Check::Stale { check }
    }

    pub fn needs_update(&self) -> bool {
        if self.is_dropped() {
            return false;
        }
        let state = self.state.lock();
        !state.computed || max_trigger(&state.triggers) > state.current
    }

    /// Subscribe `this` to every current dependency.
    pub fn link(&self, this: &Weak<dyn Dependent>) {
        let dependencies = self.state.lock().dependencies.clone();
        for dependency in dependencies {
            dependency.subscribers().insert(self.id, this.clone());
        }
    }

    /// Step 5 of the protocol.
    ///
    /// `discovered` replaces the dependency list entirely (dynamic flavor);
    /// reverse edges from dependencies that were not read again are removed.
    pub fn finish(
        &self,
        check: Version,
        discovered: Option<Vec<Arc<dyn Upstream>>>,
        this: &Weak<dyn Dependent>,
    ) {
        debug_assert_eq!(discovered.is_some(), self.tracking == Tracking::Dynamic);
        let dependencies = match discovered {
            Some(discovered) => {
                let previous = self.state.lock().dependencies.clone();
                for old in &previous {
                    if !discovered.iter().any(|new| new.id() == old.id()) {
                        old.subscribers().remove(self.id);
                    }
                }
                for new in &discovered {
                    new.subscribers().insert(self.id, this.clone());
                }
                discovered
            }
            None => self.state.lock().dependencies.clone(),
        };

        let mut triggers = Triggers::new();
        for dependency in &dependencies {
            dependency.collect_triggers(&mut triggers);
        }

        // Stamps newer than `check` were written by the callback itself and
        // must still look new on the next check.
        let current = triggers
            .values()
            .map(|stamp| stamp.current())
            .filter(|version| *version <= check)
            .max()
            .unwrap_or(Version::MIN);

        let mut state = self.state.lock();
        state.dependencies = dependencies;
        state.triggers = triggers;
        state.current = current;
        state.checked = check;
        state.computed = true;
    }
}

/// Bring declared sources up to date, then run `f` on their values in a
/// frame of the given mode.
///
/// Fails if `f` attempted a forbidden operation, even when it went on to
/// return normally.
pub(crate) fn run_static<S, R>(
    node: NodeId,
    sources: &S,
    mode: Mode,
    f: impl FnOnce(S::Values) -> R,
) -> Result<R, SignalError>
where
    S: Sources,
{
    let values = {
        let _visit = ReactiveContext::enter(node, Mode::Fetching)?;
        sources.fetch()?
    };
    let ctx = ReactiveContext::enter(node, mode)?;
    let output = f(values);
    ctx.exit()?;
    Ok(output)
}

/// Run `f` in a recording frame and return what it read.
pub(crate) fn run_dynamic<R>(
    node: NodeId,
    mode: Mode,
    f: impl FnOnce() -> R,
) -> Result<(R, Vec<Arc<dyn Upstream>>), SignalError> {
    let ctx = ReactiveContext::enter(node, mode)?;
    let output = f();
    let read = ctx.exit()?;
    Ok((output, read))
}
