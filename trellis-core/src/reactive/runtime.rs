//! Reactive Runtime
//!
//! The runtime connects writes to the execution strategy. It owns the
//! per-thread engine state that is not part of any single node:
//!
//! - the active [`ExecutionStrategy`] (default: [`ManualStrategy`])
//! - the suspension depth and the notifications held back while suspended
//!
//! # How It Works
//!
//! 1. A signal write, or the construction of a derived or effect, calls
//!    [`notify`] with the change's origin.
//!
//! 2. The runtime walks reverse edges from the origin to find every affected
//!    derived and effect.
//!
//! 3. The strategy is handed the result and decides whether anything runs
//!    now, later, or only when the caller asks.
//!
//! While suspended, step 2 and 3 are deferred. Resuming merges everything
//! that changed into a single notification.
//!
//! # Thread Safety
//!
//! The version clock is process-wide, but everything here is thread-local:
//! each thread is its own independent engine context. Handles can move
//! between threads, but a graph is meant to be driven from one.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use super::context::ReactiveContext;
use super::handle::NodeHandle;
use super::strategy::{ChangeSet, ExecutionStrategy, ManualStrategy};
use crate::error::SignalError;
use crate::graph::{collect_affected, NodeId, Origin};

struct RuntimeState {
    strategy: Arc<dyn ExecutionStrategy>,
    suspended: usize,
    pending: IndexMap<NodeId, Origin>,
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState {
        strategy: Arc::new(ManualStrategy),
        suspended: 0,
        pending: IndexMap::new(),
    });
}

/// Replace this thread's execution strategy and return the previous one.
pub fn set_execution_strategy(strategy: Arc<dyn ExecutionStrategy>) -> Arc<dyn ExecutionStrategy> {
    tracing::debug!("execution strategy replaced");
    RUNTIME.with(|rt| std::mem::replace(&mut rt.borrow_mut().strategy, strategy))
}

/// The execution strategy active on this thread.
pub fn execution_strategy() -> Arc<dyn ExecutionStrategy> {
    RUNTIME.with(|rt| Arc::clone(&rt.borrow().strategy))
}

/// Whether recomputation is currently frozen on this thread.
pub fn is_suspended() -> bool {
    RUNTIME.with(|rt| rt.borrow().suspended > 0)
}

/// Report a change to the execution strategy.
pub(crate) fn notify(origin: Origin) -> Result<(), SignalError> {
    let strategy = RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        if rt.suspended > 0 {
            rt.pending.entry(origin.id()).or_insert_with(|| origin.clone());
            None
        } else {
            Some(Arc::clone(&rt.strategy))
        }
    });

    match strategy {
        Some(strategy) => deliver(&strategy, &[origin]),
        None => Ok(()),
    }
}

fn deliver(strategy: &Arc<dyn ExecutionStrategy>, origins: &[Origin]) -> Result<(), SignalError> {
    let affected = collect_affected(origins);
    let changes = ChangeSet::new(
        origins.iter().map(Origin::id).collect(),
        affected.deriveds.into_iter().map(NodeHandle::from_dependent).collect(),
        affected.effects.into_iter().map(NodeHandle::from_dependent).collect(),
    );

    tracing::debug!(
        changed = changes.changed().len(),
        deriveds = changes.deriveds().len(),
        effects = changes.effects().len(),
        "notifying execution strategy"
    );
    strategy.on_changed(&changes)
}

/// Give the strategy a chance to run work it queued while a reaction was
/// running. Called once an effect invocation returns to an idle stack.
pub(crate) fn settle() -> Result<(), SignalError> {
    if !ReactiveContext::is_idle() || is_suspended() {
        return Ok(());
    }
    execution_strategy().on_idle()
}

/// Invoke each stale node in `nodes` once.
///
/// The list is filtered up front to the nodes whose triggers advanced since
/// they last ran; the filtered nodes are then updated in order. Returns the
/// nodes whose calculation or action actually ran.
pub fn bulk_update(nodes: &[NodeHandle]) -> Result<Vec<NodeHandle>, SignalError> {
    let stale: Vec<&NodeHandle> = nodes.iter().filter(|node| node.needs_update()).collect();
    tracing::debug!(requested = nodes.len(), stale = stale.len(), "bulk update");

    let mut ran = Vec::with_capacity(stale.len());
    for node in stale {
        if node.update()? {
            ran.push(node.clone());
        }
    }
    Ok(ran)
}

/// Freeze recomputation until the returned guard resumes.
///
/// While suspended, reads return the last cached value without
/// recomputing, reading a derived that never computed fails, and invoking an
/// effect fails. Writes still happen, but their notifications are held back
/// and delivered as one when the outermost guard resumes.
///
/// Suspension nests.
pub fn suspend() -> SuspendGuard {
    let depth = RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        rt.suspended += 1;
        rt.suspended
    });
    tracing::debug!(depth, "updates suspended");

    SuspendGuard {
        resumed: false,
        _thread: PhantomData,
    }
}

/// Keeps updates suspended until resumed or dropped.
#[must_use = "updates resume as soon as the guard is dropped"]
pub struct SuspendGuard {
    resumed: bool,
    // Suspension is per thread; the guard must not leave it.
    _thread: PhantomData<Rc<()>>,
}

impl SuspendGuard {
    /// Resume updates, returning any error from the deferred notification.
    pub fn resume(mut self) -> Result<(), SignalError> {
        self.resumed = true;
        resume()
    }
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        if !self.resumed {
            if let Err(error) = resume() {
                tracing::warn!(%error, "deferred update failed while resuming");
            }
        }
    }
}

fn resume() -> Result<(), SignalError> {
    let released = RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        rt.suspended = rt.suspended.saturating_sub(1);
        if rt.suspended > 0 {
            return None;
        }
        let pending: Vec<Origin> = std::mem::take(&mut rt.pending).into_values().collect();
        Some((Arc::clone(&rt.strategy), pending))
    });

    match released {
        Some((strategy, pending)) => {
            tracing::debug!(pending = pending.len(), "updates resumed");
            if pending.is_empty() {
                Ok(())
            } else {
                deliver(&strategy, &pending)
            }
        }
        None => Ok(()),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::install;
    use super::*;
    use crate::reactive::{Derived, Effect, Signal};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every change set it is handed.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Vec<NodeId>, Vec<NodeId>, Vec<NodeId>)>>,
    }

    impl ExecutionStrategy for Recorder {
        fn on_changed(&self, changes: &ChangeSet) -> Result<(), SignalError> {
            let ids = |nodes: &[NodeHandle]| nodes.iter().map(NodeHandle::id).collect::<Vec<_>>();
            self.calls.lock().push((
                changes.changed().to_vec(),
                ids(changes.deriveds()),
                ids(changes.effects()),
            ));
            Ok(())
        }
    }

    #[test]
    fn default_strategy_runs_nothing() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let signal = Signal::new(1);

        let _effect = Effect::with_sources(signal.clone(), move |_| {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        signal.set(2).unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn writes_and_constructions_are_reported() {
        let recorder = Arc::new(Recorder::default());
        let _restore = install(recorder.clone());

        let signal = Signal::new(1);
        let derived = Derived::with_sources(signal.clone(), |x| x + 1).unwrap();
        let effect = Effect::with_sources(derived.clone(), |_| Ok(())).unwrap();
        signal.set(2).unwrap();

        let none: Vec<NodeId> = Vec::new();
        let calls = recorder.calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], (vec![derived.id()], vec![derived.id()], none.clone()));
        assert_eq!(calls[1], (vec![effect.id()], none, vec![effect.id()]));
        assert_eq!(calls[2], (vec![signal.id()], vec![derived.id()], vec![effect.id()]));
    }

    #[test]
    fn suspension_merges_notifications() {
        let recorder = Arc::new(Recorder::default());
        let _restore = install(recorder.clone());

        let a = Signal::new(1);
        let b = Signal::new(1);
        let sum = Derived::with_sources((a.clone(), b.clone()), |(x, y)| x + y).unwrap();
        recorder.calls.lock().clear();

        let outer = suspend();
        let inner = suspend();
        a.set(2).unwrap();
        b.set(3).unwrap();
        a.set(4).unwrap();
        inner.resume().unwrap();
        assert!(is_suspended());
        assert!(recorder.calls.lock().is_empty());
        outer.resume().unwrap();

        assert!(!is_suspended());
        let calls = recorder.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (vec![a.id(), b.id()], vec![sum.id()], Vec::<NodeId>::new()));
    }

    #[test]
    fn dropping_the_guard_resumes() {
        {
            let _guard = suspend();
            assert!(is_suspended());
        }
        assert!(!is_suspended());
    }

    #[test]
    fn bulk_update_skips_fresh_nodes() {
        let signal = Signal::new(1);
        let derived = Derived::with_sources(signal.clone(), |x| x * 10).unwrap();
        let handle = derived.handle();

        assert_eq!(bulk_update(&[handle.clone()]).unwrap(), vec![handle.clone()]);
        assert!(bulk_update(&[handle.clone()]).unwrap().is_empty());

        signal.set(2).unwrap();
        assert_eq!(bulk_update(&[handle.clone()]).unwrap().len(), 1);
        assert_eq!(derived.get().unwrap(), 20);
    }
}
