//! Reactive Context
//!
//! The reactive context is the reentrancy guard. It tracks which calculation
//! or action is currently running and decides what that callback may do.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Running a derived's calculation or
//! an effect's action pushes a frame for that node; the frame is popped when
//! the callback returns. Each frame carries a mode:
//!
//! - `Fetching`: the engine is bringing a node's declared sources up to date.
//! - `Calculating`: a pure calculation runs. Writes and effect invocation
//!   are forbidden; reads are recorded in the dynamic flavor and rejected in
//!   the static flavor.
//! - `Acting`: an effect action runs. Reads and writes are allowed.
//! - `Untracked`: reads are explicitly permitted and not recorded.
//!
//! A node that is already on the stack cannot be entered again, which is how
//! direct and indirect self-reference is detected.
//!
//! Every rejected operation is also recorded on the frame of the callback
//! that attempted it. Leaving that frame reports the first violation even if
//! the callback swallowed the error, so nothing it produced gets cached.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::{ReentryError, SignalError};
use crate::graph::{Node, NodeId, Upstream};

/// What the callback on top of a frame is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Fetching,
    Calculating { tracked: bool },
    Acting { tracked: bool },
    Untracked,
}

impl Mode {
    fn is_tracked(self) -> bool {
        matches!(
            self,
            Mode::Calculating { tracked: true } | Mode::Acting { tracked: true }
        )
    }
}

struct Frame {
    node: Option<NodeId>,
    mode: Mode,
    /// Nodes read during this frame, in first-read order.
    recorded: IndexMap<NodeId, Arc<dyn Upstream>>,
    /// First guard violation raised while this frame was running.
    violation: Option<SignalError>,
}

type Stack = SmallVec<[Frame; 8]>;

/// Record `error` on the innermost frame that runs a node's callback.
fn reject(stack: &mut Stack, error: SignalError) -> SignalError {
    if let Some(frame) = stack.iter_mut().rev().find(|frame| frame.node.is_some()) {
        frame.violation.get_or_insert_with(|| error.clone());
    }
    error
}

thread_local! {
    static CONTEXT_STACK: RefCell<Stack> = RefCell::new(SmallVec::new());
}

/// Guard that pops its frame when dropped.
///
/// This keeps the stack balanced even if a callback panics.
pub(crate) struct ReactiveContext {
    node: Option<NodeId>,
    active: bool,
}

impl ReactiveContext {
    /// Enter a frame for `node`.
    ///
    /// Fails with [`ReentryError::RecursiveLoop`] if `node` is already
    /// running further down the stack.
    pub fn enter(node: NodeId, mode: Mode) -> Result<Self, SignalError> {
        Self::check_recursion(node)?;
        Self::push(Some(node), mode);
        Ok(Self {
            node: Some(node),
            active: true,
        })
    }

    /// Enter a frame in which reads are permitted and not recorded.
    pub fn enter_untracked() -> Self {
        Self::push(None, Mode::Untracked);
        Self {
            node: None,
            active: true,
        }
    }

    fn push(node: Option<NodeId>, mode: Mode) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                node,
                mode,
                recorded: IndexMap::new(),
                violation: None,
            });
        });
    }

    /// Leave the frame and return the nodes read during it.
    ///
    /// Fails with the first violation raised while the frame was running.
    pub fn exit(mut self) -> Result<Vec<Arc<dyn Upstream>>, SignalError> {
        self.active = false;
        match self.pop() {
            Some(Frame {
                violation: Some(error),
                ..
            }) => Err(error),
            Some(frame) => Ok(frame.recorded.into_values().collect()),
            None => Ok(Vec::new()),
        }
    }

    fn pop(&self) -> Option<Frame> {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the right frame.
        if let Some(frame) = &popped {
            debug_assert_eq!(
                frame.node, self.node,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.node, frame.node
            );
        }
        popped
    }

    /// Fail if `node` is already running on this thread.
    ///
    /// The loop is recorded on every frame from `node`'s own frame inwards.
    pub fn check_recursion(node: NodeId) -> Result<(), SignalError> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(start) = stack.iter().position(|frame| frame.node == Some(node)) else {
                return Ok(());
            };

            let error = SignalError::from(ReentryError::RecursiveLoop { node });
            for frame in stack[start..].iter_mut().filter(|frame| frame.node.is_some()) {
                frame.violation.get_or_insert_with(|| error.clone());
            }
            Err(error)
        })
    }

    /// Check that `node` may be read here and record it if the running
    /// callback discovers its dependencies.
    pub fn observe(node: &Arc<dyn Upstream>) -> Result<(), SignalError> {
        let id = node.id();
        Self::check_recursion(id)?;

        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(frame) = stack.last_mut() else {
                return Ok(());
            };

            let mode = frame.mode;
            match mode {
                Mode::Calculating { tracked: false } => {
                    let error = ReentryError::UndeclaredRead {
                        // Only untracked frames lack a node.
                        calculation: frame.node.unwrap_or(id),
                        node: id,
                    };
                    Err(reject(&mut stack, error.into()))
                }
                mode if mode.is_tracked() => {
                    frame.recorded.entry(id).or_insert_with(|| Arc::clone(node));
                    Ok(())
                }
                _ => Ok(()),
            }
        })
    }

    /// Check that signal `node` may be written here.
    pub fn check_write(node: NodeId) -> Result<(), SignalError> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let innermost = stack.iter().rev().find(|frame| frame.mode != Mode::Untracked);
            let calculation = match innermost {
                Some(Frame {
                    node: Some(calculation),
                    mode: Mode::Calculating { .. } | Mode::Fetching,
                    ..
                }) => *calculation,
                _ => return Ok(()),
            };
            let error = ReentryError::WriteInCalculation { calculation, node };
            Err(reject(&mut stack, error.into()))
        })
    }

    /// Check that effect `effect` may be invoked here.
    pub fn check_invoke(effect: NodeId) -> Result<(), SignalError> {
        if Self::is_idle() {
            return Ok(());
        }
        CONTEXT_STACK.with(|stack| {
            let error = ReentryError::EffectInReaction { effect };
            Err(reject(&mut stack.borrow_mut(), error.into()))
        })
    }

    /// Whether no calculation or action is running on this thread.
    pub fn is_idle() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .all(|frame| frame.mode == Mode::Untracked)
        })
    }

    /// Number of frames on this thread's stack.
    #[cfg(test)]
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if self.active {
            self.pop();
        }
    }
}

/// Run `f` with reads explicitly permitted and not recorded as dependencies.
///
/// This is the way for a static-dependency calculation to sample a node it
/// did not declare. Writes and effect invocation stay forbidden inside a
/// calculation.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter_untracked();
    f()
}
