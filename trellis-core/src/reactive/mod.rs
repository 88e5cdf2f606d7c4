//! Reactive Primitives
//!
//! This module implements the reactive system: signals, deriveds and
//! effects, the reentrancy guard that keeps calculations pure, and the
//! execution strategies that decide when affected nodes run.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. Every write that changes the
//! value advances a global version clock and stamps the signal with it.
//!
//! ## Deriveds
//!
//! A Derived is a cached value computed from signals and other deriveds.
//! It keeps the set of signals it transitively reaches and recomputes only
//! when one of them carries a newer stamp than its last recomputation.
//! Reads are pull-based: reading a derived always brings it up to date
//! first, whichever strategy is active.
//!
//! ## Effects
//!
//! An Effect is an action over signals and deriveds. It runs when invoked,
//! and only if one of its sources moved since it last ran. Effects are the
//! one place writes are allowed.
//!
//! ## Execution Strategies
//!
//! Writes do not run anything by themselves. The active
//! [`ExecutionStrategy`] is told which deriveds and effects a write affects
//! and decides what to do about it: nothing ([`ManualStrategy`]), run them
//! now ([`ImmediateStrategy`]) or queue them ([`DelayedStrategy`]).
//!
//! # Implementation Notes
//!
//! Dependencies are either declared up front (`with_sources`) or discovered
//! by recording every read during the callback (`new`). Discovery uses a
//! thread-local stack of frames, pushed around each calculation and action.

mod context;
mod dependent;
mod derived;
mod effect;
mod handle;
mod runtime;
mod signal;
mod sources;
mod strategy;

pub use context::untracked;
pub use derived::Derived;
pub use effect::Effect;
pub use handle::NodeHandle;
pub use runtime::{bulk_update, execution_strategy, is_suspended, set_execution_strategy, suspend, SuspendGuard};
pub use signal::{ReadSignal, Signal};
pub use sources::{Readable, Sources};
pub use strategy::{
    ChangeSet, DelayedStrategy, ExecutionStrategy, ImmediateStrategy, ManualStrategy, DEFAULT_UPDATE_LIMIT,
};
