//! Trellis Core
//!
//! This crate provides a dependency-tracking engine for reactive values.
//! It implements:
//!
//! - Signals: mutable values stamped with a global version clock
//! - Deriveds: cached values that recompute only when a source moved
//! - Effects: actions that run on demand when a source moved
//! - Pluggable execution strategies deciding when affected nodes run
//!
//! Evaluation is glitch-free: a derived never observes a half-updated
//! upstream, because every read brings its input up to date first.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `graph`: node identities, the version clock and the reverse-edge walk
//! - `reactive`: the public handles, the reentrancy guard, the execution
//!   strategies and the per-thread runtime
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Derived, Effect, Signal};
//!
//! // Create signals
//! let s = Signal::new(1);
//! let t = Signal::new(2);
//!
//! // Create a derived value over declared sources
//! let c = Derived::with_sources((s.clone(), t.clone()), |(x, y)| 2 * x + y)?;
//!
//! // Create an effect
//! let e = Effect::with_sources(c.clone(), |value| {
//!     println!("{value}");
//!     Ok(())
//! })?;
//!
//! e.invoke()?;  // Prints: "4"
//! s.set(20)?;
//! e.invoke()?;  // Prints: "42"
//! ```

mod error;
mod graph;
pub mod reactive;

pub use error::{ReentryError, SignalError, SuspendError};
pub use graph::{current_version, NodeId, NodeKind, Version};
pub use reactive::{
    bulk_update, set_execution_strategy, suspend, untracked, DelayedStrategy, Derived, Effect,
    ExecutionStrategy, ImmediateStrategy, ManualStrategy, NodeHandle, ReadSignal, Signal,
};
