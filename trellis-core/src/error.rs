//! Error types surfaced by the engine.
//!
//! Every failure is raised before any state is mutated: a guard check that
//! fails leaves versions, caches and edges exactly as they were.

use thiserror::Error;

use crate::graph::NodeId;

/// Base error for every fallible operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error(transparent)]
    Reentry(#[from] ReentryError),

    #[error(transparent)]
    Suspend(#[from] SuspendError),

    /// A derived or effect was built over an empty source list.
    #[error("a derived or effect needs at least one source")]
    NoSources,

    /// A dropped derived was read before it ever produced a value.
    #[error("derived {node} has no value")]
    Uninitialized { node: NodeId },

    /// An eager strategy kept finding work past its configured limit.
    #[error("updates did not settle within {limit} runs")]
    Unsettled { limit: usize },
}

/// An operation that is not allowed while a calculation or action runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReentryError {
    /// A static-dependency calculation read a node it did not declare.
    #[error("calculation {calculation} read {node}, which it does not declare as a source")]
    UndeclaredRead { calculation: NodeId, node: NodeId },

    /// A signal was written from inside a pure calculation.
    #[error("calculation {calculation} attempted to write signal {node}")]
    WriteInCalculation { calculation: NodeId, node: NodeId },

    /// An effect was invoked while a calculation or action was running.
    #[error("effect {effect} invoked while a calculation or effect is running")]
    EffectInReaction { effect: NodeId },

    /// A node referenced itself, directly or through other nodes.
    #[error("recursive loop detected at {node}")]
    RecursiveLoop { node: NodeId },
}

/// An operation that is not allowed while updates are suspended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuspendError {
    #[error("effect {effect} invoked while updates are suspended")]
    EffectWhileSuspended { effect: NodeId },

    #[error("derived {node} has never been computed and updates are suspended")]
    UninitializedWhileSuspended { node: NodeId },
}
