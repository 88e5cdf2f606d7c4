//! Dependency Graph
//!
//! This module implements the node identities, the version clock and the
//! reverse-edge walk shared by every reactive primitive.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph where:
//!
//! - Nodes are sources (signals), deriveds or effects
//! - A dependent holds strong edges down to the nodes it reads
//! - A source or derived holds weak edges up to the nodes that read it
//!
//! # Design Decisions
//!
//! 1. Edges live on the nodes themselves rather than in a central registry,
//!    so a graph is reclaimed by ordinary ownership once its handles go away.
//!
//! 2. Change detection is purely version based. Each dependent keeps the
//!    transitive set of source stamps it reaches (its triggers) and compares
//!    them against the version it last recomputed at.
//!
//! 3. Cycles are not prevented structurally. They are caught while running,
//!    by the reentrancy guard in `reactive::context`.

mod node;
mod propagation;
mod version;

pub use node::{max_trigger, Dependent, Node, NodeId, NodeKind, Stamp, Subscribers, Triggers, Upstream};
pub use propagation::{collect_affected, Origin};
pub use version::{current_version, next_version, Version};
