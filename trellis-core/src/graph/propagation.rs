//! Change Propagation
//!
//! Finds the deriveds and effects affected by a change.
//!
//! # Algorithm
//!
//! A breadth-first walk along reverse edges:
//!
//! 1. Start from the subscribers of every changed node. A freshly created
//!    derived or effect starts from itself.
//! 2. Skip dead weak entries and dropped nodes.
//! 3. Deriveds are collected and their own subscribers are queued, so a
//!    change several layers away still reaches the leaf effects.
//! 4. Effects are collected; nothing depends on them.
//!
//! Every node is visited at most once per walk, which deduplicates diamonds.
//! Nothing is recomputed here; that is up to the execution strategy.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::node::{Dependent, Node, NodeId, NodeKind, Upstream};

/// Where a notification starts.
#[derive(Clone)]
pub enum Origin {
    /// A source was written.
    Changed(Arc<dyn Upstream>),

    /// A derived or effect was just constructed.
    Created(Arc<dyn Dependent>),
}

impl Origin {
    pub fn id(&self) -> NodeId {
        match self {
            Origin::Changed(node) => node.id(),
            Origin::Created(node) => node.id(),
        }
    }
}

/// Result of a propagation walk, in discovery order.
#[derive(Default)]
pub struct Affected {
    pub deriveds: Vec<Arc<dyn Dependent>>,
    pub effects: Vec<Arc<dyn Dependent>>,
}

/// Walk reverse edges from `origins` and collect everything downstream.
pub fn collect_affected(origins: &[Origin]) -> Affected {
    let mut affected = Affected::default();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<Arc<dyn Dependent>> = VecDeque::new();

    for origin in origins {
        match origin {
            Origin::Changed(node) => queue.extend(node.subscribers().live()),
            Origin::Created(node) => queue.push_back(Arc::clone(node)),
        }
    }

    while let Some(node) = queue.pop_front() {
        if !visited.insert(node.id()) || node.is_dropped() {
            continue;
        }

        match node.kind() {
            NodeKind::Derived => {
                if let Some(subscribers) = node.downstream() {
                    queue.extend(subscribers.live());
                }
                affected.deriveds.push(node);
            }
            NodeKind::Effect => affected.effects.push(node),
            // Sources never subscribe to anything.
            NodeKind::Source => {}
        }
    }

    affected
}
