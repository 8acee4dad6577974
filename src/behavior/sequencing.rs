//! Sequencing primitives built from relay nodes.
//!
//! Ordering constraints are not a state machine: each constraint is one or
//! two plain 0-D fields wired between behaviors, and the order emerges from
//! the coupled dynamics.

use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;
use crate::field::{DynamicField, FieldParams};
use crate::graph::{Graph, NodeId};
use crate::steps::{ProcessingStep, Weight};

use super::ElementaryBehavior;

/// Anything that can take part in sequencing: it has an intention that can
/// be inhibited and a node signalling that it is done.
pub trait Sequenceable {
    fn intention_node(&self) -> NodeId;
    fn completion_node(&self) -> NodeId;
}

/// A bare node acts as its own intention and completion signal.
impl Sequenceable for NodeId {
    fn intention_node(&self) -> NodeId {
        *self
    }

    fn completion_node(&self) -> NodeId {
        *self
    }
}

impl Sequenceable for ElementaryBehavior {
    fn intention_node(&self) -> NodeId {
        ElementaryBehavior::intention_node(self)
    }

    /// The CoS memory, or the CoS node itself for a reactivating behavior.
    fn completion_node(&self) -> NodeId {
        if self.is_reactivating() {
            self.cos_node()
        } else {
            self.cos_memory_node()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SequencingWeights {
    pub task_to_intention: f64,
    /// Primes the CoS memory below threshold so a CoS signal can latch it.
    pub task_to_cos_memory: f64,

    pub precondition_task: f64,
    pub precondition_completion: f64,
    pub precondition_inhibition: f64,

    pub competition_task: f64,
    pub competition_intention: f64,
    pub competition_inhibition: f64,
    pub competition_mutual_inhibition: f64,

    pub relay_params: FieldParams,
}

impl Default for SequencingWeights {
    fn default() -> Self {
        Self {
            task_to_intention: 6.0,
            task_to_cos_memory: 3.0,
            precondition_task: 7.0,
            precondition_completion: -8.0,
            precondition_inhibition: -6.0,
            competition_task: 3.0,
            competition_intention: 3.0,
            competition_inhibition: -6.0,
            competition_mutual_inhibition: -6.0,
            relay_params: FieldParams::default(),
        }
    }
}

fn weight(w: f64) -> Vec<ProcessingStep> {
    vec![Weight::new(w).into()]
}

fn add_relay(graph: &mut Graph, label: String, params: &FieldParams) -> NodeId {
    graph.add_field(DynamicField::with_params(&[], params.clone()).with_label(label))
}

fn label_of(graph: &Graph, id: NodeId) -> String {
    match graph.connectable(id) {
        Ok(c) if !c.label().is_empty() => c.label().to_string(),
        _ => format!("#{}", id.index()),
    }
}

/// Let `task` drive `behavior`: excite its intention and prime its CoS
/// memory.
pub fn connect_to_task(
    graph: &mut Graph,
    task: NodeId,
    behavior: &ElementaryBehavior,
) -> Result<(), ConnectError> {
    connect_to_task_with(graph, task, behavior, &SequencingWeights::default())
}

pub fn connect_to_task_with(
    graph: &mut Graph,
    task: NodeId,
    behavior: &ElementaryBehavior,
    weights: &SequencingWeights,
) -> Result<(), ConnectError> {
    graph.connect(task, behavior.intention_node(), weight(weights.task_to_intention))?;
    graph.connect(task, behavior.cos_memory_node(), weight(weights.task_to_cos_memory))?;
    Ok(())
}

/// `after` may not start until `before` has completed.
///
/// The returned relay node is excited by the task, inhibited by `before`'s
/// completion, and inhibits `after`'s intention while it is on.
pub fn precondition(
    graph: &mut Graph,
    before: &impl Sequenceable,
    after: &impl Sequenceable,
    task: NodeId,
) -> Result<NodeId, ConnectError> {
    precondition_with(graph, before, after, task, &SequencingWeights::default())
}

pub fn precondition_with(
    graph: &mut Graph,
    before: &impl Sequenceable,
    after: &impl Sequenceable,
    task: NodeId,
    weights: &SequencingWeights,
) -> Result<NodeId, ConnectError> {
    let label = format!(
        "precondition({} -> {})",
        label_of(graph, before.intention_node()),
        label_of(graph, after.intention_node())
    );
    let relay = add_relay(graph, label, &weights.relay_params);

    graph.connect(task, relay, weight(weights.precondition_task))?;
    graph.connect(before.completion_node(), relay, weight(weights.precondition_completion))?;
    graph.connect(relay, after.intention_node(), weight(weights.precondition_inhibition))?;

    debug!(relay = relay.index(), "precondition wired");
    Ok(relay)
}

/// `a` and `b` may not run at the same time.
///
/// A relay excited by the task and by `a`'s intention suppresses `b`'s
/// intention. With `bidirectional`, a second relay does the same the other
/// way round and the two relays inhibit each other, so whichever intention
/// wins first keeps the other one off. Returns the relay ids, `a`'s first.
pub fn competition(
    graph: &mut Graph,
    a: &impl Sequenceable,
    b: &impl Sequenceable,
    task: NodeId,
    bidirectional: bool,
) -> Result<Vec<NodeId>, ConnectError> {
    competition_with(graph, a, b, task, bidirectional, &SequencingWeights::default())
}

pub fn competition_with(
    graph: &mut Graph,
    a: &impl Sequenceable,
    b: &impl Sequenceable,
    task: NodeId,
    bidirectional: bool,
    weights: &SequencingWeights,
) -> Result<Vec<NodeId>, ConnectError> {
    let a_label = label_of(graph, a.intention_node());
    let b_label = label_of(graph, b.intention_node());

    let mut relays = Vec::with_capacity(2);
    let label = format!("competition({a_label} > {b_label})");
    relays.push(competition_relay(graph, a, b, task, label, weights)?);

    if bidirectional {
        let label = format!("competition({b_label} > {a_label})");
        relays.push(competition_relay(graph, b, a, task, label, weights)?);
        graph.connect(relays[0], relays[1], weight(weights.competition_mutual_inhibition))?;
        graph.connect(relays[1], relays[0], weight(weights.competition_mutual_inhibition))?;
    }

    debug!(relays = relays.len(), "competition wired");
    Ok(relays)
}

fn competition_relay(
    graph: &mut Graph,
    winner: &impl Sequenceable,
    loser: &impl Sequenceable,
    task: NodeId,
    label: String,
    weights: &SequencingWeights,
) -> Result<NodeId, ConnectError> {
    let relay = add_relay(graph, label, &weights.relay_params);
    graph.connect(task, relay, weight(weights.competition_task))?;
    graph.connect(winner.intention_node(), relay, weight(weights.competition_intention))?;
    graph.connect(relay, loser.intention_node(), weight(weights.competition_inhibition))?;
    Ok(relay)
}
