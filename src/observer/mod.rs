use ndarray::ArrayD;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::behavior::{node_level, ElementaryBehavior};
use crate::graph::{Graph, Node, NodeId};

/// A read-only snapshot of the graph's primary nodes.
///
/// Design intent:
/// - Observers cannot mutate or steer the graph.
/// - Snapshotting is *on-demand* and can allocate; the tick loop stays unchanged.
/// - Processing steps are left out; they are internal to their connection.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct GraphSnapshot {
    pub ticks: u64,
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub enum NodeKind {
    Field,
    External,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct NodeSnapshot {
    pub id: usize,
    pub label: String,
    pub kind: NodeKind,
    pub sizes: Vec<usize>,
    /// Fields only.
    pub max_activation: Option<f64>,
    pub max_output: f64,
    pub mean_output: f64,
    /// Flat index of the highest output, if the node has any sites.
    pub peak: Option<usize>,
}

pub struct GraphAdapter<'a> {
    graph: &'a Graph,
}

impl<'a> GraphAdapter<'a> {
    pub fn new(graph: &'a Graph) -> Self {
        Self { graph }
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .graph
            .node_ids()
            .filter_map(|id| self.node(id))
            .collect();
        GraphSnapshot {
            ticks: self.graph.ticks(),
            nodes,
        }
    }

    pub fn node(&self, id: NodeId) -> Option<NodeSnapshot> {
        let (kind, max_activation) = match self.graph.node(id)? {
            Node::Step(_) => return None,
            Node::Field(f) => (NodeKind::Field, Some(max_of(f.activation()))),
            Node::External(_) => (NodeKind::External, None),
        };
        let c = self.graph.connectable(id).ok()?;
        let output = c.output();
        let sizes = c
            .output_dimension_sizes()
            .or(c.input_dimension_sizes())
            .map(<[usize]>::to_vec)
            .unwrap_or_default();

        Some(NodeSnapshot {
            id: id.index(),
            label: c.label().to_string(),
            kind,
            sizes,
            max_activation,
            max_output: max_of(output),
            mean_output: output.mean().unwrap_or(0.0),
            peak: argmax(output),
        })
    }
}

/// The state of one elementary behavior as a handful of scalars.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct BehaviorSnapshot {
    pub label: String,
    pub intention: f64,
    pub cos: f64,
    pub cos_memory: f64,
    pub intention_field_peak: Option<usize>,
    pub active: bool,
    pub complete: bool,
}

pub struct BehaviorAdapter<'a> {
    graph: &'a Graph,
    behavior: &'a ElementaryBehavior,
}

impl<'a> BehaviorAdapter<'a> {
    pub fn new(graph: &'a Graph, behavior: &'a ElementaryBehavior) -> Self {
        Self { graph, behavior }
    }

    pub fn snapshot(&self) -> BehaviorSnapshot {
        let b = self.behavior;
        let intention_field_peak = self
            .graph
            .output(b.intention_field())
            .ok()
            .filter(|o| max_of(o) > 0.5)
            .and_then(argmax);

        BehaviorSnapshot {
            label: b.label().to_string(),
            intention: node_level(self.graph, b.intention_node()),
            cos: node_level(self.graph, b.cos_node()),
            cos_memory: node_level(self.graph, b.cos_memory_node()),
            intention_field_peak,
            active: b.is_active(self.graph),
            complete: b.is_complete(self.graph),
        }
    }
}

fn max_of(a: &ArrayD<f64>) -> f64 {
    a.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn argmax(a: &ArrayD<f64>) -> Option<usize> {
    a.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
