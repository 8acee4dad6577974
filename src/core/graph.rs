//! Node arena, connection wiring, and stepping.
//!
//! Nodes live in one `Vec` and are addressed by [`NodeId`]. Adjacency is a
//! pair of index lists. Processing steps are nodes too, but each belongs to
//! exactly one connection and is only ever stepped by pulling from its
//! consumer.

use std::any::Any;

use hashbrown::HashMap;
use ndarray::{ArrayD, IxDyn};
use tracing::{debug, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::connectable::Connectable;
use crate::error::ConnectError;
use crate::field::DynamicField;
use crate::prng::Prng;
use crate::steps::ProcessingStep;

const DEFAULT_SEED: u64 = 0x5EED_F1E1D;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A Connectable that can be recovered by concrete type from the graph.
pub trait External: Connectable + Any {
    fn as_connectable(&self) -> &dyn Connectable;
    fn as_connectable_mut(&mut self) -> &mut dyn Connectable;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Connectable + Any> External for T {
    fn as_connectable(&self) -> &dyn Connectable {
        self
    }

    fn as_connectable_mut(&mut self) -> &mut dyn Connectable {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub enum Node {
    Field(DynamicField),
    Step(ProcessingStep),
    External(Box<dyn External>),
}

impl Node {
    pub fn connectable(&self) -> &dyn Connectable {
        match self {
            Node::Field(f) => f,
            Node::Step(s) => s,
            Node::External(e) => e.as_connectable(),
        }
    }

    fn connectable_mut(&mut self) -> &mut dyn Connectable {
        match self {
            Node::Field(f) => f,
            Node::Step(s) => s,
            Node::External(e) => e.as_connectable_mut(),
        }
    }

    pub fn is_step(&self) -> bool {
        matches!(self, Node::Step(_))
    }
}

/// Record of one `source -> [steps] -> target` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub source: NodeId,
    pub target: NodeId,
    pub steps: Vec<NodeId>,
}

pub struct Graph {
    nodes: Vec<Node>,
    incoming: Vec<Vec<NodeId>>,
    outgoing: Vec<Vec<NodeId>>,
    connections: Vec<Connection>,
    labels: HashMap<String, NodeId>,
    rng: Prng,
    ticks: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty graph whose noise generator is seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
            connections: Vec::new(),
            labels: HashMap::new(),
            rng: Prng::new(seed),
            ticks: 0,
        }
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        let label = node.connectable().label();
        if !label.is_empty() && !node.is_step() {
            if self.labels.insert(label.to_string(), id).is_some() {
                debug!(label, "label reassigned to a newer node");
            }
        }
        self.nodes.push(node);
        self.incoming.push(Vec::new());
        self.outgoing.push(Vec::new());
        id
    }

    pub fn add_field(&mut self, field: DynamicField) -> NodeId {
        self.push(Node::Field(field))
    }

    /// Add a default 0-D node with the given label.
    pub fn add_node(&mut self, label: impl Into<String>) -> NodeId {
        self.add_field(DynamicField::node().with_label(label))
    }

    /// Add a sensor, actuator, or any other foreign Connectable.
    pub fn add_external<C: Connectable + Any>(&mut self, external: C) -> NodeId {
        self.push(Node::External(Box::new(external)))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn find(&self, label: &str) -> Option<NodeId> {
        self.labels.get(label).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn connectable(&self, id: NodeId) -> Result<&dyn Connectable, ConnectError> {
        self.nodes
            .get(id.0)
            .map(Node::connectable)
            .ok_or(ConnectError::UnknownNode(id))
    }

    /// Output buffer of a node as of its last step.
    pub fn output(&self, id: NodeId) -> Result<&ArrayD<f64>, ConnectError> {
        Ok(self.connectable(id)?.output())
    }

    pub fn field(&self, id: NodeId) -> Result<&DynamicField, ConnectError> {
        match self.nodes.get(id.0) {
            Some(Node::Field(f)) => Ok(f),
            Some(_) => Err(ConnectError::NotAField(id)),
            None => Err(ConnectError::UnknownNode(id)),
        }
    }

    pub fn field_mut(&mut self, id: NodeId) -> Result<&mut DynamicField, ConnectError> {
        match self.nodes.get_mut(id.0) {
            Some(Node::Field(f)) => Ok(f),
            Some(_) => Err(ConnectError::NotAField(id)),
            None => Err(ConnectError::UnknownNode(id)),
        }
    }

    /// Borrow an external node as its concrete type.
    pub fn external<T: Any>(&self, id: NodeId) -> Option<&T> {
        match self.nodes.get(id.0)? {
            Node::External(e) => e.as_ref().as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn external_mut<T: Any>(&mut self, id: NodeId) -> Option<&mut T> {
        match self.nodes.get_mut(id.0)? {
            Node::External(e) => e.as_mut().as_any_mut().downcast_mut::<T>(),
            _ => None,
        }
    }

    pub fn incoming(&self, id: NodeId) -> &[NodeId] {
        self.incoming.get(id.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn outgoing(&self, id: NodeId) -> &[NodeId] {
        self.outgoing.get(id.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn rng_mut(&mut self) -> &mut Prng {
        &mut self.rng
    }

    /// Wire `source -> steps -> target`.
    ///
    /// Validates step ordering and dimensional compatibility, then infers
    /// every step's input and output sizes from the endpoints. Nothing is
    /// inserted unless the whole chain resolves.
    pub fn connect(
        &mut self,
        source: NodeId,
        target: NodeId,
        mut steps: Vec<ProcessingStep>,
    ) -> Result<Connection, ConnectError> {
        let source_sizes = self
            .connectable(source)?
            .output_dimension_sizes()
            .map(<[usize]>::to_vec)
            .ok_or(ConnectError::UnknownShape { side: "source output" })?;
        let target_sizes = self
            .connectable(target)?
            .input_dimension_sizes()
            .map(<[usize]>::to_vec)
            .ok_or(ConnectError::UnknownShape { side: "target input" })?;

        check_step_order(&steps)?;
        check_compatibility(&steps, &source_sizes, &target_sizes)?;
        let broadcast = check_chain_dimensionality(&steps, source_sizes.len(), target_sizes.len())?;
        // a 0-D chain end is spread uniformly over the target when stepping
        let chain_end: &[usize] = if broadcast { &[] } else { &target_sizes };
        resolve_sizes(&mut steps, &source_sizes, chain_end)?;

        let mut chain = Vec::with_capacity(steps.len() + 2);
        chain.push(source);
        let mut step_ids = Vec::with_capacity(steps.len());
        for mut step in steps {
            step.allocate_output();
            let id = self.push(Node::Step(step));
            step_ids.push(id);
            chain.push(id);
        }
        chain.push(target);

        for hop in chain.windows(2) {
            self.outgoing[hop[0].0].push(hop[1]);
            self.incoming[hop[1].0].push(hop[0]);
        }

        debug!(
            source = %self.connectable(source)?.label(),
            target = %self.connectable(target)?.label(),
            steps = step_ids.len(),
            broadcast,
            "connected"
        );

        let connection = Connection {
            source,
            target,
            steps: step_ids,
        };
        self.connections.push(connection.clone());
        Ok(connection)
    }

    /// Remove the most recent connection from `source` to `target`.
    /// Returns whether one existed. Its processing steps stay in the arena,
    /// orphaned.
    pub fn disconnect(&mut self, source: NodeId, target: NodeId) -> bool {
        let Some(pos) = self
            .connections
            .iter()
            .rposition(|c| c.source == source && c.target == target)
        else {
            return false;
        };
        let connection = self.connections.remove(pos);

        let mut chain = Vec::with_capacity(connection.steps.len() + 2);
        chain.push(source);
        chain.extend(connection.steps.iter().copied());
        chain.push(target);

        for hop in chain.windows(2) {
            remove_one(&mut self.outgoing[hop[0].0], hop[1]);
            remove_one(&mut self.incoming[hop[1].0], hop[0]);
        }
        debug!(?source, ?target, "disconnected");
        true
    }

    fn gather_inputs(&mut self, id: NodeId) -> Vec<ArrayD<f64>> {
        let sources = self.incoming[id.0].clone();
        let sizes = self.nodes[id.0]
            .connectable()
            .input_dimension_sizes()
            .map(<[usize]>::to_vec);
        let mut inputs = Vec::with_capacity(sources.len());
        for src in sources {
            if self.nodes[src.0].is_step() {
                self.step_node(src);
            }
            let output = self.nodes[src.0].connectable().output();
            let input = match &sizes {
                Some(sizes) if output.ndim() == 0 && !sizes.is_empty() => {
                    let level = output.first().copied().unwrap_or(0.0);
                    ArrayD::from_elem(IxDyn(sizes), level)
                }
                _ => output.clone(),
            };
            inputs.push(input);
        }
        inputs
    }

    /// Advance one node. Processing steps on its incoming chains are
    /// refreshed first.
    ///
    /// # Panics
    ///
    /// If `id` is not in this graph, or if a field receives an input of the
    /// wrong shape.
    pub fn step_node(&mut self, id: NodeId) {
        let inputs = self.gather_inputs(id);
        let node = &mut self.nodes[id.0];
        trace!(node = id.0, label = node.connectable().label(), "step");
        node.connectable_mut().step(&inputs, &mut self.rng);
    }

    /// Advance every field and external node once, in insertion order.
    pub fn step(&mut self) {
        for i in 0..self.nodes.len() {
            if !self.nodes[i].is_step() {
                self.step_node(NodeId(i));
            }
        }
        self.ticks += 1;
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Release every node's resources, in insertion order.
    pub fn release_all(&mut self) {
        for node in &mut self.nodes {
            node.connectable_mut().release();
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connections.len())
            .field("ticks", &self.ticks)
            .finish()
    }
}

fn remove_one(list: &mut Vec<NodeId>, id: NodeId) {
    if let Some(pos) = list.iter().position(|&x| x == id) {
        list.remove(pos);
    }
}

fn is_reshaping(step: &ProcessingStep) -> bool {
    step.is_scaler() || step.as_projection().is_some()
}

fn check_step_order(steps: &[ProcessingStep]) -> Result<(), ConnectError> {
    let scalers = steps.iter().filter(|s| s.is_scaler()).count();
    if scalers > 1 {
        return Err(ConnectError::MultipleScalers(scalers));
    }
    for (i, step) in steps.iter().enumerate() {
        let Some(p) = step.as_projection() else {
            continue;
        };
        if p.is_compressing() && steps[..i].iter().any(is_reshaping) {
            return Err(ConnectError::ProjectionOrder(i));
        }
        if p.is_expanding() && steps[i + 1..].iter().any(is_reshaping) {
            return Err(ConnectError::ProjectionOrder(i));
        }
    }
    Ok(())
}

fn check_compatibility(
    steps: &[ProcessingStep],
    source: &[usize],
    target: &[usize],
) -> Result<(), ConnectError> {
    let has_projection = steps.iter().any(|s| s.as_projection().is_some());
    let has_scaler = steps.iter().any(ProcessingStep::is_scaler);

    if source.len() != target.len() && !has_projection {
        return Err(ConnectError::DimensionalityMismatch {
            from: source.len(),
            to: target.len(),
        });
    }
    if source.len() == target.len() && source != target && !has_projection && !has_scaler {
        return Err(ConnectError::ShapeMismatch {
            from: source.to_vec(),
            to: target.to_vec(),
        });
    }
    Ok(())
}

// Chain elements are numbered source = 0, steps = 1..=n, target = n + 1.
// Returns whether the chain ends in a 0-D value that is broadcast into a
// target of higher dimensionality.
fn check_chain_dimensionality(
    steps: &[ProcessingStep],
    source: usize,
    target: usize,
) -> Result<bool, ConnectError> {
    let mut current = source;
    for (i, step) in steps.iter().enumerate() {
        if let Some(d) = step.input_dimensionality() {
            if d != current {
                return Err(ConnectError::ChainDimensionalityMismatch {
                    index: i,
                    next: i + 1,
                    from: current,
                    to: d,
                });
            }
        }
        if let Some(d) = step.output_dimensionality() {
            current = d;
        }
    }
    if current == target {
        return Ok(false);
    }
    if current == 0 {
        return Ok(true);
    }
    Err(ConnectError::ChainDimensionalityMismatch {
        index: steps.len(),
        next: steps.len() + 1,
        from: current,
        to: target,
    })
}

/// Propagate sizes forward from `source` and backward from `target` until
/// every step is resolved or no more progress is possible.
fn resolve_sizes(
    steps: &mut [ProcessingStep],
    source: &[usize],
    target: &[usize],
) -> Result<(), ConnectError> {
    let n = steps.len();
    if n == 0 {
        return Ok(());
    }
    steps[0].set_input_dimension_sizes(source)?;
    steps[n - 1].set_output_dimension_sizes(target)?;

    let cap = 2 * (n + 1);
    for _ in 0..cap {
        let mut progressed = false;

        for i in 0..n {
            if steps[i].output_dimension_sizes().is_none() && steps[i].determine_output_dimension_sizes() {
                progressed = true;
            }
            if i + 1 < n && steps[i + 1].input_dimension_sizes().is_none() {
                if let Some(sizes) = steps[i].output_dimension_sizes().map(<[usize]>::to_vec) {
                    steps[i + 1].set_input_dimension_sizes(&sizes)?;
                    progressed = true;
                }
            }
        }

        for i in (0..n).rev() {
            if steps[i].input_dimension_sizes().is_none() && steps[i].determine_input_dimension_sizes() {
                progressed = true;
            }
            if i > 0 && steps[i - 1].output_dimension_sizes().is_none() {
                if let Some(sizes) = steps[i].input_dimension_sizes().map(<[usize]>::to_vec) {
                    steps[i - 1].set_output_dimension_sizes(&sizes)?;
                    progressed = true;
                }
            }
        }

        if steps.iter().all(ProcessingStep::is_resolved) || !progressed {
            break;
        }
    }

    if !steps.iter().all(ProcessingStep::is_resolved) {
        return Err(ConnectError::UnderDetermined);
    }

    let mut previous = source.to_vec();
    for step in steps.iter() {
        let input = step.input_dimension_sizes().unwrap_or_default();
        if input != previous.as_slice() {
            return Err(ConnectError::ShapeMismatch {
                from: previous,
                to: input.to_vec(),
            });
        }
        previous = step.output_dimension_sizes().unwrap_or_default().to_vec();
    }
    if previous.as_slice() != target {
        return Err(ConnectError::ShapeMismatch {
            from: previous,
            to: target.to_vec(),
        });
    }
    Ok(())
}
