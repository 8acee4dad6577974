//! Elementary behaviors: the intention / condition-of-satisfaction motif.
//!
//! ```text
//! intention_node --[expand, tuning weight]--> intention_field
//! intention_node --[weight]--> cos_node
//! cos_field      --[compress to max, weight]--> cos_node
//! cos_node       --[weight]--> cos_memory_node
//! cos_memory_node (cos_node if reactivating) --[negative weight]--> intention_node
//! ```
//!
//! The intention node is self-excitatory, so once the task drives it on it
//! stays on until the CoS memory (or the CoS node itself, for a reactivating
//! behavior) shuts it down.

pub mod sequencing;

use ndarray::ArrayD;
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::connectable::Connectable;
use crate::error::ConnectError;
use crate::field::{DynamicField, FieldParams};
use crate::graph::{Connection, Graph, NodeId};
use crate::kernel::{BoxKernel, GaussKernel};
use crate::steps::{Projection, Weight, WeightPattern};

/// Output level above which a node counts as "on".
pub const ACTIVE_THRESHOLD: f64 = 0.5;

/// Interaction strengths of one elementary behavior.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BehaviorConfig {
    pub intention_to_cos_node: f64,
    pub intention_field_to_cos_field: f64,
    pub cos_field_to_cos_node: f64,
    pub cos_node_to_cos_memory: f64,
    /// Must be negative.
    pub intention_inhibition: f64,
    pub intention_self_excitation: f64,
    pub cos_memory_self_excitation: f64,
    /// Single-mode Gauss kernel installed on internally created fields.
    pub field_kernel_amplitude: f64,
    pub field_kernel_width: f64,
    pub node_params: FieldParams,
    pub field_params: FieldParams,
    pub reactivating: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            intention_to_cos_node: 3.0,
            intention_field_to_cos_field: 3.5,
            cos_field_to_cos_node: 4.0,
            cos_node_to_cos_memory: 4.0,
            intention_inhibition: -6.0,
            intention_self_excitation: 5.0,
            cos_memory_self_excitation: 5.0,
            field_kernel_amplitude: 2.5,
            field_kernel_width: 1.5,
            node_params: FieldParams::default(),
            field_params: FieldParams::default(),
            reactivating: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElementaryBehavior {
    label: String,

    intention_node: NodeId,
    intention_field: NodeId,
    cos_node: NodeId,
    cos_field: NodeId,
    cos_memory_node: NodeId,

    connections: Vec<Connection>,
    reactivating: bool,
    step_fields: bool,
}

impl ElementaryBehavior {
    /// Build the three nodes of a behavior around existing fields.
    ///
    /// The fields may be shared with other behaviors or driven by sensors, so
    /// [`step`](Self::step) leaves them alone until
    /// [`set_step_fields`](Self::set_step_fields) designates this behavior as
    /// their owner. `intention_weight` is the tuning pattern written into the
    /// intention field; it must be a scalar or match the field's shape.
    pub fn new(
        graph: &mut Graph,
        label: impl Into<String>,
        intention_field: NodeId,
        cos_field: NodeId,
        intention_weight: impl Into<WeightPattern>,
        config: &BehaviorConfig,
    ) -> Result<Self, ConnectError> {
        let label = label.into();
        let intention_dim = graph.connectable(intention_field)?.input_dimensionality().ok_or(
            ConnectError::UnknownShape { side: "intention field input" },
        )?;
        let cos_dim = graph
            .connectable(cos_field)?
            .output_dimensionality()
            .ok_or(ConnectError::UnknownShape { side: "cos field output" })?;

        let mut intention = DynamicField::with_params(&[], config.node_params.clone())
            .with_label(format!("{label}.intention"));
        intention.set_kernel(BoxKernel::new(config.intention_self_excitation))?;
        let cos = DynamicField::with_params(&[], config.node_params.clone())
            .with_label(format!("{label}.cos"));
        let mut memory = DynamicField::with_params(&[], config.node_params.clone())
            .with_label(format!("{label}.cos_memory"));
        memory.set_kernel(BoxKernel::new(config.cos_memory_self_excitation))?;

        let intention_node = graph.add_field(intention);
        let cos_node = graph.add_field(cos);
        let cos_memory_node = graph.add_field(memory);

        let mut connections = Vec::with_capacity(5);
        connections.push(graph.connect(
            intention_node,
            intention_field,
            vec![
                Projection::from_scalar(intention_dim)?.into(),
                Weight::new(intention_weight).into(),
            ],
        )?);
        connections.push(graph.connect(
            intention_node,
            cos_node,
            vec![Weight::new(config.intention_to_cos_node).into()],
        )?);
        connections.push(graph.connect(
            cos_field,
            cos_node,
            vec![
                Projection::to_scalar(cos_dim).into(),
                Weight::new(config.cos_field_to_cos_node).into(),
            ],
        )?);
        connections.push(graph.connect(
            cos_node,
            cos_memory_node,
            vec![Weight::new(config.cos_node_to_cos_memory).into()],
        )?);

        let inhibitor = if config.reactivating {
            cos_node
        } else {
            cos_memory_node
        };
        connections.push(graph.connect(
            inhibitor,
            intention_node,
            vec![Weight::new(config.intention_inhibition).into()],
        )?);

        debug!(behavior = %label, reactivating = config.reactivating, "elementary behavior wired");

        Ok(Self {
            label,
            intention_node,
            intention_field,
            cos_node,
            cos_field,
            cos_memory_node,
            connections,
            reactivating: config.reactivating,
            step_fields: false,
        })
    }

    /// Build a behavior that owns private intention and CoS fields of
    /// `sizes`, the intention field feeding the CoS field directly.
    pub fn with_internal_fields(
        graph: &mut Graph,
        label: impl Into<String>,
        sizes: &[usize],
        intention_weight: impl Into<WeightPattern>,
        config: &BehaviorConfig,
    ) -> Result<Self, ConnectError> {
        let label = label.into();

        let intention_field = graph.add_field(internal_field(
            sizes,
            config,
            format!("{label}.intention_field"),
        )?);
        let cos_field = graph.add_field(internal_field(sizes, config, format!("{label}.cos_field"))?);
        let link = graph.connect(
            intention_field,
            cos_field,
            vec![Weight::new(config.intention_field_to_cos_field).into()],
        )?;

        let mut behavior = Self::new(
            graph,
            label,
            intention_field,
            cos_field,
            intention_weight,
            config,
        )?;
        behavior.connections.push(link);
        behavior.step_fields = true;
        Ok(behavior)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn intention_node(&self) -> NodeId {
        self.intention_node
    }

    pub fn intention_field(&self) -> NodeId {
        self.intention_field
    }

    pub fn cos_node(&self) -> NodeId {
        self.cos_node
    }

    pub fn cos_field(&self) -> NodeId {
        self.cos_field
    }

    pub fn cos_memory_node(&self) -> NodeId {
        self.cos_memory_node
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn is_reactivating(&self) -> bool {
        self.reactivating
    }

    pub fn steps_fields(&self) -> bool {
        self.step_fields
    }

    pub fn set_step_fields(&mut self, step_fields: bool) {
        self.step_fields = step_fields;
    }

    /// Advance this behavior's nodes (and its fields, if it owns them) in
    /// dependency order. For curated loops that do not call `Graph::step`.
    pub fn step(&self, graph: &mut Graph) {
        graph.step_node(self.intention_node);
        if self.step_fields {
            graph.step_node(self.intention_field);
            graph.step_node(self.cos_field);
        }
        graph.step_node(self.cos_node);
        graph.step_node(self.cos_memory_node);
    }

    pub fn is_active(&self, graph: &Graph) -> bool {
        node_level(graph, self.intention_node) > ACTIVE_THRESHOLD
    }

    pub fn is_satisfied(&self, graph: &Graph) -> bool {
        node_level(graph, self.cos_node) > ACTIVE_THRESHOLD
    }

    pub fn is_complete(&self, graph: &Graph) -> bool {
        node_level(graph, self.cos_memory_node) > ACTIVE_THRESHOLD
    }
}

/// Output of a 0-D node, or 0 if `id` is not a 0-D node.
pub fn node_level(graph: &Graph, id: NodeId) -> f64 {
    graph
        .output(id)
        .ok()
        .filter(|o| o.ndim() == 0)
        .and_then(|o| o.first().copied())
        .unwrap_or(0.0)
}

fn internal_field(
    sizes: &[usize],
    config: &BehaviorConfig,
    label: String,
) -> Result<DynamicField, ConnectError> {
    let mut field = DynamicField::with_params(sizes, config.field_params.clone()).with_label(label);
    if !sizes.is_empty() {
        let mut kernel = GaussKernel::new(sizes.len());
        kernel.add_mode(
            config.field_kernel_amplitude,
            &vec![config.field_kernel_width; sizes.len()],
            &vec![0.0; sizes.len()],
        )?;
        field.set_kernel(kernel)?;
    }
    Ok(field)
}

/// Tuning pattern for an intention field: a Gaussian bump of `amplitude`
/// centered on `center` with `width` along every dimension.
pub fn tuning(sizes: &[usize], amplitude: f64, width: f64, center: &[f64]) -> ArrayD<f64> {
    crate::math::gauss_nd(sizes, amplitude, &vec![width; sizes.len()], center)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    fn quiet_config() -> BehaviorConfig {
        let mut config = BehaviorConfig::default();
        config.node_params.noise_strength = 0.0;
        config.field_params.noise_strength = 0.0;
        config
    }

    fn task(graph: &mut Graph) -> NodeId {
        let t = graph.add_node("task");
        let f = graph.field_mut(t).unwrap();
        f.set_noise_strength(0.0);
        f.set_boost(10.0).unwrap();
        t
    }

    fn drive(graph: &mut Graph, task: NodeId, eb: &ElementaryBehavior, ticks: usize) {
        for _ in 0..ticks {
            graph.step_node(task);
            eb.step(graph);
        }
    }

    #[test]
    fn wiring_has_the_documented_shape() {
        let mut g = Graph::with_seed(1);
        let config = quiet_config();
        let eb = ElementaryBehavior::with_internal_fields(
            &mut g,
            "find",
            &[30],
            tuning(&[30], 7.0, 2.0, &[10.0]),
            &config,
        )
        .unwrap();

        assert!(eb.steps_fields());
        // 3 nodes, 2 fields, 8 processing steps
        assert_eq!(g.len(), 13);
        let steps = g.node_ids().filter(|&id| matches!(g.node(id), Some(Node::Step(_)))).count();
        assert_eq!(steps, 8);
        assert_eq!(g.incoming(eb.intention_node()).len(), 1);
        assert_eq!(g.incoming(eb.cos_node()).len(), 2);
        assert_eq!(g.field(eb.cos_field()).unwrap().sizes(), &[30]);
    }

    #[test]
    fn external_fields_are_not_stepped_until_owned() {
        let mut g = Graph::with_seed(1);
        let config = quiet_config();
        let field = g.add_field(DynamicField::new(&[8]).with_label("shared"));
        let mut eb = ElementaryBehavior::new(&mut g, "eb", field, field, 4.0, &config).unwrap();
        assert!(!eb.steps_fields());

        let before = g.field(field).unwrap().activation().clone();
        eb.step(&mut g);
        assert_eq!(g.field(field).unwrap().activation(), &before);

        eb.set_step_fields(true);
        g.field_mut(field).unwrap().set_boost(3.0).unwrap();
        eb.step(&mut g);
        assert_ne!(g.field(field).unwrap().activation(), &before);
    }

    #[test]
    fn behavior_turns_on_and_completes_when_cos_is_seen() {
        let mut g = Graph::with_seed(1);
        let config = quiet_config();
        let t = task(&mut g);
        let eb = ElementaryBehavior::with_internal_fields(
            &mut g,
            "reach",
            &[30],
            tuning(&[30], 7.0, 2.0, &[15.0]),
            &config,
        )
        .unwrap();
        sequencing::connect_to_task(&mut g, t, &eb).unwrap();

        drive(&mut g, t, &eb, 300);
        assert!(eb.is_active(&g));
        assert!(!eb.is_complete(&g));
        // the intention field carries a peak at the tuned location
        let out = g.output(eb.intention_field()).unwrap();
        assert!(out[[15]] > 0.9 && out[[2]] < 0.1);

        g.field_mut(eb.cos_field()).unwrap().set_boost(3.0).unwrap();
        drive(&mut g, t, &eb, 400);
        assert!(eb.is_complete(&g));
        assert!(!eb.is_active(&g));
    }

    /// Runs a behavior to steady state, boosts its CoS field for 400 ticks,
    /// then removes the boost. Returns the lowest intention level seen while
    /// boosted and the behavior after a further 300 ticks.
    fn boost_cos_then_release(reactivating: bool) -> (f64, Graph, ElementaryBehavior) {
        let mut g = Graph::with_seed(1);
        let mut config = quiet_config();
        config.reactivating = reactivating;
        let t = task(&mut g);
        let eb = ElementaryBehavior::with_internal_fields(
            &mut g,
            "hold",
            &[20],
            tuning(&[20], 7.0, 2.0, &[10.0]),
            &config,
        )
        .unwrap();
        sequencing::connect_to_task(&mut g, t, &eb).unwrap();

        drive(&mut g, t, &eb, 300);
        assert!(eb.is_active(&g));

        g.field_mut(eb.cos_field()).unwrap().set_boost(6.0).unwrap();
        let mut lowest = f64::INFINITY;
        for _ in 0..400 {
            drive(&mut g, t, &eb, 1);
            lowest = lowest.min(node_level(&g, eb.intention_node()));
        }

        g.field_mut(eb.cos_field()).unwrap().set_boost(0.0).unwrap();
        drive(&mut g, t, &eb, 300);
        (lowest, g, eb)
    }

    #[test]
    fn reactivating_behavior_restarts_when_cos_is_lost() {
        let (lowest, mut g, eb) = boost_cos_then_release(true);
        assert!(eb.is_reactivating());
        // the cos node inhibits the intention directly
        let inhibitor = g
            .connections()
            .iter()
            .find(|c| c.target == eb.intention_node() && c.source == eb.cos_node());
        assert!(inhibitor.is_some());

        assert!(lowest < ACTIVE_THRESHOLD, "lowest intention = {lowest}");
        let t = g.find("task").unwrap();
        for tick in 0..200 {
            assert!(eb.is_active(&g), "intention off again at tick {tick}");
            assert!(!eb.is_satisfied(&g));
            drive(&mut g, t, &eb, 1);
        }
    }

    #[test]
    fn completed_behavior_stays_off_when_cos_is_lost() {
        let (lowest, mut g, eb) = boost_cos_then_release(false);
        assert!(lowest < ACTIVE_THRESHOLD);
        let t = g.find("task").unwrap();
        drive(&mut g, t, &eb, 200);
        assert!(!eb.is_active(&g));
        assert!(eb.is_complete(&g));
    }
}
