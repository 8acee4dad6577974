use ndarray::ArrayD;

use crate::prng::Prng;

/// A node or edge endpoint in the field graph.
///
/// Every Connectable exposes one output buffer and declares its input and
/// output shapes. Adjacency is stored by the owning [`Graph`](crate::graph::Graph),
/// which hands each Connectable the buffered outputs of its incoming edges when
/// it is stepped.
///
/// External collaborators (sensors, actuators) implement this trait:
///
/// - a sensor declares output sizes and refreshes its output in `step`;
/// - an actuator declares input sizes, consumes exactly one input in `step`,
///   and leaves `output_dimension_sizes` as `None`, exposing only an inert
///   buffer from `output`.
pub trait Connectable {
    fn label(&self) -> &str {
        ""
    }

    fn input_dimensionality(&self) -> Option<usize> {
        self.input_dimension_sizes().map(|s| s.len())
    }

    fn output_dimensionality(&self) -> Option<usize> {
        self.output_dimension_sizes().map(|s| s.len())
    }

    fn input_dimension_sizes(&self) -> Option<&[usize]>;

    fn output_dimension_sizes(&self) -> Option<&[usize]>;

    /// Output computed by the last `step`. Never recomputed on read.
    fn output(&self) -> &ArrayD<f64>;

    /// Advance one tick. `inputs` holds the outputs of the incoming edges in
    /// wiring order.
    fn step(&mut self, inputs: &[ArrayD<f64>], rng: &mut Prng);

    /// Release held resources (hardware handles, open logs). Called once at
    /// teardown; implementations must tolerate being called again.
    fn release(&mut self) {}
}
