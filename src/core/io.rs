//! Minimal sensor and actuator endpoints.
//!
//! `Stimulus` is a source whose output is written from outside the graph.
//! `Probe` is a sink that records the single input it receives each tick.

use std::collections::VecDeque;

use ndarray::{ArrayD, IxDyn};

use crate::connectable::Connectable;
use crate::error::ConnectError;
use crate::prng::Prng;

/// Sensor-like source. The output only changes through [`Stimulus::set`].
#[derive(Debug, Clone)]
pub struct Stimulus {
    label: String,
    sizes: Vec<usize>,
    output: ArrayD<f64>,
}

impl Stimulus {
    pub fn new(label: impl Into<String>, sizes: &[usize]) -> Self {
        Self {
            label: label.into(),
            sizes: sizes.to_vec(),
            output: ArrayD::zeros(IxDyn(sizes)),
        }
    }

    pub fn set(&mut self, values: ArrayD<f64>) -> Result<(), ConnectError> {
        if values.shape() != self.sizes.as_slice() {
            return Err(ConnectError::ShapeMismatch {
                from: values.shape().to_vec(),
                to: self.sizes.clone(),
            });
        }
        self.output = values;
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        self.output.fill(value);
    }
}

impl Connectable for Stimulus {
    fn label(&self) -> &str {
        &self.label
    }

    fn input_dimension_sizes(&self) -> Option<&[usize]> {
        None
    }

    fn output_dimension_sizes(&self) -> Option<&[usize]> {
        Some(&self.sizes)
    }

    fn output(&self) -> &ArrayD<f64> {
        &self.output
    }

    fn step(&mut self, _inputs: &[ArrayD<f64>], _rng: &mut Prng) {}
}

/// Actuator-like sink. Keeps the most recent `capacity` inputs.
#[derive(Debug, Clone)]
pub struct Probe {
    label: String,
    sizes: Vec<usize>,
    capacity: usize,
    history: VecDeque<ArrayD<f64>>,
    inert: ArrayD<f64>,
}

impl Probe {
    pub fn new(label: impl Into<String>, sizes: &[usize]) -> Self {
        Self::with_capacity(label, sizes, 1)
    }

    pub fn with_capacity(label: impl Into<String>, sizes: &[usize], capacity: usize) -> Self {
        Self {
            label: label.into(),
            sizes: sizes.to_vec(),
            capacity: capacity.max(1),
            history: VecDeque::new(),
            inert: ArrayD::zeros(IxDyn(&[])),
        }
    }

    pub fn latest(&self) -> Option<&ArrayD<f64>> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &ArrayD<f64>> {
        self.history.iter()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl Connectable for Probe {
    fn label(&self) -> &str {
        &self.label
    }

    fn input_dimension_sizes(&self) -> Option<&[usize]> {
        Some(&self.sizes)
    }

    fn output_dimension_sizes(&self) -> Option<&[usize]> {
        None
    }

    fn output(&self) -> &ArrayD<f64> {
        &self.inert
    }

    /// # Panics
    ///
    /// If the probe has more than one incoming edge or the input has the
    /// wrong shape.
    fn step(&mut self, inputs: &[ArrayD<f64>], _rng: &mut Prng) {
        assert!(inputs.len() <= 1, "probe '{}' takes exactly one input", self.label);
        let Some(input) = inputs.first() else {
            return;
        };
        assert_eq!(input.shape(), self.sizes.as_slice(), "probe '{}' input shape", self.label);
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(input.clone());
    }

    fn release(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::DynamicField;
    use crate::graph::Graph;
    use crate::steps::{Projection, Weight};

    #[test]
    fn stimulus_drives_a_field_through_the_graph() {
        let mut g = Graph::with_seed(2);
        let s = g.add_external(Stimulus::new("hue", &[10]));
        let mut f = DynamicField::new(&[10]).with_label("hue_field");
        f.set_noise_strength(0.0);
        let f = g.add_field(f);
        g.connect(s, f, vec![Weight::new(1.0).into()]).unwrap();

        let mut pattern = ArrayD::zeros(IxDyn(&[10]));
        pattern[[3]] = 8.0;
        g.external_mut::<Stimulus>(s).unwrap().set(pattern).unwrap();
        g.run(200);

        let out = g.output(f).unwrap();
        assert!(out[[3]] > 0.9);
        assert!(out[[7]] < 0.1);
    }

    #[test]
    fn stimulus_rejects_wrong_shape() {
        let mut s = Stimulus::new("s", &[3]);
        assert!(s.set(ArrayD::zeros(IxDyn(&[4]))).is_err());
    }

    #[test]
    fn probe_records_peak_readout() {
        let mut g = Graph::with_seed(2);
        let s = g.add_external(Stimulus::new("s", &[4, 4]));
        let p = g.add_external(Probe::with_capacity("p", &[], 3));
        g.connect(s, p, vec![Projection::to_scalar(2).into()]).unwrap();

        let mut frame = ArrayD::zeros(IxDyn(&[4, 4]));
        frame[[2, 1]] = 0.6;
        g.external_mut::<Stimulus>(s).unwrap().set(frame).unwrap();
        g.run(5);

        let probe = g.external::<Probe>(p).unwrap();
        assert_eq!(probe.history().count(), 3);
        assert_eq!(probe.latest().unwrap()[IxDyn(&[])], 0.6);
        assert_eq!(probe.output().ndim(), 0);
    }
}
