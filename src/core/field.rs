//! Dynamic neural fields.
//!
//! A field is an N-D activation array relaxing under
//!
//! ```text
//! tau * du/dt = -h*u + resting + boost - g*mean(s(u)) + (k * s(u)) + sum(inputs) + noise
//! ```
//!
//! integrated with one Euler step (step size 1) per tick. A 0-D field is a
//! "node" and follows the same law with a scalar state.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn};
use tracing::{debug, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::connectable::Connectable;
use crate::error::ConnectError;
use crate::kernel::{convolve, Boundary, Kernel};
use crate::math::sigmoid_array;
use crate::prng::Prng;

/// Scalar dynamics parameters of a field.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FieldParams {
    pub resting_level: f64,
    pub relaxation_time: f64,
    /// Gain `h` of the `-h*u` decay term.
    pub normalization: f64,
    pub global_inhibition: f64,
    pub noise_strength: f64,
    pub noise_std: f64,
    pub steepness: f64,
    pub shift: f64,
    pub boundary: Boundary,
}

impl Default for FieldParams {
    fn default() -> Self {
        Self {
            resting_level: -5.0,
            relaxation_time: 20.0,
            normalization: 1.0,
            global_inhibition: 0.0,
            noise_strength: 0.05,
            noise_std: 1.0,
            steepness: 5.0,
            shift: 0.0,
            boundary: Boundary::Wrap,
        }
    }
}

/// Constant input added to a field every tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Boost {
    Uniform(f64),
    /// Must have the field's shape.
    Pattern(ArrayD<f64>),
}

impl Default for Boost {
    fn default() -> Self {
        Boost::Uniform(0.0)
    }
}

impl From<f64> for Boost {
    fn from(v: f64) -> Self {
        Boost::Uniform(v)
    }
}

impl From<ArrayD<f64>> for Boost {
    fn from(v: ArrayD<f64>) -> Self {
        Boost::Pattern(v)
    }
}

struct ActivationLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ActivationLog {
    fn write_row(&mut self, activation: &ArrayD<f64>) -> io::Result<()> {
        let mut first = true;
        for v in activation.iter() {
            if !first {
                self.writer.write_all(b", ")?;
            }
            write!(self.writer, "{v}")?;
            first = false;
        }
        self.writer.write_all(b"\n")
    }
}

pub struct DynamicField {
    label: String,
    sizes: Vec<usize>,
    params: FieldParams,
    boost: Boost,
    kernel: Option<Kernel>,

    activation: ArrayD<f64>,
    output: ArrayD<f64>,

    log: Option<ActivationLog>,
}

impl DynamicField {
    /// Field over `sizes` with default parameters. `sizes` may be empty for
    /// a 0-D node.
    pub fn new(sizes: &[usize]) -> Self {
        Self::with_params(sizes, FieldParams::default())
    }

    /// 0-D field.
    pub fn node() -> Self {
        Self::new(&[])
    }

    pub fn with_params(sizes: &[usize], params: FieldParams) -> Self {
        let activation = ArrayD::from_elem(IxDyn(sizes), params.resting_level);
        let mut field = Self {
            label: String::new(),
            sizes: sizes.to_vec(),
            params,
            boost: Boost::default(),
            kernel: None,
            output: ArrayD::zeros(IxDyn(sizes)),
            activation,
            log: None,
        };
        field.refresh_output();
        field
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn dimensionality(&self) -> usize {
        self.sizes.len()
    }

    pub fn params(&self) -> &FieldParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut FieldParams {
        &mut self.params
    }

    pub fn set_resting_level(&mut self, level: f64) {
        self.params.resting_level = level;
    }

    pub fn set_relaxation_time(&mut self, tau: f64) {
        self.params.relaxation_time = tau;
    }

    pub fn set_global_inhibition(&mut self, g: f64) {
        self.params.global_inhibition = g;
    }

    pub fn set_noise_strength(&mut self, strength: f64) {
        self.params.noise_strength = strength;
    }

    pub fn set_boundary(&mut self, boundary: Boundary) {
        self.params.boundary = boundary;
    }

    pub fn boost(&self) -> &Boost {
        &self.boost
    }

    /// Set a uniform boost or a boost pattern of the field's shape.
    pub fn set_boost(&mut self, boost: impl Into<Boost>) -> Result<(), ConnectError> {
        let boost = boost.into();
        if let Boost::Pattern(p) = &boost {
            if p.shape() != self.sizes.as_slice() {
                return Err(ConnectError::ShapeMismatch {
                    from: p.shape().to_vec(),
                    to: self.sizes.clone(),
                });
            }
        }
        self.boost = boost;
        Ok(())
    }

    pub fn kernel(&self) -> Option<&Kernel> {
        self.kernel.as_ref()
    }

    /// Install a lateral interaction kernel. A Gauss kernel must match the
    /// field's dimensionality and cannot sit on a 0-D node; a box kernel fits
    /// any field.
    pub fn set_kernel(&mut self, kernel: impl Into<Kernel>) -> Result<(), ConnectError> {
        let kernel = kernel.into();
        if kernel.dimensionality() == Some(0) {
            return Err(ConnectError::ScalarGaussKernel);
        }
        if let Some(d) = kernel.dimensionality() {
            if d != self.sizes.len() {
                return Err(ConnectError::KernelDimensionMismatch {
                    expected: self.sizes.len(),
                    got: d,
                });
            }
        }
        self.kernel = Some(kernel);
        Ok(())
    }

    pub fn clear_kernel(&mut self) {
        self.kernel = None;
    }

    pub fn activation(&self) -> &ArrayD<f64> {
        &self.activation
    }

    /// Reset every site to `value` and refresh the output.
    pub fn set_initial_activation(&mut self, value: f64) {
        self.activation.fill(value);
        self.refresh_output();
    }

    /// Overwrite the activation array, as sensor-driven fields do.
    pub fn set_activation(&mut self, activation: ArrayD<f64>) -> Result<(), ConnectError> {
        if activation.shape() != self.sizes.as_slice() {
            return Err(ConnectError::ShapeMismatch {
                from: activation.shape().to_vec(),
                to: self.sizes.clone(),
            });
        }
        self.activation = activation;
        self.refresh_output();
        Ok(())
    }

    /// Sigmoid of an arbitrary activation under this field's steepness and shift.
    pub fn sigmoid_of(&self, activation: &ArrayD<f64>) -> ArrayD<f64> {
        sigmoid_array(activation, self.params.steepness, self.params.shift)
    }

    /// Noise-free rate of change `du` for `activation` given `inputs`.
    /// Does not touch the field's state.
    ///
    /// # Panics
    ///
    /// If an input's shape differs from the field's shape.
    pub fn change_for(&self, activation: &ArrayD<f64>, inputs: &[ArrayD<f64>]) -> ArrayD<f64> {
        let p = &self.params;
        let output = self.sigmoid_of(activation);

        let mut drive = activation * -p.normalization;
        drive += p.resting_level;
        match &self.boost {
            Boost::Uniform(b) => drive += *b,
            Boost::Pattern(b) => drive += b,
        }

        if p.global_inhibition != 0.0 {
            let mean = output.mean().unwrap_or(0.0);
            drive -= p.global_inhibition * mean;
        }

        if let Some(kernel) = &self.kernel {
            drive += &convolve(&output, kernel, p.boundary);
        }

        for input in inputs {
            assert_eq!(
                input.shape(),
                self.sizes.as_slice(),
                "input shape does not match field '{}'",
                self.label
            );
            drive += input;
        }

        drive / p.relaxation_time
    }

    fn refresh_output(&mut self) {
        self.output = self.sigmoid_of(&self.activation);
    }

    /// Start appending each tick's activation to `path`.
    pub fn start_activation_log(&mut self, path: impl AsRef<Path>) -> io::Result<()> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(field = %self.label, path = %path.display(), "activation log started");
        self.log = Some(ActivationLog {
            path,
            writer: BufWriter::new(file),
        });
        Ok(())
    }

    /// Flush and close the activation log, if one is open.
    pub fn stop_activation_log(&mut self) {
        if let Some(mut log) = self.log.take() {
            if let Err(e) = log.writer.flush() {
                warn!(field = %self.label, path = %log.path.display(), error = %e, "activation log flush failed");
            }
        }
    }

    pub fn is_logging(&self) -> bool {
        self.log.is_some()
    }

    fn append_log(&mut self) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        if let Err(e) = log.write_row(&self.activation) {
            warn!(
                field = %self.label,
                path = %log.path.display(),
                error = %e,
                "activation log write failed; logging disabled"
            );
            self.log = None;
        }
    }
}

impl Connectable for DynamicField {
    fn label(&self) -> &str {
        &self.label
    }

    fn input_dimension_sizes(&self) -> Option<&[usize]> {
        Some(&self.sizes)
    }

    fn output_dimension_sizes(&self) -> Option<&[usize]> {
        Some(&self.sizes)
    }

    fn output(&self) -> &ArrayD<f64> {
        &self.output
    }

    /// # Panics
    ///
    /// If an input's shape differs from the field's shape.
    fn step(&mut self, inputs: &[ArrayD<f64>], rng: &mut Prng) {
        let mut du = self.change_for(&self.activation, inputs);

        let (strength, std, tau) = (
            self.params.noise_strength,
            self.params.noise_std,
            self.params.relaxation_time,
        );
        if strength != 0.0 {
            du.mapv_inplace(|v| v + strength * rng.next_normal(std) / tau);
        }

        self.activation += &du;
        self.refresh_output();
        self.append_log();
    }

    fn release(&mut self) {
        self.stop_activation_log();
    }
}

impl Drop for DynamicField {
    fn drop(&mut self) {
        self.stop_activation_log();
    }
}

impl std::fmt::Debug for DynamicField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicField")
            .field("label", &self.label)
            .field("sizes", &self.sizes)
            .field("params", &self.params)
            .field("kernel", &self.kernel)
            .field("logging", &self.log.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{BoxKernel, GaussKernel, KernelMode};
    use crate::math::gauss_1d;

    fn quiet(sizes: &[usize]) -> DynamicField {
        let mut f = DynamicField::new(sizes);
        f.set_noise_strength(0.0);
        f
    }

    fn temp_log(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("dynfield-{}-{}.log", name, std::process::id()));
        let _ = std::fs::remove_file(&p);
        p
    }

    #[test]
    fn resting_state_is_a_fixed_point() {
        let mut rng = Prng::new(3);
        let mut f = quiet(&[10]);
        for _ in 0..200 {
            f.step(&[], &mut rng);
        }
        assert!(f.activation().iter().all(|&u| (u + 5.0).abs() < 1e-6));
        assert!(f.output().iter().all(|&s| s < 1e-6));
    }

    #[test]
    fn node_relaxes_toward_input_plus_resting_level() {
        let mut rng = Prng::new(3);
        let mut n = quiet(&[]);
        let input = ArrayD::from_elem(IxDyn(&[]), 3.0);
        for _ in 0..400 {
            n.step(std::slice::from_ref(&input), &mut rng);
        }
        assert!((n.activation()[IxDyn(&[])] + 2.0).abs() < 1e-3);
    }

    #[test]
    fn output_is_cached_from_last_step() {
        let mut rng = Prng::new(3);
        let mut n = quiet(&[]);
        n.set_boost(10.0).unwrap();
        let before = n.output().clone();
        n.step(&[], &mut rng);
        assert!(n.output()[IxDyn(&[])] > before[IxDyn(&[])]);
        let cached = n.output().clone();
        assert_eq!(&cached, n.output());
    }

    #[test]
    fn self_excited_node_is_bistable() {
        let mut rng = Prng::new(5);
        let mut n = quiet(&[]);
        n.set_kernel(BoxKernel::new(5.0)).unwrap();
        // subthreshold drive alone leaves it off
        n.set_boost(3.0).unwrap();
        for _ in 0..300 {
            n.step(&[], &mut rng);
        }
        assert!(n.output()[IxDyn(&[])] < 0.1);
        // a transient push switches it on
        n.set_boost(8.0).unwrap();
        for _ in 0..300 {
            n.step(&[], &mut rng);
        }
        assert!(n.output()[IxDyn(&[])] > 0.9);
        // and the on-state survives the return to subthreshold drive
        n.set_boost(3.0).unwrap();
        for _ in 0..300 {
            n.step(&[], &mut rng);
        }
        assert!(n.output()[IxDyn(&[])] > 0.9);
    }

    #[test]
    fn localized_input_forms_a_peak() {
        let mut rng = Prng::new(5);
        let mut f = DynamicField::new(&[40]);
        let mode = KernelMode {
            amplitude: 2.5,
            widths: vec![1.5],
            shifts: vec![0.0],
        };
        f.set_kernel(GaussKernel::from_modes(1, &[mode]).unwrap())
            .unwrap();
        let input = gauss_1d(40, 7.0, 2.0, 25.0).into_dyn();
        for _ in 0..400 {
            f.step(std::slice::from_ref(&input), &mut rng);
        }
        let out = f.output();
        assert!(out[[25]] > 0.9);
        assert!(out[[5]] < 0.1);
    }

    #[test]
    fn boost_pattern_must_match_shape() {
        let mut f = quiet(&[4]);
        assert!(f.set_boost(ArrayD::zeros(IxDyn(&[5]))).is_err());
        assert!(f.set_boost(ArrayD::zeros(IxDyn(&[4]))).is_ok());
    }

    #[test]
    fn gauss_kernel_must_match_dimensionality() {
        let mut f = quiet(&[4, 4]);
        assert_eq!(
            f.set_kernel(GaussKernel::new(1)).unwrap_err(),
            ConnectError::KernelDimensionMismatch { expected: 2, got: 1 }
        );
        assert!(f.set_kernel(BoxKernel::new(1.0)).is_ok());
    }

    #[test]
    fn node_rejects_a_gauss_kernel() {
        let mut n = quiet(&[]);
        let mut k = GaussKernel::new(0);
        k.add_mode(3.0, &[], &[]).unwrap();
        assert_eq!(n.set_kernel(k).unwrap_err(), ConnectError::ScalarGaussKernel);
        assert!(n.kernel().is_none());
        assert!(n.set_kernel(BoxKernel::new(3.0)).is_ok());
    }

    #[test]
    #[should_panic(expected = "input shape does not match")]
    fn mismatched_input_panics() {
        let mut rng = Prng::new(1);
        let mut f = quiet(&[4]);
        f.step(&[ArrayD::zeros(IxDyn(&[5]))], &mut rng);
    }

    #[test]
    fn change_for_leaves_state_untouched() {
        let f = quiet(&[3]);
        let u = ArrayD::from_elem(IxDyn(&[3]), -1.0);
        let du = f.change_for(&u, &[]);
        // (-(-1) - 5) / 20
        assert!(du.iter().all(|&v| (v + 0.2).abs() < 1e-9));
        assert!(f.activation().iter().all(|&v| v == -5.0));
    }

    #[test]
    fn activation_log_writes_one_row_per_step() {
        let path = temp_log("rows");
        let mut rng = Prng::new(1);
        let mut f = quiet(&[3]);
        f.start_activation_log(&path).unwrap();
        f.step(&[], &mut rng);
        f.step(&[], &mut rng);
        f.stop_activation_log();
        assert!(!f.is_logging());

        let text = std::fs::read_to_string(&path).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], "-5, -5, -5");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn release_closes_the_log() {
        let path = temp_log("release");
        let mut f = quiet(&[]);
        f.start_activation_log(&path).unwrap();
        f.release();
        f.release();
        assert!(!f.is_logging());
        let _ = std::fs::remove_file(&path);
    }
}
