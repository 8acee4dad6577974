//! Processing steps: stateless-per-tick transforms placed on a connection
//! between a source and a target.
//!
//! Each step knows how to infer missing dimension sizes from its neighbors;
//! `Graph::connect` drives that inference in both directions.

use ndarray::{ArrayD, Axis, IxDyn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::connectable::Connectable;
use crate::error::ConnectError;
use crate::math::resample_linear;
use crate::prng::Prng;

/// Highest output dimensionality an expanding projection supports.
pub const MAX_EXPANSION_DIMENSIONALITY: usize = 3;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WeightPattern {
    Scalar(f64),
    /// Dense pattern; must match the upstream output shape.
    Dense(ArrayD<f64>),
}

impl From<f64> for WeightPattern {
    fn from(w: f64) -> Self {
        WeightPattern::Scalar(w)
    }
}

impl From<ArrayD<f64>> for WeightPattern {
    fn from(w: ArrayD<f64>) -> Self {
        WeightPattern::Dense(w)
    }
}

/// `output = input * weight`.
///
/// A dense pattern encodes a tuning curve, e.g. a Gaussian bump over a hue
/// axis meaning "intention to find this color".
#[derive(Debug, Clone)]
pub struct Weight {
    pattern: WeightPattern,
    sizes: Option<Vec<usize>>,
    output: ArrayD<f64>,
}

impl Weight {
    pub fn new(pattern: impl Into<WeightPattern>) -> Self {
        let pattern = pattern.into();
        let sizes = match &pattern {
            WeightPattern::Scalar(_) => None,
            WeightPattern::Dense(a) => Some(a.shape().to_vec()),
        };
        Self {
            pattern,
            sizes,
            output: ArrayD::zeros(IxDyn(&[])),
        }
    }

    pub fn pattern(&self) -> &WeightPattern {
        &self.pattern
    }

    fn set_sizes(&mut self, sizes: &[usize]) -> Result<(), ConnectError> {
        match &self.sizes {
            Some(known) if known.as_slice() != sizes => Err(ConnectError::ShapeMismatch {
                from: sizes.to_vec(),
                to: known.clone(),
            }),
            _ => {
                self.sizes = Some(sizes.to_vec());
                Ok(())
            }
        }
    }

    fn apply(&mut self, input: &ArrayD<f64>) {
        self.output = match &self.pattern {
            WeightPattern::Scalar(w) => input * *w,
            WeightPattern::Dense(w) => {
                assert_eq!(
                    input.shape(),
                    w.shape(),
                    "weight pattern shape does not match its input"
                );
                input * w
            }
        };
    }
}

/// Maps `input_dimensions[k]` of the input onto `output_dimensions[k]` of
/// the output.
///
/// - compress: fewer mapped axes than the input has; every unmapped input
///   axis collapses by elementwise max, reading out a peak along the
///   retained axes;
/// - expand: fewer mapped axes than the output has; new axes are broadcast;
/// - otherwise a pure axis reorder.
#[derive(Debug, Clone)]
pub struct Projection {
    input_dimensionality: usize,
    output_dimensionality: usize,
    input_dimensions: Vec<usize>,
    output_dimensions: Vec<usize>,

    input_sizes: Option<Vec<usize>>,
    output_sizes: Option<Vec<usize>>,
    output: ArrayD<f64>,
}

impl Projection {
    pub fn new(
        input_dimensionality: usize,
        output_dimensionality: usize,
        input_dimensions: impl IntoIterator<Item = usize>,
        output_dimensions: impl IntoIterator<Item = usize>,
    ) -> Result<Self, ConnectError> {
        let input_dimensions: Vec<usize> = input_dimensions.into_iter().collect();
        let output_dimensions: Vec<usize> = output_dimensions.into_iter().collect();

        if input_dimensions.len() != output_dimensions.len() {
            return Err(ConnectError::IndexCountMismatch {
                inputs: input_dimensions.len(),
                outputs: output_dimensions.len(),
            });
        }
        check_indices(&input_dimensions, input_dimensionality)?;
        check_indices(&output_dimensions, output_dimensionality)?;

        let compressing = input_dimensions.len() < input_dimensionality;
        let expanding = output_dimensions.len() < output_dimensionality;
        if compressing && expanding {
            return Err(ConnectError::CompressAndExpand);
        }
        if expanding && output_dimensionality > MAX_EXPANSION_DIMENSIONALITY {
            return Err(ConnectError::UnsupportedProjection {
                from: input_dimensionality,
                to: output_dimensionality,
            });
        }

        Ok(Self {
            input_dimensionality,
            output_dimensionality,
            input_dimensions,
            output_dimensions,
            input_sizes: None,
            output_sizes: None,
            output: ArrayD::zeros(IxDyn(&[])),
        })
    }

    /// Collapse everything to a scalar holding the global maximum.
    pub fn to_scalar(input_dimensionality: usize) -> Self {
        Self {
            input_dimensionality,
            output_dimensionality: 0,
            input_dimensions: Vec::new(),
            output_dimensions: Vec::new(),
            input_sizes: None,
            output_sizes: None,
            output: ArrayD::zeros(IxDyn(&[])),
        }
    }

    /// Broadcast a scalar homogeneously over `output_dimensionality` axes.
    pub fn from_scalar(output_dimensionality: usize) -> Result<Self, ConnectError> {
        Self::new(0, output_dimensionality, [], [])
    }

    pub fn is_compressing(&self) -> bool {
        self.input_dimensions.len() < self.input_dimensionality
    }

    pub fn is_expanding(&self) -> bool {
        self.output_dimensions.len() < self.output_dimensionality
    }

    fn set_input_sizes(&mut self, sizes: &[usize]) -> Result<(), ConnectError> {
        if sizes.len() != self.input_dimensionality {
            return Err(ConnectError::DimensionalityMismatch {
                from: sizes.len(),
                to: self.input_dimensionality,
            });
        }
        if let Some(out) = &self.output_sizes {
            for (i, o) in self.input_dimensions.iter().zip(&self.output_dimensions) {
                if sizes[*i] != out[*o] {
                    return Err(ConnectError::ShapeMismatch {
                        from: sizes.to_vec(),
                        to: out.clone(),
                    });
                }
            }
        }
        self.input_sizes = Some(sizes.to_vec());
        Ok(())
    }

    fn set_output_sizes(&mut self, sizes: &[usize]) -> Result<(), ConnectError> {
        if sizes.len() != self.output_dimensionality {
            return Err(ConnectError::DimensionalityMismatch {
                from: self.output_dimensionality,
                to: sizes.len(),
            });
        }
        if let Some(inp) = &self.input_sizes {
            for (i, o) in self.input_dimensions.iter().zip(&self.output_dimensions) {
                if inp[*i] != sizes[*o] {
                    return Err(ConnectError::ShapeMismatch {
                        from: inp.clone(),
                        to: sizes.to_vec(),
                    });
                }
            }
        }
        self.output_sizes = Some(sizes.to_vec());
        Ok(())
    }

    // Output sizes follow from input sizes unless new axes are broadcast.
    fn determine_output_sizes(&mut self) -> bool {
        if self.output_sizes.is_some() {
            return true;
        }
        let Some(inp) = &self.input_sizes else {
            return false;
        };
        if self.is_expanding() {
            return false;
        }
        let mut out = vec![0; self.output_dimensionality];
        for (i, o) in self.input_dimensions.iter().zip(&self.output_dimensions) {
            out[*o] = inp[*i];
        }
        self.output_sizes = Some(out);
        true
    }

    // Input sizes follow from output sizes unless axes are collapsed.
    fn determine_input_sizes(&mut self) -> bool {
        if self.input_sizes.is_some() {
            return true;
        }
        let Some(out) = &self.output_sizes else {
            return false;
        };
        if self.is_compressing() {
            return false;
        }
        let mut inp = vec![0; self.input_dimensionality];
        for (i, o) in self.input_dimensions.iter().zip(&self.output_dimensions) {
            inp[*i] = out[*o];
        }
        self.input_sizes = Some(inp);
        true
    }

    /// Apply the projection to an array of the declared input dimensionality.
    pub fn project(&self, input: &ArrayD<f64>) -> ArrayD<f64> {
        if self.is_compressing() {
            self.compress(input)
        } else {
            self.place_axes(input)
        }
    }

    fn compress(&self, input: &ArrayD<f64>) -> ArrayD<f64> {
        let mut collapsed = input.to_owned();
        // Highest axis first so lower indices stay valid.
        for axis in (0..input.ndim()).rev() {
            if !self.input_dimensions.contains(&axis) {
                collapsed = collapsed.fold_axis(Axis(axis), f64::NEG_INFINITY, |&a, &b| a.max(b));
            }
        }

        let mut retained = self.input_dimensions.clone();
        retained.sort_unstable();

        let mut perm = vec![0; self.output_dimensionality];
        for (r, axis) in retained.iter().enumerate() {
            if let Some(k) = self.input_dimensions.iter().position(|d| d == axis) {
                perm[self.output_dimensions[k]] = r;
            }
        }
        collapsed.permuted_axes(perm).as_standard_layout().into_owned()
    }

    fn place_axes(&self, input: &ArrayD<f64>) -> ArrayD<f64> {
        // Order retained axes by their output position, then insert the new
        // axes where nothing maps.
        let mut order: Vec<usize> = (0..self.input_dimensions.len()).collect();
        order.sort_by_key(|&k| self.output_dimensions[k]);
        let perm: Vec<usize> = order.iter().map(|&k| self.input_dimensions[k]).collect();

        let mut view = input.view().permuted_axes(perm);
        for o in 0..self.output_dimensionality {
            if !self.output_dimensions.contains(&o) {
                view = view.insert_axis(Axis(o));
            }
        }

        let target = self
            .output_sizes
            .clone()
            .unwrap_or_else(|| view.shape().to_vec());
        match view.broadcast(IxDyn(&target)) {
            Some(b) => b.to_owned(),
            None => panic!(
                "projection cannot broadcast {:?} onto {:?}",
                view.shape(),
                target
            ),
        }
    }
}

fn check_indices(indices: &[usize], dimensionality: usize) -> Result<(), ConnectError> {
    for (n, &index) in indices.iter().enumerate() {
        if index >= dimensionality {
            return Err(ConnectError::DimensionOutOfRange {
                index,
                dimensionality,
            });
        }
        if indices[..n].contains(&index) {
            return Err(ConnectError::DuplicateDimension(index));
        }
    }
    Ok(())
}

/// Linear resampling between two grids of the same dimensionality.
///
/// Used when two connected fields represent the same quantity at different
/// resolutions. Both sizes normally come from the neighbors during
/// `Graph::connect`.
#[derive(Debug, Clone, Default)]
pub struct Scaler {
    input_sizes: Option<Vec<usize>>,
    output_sizes: Option<Vec<usize>>,
    output: ArrayD<f64>,
}

impl Scaler {
    pub fn new() -> Self {
        Self {
            input_sizes: None,
            output_sizes: None,
            output: ArrayD::zeros(IxDyn(&[])),
        }
    }

    /// Scaler with both grids fixed up front.
    pub fn between(input_sizes: &[usize], output_sizes: &[usize]) -> Result<Self, ConnectError> {
        if input_sizes.len() != output_sizes.len() {
            return Err(ConnectError::DimensionalityMismatch {
                from: input_sizes.len(),
                to: output_sizes.len(),
            });
        }
        Ok(Self {
            input_sizes: Some(input_sizes.to_vec()),
            output_sizes: Some(output_sizes.to_vec()),
            output: ArrayD::zeros(IxDyn(&[])),
        })
    }

    fn check_dimensionality(&self, sizes: &[usize], other: &Option<Vec<usize>>) -> Result<(), ConnectError> {
        match other {
            Some(o) if o.len() != sizes.len() => Err(ConnectError::DimensionalityMismatch {
                from: sizes.len(),
                to: o.len(),
            }),
            _ => Ok(()),
        }
    }
}

/// A processing step placed on a connection.
#[derive(Debug, Clone)]
pub enum ProcessingStep {
    Weight(Weight),
    Projection(Projection),
    Scaler(Scaler),
}

impl From<Weight> for ProcessingStep {
    fn from(w: Weight) -> Self {
        ProcessingStep::Weight(w)
    }
}

impl From<Projection> for ProcessingStep {
    fn from(p: Projection) -> Self {
        ProcessingStep::Projection(p)
    }
}

impl From<Scaler> for ProcessingStep {
    fn from(s: Scaler) -> Self {
        ProcessingStep::Scaler(s)
    }
}

impl ProcessingStep {
    pub fn as_projection(&self) -> Option<&Projection> {
        match self {
            ProcessingStep::Projection(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_scaler(&self) -> bool {
        matches!(self, ProcessingStep::Scaler(_))
    }

    pub fn set_input_dimension_sizes(&mut self, sizes: &[usize]) -> Result<(), ConnectError> {
        if let Some(known) = self.input_dimension_sizes() {
            if known != sizes {
                return Err(ConnectError::ShapeMismatch {
                    from: sizes.to_vec(),
                    to: known.to_vec(),
                });
            }
        }
        match self {
            ProcessingStep::Weight(w) => w.set_sizes(sizes),
            ProcessingStep::Projection(p) => p.set_input_sizes(sizes),
            ProcessingStep::Scaler(s) => {
                s.check_dimensionality(sizes, &s.output_sizes)?;
                s.input_sizes = Some(sizes.to_vec());
                Ok(())
            }
        }
    }

    pub fn set_output_dimension_sizes(&mut self, sizes: &[usize]) -> Result<(), ConnectError> {
        if let Some(known) = self.output_dimension_sizes() {
            if known != sizes {
                return Err(ConnectError::ShapeMismatch {
                    from: known.to_vec(),
                    to: sizes.to_vec(),
                });
            }
        }
        match self {
            ProcessingStep::Weight(w) => w.set_sizes(sizes),
            ProcessingStep::Projection(p) => p.set_output_sizes(sizes),
            ProcessingStep::Scaler(s) => {
                s.check_dimensionality(sizes, &s.input_sizes)?;
                s.output_sizes = Some(sizes.to_vec());
                Ok(())
            }
        }
    }

    /// Try to derive output sizes from what is known; returns whether the
    /// output sizes are known afterwards.
    pub fn determine_output_dimension_sizes(&mut self) -> bool {
        match self {
            ProcessingStep::Weight(w) => w.sizes.is_some(),
            ProcessingStep::Projection(p) => p.determine_output_sizes(),
            ProcessingStep::Scaler(s) => s.output_sizes.is_some(),
        }
    }

    /// Try to derive input sizes from what is known; returns whether the
    /// input sizes are known afterwards.
    pub fn determine_input_dimension_sizes(&mut self) -> bool {
        match self {
            ProcessingStep::Weight(w) => w.sizes.is_some(),
            ProcessingStep::Projection(p) => p.determine_input_sizes(),
            ProcessingStep::Scaler(s) => s.input_sizes.is_some(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.input_dimension_sizes().is_some() && self.output_dimension_sizes().is_some()
    }

    /// Allocate the output buffer once sizes are resolved.
    pub(crate) fn allocate_output(&mut self) {
        let sizes = self.output_dimension_sizes().map(|s| s.to_vec()).unwrap_or_default();
        let buffer = ArrayD::zeros(IxDyn(&sizes));
        match self {
            ProcessingStep::Weight(w) => w.output = buffer,
            ProcessingStep::Projection(p) => p.output = buffer,
            ProcessingStep::Scaler(s) => s.output = buffer,
        }
    }
}

impl Connectable for ProcessingStep {
    fn label(&self) -> &str {
        match self {
            ProcessingStep::Weight(_) => "weight",
            ProcessingStep::Projection(_) => "projection",
            ProcessingStep::Scaler(_) => "scaler",
        }
    }

    fn input_dimensionality(&self) -> Option<usize> {
        match self {
            ProcessingStep::Projection(p) => Some(p.input_dimensionality),
            _ => self.input_dimension_sizes().map(|s| s.len()),
        }
    }

    fn output_dimensionality(&self) -> Option<usize> {
        match self {
            ProcessingStep::Projection(p) => Some(p.output_dimensionality),
            _ => self.output_dimension_sizes().map(|s| s.len()),
        }
    }

    fn input_dimension_sizes(&self) -> Option<&[usize]> {
        match self {
            ProcessingStep::Weight(w) => w.sizes.as_deref(),
            ProcessingStep::Projection(p) => p.input_sizes.as_deref(),
            ProcessingStep::Scaler(s) => s.input_sizes.as_deref(),
        }
    }

    fn output_dimension_sizes(&self) -> Option<&[usize]> {
        match self {
            ProcessingStep::Weight(w) => w.sizes.as_deref(),
            ProcessingStep::Projection(p) => p.output_sizes.as_deref(),
            ProcessingStep::Scaler(s) => s.output_sizes.as_deref(),
        }
    }

    fn output(&self) -> &ArrayD<f64> {
        match self {
            ProcessingStep::Weight(w) => &w.output,
            ProcessingStep::Projection(p) => &p.output,
            ProcessingStep::Scaler(s) => &s.output,
        }
    }

    fn step(&mut self, inputs: &[ArrayD<f64>], _rng: &mut Prng) {
        let Some(input) = inputs.first() else {
            return;
        };
        match self {
            ProcessingStep::Weight(w) => w.apply(input),
            ProcessingStep::Projection(p) => p.output = p.project(input),
            ProcessingStep::Scaler(s) => {
                let target = s
                    .output_sizes
                    .clone()
                    .unwrap_or_else(|| input.shape().to_vec());
                s.output = resample_linear(input, &target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn run(step: &mut ProcessingStep, input: ArrayD<f64>) -> ArrayD<f64> {
        let mut rng = Prng::new(1);
        step.step(&[input], &mut rng);
        step.output().clone()
    }

    #[test]
    fn compress_to_scalar_returns_global_max() {
        let input = Array2::from_shape_fn((4, 5), |(i, j)| ((i * 7 + j * 3) % 11) as f64 - 2.0)
            .into_dyn();
        let max = input.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let p = Projection::new(2, 0, [], []).unwrap();
        assert!(p.is_compressing());
        let out = p.project(&input);
        assert_eq!(out.ndim(), 0);
        assert_eq!(out[IxDyn(&[])], max);
    }

    #[test]
    fn compress_keeps_selected_axis_as_max_profile() {
        let input = Array2::from_shape_vec((2, 3), vec![1.0, 5.0, 2.0, 4.0, 0.0, 3.0])
            .unwrap()
            .into_dyn();
        // keep axis 1, collapse axis 0
        let p = Projection::new(2, 1, [1], [0]).unwrap();
        let out = p.project(&input);
        assert_eq!(out.as_slice().unwrap(), &[4.0, 5.0, 3.0]);
    }

    #[test]
    fn compress_can_reorder_retained_axes() {
        let input = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4]), |idx| {
            (idx[0] * 100 + idx[1] * 10 + idx[2]) as f64
        });
        // drop axis 0, swap the remaining two
        let p = Projection::new(3, 2, [1, 2], [1, 0]).unwrap();
        let out = p.project(&input);
        assert_eq!(out.shape(), &[4, 3]);
        assert_eq!(out[[3, 2]], 123.0);
    }

    #[test]
    fn expand_scalar_broadcasts_homogeneously() {
        let mut step = ProcessingStep::from(Projection::from_scalar(2).unwrap());
        step.set_output_dimension_sizes(&[3, 4]).unwrap();
        step.set_input_dimension_sizes(&[]).unwrap();
        let out = run(&mut step, ArrayD::from_elem(IxDyn(&[]), 0.75));
        assert_eq!(out.shape(), &[3, 4]);
        assert!(out.iter().all(|&v| v == 0.75));
    }

    #[test]
    fn expand_places_input_axis_at_requested_position() {
        let mut step = ProcessingStep::from(Projection::new(1, 2, [0], [1]).unwrap());
        step.set_input_dimension_sizes(&[3]).unwrap();
        step.set_output_dimension_sizes(&[2, 3]).unwrap();
        let input = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, 2.0, 3.0]).unwrap();
        let out = run(&mut step, input);
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out[[0, 2]], 3.0);
        assert_eq!(out[[1, 0]], 1.0);
    }

    #[test]
    fn pure_reorder_transposes() {
        let p = Projection::new(2, 2, [0, 1], [1, 0]).unwrap();
        assert!(!p.is_compressing() && !p.is_expanding());
        let input = Array2::from_shape_vec((2, 3), (0..6).map(f64::from).collect())
            .unwrap()
            .into_dyn();
        let out = p.project(&input);
        assert_eq!(out.shape(), &[3, 2]);
        assert_eq!(out[[2, 1]], 5.0);
    }

    #[test]
    fn invalid_projections_fail_fast() {
        assert_eq!(
            Projection::new(2, 1, [0, 1], [0]).unwrap_err(),
            ConnectError::IndexCountMismatch { inputs: 2, outputs: 1 }
        );
        assert_eq!(
            Projection::new(2, 1, [2], [0]).unwrap_err(),
            ConnectError::DimensionOutOfRange { index: 2, dimensionality: 2 }
        );
        assert_eq!(
            Projection::new(2, 2, [0], [1]).unwrap_err(),
            ConnectError::CompressAndExpand
        );
        assert_eq!(
            Projection::new(1, 4, [0], [0]).unwrap_err(),
            ConnectError::UnsupportedProjection { from: 1, to: 4 }
        );
        assert_eq!(
            Projection::new(2, 2, [0, 0], [0, 1]).unwrap_err(),
            ConnectError::DuplicateDimension(0)
        );
    }

    #[test]
    fn projection_infers_sizes_in_both_directions() {
        let mut compress = ProcessingStep::from(Projection::new(2, 1, [1], [0]).unwrap());
        compress.set_input_dimension_sizes(&[5, 7]).unwrap();
        assert!(compress.determine_output_dimension_sizes());
        assert_eq!(compress.output_dimension_sizes(), Some(&[7][..]));

        let mut expand = ProcessingStep::from(Projection::new(1, 2, [0], [0]).unwrap());
        expand.set_output_dimension_sizes(&[4, 6]).unwrap();
        assert!(expand.determine_input_dimension_sizes());
        assert_eq!(expand.input_dimension_sizes(), Some(&[4][..]));
        // the broadcast axis cannot be inferred from the input
        let mut fresh = ProcessingStep::from(Projection::new(1, 2, [0], [0]).unwrap());
        fresh.set_input_dimension_sizes(&[4]).unwrap();
        assert!(!fresh.determine_output_dimension_sizes());
    }

    #[test]
    fn dense_weight_multiplies_elementwise() {
        let pattern = ArrayD::from_shape_vec(IxDyn(&[3]), vec![0.0, 2.0, -1.0]).unwrap();
        let mut step = ProcessingStep::from(Weight::new(pattern));
        assert_eq!(step.input_dimension_sizes(), Some(&[3][..]));
        let out = run(&mut step, ArrayD::from_elem(IxDyn(&[3]), 0.5));
        assert_eq!(out.as_slice().unwrap(), &[0.0, 1.0, -0.5]);
    }

    #[test]
    fn dense_weight_rejects_other_sizes() {
        let mut step = ProcessingStep::from(Weight::new(ArrayD::zeros(IxDyn(&[3]))));
        assert!(matches!(
            step.set_input_dimension_sizes(&[4]),
            Err(ConnectError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn scaler_resamples_to_output_grid() {
        let mut step = ProcessingStep::from(Scaler::between(&[3], &[5]).unwrap());
        let input = ArrayD::from_shape_vec(IxDyn(&[3]), vec![0.0, 1.0, 0.0]).unwrap();
        let out = run(&mut step, input);
        assert_eq!(out.as_slice().unwrap(), &[0.0, 0.5, 1.0, 0.5, 0.0]);
    }
}
