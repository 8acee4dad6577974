//! Lateral interaction kernels.
//!
//! Kernels are separable: each dimension owns a 1-D coefficient array, and an
//! N-D convolution is one 1-D pass per axis. A full N-D kernel is never
//! materialized.

use ndarray::{ArrayD, Axis, Zip};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConnectError;
use crate::math::gauss_value;

/// Gaussian cutoff relative to |amplitude| that determines kernel extent.
pub const DEFAULT_LIMIT: f64 = 0.01;

/// How a convolution treats samples beyond the field's edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Boundary {
    /// Periodic: suited to cyclic dimensions such as hue.
    #[default]
    Wrap,
    /// Samples outside the field contribute nothing: suited to bounded
    /// spatial dimensions.
    Zero,
}

/// One Gaussian mode of a [`GaussKernel`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KernelMode {
    pub amplitude: f64,
    pub widths: Vec<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub shifts: Vec<f64>,
}

/// Degenerate kernel with a single coefficient. Used for 0-D nodes, where
/// self-excitation is a pure scalar gain.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxKernel {
    part: [f64; 1],
}

impl BoxKernel {
    pub fn new(amplitude: f64) -> Self {
        Self { part: [amplitude] }
    }

    pub fn amplitude(&self) -> f64 {
        self.part[0]
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.part[0] = amplitude;
    }

    /// Always the one-element array `[amplitude]`.
    pub fn separated_part(&self) -> &[f64] {
        &self.part
    }
}

impl Default for BoxKernel {
    fn default() -> Self {
        Self::new(5.0)
    }
}

/// Multi-mode separable Gauss kernel.
///
/// Several modes let one kernel encode a "Mexican hat" (near excitation,
/// far inhibition), which stabilizes a single self-sustained peak.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussKernel {
    dimensionality: usize,
    modes: Vec<KernelMode>,
    limit: f64,

    dimension_sizes: Vec<usize>,
    parts: Vec<Vec<f64>>,
}

impl GaussKernel {
    pub fn new(dimensionality: usize) -> Self {
        let mut kernel = Self {
            dimensionality,
            modes: Vec::new(),
            limit: DEFAULT_LIMIT,
            dimension_sizes: Vec::new(),
            parts: Vec::new(),
        };
        kernel.calculate();
        kernel
    }

    /// Build a kernel from a list of modes and calculate it.
    pub fn from_modes(dimensionality: usize, modes: &[KernelMode]) -> Result<Self, ConnectError> {
        let mut kernel = Self::new(dimensionality);
        for mode in modes {
            kernel.push_mode(mode.clone())?;
        }
        kernel.calculate();
        Ok(kernel)
    }

    /// Append a mode and recalculate. `shifts` may be empty (all zero).
    pub fn add_mode(
        &mut self,
        amplitude: f64,
        widths: &[f64],
        shifts: &[f64],
    ) -> Result<(), ConnectError> {
        self.push_mode(KernelMode {
            amplitude,
            widths: widths.to_vec(),
            shifts: shifts.to_vec(),
        })?;
        self.calculate();
        Ok(())
    }

    fn push_mode(&mut self, mut mode: KernelMode) -> Result<(), ConnectError> {
        if mode.widths.len() != self.dimensionality {
            return Err(ConnectError::KernelDimensionMismatch {
                expected: self.dimensionality,
                got: mode.widths.len(),
            });
        }
        if mode.shifts.is_empty() {
            mode.shifts = vec![0.0; self.dimensionality];
        }
        if mode.shifts.len() != self.dimensionality {
            return Err(ConnectError::KernelDimensionMismatch {
                expected: self.dimensionality,
                got: mode.shifts.len(),
            });
        }
        self.modes.push(mode);
        Ok(())
    }

    pub fn set_limit(&mut self, limit: f64) {
        self.limit = limit;
        self.calculate();
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    pub fn modes(&self) -> &[KernelMode] {
        &self.modes
    }

    pub fn dimension_sizes(&self) -> &[usize] {
        &self.dimension_sizes
    }

    pub fn separated_part(&self, dimension: usize) -> Option<&[f64]> {
        self.parts.get(dimension).map(|p| p.as_slice())
    }

    /// Derive per-dimension sizes and coefficient arrays from the modes.
    pub fn calculate(&mut self) {
        self.dimension_sizes = (0..self.dimensionality)
            .map(|d| {
                self.modes
                    .iter()
                    .map(|m| mode_size(m.amplitude, m.widths[d], self.limit))
                    .max()
                    .unwrap_or(1)
            })
            .collect();

        self.parts = self
            .dimension_sizes
            .iter()
            .map(|&size| vec![0.0; size])
            .collect();

        for mode in &self.modes {
            for d in 0..self.dimensionality {
                let size = self.dimension_sizes[d];
                let part = mode_part(size, mode.amplitude, mode.widths[d], mode.shifts[d], d == 0);
                for (acc, v) in self.parts[d].iter_mut().zip(part) {
                    *acc += v;
                }
            }
        }
    }
}

fn mode_size(amplitude: f64, width: f64, limit: f64) -> usize {
    let ratio = amplitude.abs() / limit;
    let mut size = if width > 0.0 && width < 10_000.0 && ratio > 1.0 {
        (2.0 * width * width * ratio.ln()).sqrt().round() as usize + 1
    } else {
        1
    };
    if size % 2 == 0 {
        size += 1;
    }
    size
}

// One mode's coefficients for one dimension. The part sums to sign(amplitude);
// only the first dimension carries |amplitude|, so the separable product sums
// to the signed amplitude.
fn mode_part(size: usize, amplitude: f64, width: f64, shift: f64, first: bool) -> Vec<f64> {
    let center = (size / 2) as f64 + shift;
    let mut part: Vec<f64> = if width > 0.0 {
        (0..size)
            .map(|i| gauss_value(i as f64, width, center))
            .collect()
    } else {
        let mut impulse = vec![0.0; size];
        impulse[size / 2] = 1.0;
        impulse
    };

    let sum: f64 = part.iter().sum();
    let sign = if amplitude < 0.0 { -1.0 } else { 1.0 };
    let mut scale = if sum > 0.0 { sign / sum } else { 0.0 };
    if first {
        scale *= amplitude.abs();
    }
    for v in &mut part {
        *v *= scale;
    }
    part
}

/// Lateral interaction kernel of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Kernel {
    Box(BoxKernel),
    Gauss(GaussKernel),
}

impl Kernel {
    /// Kernel dimensionality; `None` for a box kernel, which fits any field.
    pub fn dimensionality(&self) -> Option<usize> {
        match self {
            Kernel::Box(_) => None,
            Kernel::Gauss(g) => Some(g.dimensionality()),
        }
    }

    pub fn separated_part(&self, dimension: usize) -> Option<&[f64]> {
        match self {
            Kernel::Box(b) => Some(b.separated_part()),
            Kernel::Gauss(g) => g.separated_part(dimension),
        }
    }
}

impl From<BoxKernel> for Kernel {
    fn from(k: BoxKernel) -> Self {
        Kernel::Box(k)
    }
}

impl From<GaussKernel> for Kernel {
    fn from(k: GaussKernel) -> Self {
        Kernel::Gauss(k)
    }
}

/// Convolve `output` with `kernel`, one 1-D pass per kernel dimension.
pub fn convolve(output: &ArrayD<f64>, kernel: &Kernel, boundary: Boundary) -> ArrayD<f64> {
    match kernel {
        Kernel::Box(b) => output * b.amplitude(),
        Kernel::Gauss(g) => {
            let mut result = output.to_owned();
            let dims = g.dimensionality().min(result.ndim());
            for axis in 0..dims {
                let Some(part) = g.separated_part(axis) else {
                    continue;
                };
                result = convolve_axis(&result, part, axis, boundary);
            }
            result
        }
    }
}

fn convolve_axis(input: &ArrayD<f64>, part: &[f64], axis: usize, boundary: Boundary) -> ArrayD<f64> {
    let mut out = ArrayD::<f64>::zeros(input.raw_dim());
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(input.lanes(Axis(axis)))
        .for_each(|mut out_lane, in_lane| {
            let samples: Vec<f64> = in_lane.iter().copied().collect();
            for (dst, v) in out_lane
                .iter_mut()
                .zip(convolve_1d(&samples, part, boundary))
            {
                *dst = v;
            }
        });
    out
}

/// True 1-D convolution with the kernel origin at `part.len() / 2`.
pub fn convolve_1d(input: &[f64], part: &[f64], boundary: Boundary) -> Vec<f64> {
    let n = input.len() as isize;
    let c = (part.len() / 2) as isize;
    (0..n)
        .map(|i| {
            let mut acc = 0.0;
            for (j, k) in part.iter().enumerate() {
                let src = i - j as isize + c;
                let sample = match boundary {
                    Boundary::Wrap => input[src.rem_euclid(n) as usize],
                    Boundary::Zero => {
                        if src < 0 || src >= n {
                            continue;
                        }
                        input[src as usize]
                    }
                };
                acc += k * sample;
            }
            acc
        })
        .collect()
}
