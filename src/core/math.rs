//! Numeric helpers shared by fields, processing steps, and assembly code.
//!
//! Tuning curves (`gauss_*`) are how an assembly layer writes "intention to
//! find this hue" or "reach toward this location" into a Weight pattern or a
//! field boost.

use ndarray::{Array1, ArrayD, Axis, IxDyn, Zip};

/// Logistic nonlinearity with steepness `beta` centered on `x0`.
#[inline]
pub fn sigmoid(x: f64, beta: f64, x0: f64) -> f64 {
    1.0 / (1.0 + (-beta * (x - x0)).exp())
}

/// Elementwise [`sigmoid`] of an activation array.
pub fn sigmoid_array(activation: &ArrayD<f64>, beta: f64, x0: f64) -> ArrayD<f64> {
    activation.mapv(|u| sigmoid(u, beta, x0))
}

/// Unnormalized Gaussian `exp(-(x - center)^2 / (2 sigma^2))`.
#[inline]
pub fn gauss_value(position: f64, sigma: f64, center: f64) -> f64 {
    (-(position - center).powi(2) / (2.0 * sigma * sigma)).exp()
}

/// 1-D Gaussian bump of `size` samples.
pub fn gauss_1d(size: usize, amplitude: f64, sigma: f64, center: f64) -> Array1<f64> {
    Array1::from_shape_fn(size, |i| amplitude * gauss_value(i as f64, sigma, center))
}

/// 2-D separable Gaussian bump.
pub fn gauss_2d(
    sizes: [usize; 2],
    amplitude: f64,
    sigmas: [f64; 2],
    centers: [f64; 2],
) -> ArrayD<f64> {
    gauss_nd(&sizes, amplitude, &sigmas, &centers)
}

/// N-D separable Gaussian bump. `sigmas` and `centers` must have one entry per
/// dimension; missing entries default to sigma 1 and center 0.
pub fn gauss_nd(sizes: &[usize], amplitude: f64, sigmas: &[f64], centers: &[f64]) -> ArrayD<f64> {
    ArrayD::from_shape_fn(IxDyn(sizes), |idx| {
        let mut v = amplitude;
        for d in 0..sizes.len() {
            let sigma = sigmas.get(d).copied().unwrap_or(1.0);
            let center = centers.get(d).copied().unwrap_or(0.0);
            v *= gauss_value(idx[d] as f64, sigma, center);
        }
        v
    })
}

/// `n` evenly spaced values from `low` to `high` inclusive.
pub fn linspace(low: f64, high: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![low],
        _ => {
            let step = (high - low) / (n - 1) as f64;
            (0..n).map(|i| low + step * i as f64).collect()
        }
    }
}

/// Dot product of a 1-D output with a ramp spanning `[low, high]`.
///
/// Actuators read out where a peak sits this way: with a normalized profile
/// this is its centroid in ramp coordinates.
pub fn ramp_readout(profile: &[f64], low: f64, high: f64) -> f64 {
    let ramp = linspace(low, high, profile.len());
    profile.iter().zip(ramp.iter()).map(|(p, r)| p * r).sum()
}

/// Linear resampling of a 1-D signal onto `out_len` samples, corners aligned.
pub fn resample_linear_1d(input: &[f64], out_len: usize) -> Vec<f64> {
    let in_len = input.len();
    if out_len == 0 || in_len == 0 {
        return vec![0.0; out_len];
    }
    if in_len == 1 {
        return vec![input[0]; out_len];
    }
    if out_len == 1 {
        return vec![input[0]];
    }

    let scale = (in_len - 1) as f64 / (out_len - 1) as f64;
    (0..out_len)
        .map(|j| {
            let pos = j as f64 * scale;
            let lo = (pos.floor() as usize).min(in_len - 1);
            let hi = (lo + 1).min(in_len - 1);
            let frac = pos - lo as f64;
            input[lo] * (1.0 - frac) + input[hi] * frac
        })
        .collect()
}

/// Multilinear resampling of an N-D array onto `out_sizes`.
///
/// Linear interpolation is separable, so each axis is resampled in turn.
/// `out_sizes` must have the input's dimensionality.
pub fn resample_linear(input: &ArrayD<f64>, out_sizes: &[usize]) -> ArrayD<f64> {
    debug_assert_eq!(input.ndim(), out_sizes.len());

    let mut current = input.to_owned();
    for (axis, &out_len) in out_sizes.iter().enumerate() {
        if current.shape()[axis] == out_len {
            continue;
        }
        let mut shape = current.shape().to_vec();
        shape[axis] = out_len;
        let mut next = ArrayD::<f64>::zeros(IxDyn(&shape));

        Zip::from(next.lanes_mut(Axis(axis)))
            .and(current.lanes(Axis(axis)))
            .for_each(|mut out_lane, in_lane| {
                let samples: Vec<f64> = in_lane.iter().copied().collect();
                for (dst, v) in out_lane
                    .iter_mut()
                    .zip(resample_linear_1d(&samples, out_len))
                {
                    *dst = v;
                }
            });
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_half_at_shift() {
        assert!((sigmoid(2.0, 5.0, 2.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(-5.0, 5.0, 0.0) < 1e-9);
        assert!(sigmoid(5.0, 5.0, 0.0) > 1.0 - 1e-9);
    }

    #[test]
    fn gauss_1d_peaks_at_center() {
        let g = gauss_1d(21, 4.0, 2.0, 10.0);
        assert!((g[10] - 4.0).abs() < 1e-12);
        assert!(g[5] < g[8]);
        assert!((g[7] - g[13]).abs() < 1e-12);
    }

    #[test]
    fn gauss_2d_is_separable_product() {
        let g = gauss_2d([5, 7], 2.0, [1.0, 2.0], [2.0, 3.0]);
        assert_eq!(g.shape(), &[5, 7]);
        let expected = 2.0 * gauss_value(1.0, 1.0, 2.0) * gauss_value(6.0, 2.0, 3.0);
        assert!((g[[1, 6]] - expected).abs() < 1e-12);
    }

    #[test]
    fn resample_keeps_endpoints_and_interpolates() {
        let out = resample_linear_1d(&[0.0, 10.0], 5);
        assert_eq!(out, vec![0.0, 2.5, 5.0, 7.5, 10.0]);

        let down = resample_linear_1d(&[0.0, 1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(down, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn resample_nd_handles_each_axis() {
        let input = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let out = resample_linear(&input, &[3, 3]);
        assert_eq!(out.shape(), &[3, 3]);
        assert!((out[[1, 1]] - 1.5).abs() < 1e-12);
        assert!((out[[2, 2]] - 3.0).abs() < 1e-12);
        assert!((out[[0, 1]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn ramp_readout_finds_peak_location() {
        let mut profile = vec![0.0; 11];
        profile[8] = 1.0;
        assert!((ramp_readout(&profile, 0.0, 1.0) - 0.8).abs() < 1e-12);
    }
}
