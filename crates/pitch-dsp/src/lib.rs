//! DSP primitives for pitch tracking.
//!
//! Contains the streaming fixed-ratio resampler, the arbitrary-grid
//! resampler used to sample correlation functions on non-uniform lag
//! grids, and the regression-window delta-feature filter.

pub mod arbitrary_resampler;
pub mod delta_features;
pub mod linear_resampler;

pub use arbitrary_resampler::ArbitraryResampler;
pub use delta_features::{DeltaFeatures, DeltaFeaturesOptions};
pub use linear_resampler::LinearResampler;

/// Dot product accumulated in `f64` for a platform-independent result.
#[inline]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum::<f64>() as f32
}

/// Hann-windowed sinc, the interpolation filter shared by both
/// resamplers.
///
/// `t` is in seconds; the filter has its first `num_zeros` zero
/// crossings on each side of the origin inside the window, and value
/// `2 * cutoff` at `t = 0` (the unscaled ideal lowpass impulse
/// response).
pub(crate) fn windowed_sinc(t: f64, cutoff: f64, num_zeros: u32) -> f64 {
    use std::f64::consts::PI;
    let window_width = num_zeros as f64 / (2.0 * cutoff);
    let window = if t.abs() < window_width {
        0.5 * (1.0 + (2.0 * PI * cutoff / num_zeros as f64 * t).cos())
    } else {
        return 0.0;
    };
    let filter = if t != 0.0 {
        (2.0 * PI * cutoff * t).sin() / (PI * t)
    } else {
        2.0 * cutoff
    };
    filter * window
}
