//! Batch resampler onto an arbitrary set of target times.
//!
//! Unlike [`LinearResampler`](crate::LinearResampler) this is not
//! streaming: it is constructed for a fixed number of input samples and
//! a fixed set of (sorted, nonnegative) target times, precomputes one
//! windowed-sinc weight vector per target, and then evaluates rows
//! independently. Input sample `n` is taken to lie at time
//! `n / input_rate`, with sample 0 at time 0.
//!
//! The pitch tracker uses this to read a densely sampled correlation
//! function at geometrically spaced lags; each row is one analysis
//! frame, so row evaluations are independent and the caller loops (or
//! parallelizes) over rows.

use derive_more::Debug;

use crate::dot;

/// Windowed-sinc interpolator for a fixed target-time grid.
#[derive(Debug)]
pub struct ArbitraryResampler {
    num_samples_in: usize,
    /// First contributing input index per target.
    #[debug(skip)]
    first_index: Vec<usize>,
    /// Filter weights per target, clipped to the valid input range.
    #[debug(skip)]
    weights: Vec<Vec<f32>>,
}

impl ArbitraryResampler {
    /// Create a resampler for `num_samples_in` input samples at
    /// `samp_rate_in` Hz, evaluated at `sample_points` (seconds).
    ///
    /// # Panics
    ///
    /// Panics unless `num_samples_in > 0`, the rate is positive,
    /// `filter_cutoff` is positive and at most `samp_rate_in / 2`, and
    /// `num_zeros > 0`.
    pub fn new(
        num_samples_in: usize,
        samp_rate_in: f64,
        filter_cutoff: f64,
        sample_points: &[f32],
        num_zeros: u32,
    ) -> Self {
        assert!(num_samples_in > 0, "need at least one input sample");
        assert!(
            samp_rate_in > 0.0 && filter_cutoff > 0.0 && filter_cutoff * 2.0 <= samp_rate_in,
            "filter cutoff {filter_cutoff} incompatible with input rate {samp_rate_in}"
        );
        assert!(num_zeros > 0, "num_zeros must be > 0");

        let filter_width = num_zeros as f64 / (2.0 * filter_cutoff);
        let mut first_index = Vec::with_capacity(sample_points.len());
        let mut weights = Vec::with_capacity(sample_points.len());

        for &t in sample_points {
            let t = t as f64;
            let t_min = t - filter_width;
            let t_max = t + filter_width;
            // Clip the filter support to the available input range; near
            // the edges this truncates the sinc rather than zero-padding.
            let index_min = ((samp_rate_in * t_min).ceil() as i64).max(0) as usize;
            let index_max =
                (((samp_rate_in * t_max).floor() as i64).min(num_samples_in as i64 - 1)) as usize;
            debug_assert!(index_min <= index_max);

            let mut w = Vec::with_capacity(index_max - index_min + 1);
            for input_index in index_min..=index_max {
                let delta_t = t - input_index as f64 / samp_rate_in;
                w.push((crate::windowed_sinc(delta_t, filter_cutoff, num_zeros) / samp_rate_in) as f32);
            }
            first_index.push(index_min);
            weights.push(w);
        }

        Self {
            num_samples_in,
            first_index,
            weights,
        }
    }

    /// Number of target points.
    pub fn num_samples_out(&self) -> usize {
        self.first_index.len()
    }

    /// Evaluate one row: `input` holds `num_samples_in` samples, and
    /// `output[i]` receives the interpolated value at target time `i`.
    ///
    /// # Panics
    ///
    /// Panics on dimension mismatch.
    pub fn resample_row(&self, input: &[f32], output: &mut [f32]) {
        assert_eq!(
            input.len(),
            self.num_samples_in,
            "input row length does not match construction"
        );
        assert_eq!(
            output.len(),
            self.num_samples_out(),
            "output row length does not match target count"
        );
        for i in 0..self.num_samples_out() {
            let first = self.first_index[i];
            let weights = &self.weights[i];
            output[i] = dot(&input[first..first + weights.len()], weights);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn reproduces_sine_at_offset_points() {
        let rate = 4000.0;
        let num_in = 200;
        let freq = 150.0;
        let input: Vec<f32> = (0..num_in)
            .map(|i| (2.0 * PI * freq * i as f64 / rate).sin() as f32)
            .collect();

        // Interior points, away from the clipped edges.
        let points: Vec<f32> = (0..50)
            .map(|i| (0.01 + i as f64 * 0.0007) as f32)
            .collect();
        let r = ArbitraryResampler::new(num_in, rate, rate * 0.5, &points, 10);

        let mut output = vec![0.0; points.len()];
        r.resample_row(&input, &mut output);
        for (&t, &o) in points.iter().zip(output.iter()) {
            let expected = (2.0 * PI * freq * t as f64).sin() as f32;
            assert!(
                (o - expected).abs() < 5e-3,
                "at t={t}: got {o}, expected {expected}"
            );
        }
    }

    #[test]
    fn on_grid_points_are_near_identity() {
        let rate = 1000.0;
        let num_in = 100;
        let input: Vec<f32> = (0..num_in).map(|i| ((i * 7919) % 13) as f32 / 13.0).collect();
        // Target times exactly on input samples 40..60.
        let points: Vec<f32> = (40..60).map(|i| i as f32 / rate as f32).collect();
        let r = ArbitraryResampler::new(num_in, rate, rate * 0.5, &points, 8);

        let mut output = vec![0.0; points.len()];
        r.resample_row(&input, &mut output);
        for (k, &o) in output.iter().enumerate() {
            let expected = input[40 + k];
            assert!(
                (o - expected).abs() < 0.05,
                "sample {k}: got {o}, expected {expected}"
            );
        }
    }

    #[test]
    #[should_panic(expected = "input row length")]
    fn rejects_wrong_row_length() {
        let points = [0.0f32];
        let r = ArbitraryResampler::new(10, 1000.0, 500.0, &points, 4);
        let mut out = vec![0.0; 1];
        r.resample_row(&[0.0; 5], &mut out);
    }
}
