//! Streaming fixed-ratio resampler.
//!
//! Converts a signal from one integer sample rate to another with a
//! Hann-windowed sinc filter, preserving phase across calls: the caller
//! may split the input into chunks of any size and the concatenated
//! output is identical to a single-shot conversion.
//!
//! # How it works
//!
//! The two rates are reduced by their gcd to a repeating "unit" of
//! `out_rate / gcd` output samples against `in_rate / gcd` input samples,
//! so only one filter table per output phase is needed. A tail of input
//! samples whose output still depends on future input is buffered
//! between calls; `flush` drains it (zero-padding the future) and resets
//! the stream.

use derive_more::Debug;

use crate::dot;

/// Streaming single-channel sample-rate converter.
#[derive(Debug)]
pub struct LinearResampler {
    samp_rate_in: u32,
    samp_rate_out: u32,
    filter_cutoff: f64,
    num_zeros: u32,

    input_samples_in_unit: u32,
    output_samples_in_unit: u32,

    /// First input index contributing to each output phase (may be
    /// negative for outputs near the start of the signal).
    #[debug(skip)]
    first_index: Vec<i64>,
    /// Filter weights per output phase.
    #[debug(skip)]
    weights: Vec<Vec<f32>>,

    // Streaming state.
    input_sample_offset: u64,
    output_sample_offset: u64,
    #[debug(skip)]
    input_remainder: Vec<f32>,
}

impl LinearResampler {
    /// Create a new resampler.
    ///
    /// # Panics
    ///
    /// Panics unless both rates are positive, `filter_cutoff` is positive
    /// and at most half of both rates, and `num_zeros > 0`.
    pub fn new(samp_rate_in: u32, samp_rate_out: u32, filter_cutoff: f64, num_zeros: u32) -> Self {
        assert!(
            samp_rate_in > 0 && samp_rate_out > 0,
            "sample rates must be positive, got {samp_rate_in} -> {samp_rate_out}"
        );
        assert!(
            filter_cutoff > 0.0
                && filter_cutoff * 2.0 <= samp_rate_in as f64
                && filter_cutoff * 2.0 <= samp_rate_out as f64,
            "filter cutoff {filter_cutoff} incompatible with rates {samp_rate_in}, {samp_rate_out}"
        );
        assert!(num_zeros > 0, "num_zeros must be > 0");

        let base_freq = gcd(samp_rate_in as u64, samp_rate_out as u64) as u32;
        let mut resampler = Self {
            samp_rate_in,
            samp_rate_out,
            filter_cutoff,
            num_zeros,
            input_samples_in_unit: samp_rate_in / base_freq,
            output_samples_in_unit: samp_rate_out / base_freq,
            first_index: Vec::new(),
            weights: Vec::new(),
            input_sample_offset: 0,
            output_sample_offset: 0,
            input_remainder: Vec::new(),
        };
        resampler.set_indexes_and_weights();
        resampler
    }

    /// Resample one chunk, appending the newly computable output samples
    /// to `output`.
    ///
    /// With `flush = false` a tail of input is buffered internally so
    /// that later chunks continue seamlessly; with `flush = true` the
    /// remaining output is produced (treating the signal as ending here)
    /// and the resampler resets to its initial state.
    pub fn resample(&mut self, input: &[f32], flush: bool, output: &mut Vec<f32>) {
        let tot_input_samp = self.input_sample_offset + input.len() as u64;
        let tot_output_samp = self.num_output_samples(tot_input_samp, flush);
        debug_assert!(tot_output_samp >= self.output_sample_offset);
        output.reserve((tot_output_samp - self.output_sample_offset) as usize);

        for samp_out in self.output_sample_offset..tot_output_samp {
            let (first_samp_in, phase) = self.indexes(samp_out);
            let weights = &self.weights[phase];
            // Offset of the first needed sample into this chunk; negative
            // when the filter support reaches back into the remainder.
            let first_input_index = first_samp_in - self.input_sample_offset as i64;

            let this_output = if first_input_index >= 0
                && first_input_index as usize + weights.len() <= input.len()
            {
                let start = first_input_index as usize;
                dot(&input[start..start + weights.len()], weights)
            } else {
                let mut sum = 0.0f64;
                for (i, &weight) in weights.iter().enumerate() {
                    let input_index = first_input_index + i as i64;
                    if input_index < 0 {
                        let rem_index = self.input_remainder.len() as i64 + input_index;
                        if rem_index >= 0 {
                            sum += weight as f64 * self.input_remainder[rem_index as usize] as f64;
                        }
                    } else if (input_index as usize) < input.len() {
                        sum += weight as f64 * input[input_index as usize] as f64;
                    } else {
                        // Sample past the end of the signal: only
                        // reachable when draining, where it counts as
                        // zero padding.
                        debug_assert!(flush);
                    }
                }
                sum as f32
            };
            output.push(this_output);
        }

        if flush {
            self.reset();
        } else {
            self.set_remainder(input);
            self.input_sample_offset = tot_input_samp;
            self.output_sample_offset = tot_output_samp;
        }
    }

    /// Forget all stream state, as if newly constructed.
    pub fn reset(&mut self) {
        self.input_sample_offset = 0;
        self.output_sample_offset = 0;
        self.input_remainder.clear();
    }

    /// Number of output samples determined by the first `input_num_samp`
    /// input samples.
    ///
    /// Computed on a grid of "ticks" at the lcm of the two rates so the
    /// answer is exact; without `flush`, outputs whose filter support
    /// extends past the available input are held back.
    fn num_output_samples(&self, input_num_samp: u64, flush: bool) -> u64 {
        let tick_freq = lcm(self.samp_rate_in as u64, self.samp_rate_out as u64) as i64;
        let ticks_per_input_period = tick_freq / self.samp_rate_in as i64;

        let mut interval_length_in_ticks = input_num_samp as i64 * ticks_per_input_period;
        if !flush {
            let window_width = self.num_zeros as f64 / (2.0 * self.filter_cutoff);
            let window_width_ticks = (window_width * tick_freq as f64).floor() as i64;
            interval_length_in_ticks -= window_width_ticks;
        }
        if interval_length_in_ticks <= 0 {
            return 0;
        }
        let ticks_per_output_period = tick_freq / self.samp_rate_out as i64;
        // Output sample n is at tick n * ticks_per_output_period; the
        // interval is open on the right, so a sample landing exactly on
        // the boundary is excluded.
        let mut last_output_samp = interval_length_in_ticks / ticks_per_output_period;
        if last_output_samp * ticks_per_output_period == interval_length_in_ticks {
            last_output_samp -= 1;
        }
        (last_output_samp + 1) as u64
    }

    /// Map an absolute output sample index to (first absolute input
    /// index, phase index into the weight tables).
    #[inline]
    fn indexes(&self, samp_out: u64) -> (i64, usize) {
        let unit_index = samp_out / self.output_samples_in_unit as u64;
        let samp_out_wrapped = (samp_out - unit_index * self.output_samples_in_unit as u64) as usize;
        let first_samp_in = self.first_index[samp_out_wrapped]
            + (unit_index * self.input_samples_in_unit as u64) as i64;
        (first_samp_in, samp_out_wrapped)
    }

    fn set_indexes_and_weights(&mut self) {
        let num_phases = self.output_samples_in_unit as usize;
        self.first_index = Vec::with_capacity(num_phases);
        self.weights = Vec::with_capacity(num_phases);
        let window_width = self.num_zeros as f64 / (2.0 * self.filter_cutoff);

        for i in 0..num_phases {
            let output_sample_in_seconds = i as f64 / self.samp_rate_out as f64;
            let min_t = output_sample_in_seconds - window_width;
            let max_t = output_sample_in_seconds + window_width;
            let min_input_index = (min_t * self.samp_rate_in as f64).ceil() as i64;
            let max_input_index = (max_t * self.samp_rate_in as f64).floor() as i64;
            let num_indices = (max_input_index - min_input_index + 1) as usize;

            let mut weights = Vec::with_capacity(num_indices);
            for j in 0..num_indices {
                let input_index = min_input_index + j as i64;
                let input_sample_in_seconds = input_index as f64 / self.samp_rate_in as f64;
                let delta_t = input_sample_in_seconds - output_sample_in_seconds;
                // The 1 / samp_rate_in factor from the integral over the
                // reconstructed signal is folded into the weight.
                weights.push(
                    (crate::windowed_sinc(delta_t, self.filter_cutoff, self.num_zeros)
                        / self.samp_rate_in as f64) as f32,
                );
            }
            self.first_index.push(min_input_index);
            self.weights.push(weights);
        }
    }

    /// Retain the tail of input that future outputs still depend on.
    fn set_remainder(&mut self, input: &[f32]) {
        let old_remainder = std::mem::take(&mut self.input_remainder);
        // Enough to cover the filter support of any future output sample.
        let max_remainder_needed =
            (self.samp_rate_in as f64 * self.num_zeros as f64 / self.filter_cutoff).ceil() as i64;
        self.input_remainder = vec![0.0; max_remainder_needed as usize];
        let rem_len = self.input_remainder.len() as i64;
        for index in -rem_len..0 {
            // `index` is relative to the end of the signal seen so far.
            let input_index = index + input.len() as i64;
            if input_index >= 0 {
                self.input_remainder[(index + rem_len) as usize] = input[input_index as usize];
            } else if input_index + old_remainder.len() as i64 >= 0 {
                self.input_remainder[(index + rem_len) as usize] =
                    old_remainder[(input_index + old_remainder.len() as i64) as usize];
            }
        }
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}
