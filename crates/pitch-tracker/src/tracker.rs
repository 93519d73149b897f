//! Streaming pitch tracker.
//!
//! Coordinates the per-chunk pipeline: downsample the incoming audio to
//! the internal rate, window it into frames (buffering the tail that
//! straddles the chunk boundary), compute the two NCCF variants per
//! frame, resample them onto the geometric lag grid, run the Viterbi
//! update, and trace back the current best path to decide which frames
//! can be emitted.
//!
//! # Latency
//!
//! Frames are revisable until the traceback from the current best state
//! agrees with all earlier tracebacks about them. `num_frames_ready`
//! reports only settled frames (up to the `max_frames_latency` cap);
//! `input_finished` declares the stream over and releases everything.

use derive_more::Debug;
use pitch_dsp::{ArbitraryResampler, LinearResampler};

use crate::config::PitchConfig;
use crate::lattice::{compute_latency, set_best_state, FrameInfo};
use crate::nccf::{compute_correlation, compute_nccf, select_lags};

/// Online fundamental-frequency tracker over a single monaural stream.
///
/// Not safe for concurrent mutation; independent streams are
/// independent. Memory grows with stream length (one lattice record per
/// frame); bound it by bounding or segmenting streams.
#[derive(Debug)]
pub struct OnlinePitchTracker {
    config: PitchConfig,

    /// First and last integer sample lag of the dense NCCF.
    nccf_first_lag: usize,
    nccf_last_lag: usize,

    /// The log-spaced lags (seconds) the NCCF is resampled onto; one
    /// Viterbi state per entry.
    #[debug(skip)]
    lags: Vec<f32>,

    /// Resamples each frame's dense NCCF onto `lags`.
    #[debug(skip)]
    nccf_resampler: ArbitraryResampler,
    /// Downsamples the input signal to the internal rate.
    #[debug(skip)]
    signal_resampler: LinearResampler,

    /// Lattice records, indexed by frame + 1; element 0 is the synthetic
    /// frame −1.
    #[debug(skip)]
    frame_info: Vec<FrameInfo>,

    /// Number of recent frames the traceback has not yet settled on,
    /// capped at `max_frames_latency`.
    frames_latency: usize,

    /// Forward cost per state at the newest frame, renormalized each
    /// frame so its minimum is zero.
    #[debug(skip)]
    forward_cost: Vec<f32>,
    /// Double buffer for the Viterbi update.
    #[debug(skip)]
    forward_cost_scratch: Vec<f32>,
    /// Accumulated renormalization offsets; `f64` so the diagnostic
    /// average stays meaningful on long streams.
    forward_cost_remainder: f64,

    /// Per-frame (lag index, ballast-free NCCF) from the most recent
    /// traceback. Entries within the latency horizon may still change.
    #[debug(skip)]
    lag_nccf: Vec<(usize, f32)>,

    input_finished: bool,

    /// Running statistics of the downsampled signal for the ballast
    /// term, accumulated sample by sample so they do not depend on how
    /// the input was chunked.
    signal_sumsq: f64,
    signal_sum: f64,
    /// Downsampled samples consumed by previous calls.
    downsampled_samples_processed: u64,
    /// Tail of the downsampled signal still needed by frames that
    /// straddle the call boundary.
    #[debug(skip)]
    downsampled_signal_remainder: Vec<f32>,

    /// Scratch for the Viterbi bound refinement.
    #[debug(skip)]
    index_info: Vec<(usize, usize)>,
}

impl OnlinePitchTracker {
    /// Create a tracker for one stream.
    ///
    /// # Panics
    ///
    /// Panics on invalid configuration (see [`PitchConfig::validate`]),
    /// including an empty lag grid.
    pub fn new(config: &PitchConfig) -> Self {
        config.validate();

        let signal_resampler = LinearResampler::new(
            config.sample_rate_in as u32,
            config.resample_rate as u32,
            config.lowpass_cutoff,
            config.lowpass_filter_width,
        );

        // The dense NCCF must extend half the upsampling filter's
        // support beyond the outermost lags of interest.
        let filter_half_width = config.upsample_filter_width as f64 / (2.0 * config.resample_rate);
        let outer_min_lag = 1.0 / config.max_f0 - filter_half_width;
        let outer_max_lag = 1.0 / config.min_f0 + filter_half_width;
        let nccf_first_lag = (config.resample_rate * outer_min_lag).ceil() as usize;
        let nccf_last_lag = (config.resample_rate * outer_max_lag).floor() as usize;
        let num_measured_lags = nccf_last_lag + 1 - nccf_first_lag;

        let lags = select_lags(config);
        assert!(!lags.is_empty(), "pitch range and delta_pitch give an empty lag grid");

        // The NCCF is (almost completely) bandlimited to around
        // `lowpass_cutoff`; filtering at half the internal Nyquist keeps
        // only the first spectral repetition when interpolating.
        let upsample_cutoff = config.resample_rate * 0.5;

        // The lag-grid resampler assumes its input starts at time zero,
        // but dense NCCF sample 0 is the value at lag `nccf_first_lag`.
        let lags_offset: Vec<f32> = lags
            .iter()
            .map(|&lag| lag - (nccf_first_lag as f64 / config.resample_rate) as f32)
            .collect();
        let nccf_resampler = ArbitraryResampler::new(
            num_measured_lags,
            config.resample_rate,
            upsample_cutoff,
            &lags_offset,
            config.upsample_filter_width,
        );

        let num_states = lags.len();
        Self {
            config: config.clone(),
            nccf_first_lag,
            nccf_last_lag,
            nccf_resampler,
            signal_resampler,
            // Frame −1: all-zero costs and NCCF.
            frame_info: vec![FrameInfo::new(num_states)],
            frames_latency: 0,
            forward_cost: vec![0.0; num_states],
            forward_cost_scratch: vec![0.0; num_states],
            forward_cost_remainder: 0.0,
            lag_nccf: Vec::new(),
            input_finished: false,
            signal_sumsq: 0.0,
            signal_sum: 0.0,
            downsampled_samples_processed: 0,
            downsampled_signal_remainder: Vec::new(),
            index_info: Vec::new(),
            lags,
        }
    }

    /// Output dimension of [`get_frame`](Self::get_frame).
    pub fn dim(&self) -> usize {
        2
    }

    /// Number of frames that are settled and safe to read.
    pub fn num_frames_ready(&self) -> usize {
        debug_assert!(self.frames_latency <= self.lag_nccf.len());
        self.lag_nccf.len() - self.frames_latency
    }

    /// True when `frame` is the final frame of a finished stream.
    ///
    /// # Panics
    ///
    /// Panics if `frame >= num_frames_ready()`.
    pub fn is_last_frame(&self, frame: usize) -> bool {
        let num_ready = self.num_frames_ready();
        assert!(frame < num_ready, "frame {frame} not ready ({num_ready} ready)");
        self.input_finished && frame + 1 == num_ready
    }

    /// Read one settled frame: `[nccf, pitch_hz]`. Re-reading a settled
    /// frame returns the same values for the life of the stream.
    ///
    /// # Panics
    ///
    /// Panics if `frame >= num_frames_ready()`.
    pub fn get_frame(&self, frame: usize) -> [f32; 2] {
        assert!(
            frame < self.num_frames_ready(),
            "frame {frame} not ready ({} ready)",
            self.num_frames_ready()
        );
        let (lag_index, nccf) = self.lag_nccf[frame];
        [nccf, 1.0 / self.lags[lag_index]]
    }

    /// Declare the input over: drops the latency to zero so every
    /// processed frame becomes readable.
    ///
    /// The last few input samples buffered inside the downsampler are
    /// never flushed; this can occasionally cost a final frame, which
    /// downstream consumers must tolerate anyway since frame counts are
    /// window-dependent.
    pub fn input_finished(&mut self) {
        self.input_finished = true;
        self.frames_latency = 0;
        let num_frames = self.num_frames_ready();
        if num_frames == 0 {
            tracing::warn!("no frames produced in pitch extraction");
        } else {
            tracing::debug!(
                "pitch-tracking Viterbi cost is {} per frame, over {num_frames} frames",
                self.forward_cost_remainder / num_frames as f64
            );
        }
    }

    /// Feed the next chunk of audio. Chunks must be contiguous in time;
    /// `sample_rate` must equal the configured input rate on every call.
    ///
    /// # Panics
    ///
    /// Panics on a sample-rate mismatch.
    pub fn accept_waveform(&mut self, sample_rate: f64, wave: &[f32]) {
        assert!(
            sample_rate == self.config.sample_rate_in,
            "waveform sample rate {sample_rate} does not match configured {}",
            self.config.sample_rate_in
        );
        if wave.is_empty() {
            tracing::warn!("zero-length waveform submitted to pitch tracker");
        }

        // We never flush the downsampler: output for the last few input
        // samples would depend on future input, and losing an occasional
        // final frame is tolerated (frame counts here differ from the
        // spectral front ends anyway).
        let mut downsampled_wave = Vec::new();
        self.signal_resampler.resample(wave, false, &mut downsampled_wave);

        // Root-mean-square statistics for the ballast term. With
        // `nccf_ballast_online` the per-frame loop below extends these
        // to exactly the samples up to each frame's end; otherwise the
        // whole of the current call is included up front.
        let mut cur_sumsq = self.signal_sumsq;
        let mut cur_sum = self.signal_sum;
        let mut cur_num_samp = self.downsampled_samples_processed;
        let mut prev_frame_end_sample = 0usize;
        if !self.config.nccf_ballast_online {
            for &x in &downsampled_wave {
                cur_sumsq += x as f64 * x as f64;
                cur_sum += x as f64;
            }
            cur_num_samp += downsampled_wave.len() as u64;
        }

        // Total frames now computable, including already-processed ones.
        let end_frame = self.num_frames_available(
            self.downsampled_samples_processed + downsampled_wave.len() as u64,
        );
        let start_frame = self.frame_info.len() - 1;
        let num_new_frames = end_frame.saturating_sub(start_frame);
        if num_new_frames == 0 {
            self.update_remainder(&downsampled_wave);
            return;
        }

        let num_measured_lags = self.nccf_last_lag + 1 - self.nccf_first_lag;
        let num_resampled_lags = self.lags.len();
        let frame_shift = self.config.nccf_window_shift();
        let basic_frame_length = self.config.nccf_window_size();
        let full_frame_length = basic_frame_length + self.nccf_last_lag;

        let mut window = vec![0.0f32; full_frame_length];
        let mut inner_prod = vec![0.0f32; num_measured_lags];
        let mut norm_prod = vec![0.0f32; num_measured_lags];
        // Row-major [num_new_frames x num_measured_lags]; the lag-grid
        // resampling is done frame by frame afterwards.
        let mut nccf_pitch = vec![0.0f32; num_new_frames * num_measured_lags];
        let mut nccf_pov = vec![0.0f32; num_new_frames * num_measured_lags];

        for frame in start_frame..end_frame {
            let frame_idx = frame - start_frame;
            // Index into the whole downsampled signal, not just this chunk.
            let start_sample = frame as u64 * frame_shift as u64;
            self.extract_frame(&downsampled_wave, start_sample, &mut window);

            if self.config.nccf_ballast_online {
                // Extend the statistics to the end of the current frame.
                let end_sample = (start_sample + full_frame_length as u64) as i64
                    - self.downsampled_samples_processed as i64;
                assert!(end_sample > 0, "frame should have been processed last call");
                let end_sample = end_sample as usize;
                for &x in &downsampled_wave[prev_frame_end_sample..end_sample] {
                    cur_sumsq += x as f64 * x as f64;
                    cur_sum += x as f64;
                }
                cur_num_samp += (end_sample - prev_frame_end_sample) as u64;
                prev_frame_end_sample = end_sample;
            }
            let mean = cur_sum / cur_num_samp as f64;
            let mean_square = cur_sumsq / cur_num_samp as f64 - mean * mean;

            compute_correlation(
                &window,
                self.nccf_first_lag,
                self.nccf_last_lag,
                basic_frame_length,
                &mut inner_prod,
                &mut norm_prod,
            );
            let nccf_ballast_pitch =
                (mean_square * basic_frame_length as f64).powi(2) * self.config.nccf_ballast;
            let row = frame_idx * num_measured_lags..(frame_idx + 1) * num_measured_lags;
            compute_nccf(
                &inner_prod,
                &norm_prod,
                nccf_ballast_pitch,
                &mut nccf_pitch[row.clone()],
            );
            compute_nccf(&inner_prod, &norm_prod, 0.0, &mut nccf_pov[row]);
        }

        // Resample both NCCF matrices onto the log-spaced lag grid.
        let mut nccf_pitch_resampled = vec![0.0f32; num_new_frames * num_resampled_lags];
        let mut nccf_pov_resampled = vec![0.0f32; num_new_frames * num_resampled_lags];
        for frame_idx in 0..num_new_frames {
            let in_row = frame_idx * num_measured_lags..(frame_idx + 1) * num_measured_lags;
            let out_row = frame_idx * num_resampled_lags..(frame_idx + 1) * num_resampled_lags;
            self.nccf_resampler
                .resample_row(&nccf_pitch[in_row.clone()], &mut nccf_pitch_resampled[out_row.clone()]);
            self.nccf_resampler
                .resample_row(&nccf_pov[in_row], &mut nccf_pov_resampled[out_row]);
        }

        for frame_idx in 0..num_new_frames {
            let row = frame_idx * num_resampled_lags..(frame_idx + 1) * num_resampled_lags;
            let mut cur_info = FrameInfo::new(num_resampled_lags);
            cur_info.set_nccf_pov(&nccf_pov_resampled[row.clone()]);
            cur_info.compute_backtraces(
                &self.config,
                &nccf_pitch_resampled[row],
                &self.lags,
                &self.forward_cost,
                &mut self.index_info,
                &mut self.forward_cost_scratch,
            );
            std::mem::swap(&mut self.forward_cost, &mut self.forward_cost_scratch);
            // Renormalize so the smallest forward cost is zero, for
            // numerical accuracy in single precision.
            let remainder = self
                .forward_cost
                .iter()
                .fold(f32::INFINITY, |acc, &c| acc.min(c));
            self.forward_cost_remainder += remainder as f64;
            for cost in &mut self.forward_cost {
                *cost -= remainder;
            }
            self.frame_info.push(cur_info);
        }

        self.update_remainder(&downsampled_wave);

        // Trace back from the current best final state.
        let best_final_state = self
            .forward_cost
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).expect("NaN in forward cost"))
            .map(|(i, _)| i)
            .expect("forward cost is never empty");
        self.lag_nccf.resize(self.frame_info.len() - 1, (0, 0.0));
        set_best_state(&mut self.frame_info, best_final_state, &mut self.lag_nccf);
        self.frames_latency = compute_latency(&self.frame_info, self.config.max_frames_latency);
        tracing::trace!("pitch traceback latency is {}", self.frames_latency);
    }

    /// How many frames the first `num_downsampled_samples` samples
    /// support: a frame needs its window plus the largest measured lag.
    fn num_frames_available(&self, num_downsampled_samples: u64) -> usize {
        let frame_shift = self.config.nccf_window_shift() as u64;
        let full_frame_length = (self.config.nccf_window_size() + self.nccf_last_lag) as u64;
        if num_downsampled_samples < full_frame_length {
            0
        } else {
            (((num_downsampled_samples - full_frame_length) / frame_shift) + 1) as usize
        }
    }

    /// Copy the frame starting at absolute sample `sample_index` into
    /// `window`, stitching the saved remainder and the current chunk
    /// together when the frame straddles the boundary, then apply
    /// pre-emphasis if configured.
    fn extract_frame(&self, downsampled_wave: &[f32], sample_index: u64, window: &mut [f32]) {
        let full_frame_length = window.len();
        let offset = sample_index as i64 - self.downsampled_samples_processed as i64;

        if offset >= 0 {
            // Frame fully inside the new part of the signal.
            let offset = offset as usize;
            window.copy_from_slice(&downsampled_wave[offset..offset + full_frame_length]);
        } else {
            // Partly in the remainder, partly in the new part.
            let remainder_offset = self.downsampled_signal_remainder.len() as i64 + offset;
            assert!(remainder_offset >= 0, "not enough remainder was kept");
            assert!(
                offset + full_frame_length as i64 > 0,
                "frame should have been processed last call"
            );
            let remainder_offset = remainder_offset as usize;
            let old_length = (-offset) as usize;
            let new_length = full_frame_length - old_length;
            window[..old_length].copy_from_slice(
                &self.downsampled_signal_remainder[remainder_offset..remainder_offset + old_length],
            );
            window[old_length..].copy_from_slice(&downsampled_wave[..new_length]);
        }

        if self.config.preemph_coeff != 0.0 {
            let preemph_coeff = self.config.preemph_coeff;
            for i in (1..window.len()).rev() {
                window[i] -= preemph_coeff * window[i - 1];
            }
            window[0] *= 1.0 - preemph_coeff;
        }
    }

    /// Fold the chunk into the running signal statistics and save the
    /// tail that the next frame will still need. Called at the end of
    /// every `accept_waveform`.
    fn update_remainder(&mut self, downsampled_wave: &[f32]) {
        // One extra element in frame_info for frame −1.
        let num_frames = (self.frame_info.len() - 1) as u64;
        let next_frame = num_frames;
        let frame_shift = self.config.nccf_window_shift() as u64;
        // First sample the next (unprocessed) frame will need.
        let next_frame_sample = frame_shift * next_frame;

        // Sample-by-sample accumulation: the totals are then independent
        // of how the input was chunked.
        for &x in downsampled_wave {
            self.signal_sumsq += x as f64 * x as f64;
            self.signal_sum += x as f64;
        }

        let next_downsampled_samples_processed =
            self.downsampled_samples_processed + downsampled_wave.len() as u64;

        if next_frame_sample > next_downsampled_samples_processed {
            // Only possible in the weird case that the full frame length
            // is less than the frame shift.
            let full_frame_length = self.config.nccf_window_size() + self.nccf_last_lag;
            assert!(
                full_frame_length < frame_shift as usize,
                "code error: remainder starts past the end of the signal"
            );
            self.downsampled_signal_remainder.clear();
        } else {
            let mut new_remainder =
                vec![0.0f32; (next_downsampled_samples_processed - next_frame_sample) as usize];
            // i is an absolute index into the whole downsampled signal.
            for i in next_frame_sample..next_downsampled_samples_processed {
                let value = if i >= self.downsampled_samples_processed {
                    // In the current chunk.
                    downsampled_wave[(i - self.downsampled_samples_processed) as usize]
                } else {
                    // In the old remainder; only reached when the chunk
                    // supplied was tiny.
                    let rem_index = i as i64 + self.downsampled_signal_remainder.len() as i64
                        - self.downsampled_samples_processed as i64;
                    self.downsampled_signal_remainder[rem_index as usize]
                };
                new_remainder[(i - next_frame_sample) as usize] = value;
            }
            self.downsampled_signal_remainder = new_remainder;
        }
        self.downsampled_samples_processed = next_downsampled_samples_processed;
    }
}

/// Offline driver: run a tracker over a whole waveform and collect every
/// frame.
///
/// With `frames_per_chunk > 0` the waveform is fed in chunks of that
/// many frame shifts, reproducing online operation; 0 feeds it in one
/// call.
pub fn compute_pitch(config: &PitchConfig, wave: &[f32]) -> Vec<[f32; 2]> {
    let mut tracker = OnlinePitchTracker::new(config);
    if config.frames_per_chunk == 0 {
        tracker.accept_waveform(config.sample_rate_in, wave);
    } else {
        let samples_per_chunk = (config.frames_per_chunk as f64
            * config.sample_rate_in
            * 1.0e-3
            * config.frame_shift_ms) as usize;
        let mut offset = 0;
        while offset < wave.len() {
            let num_samples = samples_per_chunk.min(wave.len() - offset);
            tracker.accept_waveform(config.sample_rate_in, &wave[offset..offset + num_samples]);
            offset += num_samples;
        }
    }
    tracker.input_finished();
    (0..tracker.num_frames_ready())
        .map(|frame| tracker.get_frame(frame))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, rate: f64, amplitude: f64, num: usize) -> Vec<f32> {
        (0..num)
            .map(|i| (amplitude * (2.0 * PI * freq * i as f64 / rate).sin()) as f32)
            .collect()
    }

    #[test]
    fn stationary_sine_locks_to_200_hz() {
        let config = PitchConfig::default();
        let wave = sine(200.0, 16000.0, 1000.0, 32000);
        let frames = compute_pitch(&config, &wave);
        assert!(frames.len() > 150, "expected ~2s of frames, got {}", frames.len());

        let mut freqs: Vec<f32> = frames[25..].iter().map(|f| f[1]).collect();
        freqs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = freqs[freqs.len() / 2];
        assert!(
            (median - 200.0).abs() < 2.0,
            "median pitch {median} not near 200 Hz"
        );

        let high_nccf = frames[25..].iter().filter(|f| f[0] >= 0.9).count();
        assert!(
            high_nccf * 10 >= (frames.len() - 25) * 8,
            "voicing score should be high for at least 80% of frames"
        );
    }

    #[test]
    fn silence_stays_finite_and_unvoiced() {
        let config = PitchConfig::default();
        let wave = vec![0.0f32; 16000];
        let frames = compute_pitch(&config, &wave);
        assert!(!frames.is_empty());
        let low_nccf = frames.iter().filter(|f| f[0] <= 0.2).count();
        assert!(low_nccf * 10 >= frames.len() * 9);
        for f in &frames {
            assert!(f[0].is_finite() && f[1].is_finite());
            assert!(f[1] > 0.0, "pitch output must stay positive");
        }
    }

    #[test]
    fn emitted_values_stay_in_range() {
        let config = PitchConfig::default();
        let wave = sine(120.0, 16000.0, 500.0, 16000);
        let frames = compute_pitch(&config, &wave);
        for f in &frames {
            assert!(f[0].abs() <= 1.01, "nccf {} out of range", f[0]);
            assert!(f[1] >= 50.0 - 1.0 && f[1] <= 400.0 + 1.0);
        }
    }

    #[test]
    fn chunking_does_not_change_output() {
        // Chunking determinism needs the online ballast, whose
        // statistics never look ahead of the frame being computed.
        let base = PitchConfig {
            nccf_ballast_online: true,
            ..PitchConfig::default()
        };
        let wave = sine(200.0, 16000.0, 1000.0, 32000);
        let reference = compute_pitch(&base, &wave);
        assert!(!reference.is_empty());

        for frames_per_chunk in [1usize, 10, 100] {
            let config = PitchConfig {
                frames_per_chunk,
                ..base.clone()
            };
            let frames = compute_pitch(&config, &wave);
            assert_eq!(
                frames, reference,
                "chunk size {frames_per_chunk} changed the output"
            );
        }
    }

    #[test]
    fn naive_search_matches_bounded_end_to_end() {
        let wave = sine(150.0, 16000.0, 800.0, 8000);
        let fast = compute_pitch(&PitchConfig::default(), &wave);
        let naive = compute_pitch(
            &PitchConfig {
                naive_lag_search: true,
                ..PitchConfig::default()
            },
            &wave,
        );
        assert_eq!(fast, naive);
    }

    #[test]
    fn chirp_tracks_upward() {
        // Linear sweep 100 -> 300 Hz over one second.
        let rate = 16000.0;
        let num = 16000;
        let wave: Vec<f32> = (0..num)
            .map(|i| {
                let t = i as f64 / rate;
                let phase = 2.0 * PI * (100.0 * t + 100.0 * t * t);
                (1000.0 * phase.sin()) as f32
            })
            .collect();
        let frames = compute_pitch(&PitchConfig::default(), &wave);
        assert!(frames.len() > 80);

        // Median-of-5 smoothing, then compare with the instantaneous
        // frequency at the effective window center.
        let freqs: Vec<f32> = frames.iter().map(|f| f[1]).collect();
        let mut last_smoothed = 0.0f32;
        for t in 10..frames.len() - 10 {
            let mut window: Vec<f32> = freqs[t - 2..=t + 2].to_vec();
            window.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let smoothed = window[2];
            assert!(
                smoothed >= last_smoothed - 2.0,
                "smoothed pitch should be non-decreasing at frame {t}"
            );
            last_smoothed = smoothed;

            let center = t as f64 * 0.01 + 0.015;
            let truth = 100.0 + 200.0 * center;
            assert!(
                ((smoothed as f64 - truth) / truth).abs() <= 0.05,
                "frame {t}: pitch {smoothed} vs ground truth {truth:.1}"
            );
        }
    }

    #[test]
    fn frames_ready_is_monotone_and_stable() {
        let config = PitchConfig::default();
        let mut tracker = OnlinePitchTracker::new(&config);
        let wave = sine(220.0, 16000.0, 1000.0, 24000);

        let mut finalized: Vec<[f32; 2]> = Vec::new();
        let mut last_ready = 0;
        for chunk in wave.chunks(1600) {
            tracker.accept_waveform(16000.0, chunk);
            let ready = tracker.num_frames_ready();
            assert!(ready >= last_ready, "num_frames_ready went backwards");
            last_ready = ready;

            // Previously finalized frames must not change.
            for (t, expected) in finalized.iter().enumerate() {
                assert_eq!(tracker.get_frame(t), *expected);
            }
            for t in finalized.len()..ready {
                finalized.push(tracker.get_frame(t));
            }
        }
        tracker.input_finished();
        assert!(tracker.num_frames_ready() >= last_ready);
    }

    #[test]
    fn latency_is_bounded() {
        let config = PitchConfig {
            max_frames_latency: 20,
            ..PitchConfig::default()
        };
        // A reference with the latency mechanism off reports every
        // processed frame immediately.
        let reference_config = PitchConfig {
            max_frames_latency: 0,
            ..PitchConfig::default()
        };
        let mut tracker = OnlinePitchTracker::new(&config);
        let mut reference = OnlinePitchTracker::new(&reference_config);
        let wave = sine(180.0, 16000.0, 1000.0, 32000);

        for chunk in wave.chunks(800) {
            tracker.accept_waveform(16000.0, chunk);
            reference.accept_waveform(16000.0, chunk);
            let processed = reference.num_frames_ready();
            let ready = tracker.num_frames_ready();
            assert!(ready <= processed);
            assert!(
                ready + 20 >= processed,
                "latency exceeded the cap: {ready} ready of {processed}"
            );
        }
        tracker.input_finished();
        reference.input_finished();
        assert_eq!(tracker.num_frames_ready(), reference.num_frames_ready());
    }

    #[test]
    fn input_finished_releases_all_frames() {
        let config = PitchConfig::default();
        let mut tracker = OnlinePitchTracker::new(&config);
        tracker.accept_waveform(16000.0, &sine(200.0, 16000.0, 1000.0, 16000));
        tracker.input_finished();
        let ready = tracker.num_frames_ready();
        assert!(ready > 0);
        assert!(tracker.is_last_frame(ready - 1));
        assert!(!tracker.is_last_frame(0));
    }

    #[test]
    #[should_panic(expected = "does not match configured")]
    fn rejects_wrong_sample_rate() {
        let mut tracker = OnlinePitchTracker::new(&PitchConfig::default());
        tracker.accept_waveform(8000.0, &[0.0; 100]);
    }

    #[test]
    #[should_panic(expected = "not ready")]
    fn rejects_reading_unready_frame() {
        let tracker = OnlinePitchTracker::new(&PitchConfig::default());
        let _ = tracker.get_frame(0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        /// Streaming determinism: any partition of the waveform into
        /// chunks yields the same finalized frames.
        #[test]
        fn arbitrary_chunking_is_deterministic(seed in 0u64..1000, cut in 1usize..15999) {
            let config = PitchConfig {
                nccf_ballast_online: true,
                ..PitchConfig::default()
            };
            let freq = 100.0 + (seed % 250) as f64;
            let wave = sine(freq, 16000.0, 1000.0, 16000);

            let reference = compute_pitch(&config, &wave);

            let mut tracker = OnlinePitchTracker::new(&config);
            tracker.accept_waveform(16000.0, &wave[..cut]);
            tracker.accept_waveform(16000.0, &wave[cut..]);
            tracker.input_finished();

            let split: Vec<[f32; 2]> = (0..tracker.num_frames_ready())
                .map(|t| tracker.get_frame(t))
                .collect();
            prop_assert_eq!(split, reference);
        }
    }
}
