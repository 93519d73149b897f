//! Pitch feature post-processing.
//!
//! Turns the tracker's raw `[nccf, pitch_hz]` frames into up to four
//! feature columns: the probability-of-voicing feature, mean-normalized
//! log pitch, delta log pitch, and raw log pitch. Normalization is a
//! weighted moving-window mean subtraction where the weight of each
//! frame is its probability of voicing, so unvoiced stretches barely
//! move the local mean.
//!
//! [`post_process_pitch`] is the batch form; [`OnlinePostProcessor`]
//! wraps a tracker and produces the same features incrementally, using
//! all accumulated context for normalization but never reading past the
//! tracker's settled frames (so traceback revisions cannot leak into
//! already-emitted features).

use pitch_dsp::{DeltaFeatures, DeltaFeaturesOptions};

use crate::config::PostProcessConfig;
use crate::nccf::{nccf_to_pov, nccf_to_pov_feature};
use crate::tracker::OnlinePitchTracker;

/// Weighted moving-window mean subtraction.
///
/// For each `t` in `frame_start..`, a window of
/// `normalization_window_size` frames is centered on `t` and shifted
/// toward the interior where centering would run past either end (and
/// truncated only when the signal is shorter than the window). The
/// output at `t` is `raw_log_pitch[t]` minus the pov-weighted mean of
/// `raw_log_pitch` over the window. Frames before `frame_start` serve
/// as context only.
///
/// The window sums are maintained incrementally: sliding by one frame
/// adds the entering index and subtracts the leaving one.
pub(crate) fn weighted_moving_window_normalize(
    normalization_window_size: usize,
    pov: &[f32],
    raw_log_pitch: &[f32],
    frame_start: usize,
) -> Vec<f32> {
    let num_frames = pov.len();
    assert_eq!(num_frames, raw_log_pitch.len());
    let mut normalized = vec![0.0f32; num_frames - frame_start];

    let mut last_window: Option<(usize, usize)> = None;
    let mut weighted_sum = 0.0f64;
    let mut pov_sum = 0.0f64;

    for t in frame_start..num_frames {
        let mut window_start = t as i64 - (normalization_window_size / 2) as i64;
        let mut window_end = window_start + normalization_window_size as i64;
        if window_start < 0 {
            window_end -= window_start;
            window_start = 0;
        }
        if window_end > num_frames as i64 {
            window_start -= window_end - num_frames as i64;
            window_end = num_frames as i64;
            if window_start < 0 {
                window_start = 0;
            }
        }
        let window_start = window_start as usize;
        let window_end = window_end as usize;

        match last_window {
            None => {
                for k in window_start..window_end {
                    weighted_sum += pov[k] as f64 * raw_log_pitch[k] as f64;
                    pov_sum += pov[k] as f64;
                }
            }
            Some((last_start, last_end)) => {
                if window_start > last_start {
                    debug_assert_eq!(window_start, last_start + 1);
                    pov_sum -= pov[last_start] as f64;
                    weighted_sum -= pov[last_start] as f64 * raw_log_pitch[last_start] as f64;
                }
                if window_end > last_end {
                    debug_assert_eq!(window_end, last_end + 1);
                    pov_sum += pov[last_end] as f64;
                    weighted_sum += pov[last_end] as f64 * raw_log_pitch[last_end] as f64;
                }
            }
        }

        debug_assert!(window_end > window_start);
        last_window = Some((window_start, window_end));
        let value = raw_log_pitch[t] - (weighted_sum / pov_sum) as f32;
        assert!(value - value == 0.0, "normalized log pitch is NaN/inf at frame {t}");
        normalized[t - frame_start] = value;
    }
    normalized
}

/// Deterministic Gaussian source for the delta-pitch dither, built from
/// the classic 69069 linear congruential generator and a Box–Muller
/// transform.
#[derive(Debug)]
struct GaussianRng {
    seed: u32,
}

impl GaussianRng {
    fn new(seed: u32) -> Self {
        Self { seed }
    }

    /// Uniform in (0, 1].
    fn next_uniform(&mut self) -> f64 {
        self.seed = self.seed.wrapping_mul(69069).wrapping_add(1);
        ((self.seed >> 8) as f64 + 1.0) / (1u32 << 24) as f64
    }

    fn next_gaussian(&mut self) -> f32 {
        let u1 = self.next_uniform();
        let u2 = self.next_uniform();
        ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
    }
}

/// Delta (time-derivative) of the log pitch, plus a small amount of
/// noise to keep the log-pitch discretization interval from showing up
/// as peaks in the delta distribution.
fn extract_delta_pitch(
    config: &PostProcessConfig,
    input: &[f32],
    rng: &mut GaussianRng,
) -> Vec<f32> {
    let delta = DeltaFeatures::new(DeltaFeaturesOptions {
        order: 1,
        window: config.delta_window,
    });
    let matrix = delta.compute(input, 1);
    debug_assert_eq!(matrix.len(), input.len() * 2);
    let mut output: Vec<f32> = (0..input.len()).map(|t| matrix[t * 2 + 1]).collect();
    if config.delta_pitch_noise_stddev != 0.0 {
        let stddev = config.delta_pitch_noise_stddev as f32;
        for value in &mut output {
            *value += stddev * rng.next_gaussian();
        }
    }
    output
}

/// Assemble the enabled feature columns for a run of frames into
/// row-major storage with `config.dim()` columns.
fn append_feature_rows(
    config: &PostProcessConfig,
    pov_feature: &[f32],
    normalized_log_pitch: &[f32],
    delta_log_pitch: &[f32],
    raw_log_pitch: &[f32],
    features: &mut Vec<f32>,
) {
    let num_frames = pov_feature.len();
    debug_assert!(
        normalized_log_pitch.len() == num_frames
            && delta_log_pitch.len() == num_frames
            && raw_log_pitch.len() == num_frames
    );
    for t in 0..num_frames {
        if config.add_pov_feature {
            features.push(pov_feature[t]);
        }
        if config.add_normalized_log_pitch {
            features.push(normalized_log_pitch[t]);
        }
        if config.add_delta_pitch {
            features.push(delta_log_pitch[t]);
        }
        if config.add_raw_log_pitch {
            features.push(raw_log_pitch[t]);
        }
    }
}

/// Batch post-processing of tracker output: one row of `config.dim()`
/// features per input frame.
///
/// # Panics
///
/// Panics if no feature column is enabled or if a non-positive pitch
/// value reaches the log.
pub fn post_process_pitch(config: &PostProcessConfig, input: &[[f32; 2]]) -> Vec<Vec<f32>> {
    config.validate();
    let num_frames = input.len();

    let mut pov = Vec::with_capacity(num_frames);
    let mut pov_feature = Vec::with_capacity(num_frames);
    let mut raw_log_pitch = Vec::with_capacity(num_frames);
    for frame in input {
        let [nccf, pitch] = *frame;
        assert!(pitch > 0.0, "non-positive pitch {pitch}");
        pov.push(nccf_to_pov(nccf));
        pov_feature.push(config.pov_scale as f32 * nccf_to_pov_feature(nccf));
        raw_log_pitch.push(pitch.ln());
    }

    let mut normalized_log_pitch = weighted_moving_window_normalize(
        config.normalization_window_size,
        &pov,
        &raw_log_pitch,
        0,
    );
    for value in &mut normalized_log_pitch {
        *value *= config.pitch_scale as f32;
    }

    let mut rng = GaussianRng::new(42);
    let mut delta_log_pitch = extract_delta_pitch(config, &raw_log_pitch, &mut rng);
    for value in &mut delta_log_pitch {
        *value *= config.delta_pitch_scale as f32;
    }

    let mut features = Vec::with_capacity(num_frames * config.dim());
    append_feature_rows(
        config,
        &pov_feature,
        &normalized_log_pitch,
        &delta_log_pitch,
        &raw_log_pitch,
        &mut features,
    );
    features.chunks(config.dim()).map(|row| row.to_vec()).collect()
}

/// Streaming post-processor wrapping an [`OnlinePitchTracker`].
///
/// Accumulates the pov and raw-log-pitch history so each newly settled
/// run of frames is normalized with the full context seen so far, then
/// appends the finished rows to an internal feature matrix. Finished
/// rows never change.
#[derive(Debug)]
pub struct OnlinePostProcessor {
    config: PostProcessConfig,
    src: OnlinePitchTracker,
    dim: usize,
    /// Rows already materialized in `features`.
    num_frames: usize,
    /// Tracker frames consumed so far.
    num_pitch_frames: usize,
    /// Accumulated probability-of-voicing context.
    pov: Vec<f32>,
    /// Accumulated raw log pitch context.
    raw_log_pitch: Vec<f32>,
    /// Row-major feature matrix, `dim` columns.
    features: Vec<f32>,
    rng: GaussianRng,
}

impl OnlinePostProcessor {
    /// # Panics
    ///
    /// Panics if no feature column is enabled.
    pub fn new(config: &PostProcessConfig, src: OnlinePitchTracker) -> Self {
        config.validate();
        Self {
            config: config.clone(),
            dim: config.dim(),
            src,
            num_frames: 0,
            num_pitch_frames: 0,
            pov: Vec::new(),
            raw_log_pitch: Vec::new(),
            features: Vec::new(),
            rng: GaussianRng::new(42),
        }
    }

    /// Number of feature columns.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Forward a chunk of audio to the underlying tracker.
    pub fn accept_waveform(&mut self, sample_rate: f64, wave: &[f32]) {
        self.src.accept_waveform(sample_rate, wave);
    }

    /// Declare the input over on the underlying tracker.
    pub fn input_finished(&mut self) {
        self.src.input_finished();
    }

    /// Number of post-processed frames ready to read.
    pub fn num_frames_ready(&mut self) -> usize {
        self.update_from_pitch();
        self.num_frames
    }

    /// Copy one finished feature row into `feat`.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is not ready or `feat` has the wrong length.
    pub fn get_frame(&mut self, frame: usize, feat: &mut [f32]) {
        self.update_from_pitch();
        assert!(frame < self.num_frames, "frame {frame} not ready");
        assert_eq!(feat.len(), self.dim, "feature buffer has wrong dimension");
        feat.copy_from_slice(&self.features[frame * self.dim..(frame + 1) * self.dim]);
    }

    /// Pull any newly settled frames from the tracker and post-process
    /// them. Reads only frames below the tracker's `num_frames_ready`,
    /// so later traceback revisions cannot affect emitted features.
    fn update_from_pitch(&mut self) {
        let new_num_pitch_frames = self.src.num_frames_ready();
        if new_num_pitch_frames <= self.num_pitch_frames {
            return;
        }

        let num_append = new_num_pitch_frames - self.num_pitch_frames;
        let mut nccf_append = Vec::with_capacity(num_append);
        let mut raw_log_pitch_append = Vec::with_capacity(num_append);
        for t in self.num_pitch_frames..new_num_pitch_frames {
            let [nccf, pitch] = self.src.get_frame(t);
            assert!(pitch > 0.0, "non-positive pitch {pitch}");
            nccf_append.push(nccf);
            raw_log_pitch_append.push(pitch.ln());
        }

        self.compute_post_pitch(&nccf_append, &raw_log_pitch_append);
        self.num_pitch_frames = new_num_pitch_frames;
    }

    /// Post-process one appended run of frames. Normalization sees the
    /// whole accumulated context; the delta filter runs over just the
    /// appended run.
    fn compute_post_pitch(&mut self, nccf_append: &[f32], raw_log_pitch_append: &[f32]) {
        let num_append = nccf_append.len();

        let mut pov_feature = Vec::with_capacity(num_append);
        for &nccf in nccf_append {
            self.pov.push(nccf_to_pov(nccf));
            pov_feature.push(self.config.pov_scale as f32 * nccf_to_pov_feature(nccf));
        }
        self.raw_log_pitch.extend_from_slice(raw_log_pitch_append);

        let mut normalized_log_pitch = weighted_moving_window_normalize(
            self.config.normalization_window_size,
            &self.pov,
            &self.raw_log_pitch,
            self.num_pitch_frames,
        );
        for value in &mut normalized_log_pitch {
            *value *= self.config.pitch_scale as f32;
        }

        let mut delta_log_pitch =
            extract_delta_pitch(&self.config, raw_log_pitch_append, &mut self.rng);
        for value in &mut delta_log_pitch {
            *value *= self.config.delta_pitch_scale as f32;
        }

        append_feature_rows(
            &self.config,
            &pov_feature,
            &normalized_log_pitch,
            &delta_log_pitch,
            raw_log_pitch_append,
            &mut self.features,
        );
        self.num_frames += num_append;
    }
}
