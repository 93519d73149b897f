//! Pitch extraction and post-processing configuration.

/// Configuration for [`OnlinePitchTracker`](crate::OnlinePitchTracker).
///
/// All values are fixed for the lifetime of a stream.
#[derive(Debug, Clone)]
pub struct PitchConfig {
    /// Sample rate of the waveform passed to `accept_waveform`, in Hz.
    /// Must be a whole number of Hz.
    pub sample_rate_in: f64,
    /// Internal working rate the signal is downsampled to, in Hz.
    pub resample_rate: f64,
    /// Cutoff of the anti-alias lowpass used when downsampling.
    pub lowpass_cutoff: f64,
    /// Sinc support (zero crossings each side) of the downsampling filter.
    pub lowpass_filter_width: u32,
    /// Lowest pitch considered, Hz. Defines the longest candidate lag.
    pub min_f0: f64,
    /// Highest pitch considered, Hz. Defines the shortest candidate lag.
    pub max_f0: f64,
    /// Slope of the local cost versus lag; penalizes very low pitch.
    pub soft_min_f0: f64,
    /// Multiplier on the inter-frame transition cost.
    pub penalty_factor: f64,
    /// Geometric spacing of the lag grid: adjacent lags differ by a
    /// factor `1 + delta_pitch`.
    pub delta_pitch: f64,
    /// Analysis window length at the internal rate, milliseconds.
    pub frame_length_ms: f64,
    /// Analysis hop at the internal rate, milliseconds.
    pub frame_shift_ms: f64,
    /// Per-frame first-difference pre-emphasis coefficient; 0 disables.
    pub preemph_coeff: f32,
    /// Scale of the additive regularizer in the correlation denominator.
    pub nccf_ballast: f64,
    /// When true, the ballast energy statistics use only samples seen in
    /// completed calls plus the current frame; when false they also
    /// include the entire current call (the result then depends on how
    /// the input was chunked).
    pub nccf_ballast_online: bool,
    /// Sinc support of the lag-grid resampler.
    pub upsample_filter_width: u32,
    /// Cap on the number of recent frames held back while the traceback
    /// is still ambiguous. 0 means frames are never held back.
    pub max_frames_latency: usize,
    /// Chunk size, in frames, used by the offline driver
    /// [`compute_pitch`](crate::compute_pitch); 0 processes the whole
    /// waveform in one call.
    pub frames_per_chunk: usize,
    /// Use the quadratic reference search in the Viterbi update instead
    /// of the bounded one. The two must agree exactly; this exists for
    /// tests.
    pub naive_lag_search: bool,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            sample_rate_in: 16000.0,
            resample_rate: 4000.0,
            lowpass_cutoff: 1000.0,
            lowpass_filter_width: 1,
            min_f0: 50.0,
            max_f0: 400.0,
            soft_min_f0: 10.0,
            penalty_factor: 0.1,
            delta_pitch: 0.005,
            frame_length_ms: 25.0,
            frame_shift_ms: 10.0,
            preemph_coeff: 0.0,
            nccf_ballast: 7000.0,
            nccf_ballast_online: false,
            upsample_filter_width: 5,
            max_frames_latency: 20,
            frames_per_chunk: 0,
            naive_lag_search: false,
        }
    }
}

impl PitchConfig {
    /// Correlation window length in samples at the internal rate.
    pub fn nccf_window_size(&self) -> usize {
        (self.resample_rate * 1.0e-3 * self.frame_length_ms).round() as usize
    }

    /// Frame hop in samples at the internal rate.
    pub fn nccf_window_shift(&self) -> usize {
        (self.resample_rate * 1.0e-3 * self.frame_shift_ms).round() as usize
    }

    /// Validate the configuration.
    ///
    /// # Panics
    ///
    /// Panics on any invalid value; see the crate-level error policy.
    pub fn validate(&self) {
        assert!(
            self.sample_rate_in > 0.0 && self.sample_rate_in.fract() == 0.0,
            "sample_rate_in must be a positive whole number of Hz, got {}",
            self.sample_rate_in
        );
        assert!(
            self.resample_rate > 0.0 && self.resample_rate.fract() == 0.0,
            "resample_rate must be a positive whole number of Hz, got {}",
            self.resample_rate
        );
        assert!(self.min_f0 > 0.0, "min_f0 must be positive, got {}", self.min_f0);
        assert!(
            self.max_f0 > self.min_f0,
            "max_f0 ({}) must exceed min_f0 ({})",
            self.max_f0,
            self.min_f0
        );
        assert!(
            self.delta_pitch > 0.0,
            "delta_pitch must be positive, got {}",
            self.delta_pitch
        );
        assert!(
            self.nccf_window_size() > 0 && self.nccf_window_shift() > 0,
            "frame_length_ms / frame_shift_ms too small for the internal rate"
        );
    }
}

/// Configuration for the pitch feature post-processor.
#[derive(Debug, Clone)]
pub struct PostProcessConfig {
    /// Scale on the mean-normalized log pitch. The normalized log pitch
    /// has quite a small variance; scaling it up interacts better with
    /// variance flooring in early system-build stages.
    pub pitch_scale: f64,
    /// Scale on the probability-of-voicing feature column.
    pub pov_scale: f64,
    /// Scale on the delta log pitch column.
    pub delta_pitch_scale: f64,
    /// Standard deviation of the noise added to delta pitch to smear out
    /// the peaks caused by the log-pitch discretization interval.
    pub delta_pitch_noise_stddev: f64,
    /// Moving-window size, in frames, for the weighted mean subtraction.
    pub normalization_window_size: usize,
    /// Regression half-window of the delta filter.
    pub delta_window: usize,
    /// Emit the probability-of-voicing feature column.
    pub add_pov_feature: bool,
    /// Emit the mean-normalized log pitch column.
    pub add_normalized_log_pitch: bool,
    /// Emit the delta log pitch column.
    pub add_delta_pitch: bool,
    /// Emit the raw log pitch column.
    pub add_raw_log_pitch: bool,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            pitch_scale: 2.0,
            pov_scale: 2.0,
            delta_pitch_scale: 10.0,
            delta_pitch_noise_stddev: 0.005,
            normalization_window_size: 151,
            delta_window: 2,
            add_pov_feature: true,
            add_normalized_log_pitch: true,
            add_delta_pitch: true,
            add_raw_log_pitch: false,
        }
    }
}

impl PostProcessConfig {
    /// Number of feature columns produced by the enabled flags.
    pub fn dim(&self) -> usize {
        self.add_pov_feature as usize
            + self.add_normalized_log_pitch as usize
            + self.add_delta_pitch as usize
            + self.add_raw_log_pitch as usize
    }

    /// # Panics
    ///
    /// Panics if no output column is enabled or the windows are zero.
    pub fn validate(&self) {
        assert!(
            self.dim() > 0,
            "at least one of the pitch features should be chosen; \
             check the post-process pitch configuration"
        );
        assert!(
            self.normalization_window_size > 0,
            "normalization_window_size must be > 0"
        );
        assert!(self.delta_window > 0, "delta_window must be > 0");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_sizes() {
        let config = PitchConfig::default();
        assert_eq!(config.nccf_window_size(), 100);
        assert_eq!(config.nccf_window_shift(), 40);
        config.validate();
    }

    #[test]
    fn default_post_process_dim() {
        let config = PostProcessConfig::default();
        assert_eq!(config.dim(), 3);
        config.validate();
    }

    #[test]
    #[should_panic(expected = "max_f0")]
    fn rejects_inverted_pitch_range() {
        let config = PitchConfig {
            min_f0: 400.0,
            max_f0: 50.0,
            ..PitchConfig::default()
        };
        config.validate();
    }

    #[test]
    #[should_panic(expected = "delta_pitch")]
    fn rejects_nonpositive_delta_pitch() {
        let config = PitchConfig {
            delta_pitch: 0.0,
            ..PitchConfig::default()
        };
        config.validate();
    }

    #[test]
    #[should_panic(expected = "at least one")]
    fn rejects_all_flags_off() {
        let config = PostProcessConfig {
            add_pov_feature: false,
            add_normalized_log_pitch: false,
            add_delta_pitch: false,
            add_raw_log_pitch: false,
            ..PostProcessConfig::default()
        };
        config.validate();
    }
}
