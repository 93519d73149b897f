//! Correlation kernel, NCCF, and the voicing maps.
//!
//! The normalized cross-correlation function (NCCF) is computed twice
//! per frame: once with an energy "ballast" term in the denominator
//! (used for the Viterbi lag search, where it suppresses spurious peaks
//! in low-energy regions) and once without (kept per lattice state as
//! the voicing evidence that is eventually emitted).

use crate::config::PitchConfig;

/// Dot product accumulated in `f64`.
#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum::<f64>() as f32
}

/// Compute the inner products and energy products needed for the NCCF.
///
/// For each integer lag in `first_lag..=last_lag`, writes to
/// `inner_prod[lag - first_lag]` the dot product of the window starting
/// at 0 with the window starting at `lag`, and to
/// `norm_prod[lag - first_lag]` the product `e1 * e2` of the two
/// windows' self-energies. All windows have `nccf_window_size` samples.
///
/// The mean is taken over the first `nccf_window_size` samples only and
/// subtracted from the whole of `wave`, including the shifted tail, so
/// the energy of a shifted window is not literally its mean-removed
/// energy. Downstream models were trained against this convention; it
/// must not be "fixed".
pub(crate) fn compute_correlation(
    wave: &[f32],
    first_lag: usize,
    last_lag: usize,
    nccf_window_size: usize,
    inner_prod: &mut [f32],
    norm_prod: &mut [f32],
) {
    debug_assert!(wave.len() >= nccf_window_size + last_lag);
    debug_assert_eq!(inner_prod.len(), last_lag + 1 - first_lag);
    debug_assert_eq!(norm_prod.len(), inner_prod.len());

    let mean = wave[..nccf_window_size]
        .iter()
        .map(|&x| x as f64)
        .sum::<f64>() as f32
        / nccf_window_size as f32;
    let zero_mean_wave: Vec<f32> = wave.iter().map(|&x| x - mean).collect();

    let sub_vec1 = &zero_mean_wave[..nccf_window_size];
    let e1 = dot(sub_vec1, sub_vec1);
    for lag in first_lag..=last_lag {
        let sub_vec2 = &zero_mean_wave[lag..lag + nccf_window_size];
        let e2 = dot(sub_vec2, sub_vec2);
        inner_prod[lag - first_lag] = dot(sub_vec1, sub_vec2);
        norm_prod[lag - first_lag] = e1 * e2;
    }
}

/// Turn the correlation products into the NCCF:
/// `nccf = inner / sqrt(norm + ballast)`, or 0 where the denominator is
/// 0 (which requires the numerator to be 0 as well).
///
/// # Panics
///
/// Panics if a zero denominator meets a nonzero numerator, or if any
/// NCCF value falls outside `(-1.01, 1.01)`; both indicate corrupted
/// input.
pub(crate) fn compute_nccf(
    inner_prod: &[f32],
    norm_prod: &[f32],
    nccf_ballast: f64,
    nccf_vec: &mut [f32],
) {
    assert!(inner_prod.len() == norm_prod.len() && inner_prod.len() == nccf_vec.len());
    for lag in 0..inner_prod.len() {
        let numerator = inner_prod[lag];
        let denominator = (norm_prod[lag] as f64 + nccf_ballast).sqrt() as f32;
        let nccf = if denominator != 0.0 {
            numerator / denominator
        } else {
            assert!(numerator == 0.0, "zero energy with nonzero correlation");
            0.0
        };
        assert!(
            nccf < 1.01 && nccf > -1.01,
            "NCCF out of range: {nccf} at lag index {lag}"
        );
        nccf_vec[lag] = nccf;
    }
}

/// Map an NCCF value to a probability of voicing in `[0, 1]`.
///
/// The inner expression approximates the empirical log-odds of voicing
/// as a function of `|nccf|`, hand-tuned on voicing-annotated data; the
/// constants are empirical, not derived.
pub fn nccf_to_pov(n: f32) -> f32 {
    let mut ndash = n.abs();
    if ndash > 1.0 {
        ndash = 1.0; // in case it was slightly outside [-1, 1]
    }
    let r = -5.2 + 5.4 * (7.5 * (ndash - 1.0)).exp() + 4.8 * ndash - 2.0 * (-10.0 * ndash).exp()
        + 4.2 * (20.0 * (ndash - 1.0)).exp();
    let p = 1.0 / (1.0 + (-r).exp());
    assert!(p - p == 0.0, "POV is NaN/inf for nccf {n}");
    p
}

/// Map an NCCF value to the probability-of-voicing *feature*
/// `(1.0001 - n)^0.15 - 1`.
///
/// The raw NCCF lies in `[-1, 1]` with a strong peak just below 1; this
/// nonlinearity smooths the peak out so the feature is roughly Gaussian
/// distributed.
pub fn nccf_to_pov_feature(n: f32) -> f32 {
    let n = n.clamp(-1.0, 1.0);
    let f = (1.0001 - n).powf(0.15) - 1.0;
    assert!(f - f == 0.0, "POV feature is NaN/inf for nccf {n}");
    f
}

/// Select the lags at which the NCCF is measured for the Viterbi search:
/// a geometric progression from `1/max_f0` to `1/min_f0` with ratio
/// `1 + delta_pitch`.
pub(crate) fn select_lags(config: &PitchConfig) -> Vec<f32> {
    let min_lag = 1.0 / config.max_f0;
    let max_lag = 1.0 / config.min_f0;
    let mut lags = Vec::new();
    let mut lag = min_lag;
    while lag <= max_lag {
        lags.push(lag as f32);
        lag *= 1.0 + config.delta_pitch;
    }
    lags
}

/// Local (per-frame) cost of each lattice state:
/// `1 - nccf * (1 - soft_min_f0 * lag)`.
pub(crate) fn compute_local_cost(
    nccf_pitch: &[f32],
    lags: &[f32],
    soft_min_f0: f32,
    local_cost: &mut [f32],
) {
    debug_assert!(nccf_pitch.len() == lags.len() && nccf_pitch.len() == local_cost.len());
    for i in 0..nccf_pitch.len() {
        local_cost[i] = 1.0 - nccf_pitch[i] + soft_min_f0 * lags[i] * nccf_pitch[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pov_stays_in_unit_interval() {
        for i in 0..=400 {
            let n = -2.0 + i as f32 * 0.01;
            let p = nccf_to_pov(n);
            assert!((0.0..=1.0).contains(&p), "pov({n}) = {p}");
        }
        assert!(nccf_to_pov(1.0) > 0.99);
        assert!(nccf_to_pov(0.0) < 0.01);
    }

    #[test]
    fn pov_feature_is_monotone_non_increasing() {
        let mut prev = f32::INFINITY;
        for i in 0..=200 {
            let n = -1.0 + i as f32 * 0.01;
            let f = nccf_to_pov_feature(n);
            assert!(f <= prev, "not monotone at {n}");
            prev = f;
        }
        // Essentially non-positive over [0, 1]: the 1.0001 offset leaves
        // a sliver above zero at n = 0.
        for i in 0..=100 {
            let n = i as f32 * 0.01;
            assert!(nccf_to_pov_feature(n) <= 2e-5);
        }
    }

    #[test]
    fn zero_energy_gives_zero_nccf() {
        let inner = [0.0f32; 4];
        let norm = [0.0f32; 4];
        let mut nccf = [1.0f32; 4];
        compute_nccf(&inner, &norm, 0.0, &mut nccf);
        assert_eq!(nccf, [0.0; 4]);
    }

    #[test]
    fn perfect_periodicity_gives_unit_nccf() {
        // A 25-sample period repeated: at lag 25 the windows coincide.
        let window_size = 50;
        let last_lag = 30;
        let wave: Vec<f32> = (0..window_size + last_lag)
            .map(|i| ((i % 25) as f32 - 12.0) * 0.1)
            .collect();
        let num_lags = last_lag + 1 - 20;
        let mut inner = vec![0.0; num_lags];
        let mut norm = vec![0.0; num_lags];
        compute_correlation(&wave, 20, last_lag, window_size, &mut inner, &mut norm);
        let mut nccf = vec![0.0; num_lags];
        compute_nccf(&inner, &norm, 0.0, &mut nccf);
        assert!(nccf[5] > 0.999, "nccf at the true period: {}", nccf[5]);
        assert!(nccf[0] < nccf[5]);
    }

    #[test]
    fn mean_is_taken_over_first_window_only() {
        // First window zero-mean, shifted tail with a large DC offset:
        // the tail keeps its offset after mean removal, which shows up
        // as inflated e2. This pins the documented convention.
        let window_size = 4;
        let mut wave = vec![-1.0f32, 1.0, -1.0, 1.0];
        wave.extend_from_slice(&[9.0, 11.0, 9.0, 11.0, 9.0, 11.0]);
        let mut inner = vec![0.0; 1];
        let mut norm = vec![0.0; 1];
        compute_correlation(&wave, 4, 4, window_size, &mut inner, &mut norm);
        // e1 = 4; e2 = 9^2 + 11^2 + 9^2 + 11^2 = 404, not 4.
        assert!((norm[0] - 4.0 * 404.0).abs() < 1e-3, "norm = {}", norm[0]);
    }

    #[test]
    fn lags_are_geometric_and_bounded() {
        let config = PitchConfig::default();
        let lags = select_lags(&config);
        assert!(!lags.is_empty());
        assert!((lags[0] - 1.0 / 400.0).abs() < 1e-6);
        assert!(*lags.last().unwrap() <= (1.0 / 50.0) + 1e-6);
        for pair in lags.windows(2) {
            let ratio = pair[1] / pair[0];
            assert!(
                (ratio - 1.005).abs() < 1e-4,
                "ratio {ratio} off the geometric grid"
            );
            assert!(pair[1] > pair[0]);
        }
    }
}
