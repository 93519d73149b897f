//! Per-frame Viterbi lattice over the lag grid.
//!
//! One [`FrameInfo`] exists per processed frame, plus one synthetic
//! record for frame −1 whose costs are all zero. Records are appended to
//! a `Vec` owned by the tracker; the predecessor of frame `f` is simply
//! the previous element, and all traversals toward the past are explicit
//! index loops (a linked chain of boxes would drop recursively,
//! stream-length deep).
//!
//! The transition cost between state `j` at the previous frame and state
//! `i` at this frame is `(j - i)^2 * ln(1 + delta_pitch)^2 *
//! penalty_factor`, strictly convex in `j`, so the optimal predecessor
//! `j*(i)` is monotone non-decreasing in `i`. The solver exploits this:
//! a forward pass finds lower bounds on each backpointer, then
//! alternating backward/forward passes tighten upper and lower bounds
//! until nothing changes. Convergence normally takes two or three passes
//! and is capped at one pass per state.

use crate::config::PitchConfig;
use crate::nccf::compute_local_cost;

/// One Viterbi state: the best predecessor and the ballast-free NCCF
/// kept for the eventual voicing output.
#[derive(Clone)]
struct StateInfo {
    backpointer: usize,
    pov_nccf: f32,
}

/// Lattice record for a single frame.
pub(crate) struct FrameInfo {
    state_info: Vec<StateInfo>,
    /// State index of the first entry of `state_info`; kept so absolute
    /// state indices could survive truncation of old frames. Truncation
    /// is not implemented, so this stays 0.
    state_offset: usize,
    /// The state chosen for this frame by the most recent traceback;
    /// `None` until a traceback has reached this frame.
    cur_best_state: Option<usize>,
}

impl FrameInfo {
    /// A fresh record with zero NCCF and all backpointers at state 0.
    /// Used both for frame −1 and, before its Viterbi update, for every
    /// real frame.
    pub(crate) fn new(num_states: usize) -> Self {
        Self {
            state_info: vec![
                StateInfo {
                    backpointer: 0,
                    pov_nccf: 0.0,
                };
                num_states
            ],
            state_offset: 0,
            cur_best_state: None,
        }
    }

    pub(crate) fn num_states(&self) -> usize {
        self.state_info.len()
    }

    /// Record the ballast-free NCCF for every state of this frame.
    pub(crate) fn set_nccf_pov(&mut self, nccf_pov: &[f32]) {
        assert_eq!(nccf_pov.len(), self.state_info.len());
        for (state, &value) in self.state_info.iter_mut().zip(nccf_pov.iter()) {
            state.pov_nccf = value;
        }
    }

    /// The Viterbi update for this frame: fill in the backpointers and
    /// `this_forward_cost` from the previous frame's forward costs.
    ///
    /// `bounds` is caller-owned scratch (resized on first use) holding
    /// the per-state lower/upper backpointer bounds between refinement
    /// passes. `this_forward_cost` includes the local cost on return.
    pub(crate) fn compute_backtraces(
        &mut self,
        config: &PitchConfig,
        nccf_pitch: &[f32],
        lags: &[f32],
        prev_forward_cost: &[f32],
        bounds: &mut Vec<(usize, usize)>,
        this_forward_cost: &mut [f32],
    ) {
        let num_states = nccf_pitch.len();
        debug_assert_eq!(num_states, self.state_info.len());
        debug_assert_eq!(num_states, prev_forward_cost.len());
        debug_assert_eq!(num_states, this_forward_cost.len());

        let mut local_cost = vec![0.0f32; num_states];
        compute_local_cost(nccf_pitch, lags, config.soft_min_f0 as f32, &mut local_cost);

        let delta_pitch_sq = (1.0 + config.delta_pitch).ln().powi(2);
        let inter_frame_factor = (delta_pitch_sq * config.penalty_factor) as f32;

        let transition = |j: usize, i: usize| -> f32 {
            let d = j as i64 - i as i64;
            (d * d) as f32 * inter_frame_factor + prev_forward_cost[j]
        };

        if config.naive_lag_search {
            // Quadratic reference search, for tests.
            for i in 0..num_states {
                let mut best_cost = f32::INFINITY;
                let mut best_j = 0;
                for j in 0..num_states {
                    let this_cost = transition(j, i);
                    if this_cost < best_cost {
                        best_cost = this_cost;
                        best_j = j;
                    }
                }
                this_forward_cost[i] = best_cost;
                self.state_info[i].backpointer = best_j;
            }
        } else {
            if bounds.is_empty() {
                bounds.resize(num_states, (0, 0));
            }

            // Pass 0: walk upward, starting each search at the previous
            // state's backpointer and stopping as soon as the cost stops
            // improving. This gives the exact answer whenever the
            // backpointer sequence is non-decreasing, and a lower bound
            // otherwise.
            let mut last_backpointer = 0;
            for i in 0..num_states {
                let start_j = last_backpointer;
                let mut best_cost = transition(start_j, i);
                let mut best_j = start_j;
                for j in start_j + 1..num_states {
                    let this_cost = transition(j, i);
                    if this_cost < best_cost {
                        best_cost = this_cost;
                        best_j = j;
                    } else {
                        break; // costs stopped improving
                    }
                }
                self.state_info[i].backpointer = best_j;
                this_forward_cost[i] = best_cost;
                bounds[i] = (best_j, num_states - 1); // no meaningful upper bound yet
                last_backpointer = best_j;
            }

            // Refinement: alternate downward and upward passes,
            // tightening the upper and lower bounds respectively until a
            // full pass changes nothing. Each pass is linear in the
            // number of states.
            for iter in 0..num_states {
                let mut changed = false;
                if iter % 2 == 0 {
                    // Backward through the states, tightening upper bounds.
                    last_backpointer = num_states - 1;
                    for i in (0..num_states).rev() {
                        let lower_bound = bounds[i].0;
                        let upper_bound = bounds[i].1.min(last_backpointer);
                        if upper_bound == lower_bound {
                            last_backpointer = lower_bound;
                            continue;
                        }
                        let mut best_cost = this_forward_cost[i];
                        let mut best_j = self.state_info[i].backpointer;
                        let initial_best_j = best_j;
                        if best_j == upper_bound {
                            // Already at the bound being tightened; the
                            // lower bound's turn comes next pass.
                            last_backpointer = best_j;
                            continue;
                        }
                        // j > lower_bound + 1: lower_bound and
                        // lower_bound + 1 were already evaluated by the
                        // passes that set the bound.
                        let mut j = upper_bound;
                        while j > lower_bound + 1 {
                            let this_cost = transition(j, i);
                            if this_cost < best_cost {
                                best_cost = this_cost;
                                best_j = j;
                            } else if best_j > j {
                                break; // moved past the best; done
                            }
                            j -= 1;
                        }
                        bounds[i].1 = best_j; // now a true upper bound
                        if best_j != initial_best_j {
                            this_forward_cost[i] = best_cost;
                            self.state_info[i].backpointer = best_j;
                            changed = true;
                        }
                        last_backpointer = best_j;
                    }
                } else {
                    // Forward through the states, tightening lower bounds.
                    last_backpointer = 0;
                    for i in 0..num_states {
                        let lower_bound = bounds[i].0.max(last_backpointer);
                        let upper_bound = bounds[i].1;
                        if upper_bound == lower_bound {
                            last_backpointer = lower_bound;
                            continue;
                        }
                        let mut best_cost = this_forward_cost[i];
                        let mut best_j = self.state_info[i].backpointer;
                        let initial_best_j = best_j;
                        if best_j == lower_bound {
                            last_backpointer = best_j;
                            continue;
                        }
                        // j < upper_bound: that point was already
                        // evaluated.
                        for j in lower_bound..upper_bound.saturating_sub(1) {
                            let this_cost = transition(j, i);
                            if this_cost < best_cost {
                                best_cost = this_cost;
                                best_j = j;
                            } else if best_j < j {
                                break;
                            }
                        }
                        bounds[i].0 = best_j; // now a true lower bound
                        if best_j != initial_best_j {
                            this_forward_cost[i] = best_cost;
                            self.state_info[i].backpointer = best_j;
                            changed = true;
                        }
                        last_backpointer = best_j;
                    }
                }
                if !changed {
                    break;
                }
            }
        }

        for i in 0..num_states {
            this_forward_cost[i] += local_cost[i];
        }
    }
}

/// Trace the best path back from `best_state` at the newest frame,
/// rewriting `lag_nccf` (one entry per real frame) along the way.
///
/// Stops as soon as it reaches a frame whose recorded best state already
/// equals the proposed one: everything older was already traced through
/// that state and cannot have changed. `frames[0]` is the synthetic
/// frame −1 and gets its state updated but no emission entry.
pub(crate) fn set_best_state(
    frames: &mut [FrameInfo],
    best_state: usize,
    lag_nccf: &mut [(usize, f32)],
) {
    debug_assert_eq!(frames.len(), lag_nccf.len() + 1);
    let mut best_state = best_state;
    for f in (0..frames.len()).rev() {
        let info = &mut frames[f];
        if info.cur_best_state == Some(best_state) {
            return; // no change from here back
        }
        let state_info_index = best_state - info.state_offset;
        assert!(state_info_index < info.state_info.len());
        info.cur_best_state = Some(best_state);
        if f > 0 {
            lag_nccf[f - 1] = (best_state, info.state_info[state_info_index].pov_nccf);
        }
        best_state = info.state_info[state_info_index].backpointer;
    }
}

/// How many of the newest frames are still ambiguous: walk the two
/// extreme states back through the backpointers and count frames until
/// their images coincide (monotone backpointers squeeze every other
/// state's image in between). Capped at `max_latency`; a cap of 0 turns
/// the latency mechanism off.
pub(crate) fn compute_latency(frames: &[FrameInfo], max_latency: usize) -> usize {
    if max_latency == 0 {
        return 0;
    }
    let num_states = frames[frames.len() - 1].num_states();
    let mut min_living_state = 0;
    let mut max_living_state = num_states - 1;
    let mut latency = 0;

    for f in (0..frames.len()).rev() {
        let info = &frames[f];
        let offset = info.state_offset;
        debug_assert!(
            min_living_state >= offset && max_living_state - offset < info.state_info.len()
        );
        min_living_state = info.state_info[min_living_state - offset].backpointer;
        max_living_state = info.state_info[max_living_state - offset].backpointer;
        if min_living_state == max_living_state {
            return latency;
        }
        if f == 0 {
            break; // frame −1 is not a real frame
        }
        latency += 1;
        if latency >= max_latency {
            return latency;
        }
    }
    latency
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small deterministic generator for test inputs.
    struct Lcg(u32);
    impl Lcg {
        fn next_f32(&mut self) -> f32 {
            self.0 = self.0.wrapping_mul(69069).wrapping_add(1);
            (self.0 >> 8) as f32 / (1u32 << 24) as f32
        }
    }

    fn test_config() -> PitchConfig {
        PitchConfig::default()
    }

    fn test_lags(num_states: usize) -> Vec<f32> {
        let mut lags = Vec::with_capacity(num_states);
        let mut lag = 1.0f32 / 400.0;
        for _ in 0..num_states {
            lags.push(lag);
            lag *= 1.005;
        }
        lags
    }

    #[test]
    fn bounded_search_matches_naive() {
        let num_states = 80;
        let lags = test_lags(num_states);
        let mut rng = Lcg(12345);

        let mut prev_forward_naive = vec![0.0f32; num_states];
        let mut prev_forward_fast = vec![0.0f32; num_states];

        for _frame in 0..20 {
            let nccf: Vec<f32> = (0..num_states).map(|_| rng.next_f32() * 0.8 - 0.1).collect();

            let naive_config = PitchConfig {
                naive_lag_search: true,
                ..test_config()
            };
            let mut naive_info = FrameInfo::new(num_states);
            let mut naive_cost = vec![0.0f32; num_states];
            let mut bounds = Vec::new();
            naive_info.compute_backtraces(
                &naive_config,
                &nccf,
                &lags,
                &prev_forward_naive,
                &mut bounds,
                &mut naive_cost,
            );

            let mut fast_info = FrameInfo::new(num_states);
            let mut fast_cost = vec![0.0f32; num_states];
            let mut bounds = Vec::new();
            fast_info.compute_backtraces(
                &test_config(),
                &nccf,
                &lags,
                &prev_forward_fast,
                &mut bounds,
                &mut fast_cost,
            );

            assert_eq!(naive_cost, fast_cost, "forward costs diverged");
            for i in 0..num_states {
                assert_eq!(
                    naive_info.state_info[i].backpointer,
                    fast_info.state_info[i].backpointer,
                    "backpointer {i} diverged"
                );
            }
            prev_forward_naive = naive_cost;
            prev_forward_fast = fast_cost;
        }
    }

    #[test]
    fn backpointers_are_monotone() {
        let num_states = 60;
        let lags = test_lags(num_states);
        let mut rng = Lcg(99);
        let prev_forward: Vec<f32> = (0..num_states).map(|_| rng.next_f32()).collect();
        let nccf: Vec<f32> = (0..num_states).map(|_| rng.next_f32() * 0.5).collect();

        let mut info = FrameInfo::new(num_states);
        let mut cost = vec![0.0f32; num_states];
        let mut bounds = Vec::new();
        info.compute_backtraces(
            &test_config(),
            &nccf,
            &lags,
            &prev_forward,
            &mut bounds,
            &mut cost,
        );
        for i in 1..num_states {
            assert!(
                info.state_info[i].backpointer >= info.state_info[i - 1].backpointer,
                "backpointers must be monotone under a convex transition cost"
            );
        }
    }

    #[test]
    fn latency_zero_when_history_converges() {
        // Three states; every backpointer leads to state 1, so the two
        // sentinels meet immediately at the newest frame.
        let mut frames = vec![FrameInfo::new(3), FrameInfo::new(3)];
        for state in frames[1].state_info.iter_mut() {
            state.backpointer = 1;
        }
        assert_eq!(compute_latency(&frames, 100), 0);
        // Identity backpointers never converge: latency counts the one
        // real frame, not the synthetic frame −1.
        for (i, state) in frames[1].state_info.iter_mut().enumerate() {
            state.backpointer = i;
        }
        assert_eq!(compute_latency(&frames, 100), 1);
        assert_eq!(compute_latency(&frames, 0), 0);
    }

    #[test]
    fn traceback_early_exit_keeps_prefix() {
        // Two real frames with identity backpointers: tracing state 2
        // then state 2 again must not disturb the settled prefix.
        let num_states = 4;
        let mut frames = vec![
            FrameInfo::new(num_states),
            FrameInfo::new(num_states),
            FrameInfo::new(num_states),
        ];
        for f in 1..3 {
            for (i, state) in frames[f].state_info.iter_mut().enumerate() {
                state.backpointer = i;
                state.pov_nccf = (f * 10 + i) as f32;
            }
        }
        let mut lag_nccf = vec![(0usize, 0.0f32); 2];
        set_best_state(&mut frames, 2, &mut lag_nccf);
        assert_eq!(lag_nccf, vec![(2, 12.0), (2, 22.0)]);
        // Re-tracing the same state is a no-op.
        set_best_state(&mut frames, 2, &mut lag_nccf);
        assert_eq!(lag_nccf, vec![(2, 12.0), (2, 22.0)]);
    }
}
