//! Regression-window delta features.
//!
//! Computes time derivatives of feature trajectories with the standard
//! least-squares regression kernel: the order-1 window-2 kernel is
//! `[-2, -1, 0, 1, 2] / 10`. Higher orders are built by iterated
//! convolution of that kernel with itself. Edge frames are handled by
//! clamping the frame index into range (edge replication).

/// Options for [`DeltaFeatures`].
#[derive(Debug, Clone, Copy)]
pub struct DeltaFeaturesOptions {
    /// Highest derivative order to compute (0 = just the input).
    pub order: usize,
    /// Regression half-window, in frames, per derivative order.
    pub window: usize,
}

impl Default for DeltaFeaturesOptions {
    fn default() -> Self {
        Self { order: 2, window: 2 }
    }
}

/// Delta-feature computer with precomputed regression kernels.
#[derive(Debug)]
pub struct DeltaFeatures {
    opts: DeltaFeaturesOptions,
    /// `scales[i]` is the full convolution kernel for the i-th
    /// derivative; `scales[0]` is the identity `[1]`.
    scales: Vec<Vec<f32>>,
}

impl DeltaFeatures {
    /// # Panics
    ///
    /// Panics if `window == 0` or the order is absurdly large.
    pub fn new(opts: DeltaFeaturesOptions) -> Self {
        assert!(opts.window > 0, "delta window must be > 0");
        assert!(opts.order < 1000, "unreasonable delta order {}", opts.order);

        let mut scales: Vec<Vec<f32>> = Vec::with_capacity(opts.order + 1);
        scales.push(vec![1.0]);
        for i in 1..=opts.order {
            let prev_scales = &scales[i - 1];
            let window = opts.window as i64;
            let prev_offset = (prev_scales.len() as i64 - 1) / 2;
            let cur_offset = prev_offset + window;
            let mut cur_scales = vec![0.0f32; prev_scales.len() + 2 * opts.window];

            let mut normalizer = 0.0f32;
            for j in -window..=window {
                normalizer += (j * j) as f32;
                for k in -prev_offset..=prev_offset {
                    cur_scales[(j + k + cur_offset) as usize] +=
                        j as f32 * prev_scales[(k + prev_offset) as usize];
                }
            }
            for s in &mut cur_scales {
                *s /= normalizer;
            }
            scales.push(cur_scales);
        }
        Self { opts, scales }
    }

    /// Dimension multiplier of the output (`order + 1` blocks per input
    /// column).
    pub fn output_blocks(&self) -> usize {
        self.opts.order + 1
    }

    /// Compute one output frame.
    ///
    /// `input` is row-major with `feat_dim` columns; `output_frame` must
    /// hold `feat_dim * (order + 1)` values: the input frame followed by
    /// its derivatives.
    pub fn process(&self, input: &[f32], feat_dim: usize, frame: usize, output_frame: &mut [f32]) {
        assert!(feat_dim > 0 && input.len() % feat_dim == 0, "ragged input matrix");
        let num_frames = input.len() / feat_dim;
        assert!(frame < num_frames, "frame {frame} out of range {num_frames}");
        assert_eq!(output_frame.len(), feat_dim * (self.opts.order + 1));

        output_frame.fill(0.0);
        for (i, scales) in self.scales.iter().enumerate() {
            let max_offset = (scales.len() as i64 - 1) / 2;
            let output = &mut output_frame[i * feat_dim..(i + 1) * feat_dim];
            for j in -max_offset..=max_offset {
                let offset_frame = (frame as i64 + j).clamp(0, num_frames as i64 - 1) as usize;
                let scale = scales[(j + max_offset) as usize];
                if scale != 0.0 {
                    let row = &input[offset_frame * feat_dim..(offset_frame + 1) * feat_dim];
                    for (o, &x) in output.iter_mut().zip(row.iter()) {
                        *o += scale * x;
                    }
                }
            }
        }
    }

    /// Compute all frames at once; returns a row-major matrix with
    /// `feat_dim * (order + 1)` columns.
    pub fn compute(&self, input: &[f32], feat_dim: usize) -> Vec<f32> {
        assert!(feat_dim > 0 && input.len() % feat_dim == 0, "ragged input matrix");
        let num_frames = input.len() / feat_dim;
        let out_dim = feat_dim * (self.opts.order + 1);
        let mut output = vec![0.0f32; num_frames * out_dim];
        for frame in 0..num_frames {
            self.process(
                input,
                feat_dim,
                frame,
                &mut output[frame * out_dim..(frame + 1) * out_dim],
            );
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_one_kernel() {
        let d = DeltaFeatures::new(DeltaFeaturesOptions { order: 1, window: 2 });
        assert_eq!(d.scales[1], vec![-0.2, -0.1, 0.0, 0.1, 0.2]);
    }

    #[test]
    fn ramp_has_constant_slope() {
        // f(t) = 3t: the regression derivative is exactly 3 away from
        // the clamped edges.
        let input: Vec<f32> = (0..20).map(|t| 3.0 * t as f32).collect();
        let d = DeltaFeatures::new(DeltaFeaturesOptions { order: 1, window: 2 });
        let out = d.compute(&input, 1);
        assert_eq!(out.len(), 40);
        for t in 2..18 {
            assert!((out[t * 2] - input[t]).abs() < 1e-5);
            assert!((out[t * 2 + 1] - 3.0).abs() < 1e-5, "slope at {t}");
        }
        // Edge replication shrinks the derivative at the boundaries.
        assert!(out[1] < 3.0);
    }

    #[test]
    fn constant_input_has_zero_delta() {
        let input = vec![7.0f32; 10];
        let d = DeltaFeatures::new(DeltaFeaturesOptions { order: 1, window: 2 });
        let out = d.compute(&input, 1);
        for t in 0..10 {
            assert_eq!(out[t * 2], 7.0);
            assert!(out[t * 2 + 1].abs() < 1e-6);
        }
    }

    #[test]
    #[should_panic(expected = "delta window")]
    fn rejects_zero_window() {
        let _ = DeltaFeatures::new(DeltaFeaturesOptions { order: 1, window: 0 });
    }
}
