//! Separable weighted resampling of interleaved `f32` buffers.
//!
//! Output sample `i` is centered at `(i + 0.5) * src / dst` in source
//! coordinates; the kernel is stretched by the same ratio when minifying, so
//! an odd source dimension gets the exact fractional footprint rather than a
//! nearest-neighbor pick. Source indices past the edge are clamped.

use crate::kernel::Kernel;

/// Weights of the source samples contributing to one output sample.
#[derive(Debug, Clone)]
struct Contribution {
    /// First contributing source index.
    start: usize,
    /// Normalized weights for `start..start + weights.len()`.
    weights: Vec<f32>,
}

fn contributions(src_len: u32, dst_len: u32, kernel: Kernel) -> Vec<Contribution> {
    let scale = src_len as f32 / dst_len as f32;
    let filter_scale = scale.max(1.0);
    let support = kernel.support() * filter_scale;
    let last = src_len as i64 - 1;

    (0..dst_len)
        .map(|i| {
            let center = (i as f32 + 0.5) * scale;
            let left = (center - support - 0.5).floor() as i64;
            let right = (center + support - 0.5).ceil() as i64;

            let lo = left.clamp(0, last) as usize;
            let hi = right.clamp(0, last) as usize;
            let mut weights = vec![0.0f32; hi - lo + 1];

            for j in left..=right {
                let w = match kernel {
                    Kernel::Box => box_overlap(j, center, 0.5 * filter_scale),
                    _ => kernel.weight((j as f32 + 0.5 - center) / filter_scale),
                };
                if w != 0.0 {
                    weights[j.clamp(0, last) as usize - lo] += w;
                }
            }

            let sum: f32 = weights.iter().sum();
            if sum.abs() > f32::EPSILON {
                weights.iter_mut().for_each(|w| *w /= sum);
            } else {
                // No sample under the kernel: fall back to the nearest one.
                weights.iter_mut().for_each(|w| *w = 0.0);
                let nearest = (center.floor() as i64).clamp(0, last) as usize;
                weights[nearest - lo] = 1.0;
            }

            Contribution { start: lo, weights }
        })
        .collect()
}

/// Length of source pixel `[j, j + 1)` inside `[center - half, center + half)`.
#[inline]
fn box_overlap(j: i64, center: f32, half: f32) -> f32 {
    let lo = (j as f32).max(center - half);
    let hi = (j as f32 + 1.0).min(center + half);
    (hi - lo).max(0.0)
}

/// Resample an interleaved buffer from `src_w`x`src_h` to `dst_w`x`dst_h`.
pub(crate) fn resample(
    src: &[f32],
    src_w: u32,
    src_h: u32,
    channels: usize,
    dst_w: u32,
    dst_h: u32,
    kernel: Kernel,
) -> Vec<f32> {
    debug_assert_eq!(src.len(), src_w as usize * src_h as usize * channels);

    let horizontal = contributions(src_w, dst_w, kernel);
    let vertical = contributions(src_h, dst_h, kernel);

    // Horizontal pass: src_w x src_h -> dst_w x src_h.
    let src_row = src_w as usize * channels;
    let tmp_row = dst_w as usize * channels;
    let mut tmp = vec![0.0f32; tmp_row * src_h as usize];
    for_each_row(&mut tmp, tmp_row, |y, out| {
        let row = &src[y * src_row..(y + 1) * src_row];
        for (x, contrib) in horizontal.iter().enumerate() {
            let dst = &mut out[x * channels..(x + 1) * channels];
            for (k, &w) in contrib.weights.iter().enumerate() {
                let s = (contrib.start + k) * channels;
                for c in 0..channels {
                    dst[c] += row[s + c] * w;
                }
            }
        }
    });

    // Vertical pass: dst_w x src_h -> dst_w x dst_h.
    let mut out = vec![0.0f32; tmp_row * dst_h as usize];
    for_each_row(&mut out, tmp_row, |y, dst| {
        let contrib = &vertical[y];
        for (k, &w) in contrib.weights.iter().enumerate() {
            let row = &tmp[(contrib.start + k) * tmp_row..(contrib.start + k + 1) * tmp_row];
            for (d, s) in dst.iter_mut().zip(row) {
                *d += s * w;
            }
        }
    });

    out
}

/// Run `f(row_index, row)` over disjoint rows, in parallel when enabled.
#[cfg(feature = "parallel")]
pub(crate) fn for_each_row<F>(buffer: &mut [f32], row_len: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    use rayon::prelude::*;

    buffer
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| f(y, row));
}

#[cfg(not(feature = "parallel"))]
pub(crate) fn for_each_row<F>(buffer: &mut [f32], row_len: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    buffer
        .chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| f(y, row));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_are_normalized() {
        for kernel in Kernel::ALL {
            for (src, dst) in [(8, 4), (5, 2), (3, 1), (1, 1), (7, 3)] {
                for c in contributions(src, dst, kernel) {
                    let sum: f32 = c.weights.iter().sum();
                    assert!((sum - 1.0).abs() < 1e-5, "{} {}->{}", kernel, src, dst);
                    assert!(c.start + c.weights.len() <= src as usize);
                }
            }
        }
    }

    #[test]
    fn test_box_halving_averages_pairs() {
        let src = [0.0, 1.0, 2.0, 3.0];
        let out = resample(&src, 4, 1, 1, 2, 1, Kernel::Box);
        assert_eq!(out, vec![0.5, 2.5]);
    }

    #[test]
    fn test_box_odd_footprint_is_fractional() {
        // 3 -> 1 covers all three samples equally.
        let src = [0.0, 3.0, 6.0];
        let out = resample(&src, 3, 1, 1, 1, 1, Kernel::Box);
        assert!((out[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_box_splits_straddling_pixel() {
        // 5 -> 2: pixel 2 lies half in each footprint.
        let out = resample(&[0.0, 0.0, 1.0, 0.0, 0.0], 5, 1, 1, 2, 1, Kernel::Box);
        assert!((out[0] - 0.2).abs() < 1e-6, "{:?}", out);
        assert!((out[1] - 0.2).abs() < 1e-6, "{:?}", out);

        let c = contributions(5, 2, Kernel::Box);
        assert_eq!(c[0].start, 0);
        assert_eq!(c[0].weights, vec![0.4, 0.4, 0.2]);
    }

    #[test]
    fn test_mean_preserved_for_odd_and_even_sizes() {
        for kernel in Kernel::ALL {
            for n in 3u32..=9 {
                let dst = n / 2;
                let ramp: Vec<f32> = (0..n).map(|i| (i as f32 + 0.5) / n as f32).collect();
                let out = resample(&ramp, n, 1, 1, dst, 1, kernel);

                let mean_in = ramp.iter().sum::<f32>() / n as f32;
                let mean_out = out.iter().sum::<f32>() / dst as f32;
                assert!(
                    (mean_in - mean_out).abs() < 1e-4,
                    "{} {}->{}: {} vs {}",
                    kernel,
                    n,
                    dst,
                    mean_in,
                    mean_out
                );
            }
        }
    }

    #[test]
    fn test_box_preserves_mean_of_any_signal() {
        let src = [0.9, 0.1, 0.4, 0.0, 0.7, 0.3, 0.8];
        let out = resample(&src, 7, 1, 1, 3, 1, Kernel::Box);
        let mean_in = src.iter().sum::<f32>() / 7.0;
        let mean_out = out.iter().sum::<f32>() / 3.0;
        assert!((mean_in - mean_out).abs() < 1e-5);
    }

    #[test]
    fn test_identity_when_size_unchanged() {
        let src = [0.1, 0.7, 0.3];
        for kernel in [Kernel::Box, Kernel::Bilinear, Kernel::Lanczos3] {
            let out = resample(&src, 1, 3, 1, 1, 3, kernel);
            for (a, b) in out.iter().zip(src.iter()) {
                assert!((a - b).abs() < 1e-6, "{}", kernel);
            }
        }
    }

    #[test]
    fn test_multichannel_layout() {
        // Two RGB pixels -> one.
        let src = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        let out = resample(&src, 2, 1, 3, 1, 1, Kernel::Box);
        assert_eq!(out, vec![0.5, 0.0, 0.5]);
    }
}
