// ============================================================
// Layer 4 — Canonical Resampler
// ============================================================
// Converts a (channels × N) segment into (channels × target_len)
// by linear interpolation in time.
//
// Timestamps:
//   duration = N / src_hz
//   source   t_j = j / src_hz                      j = 0..N
//   target   t_i = i · duration / target_len       i = 0..target_len
//
// The target grid covers [0, duration) and does NOT include the
// final instant. Target times past the last source timestamp take
// the last source value (clamped at both edges).
//
// If the segment already has target_len samples at the target
// rate it is returned unchanged.
//
// Every channel is resampled on its own; channel order is kept.

/// Rates closer than this are treated as equal.
const RATE_TOLERANCE: f64 = 1e-6;

/// Resample every channel row of `rows` to `target_len` samples.
pub fn resample_linear(
    rows:       &[Vec<f32>],
    src_hz:     f64,
    dst_hz:     f64,
    target_len: usize,
) -> Vec<Vec<f32>> {
    let n = rows.first().map(Vec::len).unwrap_or(0);

    if n == target_len && (src_hz - dst_hz).abs() < RATE_TOLERANCE {
        return rows.to_vec();
    }

    let src_hz   = src_hz.max(RATE_TOLERANCE);
    let duration = n as f64 / src_hz;

    let t_dst: Vec<f64> = (0..target_len)
        .map(|i| i as f64 * duration / target_len as f64)
        .collect();
    let t_src: Vec<f64> = (0..n).map(|j| j as f64 / src_hz).collect();

    rows.iter()
        .map(|row| t_dst.iter().map(|&t| interp(t, &t_src, row)).collect())
        .collect()
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`, clamped to
/// the edge values outside `xp`. `xp` must be increasing.
fn interp(x: f64, xp: &[f64], fp: &[f32]) -> f32 {
    let (Some(&first), Some(&last)) = (xp.first(), xp.last()) else {
        return 0.0;
    };
    if x <= first {
        return fp[0];
    }
    if x >= last {
        return fp[fp.len() - 1];
    }

    // xp[j - 1] <= x < xp[j]
    let j  = xp.partition_point(|&v| v <= x);
    let x0 = xp[j - 1];
    let x1 = xp[j];
    let y0 = fp[j - 1] as f64;
    let y1 = fp[j] as f64;

    (y0 + (y1 - y0) * (x - x0) / (x1 - x0)) as f32
}
