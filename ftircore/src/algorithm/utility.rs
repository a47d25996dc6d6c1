use itertools::Itertools;
use ordered_float::OrderedFloat;

#[inline]
fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + t * (b - a)
}

/// Trapezoidal integral of `y` over the (possibly non-uniform) grid `x`.
///
/// # Example
///
/// ```rust
/// # use ftircore::algorithm::utility::trapezoid;
/// let area = trapezoid(&[0.0, 1.0, 2.0], &[0.0, 1.0, 0.0]);
/// assert!((area - 1.0).abs() < 1e-12);
/// ```
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.iter()
        .zip(y.iter())
        .tuple_windows()
        .map(|((x0, y0), (x1, y1))| 0.5 * (y0 + y1) * (x1 - x0))
        .sum()
}

/// Piecewise-linear interpolation of (`xp`, `fp`) at `x`, `xp` ascending.
///
/// Outside the grid the end segments are extended linearly.
pub fn interp_extrapolate(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len();
    match n {
        0 => return 0.0,
        1 => return fp[0],
        _ => {}
    }
    // segment s spans [xp[s], xp[s+1]]
    let s = match xp.partition_point(|&v| v <= x) {
        0 => 0,
        i if i >= n => n - 2,
        i => i - 1,
    };
    let dx = xp[s + 1] - xp[s];
    if dx == 0.0 {
        return fp[s];
    }
    lerp(fp[s], fp[s + 1], (x - xp[s]) / dx)
}

/// Piecewise-linear interpolation clamped to the end values, like `numpy.interp`.
pub fn interp_clamped(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    match (xp.first(), xp.last()) {
        (Some(&lo), _) if x <= lo => fp[0],
        (_, Some(&hi)) if x >= hi => fp[fp.len() - 1],
        (Some(_), Some(_)) => interp_extrapolate(x, xp, fp),
        _ => 0.0,
    }
}

/// `n` evenly spaced samples over [start, stop], both ends included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Index of the first maximum.
pub fn argmax(v: &[f64]) -> Option<usize> {
    // max_by_key returns the last maximum, so walk in reverse
    v.iter()
        .enumerate()
        .rev()
        .max_by_key(|(_, &y)| OrderedFloat(y))
        .map(|(i, _)| i)
}

/// Index of the first minimum.
pub fn argmin(v: &[f64]) -> Option<usize> {
    v.iter()
        .enumerate()
        .min_by_key(|(_, &y)| OrderedFloat(y))
        .map(|(i, _)| i)
}

/// Centered 3-point moving average in "valid" mode (output is `len - 2` long).
pub fn moving_average3(y: &[f64]) -> Vec<f64> {
    y.iter()
        .tuple_windows()
        .map(|(a, b, c)| (a + b + c) / 3.0)
        .collect()
}

/// Indices `i` with `lo <= x[i] <= hi`, as a contiguous range on an ascending grid.
pub fn index_range(x: &[f64], lo: f64, hi: f64) -> std::ops::Range<usize> {
    let start = x.partition_point(|&v| v < lo);
    let end = x.partition_point(|&v| v <= hi);
    start..end.max(start)
}

/// Indices `i` with `lo < x[i] < hi` on an ascending grid.
pub fn index_range_open(x: &[f64], lo: f64, hi: f64) -> std::ops::Range<usize> {
    let start = x.partition_point(|&v| v <= lo);
    let end = x.partition_point(|&v| v < hi);
    start..end.max(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trapezoid_non_uniform() {
        let x = vec![0.0, 1.0, 3.0];
        let y = vec![1.0, 1.0, 1.0];
        assert!((trapezoid(&x, &y) - 3.0).abs() < 1e-12);
        assert_eq!(trapezoid(&[1.0], &[5.0]), 0.0);
    }

    #[test]
    fn test_interp_extrapolates_both_ends() {
        let xp = vec![0.0, 10.0];
        let fp = vec![0.0, 1.0];
        assert!((interp_extrapolate(5.0, &xp, &fp) - 0.5).abs() < 1e-12);
        assert!((interp_extrapolate(-10.0, &xp, &fp) + 1.0).abs() < 1e-12);
        assert!((interp_extrapolate(20.0, &xp, &fp) - 2.0).abs() < 1e-12);
        assert!((interp_clamped(20.0, &xp, &fp) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_argmax_first_occurrence() {
        let v = vec![1.0, 3.0, 2.0, 3.0];
        assert_eq!(argmax(&v), Some(1));
        assert_eq!(argmin(&v), Some(0));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_index_ranges() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(index_range(&x, 2.0, 4.0), 1..4);
        assert_eq!(index_range_open(&x, 2.0, 4.0), 2..3);
        assert_eq!(index_range(&x, 10.0, 20.0).len(), 0);
    }

    #[test]
    fn test_moving_average3() {
        let v = moving_average3(&[0.0, 3.0, 6.0, 9.0]);
        assert_eq!(v, vec![3.0, 6.0]);
        assert!(moving_average3(&[1.0, 2.0]).is_empty());
    }
}
