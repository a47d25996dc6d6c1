//! Baseline removal for absorbance curves.
//!
//! The main path is `correct_baseline`: an asymmetric least squares (ALS)
//! smoother estimates the slowly varying instrument baseline, which is
//! subtracted, and a piecewise-linear pass through the deepest points of
//! the remaining negative dips removes what curvature ALS left behind.
//!
//! # References
//! * P. H. C. Eilers, H. F. M. Boelens (2005).
//!   "Baseline correction with asymmetric least squares smoothing."
//! * B. Hofko et al. (2018), vertical shift on a reference range.

use crate::algorithm::utility::{argmin, interp_extrapolate, trapezoid};
use crate::config::AlsParams;
use crate::data::spectrum::Spectrum;
use crate::error::{FtirError, Result};

/// Shortest negative run that counts as an artifact batch, shorter ones are noise.
const MIN_ARTIFACT_RUN: usize = 4;

/// Default reference range of the Hofko shift (cm^-1).
pub const HOFKO_RANGE: (f64, f64) = (2000.0, 2500.0);

/// Symmetric pentadiagonal matrix stored by its three upper bands.
struct Pentadiagonal {
    d0: Vec<f64>,
    d1: Vec<f64>,
    d2: Vec<f64>,
}

impl Pentadiagonal {
    /// `lambda * D * D^T` for the (L x L-2) second-difference operator D.
    fn second_difference_penalty(n: usize, lambda: f64) -> Self {
        let mut m = Pentadiagonal {
            d0: vec![0.0; n],
            d1: vec![0.0; n.saturating_sub(1)],
            d2: vec![0.0; n.saturating_sub(2)],
        };
        const STENCIL: [f64; 3] = [1.0, -2.0, 1.0];
        for j in 0..n.saturating_sub(2) {
            for a in 0..3 {
                m.d0[j + a] += lambda * STENCIL[a] * STENCIL[a];
                for b in (a + 1)..3 {
                    let v = lambda * STENCIL[a] * STENCIL[b];
                    match b - a {
                        1 => m.d1[j + a] += v,
                        _ => m.d2[j + a] += v,
                    }
                }
            }
        }
        m
    }

    /// Solves `(diag(w) + self) z = rhs` with a banded LDL^T factorisation.
    fn solve_with_diagonal(&self, w: &[f64], rhs: &[f64]) -> Result<Vec<f64>> {
        let n = self.d0.len();
        let mut d = vec![0.0; n];
        let mut l1 = vec![0.0; n.saturating_sub(1)];
        let mut l2 = vec![0.0; n.saturating_sub(2)];

        for i in 0..n {
            let mut di = self.d0[i] + w[i];
            if i >= 1 {
                di -= l1[i - 1] * l1[i - 1] * d[i - 1];
            }
            if i >= 2 {
                di -= l2[i - 2] * l2[i - 2] * d[i - 2];
            }
            if !(di.is_finite() && di > 0.0) {
                return Err(FtirError::NumericalError(format!(
                    "baseline system is singular (pivot {:e} at row {})",
                    di, i
                )));
            }
            d[i] = di;

            if i + 1 < n {
                let mut v = self.d1[i];
                if i >= 1 {
                    v -= l2[i - 1] * l1[i - 1] * d[i - 1];
                }
                l1[i] = v / di;
            }
            if i + 2 < n {
                l2[i] = self.d2[i] / di;
            }
        }

        // forward: L u = rhs
        let mut z = rhs.to_vec();
        for i in 0..n {
            if i >= 1 {
                z[i] -= l1[i - 1] * z[i - 1];
            }
            if i >= 2 {
                z[i] -= l2[i - 2] * z[i - 2];
            }
        }
        for i in 0..n {
            z[i] /= d[i];
        }
        // backward: L^T z = u / d
        for i in (0..n).rev() {
            if i + 1 < n {
                z[i] -= l1[i] * z[i + 1];
            }
            if i + 2 < n {
                z[i] -= l2[i] * z[i + 2];
            }
        }
        Ok(z)
    }
}

/// Estimates the baseline of `y` by asymmetric least squares smoothing.
///
/// Runs exactly `params.iterations` reweighting passes; there is no
/// convergence test, so the output is a deterministic function of the input.
///
/// # Arguments
///
/// * `y` - Absorbance values.
/// * `params` - Smoothness `lambda`, asymmetry `ratio` and iteration count.
///
/// # Errors
///
/// `InvalidParameter` for out-of-range parameters, `NumericalError` when
/// fewer than three samples are given or the system turns out singular.
pub fn als_baseline(y: &[f64], params: &AlsParams) -> Result<Vec<f64>> {
    params.validate()?;
    let n = y.len();
    if n < 3 {
        return Err(FtirError::NumericalError(format!(
            "ALS needs at least 3 samples, got {}",
            n
        )));
    }

    let penalty = Pentadiagonal::second_difference_penalty(n, params.lambda);
    let p = params.ratio;
    let mut w = vec![1.0; n];
    let mut z = Vec::new();

    for _ in 0..params.iterations {
        let rhs: Vec<f64> = y.iter().zip(w.iter()).map(|(yy, ww)| yy * ww).collect();
        z = penalty.solve_with_diagonal(&w, &rhs)?;
        for ((wi, yi), zi) in w.iter_mut().zip(y.iter()).zip(z.iter()) {
            *wi = if yi > zi { p } else { 1.0 - p };
        }
    }

    log::debug!(
        "ALS baseline: {} points, lambda {:e}, ratio {}, {} iterations, {} points above baseline",
        n,
        params.lambda,
        p,
        params.iterations,
        w.iter().filter(|&&v| v == p).count()
    );
    Ok(z)
}

/// Maximal runs of negative samples longer than the noise limit.
fn negative_runs(y: &[f64]) -> Vec<std::ops::Range<usize>> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for (i, &v) in y.iter().enumerate() {
        match (v < 0.0, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                if i - s >= MIN_ARTIFACT_RUN {
                    runs.push(s..i);
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        if y.len() - s >= MIN_ARTIFACT_RUN {
            runs.push(s..y.len());
        }
    }
    runs
}

/// Removes residual curvature with a piecewise-linear baseline.
///
/// Anchors are the first and last wavenumber plus the deepest point of every
/// negative run longer than three samples. With fewer than two such runs only
/// the two end anchors are used. Negative values are not clamped.
pub fn anchor_linear_correction(spectrum: &Spectrum) -> Result<Spectrum> {
    let x = spectrum.x();
    let y = spectrum.y();
    let runs = negative_runs(y);

    let mut anchors: Vec<usize> = vec![0];
    if runs.len() >= 2 {
        for run in &runs {
            let deepest = run.start + argmin(&y[run.clone()]).unwrap_or(0);
            anchors.push(deepest);
        }
    }
    anchors.push(x.len() - 1);
    anchors.dedup();

    log::debug!(
        "anchor correction: {} artifact batches, anchors at {:?}",
        runs.len(),
        anchors.iter().map(|&i| x[i]).collect::<Vec<f64>>()
    );

    let ax: Vec<f64> = anchors.iter().map(|&i| x[i]).collect();
    let ay: Vec<f64> = anchors.iter().map(|&i| y[i]).collect();
    let corrected = x
        .iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| yi - interp_extrapolate(xi, &ax, &ay))
        .collect();
    spectrum.with_absorbance(corrected)
}

/// ALS baseline subtraction followed by the anchor correction.
pub fn correct_baseline(spectrum: &Spectrum, params: &AlsParams) -> Result<Spectrum> {
    let baseline = als_baseline(spectrum.y(), params)?;
    let residual = spectrum
        .y()
        .iter()
        .zip(baseline.iter())
        .map(|(y, z)| y - z)
        .collect();
    let smoothed = spectrum.with_absorbance(residual)?;
    anchor_linear_correction(&smoothed)
}

/// Shifts the curve vertically so its integral over `range` is zero.
pub fn hofko_shift(spectrum: &Spectrum, range: (f64, f64)) -> Result<Spectrum> {
    let (x, y) = spectrum.slice(range.0, range.1);
    if x.len() < 2 {
        return Err(FtirError::InvalidSpectrum(format!(
            "Hofko range [{}, {}] holds {} samples, need at least 2",
            range.0,
            range.1,
            x.len()
        )));
    }
    let c = trapezoid(x, y) / (x[x.len() - 1] - x[0]);
    spectrum.with_absorbance(spectrum.y().iter().map(|v| v - c).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(lo: f64, hi: f64, step: f64) -> Vec<f64> {
        let n = ((hi - lo) / step).round() as usize + 1;
        (0..n).map(|i| lo + step * i as f64).collect()
    }

    #[test]
    fn test_penalty_bands() {
        let m = Pentadiagonal::second_difference_penalty(5, 1.0);
        assert_eq!(m.d0, vec![1.0, 5.0, 6.0, 5.0, 1.0]);
        assert_eq!(m.d1, vec![-2.0, -4.0, -4.0, -2.0]);
        assert_eq!(m.d2, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_banded_solve_matches_identity_case() {
        // zero penalty leaves diag(w) z = rhs
        let m = Pentadiagonal::second_difference_penalty(6, 0.0);
        let z = m.solve_with_diagonal(&[2.0; 6], &[4.0; 6]).unwrap();
        assert!(z.iter().all(|v| (v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_als_recovers_linear_baseline() {
        let x = grid(600.0, 2000.0, 2.0);
        let line: Vec<f64> = x.iter().map(|v| 0.1 + 1e-4 * v).collect();
        let y: Vec<f64> = x
            .iter()
            .zip(line.iter())
            .map(|(v, b)| b + 0.2 * (-(v - 1400.0).powi(2) / 200.0).exp())
            .collect();
        let z = als_baseline(&y, &AlsParams::new(1e6, 0.01, 50)).unwrap();
        // far from the band the baseline hugs the line
        for i in [0, 50, x.len() - 50, x.len() - 1] {
            assert!((z[i] - line[i]).abs() < 5e-3, "at {}: {} vs {}", x[i], z[i], line[i]);
        }
    }

    #[test]
    fn test_als_is_deterministic() {
        let y: Vec<f64> = (0..300).map(|i| ((i as f64) * 0.05).sin() + 0.002 * i as f64).collect();
        let params = AlsParams::new(1e4, 0.05, 100);
        let a = als_baseline(&y, &params).unwrap();
        let b = als_baseline(&y, &params).unwrap();
        assert!(a.iter().zip(b.iter()).all(|(u, v)| u.to_bits() == v.to_bits()));
    }

    #[test]
    fn test_als_rejects_degenerate_input() {
        assert!(matches!(
            als_baseline(&[1.0, 2.0], &AlsParams::default()),
            Err(FtirError::NumericalError(_))
        ));
        assert!(matches!(
            als_baseline(&[1.0; 10], &AlsParams::new(1e6, 0.0, 10)),
            Err(FtirError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_anchor_correction_keeps_flat_curve() {
        let x = grid(600.0, 700.0, 1.0);
        let spectrum = Spectrum::new(x.clone(), vec![0.0; x.len()]).unwrap();
        let corrected = anchor_linear_correction(&spectrum).unwrap();
        assert!(corrected.y().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_anchor_correction_single_batch_uses_end_line() {
        let x = grid(0.0, 19.0, 1.0);
        let mut y: Vec<f64> = x.iter().map(|v| 1.0 + 0.1 * v).collect();
        for v in &mut y[5..11] {
            *v = -0.5;
        }
        let spectrum = Spectrum::new(x.clone(), y.clone()).unwrap();
        let corrected = anchor_linear_correction(&spectrum).unwrap();
        assert!(corrected.y()[0].abs() < 1e-12);
        assert!(corrected.y()[19].abs() < 1e-12);
        // the dip is left alone apart from the straight line
        assert!((corrected.y()[7] - (-0.5 - 1.7)).abs() < 1e-12);
    }

    #[test]
    fn test_anchor_correction_uses_batch_minima() {
        let x = grid(0.0, 29.0, 1.0);
        let mut y = vec![0.5; 30];
        y[0] = 0.0;
        y[29] = 0.0;
        for (i, v) in [-0.1, -0.3, -0.2, -0.1, -0.05].iter().enumerate() {
            y[5 + i] = *v;
            y[20 + i] = *v;
        }
        // short run, ignored
        y[14] = -0.2;
        y[15] = -0.2;
        let spectrum = Spectrum::new(x, y).unwrap();
        let corrected = anchor_linear_correction(&spectrum).unwrap();
        assert!(corrected.y()[6].abs() < 1e-12);
        assert!(corrected.y()[21].abs() < 1e-12);
        assert!(corrected.y()[0].abs() < 1e-12);
    }

    #[test]
    fn test_negative_runs_at_the_edge() {
        let y = vec![-1.0, -1.0, -1.0, -1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0, -1.0];
        let runs = negative_runs(&y);
        assert_eq!(runs, vec![0..4, 6..11]);
    }

    #[test]
    fn test_hofko_zeroes_reference_integral() {
        let x = grid(1900.0, 2600.0, 5.0);
        let y: Vec<f64> = x.iter().map(|v| 0.05 + 1e-5 * v).collect();
        let spectrum = Spectrum::new(x, y).unwrap();
        let shifted = hofko_shift(&spectrum, HOFKO_RANGE).unwrap();
        assert!(shifted.trapezoid(2000.0, 2500.0).abs() < 1e-10);
        assert!(hofko_shift(&spectrum, (3000.0, 4000.0)).is_err());
    }
}
