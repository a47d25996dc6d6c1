use statrs::statistics::{Data, Median};

use crate::algorithm::fitting::{fit_gaussian, FitOutcome};
use crate::algorithm::peaks::{find_peaks, PROMINENCE_WLEN};
use crate::algorithm::utility::{argmin, index_range};
use crate::data::gaussian::GaussianComponent;
use crate::data::spectrum::Spectrum;
use crate::error::{FtirError, Result};

/// Relative step (percent) between successive edge means that marks the end of a flat floor.
const FLATTENING_STEP_PERCENT: f64 = 1.0;
/// Samples between these fractions of the apex height feed the tail fits.
const TAIL_FIT_FRACTION: f64 = 0.6;
/// Gap (relative to the median spacing) that splits tail samples into clusters.
const CLUSTER_GAP_FACTOR: f64 = 1.2;
/// Height, relative to the apex, at which a fitted bell bounds the window.
const TAIL_CUTOFF: f64 = 0.05;
/// Attempts per tail fit, each starting from half the previous width.
const TAIL_FIT_TRIALS: usize = 3;

/// Integration window in wavenumbers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub right: f64,
}

impl Bounds {
    pub fn new(left: f64, right: f64) -> Self {
        Bounds { left, right }
    }
}

/// Lowest sample between the two peaks of a doublet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Valley {
    pub x: f64,
    pub y: f64,
}

/// Parameters of the sub-peak split applied to single-peak bands.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplitRule {
    /// Sub-peaks need a prominence of at least (max - min) / divisor.
    pub prominence_divisor: f64,
    /// Canonical band centre, the sub-peak closest to it is kept.
    pub center: f64,
}

/// Lowest sample with wavenumber in [lo, hi].
pub fn valley_between(x: &[f64], y: &[f64], lo: f64, hi: f64) -> Option<Valley> {
    let r = index_range(x, lo, hi);
    let m = r.start + argmin(&y[r])?;
    Some(Valley { x: x[m], y: y[m] })
}

/// First k where the edge mean jumps by at least 1 % of the first edge mean.
fn first_jump(means: &[f64]) -> Option<usize> {
    let base = *means.first()?;
    means.windows(2).position(|w| {
        let step = w[1] - w[0];
        if base == 0.0 {
            step > 0.0
        } else {
            step / base * 100.0 >= FLATTENING_STEP_PERCENT
        }
    })
}

/// Moves each boundary inward past the flat floor next to the band.
///
/// From the left edge a running mean over 3, 4, ... samples is grown, from the
/// right edge over 2, 3, ... samples. The first growth step that raises the mean
/// by 1 % or more marks where the flank starts. A jump on the very first step,
/// or no jump at all, leaves that boundary where it was.
pub fn moving_average_bounds(x: &[f64], y: &[f64], bounds: Bounds) -> Bounds {
    let r = index_range(x, bounds.left, bounds.right);
    let (xx, yy) = (&x[r.clone()], &y[r]);
    let n = yy.len();
    let mut refined = bounds;
    if n < 4 {
        return refined;
    }

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for v in yy {
        prefix.push(prefix[prefix.len() - 1] + v);
    }

    let left_means: Vec<f64> = (3..n).map(|i| (prefix[i] / i as f64).abs()).collect();
    if let Some(k) = first_jump(&left_means).filter(|&k| k != 0) {
        refined.left = xx[k + 2];
    }

    let right_means: Vec<f64> = (2..n).map(|i| ((prefix[n] - prefix[n - i]) / i as f64).abs()).collect();
    if let Some(k) = first_jump(&right_means).filter(|&k| k != 0) {
        refined.right = xx[n - (k + 2)];
    }

    log::debug!(
        "moving average: [{:.1}, {:.1}] -> [{:.1}, {:.1}]",
        bounds.left, bounds.right, refined.left, refined.right
    );
    refined
}

/// The contiguous run of `idx` around the sample nearest `x_peak`.
///
/// Runs are separated wherever the spacing exceeds 1.2 times the median spacing.
fn cluster_nearest<'a>(x: &[f64], idx: &'a [usize], x_peak: f64) -> &'a [usize] {
    if idx.len() < 2 {
        return idx;
    }
    let xs: Vec<f64> = idx.iter().map(|&i| x[i]).collect();
    let gaps: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let limit = CLUSTER_GAP_FACTOR * Data::new(gaps.clone()).median();
    let distances: Vec<f64> = xs.iter().map(|v| (v - x_peak).abs()).collect();
    let nearest = argmin(&distances).unwrap_or(0);

    let start = gaps[..nearest].iter().rposition(|&g| g > limit).map_or(0, |p| p + 1);
    let end = gaps[nearest..].iter().position(|&g| g > limit).map_or(idx.len(), |p| nearest + p + 1);
    &idx[start..end]
}

/// Fits a free Gaussian to the cluster of tail samples selected by `keep`.
///
/// A fit wider than `max_sigma` is rejected and retried with half the initial
/// width, up to `TAIL_FIT_TRIALS` attempts in total.
fn fit_tail<F>(x: &[f64], y: &[f64], keep: F, x_peak: f64, initial: GaussianComponent, max_sigma: f64) -> Result<GaussianComponent>
where
    F: Fn(f64, f64) -> bool,
{
    let candidates: Vec<usize> = (0..x.len()).filter(|&i| keep(x[i], y[i])).collect();
    let cluster = cluster_nearest(x, &candidates, x_peak);
    if cluster.len() < 3 {
        return Err(FtirError::GaussianFitFailed(format!(
            "{} tail samples near {:.1} cm^-1, at least 3 required",
            cluster.len(),
            x_peak
        )));
    }
    let cx: Vec<f64> = cluster.iter().map(|&i| x[i]).collect();
    let cy: Vec<f64> = cluster.iter().map(|&i| y[i]).collect();

    let mut guess = initial;
    let mut last = String::new();
    for trial in 0..TAIL_FIT_TRIALS {
        match fit_gaussian(&cx, &cy, guess) {
            FitOutcome::Success(fit) if fit.sigma.abs() <= max_sigma => {
                log::debug!("tail fit near {:.1}: {}", x_peak, fit);
                return Ok(fit);
            }
            FitOutcome::Success(fit) => last = format!("width {:.3} exceeds the window width {:.3}", fit.sigma.abs(), max_sigma),
            FitOutcome::Failed(reason) => last = reason,
        }
        log::debug!("tail fit near {:.1}, trial {}: {}", x_peak, trial + 1, last);
        guess.sigma /= 2.0;
    }
    Err(FtirError::GaussianFitFailed(format!("tail fit near {:.1} cm^-1: {}", x_peak, last)))
}

fn check_overlap(bounds: Bounds) -> Result<Bounds> {
    if bounds.left < bounds.right {
        Ok(bounds)
    } else {
        Err(FtirError::GaussianFitFailed(format!(
            "fitted bell leaves an empty window [{:.1}, {:.1}]",
            bounds.left, bounds.right
        )))
    }
}

/// Caps the window at the 5 % width of a Gaussian fitted to the upper part of the band.
///
/// Only samples between 60 % and 100 % of `y_peak` inside the window, in the
/// cluster nearest the apex, take part in the fit. The window is only ever
/// tightened.
///
/// # Errors
///
/// `GaussianFitFailed` for fewer than three usable samples, or when no attempt
/// yields a bell narrower than the window.
pub fn gaussian_clip(x: &[f64], y: &[f64], bounds: Bounds, x_peak: f64, y_peak: f64) -> Result<Bounds> {
    let keep = |xi: f64, yi: f64| {
        bounds.left <= xi && xi <= bounds.right && TAIL_FIT_FRACTION * y_peak <= yi && yi <= y_peak
    };
    let width = bounds.right - bounds.left;
    let initial = GaussianComponent::new(x_peak, 0.5 * width, y_peak);
    let fit = fit_tail(x, y, keep, x_peak, initial, width)?;
    let half = fit.half_width_at(TAIL_CUTOFF);
    check_overlap(Bounds {
        left: bounds.left.max(fit.mu - half),
        right: bounds.right.min(fit.mu + half),
    })
}

/// Doublet version of [`gaussian_clip`]: the outer side of each peak is fitted
/// separately, using the valley between the peaks as the inner limit.
pub fn gaussian_clip_double(x: &[f64], y: &[f64], bounds: Bounds, peaks: [(f64, f64); 2]) -> Result<Bounds> {
    let [(xp0, yp0), (xp1, yp1)] = peaks;
    let valley = valley_between(x, y, xp0, xp1)
        .ok_or_else(|| FtirError::GaussianFitFailed(format!("no samples between {} and {}", xp0, xp1)))?;

    let keep_left = |xi: f64, yi: f64| {
        bounds.left <= xi && xi <= valley.x && TAIL_FIT_FRACTION * yp0 <= yi && yi <= yp0
    };
    let width = valley.x - bounds.left;
    let initial = GaussianComponent::new(xp0, 0.5 * width, yp0);
    let left_fit = fit_tail(x, y, keep_left, xp0, initial, width)?;

    let keep_right = |xi: f64, yi: f64| {
        valley.x <= xi && xi <= bounds.right && TAIL_FIT_FRACTION * yp1 <= yi && yi <= yp1 && yi >= valley.y
    };
    let width = bounds.right - valley.x;
    let initial = GaussianComponent::new(xp1, 0.5 * width, yp1);
    let right_fit = fit_tail(x, y, keep_right, xp1, initial, width)?;

    check_overlap(Bounds {
        left: bounds.left.max(left_fit.mu - left_fit.half_width_at(TAIL_CUTOFF)),
        right: bounds.right.min(right_fit.mu + right_fit.half_width_at(TAIL_CUTOFF)),
    })
}

/// Snaps each boundary to the lowest sample on its side.
///
/// The left side is everything up to `left_peak`, the right side everything
/// from `right_peak` on; for a single band both are the apex.
pub fn minimum_snap(x: &[f64], y: &[f64], bounds: Bounds, left_peak: f64, right_peak: f64) -> Bounds {
    let r = index_range(x, bounds.left, bounds.right);
    let (xx, yy) = (&x[r.clone()], &y[r]);
    let mut snapped = bounds;
    if xx.is_empty() {
        return snapped;
    }

    let left_end = xx.partition_point(|&v| v <= left_peak);
    if let Some(m) = argmin(&yy[..left_end]) {
        if yy[0] != yy[m] {
            snapped.left = xx[m];
        }
    }

    let right_start = xx.partition_point(|&v| v < right_peak);
    if let Some(m) = argmin(&yy[right_start..]).map(|m| right_start + m) {
        if yy[yy.len() - 1] != yy[m] {
            snapped.right = xx[m];
        }
    }
    snapped
}

/// Cuts a window holding several sub-peaks down to the one nearest `rule.center`.
///
/// The valleys between the kept sub-peak and its neighbours become the new
/// boundaries, which then go through [`moving_average_bounds`] again. A window
/// with a single sub-peak is returned as is.
pub fn double_peak_split(x: &[f64], y: &[f64], bounds: Bounds, rule: SplitRule) -> Bounds {
    let r = index_range(x, bounds.left, bounds.right);
    let (xx, yy) = (&x[r.clone()], &y[r]);
    if yy.len() < 3 {
        return bounds;
    }
    let (lo, hi) = yy.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let peaks = find_peaks(yy, 0.0, (hi - lo) / rule.prominence_divisor, Some(PROMINENCE_WLEN));
    if peaks.len() < 2 {
        return bounds;
    }

    let Some(k) = peaks
        .iter()
        .enumerate()
        .min_by(|a, b| (xx[a.1.index] - rule.center).abs().total_cmp(&(xx[b.1.index] - rule.center).abs()))
        .map(|(k, _)| k)
    else {
        return bounds;
    };

    let mut split = bounds;
    let lowest_between = |from: usize, to: usize| argmin(&yy[from..=to]).map(|m| xx[from + m]);
    if k > 0 {
        if let Some(v) = lowest_between(peaks[k - 1].index, peaks[k].index) {
            split.left = v;
        }
    }
    if k + 1 < peaks.len() {
        if let Some(v) = lowest_between(peaks[k].index, peaks[k + 1].index) {
            split.right = v;
        }
    }
    log::debug!(
        "{} sub-peaks, keeping {:.1}: [{:.1}, {:.1}]",
        peaks.len(), xx[peaks[k].index], split.left, split.right
    );
    moving_average_bounds(x, y, split)
}

/// Full refinement chain for a band with one apex.
///
/// Moving-average flattening, Gaussian tail clipping, minimum snap and a
/// second flattening pass, followed by the sub-peak split when `split` is given.
pub fn refine_single(spectrum: &Spectrum, coarse: Bounds, x_peak: f64, y_peak: f64, split: Option<SplitRule>) -> Result<Bounds> {
    let (x, y) = (spectrum.x(), spectrum.y());
    let bounds = moving_average_bounds(x, y, coarse);
    let bounds = gaussian_clip(x, y, bounds, x_peak, y_peak)?;
    let bounds = minimum_snap(x, y, bounds, x_peak, x_peak);
    let bounds = moving_average_bounds(x, y, bounds);
    Ok(match split {
        Some(rule) => double_peak_split(x, y, bounds, rule),
        None => bounds,
    })
}

/// Full refinement chain for a doublet, `peaks` sorted by wavenumber.
///
/// Returns the window together with the valley between the two apexes.
pub fn refine_double(spectrum: &Spectrum, coarse: Bounds, peaks: [(f64, f64); 2]) -> Result<(Bounds, Valley)> {
    let (x, y) = (spectrum.x(), spectrum.y());
    let bounds = moving_average_bounds(x, y, coarse);
    let bounds = gaussian_clip_double(x, y, bounds, peaks)?;
    let bounds = minimum_snap(x, y, bounds, peaks[0].0, peaks[1].0);
    let bounds = moving_average_bounds(x, y, bounds);
    let valley = valley_between(x, y, peaks[0].0, peaks[1].0)
        .ok_or_else(|| FtirError::GaussianFitFailed("doublet without samples between its peaks".to_string()))?;
    Ok((bounds, valley))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tent() -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..=40).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| (1.0 - (v - 25.0).abs() / 10.0).max(0.0)).collect();
        (x, y)
    }

    fn bells(components: &[GaussianComponent], lo: f64, hi: f64) -> Spectrum {
        let x: Vec<f64> = (0..=((hi - lo) as usize)).map(|i| lo + i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| components.iter().map(|g| g.value(v)).sum()).collect();
        Spectrum::new(x, y).unwrap()
    }

    #[test]
    fn test_moving_average_trims_flat_floor() {
        let (x, y) = tent();
        let refined = moving_average_bounds(&x, &y, Bounds::new(0.0, 40.0));
        assert_eq!(refined, Bounds::new(15.0, 35.0));
    }

    #[test]
    fn test_moving_average_keeps_unflattened_right_edge() {
        let x: Vec<f64> = (0..=20).map(|i| 1000.0 + i as f64).collect();
        let y: Vec<f64> = (0..=20).map(|i| 20.0 - i as f64).collect();
        let refined = moving_average_bounds(&x, &y, Bounds::new(1000.0, 1020.0));
        assert_eq!(refined.right, 1020.0);
        assert_eq!(refined.left, 1000.0);
    }

    #[test]
    fn test_moving_average_tiny_window() {
        let x = vec![1.0, 2.0, 3.0];
        let y = vec![0.1, 0.3, 0.1];
        assert_eq!(moving_average_bounds(&x, &y, Bounds::new(1.0, 3.0)), Bounds::new(1.0, 3.0));
    }

    #[test]
    fn test_gaussian_clip_tightens_only() {
        let spectrum = bells(&[GaussianComponent::new(1000.0, 5.0, 0.1)], 900.0, 1100.0);
        let (x, y) = (spectrum.x(), spectrum.y());
        let half = 5.0 * (-2.0 * TAIL_CUTOFF.ln()).sqrt();

        let clipped = gaussian_clip(x, y, Bounds::new(950.0, 1050.0), 1000.0, 0.1).unwrap();
        assert!((clipped.left - (1000.0 - half)).abs() < 1e-4);
        assert!((clipped.right - (1000.0 + half)).abs() < 1e-4);

        let clipped = gaussian_clip(x, y, Bounds::new(995.0, 1050.0), 1000.0, 0.1).unwrap();
        assert_eq!(clipped.left, 995.0);
    }

    #[test]
    fn test_gaussian_clip_rejects_flat_top() {
        // a plateau only fits a bell far wider than the window
        let x: Vec<f64> = (0..=40).map(|i| 1000.0 + i as f64).collect();
        let y = vec![0.1; x.len()];
        assert!(matches!(
            gaussian_clip(&x, &y, Bounds::new(1000.0, 1040.0), 1020.0, 0.1),
            Err(FtirError::GaussianFitFailed(_))
        ));
    }

    #[test]
    fn test_gaussian_clip_needs_three_samples() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut y = vec![0.0; 10];
        y[5] = 1.0;
        assert!(matches!(
            gaussian_clip(&x, &y, Bounds::new(0.0, 9.0), 5.0, 1.0),
            Err(FtirError::GaussianFitFailed(_))
        ));
    }

    #[test]
    fn test_cluster_nearest_splits_on_gaps() {
        let x: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let idx = vec![1, 2, 3, 10, 11, 12, 13, 20, 21];
        assert_eq!(cluster_nearest(&x, &idx, 11.6), &[10, 11, 12, 13]);
        assert_eq!(cluster_nearest(&x, &idx, 0.0), &[1, 2, 3]);
        assert_eq!(cluster_nearest(&x, &idx, 25.0), &[20, 21]);
    }

    #[test]
    fn test_minimum_snap() {
        let x: Vec<f64> = (0..=10).map(|i| i as f64).collect();
        let y = vec![0.3, 0.1, 0.2, 0.5, 1.0, 0.5, 0.2, 0.05, 0.1, 0.2, 0.3];
        let snapped = minimum_snap(&x, &y, Bounds::new(0.0, 10.0), 4.0, 4.0);
        assert_eq!(snapped, Bounds::new(1.0, 7.0));
        // boundaries already at the minima stay put
        assert_eq!(minimum_snap(&x, &y, snapped, 4.0, 4.0), snapped);
    }

    #[test]
    fn test_double_peak_split_keeps_peak_near_center() {
        let spectrum = bells(
            &[GaussianComponent::new(1670.0, 6.0, 0.05), GaussianComponent::new(1710.0, 6.0, 0.04)],
            1600.0,
            1800.0,
        );
        let rule = SplitRule { prominence_divisor: 5.0, center: 1680.0 };
        let split = double_peak_split(spectrum.x(), spectrum.y(), Bounds::new(1640.0, 1740.0), rule);
        assert_eq!(split.left, 1640.0);
        assert!(split.right > 1680.0 && split.right < 1700.0);

        let single = bells(&[GaussianComponent::new(1680.0, 6.0, 0.05)], 1600.0, 1800.0);
        let bounds = Bounds::new(1650.0, 1710.0);
        assert_eq!(double_peak_split(single.x(), single.y(), bounds, rule), bounds);
    }

    #[test]
    fn test_refine_double_brackets_doublet() {
        let spectrum = bells(
            &[GaussianComponent::new(1375.0, 8.0, 0.05), GaussianComponent::new(1460.0, 10.0, 0.08)],
            1250.0,
            1625.0,
        );
        let peaks = [(1375.0, spectrum.value_at(1375.0)), (1460.0, spectrum.value_at(1460.0))];
        let (bounds, valley) = refine_double(&spectrum, Bounds::new(1300.0, 1550.0), peaks).unwrap();
        assert!(bounds.left < 1375.0 && bounds.left >= 1300.0);
        assert!(bounds.right > 1460.0 && bounds.right <= 1550.0);
        assert!(valley.x > 1375.0 && valley.x < 1460.0);
    }

    #[test]
    fn test_refine_single_brackets_band() {
        let spectrum = bells(&[GaussianComponent::new(1030.0, 8.0, 0.02)], 900.0, 1150.0);
        let bounds = refine_single(&spectrum, Bounds::new(950.0, 1110.0), 1030.0, 0.02, None).unwrap();
        let half = 8.0 * (-2.0 * TAIL_CUTOFF.ln()).sqrt();
        assert!(bounds.left >= 1030.0 - half - 1e-6 && bounds.left < 1030.0);
        assert!(bounds.right <= 1030.0 + half + 1e-6 && bounds.right > 1030.0);
    }
}
