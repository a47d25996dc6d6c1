use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::algorithm::area::FunctionalGroup;
use crate::algorithm::fitting::{fit_gaussian_fixed_amplitude, FitOutcome};
use crate::algorithm::utility::{argmax, index_range, index_range_open, interp_clamped, linspace, moving_average3};
use crate::config::DeconvolutionConfig;
use crate::data::gaussian::GaussianComponent;
use crate::data::spectrum::Spectrum;
use crate::error::Result;

/// Open wavenumber interval a component centre must fall in to join a group.
fn partition_range(group: FunctionalGroup) -> (f64, f64) {
    match group {
        FunctionalGroup::Carbonyl => (1660.0, 1720.0),
        FunctionalGroup::Sulfoxide => (970.0, 1070.0),
        FunctionalGroup::Aliphatic => (1350.0, 1525.0),
    }
}

fn in_group(components: &[GaussianComponent], group: FunctionalGroup) -> impl Iterator<Item = GaussianComponent> + '_ {
    let (lo, hi) = partition_range(group);
    components.iter().copied().filter(move |g| lo < g.mu && g.mu < hi)
}

/// Gaussian decomposition of a spectrum and the indices derived from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeconvolutionResult {
    /// All accepted components, sorted by centre.
    pub components: Vec<GaussianComponent>,
    pub carbonyl: Vec<GaussianComponent>,
    pub sulfoxide: Vec<GaussianComponent>,
    pub aliphatic: Vec<GaussianComponent>,
    pub carbonyl_area: f64,
    pub sulfoxide_area: f64,
    pub aliphatic_area: f64,
    pub ico: f64,
    pub iso: f64,
    /// What is left of the cropped spectrum after all subtractions.
    pub residual: Spectrum,
}

impl DeconvolutionResult {
    /// Partitions `components` into the three bands and computes their areas.
    ///
    /// The aliphatic band takes the two highest components in (1350, 1525),
    /// carbonyl every component in (1660, 1720) and sulfoxide the highest one
    /// in (970, 1070). An empty carbonyl or sulfoxide set has area zero.
    ///
    /// # Errors
    ///
    /// `PeakNotFound` for the aliphatic band if no component falls in its range,
    /// since both indices are relative to it.
    pub fn from_components(mut components: Vec<GaussianComponent>, residual: Spectrum) -> Result<Self> {
        components.sort_by(|a, b| a.mu.total_cmp(&b.mu));

        let by_amplitude_desc = |g: &GaussianComponent| std::cmp::Reverse(OrderedFloat(g.amplitude));

        let mut aliphatic: Vec<GaussianComponent> =
            in_group(&components, FunctionalGroup::Aliphatic).sorted_by_key(by_amplitude_desc).take(2).collect();
        aliphatic.sort_by(|a, b| a.mu.total_cmp(&b.mu));
        if aliphatic.is_empty() {
            return Err(FunctionalGroup::Aliphatic.not_found());
        }
        let carbonyl: Vec<GaussianComponent> = in_group(&components, FunctionalGroup::Carbonyl).collect();
        let sulfoxide: Vec<GaussianComponent> =
            in_group(&components, FunctionalGroup::Sulfoxide).sorted_by_key(by_amplitude_desc).take(1).collect();

        let area = |set: &[GaussianComponent]| set.iter().map(GaussianComponent::area).sum::<f64>();
        let (carbonyl_area, sulfoxide_area, aliphatic_area) = (area(&carbonyl), area(&sulfoxide), area(&aliphatic));

        Ok(DeconvolutionResult {
            components,
            carbonyl,
            sulfoxide,
            aliphatic,
            carbonyl_area,
            sulfoxide_area,
            aliphatic_area,
            ico: carbonyl_area / aliphatic_area,
            iso: sulfoxide_area / aliphatic_area,
            residual,
        })
    }
}

/// Largest residual value with wavenumber in [lo, hi], `None` if the range is empty.
fn window_max(x: &[f64], residual: &[f64], (lo, hi): (f64, f64)) -> Option<f64> {
    let r = index_range(x, lo, hi);
    residual[r].iter().copied().reduce(f64::max)
}

/// Resamples the sparser side onto as many evenly spaced points as the denser one.
fn upsample(x: &[f64], y: &[f64], n: usize) -> (Vec<f64>, Vec<f64>) {
    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let dense = linspace(lo, hi, n);
    let values = dense.iter().map(|&v| interp_clamped(v, x, y)).collect();
    (dense, values)
}

/// Samples the amplitude-locked fit is run on.
///
/// The envelope around the apex `p` ends where the 3-point moving average on
/// each side stops falling away from it, or at the window edge if it never
/// does; inside it only samples above `height_fraction` of the apex are kept.
/// If one side then holds at least two samples fewer than the other it is
/// resampled to the same count.
fn fit_samples(wx: &[f64], wy: &[f64], p: usize, height_fraction: f64) -> std::result::Result<(Vec<f64>, Vec<f64>), String> {
    let right = moving_average3(&wy[p..]);
    let right_end = right
        .iter()
        .tuple_windows()
        .position(|(a, b)| b - a >= 0.0)
        .map_or(wy.len(), |j| p + j + 1);
    let left = moving_average3(&wy[..p]);
    let left_start = left.windows(2).rposition(|w| w[1] - w[0] <= 0.0).unwrap_or(0);

    let apex = wy[p];
    let (xx, yy): (Vec<f64>, Vec<f64>) = (left_start..right_end)
        .filter(|&i| wy[i] > height_fraction * apex)
        .map(|i| (wx[i], wy[i]))
        .unzip();

    let side = |keep: fn(f64, f64) -> bool| -> (Vec<f64>, Vec<f64>) {
        xx.iter().zip(yy.iter()).filter(|(v, _)| keep(**v, wx[p])).map(|(v, w)| (*v, *w)).unzip()
    };
    let (lx, ly) = side(|v, apex_x| v < apex_x);
    let (rx, ry) = side(|v, apex_x| v > apex_x);
    if lx.len().abs_diff(rx.len()) < 2 {
        return Ok((xx, yy));
    }
    if lx.is_empty() || rx.is_empty() {
        return Err(format!("no samples on one side of {:.1}", wx[p]));
    }
    let (lx, ly, rx, ry) = if lx.len() < rx.len() {
        let (dx, dy) = upsample(&lx, &ly, rx.len());
        (dx, dy, rx, ry)
    } else {
        let (dx, dy) = upsample(&rx, &ry, lx.len());
        (lx, ly, dx, dy)
    };
    let xs = lx.into_iter().chain(std::iter::once(wx[p])).chain(rx).collect();
    let ys = ly.into_iter().chain(std::iter::once(apex)).chain(ry).collect();
    Ok((xs, ys))
}

/// Centre in [mu_range.0, mu_range.1) and |sigma| below the width limit.
fn is_physical(g: &GaussianComponent, config: &DeconvolutionConfig) -> bool {
    config.mu_range.0 <= g.mu && g.mu < config.mu_range.1 && g.sigma.abs() < config.sigma_limit
}

/// Fits the highest residual peak in the open interval `window` and subtracts it.
///
/// The amplitude is locked to the apex sample and only (mu, sigma) are fitted.
/// A fit whose centre leaves `mu_range` or whose width reaches `sigma_limit` is
/// retried with half the initial width. On success the bell is subtracted from
/// the whole residual, negatives are clamped to zero and the component (with
/// |sigma|) is returned; on failure the residual is left untouched.
pub fn fit_biggest_peak(x: &[f64], residual: &mut [f64], window: (f64, f64), config: &DeconvolutionConfig) -> FitOutcome {
    let r = index_range_open(x, window.0, window.1);
    let (wx, wy) = (&x[r.clone()], &residual[r]);
    let Some(p) = argmax(wy) else {
        return FitOutcome::Failed(format!("no samples in ({}, {})", window.0, window.1));
    };
    if wy[p] <= 0.0 {
        return FitOutcome::Failed(format!("no positive residual in ({}, {})", window.0, window.1));
    }
    let (xx, yy) = match fit_samples(wx, wy, p, config.fit_height_fraction) {
        Ok(samples) if samples.0.len() >= 2 => samples,
        Ok(_) => return FitOutcome::Failed(format!("too few positive samples around {:.1}", wx[p])),
        Err(reason) => return FitOutcome::Failed(reason),
    };

    let amplitude = wy[p];
    let mu0 = wx[p];
    let mut sigma0 = 0.5 * (xx[xx.len() - 1] - xx[0]);
    let mut component = None;
    for trial in 0..config.fit_retries {
        match fit_gaussian_fixed_amplitude(&xx, &yy, amplitude, mu0, sigma0) {
            FitOutcome::Success(g) if is_physical(&g, config) => {
                component = Some(GaussianComponent::new(g.mu, g.sigma.abs(), g.amplitude));
                break;
            }
            FitOutcome::Success(g) => log::warn!("trial {}: rejected {} for apex at {:.1}", trial + 1, g, mu0),
            FitOutcome::Failed(reason) => log::warn!("trial {}: fit at {:.1} failed: {}", trial + 1, mu0, reason),
        }
        sigma0 /= 2.0;
    }
    let Some(component) = component else {
        return FitOutcome::Failed(format!("{} trials at {:.1} gave no valid component", config.fit_retries, mu0));
    };

    for (v, &xi) in residual.iter_mut().zip(x.iter()) {
        *v = (*v - component.value(xi)).max(0.0);
    }
    FitOutcome::Success(component)
}

/// Greedy Gaussian decomposition of a baseline-corrected, normalized spectrum.
///
/// # Description
///
/// The spectrum is cropped to the working region and the biggest peak of the
/// residual inside the general window is fitted and subtracted until either the
/// residual there drops below the general threshold or a fit fails. The
/// carbonyl window is then searched with its lower threshold, after which the
/// general window shrinks and the general search resumes. The run ends once
/// the general search has converged and a carbonyl phase has completed.
///
/// # Example
///
/// ```rust
/// # use ftircore::algorithm::deconvolution::deconvolve;
/// # use ftircore::config::DeconvolutionConfig;
/// # use ftircore::synthetic::SyntheticSpectrum;
/// let spectrum = SyntheticSpectrum::new(600.0, 2000.0, 1.0)
///     .with_band(1030.0, 8.0, 0.02)
///     .with_band(1400.0, 10.0, 0.05)
///     .build()
///     .unwrap();
/// let result = deconvolve(&spectrum, &DeconvolutionConfig::default()).unwrap();
/// assert_eq!(result.components.len(), 2);
/// assert!((result.iso - 0.32).abs() < 0.001);
/// ```
pub fn deconvolve(spectrum: &Spectrum, config: &DeconvolutionConfig) -> Result<DeconvolutionResult> {
    config.validate()?;
    let cropped = spectrum.window(config.working_region.0, config.working_region.1)?;
    let x = cropped.x();
    let mut residual = cropped.y().to_vec();
    let mut components: Vec<GaussianComponent> = Vec::new();

    let mut general = config.general_window;
    let mut general_converged = false;
    let mut carbonyl_done = false;

    loop {
        if !general_converged && window_max(x, &residual, general).map_or(true, |m| m < config.general_threshold) {
            log::info!("general search converged in [{}, {}] after {} components", general.0, general.1, components.len());
            general_converged = true;
        }
        if general_converged && carbonyl_done {
            break;
        }
        if components.len() >= config.max_components {
            log::warn!("stopping at the limit of {} components", config.max_components);
            break;
        }

        if !general_converged {
            match fit_biggest_peak(x, &mut residual, general, config) {
                FitOutcome::Success(g) => {
                    log::debug!("component {}: {}", components.len() + 1, g);
                    components.push(g);
                    continue;
                }
                FitOutcome::Failed(reason) => log::info!("general search stopped: {}", reason),
            }
        }

        log::info!("searching carbonyl window [{}, {}]", config.carbonyl_window.0, config.carbonyl_window.1);
        while components.len() < config.max_components
            && window_max(x, &residual, config.carbonyl_window).is_some_and(|m| m >= config.carbonyl_threshold)
        {
            match fit_biggest_peak(x, &mut residual, config.carbonyl_window, config) {
                FitOutcome::Success(g) => {
                    log::debug!("carbonyl component {}: {}", components.len() + 1, g);
                    components.push(g);
                }
                FitOutcome::Failed(reason) => {
                    log::debug!("carbonyl search stopped: {}", reason);
                    break;
                }
            }
        }
        carbonyl_done = true;
        general = (general.0 + config.general_shrink, general.1 - config.general_shrink);
    }

    let residual = cropped.with_absorbance(residual)?;
    DeconvolutionResult::from_components(components, residual)
}
