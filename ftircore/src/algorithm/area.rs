use std::fmt::{Display, Formatter};

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::algorithm::boundary::{refine_double, refine_single, Bounds, SplitRule, Valley};
use crate::algorithm::peaks::{locate_peaks, PeakList};
use crate::algorithm::utility::{argmax, trapezoid};
use crate::data::spectrum::Spectrum;
use crate::error::{FtirError, Result};

/// Absorption bands used for the aging indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionalGroup {
    /// C=O stretch around 1680 cm^-1.
    Carbonyl,
    /// S=O stretch around 1030 cm^-1.
    Sulfoxide,
    /// CH2/CH3 bending doublet around 1376 and 1460 cm^-1, the reference band.
    Aliphatic,
}

impl FunctionalGroup {
    pub const ALL: [FunctionalGroup; 3] = [FunctionalGroup::Carbonyl, FunctionalGroup::Sulfoxide, FunctionalGroup::Aliphatic];

    /// Wavenumber range searched for the band apex.
    pub fn search_range(&self) -> (f64, f64) {
        match self {
            FunctionalGroup::Carbonyl => (1620.0, 1800.0),
            FunctionalGroup::Sulfoxide => (970.0, 1070.0),
            FunctionalGroup::Aliphatic => (1350.0, 1525.0),
        }
    }

    /// Canonical band centre, the doublet has none.
    pub fn center(&self) -> Option<f64> {
        match self {
            FunctionalGroup::Carbonyl => Some(1680.0),
            FunctionalGroup::Sulfoxide => Some(1030.0),
            FunctionalGroup::Aliphatic => None,
        }
    }

    /// Default integration window offered when the band cannot be located.
    pub fn fallback_window(&self) -> (f64, f64) {
        match self {
            FunctionalGroup::Carbonyl => (1670.0, 1690.0),
            FunctionalGroup::Sulfoxide => (1020.0, 1040.0),
            FunctionalGroup::Aliphatic => (1350.0, 1450.0),
        }
    }

    /// Sub-peak split applied after boundary refinement, if any.
    pub fn split_rule(&self) -> Option<SplitRule> {
        match self {
            FunctionalGroup::Carbonyl => Some(SplitRule { prominence_divisor: 5.0, center: 1680.0 }),
            FunctionalGroup::Sulfoxide => Some(SplitRule { prominence_divisor: 10.0, center: 1030.0 }),
            FunctionalGroup::Aliphatic => None,
        }
    }

    pub fn not_found(&self) -> FtirError {
        let (lo, hi) = self.search_range();
        FtirError::PeakNotFound {
            group: *self,
            center: self.center().unwrap_or(0.5 * (lo + hi)),
            hint: self.fallback_window(),
        }
    }
}

impl Display for FunctionalGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FunctionalGroup::Carbonyl => "Carbonyl",
            FunctionalGroup::Sulfoxide => "Sulfoxide",
            FunctionalGroup::Aliphatic => "Aliphatic",
        };
        write!(f, "{}", name)
    }
}

/// Integrated band with the samples it was computed from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionalGroupResult {
    pub group: FunctionalGroup,
    pub area_baseline: f64,
    pub area_tangential: f64,
    /// Wavenumbers inside the integration window.
    pub x_values: Vec<f64>,
    /// Absorbances inside the integration window.
    pub y_values: Vec<f64>,
    /// One apex, or two for the aliphatic doublet.
    pub x_peak: Vec<f64>,
    pub y_peak: Vec<f64>,
    pub window: (f64, f64),
}

/// The four ratio indices plus the group results behind them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub ico_baseline: f64,
    pub ico_tangential: f64,
    pub iso_baseline: f64,
    pub iso_tangential: f64,
    pub carbonyl: FunctionalGroupResult,
    pub sulfoxide: FunctionalGroupResult,
    pub aliphatic: FunctionalGroupResult,
}

impl IndexReport {
    pub fn from_groups(carbonyl: FunctionalGroupResult, sulfoxide: FunctionalGroupResult, aliphatic: FunctionalGroupResult) -> Self {
        IndexReport {
            ico_baseline: carbonyl.area_baseline / aliphatic.area_baseline,
            ico_tangential: carbonyl.area_tangential / aliphatic.area_tangential,
            iso_baseline: sulfoxide.area_baseline / aliphatic.area_baseline,
            iso_tangential: sulfoxide.area_tangential / aliphatic.area_tangential,
            carbonyl,
            sulfoxide,
            aliphatic,
        }
    }
}

/// Baseline and tangential areas over `bounds`.
///
/// Without a valley the chord joins the two window ends; with one, each end
/// is joined to the valley and both trapezoids are removed.
fn integrate(spectrum: &Spectrum, bounds: Bounds, valley: Option<Valley>) -> Result<(f64, f64, Vec<f64>, Vec<f64>)> {
    let (x, y) = spectrum.slice(bounds.left, bounds.right);
    if x.len() < 2 {
        return Err(FtirError::NumericalError(format!(
            "integration window [{:.1}, {:.1}] holds {} samples",
            bounds.left,
            bounds.right,
            x.len()
        )));
    }
    let area_baseline = trapezoid(x, y);
    let (x0, y0, xn, yn) = (x[0], y[0], x[x.len() - 1], y[y.len() - 1]);
    let chord = match valley {
        None => (xn - x0).abs() * 0.5 * (y0 + yn),
        Some(v) => (x0 - v.x).abs() * 0.5 * (y0 + v.y) + (xn - v.x).abs() * 0.5 * (yn + v.y),
    };
    Ok((area_baseline, area_baseline - chord, x.to_vec(), y.to_vec()))
}

/// The two highest peaks, ordered by wavenumber.
fn two_highest(peaks: &PeakList) -> [(f64, f64); 2] {
    let mut top: Vec<(f64, f64)> = (0..peaks.len())
        .sorted_by_key(|&i| std::cmp::Reverse(OrderedFloat(peaks.y_peak[i])))
        .take(2)
        .map(|i| (peaks.x_peak[i], peaks.y_peak[i]))
        .collect();
    top.sort_by(|a, b| a.0.total_cmp(&b.0));
    [top[0], top[top.len() - 1]]
}

/// Locates, refines and integrates one band.
///
/// Carbonyl and sulfoxide keep the peak closest to their centre. The
/// aliphatic band uses its two highest peaks and a window spanning the bases
/// of every detected peak; with a single peak it is treated like the others.
///
/// # Errors
///
/// `PeakNotFound` when no peak qualifies in the search range,
/// `GaussianFitFailed` when boundary refinement cannot fit the band tails.
pub fn calc_group_area(spectrum: &Spectrum, group: FunctionalGroup, min_prominence: f64) -> Result<FunctionalGroupResult> {
    let (lo, hi) = group.search_range();
    let peaks = locate_peaks(spectrum, lo, hi, min_prominence);
    if peaks.is_empty() {
        return Err(group.not_found());
    }

    let (bounds, valley, x_peak, y_peak) = if group == FunctionalGroup::Aliphatic && peaks.len() > 1 {
        let doublet = two_highest(&peaks);
        let coarse = Bounds::new(
            peaks.x_left.iter().copied().fold(f64::INFINITY, f64::min),
            peaks.x_right.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        );
        let (bounds, valley) = refine_double(spectrum, coarse, doublet)?;
        (bounds, Some(valley), vec![doublet[0].0, doublet[1].0], vec![doublet[0].1, doublet[1].1])
    } else {
        let k = group.center().and_then(|c| peaks.closest_to(c)).unwrap_or(0);
        let coarse = Bounds::new(peaks.x_left[k], peaks.x_right[k]);
        let bounds = refine_single(spectrum, coarse, peaks.x_peak[k], peaks.y_peak[k], group.split_rule())?;
        (bounds, None, vec![peaks.x_peak[k]], vec![peaks.y_peak[k]])
    };

    let (area_baseline, area_tangential, x_values, y_values) = integrate(spectrum, bounds, valley)?;
    log::debug!(
        "{}: window [{:.1}, {:.1}], baseline area {:.5}, tangential area {:.5}",
        group, bounds.left, bounds.right, area_baseline, area_tangential
    );
    Ok(FunctionalGroupResult {
        group,
        area_baseline,
        area_tangential,
        x_values,
        y_values,
        x_peak,
        y_peak,
        window: (bounds.left, bounds.right),
    })
}

/// Integrates a caller-chosen window, as used for manual overrides.
///
/// The window edges snap to the nearest samples and a single end-to-end chord
/// is used for the tangential area. The reported apex is the window maximum,
/// or the two highest peaks for the aliphatic doublet.
pub fn area_over_window(spectrum: &Spectrum, group: FunctionalGroup, lo: f64, hi: f64) -> Result<FunctionalGroupResult> {
    if !(lo < hi) {
        return Err(FtirError::InvalidParameter(format!("window must satisfy lo < hi, got ({}, {})", lo, hi)));
    }
    let nearest = |v: f64| {
        spectrum
            .x()
            .iter()
            .copied()
            .min_by_key(|s| OrderedFloat((s - v).abs()))
            .unwrap_or(v)
    };
    let bounds = Bounds::new(nearest(lo), nearest(hi));
    let (area_baseline, area_tangential, x_values, y_values) = integrate(spectrum, bounds, None)?;

    let peaks = if group == FunctionalGroup::Aliphatic {
        locate_peaks(spectrum, bounds.left, bounds.right, 0.001)
    } else {
        PeakList::default()
    };
    let (x_peak, y_peak) = if peaks.len() > 1 {
        let doublet = two_highest(&peaks);
        (vec![doublet[0].0, doublet[1].0], vec![doublet[0].1, doublet[1].1])
    } else {
        let m = argmax(&y_values).unwrap_or(0);
        (vec![x_values[m]], vec![y_values[m]])
    };

    Ok(FunctionalGroupResult {
        group,
        area_baseline,
        area_tangential,
        x_values,
        y_values,
        x_peak,
        y_peak,
        window: (bounds.left, bounds.right),
    })
}

/// Carbonyl and sulfoxide indices of a baseline-corrected, normalized spectrum.
pub fn calc_indices(spectrum: &Spectrum, min_prominence: f64) -> Result<IndexReport> {
    let carbonyl = calc_group_area(spectrum, FunctionalGroup::Carbonyl, min_prominence)?;
    let sulfoxide = calc_group_area(spectrum, FunctionalGroup::Sulfoxide, min_prominence)?;
    let aliphatic = calc_group_area(spectrum, FunctionalGroup::Aliphatic, min_prominence)?;
    let report = IndexReport::from_groups(carbonyl, sulfoxide, aliphatic);
    log::info!(
        "ICO baseline {:.4} tangential {:.4}, ISO baseline {:.4} tangential {:.4}",
        report.ico_baseline, report.ico_tangential, report.iso_baseline, report.iso_tangential
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::gaussian::GaussianComponent;

    fn binder() -> Spectrum {
        let bands = [
            GaussianComponent::new(1030.0, 8.0, 0.02),
            GaussianComponent::new(1376.0, 8.0, 0.05),
            GaussianComponent::new(1460.0, 10.0, 0.08),
            GaussianComponent::new(1700.0, 9.0, 0.03),
        ];
        let x: Vec<f64> = (0..=1400).map(|i| 600.0 + i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| bands.iter().map(|g| g.value(v)).sum()).collect();
        Spectrum::new(x, y).unwrap()
    }

    #[test]
    fn test_group_metadata() {
        assert_eq!(FunctionalGroup::Sulfoxide.split_rule().map(|r| r.center), Some(1030.0));
        assert_eq!(FunctionalGroup::Aliphatic.center(), None);
        assert_eq!(FunctionalGroup::Carbonyl.to_string(), "Carbonyl");
        match FunctionalGroup::Carbonyl.not_found() {
            FtirError::PeakNotFound { center, hint, .. } => {
                assert_eq!(center, 1680.0);
                assert_eq!(hint, (1670.0, 1690.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_single_band_area() {
        let spectrum = binder();
        let result = calc_group_area(&spectrum, FunctionalGroup::Sulfoxide, 0.001).unwrap();
        assert_eq!(result.x_peak, vec![1030.0]);
        let full = 0.02 * 8.0 * (2.0 * std::f64::consts::PI).sqrt();
        // the window stops near the 5 % width, which holds about 98 % of the bell
        assert!(result.area_baseline > 0.95 * full && result.area_baseline < full);
        assert!(result.area_tangential <= result.area_baseline);
        assert!(result.window.0 < 1030.0 && result.window.1 > 1030.0);
    }

    #[test]
    fn test_doublet_area_uses_valley() {
        let spectrum = binder();
        let result = calc_group_area(&spectrum, FunctionalGroup::Aliphatic, 0.001).unwrap();
        assert_eq!(result.x_peak, vec![1376.0, 1460.0]);
        assert!(result.area_tangential < result.area_baseline);
        assert!(result.window.0 < 1376.0 && result.window.1 > 1460.0);
    }

    #[test]
    fn test_indices_and_missing_band() {
        let spectrum = binder();
        let report = calc_indices(&spectrum, 0.001).unwrap();
        assert!((report.ico_baseline - report.carbonyl.area_baseline / report.aliphatic.area_baseline).abs() < 1e-12);
        assert!(report.iso_baseline > 0.0 && report.iso_baseline < 1.0);

        let flat = Spectrum::new((0..=1400).map(|i| 600.0 + i as f64).collect(), vec![0.0; 1401]).unwrap();
        assert!(matches!(
            calc_group_area(&flat, FunctionalGroup::Carbonyl, 0.001),
            Err(FtirError::PeakNotFound { group: FunctionalGroup::Carbonyl, .. })
        ));
    }

    #[test]
    fn test_manual_window() {
        let spectrum = binder();
        let result = area_over_window(&spectrum, FunctionalGroup::Carbonyl, 1669.6, 1730.2).unwrap();
        assert_eq!(result.window, (1670.0, 1730.0));
        assert_eq!(result.x_peak, vec![1700.0]);
        assert!(result.area_tangential <= result.area_baseline);
        let aliphatic = area_over_window(&spectrum, FunctionalGroup::Aliphatic, 1350.0, 1500.0).unwrap();
        assert_eq!(aliphatic.x_peak, vec![1376.0, 1460.0]);
        assert!(area_over_window(&spectrum, FunctionalGroup::Sulfoxide, 1040.0, 1020.0).is_err());
    }
}
