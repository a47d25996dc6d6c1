use serde::{Deserialize, Serialize};

use crate::data::spectrum::Spectrum;

/// Extra wavenumber range searched on each side of a window so that
/// prominences near the window edge see their true bases.
pub const SEARCH_MARGIN: f64 = 100.0;

/// Width (in samples) of the neighbourhood used for prominence bases.
pub const PROMINENCE_WLEN: usize = 200;

/// A local maximum of a sampled curve, in sample indices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectedPeak {
    pub index: usize,
    pub height: f64,
    pub prominence: f64,
    pub left_base: usize,
    pub right_base: usize,
}

/// Peaks found inside a wavenumber window, as parallel lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakList {
    pub x_peak: Vec<f64>,
    pub y_peak: Vec<f64>,
    pub prominence: Vec<f64>,
    pub x_left: Vec<f64>,
    pub x_right: Vec<f64>,
}

impl PeakList {
    pub fn len(&self) -> usize {
        self.x_peak.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x_peak.is_empty()
    }

    fn push(&mut self, x: f64, y: f64, prominence: f64, x_left: f64, x_right: f64) {
        self.x_peak.push(x);
        self.y_peak.push(y);
        self.prominence.push(prominence);
        self.x_left.push(x_left);
        self.x_right.push(x_right);
    }

    /// Index of the peak closest to `center`.
    pub fn closest_to(&self, center: f64) -> Option<usize> {
        self.x_peak
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - center).abs().total_cmp(&(b.1 - center).abs()))
            .map(|(i, _)| i)
    }
}

/// Strict local maxima; a flat top reports its (lower) midpoint.
fn local_maxima(y: &[f64]) -> Vec<usize> {
    let n = y.len();
    let mut maxima = Vec::new();
    if n < 3 {
        return maxima;
    }
    let mut i = 1;
    while i < n - 1 {
        if y[i - 1] < y[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && y[ahead] == y[i] {
                ahead += 1;
            }
            if y[ahead] < y[i] {
                maxima.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    maxima
}

/// Prominence of the peak at `i` and the indices of its two bases.
///
/// Bases are searched outward until a higher sample or the edge of the
/// `wlen` neighbourhood is reached.
fn prominence(y: &[f64], i: usize, wlen: Option<usize>) -> (f64, usize, usize) {
    let n = y.len();
    let (lo, hi) = match wlen {
        Some(w) if w >= 2 => (i.saturating_sub(w / 2), (i + w / 2).min(n - 1)),
        _ => (0, n - 1),
    };
    let apex = y[i];

    let mut left_base = i;
    let mut left_min = apex;
    let mut l = i;
    loop {
        if y[l] > apex {
            break;
        }
        if y[l] < left_min {
            left_min = y[l];
            left_base = l;
        }
        if l == lo {
            break;
        }
        l -= 1;
    }

    let mut right_base = i;
    let mut right_min = apex;
    for r in i..=hi {
        if y[r] > apex {
            break;
        }
        if y[r] < right_min {
            right_min = y[r];
            right_base = r;
        }
    }

    (apex - left_min.max(right_min), left_base, right_base)
}

/// Local maxima of `y` with height >= `min_height` and prominence >= `min_prominence`.
///
/// # Arguments
///
/// * `y` - Sampled curve.
/// * `min_height` - Lowest accepted apex value.
/// * `min_prominence` - Lowest accepted prominence.
/// * `wlen` - Optional neighbourhood width (samples) for the base search.
pub fn find_peaks(y: &[f64], min_height: f64, min_prominence: f64, wlen: Option<usize>) -> Vec<DetectedPeak> {
    local_maxima(y)
        .into_iter()
        .filter(|&i| y[i] >= min_height)
        .filter_map(|i| {
            let (prom, left_base, right_base) = prominence(y, i, wlen);
            (prom >= min_prominence).then_some(DetectedPeak {
                index: i,
                height: y[i],
                prominence: prom,
                left_base,
                right_base,
            })
        })
        .collect()
}

/// Prominent peaks with wavenumber inside [lo, hi].
///
/// Detection runs on [lo - 100, hi + 100] so that prominences and bases of
/// peaks near the edges are estimated from their real surroundings. Returns
/// an empty list when nothing qualifies.
pub fn locate_peaks(spectrum: &Spectrum, lo: f64, hi: f64, min_prominence: f64) -> PeakList {
    let (x, y) = spectrum.slice(lo - SEARCH_MARGIN, hi + SEARCH_MARGIN);
    let mut peaks = PeakList::default();
    for p in find_peaks(y, 0.0, min_prominence, Some(PROMINENCE_WLEN)) {
        if lo <= x[p.index] && x[p.index] <= hi {
            peaks.push(x[p.index], p.height, p.prominence, x[p.left_base], x[p.right_base]);
        }
    }
    log::debug!("{} peaks located in [{}, {}] at {:?}", peaks.len(), lo, hi, peaks.x_peak);
    peaks
}
