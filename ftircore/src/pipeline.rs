use itertools::Itertools;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use statrs::statistics::Statistics;

use crate::algorithm::area::{calc_indices, IndexReport};
use crate::algorithm::baseline::correct_baseline;
use crate::algorithm::deconvolution::{deconvolve, DeconvolutionResult};
use crate::algorithm::normalization::normalize;
use crate::config::PipelineConfig;
use crate::data::spectrum::Spectrum;
use crate::error::{FtirError, Result};

/// Everything computed for one spectrum.
///
/// The band indices and the deconvolution run independently on the processed
/// curve, so a band missing from one analysis does not discard the other.
#[derive(Debug)]
pub struct SpectrumAnalysis {
    /// Baseline-corrected and normalized curve.
    pub processed: Spectrum,
    /// Normalization factor, divide `processed` by it to undo the scaling.
    pub beta: f64,
    pub indices: Result<IndexReport>,
    pub deconvolution: Result<DeconvolutionResult>,
}

/// Runs the full chain on one spectrum.
///
/// ALS baseline and anchor correction, normalization, then the band indices
/// and the Gaussian deconvolution on the normalized curve.
///
/// # Errors
///
/// Configuration and preprocessing failures. Failures of the band indices or
/// the deconvolution are reported in their fields of [`SpectrumAnalysis`].
pub fn analyze(spectrum: &Spectrum, config: &PipelineConfig) -> Result<SpectrumAnalysis> {
    config.validate()?;
    let corrected = correct_baseline(spectrum, &config.als)?;
    let (processed, beta) = normalize(&corrected, config.normalization)?;
    let indices = calc_indices(&processed, config.min_prominence);
    let deconvolution = deconvolve(&processed, &config.deconvolution);

    match &indices {
        Ok(report) => log::info!("{}: ICO {:.4} / ISO {:.4} (baseline)", spectrum, report.ico_baseline, report.iso_baseline),
        Err(e) => log::warn!("{}: band indices unavailable: {}", spectrum, e),
    }
    match &deconvolution {
        Ok(result) => log::info!(
            "{}: deconvolution ICO {:.4} / ISO {:.4} from {} components",
            spectrum, result.ico, result.iso, result.components.len()
        ),
        Err(e) => log::warn!("{}: deconvolution unavailable: {}", spectrum, e),
    }
    Ok(SpectrumAnalysis { processed, beta, indices, deconvolution })
}

/// Analyzes independent spectra in parallel, one result per input in input order.
///
/// # Errors
///
/// `InvalidParameter` if the thread pool cannot be built; failures of single
/// spectra are reported in their slot of the returned vector.
pub fn analyze_batch(spectra: &[Spectrum], config: &PipelineConfig, num_threads: usize) -> Result<Vec<Result<SpectrumAnalysis>>> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| FtirError::InvalidParameter(format!("thread pool: {}", e)))?;
    Ok(pool.install(|| spectra.par_iter().map(|spectrum| analyze(spectrum, config)).collect()))
}

/// Picks the `k` replicates whose baseline ICO values agree best.
///
/// Every k-combination is scored by the population standard deviation of its
/// `ico_baseline` values and the first best one is returned as sorted indices.
/// With `k` or fewer replicates all of them are returned.
pub fn representative_replicates(reports: &[IndexReport], k: usize) -> Vec<usize> {
    if reports.len() <= k {
        return (0..reports.len()).collect();
    }
    (0..reports.len())
        .combinations(k)
        .min_by_key(|combination| OrderedFloat(combination.iter().map(|&i| reports[i].ico_baseline).population_std_dev()))
        .unwrap_or_else(|| (0..k).collect())
}
