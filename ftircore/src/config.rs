use serde::{Deserialize, Serialize};

use crate::algorithm::normalization::NormalizationMethod;
use crate::error::{FtirError, Result};

/// Asymmetric least squares baseline parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlsParams {
    /// Smoothness weight of the second-difference penalty (default: 1e6)
    pub lambda: f64,
    /// Weight given to samples above the baseline (default: 0.1)
    pub ratio: f64,
    /// Fixed number of reweighting passes (default: 150)
    pub iterations: usize,
}

impl Default for AlsParams {
    fn default() -> Self {
        AlsParams {
            lambda: 1e6,
            ratio: 0.1,
            iterations: 150,
        }
    }
}

impl AlsParams {
    pub fn new(lambda: f64, ratio: f64, iterations: usize) -> Self {
        AlsParams { lambda, ratio, iterations }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lambda.is_finite() && self.lambda > 0.0) {
            return Err(FtirError::InvalidParameter(format!("ALS lambda must be positive, got {}", self.lambda)));
        }
        if !(self.ratio > 0.0 && self.ratio < 1.0) {
            return Err(FtirError::InvalidParameter(format!("ALS ratio must lie in (0, 1), got {}", self.ratio)));
        }
        if self.iterations == 0 {
            return Err(FtirError::InvalidParameter("ALS needs at least one iteration".to_string()));
        }
        Ok(())
    }
}

/// Constants driving the greedy Gaussian deconvolution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeconvolutionConfig {
    /// Region the spectrum is cropped to before fitting (default: [550, 2000])
    pub working_region: (f64, f64),
    /// Initial general search window (default: [600, 2000])
    pub general_window: (f64, f64),
    /// Shrink applied to each side of the general window per carbonyl phase (default: 20)
    pub general_shrink: f64,
    /// Residual maximum below which the general search has converged (default: 0.008)
    pub general_threshold: f64,
    /// Dedicated carbonyl search window (default: [1600, 1800])
    pub carbonyl_window: (f64, f64),
    /// Residual maximum below which the carbonyl search stops (default: 0.0015)
    pub carbonyl_threshold: f64,
    /// Fraction of the apex height a sample needs to join the fit (default: 0.6)
    pub fit_height_fraction: f64,
    /// Attempts per fit, halving the initial sigma each time (default: 3)
    pub fit_retries: usize,
    /// Accepted range of fitted centres (default: [400, 2100])
    pub mu_range: (f64, f64),
    /// Fitted |sigma| must stay below this (default: 100)
    pub sigma_limit: f64,
    /// Hard cap on accepted components (default: 200)
    pub max_components: usize,
}

impl Default for DeconvolutionConfig {
    fn default() -> Self {
        DeconvolutionConfig {
            working_region: (550.0, 2000.0),
            general_window: (600.0, 2000.0),
            general_shrink: 20.0,
            general_threshold: 0.008,
            carbonyl_window: (1600.0, 1800.0),
            carbonyl_threshold: 0.0015,
            fit_height_fraction: 0.6,
            fit_retries: 3,
            mu_range: (400.0, 2100.0),
            sigma_limit: 100.0,
            max_components: 200,
        }
    }
}

impl DeconvolutionConfig {
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("working_region", self.working_region),
            ("general_window", self.general_window),
            ("carbonyl_window", self.carbonyl_window),
            ("mu_range", self.mu_range),
        ];
        for (name, (lo, hi)) in windows {
            if !(lo < hi) {
                return Err(FtirError::InvalidParameter(format!("{} must satisfy lo < hi, got ({}, {})", name, lo, hi)));
            }
        }
        if !(self.fit_height_fraction > 0.0 && self.fit_height_fraction < 1.0) {
            return Err(FtirError::InvalidParameter(format!(
                "fit_height_fraction must lie in (0, 1), got {}",
                self.fit_height_fraction
            )));
        }
        if self.fit_retries == 0 || self.max_components == 0 {
            return Err(FtirError::InvalidParameter("fit_retries and max_components must be positive".to_string()));
        }
        if self.sigma_limit <= 0.0 || self.general_shrink < 0.0 {
            return Err(FtirError::InvalidParameter("sigma_limit must be positive and general_shrink non-negative".to_string()));
        }
        Ok(())
    }
}

/// Full per-spectrum processing configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub als: AlsParams,
    pub normalization: NormalizationMethod,
    pub deconvolution: DeconvolutionConfig,
    /// Minimum prominence for band peak detection (default: 0.001)
    pub min_prominence: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            als: AlsParams::default(),
            normalization: NormalizationMethod::default(),
            deconvolution: DeconvolutionConfig::default(),
            min_prominence: 0.001,
        }
    }
}

impl PipelineConfig {
    /// Parses a (possibly partial) JSON configuration, missing fields take defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ftircore::config::PipelineConfig;
    /// let config = PipelineConfig::from_json_str(r#"{"als": {"lambda": 1e5}}"#).unwrap();
    /// assert_eq!(config.als.lambda, 1e5);
    /// assert_eq!(config.als.iterations, 150);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.als.validate()?;
        self.deconvolution.validate()?;
        if !(self.min_prominence >= 0.0) {
            return Err(FtirError::InvalidParameter(format!(
                "min_prominence must be non-negative, got {}",
                self.min_prominence
            )));
        }
        Ok(())
    }
}
