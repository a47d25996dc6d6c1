use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::algorithm::utility::{index_range, interp_clamped, trapezoid};
use crate::error::{FtirError, Result};

/// Minimum number of samples, needed by the second-difference operators.
pub const MIN_SPECTRUM_LEN: usize = 8;

/// Mean signal above which raw data is taken to be percent transmittance.
const TRANSMITTANCE_MEAN_THRESHOLD: f64 = 20.0;

/// An infrared absorbance curve sampled on a strictly increasing wavenumber grid.
///
/// Uses Arc<Vec<T>> for efficient cloning - clone is O(1) instead of O(n).
/// Every processing stage returns a new `Spectrum`, the grid is usually shared.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Spectrum {
    pub wavenumber: Arc<Vec<f64>>,
    pub absorbance: Arc<Vec<f64>>,
}

// Manual bincode implementation for Arc compatibility
impl Encode for Spectrum {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> std::result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&*self.wavenumber, encoder)?;
        bincode::Encode::encode(&*self.absorbance, encoder)?;
        Ok(())
    }
}

impl<Context> Decode<Context> for Spectrum {
    fn decode<D: bincode::de::Decoder<Context = Context>>(decoder: &mut D) -> std::result::Result<Self, bincode::error::DecodeError> {
        let wavenumber: Vec<f64> = bincode::Decode::decode(decoder)?;
        let absorbance: Vec<f64> = bincode::Decode::decode(decoder)?;
        Spectrum::new(wavenumber, absorbance)
            .map_err(|e| bincode::error::DecodeError::OtherString(e.to_string()))
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for Spectrum {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(decoder: &mut D) -> std::result::Result<Self, bincode::error::DecodeError> {
        let wavenumber: Vec<f64> = bincode::BorrowDecode::borrow_decode(decoder)?;
        let absorbance: Vec<f64> = bincode::BorrowDecode::borrow_decode(decoder)?;
        Spectrum::new(wavenumber, absorbance)
            .map_err(|e| bincode::error::DecodeError::OtherString(e.to_string()))
    }
}

impl Spectrum {
    /// Constructs a validated `Spectrum`.
    ///
    /// # Arguments
    ///
    /// * `wavenumber` - Strictly increasing wavenumbers in cm^-1.
    /// * `absorbance` - Absorbance values, one per wavenumber.
    ///
    /// # Errors
    ///
    /// `InvalidSpectrum` if the lengths differ, fewer than 8 samples are given,
    /// a value is not finite or the grid is not strictly increasing.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ftircore::data::spectrum::Spectrum;
    /// let x: Vec<f64> = (0..10).map(|i| 1000.0 + i as f64).collect();
    /// let spectrum = Spectrum::new(x, vec![0.1; 10]).unwrap();
    /// assert_eq!(spectrum.len(), 10);
    /// assert!(Spectrum::new(vec![1.0, 0.5], vec![0.0, 0.0]).is_err());
    /// ```
    pub fn new(wavenumber: Vec<f64>, absorbance: Vec<f64>) -> Result<Self> {
        validate(&wavenumber, &absorbance)?;
        Ok(Spectrum {
            wavenumber: Arc::new(wavenumber),
            absorbance: Arc::new(absorbance),
        })
    }

    /// Builds a spectrum from raw instrument columns.
    ///
    /// Samples are sorted by wavenumber and, if the mean signal is above 20,
    /// the signal is read as percent transmittance and converted with
    /// `A = -log10(T / 100)`.
    pub fn from_instrument(wavenumber: Vec<f64>, signal: Vec<f64>) -> Result<Self> {
        if wavenumber.len() != signal.len() {
            return Err(FtirError::InvalidSpectrum(format!(
                "{} wavenumbers but {} signal values",
                wavenumber.len(),
                signal.len()
            )));
        }
        let mut pairs: Vec<(f64, f64)> = wavenumber.into_iter().zip(signal).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mean = pairs.iter().map(|p| p.1).sum::<f64>() / pairs.len().max(1) as f64;
        let transmittance = mean > TRANSMITTANCE_MEAN_THRESHOLD;
        if transmittance {
            log::debug!("mean signal {:.2} > {}, converting transmittance to absorbance", mean, TRANSMITTANCE_MEAN_THRESHOLD);
        }

        let (x, y): (Vec<f64>, Vec<f64>) = pairs
            .into_iter()
            .map(|(x, s)| if transmittance { (x, -(s / 100.0).log10()) } else { (x, s) })
            .unzip();
        Spectrum::new(x, y)
    }

    /// New absorbance values on the same grid, O(1) for the wavenumbers.
    pub fn with_absorbance(&self, absorbance: Vec<f64>) -> Result<Self> {
        if absorbance.len() != self.len() {
            return Err(FtirError::InvalidSpectrum(format!(
                "expected {} absorbance values, got {}",
                self.len(),
                absorbance.len()
            )));
        }
        if let Some(i) = absorbance.iter().position(|v| !v.is_finite()) {
            return Err(FtirError::NumericalError(format!(
                "non-finite absorbance at {} cm^-1",
                self.wavenumber[i]
            )));
        }
        Ok(Spectrum {
            wavenumber: self.wavenumber.clone(),
            absorbance: Arc::new(absorbance),
        })
    }

    pub fn len(&self) -> usize {
        self.wavenumber.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavenumber.is_empty()
    }

    pub fn x(&self) -> &[f64] {
        &self.wavenumber
    }

    pub fn y(&self) -> &[f64] {
        &self.absorbance
    }

    /// Sample indices with wavenumber in [lo, hi].
    pub fn indices_in(&self, lo: f64, hi: f64) -> std::ops::Range<usize> {
        index_range(&self.wavenumber, lo, hi)
    }

    /// (wavenumber, absorbance) slices restricted to [lo, hi].
    pub fn slice(&self, lo: f64, hi: f64) -> (&[f64], &[f64]) {
        let r = self.indices_in(lo, hi);
        (&self.wavenumber[r.clone()], &self.absorbance[r])
    }

    /// Crops the spectrum to [lo, hi].
    pub fn window(&self, lo: f64, hi: f64) -> Result<Self> {
        let (x, y) = self.slice(lo, hi);
        Spectrum::new(x.to_vec(), y.to_vec())
    }

    /// Largest absorbance inside [lo, hi], `None` when the range holds no sample.
    pub fn max_in(&self, lo: f64, hi: f64) -> Option<f64> {
        self.slice(lo, hi).1.iter().copied().reduce(f64::max)
    }

    /// Trapezoidal area over the samples inside [lo, hi].
    pub fn trapezoid(&self, lo: f64, hi: f64) -> f64 {
        let (x, y) = self.slice(lo, hi);
        trapezoid(x, y)
    }

    /// Linearly interpolated absorbance at `x`, clamped at the ends of the grid.
    pub fn value_at(&self, x: f64) -> f64 {
        interp_clamped(x, &self.wavenumber, &self.absorbance)
    }

    /// Multiplies every absorbance by `factor`.
    pub fn scaled(&self, factor: f64) -> Result<Self> {
        self.with_absorbance(self.absorbance.iter().map(|v| v * factor).collect())
    }
}

fn validate(wavenumber: &[f64], absorbance: &[f64]) -> Result<()> {
    if wavenumber.len() != absorbance.len() {
        return Err(FtirError::InvalidSpectrum(format!(
            "{} wavenumbers but {} absorbance values",
            wavenumber.len(),
            absorbance.len()
        )));
    }
    if wavenumber.len() < MIN_SPECTRUM_LEN {
        return Err(FtirError::InvalidSpectrum(format!(
            "at least {} samples required, got {}",
            MIN_SPECTRUM_LEN,
            wavenumber.len()
        )));
    }
    if wavenumber.iter().chain(absorbance.iter()).any(|v| !v.is_finite()) {
        return Err(FtirError::InvalidSpectrum("non-finite value".to_string()));
    }
    if let Some(w) = wavenumber.windows(2).find(|w| w[1] <= w[0]) {
        return Err(FtirError::InvalidSpectrum(format!(
            "wavenumbers must be strictly increasing ({} followed by {})",
            w[0], w[1]
        )));
    }
    Ok(())
}

/// Formats the `Spectrum` for display.
impl Display for Spectrum {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let first = self.wavenumber.first().copied().unwrap_or(f64::NAN);
        let last = self.wavenumber.last().copied().unwrap_or(f64::NAN);
        let max = self.absorbance.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        write!(f, "Spectrum(data points: {}, range: [{:.1}, {:.1}] cm^-1, max absorbance: {:.4})", self.len(), first, last, max)
    }
}
