use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::data::spectrum::Spectrum;
use crate::error::{FtirError, Result};

/// Intensity normalization conventions.
///
/// # Description
///
/// Peak-height methods scale the maximum inside a window to a target value,
/// area methods scale the trapezoidal area inside a window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationMethod {
    /// Peak in [600, 4000] scaled to 0.25.
    A,
    /// Peak in [1300, 1600] scaled to 0.15.
    B,
    /// Area over [600, 4000] scaled to 50.
    C,
    /// Area over [600, 1800] scaled to 25.
    D,
}

enum Reference {
    Height,
    Area,
}

impl NormalizationMethod {
    fn convention(&self) -> (Reference, (f64, f64), f64) {
        match self {
            NormalizationMethod::A => (Reference::Height, (600.0, 4000.0), 0.25),
            NormalizationMethod::B => (Reference::Height, (1300.0, 1600.0), 0.15),
            NormalizationMethod::C => (Reference::Area, (600.0, 4000.0), 50.0),
            NormalizationMethod::D => (Reference::Area, (600.0, 1800.0), 25.0),
        }
    }

    pub fn window(&self) -> (f64, f64) {
        self.convention().1
    }

    pub fn target(&self) -> f64 {
        self.convention().2
    }
}

impl Default for NormalizationMethod {
    fn default() -> Self {
        NormalizationMethod::B
    }
}

impl Display for NormalizationMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (reference, (lo, hi), target) = self.convention();
        let kind = match reference {
            Reference::Height => "peak",
            Reference::Area => "area",
        };
        write!(f, "Method {:?} ({} over {}-{} cm^-1 to {})", self, kind, lo, hi, target)
    }
}

/// Scales the whole curve by the factor `beta` of the chosen convention.
///
/// Returns the scaled curve together with `beta`, which callers keep to undo
/// the normalization later.
///
/// # Errors
///
/// `NumericalError` if the reference window is empty or its peak or area is
/// not positive.
pub fn normalize(spectrum: &Spectrum, method: NormalizationMethod) -> Result<(Spectrum, f64)> {
    let (reference, (lo, hi), target) = method.convention();
    let (x, _) = spectrum.slice(lo, hi);
    let reference_value = match reference {
        Reference::Height => spectrum.max_in(lo, hi),
        Reference::Area if x.len() >= 2 => Some(spectrum.trapezoid(lo, hi)),
        Reference::Area => None,
    };
    let reference_value = reference_value.ok_or_else(|| {
        FtirError::NumericalError(format!("{}: no samples in reference window", method))
    })?;
    if !(reference_value > 0.0) {
        return Err(FtirError::NumericalError(format!(
            "{}: reference value {} is not positive",
            method, reference_value
        )));
    }
    let beta = target / reference_value;
    log::debug!("{}: beta = {:.6}", method, beta);
    Ok((spectrum.scaled(beta)?, beta))
}

/// Undoes `normalize` by dividing by `beta`.
pub fn denormalize(spectrum: &Spectrum, beta: f64) -> Result<Spectrum> {
    if !(beta.is_finite() && beta != 0.0) {
        return Err(FtirError::InvalidParameter(format!("cannot denormalize with beta {}", beta)));
    }
    spectrum.scaled(1.0 / beta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broad_spectrum() -> Spectrum {
        let x: Vec<f64> = (0..=3400).map(|i| 600.0 + i as f64).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|v| 0.02 + 0.4 * (-(v - 1450.0).powi(2) / 800.0).exp() + 0.3 * (-(v - 2900.0).powi(2) / 1000.0).exp())
            .collect();
        Spectrum::new(x, y).unwrap()
    }

    #[test]
    fn test_height_methods_hit_target() {
        let spectrum = broad_spectrum();
        let (a, beta_a) = normalize(&spectrum, NormalizationMethod::A).unwrap();
        assert!((a.max_in(600.0, 4000.0).unwrap() - 0.25).abs() < 1e-12);
        let (b, beta_b) = normalize(&spectrum, NormalizationMethod::B).unwrap();
        assert!((b.max_in(1300.0, 1600.0).unwrap() - 0.15).abs() < 1e-12);
        assert!((beta_a / beta_b - 0.25 / 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_area_methods_hit_target() {
        let spectrum = broad_spectrum();
        let (c, _) = normalize(&spectrum, NormalizationMethod::C).unwrap();
        assert!((c.trapezoid(600.0, 4000.0) - 50.0).abs() < 1e-9);
        let (d, _) = normalize(&spectrum, NormalizationMethod::D).unwrap();
        assert!((d.trapezoid(600.0, 1800.0) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_denormalize_restores_curve() {
        let spectrum = broad_spectrum();
        for method in [NormalizationMethod::A, NormalizationMethod::B, NormalizationMethod::C, NormalizationMethod::D] {
            let (scaled, beta) = normalize(&spectrum, method).unwrap();
            let restored = denormalize(&scaled, beta).unwrap();
            for (u, v) in restored.y().iter().zip(spectrum.y().iter()) {
                assert!((u - v).abs() < 1e-12 * v.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_empty_reference_window_fails() {
        let x: Vec<f64> = (0..20).map(|i| 2000.0 + i as f64).collect();
        let spectrum = Spectrum::new(x, vec![0.1; 20]).unwrap();
        assert!(matches!(
            normalize(&spectrum, NormalizationMethod::B),
            Err(FtirError::NumericalError(_))
        ));
        assert!(denormalize(&spectrum, 0.0).is_err());
    }
}
