use std::f64::consts::PI;
use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// One fitted absorption band, `a * exp(-(x - mu)^2 / (2 sigma^2))`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct GaussianComponent {
    pub mu: f64,
    pub sigma: f64,
    pub amplitude: f64,
}

impl GaussianComponent {
    pub fn new(mu: f64, sigma: f64, amplitude: f64) -> Self {
        GaussianComponent { mu, sigma, amplitude }
    }

    #[inline]
    pub fn value(&self, x: f64) -> f64 {
        let z = (x - self.mu) / self.sigma;
        self.amplitude * (-0.5 * z * z).exp()
    }

    pub fn evaluate(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.value(x)).collect()
    }

    /// Integral over the real line, `a * |sigma| * sqrt(2 pi)`.
    pub fn area(&self) -> f64 {
        self.amplitude * self.sigma.abs() * (2.0 * PI).sqrt()
    }

    /// Half width at which the bell has fallen to `fraction` of its height.
    pub fn half_width_at(&self, fraction: f64) -> f64 {
        self.sigma.abs() * (-2.0 * fraction.ln()).sqrt()
    }
}

impl Display for GaussianComponent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gaussian(mu: {:.2}, sigma: {:.3}, amplitude: {:.5})", self.mu, self.sigma, self.amplitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_uses_abs_sigma() {
        let g = GaussianComponent::new(1400.0, -10.0, 0.05);
        assert!((g.area() - 0.05 * 10.0 * (2.0 * PI).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_five_percent_width() {
        let g = GaussianComponent::new(1000.0, 8.0, 1.0);
        let w = g.half_width_at(0.05);
        assert!((g.value(1000.0 + w) - 0.05).abs() < 1e-12);
        assert!((g.value(1000.0) - 1.0).abs() < 1e-12);
    }
}
