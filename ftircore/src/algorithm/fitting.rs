use nalgebra::{DMatrix, DVector};

use crate::data::gaussian::GaussianComponent;
use crate::error::{FtirError, Result};

const MAX_ITERATIONS: usize = 200;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e12;
const TOLERANCE: f64 = 1e-10;

/// Result of a single Gaussian fit attempt.
///
/// A failed fit is an ordinary value so that iterative callers can move on
/// to their next phase instead of aborting.
#[derive(Clone, Debug, PartialEq)]
pub enum FitOutcome {
    Success(GaussianComponent),
    Failed(String),
}

impl FitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FitOutcome::Success(_))
    }

    /// Converts a failure into `GaussianFitFailed`.
    pub fn into_result(self) -> Result<GaussianComponent> {
        match self {
            FitOutcome::Success(component) => Ok(component),
            FitOutcome::Failed(reason) => Err(FtirError::GaussianFitFailed(reason)),
        }
    }
}

/// A nonlinear least squares problem `min sum r_i(p)^2`.
trait LeastSquares {
    fn residuals(&self, p: &DVector<f64>) -> DVector<f64>;
    /// Derivatives of the model (not the residual) with respect to `p`.
    fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64>;
}

/// Gaussian bell on a fixed set of samples, optionally with the amplitude locked
/// and the residuals weighted.
///
/// The width enters as the curvature `w = 1 / sigma^2`.
struct GaussianProblem<'a> {
    x: &'a [f64],
    y: &'a [f64],
    weights: Option<&'a [f64]>,
    fixed_amplitude: Option<f64>,
}

impl GaussianProblem<'_> {
    /// (amplitude, mu, curvature)
    fn unpack(&self, p: &DVector<f64>) -> (f64, f64, f64) {
        match self.fixed_amplitude {
            Some(a) => (a, p[0], p[1]),
            None => (p[0], p[1], p[2]),
        }
    }

    #[inline]
    fn weight(&self, i: usize) -> f64 {
        self.weights.map_or(1.0, |w| w[i])
    }

    #[inline]
    fn bell(a: f64, mu: f64, w: f64, x: f64) -> f64 {
        let d = x - mu;
        a * (-0.5 * w * d * d).exp()
    }
}

impl LeastSquares for GaussianProblem<'_> {
    fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
        let (a, mu, w) = self.unpack(p);
        DVector::from_iterator(
            self.x.len(),
            self.x
                .iter()
                .zip(self.y.iter())
                .enumerate()
                .map(|(i, (&x, &y))| (y - Self::bell(a, mu, w, x)) * self.weight(i)),
        )
    }

    fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
        let (a, mu, w) = self.unpack(p);
        let offset = usize::from(self.fixed_amplitude.is_none());
        let mut jac = DMatrix::zeros(self.x.len(), p.len());
        for (i, &x) in self.x.iter().enumerate() {
            let d = x - mu;
            let e = (-0.5 * w * d * d).exp();
            let k = self.weight(i);
            if offset == 1 {
                jac[(i, 0)] = k * e;
            }
            jac[(i, offset)] = k * a * e * w * d;
            jac[(i, offset + 1)] = -k * a * e * 0.5 * d * d;
        }
        jac
    }
}

/// Levenberg-Marquardt with Marquardt's diagonal scaling.
///
/// Solves `(J^T J + lambda diag(J^T J)) delta = J^T r` each step, accepting the
/// step when the cost drops (lambda / 10) and retrying with lambda * 10
/// otherwise. Stops on a vanishing gradient, on a step that is small against
/// every parameter, or when no damping improves the cost.
fn levenberg_marquardt<P: LeastSquares>(problem: &P, initial: DVector<f64>) -> std::result::Result<DVector<f64>, String> {
    let n = initial.len();
    let mut p = initial;
    let mut r = problem.residuals(&p);
    let mut cost = r.norm_squared();
    if !cost.is_finite() {
        return Err(format!("initial guess {:?} gives a non-finite cost", p.as_slice()));
    }
    let mut lambda = INITIAL_DAMPING;

    for _ in 0..MAX_ITERATIONS {
        let jac = problem.jacobian(&p);
        let jtj = jac.transpose() * &jac;
        let gradient = jac.transpose() * &r;
        if gradient.amax() <= TOLERANCE * TOLERANCE {
            return Ok(p);
        }

        let mut accepted = None;
        while lambda <= MAX_DAMPING {
            let mut system = jtj.clone();
            for k in 0..n {
                system[(k, k)] += lambda * jtj[(k, k)].max(f64::EPSILON);
            }
            let Some(step) = system.cholesky().map(|c| c.solve(&gradient)) else {
                lambda *= 10.0;
                continue;
            };
            let trial = &p + &step;
            let trial_r = problem.residuals(&trial);
            let trial_cost = trial_r.norm_squared();
            if trial_cost.is_finite() && trial_cost < cost {
                lambda = (lambda / 10.0).max(f64::EPSILON);
                accepted = Some((trial, trial_r, trial_cost, step));
                break;
            }
            lambda *= 10.0;
        }

        let Some((trial, trial_r, trial_cost, step)) = accepted else {
            return Ok(p);
        };
        let small_step = step.iter().zip(trial.iter()).all(|(s, v)| s.abs() <= TOLERANCE * (v.abs() + TOLERANCE));
        p = trial;
        r = trial_r;
        cost = trial_cost;
        if small_step || cost == 0.0 {
            return Ok(p);
        }
    }
    Err(format!("no convergence after {} iterations", MAX_ITERATIONS))
}

/// Width of a fitted curvature, `None` for a bell that opens upwards or is flat.
fn width_of(w: f64) -> Option<f64> {
    (w.is_finite() && w > 0.0).then(|| 1.0 / w.sqrt())
}

fn check_samples(x: &[f64], y: &[f64], needed: usize) -> Option<String> {
    if x.len() != y.len() {
        return Some(format!("{} abscissae but {} ordinates", x.len(), y.len()));
    }
    if x.len() < needed {
        return Some(format!("{} samples cannot determine {} parameters", x.len(), needed));
    }
    None
}

/// Fits amplitude, centre and width of a single Gaussian to (x, y).
///
/// # Arguments
///
/// * `x` - Sample positions.
/// * `y` - Sample values.
/// * `initial` - Starting guess.
///
/// # Example
///
/// ```rust
/// # use ftircore::algorithm::fitting::{fit_gaussian, FitOutcome};
/// # use ftircore::data::gaussian::GaussianComponent;
/// let truth = GaussianComponent::new(10.0, 2.0, 1.5);
/// let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
/// let y = truth.evaluate(&x);
/// let FitOutcome::Success(g) = fit_gaussian(&x, &y, GaussianComponent::new(9.0, 3.0, 1.0)) else { panic!() };
/// assert!((g.mu - 10.0).abs() < 1e-6);
/// ```
pub fn fit_gaussian(x: &[f64], y: &[f64], initial: GaussianComponent) -> FitOutcome {
    if let Some(reason) = check_samples(x, y, 3) {
        return FitOutcome::Failed(reason);
    }
    let problem = GaussianProblem { x, y, weights: None, fixed_amplitude: None };
    let p0 = DVector::from_vec(vec![initial.amplitude, initial.mu, (initial.sigma * initial.sigma).recip()]);
    match levenberg_marquardt(&problem, p0) {
        Ok(p) if p[0].is_finite() && p[1].is_finite() => match width_of(p[2]) {
            Some(sigma) => FitOutcome::Success(GaussianComponent::new(p[1], sigma, p[0])),
            None => FitOutcome::Failed(format!("fitted curvature {} is not a bell", p[2])),
        },
        Ok(p) => FitOutcome::Failed(format!("non-finite parameters {:?}", p.as_slice())),
        Err(reason) => FitOutcome::Failed(reason),
    }
}

/// Fits centre and width of a Gaussian whose amplitude is held at `amplitude`.
///
/// Residuals are weighted by the sample values, so the apex region dominates
/// the fit over the flanks.
pub fn fit_gaussian_fixed_amplitude(x: &[f64], y: &[f64], amplitude: f64, mu0: f64, sigma0: f64) -> FitOutcome {
    if let Some(reason) = check_samples(x, y, 2) {
        return FitOutcome::Failed(reason);
    }
    let problem = GaussianProblem { x, y, weights: Some(y), fixed_amplitude: Some(amplitude) };
    match levenberg_marquardt(&problem, DVector::from_vec(vec![mu0, (sigma0 * sigma0).recip()])) {
        Ok(p) if p[0].is_finite() => match width_of(p[1]) {
            Some(sigma) => FitOutcome::Success(GaussianComponent::new(p[0], sigma, amplitude)),
            None => FitOutcome::Failed(format!("fitted curvature {} is not a bell", p[1])),
        },
        Ok(p) => FitOutcome::Failed(format!("non-finite parameters {:?}", p.as_slice())),
        Err(reason) => FitOutcome::Failed(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(truth: &GaussianComponent, lo: f64, hi: f64, step: f64) -> (Vec<f64>, Vec<f64>) {
        let n = ((hi - lo) / step).round() as usize + 1;
        let x: Vec<f64> = (0..n).map(|i| lo + step * i as f64).collect();
        let y = truth.evaluate(&x);
        (x, y)
    }

    #[test]
    fn test_free_fit_recovers_parameters() {
        let truth = GaussianComponent::new(1400.0, 10.0, 0.05);
        let (x, y) = samples(&truth, 1385.0, 1415.0, 1.0);
        let fit = fit_gaussian(&x, &y, GaussianComponent::new(1396.0, 14.0, 0.04)).into_result().unwrap();
        assert!((fit.mu - 1400.0).abs() < 1e-6);
        assert!((fit.sigma.abs() - 10.0).abs() < 1e-6);
        assert!((fit.amplitude - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_amplitude_fit() {
        let truth = GaussianComponent::new(1030.0, 8.0, 0.02);
        let (x, y) = samples(&truth, 1024.0, 1036.0, 1.0);
        let FitOutcome::Success(fit) = fit_gaussian_fixed_amplitude(&x, &y, 0.02, 1030.0, 6.0) else {
            panic!("fit failed");
        };
        assert_eq!(fit.amplitude, 0.02);
        assert!((fit.mu - 1030.0).abs() < 1e-6);
        assert!((fit.sigma.abs() - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_free_fit_from_wide_guess() {
        // upper part of a narrow band, started ten times too wide
        let truth = GaussianComponent::new(1000.0, 5.0, 0.1);
        let (x, y) = samples(&truth, 995.0, 1005.0, 1.0);
        let fit = fit_gaussian(&x, &y, GaussianComponent::new(1000.0, 50.0, 0.1)).into_result().unwrap();
        assert!((fit.mu - 1000.0).abs() < 1e-6);
        assert!((fit.sigma - 5.0).abs() < 1e-6);
        assert!((fit.amplitude - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_flat_samples_give_no_narrow_bell() {
        let x: Vec<f64> = (0..=20).map(|i| 1000.0 + i as f64).collect();
        let y = vec![0.1; x.len()];
        match fit_gaussian(&x, &y, GaussianComponent::new(1010.0, 10.0, 0.1)) {
            FitOutcome::Success(g) => assert!(g.sigma > 1e3, "{}", g),
            FitOutcome::Failed(_) => {}
        }
    }

    #[test]
    fn test_fixed_amplitude_fit_from_wide_guess() {
        let truth = GaussianComponent::new(1460.0, 10.0, 0.08);
        let (x, y) = samples(&truth, 1450.0, 1470.0, 1.0);
        let fit = fit_gaussian_fixed_amplitude(&x, &y, 0.08, 1460.0, 40.0).into_result().unwrap();
        assert!((fit.mu - 1460.0).abs() < 1e-6);
        assert!((fit.sigma - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_too_few_samples_fail() {
        let outcome = fit_gaussian(&[1.0, 2.0], &[0.5, 0.4], GaussianComponent::new(1.0, 1.0, 1.0));
        assert!(!outcome.is_success());
        assert!(matches!(outcome.into_result(), Err(FtirError::GaussianFitFailed(_))));
    }

    #[test]
    fn test_zero_width_guess_fails() {
        let outcome = fit_gaussian(&[1.0, 2.0, 3.0], &[0.2, 0.5, 0.2], GaussianComponent::new(2.0, 0.0, 0.5));
        assert!(matches!(outcome, FitOutcome::Failed(_)));
    }
}
