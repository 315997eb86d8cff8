//! Weighted residuals and log-densities
//!
//! One primitive evaluates every density kind, for data values, prior
//! values, and prior differences.  The log-density is split into a smooth
//! part and a subtracted absolute value so the Laplace kink can be treated
//! specially by callers; the total is `logden_smooth - |logden_sub_abs|`.

use crate::ad::Scalar;
use crate::table::types::Density;

/// What a residual is measuring; differences use the `z` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualKind {
    Data,
    ValuePrior,
    DifferencePrior,
}

/// One weighted residual and its log-density contribution.
#[derive(Debug, Clone, Copy)]
pub struct Residual<F> {
    pub wres: F,
    pub logden_smooth: F,
    /// The Laplace family stores `sqrt(2) * R` here; zero elsewhere.
    pub logden_sub_abs: F,
    pub density: Density,
    /// Data: the subset id.  Priors: `3 * var_id + k` with k = 0 value,
    /// 1 dage, 2 dtime.
    pub index: usize,
}

impl<F: Scalar> Residual<F> {
    /// The total log-density.
    pub fn logden(&self) -> F {
        self.logden_smooth - self.logden_sub_abs.abs()
    }
}

/// Parameters of one residual evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DensityArgs {
    pub density: Density,
    pub eta: f64,
    pub nu: f64,
    /// Binomial sample size (data only).
    pub sample_size: Option<f64>,
}

const LOG_SQRT_2PI: f64 = 0.9189385332046727;
const LOG_SQRT_2: f64 = 0.34657359027997264;
const SQRT_2: f64 = std::f64::consts::SQRT_2;

/// Evaluate one residual.
///
/// For `ResidualKind::Data` and value priors, `y` is the measured/variable
/// value and `mu` the model value (prior mean).  For difference priors the
/// residual involves `z - y` (the forward difference) against the mean
/// `mu`.  Non-finite log-densities are possible (for example a binomial
/// mean outside (0,1)) and are rejected by the objective evaluation.
pub fn residual_density<F: Scalar>(
    kind: ResidualKind,
    z: F,
    y: F,
    mu: F,
    delta: F,
    args: &DensityArgs,
    index: usize,
) -> Residual<F> {
    let density = args.density;
    let eta = F::from_f64(args.eta);
    let difference = kind == ResidualKind::DifferencePrior;

    // weighted residual
    let wres = match density {
        Density::Uniform => F::zero(),
        Density::Binomial => {
            let n = F::from_f64(args.sample_size.unwrap_or(f64::NAN));
            (y - mu) / (mu * (F::one() - mu) / n).sqrt()
        }
        _ if density.is_log() => {
            if difference {
                ((z + eta).ln() - (y + eta).ln() - mu) / delta
            } else {
                ((y + eta).ln() - (mu + eta).ln()) / delta
            }
        }
        _ => {
            if difference {
                (z - y - mu) / delta
            } else {
                (y - mu) / delta
            }
        }
    };

    // censored data: measurements at or below zero carry the probability
    // mass of the whole censored tail
    let censored = kind == ResidualKind::Data && density.is_censored() && y.value() <= 0.0;

    let mut logden_sub_abs = F::zero();
    let logden_smooth = match density {
        Density::Uniform => F::zero(),

        Density::Gaussian | Density::CenGaussian if !censored => {
            -(delta.ln() + F::from_f64(LOG_SQRT_2PI)) - wres * wres / F::from_f64(2.0)
        }
        Density::CenGaussian => {
            // log Phi((0 - mu)/delta) = log( erfc(mu / (delta sqrt(2))) / 2 )
            let x = mu / (delta * F::from_f64(SQRT_2));
            ((F::one() - x.erf()) / F::from_f64(2.0)).ln()
        }

        Density::Laplace | Density::CenLaplace if !censored => {
            logden_sub_abs = F::from_f64(SQRT_2) * wres;
            -(delta.ln() + F::from_f64(LOG_SQRT_2))
        }
        Density::CenLaplace => {
            // Laplace distribution function at zero, mu >= 0
            -F::from_f64(std::f64::consts::LN_2) - F::from_f64(SQRT_2) * mu / delta
        }

        Density::Students => {
            let nu = args.nu;
            let constant = statrs::function::gamma::ln_gamma((nu + 1.0) / 2.0)
                - statrs::function::gamma::ln_gamma(nu / 2.0)
                - 0.5 * ((nu - 2.0) * std::f64::consts::PI).ln();
            let r2 = wres * wres;
            F::from_f64(constant) - delta.ln()
                - F::from_f64((nu + 1.0) / 2.0)
                    * (F::one() + r2 / F::from_f64(nu - 2.0)).ln()
        }

        Density::LogGaussian | Density::CenLogGaussian if !censored => {
            -(delta.ln() + F::from_f64(LOG_SQRT_2PI)) - wres * wres / F::from_f64(2.0)
        }
        Density::CenLogGaussian => {
            // censor point zero maps to log(eta) in transformed space
            let x = ((mu + eta).ln() - eta.ln()) / (delta * F::from_f64(SQRT_2));
            ((F::one() - x.erf()) / F::from_f64(2.0)).ln()
        }

        Density::LogLaplace | Density::CenLogLaplace if !censored => {
            logden_sub_abs = F::from_f64(SQRT_2) * wres;
            -(delta.ln() + F::from_f64(LOG_SQRT_2))
        }
        Density::CenLogLaplace => {
            let x = ((mu + eta).ln() - eta.ln()) / delta;
            -F::from_f64(std::f64::consts::LN_2) - F::from_f64(SQRT_2) * x
        }

        Density::LogStudents => {
            let nu = args.nu;
            let constant = statrs::function::gamma::ln_gamma((nu + 1.0) / 2.0)
                - statrs::function::gamma::ln_gamma(nu / 2.0)
                - 0.5 * ((nu - 2.0) * std::f64::consts::PI).ln();
            let r2 = wres * wres;
            F::from_f64(constant) - delta.ln()
                - F::from_f64((nu + 1.0) / 2.0)
                    * (F::one() + r2 / F::from_f64(nu - 2.0)).ln()
        }

        Density::Binomial => {
            // y is the sample proportion k / n
            let n = args.sample_size.unwrap_or(f64::NAN);
            let k = y.value() * n;
            let lchoose = statrs::function::gamma::ln_gamma(n + 1.0)
                - statrs::function::gamma::ln_gamma(k + 1.0)
                - statrs::function::gamma::ln_gamma(n - k + 1.0);
            F::from_f64(lchoose)
                + F::from_f64(k) * mu.ln()
                + F::from_f64(n - k) * (F::one() - mu).ln()
        }

        // the guards above consumed the non-censored evaluations
        Density::Gaussian | Density::Laplace | Density::LogGaussian | Density::LogLaplace => {
            unreachable!("plain densities are never censored")
        }
    };

    let wres = if censored { F::zero() } else { wres };
    Residual {
        wres,
        logden_smooth,
        logden_sub_abs,
        density,
        index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn args(density: Density) -> DensityArgs {
        DensityArgs {
            density,
            eta: 1e-6,
            nu: 5.0,
            sample_size: None,
        }
    }

    fn value<F: Scalar>(y: F, mu: F, delta: F, a: &DensityArgs) -> Residual<F> {
        residual_density(ResidualKind::Data, F::zero(), y, mu, delta, a, 0)
    }

    #[test]
    fn test_gaussian() {
        let r = value(1.5, 1.0, 0.25, &args(Density::Gaussian));
        assert_relative_eq!(r.wres, 2.0);
        let expect = -(0.25_f64.ln() + LOG_SQRT_2PI) - 2.0;
        assert_relative_eq!(r.logden(), expect, max_relative = 1e-14);
    }

    #[test]
    fn test_uniform_is_flat() {
        let r = value(5.0, 1.0, 0.25, &args(Density::Uniform));
        assert_relative_eq!(r.wres, 0.0);
        assert_relative_eq!(r.logden(), 0.0);
    }

    #[test]
    fn test_laplace_split() {
        let r = value(2.0, 1.0, 0.5, &args(Density::Laplace));
        assert_relative_eq!(r.wres, 2.0);
        assert_relative_eq!(r.logden_sub_abs, SQRT_2 * 2.0);
        let expect = -(0.5_f64.ln() + LOG_SQRT_2) - SQRT_2 * 2.0;
        assert_relative_eq!(r.logden(), expect, max_relative = 1e-14);
    }

    #[test]
    fn test_log_gaussian_residual() {
        let a = DensityArgs {
            density: Density::LogGaussian,
            eta: 0.1,
            nu: 0.0,
            sample_size: None,
        };
        let r = value(2.0, 1.0, 0.5, &a);
        let expect = ((2.0_f64 + 0.1).ln() - (1.0_f64 + 0.1).ln()) / 0.5;
        assert_relative_eq!(r.wres, expect, max_relative = 1e-14);
    }

    #[test]
    fn test_censored_gaussian_mass() {
        // y = 0 with mu = 0: half the mass is censored
        let r = value(0.0, 0.0, 1.0, &args(Density::CenGaussian));
        assert_relative_eq!(r.wres, 0.0);
        assert_relative_eq!(r.logden(), 0.5_f64.ln(), max_relative = 1e-12);
        // positive y behaves like a plain gaussian
        let r = value(1.0, 0.0, 1.0, &args(Density::CenGaussian));
        let plain = value(1.0, 0.0, 1.0, &args(Density::Gaussian));
        assert_relative_eq!(r.logden(), plain.logden(), max_relative = 1e-14);
    }

    #[test]
    fn test_students_matches_gaussian_limit() {
        // large nu approaches the gaussian log-density
        let mut a = args(Density::Students);
        a.nu = 1e7;
        let r = value(1.5, 1.0, 0.25, &a);
        let g = value(1.5, 1.0, 0.25, &args(Density::Gaussian));
        assert_relative_eq!(r.logden(), g.logden(), max_relative = 1e-4);
    }

    #[test]
    fn test_binomial() {
        // n = 100, k = 30, mu = 0.25
        let a = DensityArgs {
            density: Density::Binomial,
            eta: 0.0,
            nu: 0.0,
            sample_size: Some(100.0),
        };
        let r = value(0.3, 0.25, 1.0, &a);
        let expect_wres = (0.3 - 0.25) / (0.25_f64 * 0.75 / 100.0).sqrt();
        assert_relative_eq!(r.wres, expect_wres, max_relative = 1e-12);
        let lchoose = statrs::function::gamma::ln_gamma(101.0)
            - statrs::function::gamma::ln_gamma(31.0)
            - statrs::function::gamma::ln_gamma(71.0);
        let expect = lchoose + 30.0 * 0.25_f64.ln() + 70.0 * 0.75_f64.ln();
        assert_relative_eq!(r.logden(), expect, max_relative = 1e-12);
    }

    #[test]
    fn test_difference_residual() {
        let a = args(Density::Gaussian);
        let r = residual_density(ResidualKind::DifferencePrior, 3.0, 1.0, 0.5, 0.5, &a, 7);
        // (z - y - mu) / delta = (3 - 1 - 0.5) / 0.5
        assert_relative_eq!(r.wres, 3.0);
        assert_eq!(r.index, 7);
    }

    #[test]
    fn test_derivative_of_gaussian_logden() {
        use crate::ad::Dual;
        // d/dmu of -(y-mu)^2 / (2 delta^2) is (y-mu)/delta^2
        let a = args(Density::Gaussian);
        let mu = Dual::variable(1.0_f64);
        let r = value(Dual::constant(1.5), mu, Dual::constant(0.25), &a);
        let expect = (1.5 - 1.0) / (0.25 * 0.25);
        assert_relative_eq!(r.logden().dv, expect, max_relative = 1e-12);
    }
}
