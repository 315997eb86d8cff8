//! Random draws from the measurement and prior densities
//!
//! Used by the `simulate` command to generate simulated measurements and
//! simulated prior means.  Draws are location/scale transforms of standard
//! draws so that the mean is `mu` and the standard deviation `delta`
//! (linear densities) or the transformed deviation in log space.

use rand::Rng;
use rand_distr::{Binomial, Distribution, StandardNormal, StudentT};

use crate::error::{Error, Result};
use crate::table::types::Density;

/// One simulated value for a density with location `mu`, scale `delta`,
/// and the density's `eta`/`nu`/`sample_size` parameters.
pub fn sim_random<R: Rng>(
    rng: &mut R,
    density: Density,
    mu: f64,
    delta: f64,
    eta: f64,
    nu: f64,
    sample_size: Option<u64>,
) -> Result<f64> {
    match density {
        Density::Uniform => Ok(mu),

        Density::Gaussian | Density::CenGaussian => {
            let z: f64 = rng.sample(StandardNormal);
            let value = mu + delta * z;
            Ok(if density.is_censored() { value.max(0.0) } else { value })
        }

        Density::Laplace | Density::CenLaplace => {
            let value = mu + delta * laplace_draw(rng);
            Ok(if density.is_censored() { value.max(0.0) } else { value })
        }

        Density::Students => {
            let t = StudentT::new(nu)
                .map_err(|e| Error::Optimizer(format!("students draw: {e}")))?;
            // scale so the draw's standard deviation is delta
            let scale = delta * ((nu - 2.0) / nu).sqrt();
            Ok(mu + scale * t.sample(rng))
        }

        Density::LogGaussian | Density::CenLogGaussian => {
            let z: f64 = rng.sample(StandardNormal);
            let value = (mu + eta) * (delta * z).exp() - eta;
            Ok(if density.is_censored() { value.max(0.0) } else { value })
        }

        Density::LogLaplace | Density::CenLogLaplace => {
            let value = (mu + eta) * (delta * laplace_draw(rng)).exp() - eta;
            Ok(if density.is_censored() { value.max(0.0) } else { value })
        }

        Density::LogStudents => {
            let t = StudentT::new(nu)
                .map_err(|e| Error::Optimizer(format!("log_students draw: {e}")))?;
            let scale = delta * ((nu - 2.0) / nu).sqrt();
            Ok((mu + eta) * (scale * t.sample(rng)).exp() - eta)
        }

        Density::Binomial => {
            let n = sample_size.ok_or_else(|| {
                Error::Optimizer("binomial draw requires sample_size".to_string())
            })?;
            let p = mu.clamp(0.0, 1.0);
            let b = Binomial::new(n, p)
                .map_err(|e| Error::Optimizer(format!("binomial draw: {e}")))?;
            Ok(b.sample(rng) as f64 / n as f64)
        }
    }
}

/// A standard Laplace draw with unit standard deviation.
fn laplace_draw<R: Rng>(rng: &mut R) -> f64 {
    // inverse CDF of the Laplace distribution with scale 1/sqrt(2)
    let u: f64 = rng.gen_range(-0.5..0.5);
    -u.signum() * (1.0 - 2.0 * u.abs()).ln() / std::f64::consts::SQRT_2
}
