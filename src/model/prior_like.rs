//! Prior residuals for fixed and random effects
//!
//! Walks the variables in id order and evaluates up to three residuals per
//! variable (value, forward age difference, forward time difference), each
//! scaled by the owning smoothing's standard deviation multiplier when one
//! is present.  Uniform priors contribute no residual.

use crate::ad::Scalar;
use crate::model::residual::{residual_density, DensityArgs, Residual, ResidualKind};
use crate::pack::{PackInfo, VarPriors};
use crate::table::types::{Density, PriorRow};

/// Negative log-prior evaluator over the packed variable vector.
#[derive(Debug)]
pub struct PriorModel<'a> {
    pack: &'a PackInfo,
    var_priors: &'a VarPriors,
    prior_table: &'a [PriorRow],
    density_table: &'a [Density],
    /// Replacement prior means: `3 * var_id + k` for k in
    /// {value, dage, dtime}.  Defaults to the prior table means.
    prior_mean: Vec<f64>,
}

impl<'a> PriorModel<'a> {
    pub fn new(
        pack: &'a PackInfo,
        var_priors: &'a VarPriors,
        prior_table: &'a [PriorRow],
        density_table: &'a [Density],
    ) -> PriorModel<'a> {
        let n_var = var_priors.size();
        let mut prior_mean = vec![0.0; 3 * n_var];
        for var_id in 0..n_var {
            prior_mean[3 * var_id] = match var_priors.const_value(var_id) {
                Some(c) => c,
                None => match var_priors.value_prior_id(var_id) {
                    Some(prior_id) => prior_table[prior_id].mean,
                    None => 0.0,
                },
            };
            prior_mean[3 * var_id + 1] = var_priors
                .dage_prior_id(var_id)
                .map_or(0.0, |prior_id| prior_table[prior_id].mean);
            prior_mean[3 * var_id + 2] = var_priors
                .dtime_prior_id(var_id)
                .map_or(0.0, |prior_id| prior_table[prior_id].mean);
        }
        PriorModel {
            pack,
            var_priors,
            prior_table,
            density_table,
            prior_mean,
        }
    }

    /// Replace every prior mean; `prior_mean[3 * var_id + k]` as in the
    /// constructor.  Used when refitting against simulated priors.
    pub fn replace_mean(&mut self, prior_mean: Vec<f64>) {
        assert_eq!(prior_mean.len(), self.prior_mean.len());
        self.prior_mean = prior_mean;
    }

    /// One prior residual; `k` is 0 value, 1 dage, 2 dtime.
    fn log_prior<F: Scalar>(
        &self,
        prior_id: usize,
        var_id: usize,
        k: usize,
        z: F,
        y: F,
        mulstd: F,
    ) -> Residual<F> {
        let prior = &self.prior_table[prior_id];
        let kind = if k == 0 {
            ResidualKind::ValuePrior
        } else {
            ResidualKind::DifferencePrior
        };
        let args = DensityArgs {
            density: self.density_table[prior.density_id],
            eta: prior.eta.unwrap_or(0.0),
            nu: prior.nu.unwrap_or(0.0),
            sample_size: None,
        };
        let mu = F::from_f64(self.prior_mean[3 * var_id + k]);
        let delta = mulstd * F::from_f64(prior.std.unwrap_or(1.0));
        residual_density(kind, z, y, mu, delta, &args, 3 * var_id + k)
    }

    /// Standard deviation multiplier value for prior kind `k` of the
    /// variable's smoothing; one when absent.
    fn mulstd<F: Scalar>(&self, var_id: usize, k: usize, pack_vec: &[F]) -> F {
        match self.var_priors.smooth_id(var_id) {
            Some(smooth_id) => match self.pack.mulstd_offset(smooth_id, k) {
                Some(offset) => pack_vec[offset],
                None => F::one(),
            },
            None => F::one(),
        }
    }

    fn residuals<F: Scalar>(&self, pack_vec: &[F], fixed: bool) -> Vec<Residual<F>> {
        let n_var = self.var_priors.size();
        debug_assert_eq!(pack_vec.len(), n_var);
        let mut out = Vec::new();

        for var_id in 0..n_var {
            if self.var_priors.fixed_effect(var_id) != fixed {
                continue;
            }
            let y = pack_vec[var_id];

            if let Some(prior_id) = self.var_priors.value_prior_id(var_id) {
                let mulstd = self.mulstd(var_id, 0, pack_vec);
                let residual = self.log_prior(prior_id, var_id, 0, F::zero(), y, mulstd);
                if residual.density != Density::Uniform {
                    out.push(residual);
                }
            }
            if let Some(prior_id) = self.var_priors.dage_prior_id(var_id) {
                let z = pack_vec[self.var_priors.dage_var_id(var_id)];
                let mulstd = self.mulstd(var_id, 1, pack_vec);
                let residual = self.log_prior(prior_id, var_id, 1, z, y, mulstd);
                if residual.density != Density::Uniform {
                    out.push(residual);
                }
            }
            if let Some(prior_id) = self.var_priors.dtime_prior_id(var_id) {
                let z = pack_vec[self.var_priors.dtime_var_id(var_id)];
                let mulstd = self.mulstd(var_id, 2, pack_vec);
                let residual = self.log_prior(prior_id, var_id, 2, z, y, mulstd);
                if residual.density != Density::Uniform {
                    out.push(residual);
                }
            }
        }
        out
    }

    /// All prior residuals attributable to fixed effects, in variable-id
    /// order.
    pub fn fixed<F: Scalar>(&self, pack_vec: &[F]) -> Vec<Residual<F>> {
        self.residuals(pack_vec, true)
    }

    /// All prior residuals attributable to random effects, in variable-id
    /// order.
    pub fn random<F: Scalar>(&self, pack_vec: &[F]) -> Vec<Residual<F>> {
        self.residuals(pack_vec, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::SmoothGrid;
    use crate::table::types::{RateId, RateRow, SmoothGridRow, SmoothRow, SubgroupRow};
    use approx::assert_relative_eq;

    struct Setup {
        pack: PackInfo,
        var_priors: VarPriors,
        priors: Vec<PriorRow>,
        densities: Vec<Density>,
    }

    fn setup(uniform_value: bool) -> Setup {
        // 2-age x 1-time iota parent smoothing, gaussian dage prior
        let densities = vec![Density::Uniform, Density::Gaussian];
        let priors = vec![
            PriorRow {
                prior_id: 0,
                prior_name: "value".to_string(),
                density_id: if uniform_value { 0 } else { 1 },
                lower: Some(0.0),
                upper: None,
                mean: 0.01,
                std: Some(0.1),
                eta: None,
                nu: None,
            },
            PriorRow {
                prior_id: 1,
                prior_name: "dage".to_string(),
                density_id: 1,
                lower: None,
                upper: None,
                mean: 0.0,
                std: Some(0.5),
                eta: None,
                nu: None,
            },
        ];
        let smooth_row = SmoothRow {
            smooth_id: 0,
            smooth_name: "s".to_string(),
            n_age: 2,
            n_time: 1,
            mulstd_value_prior_id: None,
            mulstd_dage_prior_id: None,
            mulstd_dtime_prior_id: None,
        };
        let grid_rows: Vec<SmoothGridRow> = (0..2)
            .map(|i| SmoothGridRow {
                smooth_grid_id: i,
                smooth_id: 0,
                age_id: i,
                time_id: 0,
                value_prior_id: Some(0),
                dage_prior_id: Some(1),
                dtime_prior_id: None,
                const_value: None,
            })
            .collect();
        let smooths = vec![SmoothGrid::new(&smooth_row, &grid_rows, &priors).unwrap()];
        let rates: Vec<RateRow> = RateId::ALL
            .iter()
            .enumerate()
            .map(|(i, r)| RateRow {
                rate_id: i,
                rate_name: r.name().to_string(),
                parent_smooth_id: (*r == RateId::Iota).then_some(0),
                child_smooth_id: None,
                child_nslist_id: None,
            })
            .collect();
        let subgroups = vec![SubgroupRow {
            subgroup_id: 0,
            subgroup_name: "world".to_string(),
            group_id: 0,
            group_name: "world".to_string(),
        }];
        let pack =
            PackInfo::new(1, &[], &subgroups, &[smooth_row], &[], &rates, &[]).unwrap();
        let var_priors = VarPriors::new(f64::INFINITY, &[], &priors, &pack, &smooths);
        Setup {
            pack,
            var_priors,
            priors,
            densities,
        }
    }

    #[test]
    fn test_value_and_difference_residuals() {
        let s = setup(false);
        let model = PriorModel::new(&s.pack, &s.var_priors, &s.priors, &s.densities);
        let pack_vec = vec![0.02_f64, 0.05];
        let residuals = model.fixed(&pack_vec);
        // two value residuals plus one dage residual
        assert_eq!(residuals.len(), 3);
        assert_relative_eq!(residuals[0].wres, (0.02 - 0.01) / 0.1, max_relative = 1e-12);
        // dage: (z - y - mean) / std with z the next age's variable
        assert_relative_eq!(residuals[1].wres, (0.05 - 0.02) / 0.5, max_relative = 1e-12);
        assert_eq!(residuals[1].index, 3 * 0 + 1);
        assert!(model.random::<f64>(&pack_vec).is_empty());
    }

    #[test]
    fn test_uniform_value_contributes_nothing() {
        let s = setup(true);
        let model = PriorModel::new(&s.pack, &s.var_priors, &s.priors, &s.densities);
        let pack_vec = vec![0.02_f64, 0.05];
        let residuals = model.fixed(&pack_vec);
        // only the dage residual remains
        assert_eq!(residuals.len(), 1);
        assert_eq!(residuals[0].index, 1);
    }

    #[test]
    fn test_replace_mean() {
        let s = setup(false);
        let mut model = PriorModel::new(&s.pack, &s.var_priors, &s.priors, &s.densities);
        let mut means = vec![0.0; 6];
        means[0] = 0.02; // value mean for var 0
        model.replace_mean(means);
        let pack_vec = vec![0.02_f64, 0.05];
        let residuals = model.fixed(&pack_vec);
        assert_relative_eq!(residuals[0].wres, 0.0);
    }
}
