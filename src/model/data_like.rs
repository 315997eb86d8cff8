//! Data residuals and log-likelihoods
//!
//! Owns the data subset for one fit.  `replace_like` installs the
//! likelihood columns (density, hold-out, measurement, and optionally a
//! simulated value); `average` computes one average integrand; `like_one`
//! forms the weighted residual with the adjusted standard deviation; and
//! `like_all` walks the whole subset.

use crate::ad::Scalar;
use crate::error::{Error, Result};
use crate::model::average::{AvgIntegrand, Rectangle};
use crate::model::context::ModelContext;
use crate::model::residual::{residual_density, DensityArgs, Residual, ResidualKind};
use crate::table::option::MeasNoiseEffect;
use crate::table::subset::SubsetDataPoint;
use crate::table::types::Density;

/// Per-subset-row derived information that does not change during a fit.
#[derive(Debug, Clone)]
struct DataInfo {
    density: Density,
    /// Whether this row's model depends on random effects that are not
    /// constrained to constants.
    depend_on_ran_var: bool,
}

/// Data likelihood evaluator.
#[derive(Debug)]
pub struct DataModel<'a> {
    ctx: &'a ModelContext,
    avg: AvgIntegrand<'a>,
    subset: Vec<SubsetDataPoint>,
    info: Vec<DataInfo>,
    meas_noise_effect: MeasNoiseEffect,
    /// When true, `like_one` fits the substituted simulated values.
    fit_simulated_data: bool,
    replace_like_called: bool,
}

impl<'a> DataModel<'a> {
    pub fn new(
        ctx: &'a ModelContext,
        subset: Vec<SubsetDataPoint>,
        meas_noise_effect: MeasNoiseEffect,
        bound_random: f64,
    ) -> DataModel<'a> {
        let info = subset
            .iter()
            .map(|point| DataInfo {
                density: Density::Uniform,
                depend_on_ran_var: depend_on_ran_var_impl(ctx, point, bound_random),
            })
            .collect();
        DataModel {
            ctx,
            avg: AvgIntegrand::new(ctx),
            subset,
            info,
            meas_noise_effect,
            fit_simulated_data: false,
            replace_like_called: false,
        }
    }

    pub fn n_subset(&self) -> usize {
        self.subset.len()
    }

    pub fn subset(&self) -> &[SubsetDataPoint] {
        &self.subset
    }

    pub fn avg_integrand(&self) -> &AvgIntegrand<'a> {
        &self.avg
    }

    /// True when this row's model depends on non-constant random effects.
    pub fn depend_on_ran_var(&self, subset_id: usize) -> bool {
        self.info[subset_id].depend_on_ran_var
    }

    /// Install the likelihood columns for every subset row.  The
    /// non-smooth Laplace densities are rejected on rows whose model
    /// depends on non-constant random effects.
    pub fn replace_like(&mut self, replacement: Vec<SubsetDataPoint>) -> Result<()> {
        assert_eq!(replacement.len(), self.subset.len());
        let mut fit_simulated = false;
        for (subset_id, point) in replacement.into_iter().enumerate() {
            let density = self.ctx_density(point.density_id);
            if density.is_nonsmooth() && self.info[subset_id].depend_on_ran_var {
                return Err(Error::table(
                    "data",
                    point.original_id,
                    format!(
                        "density is {} and model depends on random effects \
                         that are not constrained",
                        density.name()
                    ),
                ));
            }
            fit_simulated |= point.data_sim_value.is_some();
            self.info[subset_id].density = density;
            self.subset[subset_id] = point;
        }
        self.fit_simulated_data = fit_simulated;
        self.replace_like_called = true;
        Ok(())
    }

    fn ctx_density(&self, density_id: usize) -> Density {
        self.ctx.densities[density_id]
    }

    /// Average integrand for one subset row.
    pub fn average<F: Scalar>(&self, subset_id: usize, pack_vec: &[F]) -> Result<F> {
        let point = &self.subset[subset_id];
        let rect = Rectangle {
            age_lower: point.age_lower,
            age_upper: point.age_upper,
            time_lower: point.time_lower,
            time_upper: point.time_upper,
            weight_id: point.weight_id,
            integrand_id: point.integrand_id,
            child: point.child,
            subgroup_id: point.subgroup_id,
            node_id: point.node_id,
            x: &point.x,
        };
        self.avg.rectangle(&rect, pack_vec)
    }

    /// Weighted residual and log-density for one subset row, given its
    /// average integrand.  Also returns the adjusted standard deviation.
    pub fn like_one<F: Scalar>(
        &self,
        subset_id: usize,
        pack_vec: &[F],
        avg: F,
    ) -> Result<(Residual<F>, F)> {
        assert!(self.replace_like_called, "replace_like must run before like_one");
        let point = &self.subset[subset_id];
        let density = self.info[subset_id].density;

        // average measurement noise effect over the same rectangle
        let rect = Rectangle {
            age_lower: point.age_lower,
            age_upper: point.age_upper,
            time_lower: point.time_lower,
            time_upper: point.time_upper,
            weight_id: point.weight_id,
            integrand_id: point.integrand_id,
            child: point.child,
            subgroup_id: point.subgroup_id,
            node_id: point.node_id,
            x: &point.x,
        };
        let std_effect = self.avg.rectangle_noise(&rect, pack_vec)?;

        if point.meas_std <= 0.0 {
            return Err(Error::table(
                "data",
                point.original_id,
                "meas_std must be positive",
            ));
        }
        let meas_cv = self.ctx.integrands[point.integrand_id].minimum_meas_cv;
        let delta_cap = point.meas_std.max(meas_cv * point.meas_value.abs());

        // transformed standard deviation
        let eta = point.eta.unwrap_or(0.0);
        let sigma = if density.is_log() {
            (point.meas_value + eta + delta_cap).ln() - (point.meas_value + eta).ln()
        } else {
            delta_cap
        };
        let sigma = F::from_f64(sigma);

        // adjusted standard deviation
        let one = F::one();
        let delta = match self.meas_noise_effect {
            MeasNoiseEffect::AddStdScaleAll => sigma * (one + std_effect),
            MeasNoiseEffect::AddStdScaleNone => sigma + std_effect,
            MeasNoiseEffect::AddStdScaleLog => {
                if density.is_log() {
                    sigma * (one + std_effect)
                } else {
                    sigma + std_effect
                }
            }
            MeasNoiseEffect::AddVarScaleAll => sigma * (one + std_effect).sqrt(),
            MeasNoiseEffect::AddVarScaleNone => (sigma * sigma + std_effect).sqrt(),
            MeasNoiseEffect::AddVarScaleLog => {
                if density.is_log() {
                    sigma * (one + std_effect).sqrt()
                } else {
                    (sigma * sigma + std_effect).sqrt()
                }
            }
        };

        let y = if self.fit_simulated_data {
            point
                .data_sim_value
                .expect("fitting simulated data requires data_sim_value")
        } else {
            point.meas_value
        };
        let args = DensityArgs {
            density,
            eta,
            nu: point.nu.unwrap_or(0.0),
            sample_size: point.sample_size.map(|n| n as f64),
        };
        let residual = residual_density(
            ResidualKind::Data,
            F::zero(),
            F::from_f64(y),
            avg,
            delta,
            &args,
            subset_id,
        );
        Ok((residual, delta))
    }

    /// All data residuals.  With `hold_out` true, held-out rows are
    /// skipped.  `random_depend` restricts to rows whose model does
    /// (`Some(true)`) or does not (`Some(false)`) depend on non-constant
    /// random effects.
    pub fn like_all<F: Scalar>(
        &self,
        hold_out: bool,
        random_depend: Option<bool>,
        pack_vec: &[F],
    ) -> Result<Vec<Residual<F>>> {
        let mut out = Vec::new();
        for subset_id in 0..self.subset.len() {
            if hold_out && self.subset[subset_id].hold_out {
                continue;
            }
            if let Some(want) = random_depend {
                if self.info[subset_id].depend_on_ran_var != want {
                    continue;
                }
            }
            let avg = self.average(subset_id, pack_vec)?;
            let (residual, _) = self.like_one(subset_id, pack_vec, avg)?;
            out.push(residual);
        }
        Ok(out)
    }
}

/// Does a data point's model depend on random effects that are not
/// constrained to constants?
fn depend_on_ran_var_impl(ctx: &ModelContext, point: &SubsetDataPoint, bound_random: f64) -> bool {
    if bound_random <= 0.0 {
        return false;
    }
    let integrand = ctx.integrands[point.integrand_id].kind;
    let group_id = ctx.subgroups[point.subgroup_id].group_id;
    let rate_ids: Vec<usize> = integrand.needed_rates().iter().map(|r| r.index()).collect();

    // child rate random effects
    if point.child < ctx.n_child {
        for &rate_id in &rate_ids {
            if let Some(info) = ctx.pack.node_rate_value_info(rate_id, point.child) {
                if !ctx.smooths[info.smooth_id].all_const_value() {
                    return true;
                }
            }
        }
    }
    // subgroup rate covariate random effects
    for &rate_id in &rate_ids {
        for j in 0..ctx.pack.subgroup_rate_value_n_cov(rate_id) {
            let info = ctx.pack.subgroup_rate_value_info(rate_id, j, 0);
            if info.group_id == Some(group_id)
                && !ctx.smooths[info.smooth_id].all_const_value()
            {
                return true;
            }
        }
    }
    // subgroup measurement covariate random effects
    for j in 0..ctx.pack.subgroup_meas_value_n_cov(point.integrand_id) {
        let info = ctx.pack.subgroup_meas_value_info(point.integrand_id, j, 0);
        if info.group_id == Some(group_id) && !ctx.smooths[info.smooth_id].all_const_value() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_util::{single_rate_context, CtxSpec};
    use approx::assert_relative_eq;

    fn point(node_id: usize, child: usize, density_id: usize, hold_out: bool) -> SubsetDataPoint {
        SubsetDataPoint {
            original_id: 0,
            integrand_id: 0,
            density_id,
            node_id,
            subgroup_id: 0,
            weight_id: None,
            hold_out,
            meas_value: 0.04,
            meas_std: 0.01,
            eta: None,
            nu: None,
            sample_size: None,
            age_lower: 0.0,
            age_upper: 100.0,
            time_lower: 2000.0,
            time_upper: 2000.0,
            child,
            x: vec![],
            data_sim_value: None,
        }
    }

    // density ids in the minimal fixture table
    const GAUSSIAN: usize = 1;
    const LAPLACE: usize = 3;

    #[test]
    fn test_like_all_counts_respect_hold_out() {
        let fixture = single_rate_context(CtxSpec::default());
        let ctx = &fixture.ctx;
        let n_child = ctx.n_child;
        let subset = vec![
            point(0, n_child, GAUSSIAN, false),
            point(0, n_child, GAUSSIAN, true),
            point(0, n_child, GAUSSIAN, false),
        ];
        let mut model = DataModel::new(
            ctx,
            subset.clone(),
            crate::table::option::MeasNoiseEffect::AddStdScaleAll,
            f64::INFINITY,
        );
        model.replace_like(subset).unwrap();

        let all = model.like_all(false, None, &fixture.pack_vec).unwrap();
        assert_eq!(all.len(), 3);
        let kept = model.like_all(true, None, &fixture.pack_vec).unwrap();
        assert_eq!(kept.len(), 2);
        // residual indices are subset ids
        assert_eq!(kept[0].index, 0);
        assert_eq!(kept[1].index, 2);
    }

    #[test]
    fn test_residual_value() {
        let fixture = single_rate_context(CtxSpec::default());
        let ctx = &fixture.ctx;
        let subset = vec![point(0, ctx.n_child, GAUSSIAN, false)];
        let mut model = DataModel::new(
            ctx,
            subset.clone(),
            crate::table::option::MeasNoiseEffect::AddStdScaleAll,
            f64::INFINITY,
        );
        model.replace_like(subset).unwrap();

        let avg = model.average(0, &fixture.pack_vec).unwrap();
        assert_relative_eq!(avg, 0.05, max_relative = 1e-12);
        let (residual, delta) = model.like_one(0, &fixture.pack_vec, avg).unwrap();
        // no noise covariates: delta is the measurement standard deviation
        assert_relative_eq!(delta, 0.01, max_relative = 1e-12);
        assert_relative_eq!(residual.wres, (0.04 - 0.05) / 0.01, max_relative = 1e-12);
    }

    #[test]
    fn test_minimum_meas_cv_floors_delta() {
        let fixture = single_rate_context(CtxSpec::default());
        let mut ctx_owned = fixture.ctx;
        ctx_owned.integrands[0].minimum_meas_cv = 0.5;
        let ctx = &ctx_owned;
        let subset = vec![point(0, ctx.n_child, GAUSSIAN, false)];
        let mut model = DataModel::new(
            ctx,
            subset.clone(),
            crate::table::option::MeasNoiseEffect::AddStdScaleAll,
            f64::INFINITY,
        );
        model.replace_like(subset).unwrap();
        let (_, delta) = model.like_one(0, &fixture.pack_vec, 0.05).unwrap();
        // max(0.01, 0.5 * |0.04|) = 0.02
        assert_relative_eq!(delta, 0.02, max_relative = 1e-12);
    }

    #[test]
    fn test_laplace_rejected_when_model_depends_on_random_effects() {
        let fixture = single_rate_context(CtxSpec {
            n_child: 2,
            ..CtxSpec::default()
        });
        let ctx = &fixture.ctx;
        // data on child 0 with a non-constant child smoothing
        let subset = vec![point(1, 0, LAPLACE, false)];
        let mut model = DataModel::new(
            ctx,
            subset.clone(),
            crate::table::option::MeasNoiseEffect::AddStdScaleAll,
            f64::INFINITY,
        );
        assert!(model.depend_on_ran_var(0));
        let err = model.replace_like(subset).unwrap_err();
        assert!(err.to_string().contains("laplace"));

        // the same data at the parent node is fine
        let subset = vec![point(0, ctx.n_child, LAPLACE, false)];
        let mut model = DataModel::new(
            ctx,
            subset.clone(),
            crate::table::option::MeasNoiseEffect::AddStdScaleAll,
            f64::INFINITY,
        );
        assert!(!model.depend_on_ran_var(0));
        model.replace_like(subset).unwrap();
    }
}
