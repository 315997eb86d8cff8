//! Adjusted integrand on a line of age/time points
//!
//! Assembles the adjusted rate functions (parent rate, child random effect,
//! group and subgroup rate covariate effects, all in log space), solves the
//! cohort ODE when the integrand needs it, evaluates the integrand
//! expression per point, and applies the measurement-value covariate
//! effects.

use crate::ad::Scalar;
use crate::error::{Error, NumericContext, Result};
use crate::grid::grid2line;
use crate::model::context::ModelContext;
use crate::model::ode::cohort_ode;
use crate::pack::SubvecInfo;
use crate::table::types::{IntegrandKind, MulcovType, RateId, N_RATE};

/// Evaluator for adjusted integrand lines.
#[derive(Debug)]
pub struct AdjustedIntegrand<'a> {
    ctx: &'a ModelContext,
    /// Packed-block info per mulcov id, for the `mulcov_<id>` integrands
    /// (group-level multipliers only).
    mulcov_pack_info: Vec<Option<SubvecInfo>>,
}

impl<'a> AdjustedIntegrand<'a> {
    pub fn new(ctx: &'a ModelContext) -> AdjustedIntegrand<'a> {
        // group covariate multipliers are the only ones addressable as
        // integrands; locate each one's packed block
        let mut rate_value_index = vec![0usize; N_RATE];
        let mut meas_value_index = vec![0usize; ctx.integrands.len()];
        let mut meas_noise_index = vec![0usize; ctx.integrands.len()];
        let mut mulcov_pack_info = Vec::with_capacity(ctx.mulcovs.len());
        for m in &ctx.mulcovs {
            if m.group_smooth_id.is_none() {
                mulcov_pack_info.push(None);
                continue;
            }
            let info = match m.mulcov_type {
                MulcovType::RateValue => {
                    let rate_id = m.rate_id.unwrap();
                    let j = rate_value_index[rate_id];
                    rate_value_index[rate_id] += 1;
                    ctx.pack.group_rate_value_info(rate_id, j)
                }
                MulcovType::MeasValue => {
                    let integrand_id = m.integrand_id.unwrap();
                    let j = meas_value_index[integrand_id];
                    meas_value_index[integrand_id] += 1;
                    ctx.pack.group_meas_value_info(integrand_id, j)
                }
                MulcovType::MeasNoise => {
                    let integrand_id = m.integrand_id.unwrap();
                    let j = meas_noise_index[integrand_id];
                    meas_noise_index[integrand_id] += 1;
                    ctx.pack.group_meas_noise_info(integrand_id, j)
                }
            };
            mulcov_pack_info.push(Some(info));
        }
        AdjustedIntegrand {
            ctx,
            mulcov_pack_info,
        }
    }

    /// Interpolate one packed smoothing block onto the line.
    fn block_to_line<F: Scalar>(
        &self,
        info: &SubvecInfo,
        line_age: &[f64],
        line_time: &[f64],
        pack_vec: &[F],
    ) -> Vec<F> {
        let s_info = &self.ctx.smooths[info.smooth_id];
        let values = &pack_vec[info.offset..info.offset + info.n_var];
        grid2line(
            line_age,
            line_time,
            &self.ctx.age,
            &self.ctx.time,
            s_info.age_ids(),
            s_info.time_ids(),
            values,
        )
    }

    /// The covariate value along the line: the per-node covariate map when
    /// one exists for this covariate and node, otherwise the observation's
    /// own covariate value.
    fn covariate_on_line(
        &self,
        covariate_id: usize,
        node_id: usize,
        x: &[f64],
        line_age: &[f64],
        line_time: &[f64],
    ) -> Vec<f64> {
        if let Some(by_node) = self.ctx.node_cov_map.get(&covariate_id) {
            if let Some(&weight_id) = by_node.get(&node_id) {
                let w = &self.ctx.weights[weight_id];
                return w.interpolate(line_age, line_time, &self.ctx.age, &self.ctx.time);
            }
        }
        vec![x[covariate_id]; line_age.len()]
    }

    /// Adjusted rate for one rate along the line, together with the
    /// multiplicative effect applied (for failure reporting).
    fn adjusted_rate<F: Scalar>(
        &self,
        rate_id: usize,
        line_age: &[f64],
        line_time: &[f64],
        child: usize,
        group_id: usize,
        subgroup_offset: usize,
        node_id: usize,
        x: &[f64],
        pack_vec: &[F],
    ) -> (Vec<F>, Vec<F>) {
        let n_line = line_age.len();
        let ctx = self.ctx;

        // parent rate
        let mut rate = match ctx.pack.node_rate_value_info(rate_id, ctx.n_child) {
            Some(info) => self.block_to_line(&info, line_age, line_time, pack_vec),
            None => vec![F::zero(); n_line],
        };

        // total effect in log space
        let mut effect = vec![F::zero(); n_line];

        // child random effect
        if child < ctx.n_child {
            if let Some(info) = ctx.pack.node_rate_value_info(rate_id, child) {
                let u = self.block_to_line(&info, line_age, line_time, pack_vec);
                for k in 0..n_line {
                    effect[k] += u[k];
                }
            }
        }

        // group-level rate covariate effects
        for j in 0..ctx.pack.group_rate_value_n_cov(rate_id) {
            let info = ctx.pack.group_rate_value_info(rate_id, j);
            if info.group_id == Some(group_id) {
                let multiplier = self.block_to_line(&info, line_age, line_time, pack_vec);
                let cov = self.covariate_on_line(
                    info.covariate_id.unwrap(),
                    node_id,
                    x,
                    line_age,
                    line_time,
                );
                for k in 0..n_line {
                    effect[k] += multiplier[k] * F::from_f64(cov[k]);
                }
            }
        }

        // subgroup-level rate covariate effects
        for j in 0..ctx.pack.subgroup_rate_value_n_cov(rate_id) {
            let info0 = ctx.pack.subgroup_rate_value_info(rate_id, j, 0);
            if info0.group_id == Some(group_id) {
                let info = ctx.pack.subgroup_rate_value_info(rate_id, j, subgroup_offset);
                let multiplier = self.block_to_line(&info, line_age, line_time, pack_vec);
                let cov = self.covariate_on_line(
                    info.covariate_id.unwrap(),
                    node_id,
                    x,
                    line_age,
                    line_time,
                );
                for k in 0..n_line {
                    effect[k] += multiplier[k] * F::from_f64(cov[k]);
                }
            }
        }

        // multiply the parent rate by the exponential of the total effect
        let mut effect_mul = Vec::with_capacity(n_line);
        for k in 0..n_line {
            let mul = effect[k].exp();
            rate[k] *= mul;
            effect_mul.push(mul);
        }
        (rate, effect_mul)
    }

    /// Adjusted integrand at each point of the line.
    ///
    /// When the integrand needs the ODE the line must be a cohort: ages
    /// strictly increasing starting at the minimum table age, with
    /// `time[k] - age[k]` constant.
    #[allow(clippy::too_many_arguments)]
    pub fn line<F: Scalar>(
        &self,
        line_age: &[f64],
        line_time: &[f64],
        integrand_id: usize,
        child: usize,
        subgroup_id: usize,
        node_id: usize,
        x: &[f64],
        pack_vec: &[F],
    ) -> Result<Vec<F>> {
        let ctx = self.ctx;
        let n_line = line_age.len();
        let integrand = ctx.integrands[integrand_id].kind;
        let group_id = ctx.subgroups[subgroup_id].group_id;
        let first_subgroup_id = ctx.pack.first_subgroup_id(group_id);
        let subgroup_offset = subgroup_id - first_subgroup_id;

        // the mulcov integrand is a special case: no effects, no ODE
        if integrand == IntegrandKind::Mulcov {
            let mulcov_id = ctx.integrands[integrand_id]
                .mulcov_id
                .expect("mulcov integrand carries its mulcov id");
            return Ok(match &self.mulcov_pack_info[mulcov_id] {
                Some(info) => self.block_to_line(info, line_age, line_time, pack_vec),
                None => vec![F::zero(); n_line],
            });
        }

        // adjusted rates
        let need_ode = integrand.needs_ode();
        let mut rate: Vec<Vec<F>> = vec![Vec::new(); N_RATE];
        let mut effect_mul: Vec<Vec<F>> = vec![Vec::new(); N_RATE];
        for r in integrand.needed_rates() {
            let rate_id = r.index();
            let (values, mul) = self.adjusted_rate(
                rate_id,
                line_age,
                line_time,
                child,
                group_id,
                subgroup_offset,
                node_id,
                x,
                pack_vec,
            );
            rate[rate_id] = values;
            effect_mul[rate_id] = mul;
        }

        // cohort ODE
        let (s_out, c_out) = if need_ode {
            if !self.is_cohort(line_age, line_time) {
                return Err(Error::Optimizer(
                    "internal: ODE integrand evaluated on a line that is not a cohort"
                        .to_string(),
                ));
            }
            let pini = rate[RateId::Pini.index()][0];
            cohort_ode(
                ctx.rate_case,
                line_age,
                pini,
                &rate[RateId::Iota.index()],
                &rate[RateId::Rho.index()],
                &rate[RateId::Chi.index()],
                &rate[RateId::Omega.index()],
            )
        } else {
            (Vec::new(), Vec::new())
        };

        // integrand expression per point
        let mut result = Vec::with_capacity(n_line);
        for k in 0..n_line {
            let r = |id: RateId| rate[id.index()][k];
            let mut need_p = false;
            let value = match integrand {
                IntegrandKind::Sincidence => r(RateId::Iota),
                IntegrandKind::Remission => r(RateId::Rho),
                IntegrandKind::Mtexcess => r(RateId::Chi),
                IntegrandKind::Mtother => r(RateId::Omega),
                IntegrandKind::Mtwith => r(RateId::Omega) + r(RateId::Chi),
                IntegrandKind::Relrisk => F::one() + r(RateId::Chi) / r(RateId::Omega),
                IntegrandKind::Susceptible => s_out[k],
                IntegrandKind::WithC => c_out[k],
                IntegrandKind::Prevalence => {
                    need_p = true;
                    c_out[k] / (s_out[k] + c_out[k])
                }
                IntegrandKind::Tincidence => {
                    need_p = true;
                    let p = c_out[k] / (s_out[k] + c_out[k]);
                    r(RateId::Iota) * (F::one() - p)
                }
                IntegrandKind::Mtspecific => {
                    need_p = true;
                    let p = c_out[k] / (s_out[k] + c_out[k]);
                    r(RateId::Chi) * p
                }
                IntegrandKind::Mtall => {
                    need_p = true;
                    let p = c_out[k] / (s_out[k] + c_out[k]);
                    r(RateId::Omega) + r(RateId::Chi) * p
                }
                IntegrandKind::Mtstandard => {
                    need_p = true;
                    let p = c_out[k] / (s_out[k] + c_out[k]);
                    (r(RateId::Omega) + r(RateId::Chi)) / (r(RateId::Omega) + r(RateId::Chi) * p)
                }
                IntegrandKind::Mulcov => unreachable!(),
            };

            let mut ok = value.is_finite();
            if need_p {
                ok &= (s_out[k] + c_out[k]).value() > 0.0;
            }
            if !ok {
                return Err(Error::Numeric(self.failure_context(
                    integrand,
                    line_age[k],
                    need_ode.then(|| (s_out[k].value(), c_out[k].value())),
                    &rate,
                    &effect_mul,
                    k,
                )));
            }
            result.push(value);
        }

        // measurement value covariate effects
        let mut effect = vec![F::zero(); n_line];
        for j in 0..ctx.pack.group_meas_value_n_cov(integrand_id) {
            let info = ctx.pack.group_meas_value_info(integrand_id, j);
            if info.group_id == Some(group_id) {
                let multiplier = self.block_to_line(&info, line_age, line_time, pack_vec);
                let cov = self.covariate_on_line(
                    info.covariate_id.unwrap(),
                    node_id,
                    x,
                    line_age,
                    line_time,
                );
                for k in 0..n_line {
                    effect[k] += multiplier[k] * F::from_f64(cov[k]);
                }
            }
        }
        for j in 0..ctx.pack.subgroup_meas_value_n_cov(integrand_id) {
            let info0 = ctx.pack.subgroup_meas_value_info(integrand_id, j, 0);
            if info0.group_id == Some(group_id) {
                let info = ctx
                    .pack
                    .subgroup_meas_value_info(integrand_id, j, subgroup_offset);
                let multiplier = self.block_to_line(&info, line_age, line_time, pack_vec);
                let cov = self.covariate_on_line(
                    info.covariate_id.unwrap(),
                    node_id,
                    x,
                    line_age,
                    line_time,
                );
                for k in 0..n_line {
                    effect[k] += multiplier[k] * F::from_f64(cov[k]);
                }
            }
        }
        for k in 0..n_line {
            result[k] *= effect[k].exp();
        }
        Ok(result)
    }

    /// Sum of the measurement noise covariate effects along the line.
    pub fn noise_effect_line<F: Scalar>(
        &self,
        line_age: &[f64],
        line_time: &[f64],
        integrand_id: usize,
        node_id: usize,
        x: &[f64],
        pack_vec: &[F],
    ) -> Vec<F> {
        let ctx = self.ctx;
        let n_line = line_age.len();
        let mut effect = vec![F::zero(); n_line];
        for j in 0..ctx.pack.group_meas_noise_n_cov(integrand_id) {
            let info = ctx.pack.group_meas_noise_info(integrand_id, j);
            let multiplier = self.block_to_line(&info, line_age, line_time, pack_vec);
            let cov = self.covariate_on_line(
                info.covariate_id.unwrap(),
                node_id,
                x,
                line_age,
                line_time,
            );
            for k in 0..n_line {
                effect[k] += multiplier[k] * F::from_f64(cov[k]);
            }
        }
        effect
    }

    fn is_cohort(&self, line_age: &[f64], line_time: &[f64]) -> bool {
        if line_age.is_empty() || !crate::grid::near_equal(line_age[0], self.ctx.age[0]) {
            return false;
        }
        let offset = line_time[0] - line_age[0];
        for k in 1..line_age.len() {
            if line_age[k] <= line_age[k - 1] {
                return false;
            }
            let scale = line_time[k].abs().max(line_age[k].abs()).max(1.0);
            if (line_time[k] - line_age[k] - offset).abs() > 1e-8 * scale {
                return false;
            }
        }
        true
    }

    fn failure_context<F: Scalar>(
        &self,
        integrand: IntegrandKind,
        age: f64,
        compartments: Option<(f64, f64)>,
        rate: &[Vec<F>],
        effect_mul: &[Vec<F>],
        k: usize,
    ) -> NumericContext {
        let mut rates = Vec::new();
        for r in RateId::ALL {
            let rate_id = r.index();
            if !rate[rate_id].is_empty() {
                let adjusted = rate[rate_id][k].value();
                let mul = effect_mul[rate_id][k].value();
                let raw = if mul != 0.0 { adjusted / mul } else { adjusted };
                rates.push((r.name().to_string(), raw, adjusted));
            }
        }
        NumericContext {
            integrand: format!("{} integrand", integrand.name()),
            age,
            susceptible: compartments.map(|(s, _)| s),
            with_condition: compartments.map(|(_, c)| c),
            rates,
        }
    }
}
