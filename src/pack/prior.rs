//! Priors in variable-id order
//!
//! For every packed variable this resolves the governing value prior (or
//! constant), the forward age/time difference priors, the difference
//! partners, and the absolute bound.  The bounded difference priors also
//! yield the linear constraint list handed to the fixed-effects optimizer.

use super::info::PackInfo;
use crate::grid::SmoothGrid;
use crate::table::types::{BndMulcovRow, PriorRow, N_RATE};

/// Prior bookkeeping for a single variable.
#[derive(Debug, Clone)]
struct VarPrior {
    max_abs: f64,
    const_value: Option<f64>,
    n_time: usize,
    smooth_id: Option<usize>,
    mulcov_id: Option<usize>,
    value_prior_id: Option<usize>,
    dage_prior_id: Option<usize>,
    dtime_prior_id: Option<usize>,
    fixed_effect: bool,
}

impl VarPrior {
    fn undefined() -> VarPrior {
        VarPrior {
            max_abs: f64::NAN,
            const_value: None,
            n_time: 0,
            smooth_id: None,
            mulcov_id: None,
            value_prior_id: None,
            dage_prior_id: None,
            dtime_prior_id: None,
            fixed_effect: false,
        }
    }
}

/// Direction of a difference constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffDirection {
    Dage,
    Dtime,
}

/// One linear constraint `var[plus] - var[minus] in [lower, upper]` derived
/// from a bounded difference prior.
#[derive(Debug, Clone, Copy)]
pub struct DiffConstraint {
    pub direction: DiffDirection,
    pub plus_var_id: usize,
    pub minus_var_id: usize,
    pub prior_id: usize,
}

/// Per-variable prior lookup for a whole packed vector.
#[derive(Debug, Clone)]
pub struct VarPriors {
    vec: Vec<VarPrior>,
}

impl VarPriors {
    pub fn new(
        bound_random: f64,
        n_child_data_in_fit: &[usize],
        prior_table: &[PriorRow],
        pack: &PackInfo,
        smooths: &[SmoothGrid],
    ) -> VarPriors {
        let n_var = pack.size();
        let n_child = pack.child_size();
        let mut vec = vec![VarPrior::undefined(); n_var];

        // smoothing standard deviation multipliers
        for smooth_id in 0..pack.smooth_size() {
            let mulstd_priors = [
                smooths[smooth_id].mulstd_value_prior(),
                smooths[smooth_id].mulstd_dage_prior(),
                smooths[smooth_id].mulstd_dtime_prior(),
            ];
            for (k, prior_id) in mulstd_priors.iter().enumerate() {
                if let Some(offset) = pack.mulstd_offset(smooth_id, k) {
                    let slot = &mut vec[offset];
                    slot.max_abs = f64::INFINITY;
                    slot.n_time = 1;
                    slot.fixed_effect = true;
                    slot.value_prior_id = *prior_id;
                }
            }
        }

        let mut fill = |offset: usize,
                        fixed_effect: bool,
                        mulcov_id: Option<usize>,
                        smooth_id: usize,
                        bound: f64,
                        vec: &mut Vec<VarPrior>| {
            let s_info = &smooths[smooth_id];
            let n_time = s_info.n_time();
            for i in 0..s_info.n_age() {
                for j in 0..n_time {
                    let var_id = offset + i * n_time + j;
                    let slot = &mut vec[var_id];
                    slot.fixed_effect = fixed_effect;
                    slot.mulcov_id = mulcov_id;
                    slot.smooth_id = Some(smooth_id);
                    slot.n_time = n_time;
                    slot.const_value = s_info.const_value(i, j);
                    slot.value_prior_id = s_info.value_prior_id(i, j);
                    slot.dage_prior_id = s_info.dage_prior_id(i, j);
                    slot.dtime_prior_id = s_info.dtime_prior_id(i, j);
                    slot.max_abs = if fixed_effect || slot.const_value.is_some() {
                        f64::INFINITY
                    } else {
                        let prior_id = slot.value_prior_id.expect("value prior or const");
                        let p = &prior_table[prior_id];
                        if p.lower_bound() == p.upper_bound() {
                            f64::INFINITY
                        } else {
                            bound
                        }
                    };
                }
            }
        };

        // node rate grids: children then parent
        for rate_id in 0..N_RATE {
            for j in 0..=n_child {
                if let Some(info) = pack.node_rate_value_info(rate_id, j) {
                    let fixed_effect = j == n_child;
                    // children with no data in the fit have their random
                    // effects held at constants
                    let bound = if j < n_child && n_child_data_in_fit[j] == 0 {
                        0.0
                    } else {
                        bound_random
                    };
                    fill(info.offset, fixed_effect, None, info.smooth_id, bound, &mut vec);
                }
            }
        }

        // subgroup rate value covariates (random)
        for rate_id in 0..N_RATE {
            for j in 0..pack.subgroup_rate_value_n_cov(rate_id) {
                for k in 0..pack.subgroup_rate_value_n_sub(rate_id, j) {
                    let info = pack.subgroup_rate_value_info(rate_id, j, k);
                    fill(
                        info.offset,
                        false,
                        info.mulcov_id,
                        info.smooth_id,
                        bound_random,
                        &mut vec,
                    );
                }
            }
        }

        // group rate value covariates (fixed)
        for rate_id in 0..N_RATE {
            for j in 0..pack.group_rate_value_n_cov(rate_id) {
                let info = pack.group_rate_value_info(rate_id, j);
                fill(
                    info.offset,
                    true,
                    info.mulcov_id,
                    info.smooth_id,
                    bound_random,
                    &mut vec,
                );
            }
        }

        // subgroup measurement value covariates (random)
        for integrand_id in 0..pack.integrand_size() {
            for j in 0..pack.subgroup_meas_value_n_cov(integrand_id) {
                for k in 0..pack.subgroup_meas_value_n_sub(integrand_id, j) {
                    let info = pack.subgroup_meas_value_info(integrand_id, j, k);
                    fill(
                        info.offset,
                        false,
                        info.mulcov_id,
                        info.smooth_id,
                        bound_random,
                        &mut vec,
                    );
                }
            }
        }

        // group measurement covariates (fixed)
        for integrand_id in 0..pack.integrand_size() {
            for j in 0..pack.group_meas_value_n_cov(integrand_id) {
                let info = pack.group_meas_value_info(integrand_id, j);
                fill(
                    info.offset,
                    true,
                    info.mulcov_id,
                    info.smooth_id,
                    bound_random,
                    &mut vec,
                );
            }
            for j in 0..pack.group_meas_noise_n_cov(integrand_id) {
                let info = pack.group_meas_noise_info(integrand_id, j);
                fill(
                    info.offset,
                    true,
                    info.mulcov_id,
                    info.smooth_id,
                    bound_random,
                    &mut vec,
                );
            }
        }

        VarPriors { vec }
    }

    pub fn size(&self) -> usize {
        self.vec.len()
    }

    pub fn const_value(&self, var_id: usize) -> Option<f64> {
        self.vec[var_id].const_value
    }

    /// `None` only for standard deviation multiplier variables.
    pub fn smooth_id(&self, var_id: usize) -> Option<usize> {
        self.vec[var_id].smooth_id
    }

    pub fn mulcov_id(&self, var_id: usize) -> Option<usize> {
        self.vec[var_id].mulcov_id
    }

    pub fn value_prior_id(&self, var_id: usize) -> Option<usize> {
        self.vec[var_id].value_prior_id
    }

    pub fn dage_prior_id(&self, var_id: usize) -> Option<usize> {
        self.vec[var_id].dage_prior_id
    }

    pub fn dtime_prior_id(&self, var_id: usize) -> Option<usize> {
        self.vec[var_id].dtime_prior_id
    }

    /// The age-difference partner: one age row further in the same grid.
    pub fn dage_var_id(&self, var_id: usize) -> usize {
        var_id + self.vec[var_id].n_time
    }

    /// The time-difference partner: the next column in the same grid.
    pub fn dtime_var_id(&self, var_id: usize) -> usize {
        var_id + 1
    }

    pub fn fixed_effect(&self, var_id: usize) -> bool {
        self.vec[var_id].fixed_effect
    }

    pub fn max_abs(&self, var_id: usize) -> f64 {
        self.vec[var_id].max_abs
    }

    /// Tighten `max_abs` for fixed-effect covariate multipliers from the
    /// bnd_mulcov table.
    pub fn set_bnd_mulcov(&mut self, bnd_mulcov_table: &[BndMulcovRow]) {
        for slot in &mut self.vec {
            if slot.fixed_effect {
                if let Some(mulcov_id) = slot.mulcov_id {
                    if let Some(max) = bnd_mulcov_table[mulcov_id].max_mulcov {
                        slot.max_abs = max;
                    }
                }
            }
        }
    }

    /// Box limits for one variable: the value prior's bounds (or the
    /// constant twice), clipped to `[-max_abs, max_abs]`.
    pub fn var_limits(&self, var_id: usize, prior_table: &[PriorRow]) -> (f64, f64) {
        let slot = &self.vec[var_id];
        let (mut lower, mut upper) = match (slot.const_value, slot.value_prior_id) {
            (Some(c), _) => (c, c),
            (None, Some(prior_id)) => {
                let p = &prior_table[prior_id];
                (p.lower_bound(), p.upper_bound())
            }
            (None, None) => (f64::NEG_INFINITY, f64::INFINITY),
        };
        if lower < upper && slot.max_abs.is_finite() {
            lower = lower.max(-slot.max_abs);
            upper = upper.min(slot.max_abs);
        }
        (lower, upper)
    }

    /// The difference-constraint list: one entry per variable whose dage or
    /// dtime prior has a finite lower or upper limit.
    pub fn diff_constraints(&self, prior_table: &[PriorRow]) -> Vec<DiffConstraint> {
        let mut list = Vec::new();
        for var_id in 0..self.size() {
            if let Some(prior_id) = self.dage_prior_id(var_id) {
                let p = &prior_table[prior_id];
                if p.lower_bound().is_finite() || p.upper_bound().is_finite() {
                    list.push(DiffConstraint {
                        direction: DiffDirection::Dage,
                        plus_var_id: self.dage_var_id(var_id),
                        minus_var_id: var_id,
                        prior_id,
                    });
                }
            }
            if let Some(prior_id) = self.dtime_prior_id(var_id) {
                let p = &prior_table[prior_id];
                if p.lower_bound().is_finite() || p.upper_bound().is_finite() {
                    list.push(DiffConstraint {
                        direction: DiffDirection::Dtime,
                        plus_var_id: self.dtime_var_id(var_id),
                        minus_var_id: var_id,
                        prior_id,
                    });
                }
            }
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::types::{RateId, RateRow, SmoothGridRow, SmoothRow, SubgroupRow};

    fn build() -> (PackInfo, Vec<SmoothGrid>, Vec<PriorRow>) {
        // one smoothing: 2 ages x 2 times, wide value prior, bounded dage
        // prior, unbounded dtime prior
        let priors = vec![
            PriorRow {
                prior_id: 0,
                prior_name: "value".to_string(),
                density_id: 1,
                lower: Some(1e-4),
                upper: Some(1.0),
                mean: 0.01,
                std: Some(1.0),
                eta: None,
                nu: None,
            },
            PriorRow {
                prior_id: 1,
                prior_name: "dage".to_string(),
                density_id: 0,
                lower: Some(0.0),
                upper: Some(0.0),
                mean: 0.0,
                std: None,
                eta: None,
                nu: None,
            },
            PriorRow {
                prior_id: 2,
                prior_name: "dtime".to_string(),
                density_id: 0,
                lower: None,
                upper: None,
                mean: 0.0,
                std: None,
                eta: None,
                nu: None,
            },
        ];
        let smooth_row = SmoothRow {
            smooth_id: 0,
            smooth_name: "s".to_string(),
            n_age: 2,
            n_time: 2,
            mulstd_value_prior_id: None,
            mulstd_dage_prior_id: None,
            mulstd_dtime_prior_id: None,
        };
        let mut grid_rows = Vec::new();
        for (k, (i, j)) in [(0, 0), (0, 1), (1, 0), (1, 1)].iter().enumerate() {
            grid_rows.push(SmoothGridRow {
                smooth_grid_id: k,
                smooth_id: 0,
                age_id: *i,
                time_id: *j,
                value_prior_id: Some(0),
                dage_prior_id: Some(1),
                dtime_prior_id: Some(2),
                const_value: None,
            });
        }
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
        let pack = PackInfo::new(
            1,
            &[],
            &subgroups,
            &[smooth_row],
            &[],
            &rates,
            &[],
        )
        .unwrap();
        (pack, smooths, priors)
    }

    #[test]
    fn test_difference_partners() {
        let (pack, smooths, priors) = build();
        let vp = VarPriors::new(f64::INFINITY, &[], &priors, &pack, &smooths);
        assert_eq!(vp.size(), 4);
        // time-major 2x2 grid: var 0 is (age 0, time 0)
        assert_eq!(vp.dage_var_id(0), 2);
        assert_eq!(vp.dtime_var_id(0), 1);
        // last age row has no dage prior; last time column no dtime prior
        assert!(vp.dage_prior_id(0).is_some());
        assert!(vp.dage_prior_id(2).is_none());
        assert!(vp.dtime_prior_id(1).is_none());
        assert!(vp.fixed_effect(0));
    }

    #[test]
    fn test_diff_constraint_list() {
        let (pack, smooths, priors) = build();
        let vp = VarPriors::new(f64::INFINITY, &[], &priors, &pack, &smooths);
        let list = vp.diff_constraints(&priors);
        // bounded dage priors at (0,0) and (0,1); dtime priors are
        // unbounded uniforms and do not constrain
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|c| c.direction == DiffDirection::Dage));
        assert_eq!(list[0].minus_var_id, 0);
        assert_eq!(list[0].plus_var_id, 2);
    }

    #[test]
    fn test_var_limits() {
        let (pack, smooths, priors) = build();
        let vp = VarPriors::new(f64::INFINITY, &[], &priors, &pack, &smooths);
        let (lower, upper) = vp.var_limits(0, &priors);
        assert_eq!(lower, 1e-4);
        assert_eq!(upper, 1.0);
    }
}
