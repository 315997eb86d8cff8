//! The numerical model: adjusted rates and integrands, rectangle averages,
//! the cohort ODE, and the data and prior likelihoods

pub mod adjust;
pub mod average;
pub mod context;
pub mod data_like;
pub mod ode;
pub mod prior_like;
pub mod residual;
pub mod time_line;

pub use adjust::AdjustedIntegrand;
pub use average::{AvgIntegrand, Rectangle};
pub use context::ModelContext;
pub use data_like::DataModel;
pub use ode::cohort_ode;
pub use prior_like::PriorModel;
pub use residual::{residual_density, DensityArgs, Residual, ResidualKind};
pub use time_line::{TimeLineVec, TimePoint};

#[cfg(test)]
pub(crate) mod test_util {
    use super::context::ModelContext;
    use crate::table::loader::Integrand;
    use crate::table::option::Options;
    use crate::table::subset::ChildInfo;
    use crate::table::test_util::minimal_input;
    use crate::table::types::*;

    /// Shape of the single-rate model fixtures used by the model tests.
    pub struct CtxSpec {
        pub n_child: usize,
        /// Also model pini and chi parents and add a prevalence integrand.
        pub prevalence_integrand: bool,
        pub pini_value: f64,
        pub chi_value: f64,
    }

    impl Default for CtxSpec {
        fn default() -> Self {
            CtxSpec {
                n_child: 0,
                prevalence_integrand: false,
                pini_value: 0.0,
                chi_value: 0.0,
            }
        }
    }

    pub struct Fixture {
        pub ctx: ModelContext,
        /// A packed vector with parent iota 0.05 and the spec's pini and
        /// chi values; child random effects zero.
        pub pack_vec: Vec<f64>,
    }

    /// A model with parent iota on a one-point smoothing (value 0.05 in
    /// `pack_vec`), optionally with children sharing that smoothing and
    /// optionally with pini/chi parents for ODE integrands.
    pub fn single_rate_context(spec: CtxSpec) -> Fixture {
        let mut input = minimal_input();
        if spec.n_child == 0 {
            input.node.truncate(1);
        } else {
            assert_eq!(spec.n_child, 2, "fixture supports 0 or 2 children");
        }
        input.option = vec![OptionRow {
            option_id: 0,
            option_name: "parent_node_id".to_string(),
            option_value: "0".to_string(),
        }];

        // one wide gaussian value prior on a single-cell smoothing
        input.prior = vec![PriorRow {
            prior_id: 0,
            prior_name: "wide".to_string(),
            density_id: 1,
            lower: None,
            upper: None,
            mean: 0.0,
            std: Some(1.0),
            eta: None,
            nu: None,
        }];
        input.smooth = vec![SmoothRow {
            smooth_id: 0,
            smooth_name: "one_point".to_string(),
            n_age: 1,
            n_time: 1,
            mulstd_value_prior_id: None,
            mulstd_dage_prior_id: None,
            mulstd_dtime_prior_id: None,
        }];
        input.smooth_grid = vec![SmoothGridRow {
            smooth_grid_id: 0,
            smooth_id: 0,
            age_id: 0,
            time_id: 0,
            value_prior_id: Some(0),
            dage_prior_id: None,
            dtime_prior_id: None,
            const_value: None,
        }];

        for row in input.rate.iter_mut() {
            let rate = RateId::from_index(row.rate_id);
            let parent = match rate {
                RateId::Iota => true,
                RateId::Pini | RateId::Chi => spec.prevalence_integrand,
                _ => false,
            };
            row.parent_smooth_id = parent.then_some(0);
            row.child_smooth_id = (rate == RateId::Iota && spec.n_child > 0).then_some(0);
        }

        if spec.prevalence_integrand {
            input.integrand.push(Integrand {
                kind: IntegrandKind::Prevalence,
                mulcov_id: None,
                minimum_meas_cv: 0.0,
            });
        }

        let options = Options::parse(&input).unwrap();
        let child_info = ChildInfo::new(0, &input.node);
        let ctx = ModelContext::build(&input, &options, &child_info).unwrap();

        // packed values: child random effects zero, then parents in rate
        // order (pini, iota, chi when present)
        let mut pack_vec = vec![0.0; ctx.pack.size()];
        for (rate, value) in [
            (RateId::Pini, spec.pini_value),
            (RateId::Iota, 0.05),
            (RateId::Chi, spec.chi_value),
        ] {
            if let Some(info) = ctx.pack.node_rate_value_info(rate.index(), ctx.n_child) {
                pack_vec[info.offset] = value;
            }
        }
        Fixture { ctx, pack_vec }
    }
}
