//! Shared immutable model context
//!
//! Owns the cooked tables and grids every model component reads: axes, the
//! age-average grid, smoothing and weight grids, the packed layout, and the
//! option values the numeric kernels need.  Built once per command.

use std::collections::HashMap;

use crate::error::Result;
use crate::grid::{age_avg_grid, SmoothGrid, WeightGrid};
use crate::pack::PackInfo;
use crate::table::loader::{DbInput, Integrand, Mulcov};
use crate::table::option::{Options, RateCase};
use crate::table::subset::ChildInfo;
use crate::table::types::{Density, PriorRow, SubgroupRow};

/// Everything the model layer reads and never writes.
#[derive(Debug)]
pub struct ModelContext {
    pub age: Vec<f64>,
    pub time: Vec<f64>,
    pub age_avg: Vec<f64>,
    pub smooths: Vec<SmoothGrid>,
    /// Weight grids by weight id; the constant weighting is used for rows
    /// whose weight id is null.
    pub weights: Vec<WeightGrid>,
    pub constant_weight: WeightGrid,
    pub integrands: Vec<Integrand>,
    pub mulcovs: Vec<Mulcov>,
    pub subgroups: Vec<SubgroupRow>,
    pub priors: Vec<PriorRow>,
    pub densities: Vec<Density>,
    pub pack: PackInfo,
    pub n_child: usize,
    pub n_covariate: usize,
    pub rate_case: RateCase,
    pub ode_step_size: f64,
    /// Per-covariate map from node id to the weight grid giving that
    /// covariate's value as a function of age and time.
    pub node_cov_map: HashMap<usize, HashMap<usize, usize>>,
}

impl ModelContext {
    pub fn build(input: &DbInput, options: &Options, child_info: &ChildInfo) -> Result<ModelContext> {
        let smooths = input
            .smooth
            .iter()
            .map(|row| SmoothGrid::new(row, &input.smooth_grid, &input.prior))
            .collect::<Result<Vec<_>>>()?;
        let weights = input
            .weight
            .iter()
            .map(|row| WeightGrid::new(row, &input.weight_grid))
            .collect::<Result<Vec<_>>>()?;
        let age_avg = age_avg_grid(options.ode_step_size, &options.age_avg_split, &input.age)?;

        let child_id2node_id: Vec<usize> = (0..child_info.n_child())
            .map(|c| child_info.child_node_id(c))
            .collect();
        let pack = PackInfo::new(
            input.integrand.len(),
            &child_id2node_id,
            &input.subgroup,
            &input.smooth,
            &input.mulcov,
            &input.rate,
            &input.nslist_pair,
        )?;

        let mut node_cov_map: HashMap<usize, HashMap<usize, usize>> = HashMap::new();
        for row in &input.node_cov {
            node_cov_map
                .entry(row.covariate_id)
                .or_default()
                .insert(row.node_id, row.weight_id);
        }

        Ok(ModelContext {
            age: input.age.clone(),
            time: input.time.clone(),
            age_avg,
            smooths,
            weights,
            constant_weight: WeightGrid::constant(),
            integrands: input.integrand.clone(),
            mulcovs: input.mulcov.clone(),
            subgroups: input.subgroup.clone(),
            priors: input.prior.clone(),
            densities: input.density.clone(),
            pack,
            n_child: child_info.n_child(),
            n_covariate: input.covariate.len(),
            rate_case: options.rate_case,
            ode_step_size: options.ode_step_size,
            node_cov_map,
        })
    }

    /// The weight grid for a (possibly null) weight id.
    pub fn weight(&self, weight_id: Option<usize>) -> &WeightGrid {
        match weight_id {
            Some(id) => &self.weights[id],
            None => &self.constant_weight,
        }
    }
}
