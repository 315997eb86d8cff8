//! The init command: create the derived tables a fit needs
//!
//! Recreates var, data_subset, start_var, scale_var, age_avg, and
//! bnd_mulcov, and clears stale output tables from earlier fits.

use crate::cmd::{prior_mean_values, Session};
use crate::error::Result;
use crate::table::subset::data_subset_rows;
use crate::table::types::{AgeAvgRow, BndMulcovRow, VarRow, N_RATE};
use crate::table::Database;

/// Tables whose contents are stale once the model is re-initialized.
const STALE_OUTPUT_TABLES: &[&str] = &[
    "fit_var",
    "fit_data_subset",
    "sample",
    "trace_fixed",
    "hes_fixed",
    "hes_random",
    "mixed_info",
    "prior_sim",
    "data_sim",
    "predict",
    "depend_var",
    "truth_var",
];

pub fn run(db: &Database) -> Result<()> {
    // bnd_mulcov must exist before Session applies it; init resets it
    let bnd_rows: Vec<BndMulcovRow> = (0..count_mulcov(db)?)
        .map(|bnd_mulcov_id| BndMulcovRow {
            bnd_mulcov_id,
            max_mulcov: None,
        })
        .collect();
    db.write_table("bnd_mulcov", &bnd_rows)?;

    let session = Session::open(db)?;

    db.write_table("var", &var_table(&session))?;
    db.write_table("data_subset", &data_subset_rows(&session.subset))?;

    let start = prior_mean_values(&session);
    session.write_var_table("start_var", &start)?;
    session.write_var_table("scale_var", &start)?;

    let age_avg_rows: Vec<AgeAvgRow> = session
        .ctx
        .age_avg
        .iter()
        .enumerate()
        .map(|(age_avg_id, &age)| AgeAvgRow { age_avg_id, age })
        .collect();
    db.write_table("age_avg", &age_avg_rows)?;

    for table in STALE_OUTPUT_TABLES {
        db.remove_table(table)?;
    }
    Ok(())
}

fn count_mulcov(db: &Database) -> Result<usize> {
    use crate::table::types::MulcovRow;
    let rows: Vec<MulcovRow> = db.read_table("mulcov", false)?;
    Ok(rows.len())
}

/// One var table row per packed variable, describing what the variable is.
fn var_table(session: &Session) -> Vec<VarRow> {
    let ctx = &session.ctx;
    let pack = &ctx.pack;
    let n_child = ctx.n_child;
    let mut rows: Vec<Option<VarRow>> = vec![None; pack.size()];

    let empty = |var_id: usize, var_type: &str| VarRow {
        var_id,
        var_type: var_type.to_string(),
        smooth_id: None,
        age_id: None,
        time_id: None,
        node_id: None,
        rate_id: None,
        integrand_id: None,
        covariate_id: None,
        mulcov_id: None,
        group_id: None,
        subgroup_id: None,
    };

    // standard deviation multipliers
    for smooth_id in 0..pack.smooth_size() {
        for (k, var_type) in ["mulstd_value", "mulstd_dage", "mulstd_dtime"]
            .iter()
            .enumerate()
        {
            if let Some(offset) = pack.mulstd_offset(smooth_id, k) {
                let mut row = empty(offset, var_type);
                row.smooth_id = Some(smooth_id);
                rows[offset] = Some(row);
            }
        }
    }

    // a grid block expands to one row per (age, time) cell
    let mut fill_grid = |rows: &mut Vec<Option<VarRow>>,
                         info: &crate::pack::SubvecInfo,
                         template: &VarRow| {
        let s_info = &ctx.smooths[info.smooth_id];
        let n_time = s_info.n_time();
        for i in 0..s_info.n_age() {
            for j in 0..n_time {
                let var_id = info.offset + i * n_time + j;
                let mut row = template.clone();
                row.var_id = var_id;
                row.smooth_id = Some(info.smooth_id);
                row.age_id = Some(s_info.age_id(i));
                row.time_id = Some(s_info.time_id(j));
                rows[var_id] = Some(row);
            }
        }
    };

    // rate grids: children then parent
    for rate_id in 0..N_RATE {
        for j in 0..=n_child {
            if let Some(info) = pack.node_rate_value_info(rate_id, j) {
                let mut template = empty(0, "rate");
                template.rate_id = Some(rate_id);
                template.node_id = Some(if j == n_child {
                    session.child_info.parent_node_id()
                } else {
                    session.child_info.child_node_id(j)
                });
                fill_grid(&mut rows, &info, &template);
            }
        }
    }

    // covariate multiplier grids
    for rate_id in 0..N_RATE {
        for j in 0..pack.group_rate_value_n_cov(rate_id) {
            let info = pack.group_rate_value_info(rate_id, j);
            let mut template = empty(0, "mulcov_rate_value");
            template.rate_id = Some(rate_id);
            template.covariate_id = info.covariate_id;
            template.mulcov_id = info.mulcov_id;
            template.group_id = info.group_id;
            fill_grid(&mut rows, &info, &template);
        }
        for j in 0..pack.subgroup_rate_value_n_cov(rate_id) {
            for k in 0..pack.subgroup_rate_value_n_sub(rate_id, j) {
                let info = pack.subgroup_rate_value_info(rate_id, j, k);
                let mut template = empty(0, "mulcov_rate_value");
                template.rate_id = Some(rate_id);
                template.covariate_id = info.covariate_id;
                template.mulcov_id = info.mulcov_id;
                template.group_id = info.group_id;
                template.subgroup_id =
                    info.group_id.map(|g| pack.first_subgroup_id(g) + k);
                fill_grid(&mut rows, &info, &template);
            }
        }
    }
    for integrand_id in 0..pack.integrand_size() {
        for j in 0..pack.group_meas_value_n_cov(integrand_id) {
            let info = pack.group_meas_value_info(integrand_id, j);
            let mut template = empty(0, "mulcov_meas_value");
            template.integrand_id = Some(integrand_id);
            template.covariate_id = info.covariate_id;
            template.mulcov_id = info.mulcov_id;
            template.group_id = info.group_id;
            fill_grid(&mut rows, &info, &template);
        }
        for j in 0..pack.group_meas_noise_n_cov(integrand_id) {
            let info = pack.group_meas_noise_info(integrand_id, j);
            let mut template = empty(0, "mulcov_meas_noise");
            template.integrand_id = Some(integrand_id);
            template.covariate_id = info.covariate_id;
            template.mulcov_id = info.mulcov_id;
            template.group_id = info.group_id;
            fill_grid(&mut rows, &info, &template);
        }
        for j in 0..pack.subgroup_meas_value_n_cov(integrand_id) {
            for k in 0..pack.subgroup_meas_value_n_sub(integrand_id, j) {
                let info = pack.subgroup_meas_value_info(integrand_id, j, k);
                let mut template = empty(0, "mulcov_meas_value");
                template.integrand_id = Some(integrand_id);
                template.covariate_id = info.covariate_id;
                template.mulcov_id = info.mulcov_id;
                template.group_id = info.group_id;
                template.subgroup_id =
                    info.group_id.map(|g| pack.first_subgroup_id(g) + k);
                fill_grid(&mut rows, &info, &template);
            }
        }
    }

    rows.into_iter()
        .enumerate()
        .map(|(var_id, row)| row.unwrap_or_else(|| panic!("var {var_id} has no description")))
        .collect()
}
