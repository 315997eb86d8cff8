//! The fit command: MAP estimation of the model variables
//!
//! `fit <variables> [<simulate_index>] [warm_start]` with
//! `variables` one of fixed, random, both.  With a simulate index the
//! prior means and measurement values are replaced by the corresponding
//! simulated draws before fitting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cmd::Session;
use crate::error::{Error, Result};
use crate::fit::FitModel;
use crate::model::{DataModel, PriorModel};
use crate::table::types::{
    DataSimRow, FitDataSubsetRow, FitVarRow, MixedInfoRow, PriorSimRow, TraceFixedRow,
};
use crate::table::Database;

/// Warm-start state saved after a fit of the fixed effects.
#[derive(Debug, Serialize, Deserialize)]
pub struct WarmStart {
    pub fixed_value: Vec<f64>,
}

pub fn run(db: &Database, args: &[String]) -> Result<()> {
    let variables = args[0].as_str();
    if !matches!(variables, "fixed" | "random" | "both") {
        return Err(Error::Usage(
            "fit variables must be one of fixed, random, both".to_string(),
        ));
    }
    let mut simulate_index: Option<usize> = None;
    let mut warm_start = false;
    for arg in &args[1..] {
        if arg == "warm_start" {
            warm_start = true;
        } else {
            simulate_index = Some(arg.parse().map_err(|_| {
                Error::Usage(format!("fit: cannot parse simulate_index {arg}"))
            })?);
        }
    }
    if warm_start && variables == "random" {
        return Err(Error::Usage(
            "fit random cannot use warm_start".to_string(),
        ));
    }

    let mut session = Session::open(db)?;
    session.apply_data_subset()?;
    let start_var = session.read_var_table("start_var")?;
    let scale_var = session.read_var_table("scale_var")?;

    // simulated data substitution
    if let Some(index) = simulate_index {
        let data_sim: Vec<DataSimRow> = db.read_table("data_sim", true)?;
        let by_subset: HashMap<usize, f64> = data_sim
            .iter()
            .filter(|r| r.simulate_index == index)
            .map(|r| (r.data_subset_id, r.data_sim_value))
            .collect();
        for (subset_id, point) in session.subset.iter_mut().enumerate() {
            match by_subset.get(&subset_id) {
                Some(&value) => point.data_sim_value = Some(value),
                None => {
                    return Err(Error::table(
                        "data_sim",
                        None,
                        format!("no row for simulate_index {index}, data_subset_id {subset_id}"),
                    ))
                }
            }
        }
    }

    // fit fixed pins the random effects at zero via a zero bound
    let effective_bound_random = if variables == "fixed" {
        0.0
    } else {
        session.options.bound_random
    };
    let mut data_model = DataModel::new(
        &session.ctx,
        session.subset.clone(),
        session.options.meas_noise_effect,
        effective_bound_random,
    );
    data_model.replace_like(session.subset.clone())?;

    let mut prior_model = PriorModel::new(
        &session.ctx.pack,
        &session.var_priors,
        &session.ctx.priors,
        &session.ctx.densities,
    );
    if let Some(index) = simulate_index {
        prior_model.replace_mean(simulated_prior_mean(db, &session, index)?);
    }

    // fit fixed holds the random effects at their starting values
    let mut options = session.options.clone();
    if variables == "fixed" {
        options.bound_random = 0.0;
    }
    let var_priors = if variables == "fixed" {
        // rebuild with zero bound so random effects are constants
        let n_child_data = vec![0usize; session.child_info.n_child()];
        crate::pack::VarPriors::new(
            0.0,
            &n_child_data,
            &session.input.prior,
            &session.ctx.pack,
            &session.ctx.smooths,
        )
    } else {
        session.var_priors.clone()
    };

    if session.options.trace_init_fit_model {
        println!("begin epimod: fit model constructor");
    }
    let fit_model = FitModel::new(
        &session.ctx,
        &data_model,
        &prior_model,
        &var_priors,
        &options,
        start_var.clone(),
        scale_var,
    )?;
    if session.options.trace_init_fit_model {
        println!("end epimod: fit model constructor");
    }

    let warm = if warm_start {
        db.read_json::<WarmStart>("ipopt_info")?
            .map(|w| w.fixed_value)
    } else {
        None
    };
    let solution = fit_model.run_fit(variables == "random", warm)?;

    // fit_var: values, prior residuals, and Lagrange multipliers
    let n_var = session.ctx.pack.size();
    let mut residual_value = vec![None; n_var];
    let mut residual_dage = vec![None; n_var];
    let mut residual_dtime = vec![None; n_var];
    let residuals = prior_model
        .fixed(&solution.fit_var_value)
        .into_iter()
        .chain(prior_model.random(&solution.fit_var_value));
    for r in residuals {
        let var_id = r.index / 3;
        match r.index % 3 {
            0 => residual_value[var_id] = Some(r.wres),
            1 => residual_dage[var_id] = Some(r.wres),
            _ => residual_dtime[var_id] = Some(r.wres),
        }
    }
    let fit_var_rows: Vec<FitVarRow> = (0..n_var)
        .map(|var_id| FitVarRow {
            fit_var_id: var_id,
            fit_var_value: solution.fit_var_value[var_id],
            residual_value: residual_value[var_id],
            residual_dage: residual_dage[var_id],
            residual_dtime: residual_dtime[var_id],
            lagrange_value: solution.lagrange_value[var_id],
            lagrange_dage: solution.lagrange_dage[var_id],
            lagrange_dtime: solution.lagrange_dtime[var_id],
        })
        .collect();
    db.write_table("fit_var", &fit_var_rows)?;

    // fit_data_subset: average integrand and weighted residual per row
    let mut fit_data_rows = Vec::with_capacity(data_model.n_subset());
    for subset_id in 0..data_model.n_subset() {
        let avg = data_model.average(subset_id, &solution.fit_var_value)?;
        let (residual, _) = data_model.like_one(subset_id, &solution.fit_var_value, avg)?;
        fit_data_rows.push(FitDataSubsetRow {
            fit_data_subset_id: subset_id,
            avg_integrand: avg,
            weighted_residual: Some(residual.wres),
        });
    }
    db.write_table("fit_data_subset", &fit_data_rows)?;

    // optimizer trace and warm-start state
    let trace_rows: Vec<TraceFixedRow> = solution
        .trace
        .iter()
        .enumerate()
        .map(|(trace_fixed_id, t)| TraceFixedRow {
            trace_fixed_id,
            iter: t.iter,
            obj_value: t.obj_value,
            inf_pr: t.inf_pr,
            inf_du: t.inf_du,
            step_size: t.step_size,
        })
        .collect();
    db.write_table("trace_fixed", &trace_rows)?;

    let n_random = session.ctx.pack.random_size();
    db.write_json(
        "ipopt_info",
        &WarmStart {
            fixed_value: solution.fit_var_value[n_random..].to_vec(),
        },
    )?;

    let mixed_info = vec![
        ("n_var", n_var.to_string()),
        ("n_fixed", (n_var - n_random).to_string()),
        ("n_random", n_random.to_string()),
        ("n_data_subset", data_model.n_subset().to_string()),
        ("converged", solution.converged.to_string()),
    ];
    let mixed_rows: Vec<MixedInfoRow> = mixed_info
        .into_iter()
        .enumerate()
        .map(|(mixed_info_id, (name, value))| MixedInfoRow {
            mixed_info_id,
            mixed_name: name.to_string(),
            mixed_value: value,
        })
        .collect();
    db.write_table("mixed_info", &mixed_rows)?;
    Ok(())
}

/// Prior means replaced by the prior_sim draws for one simulate index.
pub fn simulated_prior_mean(db: &Database, session: &Session, index: usize) -> Result<Vec<f64>> {
    let n_var = session.ctx.pack.size();
    let rows: Vec<PriorSimRow> = db.read_table("prior_sim", true)?;

    // start from the default means and overlay the simulated draws
    let mut means = vec![0.0; 3 * n_var];
    for var_id in 0..n_var {
        means[3 * var_id] = match session.var_priors.const_value(var_id) {
            Some(c) => c,
            None => match session.var_priors.value_prior_id(var_id) {
                Some(p) => session.ctx.priors[p].mean,
                None => 0.0,
            },
        };
        means[3 * var_id + 1] = session
            .var_priors
            .dage_prior_id(var_id)
            .map_or(0.0, |p| session.ctx.priors[p].mean);
        means[3 * var_id + 2] = session
            .var_priors
            .dtime_prior_id(var_id)
            .map_or(0.0, |p| session.ctx.priors[p].mean);
    }
    for row in rows.iter().filter(|r| r.simulate_index == index) {
        if let Some(v) = row.prior_sim_value {
            means[3 * row.var_id] = v;
        }
        if let Some(v) = row.prior_sim_dage {
            means[3 * row.var_id + 1] = v;
        }
        if let Some(v) = row.prior_sim_dtime {
            means[3 * row.var_id + 2] = v;
        }
    }
    Ok(means)
}
