//! The sample command: posterior samples of the model variables
//!
//! `sample <method> <variables> <number_sample> [<simulate_index>]` with
//! method simulate or asymptotic.  The simulate method refits against each
//! simulated data/prior draw; the asymptotic method draws from the normal
//! approximation at the previous fit, gated on positive-definite Hessians.

use crate::cmd::fit::simulated_prior_mean;
use crate::cmd::{simulate::seeded_rng, Session};
use crate::error::{Error, Result};
use crate::fit::FitModel;
use crate::model::{DataModel, PriorModel};
use crate::table::types::{DataSimRow, HesRow, SampleRow};
use crate::table::Database;

pub fn run(db: &Database, args: &[String]) -> Result<()> {
    let method = args[0].as_str();
    let variables = args[1].as_str();
    let number_sample: usize = args[2]
        .parse()
        .map_err(|_| Error::Usage(format!("sample: bad number_sample {}", args[2])))?;
    if !matches!(variables, "fixed" | "both") {
        return Err(Error::Usage(
            "sample variables must be fixed or both".to_string(),
        ));
    }

    match method {
        "simulate" => sample_simulate(db, variables, number_sample),
        "asymptotic" => {
            let simulate_index = args.get(3).map(|a| a.parse::<usize>()).transpose()
                .map_err(|_| Error::Usage("sample: bad simulate_index".to_string()))?;
            sample_asymptotic(db, variables, number_sample, simulate_index)
        }
        _ => Err(Error::Usage(
            "sample method must be simulate or asymptotic".to_string(),
        )),
    }
}

/// Refit against each simulated draw; each refit is one sample.  The
/// random effects are realigned with a final random-only fit started from
/// the refitted fixed effects.
fn sample_simulate(db: &Database, variables: &str, number_sample: usize) -> Result<()> {
    let mut session = Session::open(db)?;
    session.apply_data_subset()?;
    let start_var = session.read_var_table("start_var")?;
    let scale_var = session.read_var_table("scale_var")?;

    // with variables fixed, the refits pin the random effects at zero
    let effective_bound_random = if variables == "fixed" {
        0.0
    } else {
        session.options.bound_random
    };
    let var_priors = if variables == "fixed" {
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
    let mut options = session.options.clone();
    if variables == "fixed" {
        options.bound_random = 0.0;
    }

    let data_sim: Vec<DataSimRow> = db.read_table("data_sim", true)?;
    let mut sample_rows = Vec::new();

    for simulate_index in 0..number_sample {
        // install this draw's simulated data
        let mut subset = session.subset.clone();
        for row in data_sim.iter().filter(|r| r.simulate_index == simulate_index) {
            subset[row.data_subset_id].data_sim_value = Some(row.data_sim_value);
        }
        if subset.iter().any(|p| p.data_sim_value.is_none()) {
            return Err(Error::table(
                "data_sim",
                None,
                format!("missing rows for simulate_index {simulate_index}"),
            ));
        }

        let mut data_model = DataModel::new(
            &session.ctx,
            subset.clone(),
            session.options.meas_noise_effect,
            effective_bound_random,
        );
        data_model.replace_like(subset)?;

        let mut prior_model = PriorModel::new(
            &session.ctx.pack,
            &session.var_priors,
            &session.ctx.priors,
            &session.ctx.densities,
        );
        prior_model.replace_mean(simulated_prior_mean(db, &session, simulate_index)?);

        let fit_model = FitModel::new(
            &session.ctx,
            &data_model,
            &prior_model,
            &var_priors,
            &options,
            start_var.clone(),
            scale_var.clone(),
        )?;

        // fit both fixed and random, then realign the random effects with
        // the refit fixed effects via a random-only pass
        let solution = fit_model.run_fit(false, None)?;
        let mut pack = solution.fit_var_value;
        fit_model.optimize_random(&mut pack)?;

        for (var_id, &var_value) in pack.iter().enumerate() {
            sample_rows.push(SampleRow {
                sample_id: sample_rows.len(),
                sample_index: simulate_index,
                var_id,
                var_value,
            });
        }
    }
    db.write_table("sample", &sample_rows)?;
    Ok(())
}

/// Draw from the normal approximation at the previous fit.
fn sample_asymptotic(
    db: &Database,
    variables: &str,
    number_sample: usize,
    simulate_index: Option<usize>,
) -> Result<()> {
    let mut session = Session::open(db)?;
    session.apply_data_subset()?;
    let start_var = session.read_var_table("start_var")?;
    let scale_var = session.read_var_table("scale_var")?;
    let fit_var = read_fit_var(&session)?;

    // with a simulate index, the Hessians are evaluated against that
    // draw's data and priors
    if let Some(index) = simulate_index {
        let data_sim: Vec<DataSimRow> = db.read_table("data_sim", true)?;
        for row in data_sim.iter().filter(|r| r.simulate_index == index) {
            session.subset[row.data_subset_id].data_sim_value = Some(row.data_sim_value);
        }
    }

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

    let var_priors = if variables == "fixed" {
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
    let mut options = session.options.clone();
    if variables == "fixed" {
        options.bound_random = 0.0;
    }

    let fit_model = FitModel::new(
        &session.ctx,
        &data_model,
        &prior_model,
        &var_priors,
        &options,
        start_var,
        scale_var,
    )?;

    let mut rng = seeded_rng(session.options.random_seed);
    let posterior = fit_model.sample_posterior(number_sample, &fit_var, &mut rng)?;

    // the Hessians are written even when sampling is gated off, to aid
    // diagnosis
    let hes_fixed_rows: Vec<HesRow> = posterior
        .hes_fixed
        .iter()
        .enumerate()
        .map(|(hes_id, &(row, col, value))| HesRow {
            hes_id,
            row_var_id: row,
            col_var_id: col,
            hes_value: value,
        })
        .collect();
    db.write_table("hes_fixed", &hes_fixed_rows)?;
    let hes_random_rows: Vec<HesRow> = posterior
        .hes_random
        .iter()
        .enumerate()
        .map(|(hes_id, &(row, col, value))| HesRow {
            hes_id,
            row_var_id: row,
            col_var_id: col,
            hes_value: value,
        })
        .collect();
    db.write_table("hes_random", &hes_random_rows)?;

    if let Some(msg) = &posterior.warning {
        db.log_message("warning", None, None, msg)?;
        if session.options.warn_on_stderr {
            eprintln!("Warning: {msg}");
        }
    }
    match posterior.samples {
        Some(samples) => {
            let n_var = fit_model.n_var();
            let mut rows = Vec::with_capacity(samples.len());
            for (k, &var_value) in samples.iter().enumerate() {
                rows.push(SampleRow {
                    sample_id: k,
                    sample_index: k / n_var,
                    var_id: k % n_var,
                    var_value,
                });
            }
            db.write_table("sample", &rows)?;
        }
        None => {
            db.remove_table("sample")?;
        }
    }
    Ok(())
}

/// The fitted variable values from the fit_var table.
fn read_fit_var(session: &Session) -> Result<Vec<f64>> {
    use crate::table::types::FitVarRow;
    let rows: Vec<FitVarRow> = session.db.read_table("fit_var", true)?;
    if rows.len() != session.ctx.pack.size() {
        return Err(Error::table(
            "fit_var",
            None,
            "fit_var does not match the model variables; run fit",
        ));
    }
    Ok(rows.into_iter().map(|r| r.fit_var_value).collect())
}
