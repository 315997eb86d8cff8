//! The simulate command: draw simulated measurements and prior means
//!
//! `simulate <number_simulate>` requires a truth_var table.  For every
//! simulate index it draws one measurement per data subset row from that
//! row's density centered on the model average at the truth, and one draw
//! per (variable, prior kind) from the value/dage/dtime priors.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cmd::Session;
use crate::error::{Error, Result};
use crate::fit::sim_random;
use crate::model::DataModel;
use crate::table::types::{DataSimRow, Density, PriorSimRow};
use crate::table::Database;

pub fn run(db: &Database, args: &[String]) -> Result<()> {
    let number_simulate: usize = args[0]
        .parse()
        .map_err(|_| Error::Usage(format!("simulate: bad number_simulate {}", args[0])))?;

    let mut session = Session::open(db)?;
    session.apply_data_subset()?;
    let truth_var = session.read_var_table("truth_var")?;
    let mut rng = seeded_rng(session.options.random_seed);

    let mut data_model = DataModel::new(
        &session.ctx,
        session.subset.clone(),
        session.options.meas_noise_effect,
        session.options.bound_random,
    );
    data_model.replace_like(session.subset.clone())?;

    // simulated measurements
    let mut data_sim = Vec::with_capacity(number_simulate * data_model.n_subset());
    for simulate_index in 0..number_simulate {
        for subset_id in 0..data_model.n_subset() {
            let avg = data_model.average(subset_id, &truth_var)?;
            let (_, delta) = data_model.like_one(subset_id, &truth_var, avg)?;
            let point = &data_model.subset()[subset_id];
            let density = session.ctx.densities[point.density_id];
            let value = sim_random(
                &mut rng,
                density,
                avg,
                delta,
                point.eta.unwrap_or(0.0),
                point.nu.unwrap_or(0.0),
                point.sample_size,
            )?;
            data_sim.push(DataSimRow {
                data_sim_id: data_sim.len(),
                simulate_index,
                data_subset_id: subset_id,
                data_sim_value: value,
            });
        }
    }
    db.write_table("data_sim", &data_sim)?;

    // simulated prior means; uniform priors stay null, value draws are
    // censored to the prior limits
    let n_var = session.ctx.pack.size();
    let mut prior_sim = Vec::with_capacity(number_simulate * n_var);
    for simulate_index in 0..number_simulate {
        for var_id in 0..n_var {
            let value = draw_prior(
                &session,
                &mut rng,
                session.var_priors.value_prior_id(var_id),
                true,
            )?;
            let dage = draw_prior(
                &session,
                &mut rng,
                session.var_priors.dage_prior_id(var_id),
                false,
            )?;
            let dtime = draw_prior(
                &session,
                &mut rng,
                session.var_priors.dtime_prior_id(var_id),
                false,
            )?;
            prior_sim.push(PriorSimRow {
                prior_sim_id: prior_sim.len(),
                simulate_index,
                var_id,
                prior_sim_value: value,
                prior_sim_dage: dage,
                prior_sim_dtime: dtime,
            });
        }
    }
    db.write_table("prior_sim", &prior_sim)?;
    Ok(())
}

fn draw_prior(
    session: &Session,
    rng: &mut StdRng,
    prior_id: Option<usize>,
    censor_to_limits: bool,
) -> Result<Option<f64>> {
    let prior_id = match prior_id {
        Some(id) => id,
        None => return Ok(None),
    };
    let prior = &session.ctx.priors[prior_id];
    let density = session.ctx.densities[prior.density_id];
    if density == Density::Uniform {
        return Ok(None);
    }
    let mut value = sim_random(
        rng,
        density,
        prior.mean,
        prior.std.unwrap_or(0.0),
        prior.eta.unwrap_or(0.0),
        prior.nu.unwrap_or(0.0),
        None,
    )?;
    if censor_to_limits {
        value = value.max(prior.lower_bound()).min(prior.upper_bound());
    }
    Ok(Some(value))
}

/// Seed the process RNG once per command; zero means a time-based seed.
pub fn seeded_rng(random_seed: u64) -> StdRng {
    if random_seed == 0 {
        let now = chrono::Utc::now();
        StdRng::seed_from_u64(now.timestamp_nanos_opt().unwrap_or(0) as u64)
    } else {
        StdRng::seed_from_u64(random_seed)
    }
}
