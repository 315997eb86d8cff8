//! The depend command: which variables the data and priors depend on
//!
//! One dual-number sweep per variable: the variable is seeded and the data
//! averages and prior residuals are checked for non-zero derivatives.

use crate::ad::Dual;
use crate::cmd::Session;
use crate::error::Result;
use crate::model::{DataModel, PriorModel};
use crate::table::types::DependVarRow;
use crate::table::Database;

pub fn run(db: &Database) -> Result<()> {
    let mut session = Session::open(db)?;
    session.apply_data_subset()?;
    let start_var = session.read_var_table("start_var")?;

    let mut data_model = DataModel::new(
        &session.ctx,
        session.subset.clone(),
        session.options.meas_noise_effect,
        session.options.bound_random,
    );
    data_model.replace_like(session.subset.clone())?;
    let prior_model = PriorModel::new(
        &session.ctx.pack,
        &session.var_priors,
        &session.ctx.priors,
        &session.ctx.densities,
    );

    let n_var = session.ctx.pack.size();
    let mut rows = Vec::with_capacity(n_var);
    for var_id in 0..n_var {
        let seeded: Vec<Dual<f64>> = start_var
            .iter()
            .enumerate()
            .map(|(k, &v)| {
                if k == var_id {
                    Dual::variable(v)
                } else {
                    Dual::constant(v)
                }
            })
            .collect();

        let mut data_depend = false;
        for subset_id in 0..data_model.n_subset() {
            let avg = data_model.average(subset_id, &seeded)?;
            let (residual, _) = data_model.like_one(subset_id, &seeded, avg)?;
            if avg.dv != 0.0 || residual.logden().dv != 0.0 {
                data_depend = true;
                break;
            }
        }

        let mut prior_depend = false;
        for residual in prior_model
            .fixed(&seeded)
            .into_iter()
            .chain(prior_model.random(&seeded))
        {
            if residual.logden().dv != 0.0 {
                prior_depend = true;
                break;
            }
        }

        rows.push(DependVarRow {
            depend_var_id: var_id,
            data_depend: data_depend as u8,
            prior_depend: prior_depend as u8,
        });
    }
    db.write_table("depend_var", &rows)?;
    Ok(())
}
