//! The bnd_mulcov command: bound covariate multipliers by their effect
//!
//! `bnd_mulcov <max_abs_effect> [<covariate>]` limits each covariate
//! multiplier so that its largest absolute effect over the data subset is
//! at most `max_abs_effect`: `max_mulcov = max_abs_effect / max |x|` with
//! `x` the covariate's reference offsets.  An infinite argument removes
//! the bounds.

use crate::cmd::Session;
use crate::error::{Error, Result};
use crate::table::types::BndMulcovRow;
use crate::table::Database;

pub fn run(db: &Database, args: &[String]) -> Result<()> {
    let max_abs_effect: f64 = if args[0] == "inf" {
        f64::INFINITY
    } else {
        args[0].parse().map_err(|_| {
            Error::Usage(format!("bnd_mulcov: bad max_abs_effect {}", args[0]))
        })?
    };
    let covariate_name = args.get(1);

    let mut session = Session::open(db)?;
    session.apply_data_subset()?;

    let covariate_id = match covariate_name {
        Some(name) => Some(
            session
                .input
                .covariate
                .iter()
                .position(|c| &c.covariate_name == name)
                .ok_or_else(|| {
                    Error::table(
                        "covariate",
                        None,
                        format!("bnd_mulcov: {name} is not in the covariate table"),
                    )
                })?,
        ),
        None => None,
    };

    // largest covariate offset magnitude over the fitted data rows
    let n_covariate = session.input.covariate.len();
    let mut max_abs_cov = vec![0.0_f64; n_covariate];
    for point in session.subset.iter().filter(|p| !p.hold_out) {
        for j in 0..n_covariate {
            max_abs_cov[j] = max_abs_cov[j].max(point.x[j].abs());
        }
    }

    let previous: Vec<BndMulcovRow> = db.read_table("bnd_mulcov", false)?;
    let mut rows = Vec::with_capacity(session.ctx.mulcovs.len());
    for (mulcov_id, mulcov) in session.ctx.mulcovs.iter().enumerate() {
        let selected = covariate_id.map_or(true, |id| mulcov.covariate_id == id);
        let max_mulcov = if !selected {
            previous.get(mulcov_id).and_then(|r| r.max_mulcov)
        } else if max_abs_effect.is_infinite() {
            None
        } else {
            let spread = max_abs_cov[mulcov.covariate_id];
            if spread > 0.0 {
                Some(max_abs_effect / spread)
            } else {
                None
            }
        };
        rows.push(BndMulcovRow {
            bnd_mulcov_id: mulcov_id,
            max_mulcov,
        });
    }
    db.write_table("bnd_mulcov", &rows)?;
    Ok(())
}
