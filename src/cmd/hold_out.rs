//! The hold_out command: cap how much data of one integrand is fit
//!
//! `hold_out <integrand> <max_fit> [<cov_name> <cov_lower> <cov_upper>]`
//! randomly holds out rows of the named integrand beyond `max_fit`.  With
//! a covariate split, the cap applies separately inside and outside the
//! covariate range so both sides stay represented.

use rand::seq::SliceRandom;

use crate::cmd::{simulate::seeded_rng, Session};
use crate::error::{Error, Result};
use crate::table::subset::data_subset_rows;
use crate::table::Database;

pub fn run(db: &Database, args: &[String]) -> Result<()> {
    let integrand_name = args[0].as_str();
    let max_fit: usize = args[1]
        .parse()
        .map_err(|_| Error::Usage(format!("hold_out: bad max_fit {}", args[1])))?;
    let cov_split = if args.len() == 5 {
        let lower: f64 = args[3]
            .parse()
            .map_err(|_| Error::Usage("hold_out: bad cov_lower".to_string()))?;
        let upper: f64 = args[4]
            .parse()
            .map_err(|_| Error::Usage("hold_out: bad cov_upper".to_string()))?;
        Some((args[2].clone(), lower, upper))
    } else {
        None
    };

    let mut session = Session::open(db)?;
    session.apply_data_subset()?;

    let integrand_id = session
        .ctx
        .integrands
        .iter()
        .position(|i| i.kind.name() == integrand_name)
        .ok_or_else(|| {
            Error::table(
                "integrand",
                None,
                format!("hold_out: {integrand_name} is not in the integrand table"),
            )
        })?;

    let covariate_id = match &cov_split {
        Some((name, _, _)) => Some(
            session
                .input
                .covariate
                .iter()
                .position(|c| &c.covariate_name == name)
                .ok_or_else(|| {
                    Error::table(
                        "covariate",
                        None,
                        format!("hold_out: {name} is not in the covariate table"),
                    )
                })?,
        ),
        None => None,
    };

    // candidate rows of this integrand not already held out, split by the
    // covariate range when requested
    let mut inside: Vec<usize> = Vec::new();
    let mut outside: Vec<usize> = Vec::new();
    for (subset_id, point) in session.subset.iter().enumerate() {
        if point.integrand_id != integrand_id || point.hold_out {
            continue;
        }
        let in_range = match (&cov_split, covariate_id) {
            (Some((_, lower, upper)), Some(cov_id)) => {
                // covariates are stored as reference offsets
                let reference = session.input.covariate[cov_id].reference;
                let value = point.x[cov_id] + reference;
                *lower <= value && value <= *upper
            }
            _ => true,
        };
        if in_range {
            inside.push(subset_id);
        } else {
            outside.push(subset_id);
        }
    }

    let mut rng = seeded_rng(session.options.random_seed);
    let mut held = Vec::new();
    for group in [&mut inside, &mut outside] {
        if group.len() > max_fit {
            group.shuffle(&mut rng);
            held.extend_from_slice(&group[max_fit..]);
        }
    }
    for &subset_id in &held {
        session.subset[subset_id].hold_out = true;
    }

    db.write_table("data_subset", &data_subset_rows(&session.subset))?;
    Ok(())
}
