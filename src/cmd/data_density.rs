//! The data_density command: rewrite the likelihood columns of the subset
//!
//! `data_density` with no arguments restores the densities from the data
//! table; `data_density <integrand> <density> <eta> <nu>` sets the density
//! for every subset row of the named integrand.

use crate::cmd::Session;
use crate::error::{Error, Result};
use crate::table::subset::data_subset_rows;
use crate::table::types::Density;
use crate::table::Database;

pub fn run(db: &Database, args: &[String]) -> Result<()> {
    let mut session = Session::open(db)?;

    if args.is_empty() {
        // restore the data-table densities
        db.write_table("data_subset", &data_subset_rows(&session.subset))?;
        return Ok(());
    }

    let integrand_name = args[0].as_str();
    let density_name = args[1].as_str();
    let eta: Option<f64> = parse_nullable(&args[2], "eta")?;
    let nu: Option<f64> = parse_nullable(&args[3], "nu")?;

    let integrand_id = session
        .ctx
        .integrands
        .iter()
        .position(|i| i.kind.name() == integrand_name)
        .ok_or_else(|| {
            Error::table(
                "integrand",
                None,
                format!("data_density: {integrand_name} is not in the integrand table"),
            )
        })?;
    let density = Density::from_name(density_name).ok_or_else(|| {
        Error::Usage(format!("data_density: unknown density {density_name}"))
    })?;
    let density_id = session
        .ctx
        .densities
        .iter()
        .position(|&d| d == density)
        .ok_or_else(|| {
            Error::table(
                "density",
                None,
                format!("data_density: {density_name} is not in the density table"),
            )
        })?;
    if density.needs_eta() && eta.is_none() {
        return Err(Error::Usage(format!(
            "data_density: {density_name} requires eta"
        )));
    }
    if density.needs_nu() && nu.map_or(true, |v| v <= 2.0) {
        return Err(Error::Usage(format!(
            "data_density: {density_name} requires nu > 2"
        )));
    }

    // apply any previous overrides, then this one
    session.apply_data_subset()?;
    for point in session.subset.iter_mut() {
        if point.integrand_id == integrand_id {
            point.density_id = density_id;
            point.eta = eta;
            point.nu = nu;
        }
    }
    db.write_table("data_subset", &data_subset_rows(&session.subset))?;
    Ok(())
}

fn parse_nullable(value: &str, name: &str) -> Result<Option<f64>> {
    if value == "null" || value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| Error::Usage(format!("data_density: cannot parse {name} value {value}")))
}
