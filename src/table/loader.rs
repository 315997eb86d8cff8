//! Input table reading and validation
//!
//! All input tables are read once at command start into [`DbInput`], an
//! immutable in-memory snapshot referenced by index for the rest of the
//! command.

use super::store::Database;
use super::types::*;
use crate::error::{Error, Result};

/// One integrand with its name resolved to a kind.
#[derive(Debug, Clone)]
pub struct Integrand {
    pub kind: IntegrandKind,
    /// Set only when `kind` is `Mulcov`.
    pub mulcov_id: Option<usize>,
    pub minimum_meas_cv: f64,
}

/// One covariate multiplier with its type resolved.
#[derive(Debug, Clone)]
pub struct Mulcov {
    pub mulcov_type: MulcovType,
    pub rate_id: Option<usize>,
    pub integrand_id: Option<usize>,
    pub covariate_id: usize,
    pub group_id: usize,
    pub group_smooth_id: Option<usize>,
    pub subgroup_smooth_id: Option<usize>,
}

/// Immutable snapshot of every input table.
#[derive(Debug, Clone)]
pub struct DbInput {
    pub age: Vec<f64>,
    pub time: Vec<f64>,
    pub node: Vec<NodeRow>,
    pub covariate: Vec<CovariateRow>,
    pub node_cov: Vec<NodeCovRow>,
    pub rate: Vec<RateRow>,
    pub smooth: Vec<SmoothRow>,
    pub smooth_grid: Vec<SmoothGridRow>,
    pub prior: Vec<PriorRow>,
    /// `density[density_id]` is the resolved density kind.
    pub density: Vec<Density>,
    pub integrand: Vec<Integrand>,
    pub mulcov: Vec<Mulcov>,
    pub subgroup: Vec<SubgroupRow>,
    pub nslist: Vec<NslistRow>,
    pub nslist_pair: Vec<NslistPairRow>,
    pub option: Vec<OptionRow>,
    pub weight: Vec<WeightRow>,
    pub weight_grid: Vec<WeightGridRow>,
    pub data: Vec<DataRow>,
    pub data_cov_value: Vec<DataCovValueRow>,
    pub avgint: Vec<AvgintRow>,
    pub avgint_cov_value: Vec<AvgintCovValueRow>,
}

impl DbInput {
    /// Read and validate all input tables.
    pub fn read(db: &Database) -> Result<DbInput> {
        let age_rows: Vec<AgeRow> = db.read_table("age", true)?;
        check_table_ids("age", age_rows.iter().map(|r| r.age_id))?;
        let age: Vec<f64> = age_rows.iter().map(|r| r.age).collect();
        check_strictly_increasing("age", &age)?;

        let time_rows: Vec<TimeRow> = db.read_table("time", true)?;
        check_table_ids("time", time_rows.iter().map(|r| r.time_id))?;
        let time: Vec<f64> = time_rows.iter().map(|r| r.time).collect();
        check_strictly_increasing("time", &time)?;

        let node: Vec<NodeRow> = db.read_table("node", true)?;
        check_table_ids("node", node.iter().map(|r| r.node_id))?;
        for row in &node {
            if let Some(parent) = row.parent {
                if parent >= node.len() || parent == row.node_id {
                    return Err(Error::table(
                        "node",
                        row.node_id,
                        format!("invalid parent id {parent}"),
                    ));
                }
            }
        }

        let covariate: Vec<CovariateRow> = db.read_table("covariate", false)?;
        check_table_ids("covariate", covariate.iter().map(|r| r.covariate_id))?;

        let node_cov: Vec<NodeCovRow> = db.read_table("node_cov", false)?;
        check_table_ids("node_cov", node_cov.iter().map(|r| r.node_cov_id))?;

        let rate: Vec<RateRow> = db.read_table("rate", true)?;
        check_table_ids("rate", rate.iter().map(|r| r.rate_id))?;
        if rate.len() != N_RATE {
            return Err(Error::table(
                "rate",
                None,
                format!("expected {N_RATE} rows, found {}", rate.len()),
            ));
        }
        for (row, expect) in rate.iter().zip(RateId::ALL) {
            if row.rate_name != expect.name() {
                return Err(Error::table(
                    "rate",
                    row.rate_id,
                    format!("rate_name is {} but should be {}", row.rate_name, expect.name()),
                ));
            }
            if row.child_smooth_id.is_some() && row.child_nslist_id.is_some() {
                return Err(Error::table(
                    "rate",
                    row.rate_id,
                    "both child_smooth_id and child_nslist_id are non-null",
                ));
            }
        }

        let smooth: Vec<SmoothRow> = db.read_table("smooth", true)?;
        check_table_ids("smooth", smooth.iter().map(|r| r.smooth_id))?;

        let smooth_grid: Vec<SmoothGridRow> = db.read_table("smooth_grid", true)?;
        check_table_ids("smooth_grid", smooth_grid.iter().map(|r| r.smooth_grid_id))?;
        for row in &smooth_grid {
            let both = row.value_prior_id.is_some() && row.const_value.is_some();
            let neither = row.value_prior_id.is_none() && row.const_value.is_none();
            if both || neither {
                return Err(Error::table(
                    "smooth_grid",
                    row.smooth_grid_id,
                    "exactly one of value_prior_id and const_value must be non-null",
                ));
            }
        }

        let density_rows: Vec<DensityRow> = db.read_table("density", true)?;
        check_table_ids("density", density_rows.iter().map(|r| r.density_id))?;
        let mut density = Vec::with_capacity(density_rows.len());
        for row in &density_rows {
            match Density::from_name(&row.density_name) {
                Some(d) => density.push(d),
                None => {
                    return Err(Error::table(
                        "density",
                        row.density_id,
                        format!("unknown density_name {}", row.density_name),
                    ))
                }
            }
        }

        let prior: Vec<PriorRow> = db.read_table("prior", true)?;
        check_table_ids("prior", prior.iter().map(|r| r.prior_id))?;
        for row in &prior {
            if row.density_id >= density.len() {
                return Err(Error::table("prior", row.prior_id, "invalid density_id"));
            }
            let d = density[row.density_id];
            let lower = row.lower_bound();
            let upper = row.upper_bound();
            if !(lower <= row.mean && row.mean <= upper) {
                return Err(Error::table(
                    "prior",
                    row.prior_id,
                    "mean is not between lower and upper",
                ));
            }
            if d != Density::Uniform && row.std.map_or(true, |s| s <= 0.0) {
                return Err(Error::table(
                    "prior",
                    row.prior_id,
                    format!("{} density requires std > 0", d.name()),
                ));
            }
            if d.needs_eta() && row.eta.is_none() {
                return Err(Error::table(
                    "prior",
                    row.prior_id,
                    format!("{} density requires eta", d.name()),
                ));
            }
            if d.needs_nu() && row.nu.map_or(true, |nu| nu <= 2.0) {
                return Err(Error::table(
                    "prior",
                    row.prior_id,
                    format!("{} density requires nu > 2", d.name()),
                ));
            }
        }

        let integrand_rows: Vec<IntegrandRow> = db.read_table("integrand", true)?;
        check_table_ids("integrand", integrand_rows.iter().map(|r| r.integrand_id))?;
        let mut integrand = Vec::with_capacity(integrand_rows.len());
        for row in &integrand_rows {
            match IntegrandKind::from_name(&row.integrand_name) {
                Some((kind, mulcov_id)) => integrand.push(Integrand {
                    kind,
                    mulcov_id,
                    minimum_meas_cv: row.minimum_meas_cv,
                }),
                None => {
                    return Err(Error::table(
                        "integrand",
                        row.integrand_id,
                        format!("unknown integrand_name {}", row.integrand_name),
                    ))
                }
            }
        }

        let mulcov_rows: Vec<MulcovRow> = db.read_table("mulcov", false)?;
        check_table_ids("mulcov", mulcov_rows.iter().map(|r| r.mulcov_id))?;
        let mut mulcov = Vec::with_capacity(mulcov_rows.len());
        for row in &mulcov_rows {
            let mulcov_type = MulcovType::from_name(&row.mulcov_type).ok_or_else(|| {
                Error::table(
                    "mulcov",
                    row.mulcov_id,
                    format!("unknown mulcov_type {}", row.mulcov_type),
                )
            })?;
            match mulcov_type {
                MulcovType::RateValue => {
                    if row.rate_id.is_none() {
                        return Err(Error::table(
                            "mulcov",
                            row.mulcov_id,
                            "rate_value multiplier requires rate_id",
                        ));
                    }
                }
                MulcovType::MeasValue | MulcovType::MeasNoise => {
                    if row.integrand_id.is_none() {
                        return Err(Error::table(
                            "mulcov",
                            row.mulcov_id,
                            "measurement multiplier requires integrand_id",
                        ));
                    }
                }
            }
            if mulcov_type == MulcovType::MeasNoise && row.subgroup_smooth_id.is_some() {
                return Err(Error::table(
                    "mulcov",
                    row.mulcov_id,
                    "meas_noise multipliers cannot have a subgroup smoothing",
                ));
            }
            mulcov.push(Mulcov {
                mulcov_type,
                rate_id: row.rate_id,
                integrand_id: row.integrand_id,
                covariate_id: row.covariate_id,
                group_id: row.group_id,
                group_smooth_id: row.group_smooth_id,
                subgroup_smooth_id: row.subgroup_smooth_id,
            });
        }

        let subgroup: Vec<SubgroupRow> = db.read_table("subgroup", true)?;
        check_table_ids("subgroup", subgroup.iter().map(|r| r.subgroup_id))?;
        check_subgroup_blocks(&subgroup)?;

        let nslist: Vec<NslistRow> = db.read_table("nslist", false)?;
        check_table_ids("nslist", nslist.iter().map(|r| r.nslist_id))?;
        let nslist_pair: Vec<NslistPairRow> = db.read_table("nslist_pair", false)?;
        check_table_ids("nslist_pair", nslist_pair.iter().map(|r| r.nslist_pair_id))?;

        check_pini_n_age(&rate, &smooth, &nslist_pair)?;

        let option: Vec<OptionRow> = db.read_table("option", true)?;
        check_table_ids("option", option.iter().map(|r| r.option_id))?;

        let weight: Vec<WeightRow> = db.read_table("weight", false)?;
        check_table_ids("weight", weight.iter().map(|r| r.weight_id))?;
        let weight_grid: Vec<WeightGridRow> = db.read_table("weight_grid", false)?;
        check_table_ids("weight_grid", weight_grid.iter().map(|r| r.weight_grid_id))?;

        let data: Vec<DataRow> = db.read_table("data", true)?;
        check_table_ids("data", data.iter().map(|r| r.data_id))?;
        for row in &data {
            if row.age_upper < row.age_lower || row.time_upper < row.time_lower {
                return Err(Error::table(
                    "data",
                    row.data_id,
                    "age or time interval has upper < lower",
                ));
            }
            if row.density_id >= density.len() {
                return Err(Error::table("data", row.data_id, "invalid density_id"));
            }
            // sample_size goes with the binomial density and nothing else
            if density[row.density_id] == Density::Binomial {
                if row.sample_size.map_or(true, |n| n == 0) {
                    return Err(Error::table(
                        "data",
                        row.data_id,
                        "binomial density requires a positive sample_size",
                    ));
                }
            } else if row.sample_size.is_some() {
                return Err(Error::table(
                    "data",
                    row.data_id,
                    "sample_size must be null unless the density is binomial",
                ));
            }
        }
        let data_cov_value: Vec<DataCovValueRow> = db.read_table("data_cov_value", false)?;
        check_table_ids(
            "data_cov_value",
            data_cov_value.iter().map(|r| r.data_cov_value_id),
        )?;

        let avgint: Vec<AvgintRow> = db.read_table("avgint", false)?;
        check_table_ids("avgint", avgint.iter().map(|r| r.avgint_id))?;
        let avgint_cov_value: Vec<AvgintCovValueRow> = db.read_table("avgint_cov_value", false)?;
        check_table_ids(
            "avgint_cov_value",
            avgint_cov_value.iter().map(|r| r.avgint_cov_value_id),
        )?;

        Ok(DbInput {
            age,
            time,
            node,
            covariate,
            node_cov,
            rate,
            smooth,
            smooth_grid,
            prior,
            density,
            integrand,
            mulcov,
            subgroup,
            nslist,
            nslist_pair,
            option,
            weight,
            weight_grid,
            data,
            data_cov_value,
            avgint,
            avgint_cov_value,
        })
    }

    /// Covariate vector for one data row, as offsets from each covariate's
    /// reference value (missing entries read as the reference, i.e. zero
    /// offset).
    pub fn data_covariates(&self, data_id: usize) -> Vec<f64> {
        let mut x = vec![0.0; self.covariate.len()];
        for row in &self.data_cov_value {
            if row.data_id == data_id {
                if let Some(v) = row.cov_value {
                    x[row.covariate_id] = v - self.covariate[row.covariate_id].reference;
                }
            }
        }
        x
    }

    /// Covariate vector for one avgint row, as reference offsets.
    pub fn avgint_covariates(&self, avgint_id: usize) -> Vec<f64> {
        let mut x = vec![0.0; self.covariate.len()];
        for row in &self.avgint_cov_value {
            if row.avgint_id == avgint_id {
                if let Some(v) = row.cov_value {
                    x[row.covariate_id] = v - self.covariate[row.covariate_id].reference;
                }
            }
        }
        x
    }
}

fn check_strictly_increasing(table: &str, values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::table(table, None, "table is empty"));
    }
    for (i, pair) in values.windows(2).enumerate() {
        if pair[1] <= pair[0] {
            return Err(Error::table(
                table,
                i + 1,
                "values are not strictly increasing",
            ));
        }
    }
    Ok(())
}

/// Every smoothing the pini rate references must have exactly one age
/// point; pini is the initial prevalence at the minimum age and has no age
/// extent.
fn check_pini_n_age(
    rate: &[RateRow],
    smooth: &[SmoothRow],
    nslist_pair: &[NslistPairRow],
) -> Result<()> {
    let pini = &rate[RateId::Pini.index()];
    let check = |smooth_id: usize| -> Result<()> {
        if smooth_id >= smooth.len() {
            return Err(Error::table(
                "rate",
                pini.rate_id,
                format!("invalid smooth_id {smooth_id}"),
            ));
        }
        let n_age = smooth[smooth_id].n_age;
        if n_age != 1 {
            return Err(Error::table(
                "smooth",
                smooth_id,
                format!("smoothing is used for pini and must have 1 age point, not {n_age}"),
            ));
        }
        Ok(())
    };
    if let Some(smooth_id) = pini.parent_smooth_id {
        check(smooth_id)?;
    }
    if let Some(smooth_id) = pini.child_smooth_id {
        check(smooth_id)?;
    }
    if let Some(nslist_id) = pini.child_nslist_id {
        for pair in nslist_pair.iter().filter(|p| p.nslist_id == nslist_id) {
            check(pair.smooth_id)?;
        }
    }
    Ok(())
}

/// Subgroups must partition into groups as contiguous blocks with group ids
/// 0, 1, 2, ... in order.
fn check_subgroup_blocks(subgroup: &[SubgroupRow]) -> Result<()> {
    if subgroup.is_empty() {
        return Err(Error::table("subgroup", None, "table is empty"));
    }
    if subgroup[0].group_id != 0 {
        return Err(Error::table("subgroup", 0, "first group_id must be 0"));
    }
    for i in 1..subgroup.len() {
        let prev = subgroup[i - 1].group_id;
        let this = subgroup[i].group_id;
        if this != prev && this != prev + 1 {
            return Err(Error::table(
                "subgroup",
                i,
                "group_id values must be contiguous non-decreasing blocks",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing() {
        assert!(check_strictly_increasing("age", &[0.0, 50.0, 100.0]).is_ok());
        assert!(check_strictly_increasing("age", &[0.0, 0.0]).is_err());
        assert!(check_strictly_increasing("age", &[]).is_err());
    }

    #[test]
    fn test_pini_single_age_point() {
        let rate: Vec<RateRow> = RateId::ALL
            .iter()
            .enumerate()
            .map(|(rate_id, r)| RateRow {
                rate_id,
                rate_name: r.name().to_string(),
                parent_smooth_id: None,
                child_smooth_id: None,
                child_nslist_id: None,
            })
            .collect();
        let smooth = |smooth_id, n_age| SmoothRow {
            smooth_id,
            smooth_name: format!("s{smooth_id}"),
            n_age,
            n_time: 1,
            mulstd_value_prior_id: None,
            mulstd_dage_prior_id: None,
            mulstd_dtime_prior_id: None,
        };
        let smooths = vec![smooth(0, 1), smooth(1, 2)];

        // no pini smoothings at all is fine
        assert!(check_pini_n_age(&rate, &smooths, &[]).is_ok());

        // a one-age-point parent smoothing is fine
        let mut ok = rate.clone();
        ok[RateId::Pini.index()].parent_smooth_id = Some(0);
        assert!(check_pini_n_age(&ok, &smooths, &[]).is_ok());

        // two age points on the parent or child smoothing is fatal
        let mut bad = rate.clone();
        bad[RateId::Pini.index()].parent_smooth_id = Some(1);
        assert!(check_pini_n_age(&bad, &smooths, &[]).is_err());
        let mut bad = rate.clone();
        bad[RateId::Pini.index()].child_smooth_id = Some(1);
        assert!(check_pini_n_age(&bad, &smooths, &[]).is_err());

        // smoothings reached through a child nslist are checked too
        let mut via_list = rate.clone();
        via_list[RateId::Pini.index()].child_nslist_id = Some(0);
        let pair = |nslist_pair_id, smooth_id| NslistPairRow {
            nslist_pair_id,
            nslist_id: 0,
            node_id: nslist_pair_id,
            smooth_id,
        };
        assert!(check_pini_n_age(&via_list, &smooths, &[pair(0, 0)]).is_ok());
        assert!(check_pini_n_age(&via_list, &smooths, &[pair(0, 0), pair(1, 1)]).is_err());
    }

    #[test]
    fn test_subgroup_blocks() {
        let mk = |subgroup_id, group_id| SubgroupRow {
            subgroup_id,
            subgroup_name: format!("s{subgroup_id}"),
            group_id,
            group_name: format!("g{group_id}"),
        };
        assert!(check_subgroup_blocks(&[mk(0, 0), mk(1, 0), mk(2, 1)]).is_ok());
        assert!(check_subgroup_blocks(&[mk(0, 0), mk(1, 2)]).is_err());
        assert!(check_subgroup_blocks(&[mk(0, 1)]).is_err());
    }
}
