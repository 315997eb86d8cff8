//! Row types and closed enumerations for the store tables
//!
//! Tables are read once per command, held in memory, and referenced by
//! integer id everywhere else.  Nullable columns are `Option`; an empty CSV
//! field is null and is distinct from zero.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The five model rates.  `Pini` is the initial prevalence at the minimum
/// age; the others are age/time varying hazard rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateId {
    Pini,
    Iota,
    Rho,
    Chi,
    Omega,
}

pub const N_RATE: usize = 5;

impl RateId {
    pub const ALL: [RateId; N_RATE] = [
        RateId::Pini,
        RateId::Iota,
        RateId::Rho,
        RateId::Chi,
        RateId::Omega,
    ];

    pub fn from_index(i: usize) -> RateId {
        Self::ALL[i]
    }

    pub fn index(self) -> usize {
        match self {
            RateId::Pini => 0,
            RateId::Iota => 1,
            RateId::Rho => 2,
            RateId::Chi => 3,
            RateId::Omega => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RateId::Pini => "pini",
            RateId::Iota => "iota",
            RateId::Rho => "rho",
            RateId::Chi => "chi",
            RateId::Omega => "omega",
        }
    }

    pub fn from_name(name: &str) -> Option<RateId> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }
}

/// Density kinds, identified on the wire by their stable string names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Density {
    Uniform,
    Gaussian,
    CenGaussian,
    Laplace,
    CenLaplace,
    Students,
    LogGaussian,
    CenLogGaussian,
    LogLaplace,
    CenLogLaplace,
    LogStudents,
    Binomial,
}

impl Density {
    pub fn from_name(name: &str) -> Option<Density> {
        let d = match name {
            "uniform" => Density::Uniform,
            "gaussian" => Density::Gaussian,
            "cen_gaussian" => Density::CenGaussian,
            "laplace" => Density::Laplace,
            "cen_laplace" => Density::CenLaplace,
            "students" => Density::Students,
            "log_gaussian" => Density::LogGaussian,
            "cen_log_gaussian" => Density::CenLogGaussian,
            "log_laplace" => Density::LogLaplace,
            "cen_log_laplace" => Density::CenLogLaplace,
            "log_students" => Density::LogStudents,
            "binomial" => Density::Binomial,
            _ => return None,
        };
        Some(d)
    }

    pub fn name(self) -> &'static str {
        match self {
            Density::Uniform => "uniform",
            Density::Gaussian => "gaussian",
            Density::CenGaussian => "cen_gaussian",
            Density::Laplace => "laplace",
            Density::CenLaplace => "cen_laplace",
            Density::Students => "students",
            Density::LogGaussian => "log_gaussian",
            Density::CenLogGaussian => "cen_log_gaussian",
            Density::LogLaplace => "log_laplace",
            Density::CenLogLaplace => "cen_log_laplace",
            Density::LogStudents => "log_students",
            Density::Binomial => "binomial",
        }
    }

    /// Log-transformed densities use the transformed standard deviation.
    pub fn is_log(self) -> bool {
        matches!(
            self,
            Density::LogGaussian
                | Density::CenLogGaussian
                | Density::LogLaplace
                | Density::CenLogLaplace
                | Density::LogStudents
        )
    }

    /// Censored (at zero) variants, meaningful for data rows only.
    pub fn is_censored(self) -> bool {
        matches!(
            self,
            Density::CenGaussian
                | Density::CenLaplace
                | Density::CenLogGaussian
                | Density::CenLogLaplace
        )
    }

    /// The Laplace family has a kink at zero residual; such densities may
    /// not appear on data whose model depends on non-constant random
    /// effects.
    pub fn is_nonsmooth(self) -> bool {
        matches!(self, Density::Laplace | Density::LogLaplace)
    }

    /// Densities that require `eta`.
    pub fn needs_eta(self) -> bool {
        self.is_log()
    }

    /// Densities that require `nu`.
    pub fn needs_nu(self) -> bool {
        matches!(self, Density::Students | Density::LogStudents)
    }
}

/// Integrand kinds.  `Mulcov` reports the value of one covariate
/// multiplier; the integrand row then carries the mulcov id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrandKind {
    Sincidence,
    Remission,
    Mtexcess,
    Mtother,
    Mtwith,
    Relrisk,
    Susceptible,
    WithC,
    Prevalence,
    Tincidence,
    Mtspecific,
    Mtall,
    Mtstandard,
    Mulcov,
}

impl IntegrandKind {
    /// Parse an integrand name; `mulcov_<id>` yields `(Mulcov, Some(id))`.
    pub fn from_name(name: &str) -> Option<(IntegrandKind, Option<usize>)> {
        if let Some(rest) = name.strip_prefix("mulcov_") {
            let id = rest.parse::<usize>().ok()?;
            return Some((IntegrandKind::Mulcov, Some(id)));
        }
        let kind = match name {
            "Sincidence" => IntegrandKind::Sincidence,
            "remission" => IntegrandKind::Remission,
            "mtexcess" => IntegrandKind::Mtexcess,
            "mtother" => IntegrandKind::Mtother,
            "mtwith" => IntegrandKind::Mtwith,
            "relrisk" => IntegrandKind::Relrisk,
            "susceptible" => IntegrandKind::Susceptible,
            "withC" => IntegrandKind::WithC,
            "prevalence" => IntegrandKind::Prevalence,
            "Tincidence" => IntegrandKind::Tincidence,
            "mtspecific" => IntegrandKind::Mtspecific,
            "mtall" => IntegrandKind::Mtall,
            "mtstandard" => IntegrandKind::Mtstandard,
            _ => return None,
        };
        Some((kind, None))
    }

    pub fn name(self) -> &'static str {
        match self {
            IntegrandKind::Sincidence => "Sincidence",
            IntegrandKind::Remission => "remission",
            IntegrandKind::Mtexcess => "mtexcess",
            IntegrandKind::Mtother => "mtother",
            IntegrandKind::Mtwith => "mtwith",
            IntegrandKind::Relrisk => "relrisk",
            IntegrandKind::Susceptible => "susceptible",
            IntegrandKind::WithC => "withC",
            IntegrandKind::Prevalence => "prevalence",
            IntegrandKind::Tincidence => "Tincidence",
            IntegrandKind::Mtspecific => "mtspecific",
            IntegrandKind::Mtall => "mtall",
            IntegrandKind::Mtstandard => "mtstandard",
            IntegrandKind::Mulcov => "mulcov",
        }
    }

    /// Whether evaluating this integrand requires the compartment ODE.
    pub fn needs_ode(self) -> bool {
        matches!(
            self,
            IntegrandKind::Susceptible
                | IntegrandKind::WithC
                | IntegrandKind::Prevalence
                | IntegrandKind::Tincidence
                | IntegrandKind::Mtspecific
                | IntegrandKind::Mtall
                | IntegrandKind::Mtstandard
        )
    }

    /// The rates whose adjusted values this integrand reads.  ODE
    /// integrands need all of them.
    pub fn needed_rates(self) -> Vec<RateId> {
        if self.needs_ode() {
            return RateId::ALL.to_vec();
        }
        match self {
            IntegrandKind::Sincidence => vec![RateId::Iota],
            IntegrandKind::Remission => vec![RateId::Rho],
            IntegrandKind::Mtexcess => vec![RateId::Chi],
            IntegrandKind::Mtother => vec![RateId::Omega],
            IntegrandKind::Mtwith | IntegrandKind::Relrisk => {
                vec![RateId::Chi, RateId::Omega]
            }
            IntegrandKind::Mulcov => vec![],
            _ => unreachable!(),
        }
    }
}

/// Covariate multiplier types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulcovType {
    RateValue,
    MeasValue,
    MeasNoise,
}

impl MulcovType {
    pub fn from_name(name: &str) -> Option<MulcovType> {
        match name {
            "rate_value" => Some(MulcovType::RateValue),
            "meas_value" => Some(MulcovType::MeasValue),
            "meas_noise" => Some(MulcovType::MeasNoise),
        _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MulcovType::RateValue => "rate_value",
            MulcovType::MeasValue => "meas_value",
            MulcovType::MeasNoise => "meas_noise",
        }
    }
}

// ---------------------------------------------------------------------------
// Input table rows (CSV via serde; column names are the schema)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgeRow {
    pub age_id: usize,
    pub age: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeRow {
    pub time_id: usize,
    pub time: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeRow {
    pub node_id: usize,
    pub node_name: String,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CovariateRow {
    pub covariate_id: usize,
    pub covariate_name: String,
    pub reference: f64,
    pub max_difference: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeCovRow {
    pub node_cov_id: usize,
    pub covariate_id: usize,
    pub node_id: usize,
    pub weight_id: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateRow {
    pub rate_id: usize,
    pub rate_name: String,
    pub parent_smooth_id: Option<usize>,
    pub child_smooth_id: Option<usize>,
    pub child_nslist_id: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmoothRow {
    pub smooth_id: usize,
    pub smooth_name: String,
    pub n_age: usize,
    pub n_time: usize,
    pub mulstd_value_prior_id: Option<usize>,
    pub mulstd_dage_prior_id: Option<usize>,
    pub mulstd_dtime_prior_id: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmoothGridRow {
    pub smooth_grid_id: usize,
    pub smooth_id: usize,
    pub age_id: usize,
    pub time_id: usize,
    pub value_prior_id: Option<usize>,
    pub dage_prior_id: Option<usize>,
    pub dtime_prior_id: Option<usize>,
    pub const_value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriorRow {
    pub prior_id: usize,
    pub prior_name: String,
    pub density_id: usize,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub mean: f64,
    pub std: Option<f64>,
    pub eta: Option<f64>,
    pub nu: Option<f64>,
}

impl PriorRow {
    /// Null lower is minus infinity.
    pub fn lower_bound(&self) -> f64 {
        self.lower.unwrap_or(f64::NEG_INFINITY)
    }

    /// Null upper is plus infinity.
    pub fn upper_bound(&self) -> f64 {
        self.upper.unwrap_or(f64::INFINITY)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DensityRow {
    pub density_id: usize,
    pub density_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntegrandRow {
    pub integrand_id: usize,
    pub integrand_name: String,
    pub minimum_meas_cv: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MulcovRow {
    pub mulcov_id: usize,
    pub mulcov_type: String,
    pub rate_id: Option<usize>,
    pub integrand_id: Option<usize>,
    pub covariate_id: usize,
    pub group_id: usize,
    pub group_smooth_id: Option<usize>,
    pub subgroup_smooth_id: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BndMulcovRow {
    pub bnd_mulcov_id: usize,
    pub max_mulcov: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubgroupRow {
    pub subgroup_id: usize,
    pub subgroup_name: String,
    pub group_id: usize,
    pub group_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NslistRow {
    pub nslist_id: usize,
    pub nslist_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NslistPairRow {
    pub nslist_pair_id: usize,
    pub nslist_id: usize,
    pub node_id: usize,
    pub smooth_id: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptionRow {
    pub option_id: usize,
    pub option_name: String,
    pub option_value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeightRow {
    pub weight_id: usize,
    pub weight_name: String,
    pub n_age: usize,
    pub n_time: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeightGridRow {
    pub weight_grid_id: usize,
    pub weight_id: usize,
    pub age_id: usize,
    pub time_id: usize,
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataRow {
    pub data_id: usize,
    pub data_name: Option<String>,
    pub integrand_id: usize,
    pub density_id: usize,
    pub node_id: usize,
    pub subgroup_id: usize,
    pub weight_id: Option<usize>,
    pub hold_out: u8,
    pub meas_value: f64,
    pub meas_std: f64,
    pub eta: Option<f64>,
    pub nu: Option<f64>,
    pub sample_size: Option<u64>,
    pub age_lower: f64,
    pub age_upper: f64,
    pub time_lower: f64,
    pub time_upper: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataCovValueRow {
    pub data_cov_value_id: usize,
    pub data_id: usize,
    pub covariate_id: usize,
    pub cov_value: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AvgintRow {
    pub avgint_id: usize,
    pub integrand_id: usize,
    pub node_id: usize,
    pub subgroup_id: usize,
    pub weight_id: Option<usize>,
    pub age_lower: f64,
    pub age_upper: f64,
    pub time_lower: f64,
    pub time_upper: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AvgintCovValueRow {
    pub avgint_cov_value_id: usize,
    pub avgint_id: usize,
    pub covariate_id: usize,
    pub cov_value: Option<f64>,
}

// ---------------------------------------------------------------------------
// Derived table rows (written by this crate)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VarRow {
    pub var_id: usize,
    pub var_type: String,
    pub smooth_id: Option<usize>,
    pub age_id: Option<usize>,
    pub time_id: Option<usize>,
    pub node_id: Option<usize>,
    pub rate_id: Option<usize>,
    pub integrand_id: Option<usize>,
    pub covariate_id: Option<usize>,
    pub mulcov_id: Option<usize>,
    pub group_id: Option<usize>,
    pub subgroup_id: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataSubsetRow {
    pub data_subset_id: usize,
    pub data_id: usize,
    pub hold_out: u8,
    pub density_id: usize,
    pub eta: Option<f64>,
    pub nu: Option<f64>,
    pub sample_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VarValueRow {
    pub var_id: usize,
    pub var_value: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FitVarRow {
    pub fit_var_id: usize,
    pub fit_var_value: f64,
    pub residual_value: Option<f64>,
    pub residual_dage: Option<f64>,
    pub residual_dtime: Option<f64>,
    pub lagrange_value: f64,
    pub lagrange_dage: f64,
    pub lagrange_dtime: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FitDataSubsetRow {
    pub fit_data_subset_id: usize,
    pub avg_integrand: f64,
    pub weighted_residual: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SampleRow {
    pub sample_id: usize,
    pub sample_index: usize,
    pub var_id: usize,
    pub var_value: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HesRow {
    pub hes_id: usize,
    pub row_var_id: usize,
    pub col_var_id: usize,
    pub hes_value: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TraceFixedRow {
    pub trace_fixed_id: usize,
    pub iter: usize,
    pub obj_value: f64,
    pub inf_pr: f64,
    pub inf_du: f64,
    pub step_size: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgeAvgRow {
    pub age_avg_id: usize,
    pub age: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriorSimRow {
    pub prior_sim_id: usize,
    pub simulate_index: usize,
    pub var_id: usize,
    pub prior_sim_value: Option<f64>,
    pub prior_sim_dage: Option<f64>,
    pub prior_sim_dtime: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataSimRow {
    pub data_sim_id: usize,
    pub simulate_index: usize,
    pub data_subset_id: usize,
    pub data_sim_value: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PredictRow {
    pub predict_id: usize,
    pub sample_index: Option<usize>,
    pub avgint_id: usize,
    pub avg_integrand: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DependVarRow {
    pub depend_var_id: usize,
    pub data_depend: u8,
    pub prior_depend: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MixedInfoRow {
    pub mixed_info_id: usize,
    pub mixed_name: String,
    pub mixed_value: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogRow {
    pub log_id: usize,
    pub message_type: String,
    pub table_name: Option<String>,
    pub row_id: Option<usize>,
    pub unix_time: i64,
    pub message: String,
}

/// Check that the id column of a table equals the row index; every
/// cross-reference in the store relies on this.
pub fn check_table_ids<I>(table: &str, ids: I) -> Result<()>
where
    I: IntoIterator<Item = usize>,
{
    for (index, id) in ids.into_iter().enumerate() {
        if id != index {
            return Err(Error::table(
                table,
                index,
                format!("{table}_id is {id} but should be {index}"),
            ));
        }
    }
    Ok(())
}
