//! Store tables: row types, loading, options, and fit subsets

pub mod loader;
pub mod option;
pub mod store;
pub mod subset;
pub mod types;

pub use loader::{DbInput, Integrand, Mulcov};
pub use option::{MeasNoiseEffect, Options, RateCase};
pub use store::Database;
pub use subset::{ChildInfo, SubsetAvgintPoint, SubsetDataPoint};
pub use types::{Density, IntegrandKind, MulcovType, RateId, N_RATE};

#[cfg(test)]
pub(crate) mod test_util {
    use super::loader::{DbInput, Integrand};
    use super::types::*;

    /// A tiny but complete input snapshot: one parent node with two
    /// children, the full density table, one Sincidence integrand, no
    /// covariates and no data.
    pub fn minimal_input() -> DbInput {
        let density_names = [
            "uniform",
            "gaussian",
            "cen_gaussian",
            "laplace",
            "cen_laplace",
            "students",
            "log_gaussian",
            "cen_log_gaussian",
            "log_laplace",
            "cen_log_laplace",
            "log_students",
            "binomial",
        ];
        DbInput {
            age: vec![0.0, 100.0],
            time: vec![1990.0, 2020.0],
            node: vec![
                NodeRow {
                    node_id: 0,
                    node_name: "world".to_string(),
                    parent: None,
                },
                NodeRow {
                    node_id: 1,
                    node_name: "child_0".to_string(),
                    parent: Some(0),
                },
                NodeRow {
                    node_id: 2,
                    node_name: "child_1".to_string(),
                    parent: Some(0),
                },
            ],
            covariate: vec![],
            node_cov: vec![],
            rate: RateId::ALL
                .iter()
                .enumerate()
                .map(|(i, r)| RateRow {
                    rate_id: i,
                    rate_name: r.name().to_string(),
                    parent_smooth_id: None,
                    child_smooth_id: None,
                    child_nslist_id: None,
                })
                .collect(),
            smooth: vec![],
            smooth_grid: vec![],
            prior: vec![],
            density: density_names
                .iter()
                .map(|n| Density::from_name(n).unwrap())
                .collect(),
            integrand: vec![Integrand {
                kind: IntegrandKind::Sincidence,
                mulcov_id: None,
                minimum_meas_cv: 0.0,
            }],
            mulcov: vec![],
            subgroup: vec![SubgroupRow {
                subgroup_id: 0,
                subgroup_name: "world".to_string(),
                group_id: 0,
                group_name: "world".to_string(),
            }],
            nslist: vec![],
            nslist_pair: vec![],
            option: vec![],
            weight: vec![],
            weight_grid: vec![],
            data: vec![],
            data_cov_value: vec![],
            avgint: vec![],
            avgint_cov_value: vec![],
        }
    }
}
