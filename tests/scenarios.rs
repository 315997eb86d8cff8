//! End-to-end scenarios through the command layer
//!
//! Each test writes a small database directory, runs commands through the
//! dispatcher, and checks the written tables.

use std::path::PathBuf;

use approx::assert_relative_eq;

use epimod::table::types::*;
use epimod::table::Database;

const UNIFORM: usize = 0;
const GAUSSIAN: usize = 1;
const LAPLACE: usize = 2;

/// Everything a scenario database contains; tests override fields.
struct Setup {
    ages: Vec<f64>,
    times: Vec<f64>,
    /// (name, parent)
    nodes: Vec<(&'static str, Option<usize>)>,
    priors: Vec<PriorRow>,
    smooths: Vec<SmoothRow>,
    smooth_grids: Vec<SmoothGridRow>,
    /// (rate, parent_smooth, child_smooth)
    rate_smooths: Vec<(RateId, Option<usize>, Option<usize>)>,
    integrands: Vec<(&'static str, f64)>,
    data: Vec<DataRow>,
    avgints: Vec<AvgintRow>,
    /// extra option rows beyond parent_node_name
    options: Vec<(&'static str, String)>,
}

impl Default for Setup {
    fn default() -> Self {
        Setup {
            ages: vec![0.0, 100.0],
            times: vec![2000.0],
            nodes: vec![("world", None)],
            priors: vec![],
            smooths: vec![],
            smooth_grids: vec![],
            rate_smooths: vec![],
            integrands: vec![("Sincidence", 0.0)],
            data: vec![],
            avgints: vec![],
            options: vec![],
        }
    }
}

fn prior(
    prior_id: usize,
    density_id: usize,
    lower: Option<f64>,
    upper: Option<f64>,
    mean: f64,
    std: Option<f64>,
) -> PriorRow {
    PriorRow {
        prior_id,
        prior_name: format!("prior_{prior_id}"),
        density_id,
        lower,
        upper,
        mean,
        std,
        eta: None,
        nu: None,
    }
}

fn one_point_smooth(smooth_id: usize, value_prior: Option<usize>, const_value: Option<f64>)
    -> (SmoothRow, SmoothGridRow) {
    (
        SmoothRow {
            smooth_id,
            smooth_name: format!("smooth_{smooth_id}"),
            n_age: 1,
            n_time: 1,
            mulstd_value_prior_id: None,
            mulstd_dage_prior_id: None,
            mulstd_dtime_prior_id: None,
        },
        SmoothGridRow {
            smooth_grid_id: 0, // caller renumbers
            smooth_id,
            age_id: 0,
            time_id: 0,
            value_prior_id: value_prior,
            dage_prior_id: None,
            dtime_prior_id: None,
            const_value,
        },
    )
}

fn data_row(data_id: usize, density_id: usize, node_id: usize, meas_value: f64) -> DataRow {
    DataRow {
        data_id,
        data_name: None,
        integrand_id: 0,
        density_id,
        node_id,
        subgroup_id: 0,
        weight_id: None,
        hold_out: 0,
        meas_value,
        meas_std: 2e-3,
        eta: None,
        nu: None,
        sample_size: None,
        age_lower: 0.0,
        age_upper: 100.0,
        time_lower: 2000.0,
        time_upper: 2000.0,
    }
}

fn scenario_db(name: &str, setup: &Setup) -> Database {
    let dir: PathBuf = std::env::temp_dir().join(format!(
        "epimod_scenario_{name}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let db = Database::open(&dir).unwrap();

    let age_rows: Vec<AgeRow> = setup
        .ages
        .iter()
        .enumerate()
        .map(|(age_id, &age)| AgeRow { age_id, age })
        .collect();
    db.write_table("age", &age_rows).unwrap();

    let time_rows: Vec<TimeRow> = setup
        .times
        .iter()
        .enumerate()
        .map(|(time_id, &time)| TimeRow { time_id, time })
        .collect();
    db.write_table("time", &time_rows).unwrap();

    let node_rows: Vec<NodeRow> = setup
        .nodes
        .iter()
        .enumerate()
        .map(|(node_id, (name, parent))| NodeRow {
            node_id,
            node_name: name.to_string(),
            parent: *parent,
        })
        .collect();
    db.write_table("node", &node_rows).unwrap();

    db.write_table("covariate", &Vec::<CovariateRow>::new()).unwrap();
    db.write_table("node_cov", &Vec::<NodeCovRow>::new()).unwrap();
    db.write_table("nslist", &Vec::<NslistRow>::new()).unwrap();
    db.write_table("nslist_pair", &Vec::<NslistPairRow>::new()).unwrap();
    db.write_table("weight", &Vec::<WeightRow>::new()).unwrap();
    db.write_table("weight_grid", &Vec::<WeightGridRow>::new()).unwrap();
    db.write_table("mulcov", &Vec::<MulcovRow>::new()).unwrap();
    db.write_table("data_cov_value", &Vec::<DataCovValueRow>::new()).unwrap();
    db.write_table("avgint_cov_value", &Vec::<AvgintCovValueRow>::new()).unwrap();

    let density_names = [
        "uniform",
        "gaussian",
        "laplace",
        "students",
        "log_gaussian",
        "log_laplace",
        "log_students",
        "cen_gaussian",
        "cen_laplace",
        "cen_log_gaussian",
        "cen_log_laplace",
        "binomial",
    ];
    let density_rows: Vec<DensityRow> = density_names
        .iter()
        .enumerate()
        .map(|(density_id, name)| DensityRow {
            density_id,
            density_name: name.to_string(),
        })
        .collect();
    db.write_table("density", &density_rows).unwrap();

    db.write_table("prior", &setup.priors).unwrap();
    db.write_table("smooth", &setup.smooths).unwrap();
    let grids: Vec<SmoothGridRow> = setup
        .smooth_grids
        .iter()
        .cloned()
        .enumerate()
        .map(|(smooth_grid_id, mut row)| {
            row.smooth_grid_id = smooth_grid_id;
            row
        })
        .collect();
    db.write_table("smooth_grid", &grids).unwrap();

    let rate_rows: Vec<RateRow> = RateId::ALL
        .iter()
        .enumerate()
        .map(|(rate_id, rate)| {
            let setting = setup.rate_smooths.iter().find(|(r, _, _)| r == rate);
            RateRow {
                rate_id,
                rate_name: rate.name().to_string(),
                parent_smooth_id: setting.and_then(|(_, p, _)| *p),
                child_smooth_id: setting.and_then(|(_, _, c)| *c),
                child_nslist_id: None,
            }
        })
        .collect();
    db.write_table("rate", &rate_rows).unwrap();

    let integrand_rows: Vec<IntegrandRow> = setup
        .integrands
        .iter()
        .enumerate()
        .map(|(integrand_id, (name, minimum_meas_cv))| IntegrandRow {
            integrand_id,
            integrand_name: name.to_string(),
            minimum_meas_cv: *minimum_meas_cv,
        })
        .collect();
    db.write_table("integrand", &integrand_rows).unwrap();

    let subgroup_rows = vec![SubgroupRow {
        subgroup_id: 0,
        subgroup_name: "world".to_string(),
        group_id: 0,
        group_name: "world".to_string(),
    }];
    db.write_table("subgroup", &subgroup_rows).unwrap();

    let mut option_rows = vec![OptionRow {
        option_id: 0,
        option_name: "parent_node_name".to_string(),
        option_value: "world".to_string(),
    }];
    for (name, value) in &setup.options {
        option_rows.push(OptionRow {
            option_id: option_rows.len(),
            option_name: name.to_string(),
            option_value: value.clone(),
        });
    }
    db.write_table("option", &option_rows).unwrap();

    db.write_table("data", &setup.data).unwrap();
    db.write_table("avgint", &setup.avgints).unwrap();
    db
}

fn run(db: &Database, command: &[&str]) -> epimod::Result<()> {
    let mut args = vec![
        "epimod".to_string(),
        db.path().display().to_string(),
    ];
    args.extend(command.iter().map(|s| s.to_string()));
    epimod::cmd::dispatch(&args)
}

fn fit_var_values(db: &Database) -> Vec<FitVarRow> {
    db.read_table("fit_var", true).unwrap()
}

#[test]
fn test_s1_exact_recovery_noiseless_single_rate() {
    let (smooth, grid) = one_point_smooth(0, Some(0), None);
    let setup = Setup {
        priors: vec![prior(0, UNIFORM, Some(1e-4), Some(1.0), 0.005, None)],
        smooths: vec![smooth],
        smooth_grids: vec![grid],
        rate_smooths: vec![(RateId::Iota, Some(0), None)],
        data: vec![data_row(0, GAUSSIAN, 0, 0.01)],
        ..Setup::default()
    };
    let db = scenario_db("s1", &setup);
    run(&db, &["init"]).unwrap();
    run(&db, &["fit", "fixed"]).unwrap();

    let fit = fit_var_values(&db);
    assert_eq!(fit.len(), 1);
    assert_relative_eq!(fit[0].fit_var_value, 0.01, max_relative = 1e-3);

    // one residual per data subset row
    let data_fit: Vec<FitDataSubsetRow> = db.read_table("fit_data_subset", true).unwrap();
    assert_eq!(data_fit.len(), 1);
    assert_relative_eq!(data_fit[0].avg_integrand, 0.01, max_relative = 1e-3);
}

#[test]
fn test_s2_uniform_prior_mean_ignored() {
    let (smooth, grid) = one_point_smooth(0, Some(0), None);
    let setup = Setup {
        // uniform with an upper limit of plus infinity (null)
        priors: vec![prior(0, UNIFORM, Some(1e-4), None, 0.005, None)],
        smooths: vec![smooth],
        smooth_grids: vec![grid],
        rate_smooths: vec![(RateId::Iota, Some(0), None)],
        data: vec![data_row(0, GAUSSIAN, 0, 0.01)],
        ..Setup::default()
    };
    let db = scenario_db("s2", &setup);
    run(&db, &["init"]).unwrap();
    run(&db, &["fit", "fixed"]).unwrap();

    let fit = fit_var_values(&db);
    let value = fit[0].fit_var_value;
    assert!(value.is_finite());
    assert!((1e-4..1.0).contains(&value));
    assert_relative_eq!(value, 0.01, max_relative = 1e-3);
    // uniform value prior contributes no residual
    assert!(fit[0].residual_value.is_none());
}

#[test]
fn test_s3_equality_difference_constraint() {
    // two age points, wide value prior, dage uniform with lower = upper = 0
    let smooth = SmoothRow {
        smooth_id: 0,
        smooth_name: "two_ages".to_string(),
        n_age: 2,
        n_time: 1,
        mulstd_value_prior_id: None,
        mulstd_dage_prior_id: None,
        mulstd_dtime_prior_id: None,
    };
    let grids: Vec<SmoothGridRow> = (0..2)
        .map(|age_id| SmoothGridRow {
            smooth_grid_id: age_id,
            smooth_id: 0,
            age_id,
            time_id: 0,
            value_prior_id: Some(0),
            dage_prior_id: Some(1),
            dtime_prior_id: None,
            const_value: None,
        })
        .collect();
    let setup = Setup {
        priors: vec![
            prior(0, GAUSSIAN, Some(1e-6), Some(1.0), 0.02, Some(10.0)),
            prior(1, UNIFORM, Some(0.0), Some(0.0), 0.0, None),
        ],
        smooths: vec![smooth],
        smooth_grids: grids,
        rate_smooths: vec![(RateId::Iota, Some(0), None)],
        data: vec![data_row(0, GAUSSIAN, 0, 0.01)],
        ..Setup::default()
    };
    let db = scenario_db("s3", &setup);
    run(&db, &["init"]).unwrap();
    run(&db, &["fit", "fixed"]).unwrap();

    let fit = fit_var_values(&db);
    assert_eq!(fit.len(), 2);
    assert!((fit[0].fit_var_value - fit[1].fit_var_value).abs() <= 1e-10);
    assert_relative_eq!(fit[0].fit_var_value, 0.01, max_relative = 1e-3);
}

#[test]
fn test_s4_ode_prevalence_closed_form() {
    // iota = 0.01 and omega = 0.02 constant, pini = 0: the prevalence
    // ODE is P' = iota (1 - P), so P(a) = 1 - exp(-iota a)
    let (smooth_iota, grid_iota) = one_point_smooth(0, None, Some(0.01));
    let (smooth_omega, grid_omega) = one_point_smooth(1, None, Some(0.02));
    let avgints: Vec<AvgintRow> = [10.0, 50.0, 100.0]
        .iter()
        .enumerate()
        .map(|(avgint_id, &age)| AvgintRow {
            avgint_id,
            integrand_id: 0,
            node_id: 0,
            subgroup_id: 0,
            weight_id: None,
            age_lower: age,
            age_upper: age,
            time_lower: 2000.0,
            time_upper: 2000.0,
        })
        .collect();
    let setup = Setup {
        integrands: vec![("prevalence", 0.0)],
        smooths: vec![smooth_iota, smooth_omega],
        smooth_grids: vec![grid_iota, grid_omega],
        rate_smooths: vec![(RateId::Iota, Some(0), None), (RateId::Omega, Some(1), None)],
        avgints,
        ..Setup::default()
    };
    let db = scenario_db("s4", &setup);
    run(&db, &["init"]).unwrap();
    run(&db, &["set", "truth_var", "prior_mean"]).unwrap();
    run(&db, &["predict", "truth_var"]).unwrap();

    let predict: Vec<PredictRow> = db.read_table("predict", true).unwrap();
    assert_eq!(predict.len(), 3);
    for (row, &age) in predict.iter().zip(&[10.0, 50.0, 100.0]) {
        let expect = 1.0 - (-0.01_f64 * age).exp();
        assert_relative_eq!(row.avg_integrand, expect, max_relative = 1e-6);
    }
}

#[test]
fn test_s5_laplace_rejected_with_random_effects() {
    // a child smoothing that is not constant, and laplace data on a child
    let (smooth_parent, grid_parent) = one_point_smooth(0, Some(0), None);
    let (smooth_child, grid_child) = one_point_smooth(1, Some(1), None);
    let setup = Setup {
        nodes: vec![("world", None), ("north", Some(0)), ("south", Some(0))],
        priors: vec![
            prior(0, UNIFORM, Some(1e-4), Some(1.0), 0.005, None),
            prior(1, GAUSSIAN, None, None, 0.0, Some(1.0)),
        ],
        smooths: vec![smooth_parent, smooth_child],
        smooth_grids: vec![grid_parent, grid_child],
        rate_smooths: vec![(RateId::Iota, Some(0), Some(1))],
        data: vec![data_row(0, LAPLACE, 1, 0.01)],
        ..Setup::default()
    };
    let db = scenario_db("s5", &setup);
    run(&db, &["init"]).unwrap();
    let err = run(&db, &["fit", "both"]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("laplace"), "message was: {msg}");
    assert!(msg.contains("data"), "message was: {msg}");

    // the error also lands in the log table
    let log: Vec<LogRow> = db.read_table("log", true).unwrap();
    assert!(log
        .iter()
        .any(|r| r.message_type == "error" && r.message.contains("laplace")));
}

#[test]
fn test_s6_asymptotic_positive_definite_gate() {
    // omega has a wide uniform prior and no data: its Hessian row is zero
    let (smooth_iota, grid_iota) = one_point_smooth(0, Some(0), None);
    let (smooth_omega, grid_omega) = one_point_smooth(1, Some(1), None);
    let setup = Setup {
        priors: vec![
            prior(0, UNIFORM, Some(1e-4), Some(1.0), 0.005, None),
            prior(1, UNIFORM, Some(0.0), None, 0.05, None),
        ],
        smooths: vec![smooth_iota, smooth_omega],
        smooth_grids: vec![grid_iota, grid_omega],
        rate_smooths: vec![(RateId::Iota, Some(0), None), (RateId::Omega, Some(1), None)],
        data: vec![data_row(0, GAUSSIAN, 0, 0.01)],
        options: vec![("asymptotic_rcond_lower", "1e-8".to_string())],
        ..Setup::default()
    };
    let db = scenario_db("s6", &setup);
    run(&db, &["init"]).unwrap();
    run(&db, &["fit", "fixed"]).unwrap();
    run(&db, &["sample", "asymptotic", "both", "4"]).unwrap();

    // the Hessian table is written to aid diagnosis, the sample table is
    // not, and the log mentions the rcond gate
    assert!(db.table_exists("hes_fixed"));
    assert!(!db.table_exists("sample"));
    let log: Vec<LogRow> = db.read_table("log", true).unwrap();
    assert!(log
        .iter()
        .any(|r| r.message_type == "warning" && r.message.contains("rcond")));
}

#[test]
fn test_scaled_fixed_effect_round_trip() {
    // a value prior with eta turns on log scaling; the fit must still
    // recover the data and stay inside its box
    let (smooth, grid) = one_point_smooth(0, Some(0), None);
    let mut scaled_prior = prior(0, GAUSSIAN, Some(1e-4), Some(1.0), 0.005, Some(0.1));
    scaled_prior.eta = Some(1e-3);
    let setup = Setup {
        priors: vec![scaled_prior],
        smooths: vec![smooth],
        smooth_grids: vec![grid],
        rate_smooths: vec![(RateId::Iota, Some(0), None)],
        data: vec![data_row(0, GAUSSIAN, 0, 0.01)],
        ..Setup::default()
    };
    let db = scenario_db("scaled", &setup);
    run(&db, &["init"]).unwrap();
    run(&db, &["fit", "fixed"]).unwrap();

    let fit = fit_var_values(&db);
    let value = fit[0].fit_var_value;
    assert!((1e-4..=1.0).contains(&value));
    assert_relative_eq!(value, 0.01, max_relative = 1e-3);
}

#[test]
fn test_simulate_fit_sample_smoke() {
    let (smooth, grid) = one_point_smooth(0, Some(0), None);
    let setup = Setup {
        priors: vec![prior(0, UNIFORM, Some(1e-4), Some(1.0), 0.005, None)],
        smooths: vec![smooth],
        smooth_grids: vec![grid],
        rate_smooths: vec![(RateId::Iota, Some(0), None)],
        data: vec![data_row(0, GAUSSIAN, 0, 0.01)],
        options: vec![("random_seed", "123".to_string())],
        ..Setup::default()
    };
    let db = scenario_db("smoke", &setup);
    run(&db, &["init"]).unwrap();
    run(&db, &["fit", "fixed"]).unwrap();
    run(&db, &["set", "truth_var", "fit_var"]).unwrap();
    run(&db, &["simulate", "2"]).unwrap();

    let data_sim: Vec<DataSimRow> = db.read_table("data_sim", true).unwrap();
    assert_eq!(data_sim.len(), 2);
    assert!(data_sim.iter().all(|r| r.data_sim_value.is_finite()));

    // fit against the first draw, then simulate-method sampling
    run(&db, &["fit", "fixed", "0"]).unwrap();
    run(&db, &["sample", "simulate", "fixed", "2"]).unwrap();
    let samples: Vec<SampleRow> = db.read_table("sample", true).unwrap();
    assert_eq!(samples.len(), 2); // two samples of one variable
    assert!(samples.iter().all(|r| r.var_value.is_finite()));

    // predictions for every data rectangle come from the avgint table;
    // reuse the fit for a depend pass instead as a final smoke check
    run(&db, &["depend"]).unwrap();
    let depend: Vec<DependVarRow> = db.read_table("depend_var", true).unwrap();
    assert_eq!(depend.len(), 1);
    assert_eq!(depend[0].data_depend, 1);
}
