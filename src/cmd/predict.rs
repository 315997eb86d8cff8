//! The predict command: average integrands for the avgint table
//!
//! `predict <source>` with source sample, fit_var, or truth_var.  One
//! prediction per avgint subset row, times one per sample index when the
//! source is the sample table.

use crate::cmd::Session;
use crate::error::{Error, Result};
use crate::model::{AvgIntegrand, Rectangle};
use crate::table::subset::{subset_avgint, SubsetAvgintPoint};
use crate::table::types::{FitVarRow, PredictRow, SampleRow};
use crate::table::Database;

pub fn run(db: &Database, args: &[String]) -> Result<()> {
    let source = args[0].as_str();
    let session = Session::open(db)?;
    let avgint_subset = subset_avgint(&session.input, &session.child_info);
    let avg = AvgIntegrand::new(&session.ctx);

    let mut rows = Vec::new();
    match source {
        "fit_var" => {
            let fit_rows: Vec<FitVarRow> = db.read_table("fit_var", true)?;
            let values: Vec<f64> = fit_rows.iter().map(|r| r.fit_var_value).collect();
            predict_with(&session, &avg, &avgint_subset, &values, None, &mut rows)?;
        }
        "truth_var" => {
            let values = session.read_var_table("truth_var")?;
            predict_with(&session, &avg, &avgint_subset, &values, None, &mut rows)?;
        }
        "sample" => {
            let sample_rows: Vec<SampleRow> = db.read_table("sample", true)?;
            let n_var = session.ctx.pack.size();
            let n_sample = sample_rows.len() / n_var;
            if sample_rows.len() != n_sample * n_var {
                return Err(Error::table(
                    "sample",
                    None,
                    "sample table size is not a multiple of the variable count",
                ));
            }
            for sample_index in 0..n_sample {
                let mut values = vec![0.0; n_var];
                for row in &sample_rows[sample_index * n_var..(sample_index + 1) * n_var] {
                    values[row.var_id] = row.var_value;
                }
                predict_with(
                    &session,
                    &avg,
                    &avgint_subset,
                    &values,
                    Some(sample_index),
                    &mut rows,
                )?;
            }
        }
        _ => {
            return Err(Error::Usage(
                "predict source must be sample, fit_var, or truth_var".to_string(),
            ))
        }
    }
    db.write_table("predict", &rows)?;
    Ok(())
}

fn predict_with(
    session: &Session,
    avg: &AvgIntegrand,
    avgint_subset: &[SubsetAvgintPoint],
    pack_vec: &[f64],
    sample_index: Option<usize>,
    rows: &mut Vec<PredictRow>,
) -> Result<()> {
    if pack_vec.len() != session.ctx.pack.size() {
        return Err(Error::table(
            "predict",
            None,
            "variable source does not match the model variables; run init",
        ));
    }
    for point in avgint_subset {
        let rect = Rectangle {
            age_lower: point.age_lower,
            age_upper: point.age_upper,
            time_lower: point.time_lower,
            time_upper: point.time_upper,
            weight_id: point.weight_id,
            integrand_id: point.integrand_id,
            child: point.child,
            subgroup_id: point.subgroup_id,
            node_id: session.input.avgint[point.original_id].node_id,
            x: &point.x,
        };
        let value = avg.rectangle(&rect, pack_vec)?;
        rows.push(PredictRow {
            predict_id: rows.len(),
            sample_index,
            avgint_id: point.original_id,
            avg_integrand: value,
        });
    }
    Ok(())
}
