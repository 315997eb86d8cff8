//! The set command: update options and variable-value tables
//!
//! `set option <name> <value>` edits one option row;
//! `set <table> <source>` rewrites start_var, scale_var, or truth_var
//! from prior_mean, fit_var, sample (mean over samples), or another
//! variable-value table.

use crate::cmd::{prior_mean_values, Session};
use crate::error::{Error, Result};
use crate::table::types::{FitVarRow, OptionRow, SampleRow};
use crate::table::Database;

pub fn run(db: &Database, args: &[String]) -> Result<()> {
    if args[0] == "option" {
        if args.len() != 3 {
            return Err(Error::Usage(
                "set option expects a name and a value".to_string(),
            ));
        }
        return set_option(db, &args[1], &args[2]);
    }

    if args.len() != 2 {
        return Err(Error::Usage(
            "set expects a table name and a source".to_string(),
        ));
    }
    let table = args[0].as_str();
    let source = args[1].as_str();
    if !matches!(table, "start_var" | "scale_var" | "truth_var") {
        return Err(Error::Usage(format!(
            "set: table must be option, start_var, scale_var, or truth_var, not {table}"
        )));
    }

    let session = Session::open(db)?;
    let values = match source {
        "prior_mean" => prior_mean_values(&session),
        "fit_var" => {
            let rows: Vec<FitVarRow> = db.read_table("fit_var", true)?;
            rows.iter().map(|r| r.fit_var_value).collect()
        }
        "sample" => {
            // mean of the samples, per variable
            let rows: Vec<SampleRow> = db.read_table("sample", true)?;
            let n_var = session.ctx.pack.size();
            let mut sums = vec![0.0; n_var];
            let mut counts = vec![0usize; n_var];
            for row in &rows {
                sums[row.var_id] += row.var_value;
                counts[row.var_id] += 1;
            }
            if counts.iter().any(|&c| c == 0) {
                return Err(Error::table("sample", None, "sample table is incomplete"));
            }
            sums.iter()
                .zip(&counts)
                .map(|(&s, &c)| s / c as f64)
                .collect()
        }
        "start_var" | "scale_var" | "truth_var" => session.read_var_table(source)?,
        _ => {
            return Err(Error::Usage(format!(
                "set: source must be prior_mean, fit_var, sample, start_var, \
                 scale_var, or truth_var, not {source}"
            )))
        }
    };
    if values.len() != session.ctx.pack.size() {
        return Err(Error::table(
            table,
            None,
            "source does not match the model variables; run init",
        ));
    }
    session.write_var_table(table, &values)
}

fn set_option(db: &Database, name: &str, value: &str) -> Result<()> {
    let mut rows: Vec<OptionRow> = db.read_table("option", true)?;
    match rows.iter_mut().find(|r| r.option_name == name) {
        Some(row) => {
            if value.is_empty() {
                // empty value removes the row, falling back to the default
                let keep: Vec<OptionRow> = rows
                    .iter()
                    .filter(|r| r.option_name != name)
                    .cloned()
                    .enumerate()
                    .map(|(option_id, mut r)| {
                        r.option_id = option_id;
                        r
                    })
                    .collect();
                return db.write_table("option", &keep);
            }
            row.option_value = value.to_string();
        }
        None => {
            let option_id = rows.len();
            rows.push(OptionRow {
                option_id,
                option_name: name.to_string(),
                option_value: value.to_string(),
            });
        }
    }
    db.write_table("option", &rows)
}
