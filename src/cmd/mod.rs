//! Command layer: dispatch, shared session setup, and the individual
//! commands

pub mod bnd_mulcov;
pub mod data_density;
pub mod depend;
pub mod fit;
pub mod hold_out;
pub mod init;
pub mod old2new;
pub mod predict;
pub mod sample;
pub mod set;
pub mod simulate;

use std::path::Path;

use log::info;

use crate::error::{Error, Result};
use crate::model::ModelContext;
use crate::pack::VarPriors;
use crate::table::loader::DbInput;
use crate::table::option::Options;
use crate::table::subset::{subset_data, ChildInfo, SubsetDataPoint};
use crate::table::types::{BndMulcovRow, DataSubsetRow, VarValueRow};
use crate::table::Database;

/// Recognized commands with their argument counts, including the program
/// name and database as arguments 0 and 1.
const COMMAND_INFO: &[(&str, &[usize])] = &[
    ("bnd_mulcov", &[4, 5]),
    ("data_density", &[3, 7]),
    ("depend", &[3]),
    ("fit", &[4, 5, 6]),
    ("hold_out", &[5, 8]),
    ("init", &[3]),
    ("old2new", &[3]),
    ("predict", &[4]),
    ("sample", &[6, 7]),
    ("set", &[5, 6]),
    ("simulate", &[4]),
];

/// Shared state most commands need: the input snapshot, options, the
/// parent/child mapping, the model context, and the data subset.
pub struct Session {
    pub db: Database,
    pub input: DbInput,
    pub options: Options,
    pub child_info: ChildInfo,
    pub ctx: ModelContext,
    pub subset: Vec<SubsetDataPoint>,
    pub var_priors: VarPriors,
}

impl Session {
    pub fn open(db: &Database) -> Result<Session> {
        let input = DbInput::read(db)?;
        let options = Options::parse(&input)?;
        let child_info = ChildInfo::new(options.parent_node_id, &input.node);
        let ctx = ModelContext::build(&input, &options, &child_info)?;
        let mut subset = subset_data(&input, &child_info)?;

        // hold out whole integrands named in the option table
        for point in subset.iter_mut() {
            let name = ctx.integrands[point.integrand_id].kind.name();
            if options.hold_out_integrand.iter().any(|n| n == name) {
                point.hold_out = true;
            }
        }

        // data rows per child, for constraining childless random effects
        let mut n_child_data_in_fit = vec![0usize; child_info.n_child()];
        for point in &subset {
            if point.child < child_info.n_child() && !point.hold_out {
                n_child_data_in_fit[point.child] += 1;
            }
        }

        let mut var_priors = VarPriors::new(
            options.bound_random,
            &n_child_data_in_fit,
            &input.prior,
            &ctx.pack,
            &ctx.smooths,
        );
        let bnd_mulcov: Vec<BndMulcovRow> = db.read_table("bnd_mulcov", false)?;
        if !bnd_mulcov.is_empty() {
            var_priors.set_bnd_mulcov(&bnd_mulcov);
        }

        Ok(Session {
            db: db.clone(),
            input,
            options,
            child_info,
            ctx,
            subset,
            var_priors,
        })
    }

    /// Apply the `data_subset` table's likelihood columns (which the
    /// hold_out and data_density commands may have rewritten) onto the
    /// subset points.
    pub fn apply_data_subset(&mut self) -> Result<()> {
        let rows: Vec<DataSubsetRow> = self.db.read_table("data_subset", true)?;
        if rows.len() != self.subset.len() {
            return Err(Error::table(
                "data_subset",
                None,
                "data_subset does not match the data subset; run init",
            ));
        }
        for (point, row) in self.subset.iter_mut().zip(rows) {
            if row.data_id != point.original_id {
                return Err(Error::table(
                    "data_subset",
                    row.data_subset_id,
                    "data_id does not match the data subset; run init",
                ));
            }
            point.hold_out = point.hold_out || row.hold_out != 0;
            point.density_id = row.density_id;
            point.eta = row.eta;
            point.nu = row.nu;
            point.sample_size = row.sample_size;
        }
        Ok(())
    }

    /// Read a variable-value table (start_var, scale_var, truth_var).
    pub fn read_var_table(&self, table: &str) -> Result<Vec<f64>> {
        let rows: Vec<VarValueRow> = self.db.read_table(table, true)?;
        if rows.len() != self.ctx.pack.size() {
            return Err(Error::table(
                table,
                None,
                format!(
                    "table has {} rows but there are {} model variables; run init",
                    rows.len(),
                    self.ctx.pack.size()
                ),
            ));
        }
        Ok(rows.into_iter().map(|r| r.var_value).collect())
    }

    pub fn write_var_table(&self, table: &str, values: &[f64]) -> Result<()> {
        let rows: Vec<VarValueRow> = values
            .iter()
            .enumerate()
            .map(|(var_id, &var_value)| VarValueRow { var_id, var_value })
            .collect();
        self.db.write_table(table, &rows)
    }
}

/// The value each variable's priors suggest as a starting point: the
/// constant for pinned variables, otherwise the value prior mean.
pub fn prior_mean_values(session: &Session) -> Vec<f64> {
    let n_var = session.ctx.pack.size();
    let mut values = Vec::with_capacity(n_var);
    for var_id in 0..n_var {
        let value = match session.var_priors.const_value(var_id) {
            Some(c) => c,
            None => match session.var_priors.value_prior_id(var_id) {
                Some(prior_id) => session.ctx.priors[prior_id].mean,
                None => 0.0,
            },
        };
        values.push(value);
    }
    values
}

fn usage() -> String {
    let mut msg = String::from(
        "usage:    epimod database command [arguments]\n\
         database: directory holding the input tables as CSV files\n\
         command:  one of the following\n",
    );
    let mut names: Vec<&str> = COMMAND_INFO.iter().map(|(name, _)| *name).collect();
    names.dedup();
    for name in names {
        msg.push_str("          ");
        msg.push_str(name);
        msg.push('\n');
    }
    msg
}

/// Validate the argument vector and run the named command.  `args`
/// includes the program name at index 0.
pub fn dispatch(args: &[String]) -> Result<()> {
    if args.len() < 3 {
        return Err(Error::Usage(usage()));
    }
    let database = &args[1];
    let command = args[2].as_str();

    let expected: Vec<usize> = COMMAND_INFO
        .iter()
        .filter(|(name, _)| *name == command)
        .flat_map(|(_, counts)| counts.iter().copied())
        .collect();
    if expected.is_empty() {
        return Err(Error::Usage(format!(
            "{command} is not a valid command\n{}",
            usage()
        )));
    }
    if !expected.contains(&args.len()) {
        let counts: Vec<String> = expected.iter().map(|n| (n - 3).to_string()).collect();
        return Err(Error::Usage(format!(
            "{command} expects {} arguments after the command name, not {}",
            counts.join(" or "),
            args.len() - 3
        )));
    }

    let db = Database::open(Path::new(database))?;
    let message = args[2..].join(" ");
    db.log_message("command", None, None, &format!("begin {message}"))?;
    info!("begin {message}");

    let rest = &args[3..];
    let result = match command {
        "bnd_mulcov" => bnd_mulcov::run(&db, rest),
        "data_density" => data_density::run(&db, rest),
        "depend" => depend::run(&db),
        "fit" => fit::run(&db, rest),
        "hold_out" => hold_out::run(&db, rest),
        "init" => init::run(&db),
        "old2new" => old2new::run(&db),
        "predict" => predict::run(&db, rest),
        "sample" => sample::run(&db, rest),
        "set" => set::run(&db, rest),
        "simulate" => simulate::run(&db, rest),
        _ => unreachable!("command validated above"),
    };

    match &result {
        Ok(()) => {
            db.log_message("command", None, None, &format!("end {command}"))?;
            info!("end {command}");
        }
        Err(e) => {
            let (table, row_id) = match e {
                Error::Table { table, row_id, .. } => (Some(table.as_str()), *row_id),
                _ => (None, None),
            };
            let _ = db.log_message("error", table, row_id, &e.to_string());
        }
    }
    result
}
