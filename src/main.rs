//! epimod command-line interface
//!
//! `epimod <database> <command> [arguments]` where the database is a
//! directory of CSV tables.  Fatal errors are logged to the database's log
//! table and exit with status 1.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use epimod::error::Error;

#[derive(Parser)]
#[command(
    name = "epimod",
    version,
    about = "Age-time disease rate estimation from heterogeneous integrand measurements"
)]
struct Cli {
    /// Database directory holding the input tables as CSV files
    database: PathBuf,

    /// Command name followed by its arguments (init, fit, simulate,
    /// sample, predict, set, depend, hold_out, data_density, bnd_mulcov,
    /// old2new)
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    // re-assemble the argument vector the dispatcher validates
    let mut args = vec!["epimod".to_string(), cli.database.display().to_string()];
    args.extend(cli.command);

    match epimod::cmd::dispatch(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Usage(msg)) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("epimod error: {e}");
            ExitCode::FAILURE
        }
    }
}
