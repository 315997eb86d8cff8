//! Error types shared across the crate
//!
//! Two broad kinds exist:
//! - fatal errors (usage, schema, validation) that propagate to the command
//!   frame, get logged to the store, and exit with status 1;
//! - recoverable numerical failures raised while evaluating the model,
//!   which the optimizer catches and turns into a rejected trial step.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Context snapshot attached to a recoverable numerical failure.
///
/// Carries enough of the evaluation state (integrand, cohort age, ODE
/// compartments, adjusted rates) to diagnose why a trial point failed.
#[derive(Debug, Clone, Default)]
pub struct NumericContext {
    /// What failed to evaluate, e.g. "prevalence integrand".
    pub integrand: String,
    pub age: f64,
    pub susceptible: Option<f64>,
    pub with_condition: Option<f64>,
    /// (rate name, unadjusted value, adjusted value)
    pub rates: Vec<(String, f64, f64)>,
}

impl std::fmt::Display for NumericContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot compute the {}", self.integrand)?;
        if let (Some(s), Some(c)) = (self.susceptible, self.with_condition) {
            write!(f, "\nage = {}, S = {}, C = {}", self.age, s, c)?;
        }
        let mut first = true;
        for (name, raw, adjusted) in &self.rates {
            write!(f, "{}{} = {}", if first { "\n" } else { ", " }, name, raw)?;
            if raw != adjusted {
                write!(f, " adjusted = {}", adjusted)?;
            }
            first = false;
        }
        Ok(())
    }
}

/// All error conditions produced by the engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Wrong command name or argument count.
    #[error("usage: {0}")]
    Usage(String),

    /// Malformed or contradictory table content.  Carries the table name
    /// and, when available, the offending row id for the log table.
    #[error("{table} table{}: {msg}", .row_id.map(|r| format!(", row {r}")).unwrap_or_default())]
    Table {
        table: String,
        row_id: Option<usize>,
        msg: String,
    },

    /// A bad or missing entry in the option table.
    #[error("option table: {0}")]
    Option(String),

    /// Non-finite adjusted rate or integrand, or non-positive S+C where
    /// prevalence is required.  Recoverable: the solver rejects the step.
    #[error("{0}")]
    Numeric(NumericContext),

    /// The optimizer could not make progress (singular system, line search
    /// failure past its iteration cap).
    #[error("optimizer: {0}")]
    Optimizer(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Construct a fatal table error.
    pub fn table(table: &str, row_id: impl Into<Option<usize>>, msg: impl Into<String>) -> Self {
        Error::Table {
            table: table.to_string(),
            row_id: row_id.into(),
            msg: msg.into(),
        }
    }

    /// True for errors the optimizer may absorb as a rejected trial step.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Numeric(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_error_display() {
        let err = Error::table("smooth_grid", 7, "grid is not rectangular");
        assert_eq!(
            err.to_string(),
            "smooth_grid table, row 7: grid is not rectangular"
        );
        let err = Error::table("option", None, "unknown rate_case");
        assert_eq!(err.to_string(), "option table: unknown rate_case");
    }

    #[test]
    fn test_numeric_is_recoverable() {
        let ctx = NumericContext {
            integrand: "prevalence".to_string(),
            age: 50.0,
            susceptible: Some(-0.1),
            with_condition: Some(0.0),
            rates: vec![("iota".to_string(), 0.01, 0.02)],
        };
        let err = Error::Numeric(ctx);
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("prevalence"));
        assert!(err.to_string().contains("adjusted = 0.02"));
    }
}
