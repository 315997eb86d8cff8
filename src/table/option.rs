//! Typed view of the option table
//!
//! The option table is a flat name/value list.  Unknown names are fatal so
//! that typos do not silently fall back to defaults.

use super::loader::DbInput;
use super::types::RateId;
use crate::error::{Error, Result};

/// Which of iota and rho may be structurally non-zero; selects simplified
/// branches in the cohort ODE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCase {
    IotaZeroRhoZero,
    IotaPosRhoZero,
    IotaZeroRhoPos,
    IotaPosRhoPos,
}

impl RateCase {
    pub fn from_name(name: &str) -> Option<RateCase> {
        match name {
            "iota_zero_rho_zero" => Some(RateCase::IotaZeroRhoZero),
            "iota_pos_rho_zero" => Some(RateCase::IotaPosRhoZero),
            "iota_zero_rho_pos" => Some(RateCase::IotaZeroRhoPos),
            "iota_pos_rho_pos" => Some(RateCase::IotaPosRhoPos),
            _ => None,
        }
    }

    pub fn iota_zero(self) -> bool {
        matches!(self, RateCase::IotaZeroRhoZero | RateCase::IotaZeroRhoPos)
    }

    pub fn rho_zero(self) -> bool {
        matches!(self, RateCase::IotaZeroRhoZero | RateCase::IotaPosRhoZero)
    }
}

/// How the average measurement noise effect combines with the transformed
/// standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasNoiseEffect {
    AddStdScaleAll,
    AddStdScaleNone,
    AddStdScaleLog,
    AddVarScaleAll,
    AddVarScaleNone,
    AddVarScaleLog,
}

impl MeasNoiseEffect {
    pub fn from_name(name: &str) -> Option<MeasNoiseEffect> {
        match name {
            "add_std_scale_all" => Some(MeasNoiseEffect::AddStdScaleAll),
            "add_std_scale_none" => Some(MeasNoiseEffect::AddStdScaleNone),
            "add_std_scale_log" => Some(MeasNoiseEffect::AddStdScaleLog),
            "add_var_scale_all" => Some(MeasNoiseEffect::AddVarScaleAll),
            "add_var_scale_none" => Some(MeasNoiseEffect::AddVarScaleNone),
            "add_var_scale_log" => Some(MeasNoiseEffect::AddVarScaleLog),
            _ => None,
        }
    }
}

/// Per-stage (fixed or random) optimizer settings.
#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub tolerance: f64,
    pub max_num_iter: i64,
    pub print_level: i32,
    pub derivative_test: String,
    pub accept_after_max_steps: i64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        OptimizerSettings {
            tolerance: 1e-8,
            max_num_iter: 100,
            print_level: 0,
            derivative_test: "none".to_string(),
            accept_after_max_steps: 5,
        }
    }
}

/// All option values the engine consumes, with defaults applied.
#[derive(Debug, Clone)]
pub struct Options {
    pub parent_node_id: usize,
    pub ode_step_size: f64,
    pub age_avg_split: Vec<f64>,
    pub rate_case: RateCase,
    pub random_seed: u64,
    pub bound_random: f64,
    pub zero_sum_child_rate: Vec<RateId>,
    pub zero_sum_mulcov_group: Vec<String>,
    pub quasi_fixed: bool,
    pub meas_noise_effect: MeasNoiseEffect,
    pub hold_out_integrand: Vec<String>,
    pub asymptotic_rcond_lower: f64,
    pub warn_on_stderr: bool,
    pub trace_init_fit_model: bool,
    pub fixed: OptimizerSettings,
    pub random: OptimizerSettings,
    pub method_random: String,
    pub bound_frac_fixed: f64,
    pub limited_memory_max_history_fixed: usize,
}

impl Options {
    /// Parse the option table against the node table (for parent node name
    /// resolution).
    pub fn parse(input: &DbInput) -> Result<Options> {
        let mut parent_node_id: Option<usize> = None;
        let mut parent_node_name: Option<String> = None;
        let mut opts = Options {
            parent_node_id: 0,
            ode_step_size: 10.0,
            age_avg_split: Vec::new(),
            rate_case: RateCase::IotaPosRhoZero,
            random_seed: 0,
            bound_random: f64::INFINITY,
            zero_sum_child_rate: Vec::new(),
            zero_sum_mulcov_group: Vec::new(),
            quasi_fixed: true,
            meas_noise_effect: MeasNoiseEffect::AddStdScaleAll,
            hold_out_integrand: Vec::new(),
            asymptotic_rcond_lower: 0.0,
            warn_on_stderr: true,
            trace_init_fit_model: false,
            fixed: OptimizerSettings::default(),
            random: OptimizerSettings::default(),
            method_random: "ipopt_solve".to_string(),
            bound_frac_fixed: 1e-2,
            limited_memory_max_history_fixed: 30,
        };

        for row in &input.option {
            let name = row.option_name.as_str();
            let value = row.option_value.trim();
            match name {
                "parent_node_id" => {
                    parent_node_id = Some(parse_num(name, value)?);
                }
                "parent_node_name" => {
                    parent_node_name = Some(value.to_string());
                }
                "ode_step_size" => {
                    opts.ode_step_size = parse_num(name, value)?;
                    if opts.ode_step_size <= 0.0 {
                        return Err(Error::Option("ode_step_size must be positive".to_string()));
                    }
                }
                "age_avg_split" => {
                    opts.age_avg_split = value
                        .split_whitespace()
                        .map(|s| parse_num("age_avg_split", s))
                        .collect::<Result<Vec<f64>>>()?;
                }
                "rate_case" => {
                    opts.rate_case = RateCase::from_name(value).ok_or_else(|| {
                        Error::Option(format!("unknown rate_case {value}"))
                    })?;
                }
                "random_seed" => {
                    opts.random_seed = parse_num(name, value)?;
                }
                "bound_random" => {
                    opts.bound_random = if value.is_empty() {
                        f64::INFINITY
                    } else {
                        parse_num(name, value)?
                    };
                    if opts.bound_random < 0.0 {
                        return Err(Error::Option("bound_random must be >= 0".to_string()));
                    }
                }
                "zero_sum_child_rate" => {
                    for word in value.split_whitespace() {
                        let rate = RateId::from_name(word).ok_or_else(|| {
                            Error::Option(format!("zero_sum_child_rate: unknown rate {word}"))
                        })?;
                        opts.zero_sum_child_rate.push(rate);
                    }
                }
                "zero_sum_mulcov_group" => {
                    opts.zero_sum_mulcov_group =
                        value.split_whitespace().map(str::to_string).collect();
                }
                "quasi_fixed" => opts.quasi_fixed = parse_bool(name, value)?,
                "meas_noise_effect" => {
                    opts.meas_noise_effect =
                        MeasNoiseEffect::from_name(value).ok_or_else(|| {
                            Error::Option(format!("unknown meas_noise_effect {value}"))
                        })?;
                }
                "hold_out_integrand" => {
                    opts.hold_out_integrand =
                        value.split_whitespace().map(str::to_string).collect();
                }
                "asymptotic_rcond_lower" => {
                    opts.asymptotic_rcond_lower = parse_num(name, value)?;
                }
                "warn_on_stderr" => opts.warn_on_stderr = parse_bool(name, value)?,
                "trace_init_fit_model" => opts.trace_init_fit_model = parse_bool(name, value)?,
                "tolerance_fixed" => opts.fixed.tolerance = parse_num(name, value)?,
                "tolerance_random" => opts.random.tolerance = parse_num(name, value)?,
                "max_num_iter_fixed" => opts.fixed.max_num_iter = parse_num(name, value)?,
                "max_num_iter_random" => opts.random.max_num_iter = parse_num(name, value)?,
                "print_level_fixed" => opts.fixed.print_level = parse_num(name, value)?,
                "print_level_random" => opts.random.print_level = parse_num(name, value)?,
                "derivative_test_fixed" => opts.fixed.derivative_test = value.to_string(),
                "derivative_test_random" => opts.random.derivative_test = value.to_string(),
                "accept_after_max_steps_fixed" => {
                    opts.fixed.accept_after_max_steps = parse_num(name, value)?;
                }
                "accept_after_max_steps_random" => {
                    opts.random.accept_after_max_steps = parse_num(name, value)?;
                }
                "method_random" => opts.method_random = value.to_string(),
                "bound_frac_fixed" => opts.bound_frac_fixed = parse_num(name, value)?,
                "limited_memory_max_history_fixed" => {
                    opts.limited_memory_max_history_fixed = parse_num(name, value)?;
                }
                _ => {
                    return Err(Error::Option(format!("unknown option_name {name}")));
                }
            }
        }

        // resolve the parent node, rejecting contradictory specifications
        opts.parent_node_id = match (parent_node_id, parent_node_name) {
            (Some(id), None) => id,
            (None, Some(name)) => input
                .node
                .iter()
                .find(|n| n.node_name == name)
                .map(|n| n.node_id)
                .ok_or_else(|| {
                    Error::Option(format!("parent_node_name {name} is not in the node table"))
                })?,
            (Some(id), Some(name)) => {
                let by_name = input.node.iter().find(|n| n.node_name == name);
                match by_name {
                    Some(n) if n.node_id == id => id,
                    _ => {
                        return Err(Error::Option(
                            "parent_node_id and parent_node_name contradict each other"
                                .to_string(),
                        ))
                    }
                }
            }
            (None, None) => {
                return Err(Error::Option(
                    "neither parent_node_id nor parent_node_name is set".to_string(),
                ))
            }
        };
        if opts.parent_node_id >= input.node.len() {
            return Err(Error::Option("parent_node_id is not in the node table".to_string()));
        }
        Ok(opts)
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| Error::Option(format!("cannot parse value {value} for {name}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::Option(format!(
            "value for {name} must be true or false, not {value}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::types::OptionRow;

    fn input_with_options(pairs: &[(&str, &str)]) -> DbInput {
        let mut input = crate::table::test_util::minimal_input();
        input.option = pairs
            .iter()
            .enumerate()
            .map(|(i, (name, value))| OptionRow {
                option_id: i,
                option_name: name.to_string(),
                option_value: value.to_string(),
            })
            .collect();
        input
    }

    #[test]
    fn test_defaults_and_parent() {
        let input = input_with_options(&[("parent_node_id", "0")]);
        let opts = Options::parse(&input).unwrap();
        assert_eq!(opts.parent_node_id, 0);
        assert_eq!(opts.ode_step_size, 10.0);
        assert!(opts.quasi_fixed);
        assert_eq!(opts.rate_case, RateCase::IotaPosRhoZero);
    }

    #[test]
    fn test_unknown_option_is_fatal() {
        let input = input_with_options(&[("parent_node_id", "0"), ("no_such_option", "1")]);
        assert!(Options::parse(&input).is_err());
    }

    #[test]
    fn test_contradictory_parent() {
        let input = input_with_options(&[
            ("parent_node_id", "1"),
            ("parent_node_name", "world"),
        ]);
        // node 1 is the child named "child_0", not "world"
        assert!(Options::parse(&input).is_err());
    }

    #[test]
    fn test_zero_sum_and_splits() {
        let input = input_with_options(&[
            ("parent_node_name", "world"),
            ("zero_sum_child_rate", "iota chi"),
            ("age_avg_split", "5.0 25.0"),
            ("meas_noise_effect", "add_var_scale_none"),
        ]);
        let opts = Options::parse(&input).unwrap();
        assert_eq!(opts.zero_sum_child_rate, vec![RateId::Iota, RateId::Chi]);
        assert_eq!(opts.age_avg_split, vec![5.0, 25.0]);
        assert_eq!(opts.meas_noise_effect, MeasNoiseEffect::AddVarScaleNone);
    }
}
