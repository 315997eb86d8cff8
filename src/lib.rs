//! epimod - Age-time disease rate estimation
//!
//! This library estimates age- and time-varying disease rates (incidence,
//! remission, excess and other-cause mortality, initial prevalence) for a
//! parent population and its children, from heterogeneous integrand
//! measurements that are nonlinear functionals of the rates.  Estimation
//! is a nonlinear mixed-effects maximum-a-posteriori problem with
//! Laplace-approximated random effects.
//!
//! The crate provides:
//! - The table layer: a directory-of-CSV store with typed rows
//! - Rectangular age/time grids with priors (smoothings) and weights
//! - The packed variable vector and its per-variable prior index
//! - The numerical model: cohort ODE, adjusted integrands, rectangle
//!   averages, data and prior likelihoods with exact dual-number
//!   derivatives
//! - The fit driver: box and difference constraints, nested fixed/random
//!   optimization, Hessians, and posterior sampling
//! - The command layer driven by the `epimod` binary

pub mod ad;
pub mod cmd;
pub mod error;
pub mod fit;
pub mod grid;
pub mod model;
pub mod pack;
pub mod table;

// Re-export commonly used types
pub use error::{Error, Result};
pub use fit::{FitModel, FitSolution};
pub use model::{AvgIntegrand, DataModel, ModelContext, PriorModel};
pub use pack::{PackInfo, VarPriors};
pub use table::{Database, DbInput, Options};
