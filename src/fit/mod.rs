//! MAP fitting: objective assembly, the box-constrained solver, the fit
//! driver, and posterior sampling

pub mod driver;
pub mod objective;
pub mod optimizer;
pub mod sample;

pub use driver::{FitModel, FitSolution, PosteriorSamples};
pub use objective::{FitObjective, ZeroSumSet};
pub use optimizer::{
    optimize_box, BoxNlp, LinearConstraint, OptimizeOptions, OptimizeResult, TracePoint,
};
pub use sample::sim_random;
