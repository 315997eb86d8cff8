//! Rectangular age/time grids: smoothings, weights, and the age-average
//! grid shared by all quadratures

pub mod age_avg;
pub mod smooth;
pub mod weight;

pub use age_avg::{age_avg_grid, near_equal};
pub use smooth::SmoothGrid;
pub use weight::{grid2line, WeightGrid};
