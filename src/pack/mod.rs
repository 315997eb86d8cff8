//! Packed variable vector: layout and per-variable prior lookup

pub mod info;
pub mod prior;

pub use info::{PackInfo, SubvecInfo};
pub use prior::{DiffConstraint, DiffDirection, VarPriors};
