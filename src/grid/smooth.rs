//! Smoothing grids
//!
//! A smoothing is a rectangular age/time grid where every cell carries a
//! value prior (or a constant) and forward age/time difference priors.
//! Construction validates rectangularity; interpolation to arbitrary lines
//! is bilinear with clamping at the smoothing's own boundary.

use crate::error::{Error, Result};
use crate::table::types::{PriorRow, SmoothGridRow, SmoothRow};

/// One smoothing, validated and indexed for interpolation.
///
/// Cell storage is time-major: cell `(i, j)` lives at `i * n_time + j`.
#[derive(Debug, Clone)]
pub struct SmoothGrid {
    smooth_id: usize,
    /// Age ids into the age table, strictly increasing.
    age_ids: Vec<usize>,
    /// Time ids into the time table, strictly increasing.
    time_ids: Vec<usize>,
    value_prior: Vec<Option<usize>>,
    dage_prior: Vec<Option<usize>>,
    dtime_prior: Vec<Option<usize>>,
    const_value: Vec<Option<f64>>,
    mulstd_value_prior: Option<usize>,
    mulstd_dage_prior: Option<usize>,
    mulstd_dtime_prior: Option<usize>,
    all_const_value: bool,
}

impl SmoothGrid {
    /// Build one smoothing from its table row and grid rows.
    pub fn new(
        smooth_row: &SmoothRow,
        grid_rows: &[SmoothGridRow],
        prior_table: &[PriorRow],
    ) -> Result<SmoothGrid> {
        let smooth_id = smooth_row.smooth_id;
        let rows: Vec<&SmoothGridRow> = grid_rows
            .iter()
            .filter(|r| r.smooth_id == smooth_id)
            .collect();

        // unique age and time ids, sorted; the age and time tables are
        // strictly increasing so id order is value order
        let mut age_ids: Vec<usize> = rows.iter().map(|r| r.age_id).collect();
        age_ids.sort_unstable();
        age_ids.dedup();
        let mut time_ids: Vec<usize> = rows.iter().map(|r| r.time_id).collect();
        time_ids.sort_unstable();
        time_ids.dedup();

        if age_ids.len() != smooth_row.n_age || time_ids.len() != smooth_row.n_time {
            return Err(Error::table(
                "smooth",
                smooth_id,
                format!(
                    "smooth table says n_age = {}, n_time = {} but smooth_grid has {} ages, {} times",
                    smooth_row.n_age,
                    smooth_row.n_time,
                    age_ids.len(),
                    time_ids.len()
                ),
            ));
        }
        let n_age = age_ids.len();
        let n_time = time_ids.len();

        let mut value_prior = vec![None; n_age * n_time];
        let mut dage_prior = vec![None; n_age * n_time];
        let mut dtime_prior = vec![None; n_age * n_time];
        let mut const_value = vec![None; n_age * n_time];
        let mut seen = vec![false; n_age * n_time];

        for row in &rows {
            let i = age_ids.binary_search(&row.age_id).unwrap();
            let j = time_ids.binary_search(&row.time_id).unwrap();
            let cell = i * n_time + j;
            if seen[cell] {
                return Err(Error::table(
                    "smooth_grid",
                    row.smooth_grid_id,
                    "duplicate (age_id, time_id) pair in smoothing",
                ));
            }
            seen[cell] = true;
            value_prior[cell] = row.value_prior_id;
            const_value[cell] = row.const_value;
            // differences past the last age row / time column do not exist
            dage_prior[cell] = if i + 1 < n_age { row.dage_prior_id } else { None };
            dtime_prior[cell] = if j + 1 < n_time { row.dtime_prior_id } else { None };
        }
        if let Some(missing) = seen.iter().position(|&s| !s) {
            let i = missing / n_time;
            let j = missing % n_time;
            return Err(Error::table(
                "smooth_grid",
                None,
                format!(
                    "smoothing {smooth_id} is not rectangular: no row for age_id {}, time_id {}",
                    age_ids[i], time_ids[j]
                ),
            ));
        }

        // a smoothing is all-constant when every cell is pinned, either by
        // a const_value or by a value prior with lower == upper
        let mut all_const_value = true;
        for cell in 0..n_age * n_time {
            let pinned = match (const_value[cell], value_prior[cell]) {
                (Some(_), _) => true,
                (None, Some(prior_id)) => {
                    let p = &prior_table[prior_id];
                    p.lower_bound() == p.upper_bound()
                }
                (None, None) => unreachable!("loader checks one of prior or const"),
            };
            all_const_value &= pinned;
        }

        Ok(SmoothGrid {
            smooth_id,
            age_ids,
            time_ids,
            value_prior,
            dage_prior,
            dtime_prior,
            const_value,
            mulstd_value_prior: smooth_row.mulstd_value_prior_id,
            mulstd_dage_prior: smooth_row.mulstd_dage_prior_id,
            mulstd_dtime_prior: smooth_row.mulstd_dtime_prior_id,
            all_const_value,
        })
    }

    pub fn smooth_id(&self) -> usize {
        self.smooth_id
    }

    pub fn n_age(&self) -> usize {
        self.age_ids.len()
    }

    pub fn n_time(&self) -> usize {
        self.time_ids.len()
    }

    pub fn age_id(&self, i: usize) -> usize {
        self.age_ids[i]
    }

    pub fn time_id(&self, j: usize) -> usize {
        self.time_ids[j]
    }

    pub fn age_ids(&self) -> &[usize] {
        &self.age_ids
    }

    pub fn time_ids(&self) -> &[usize] {
        &self.time_ids
    }

    pub fn value_prior_id(&self, i: usize, j: usize) -> Option<usize> {
        self.value_prior[i * self.n_time() + j]
    }

    pub fn dage_prior_id(&self, i: usize, j: usize) -> Option<usize> {
        self.dage_prior[i * self.n_time() + j]
    }

    pub fn dtime_prior_id(&self, i: usize, j: usize) -> Option<usize> {
        self.dtime_prior[i * self.n_time() + j]
    }

    pub fn const_value(&self, i: usize, j: usize) -> Option<f64> {
        self.const_value[i * self.n_time() + j]
    }

    pub fn mulstd_value_prior(&self) -> Option<usize> {
        self.mulstd_value_prior
    }

    pub fn mulstd_dage_prior(&self) -> Option<usize> {
        self.mulstd_dage_prior
    }

    pub fn mulstd_dtime_prior(&self) -> Option<usize> {
        self.mulstd_dtime_prior
    }

    /// True when every cell value is effectively a constant.
    pub fn all_const_value(&self) -> bool {
        self.all_const_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prior(prior_id: usize, lower: Option<f64>, upper: Option<f64>) -> PriorRow {
        PriorRow {
            prior_id,
            prior_name: format!("p{prior_id}"),
            density_id: 1,
            lower,
            upper,
            mean: lower.unwrap_or(0.0),
            std: Some(1.0),
            eta: None,
            nu: None,
        }
    }

    fn smooth_row(n_age: usize, n_time: usize) -> SmoothRow {
        SmoothRow {
            smooth_id: 0,
            smooth_name: "s".to_string(),
            n_age,
            n_time,
            mulstd_value_prior_id: None,
            mulstd_dage_prior_id: None,
            mulstd_dtime_prior_id: None,
        }
    }

    fn grid_row(id: usize, age_id: usize, time_id: usize) -> SmoothGridRow {
        SmoothGridRow {
            smooth_grid_id: id,
            smooth_id: 0,
            age_id,
            time_id,
            value_prior_id: Some(0),
            dage_prior_id: Some(1),
            dtime_prior_id: Some(1),
            const_value: None,
        }
    }

    #[test]
    fn test_rectangular_grid() {
        let priors = vec![prior(0, Some(0.0), None), prior(1, None, None)];
        let rows = vec![
            grid_row(0, 0, 0),
            grid_row(1, 0, 1),
            grid_row(2, 2, 0),
            grid_row(3, 2, 1),
        ];
        let grid = SmoothGrid::new(&smooth_row(2, 2), &rows, &priors).unwrap();
        assert_eq!(grid.n_age(), 2);
        assert_eq!(grid.n_time(), 2);
        assert_eq!(grid.age_ids(), &[0, 2]);
        // last age row and last time column have no difference priors
        assert_eq!(grid.dage_prior_id(0, 0), Some(1));
        assert_eq!(grid.dage_prior_id(1, 0), None);
        assert_eq!(grid.dtime_prior_id(0, 1), None);
        assert!(!grid.all_const_value());
    }

    #[test]
    fn test_missing_cell_is_fatal() {
        let priors = vec![prior(0, Some(0.0), None), prior(1, None, None)];
        let rows = vec![grid_row(0, 0, 0), grid_row(1, 0, 1), grid_row(2, 1, 0)];
        assert!(SmoothGrid::new(&smooth_row(2, 2), &rows, &priors).is_err());
    }

    #[test]
    fn test_duplicate_cell_is_fatal() {
        let priors = vec![prior(0, Some(0.0), None), prior(1, None, None)];
        let rows = vec![grid_row(0, 0, 0), grid_row(1, 0, 0)];
        assert!(SmoothGrid::new(&smooth_row(1, 1), &rows, &priors).is_err());
    }

    #[test]
    fn test_size_mismatch_is_fatal() {
        let priors = vec![prior(0, Some(0.0), None), prior(1, None, None)];
        let rows = vec![grid_row(0, 0, 0), grid_row(1, 1, 0)];
        assert!(SmoothGrid::new(&smooth_row(1, 2), &rows, &priors).is_err());
    }

    #[test]
    fn test_all_const_value() {
        let priors = vec![prior(0, Some(0.2), Some(0.2)), prior(1, None, None)];
        let mut row = grid_row(0, 0, 0);
        row.const_value = Some(0.1);
        row.value_prior_id = None;
        let grid = SmoothGrid::new(&smooth_row(1, 1), &[row], &priors).unwrap();
        assert!(grid.all_const_value());
        assert_eq!(grid.const_value(0, 0), Some(0.1));

        // lower == upper also pins the cell
        let grid = SmoothGrid::new(&smooth_row(1, 1), &[grid_row(0, 0, 0)], &priors).unwrap();
        assert!(grid.all_const_value());
    }
}
