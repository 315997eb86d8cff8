//! Weight grids and bilinear grid-to-line interpolation
//!
//! Weights are rectangular age/time grids like smoothings, but carry plain
//! values instead of priors.  `grid2line` is the shared bilinear
//! interpolation used for smoothing values, weight values, and per-node
//! covariate maps; it clamps outside the grid's own age/time range.

use crate::ad::Scalar;
use crate::error::{Error, Result};
use crate::table::types::{WeightGridRow, WeightRow};

/// One weight grid (time-major storage).
#[derive(Debug, Clone)]
pub struct WeightGrid {
    age_ids: Vec<usize>,
    time_ids: Vec<usize>,
    weight: Vec<f64>,
}

impl WeightGrid {
    /// The constant weighting, used when a row's weight id is null.
    pub fn constant() -> WeightGrid {
        WeightGrid {
            age_ids: vec![0],
            time_ids: vec![0],
            weight: vec![1.0],
        }
    }

    pub fn new(weight_row: &WeightRow, grid_rows: &[WeightGridRow]) -> Result<WeightGrid> {
        let weight_id = weight_row.weight_id;
        let rows: Vec<&WeightGridRow> = grid_rows
            .iter()
            .filter(|r| r.weight_id == weight_id)
            .collect();

        let mut age_ids: Vec<usize> = rows.iter().map(|r| r.age_id).collect();
        age_ids.sort_unstable();
        age_ids.dedup();
        let mut time_ids: Vec<usize> = rows.iter().map(|r| r.time_id).collect();
        time_ids.sort_unstable();
        time_ids.dedup();

        if age_ids.len() != weight_row.n_age || time_ids.len() != weight_row.n_time {
            return Err(Error::table(
                "weight",
                weight_id,
                "n_age or n_time does not match the weight_grid rows",
            ));
        }
        let n_time = time_ids.len();
        let mut weight = vec![f64::NAN; age_ids.len() * n_time];
        for row in &rows {
            let i = age_ids.binary_search(&row.age_id).unwrap();
            let j = time_ids.binary_search(&row.time_id).unwrap();
            let cell = i * n_time + j;
            if !weight[cell].is_nan() {
                return Err(Error::table(
                    "weight_grid",
                    row.weight_grid_id,
                    "duplicate (age_id, time_id) pair in weight grid",
                ));
            }
            if row.weight <= 0.0 {
                return Err(Error::table(
                    "weight_grid",
                    row.weight_grid_id,
                    "weight must be positive",
                ));
            }
            weight[cell] = row.weight;
        }
        if weight.iter().any(|w| w.is_nan()) {
            return Err(Error::table(
                "weight_grid",
                None,
                format!("weight grid {weight_id} is not rectangular"),
            ));
        }
        Ok(WeightGrid {
            age_ids,
            time_ids,
            weight,
        })
    }

    pub fn age_ids(&self) -> &[usize] {
        &self.age_ids
    }

    pub fn time_ids(&self) -> &[usize] {
        &self.time_ids
    }

    pub fn values(&self) -> &[f64] {
        &self.weight
    }

    /// Interpolate this weight grid onto a line of (age, time) points.
    pub fn interpolate(
        &self,
        line_age: &[f64],
        line_time: &[f64],
        age_table: &[f64],
        time_table: &[f64],
    ) -> Vec<f64> {
        grid2line(
            line_age,
            line_time,
            age_table,
            time_table,
            &self.age_ids,
            &self.time_ids,
            &self.weight,
        )
    }
}

/// Bilinear interpolation of a time-major rectangular grid onto a line of
/// (age, time) points, clamping at the grid's own boundary.
///
/// `grid_value[i * time_ids.len() + j]` is the value at
/// `(age_table[age_ids[i]], time_table[time_ids[j]])`.
pub fn grid2line<F: Scalar>(
    line_age: &[f64],
    line_time: &[f64],
    age_table: &[f64],
    time_table: &[f64],
    age_ids: &[usize],
    time_ids: &[usize],
    grid_value: &[F],
) -> Vec<F> {
    assert_eq!(line_age.len(), line_time.len());
    assert_eq!(grid_value.len(), age_ids.len() * time_ids.len());
    let n_time = time_ids.len();

    let mut result = Vec::with_capacity(line_age.len());
    for (&age, &time) in line_age.iter().zip(line_time.iter()) {
        let (ia, fa) = bracket(age, age_ids, age_table);
        let (it, ft) = bracket(time, time_ids, time_table);
        let v00 = grid_value[ia * n_time + it];
        let v01 = grid_value[ia * n_time + (it + 1).min(n_time - 1)];
        let v10 = grid_value[(ia + 1).min(age_ids.len() - 1) * n_time + it];
        let v11 =
            grid_value[(ia + 1).min(age_ids.len() - 1) * n_time + (it + 1).min(n_time - 1)];
        let fa = F::from_f64(fa);
        let ft = F::from_f64(ft);
        let one = F::one();
        let value = (one - fa) * (one - ft) * v00
            + (one - fa) * ft * v01
            + fa * (one - ft) * v10
            + fa * ft * v11;
        result.push(value);
    }
    result
}

/// Lower grid index and interpolation fraction for one coordinate, clamped
/// to the grid range.
fn bracket(x: f64, ids: &[usize], table: &[f64]) -> (usize, f64) {
    let n = ids.len();
    if n == 1 || x <= table[ids[0]] {
        return (0, 0.0);
    }
    if x >= table[ids[n - 1]] {
        return (n - 2, 1.0);
    }
    let mut i = 0;
    while table[ids[i + 1]] < x {
        i += 1;
    }
    let left = table[ids[i]];
    let right = table[ids[i + 1]];
    (i, (x - left) / (right - left))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bilinear_interior_and_clamp() {
        // grid over ages {0, 100} x times {1990, 2010}
        let age_table = vec![0.0, 100.0];
        let time_table = vec![1990.0, 2010.0];
        let age_ids = vec![0, 1];
        let time_ids = vec![0, 1];
        // values 1, 2 / 3, 4 (time-major)
        let values = vec![1.0, 2.0, 3.0, 4.0];

        let line_age = vec![50.0, 0.0, 100.0, -10.0, 200.0];
        let line_time = vec![2000.0, 1990.0, 2010.0, 1980.0, 2050.0];
        let out = grid2line(
            &line_age, &line_time, &age_table, &time_table, &age_ids, &time_ids, &values,
        );
        assert_relative_eq!(out[0], 2.5); // center
        assert_relative_eq!(out[1], 1.0); // corner
        assert_relative_eq!(out[2], 4.0); // opposite corner
        assert_relative_eq!(out[3], 1.0); // clamped below in both
        assert_relative_eq!(out[4], 4.0); // clamped above in both
    }

    #[test]
    fn test_single_point_grid_is_constant() {
        let out = grid2line(
            &[0.0, 37.5],
            &[1995.0, 2002.0],
            &[0.0, 100.0],
            &[1990.0, 2010.0],
            &[1],
            &[0],
            &[7.0],
        );
        assert_eq!(out, vec![7.0, 7.0]);
    }

    #[test]
    fn test_weight_grid_validation() {
        let wrow = WeightRow {
            weight_id: 0,
            weight_name: "w".to_string(),
            n_age: 1,
            n_time: 2,
        };
        let grid = |id, time_id, weight| WeightGridRow {
            weight_grid_id: id,
            weight_id: 0,
            age_id: 0,
            time_id,
            weight,
        };
        let ok = WeightGrid::new(&wrow, &[grid(0, 0, 1.0), grid(1, 1, 2.0)]).unwrap();
        assert_eq!(ok.values(), &[1.0, 2.0]);
        assert!(WeightGrid::new(&wrow, &[grid(0, 0, 1.0)]).is_err());
        assert!(WeightGrid::new(&wrow, &[grid(0, 0, 1.0), grid(1, 1, -1.0)]).is_err());
    }
}
