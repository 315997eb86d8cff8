//! The age-average grid
//!
//! All quadratures average over ages on one shared grid: a uniform
//! refinement of [age_min, age_max] with spacing at most `ode_step_size`,
//! spliced with the user's `age_avg_split` points.

use crate::error::{Error, Result};

/// Two ages within this relative tolerance are the same grid point.
pub fn near_equal(x: f64, y: f64) -> bool {
    let scale = x.abs().max(y.abs()).max(1e-10);
    (x - y).abs() <= 1e-10 * scale
}

/// Build the age-average grid.  The result starts at `age_min`, ends at
/// `age_max`, is strictly increasing, and has gaps no larger than
/// `ode_step_size`.
pub fn age_avg_grid(ode_step_size: f64, age_avg_split: &[f64], age_table: &[f64]) -> Result<Vec<f64>> {
    let age_min = age_table[0];
    let age_max = age_table[age_table.len() - 1];

    let mut grid: Vec<f64>;
    if age_min == age_max {
        grid = vec![age_min];
    } else {
        let n_interval = ((age_max - age_min) / ode_step_size).ceil().max(1.0) as usize;
        let step = (age_max - age_min) / n_interval as f64;
        grid = (0..=n_interval).map(|i| age_min + i as f64 * step).collect();
    }

    for &split in age_avg_split {
        if split < age_min || age_max < split {
            return Err(Error::Option(format!(
                "age_avg_split value {split} is outside the age table range [{age_min}, {age_max}]"
            )));
        }
        grid.push(split);
    }
    grid.sort_by(|a, b| a.partial_cmp(b).unwrap());
    grid.dedup_by(|a, b| near_equal(*a, *b));
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_spacing() {
        let grid = age_avg_grid(10.0, &[], &[0.0, 100.0]).unwrap();
        assert_eq!(grid.len(), 11);
        assert_relative_eq!(grid[0], 0.0);
        assert_relative_eq!(grid[10], 100.0);
        for pair in grid.windows(2) {
            assert!(pair[1] - pair[0] <= 10.0 + 1e-12);
        }
    }

    #[test]
    fn test_non_divisible_step() {
        // 25 / 10 rounds up to 3 intervals
        let grid = age_avg_grid(10.0, &[], &[0.0, 25.0]).unwrap();
        assert_eq!(grid.len(), 4);
        assert_relative_eq!(grid[1], 25.0 / 3.0);
    }

    #[test]
    fn test_splits_are_spliced() {
        let grid = age_avg_grid(50.0, &[5.0, 50.0], &[0.0, 100.0]).unwrap();
        assert_eq!(grid, vec![0.0, 5.0, 50.0, 100.0]);
    }

    #[test]
    fn test_split_out_of_range_is_fatal() {
        assert!(age_avg_grid(10.0, &[150.0], &[0.0, 100.0]).is_err());
    }

    #[test]
    fn test_single_age() {
        let grid = age_avg_grid(10.0, &[], &[50.0]).unwrap();
        assert_eq!(grid, vec![50.0]);
    }
}
