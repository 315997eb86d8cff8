//! Age-indexed time lines for rectangle averages
//!
//! One time line per age on the (specialized) age-average grid; each line
//! collects `{time, weight, value}` samples kept sorted by time.  The final
//! rectangle average is a trapezoidal time average per line followed by a
//! trapezoidal age average across lines, with the weight integrated the
//! same way so the result is a weighted mean.

use crate::ad::Scalar;
use crate::error::{Error, Result};
use crate::grid::near_equal;

/// One sample on a time line.
#[derive(Debug, Clone, Copy)]
pub struct TimePoint<F> {
    pub time: f64,
    pub weight: f64,
    pub value: F,
}

/// A vector of per-age time lines over a sub-range of the age-average grid.
#[derive(Debug, Clone)]
pub struct TimeLineVec<F> {
    /// The age-average grid this object refines.
    age_grid: Vec<f64>,
    /// `age_grid` with `age_lower` and `age_upper` spliced in.
    extend_grid: Vec<f64>,
    /// `extend_grid[sub_lower] == age_lower`
    sub_lower: usize,
    /// `extend_grid[sub_upper] == age_upper`
    sub_upper: usize,
    time_lower: f64,
    time_upper: f64,
    lines: Vec<Vec<TimePoint<F>>>,
}

impl<F: Scalar> TimeLineVec<F> {
    pub fn new(age_grid: Vec<f64>) -> TimeLineVec<F> {
        TimeLineVec {
            age_grid,
            extend_grid: Vec::new(),
            sub_lower: 0,
            sub_upper: 0,
            time_lower: 0.0,
            time_upper: 0.0,
            lines: Vec::new(),
        }
    }

    /// Prepare for one rectangle: splice `age_lower` and `age_upper` into
    /// the age grid and reset all time lines.
    pub fn specialize(&mut self, age_lower: f64, age_upper: f64, time_lower: f64, time_upper: f64) {
        debug_assert!(age_lower <= age_upper);
        debug_assert!(time_lower <= time_upper);

        self.extend_grid.clear();
        self.extend_grid.extend_from_slice(&self.age_grid);
        self.extend_grid.push(age_lower);
        self.extend_grid.push(age_upper);
        self.extend_grid
            .sort_by(|a, b| a.partial_cmp(b).unwrap());
        self.extend_grid.dedup_by(|a, b| near_equal(*a, *b));

        self.sub_lower = self
            .extend_grid
            .iter()
            .position(|&a| near_equal(a, age_lower))
            .expect("age_lower is in the extended grid");
        self.sub_upper = self
            .extend_grid
            .iter()
            .position(|&a| near_equal(a, age_upper))
            .expect("age_upper is in the extended grid");
        self.time_lower = time_lower;
        self.time_upper = time_upper;
        self.lines = vec![Vec::new(); self.extend_grid.len()];
    }

    pub fn extend_grid(&self) -> &[f64] {
        &self.extend_grid
    }

    pub fn sub_lower(&self) -> usize {
        self.sub_lower
    }

    pub fn sub_upper(&self) -> usize {
        self.sub_upper
    }

    /// Insert a point keeping the line's times strictly increasing; a point
    /// near-equal in time to an existing one is dropped.
    pub fn add_point(&mut self, age_index: usize, point: TimePoint<F>) {
        debug_assert!(self.sub_lower <= age_index && age_index <= self.sub_upper);
        let line = &mut self.lines[age_index];
        let mut insert_at = line.len();
        for (k, existing) in line.iter().enumerate() {
            if near_equal(existing.time, point.time) {
                return;
            }
            if point.time < existing.time {
                insert_at = k;
                break;
            }
        }
        line.insert(insert_at, point);
    }

    pub fn time_line(&self, age_index: usize) -> &[TimePoint<F>] {
        &self.lines[age_index]
    }

    /// Largest gap between adjacent times on any line in the sub-range,
    /// with the line and upper point index where it occurs.
    pub fn max_time_diff(&self) -> (f64, usize, usize) {
        let mut max_diff = 0.0;
        let mut max_age_index = self.sub_lower;
        let mut max_time_index = 0;
        for age_index in self.sub_lower..=self.sub_upper {
            let line = &self.lines[age_index];
            for k in 1..line.len() {
                let diff = line[k].time - line[k - 1].time;
                if diff > max_diff {
                    max_diff = diff;
                    max_age_index = age_index;
                    max_time_index = k;
                }
            }
        }
        (max_diff, max_age_index, max_time_index)
    }

    /// The weighted age/time average of the collected samples.
    pub fn age_time_avg(&self) -> Result<F> {
        // per-age trapezoidal time averages of weight*value and weight
        let n_age = self.sub_upper - self.sub_lower + 1;
        let mut line_wv = Vec::with_capacity(n_age);
        let mut line_w = Vec::with_capacity(n_age);
        for age_index in self.sub_lower..=self.sub_upper {
            let line = &self.lines[age_index];
            if line.is_empty() {
                return Err(Error::Optimizer(
                    "internal: empty time line in rectangle average".to_string(),
                ));
            }
            if line.len() == 1 {
                let p = &line[0];
                line_wv.push(F::from_f64(p.weight) * p.value);
                line_w.push(p.weight);
                continue;
            }
            let mut wv_sum = F::zero();
            let mut w_sum = 0.0;
            for k in 1..line.len() {
                let dt = line[k].time - line[k - 1].time;
                let wv_left = F::from_f64(line[k - 1].weight) * line[k - 1].value;
                let wv_right = F::from_f64(line[k].weight) * line[k].value;
                wv_sum += (wv_left + wv_right) * F::from_f64(dt / 2.0);
                w_sum += (line[k - 1].weight + line[k].weight) * dt / 2.0;
            }
            let total = line[line.len() - 1].time - line[0].time;
            line_wv.push(wv_sum / F::from_f64(total));
            line_w.push(w_sum / total);
        }

        // trapezoidal age average across the sub-range
        if n_age == 1 {
            return Ok(line_wv[0] / F::from_f64(line_w[0]));
        }
        let mut wv_sum = F::zero();
        let mut w_sum = 0.0;
        for i in 1..n_age {
            let da = self.extend_grid[self.sub_lower + i] - self.extend_grid[self.sub_lower + i - 1];
            wv_sum += (line_wv[i - 1] + line_wv[i]) * F::from_f64(da / 2.0);
            w_sum += (line_w[i - 1] + line_w[i]) * da / 2.0;
        }
        Ok(wv_sum / F::from_f64(w_sum))
    }
}
