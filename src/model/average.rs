//! Average integrand over age/time rectangles
//!
//! Rate-only integrands are averaged on a product grid.  ODE integrands are
//! sampled along cohorts through the rectangle, inserted into per-age time
//! lines, and refined by adding midpoint cohorts until the largest time gap
//! is at most `ode_step_size`.

use crate::ad::Scalar;
use crate::error::Result;
use crate::grid::near_equal;
use crate::model::adjust::AdjustedIntegrand;
use crate::model::context::ModelContext;
use crate::model::time_line::{TimeLineVec, TimePoint};

/// Description of one rectangle average.
#[derive(Debug, Clone)]
pub struct Rectangle<'r> {
    pub age_lower: f64,
    pub age_upper: f64,
    pub time_lower: f64,
    pub time_upper: f64,
    pub weight_id: Option<usize>,
    pub integrand_id: usize,
    pub child: usize,
    pub subgroup_id: usize,
    pub node_id: usize,
    pub x: &'r [f64],
}

/// Rectangle-average evaluator.
#[derive(Debug)]
pub struct AvgIntegrand<'a> {
    ctx: &'a ModelContext,
    adj: AdjustedIntegrand<'a>,
}

impl<'a> AvgIntegrand<'a> {
    pub fn new(ctx: &'a ModelContext) -> AvgIntegrand<'a> {
        AvgIntegrand {
            ctx,
            adj: AdjustedIntegrand::new(ctx),
        }
    }

    pub fn adjusted(&self) -> &AdjustedIntegrand<'a> {
        &self.adj
    }

    /// Average of the adjusted integrand over the rectangle.
    pub fn rectangle<F: Scalar>(&self, rect: &Rectangle, pack_vec: &[F]) -> Result<F> {
        let need_ode = self.ctx.integrands[rect.integrand_id].kind.needs_ode();
        let mut time_line: TimeLineVec<F> = TimeLineVec::new(self.ctx.age_avg.clone());
        time_line.specialize(
            rect.age_lower,
            rect.age_upper,
            rect.time_lower,
            rect.time_upper,
        );

        if !need_ode {
            self.product_grid_fill(rect, pack_vec, &mut time_line, false)?;
            return time_line.age_time_avg();
        }

        // cohorts through every sub-range age at time_lower
        let extend_grid = time_line.extend_grid().to_vec();
        let age_ini = extend_grid[0];
        for age_index in time_line.sub_lower()..=time_line.sub_upper() {
            let time_ini = rect.time_lower - extend_grid[age_index] + age_ini;
            self.add_cohort(rect, pack_vec, &mut time_line, time_ini)?;
        }

        let one_time = near_equal(rect.time_lower, rect.time_upper);
        if !one_time {
            // cohorts through every sub-range age at time_upper, skipping
            // those already present
            for age_index in time_line.sub_lower()..=time_line.sub_upper() {
                let line = time_line.time_line(age_index);
                let time_max = line.last().map(|p| p.time).unwrap_or(f64::NEG_INFINITY);
                if !near_equal(time_max, rect.time_upper) {
                    let time_ini = rect.time_upper - extend_grid[age_index] + age_ini;
                    self.add_cohort(rect, pack_vec, &mut time_line, time_ini)?;
                }
            }

            // refine until every adjacent time gap is within the step size
            let eps99 = 99.0 * f64::EPSILON;
            loop {
                let (max_diff, age_index, time_index) = time_line.max_time_diff();
                if max_diff <= (1.0 + eps99) * self.ctx.ode_step_size {
                    break;
                }
                let line = time_line.time_line(age_index);
                let time_mid = (line[time_index - 1].time + line[time_index].time) / 2.0;
                let time_ini = time_mid - extend_grid[age_index] + age_ini;
                self.add_cohort(rect, pack_vec, &mut time_line, time_ini)?;
            }
        }

        time_line.age_time_avg()
    }

    /// Average of the measurement noise effect over the rectangle (always
    /// the no-ODE path).
    pub fn rectangle_noise<F: Scalar>(&self, rect: &Rectangle, pack_vec: &[F]) -> Result<F> {
        let mut time_line: TimeLineVec<F> = TimeLineVec::new(self.ctx.age_avg.clone());
        time_line.specialize(
            rect.age_lower,
            rect.age_upper,
            rect.time_lower,
            rect.time_upper,
        );
        self.product_grid_fill(rect, pack_vec, &mut time_line, true)?;
        time_line.age_time_avg()
    }

    /// Evaluate over an (age x time) product grid and add every sample to
    /// the time lines.  Time spacing is at most `ode_step_size`.
    fn product_grid_fill<F: Scalar>(
        &self,
        rect: &Rectangle,
        pack_vec: &[F],
        time_line: &mut TimeLineVec<F>,
        noise_effect: bool,
    ) -> Result<()> {
        let one_time = near_equal(rect.time_lower, rect.time_upper);
        let (n_time, d_time) = if one_time {
            (1usize, 0.0)
        } else {
            let eps99 = 99.0 * f64::EPSILON;
            let n = (2.0 - eps99
                + (rect.time_upper - rect.time_lower) / self.ctx.ode_step_size)
                as usize;
            (n, (rect.time_upper - rect.time_lower) / (n - 1) as f64)
        };

        let sub_lower = time_line.sub_lower();
        let sub_upper = time_line.sub_upper();
        let n_age = sub_upper - sub_lower + 1;
        let extend_grid = time_line.extend_grid().to_vec();

        let mut line_age = Vec::with_capacity(n_age * n_time);
        let mut line_time = Vec::with_capacity(n_age * n_time);
        for i in 0..n_age {
            for j in 0..n_time {
                line_age.push(extend_grid[sub_lower + i]);
                line_time.push(rect.time_lower + j as f64 * d_time);
            }
        }

        let values = if noise_effect {
            self.adj.noise_effect_line(
                &line_age,
                &line_time,
                rect.integrand_id,
                rect.node_id,
                rect.x,
                pack_vec,
            )
        } else {
            self.adj.line(
                &line_age,
                &line_time,
                rect.integrand_id,
                rect.child,
                rect.subgroup_id,
                rect.node_id,
                rect.x,
                pack_vec,
            )?
        };
        let weight = self.ctx.weight(rect.weight_id).interpolate(
            &line_age,
            &line_time,
            &self.ctx.age,
            &self.ctx.time,
        );

        for i in 0..n_age {
            for j in 0..n_time {
                let k = i * n_time + j;
                time_line.add_point(
                    sub_lower + i,
                    TimePoint {
                        time: line_time[k],
                        weight: weight[k],
                        value: values[k],
                    },
                );
            }
        }
        Ok(())
    }

    /// Evaluate one cohort starting at `(age_min, time_ini)` and insert its
    /// samples that land inside the rectangle.
    fn add_cohort<F: Scalar>(
        &self,
        rect: &Rectangle,
        pack_vec: &[F],
        time_line: &mut TimeLineVec<F>,
        time_ini: f64,
    ) -> Result<()> {
        let eps99 = 99.0 * f64::EPSILON;
        let extend_grid = time_line.extend_grid().to_vec();
        let sub_lower = time_line.sub_lower();
        let sub_upper = time_line.sub_upper();
        let age_ini = extend_grid[0];

        // last cohort point with time <= time_upper (and age <= age_upper)
        let mut last = sub_upper;
        while time_ini + extend_grid[last] - age_ini > (1.0 + eps99) * rect.time_upper {
            debug_assert!(sub_lower < last, "cohort does not intersect rectangle");
            last -= 1;
        }
        let n_line = last + 1;

        let mut line_age = Vec::with_capacity(n_line);
        let mut line_time = Vec::with_capacity(n_line);
        for k in 0..n_line {
            line_age.push(extend_grid[k]);
            line_time.push(time_ini + extend_grid[k] - age_ini);
        }

        let values = self.adj.line(
            &line_age,
            &line_time,
            rect.integrand_id,
            rect.child,
            rect.subgroup_id,
            rect.node_id,
            rect.x,
            pack_vec,
        )?;
        let weight = self.ctx.weight(rect.weight_id).interpolate(
            &line_age,
            &line_time,
            &self.ctx.age,
            &self.ctx.time,
        );

        // first cohort point inside the rectangle
        let mut first = sub_lower;
        while line_time[first] < (1.0 - eps99) * rect.time_lower {
            debug_assert!(first < sub_upper, "cohort does not intersect rectangle");
            first += 1;
        }

        for k in first..n_line {
            time_line.add_point(
                k,
                TimePoint {
                    time: line_time[k],
                    weight: weight[k],
                    value: values[k],
                },
            );
        }
        Ok(())
    }
}
