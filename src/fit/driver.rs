//! MAP fit driver
//!
//! Glues the likelihood objects under the box-constrained optimizer:
//! packs box and difference constraints, applies the log scaling of fixed
//! effects, drives the outer (fixed) optimization with a nested inner
//! (random) optimization and Laplace term, and extracts the solution,
//! Lagrange multipliers, Hessians, and posterior samples.

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{Error, Result};
use crate::fit::objective::{FitObjective, ZeroSumSet};
use crate::fit::optimizer::{
    optimize_box, optimize_newton_box, BoxNlp, LinearConstraint, OptimizeOptions, OptimizeResult,
    TracePoint,
};
use crate::model::{DataModel, ModelContext, PriorModel};
use crate::pack::{DiffConstraint, DiffDirection, VarPriors};
use crate::table::option::Options;

/// Result of one MAP fit over the packed variables.
#[derive(Debug, Clone)]
pub struct FitSolution {
    pub fit_var_value: Vec<f64>,
    /// Box multipliers by variable id (zero when inactive).
    pub lagrange_value: Vec<f64>,
    /// Difference-constraint multipliers stored on the minus variable.
    pub lagrange_dage: Vec<f64>,
    pub lagrange_dtime: Vec<f64>,
    pub trace: Vec<TracePoint>,
    pub converged: bool,
}

/// Output of `sample_posterior`.
#[derive(Debug, Clone)]
pub struct PosteriorSamples {
    /// Lower-triangle triplets `(row_var_id, col_var_id, value)`.
    pub hes_fixed: Vec<(usize, usize, f64)>,
    pub hes_random: Vec<(usize, usize, f64)>,
    /// `n_sample * n_var` values, or `None` when a Hessian gate failed.
    pub samples: Option<Vec<f64>>,
    pub warning: Option<String>,
}

/// The fit driver for one model and data subset.
pub struct FitModel<'a> {
    ctx: &'a ModelContext,
    objective: FitObjective<'a>,
    options: &'a Options,
    n_var: usize,
    n_random: usize,
    start_var: Vec<f64>,
    scale_var: Vec<f64>,
    var_lower: Vec<f64>,
    var_upper: Vec<f64>,
    /// `eta` of the value prior for each fixed effect that is log-scaled.
    scale_eta: Vec<Option<f64>>,
    diff_constraints: Vec<DiffConstraint>,
}

impl<'a> FitModel<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &'a ModelContext,
        data: &'a DataModel<'a>,
        prior: &'a PriorModel<'a>,
        var_priors: &'a VarPriors,
        options: &'a Options,
        start_var: Vec<f64>,
        scale_var: Vec<f64>,
    ) -> Result<FitModel<'a>> {
        let n_var = ctx.pack.size();
        let n_random = ctx.pack.random_size();
        assert_eq!(start_var.len(), n_var);
        assert_eq!(scale_var.len(), n_var);

        let mut var_lower = Vec::with_capacity(n_var);
        let mut var_upper = Vec::with_capacity(n_var);
        for var_id in 0..n_var {
            let (lower, upper) = var_priors.var_limits(var_id, &ctx.priors);
            var_lower.push(lower);
            var_upper.push(upper);
        }

        // free (non-constant) random effects
        let random_free: Vec<usize> = (0..n_random)
            .filter(|&var_id| var_lower[var_id] < var_upper[var_id])
            .collect();

        // log scaling of fixed effects whose value prior has eta
        let mut scale_eta = vec![None; n_var - n_random];
        for var_id in n_random..n_var {
            if let Some(prior_id) = var_priors.value_prior_id(var_id) {
                let prior = &ctx.priors[prior_id];
                if let Some(eta) = prior.eta {
                    if prior.lower_bound() + eta <= 0.0 {
                        return Err(Error::table(
                            "prior",
                            prior_id,
                            "eta is not null, lower + eta <= 0, and this is a \
                             value prior for a fixed effect",
                        ));
                    }
                    scale_eta[var_id - n_random] = Some(eta);
                }
            }
        }

        // bounded difference priors become linear constraints; they are
        // only supported on fixed effects, and not on log-scaled ones
        let diff_constraints = var_priors.diff_constraints(&ctx.priors);
        for c in &diff_constraints {
            if !var_priors.fixed_effect(c.minus_var_id) {
                return Err(Error::table(
                    "prior",
                    c.prior_id,
                    "bounded difference priors on random effects are not supported",
                ));
            }
            let scaled = scale_eta[c.minus_var_id - n_random].is_some()
                || scale_eta[c.plus_var_id - n_random].is_some();
            if scaled {
                return Err(Error::table(
                    "prior",
                    c.prior_id,
                    "a bounded difference prior cannot involve a fixed effect \
                     whose value prior has a non-null eta (log scaling)",
                ));
            }
        }

        let zero_sum = zero_sum_sets(ctx, options);
        let objective = FitObjective {
            data,
            prior,
            random_free,
            zero_sum,
        };

        Ok(FitModel {
            ctx,
            objective,
            options,
            n_var,
            n_random,
            start_var,
            scale_var,
            var_lower,
            var_upper,
            scale_eta,
            diff_constraints,
        })
    }

    pub fn n_var(&self) -> usize {
        self.n_var
    }

    /// Scale one fixed effect value for the optimizer.
    fn scale_value(&self, fixed_index: usize, theta: f64) -> f64 {
        match self.scale_eta[fixed_index] {
            Some(eta) => (theta + eta).ln(),
            None => theta,
        }
    }

    /// Inverse of `scale_value`.
    fn unscale_value(&self, fixed_index: usize, xi: f64) -> f64 {
        match self.scale_eta[fixed_index] {
            Some(eta) => xi.exp() - eta,
            None => xi,
        }
    }

    /// `d theta / d xi` at the given scaled value.
    fn unscale_derivative(&self, fixed_index: usize, xi: f64) -> f64 {
        match self.scale_eta[fixed_index] {
            Some(_) => xi.exp(),
            None => 1.0,
        }
    }

    /// Optimize the free random effects in place at the fixed effects
    /// currently stored in `pack_vec`.
    pub fn optimize_random(&self, pack_vec: &mut [f64]) -> Result<()> {
        let free = &self.objective.random_free;
        if free.is_empty() {
            return Ok(());
        }
        let u0: Vec<f64> = free.iter().map(|&id| pack_vec[id]).collect();
        let lower: Vec<f64> = free.iter().map(|&id| self.var_lower[id]).collect();
        let upper: Vec<f64> = free.iter().map(|&id| self.var_upper[id]).collect();

        let base: Vec<f64> = pack_vec.to_vec();
        let with_u = |u: &[f64]| {
            let mut pack = base.clone();
            for (k, &id) in free.iter().enumerate() {
                pack[id] = u[k];
            }
            pack
        };

        let mut value = |u: &[f64]| self.objective.ran_like(&with_u(u));
        let mut gradient = |u: &[f64]| self.objective.ran_grad(&with_u(u));
        let mut hessian = |u: &[f64]| self.objective.ran_hess(&with_u(u));

        let result = optimize_newton_box(
            &mut value,
            &mut gradient,
            &mut hessian,
            &u0,
            &lower,
            &upper,
            &OptimizeOptions {
                tolerance: self.options.random.tolerance,
                max_iter: self.options.random.max_num_iter.max(0) as usize,
                print_level: self.options.random.print_level,
            },
        )?;
        for (k, &id) in free.iter().enumerate() {
            pack_vec[id] = result.x[k];
        }
        Ok(())
    }

    /// The Laplace term `0.5 log det H_uu` and the Hessian factor at the
    /// current point.  Indefinite Hessians reject the trial point.
    fn laplace_term(&self, pack_vec: &[f64]) -> Result<(f64, DMatrix<f64>)> {
        let hess = self.objective.ran_hess(pack_vec)?;
        match hess.clone().cholesky() {
            Some(chol) => {
                // 0.5 log det H = sum of log diag(L)
                let half_logdet: f64 = chol.l().diagonal().iter().map(|d| d.ln()).sum();
                Ok((half_logdet, hess))
            }
            None => Err(Error::Numeric(crate::error::NumericContext {
                integrand: "random effects Hessian (not positive definite)".to_string(),
                ..Default::default()
            })),
        }
    }

    /// Run the MAP fit.  With `random_only` the fixed effects stay at
    /// their starting values.  `warm_start` re-uses a previous fit's
    /// scaled fixed iterate.
    pub fn run_fit(&self, random_only: bool, warm_start: Option<Vec<f64>>) -> Result<FitSolution> {
        let n_random = self.n_random;
        let n_fixed = self.n_var - n_random;
        let have_random = !self.objective.random_free.is_empty();

        // starting point clipped into the box
        let mut pack = self.start_var.clone();
        for var_id in 0..self.n_var {
            pack[var_id] = pack[var_id]
                .max(self.var_lower[var_id])
                .min(self.var_upper[var_id]);
        }

        let mut trace = Vec::new();
        let mut converged = true;
        let mut lagrange_value = vec![0.0; self.n_var];
        let mut lagrange_dage = vec![0.0; self.n_var];
        let mut lagrange_dtime = vec![0.0; self.n_var];

        if !random_only && n_fixed > 0 {
            let outer = self.optimize_fixed(&mut pack, warm_start)?;
            converged = outer.converged;
            trace = outer.trace.clone();

            // box multipliers (scaled space) back onto variable ids
            for j in 0..n_fixed {
                lagrange_value[n_random + j] = outer.lagrange_box[j];
            }
            for (k, c) in self.diff_constraints.iter().enumerate() {
                let slot = match c.direction {
                    DiffDirection::Dage => &mut lagrange_dage,
                    DiffDirection::Dtime => &mut lagrange_dtime,
                };
                slot[c.minus_var_id] = outer.lagrange_constraint[k];
            }
        }

        // always finish with an inner optimization at the chosen theta
        if have_random {
            self.optimize_random(&mut pack)?;
        }

        // round off must not violate the box
        for var_id in 0..self.n_var {
            pack[var_id] = pack[var_id]
                .max(self.var_lower[var_id])
                .min(self.var_upper[var_id]);
        }

        info!("fit complete, converged = {converged}");
        Ok(FitSolution {
            fit_var_value: pack,
            lagrange_value,
            lagrange_dage,
            lagrange_dtime,
            trace,
            converged,
        })
    }

    /// Outer optimization over the scaled fixed effects; updates `pack`
    /// (both the fixed block and the matching optimal random effects).
    fn optimize_fixed(
        &self,
        pack: &mut [f64],
        warm_start: Option<Vec<f64>>,
    ) -> Result<OptimizeResult> {
        let n_random = self.n_random;
        let n_fixed = self.n_var - n_random;
        let have_random = !self.objective.random_free.is_empty();

        // scaled box and start
        let mut xi_lower = Vec::with_capacity(n_fixed);
        let mut xi_upper = Vec::with_capacity(n_fixed);
        let mut xi_start = Vec::with_capacity(n_fixed);
        for j in 0..n_fixed {
            let var_id = n_random + j;
            xi_lower.push(self.scale_value(j, self.var_lower[var_id]));
            xi_upper.push(self.scale_value(j, self.var_upper[var_id]));
            xi_start.push(self.scale_value(j, pack[var_id]));
        }
        if let Some(ws) = warm_start {
            // warm-start values are unscaled fixed effects
            if ws.len() == n_fixed {
                for j in 0..n_fixed {
                    xi_start[j] = self
                        .scale_value(j, ws[j])
                        .max(xi_lower[j])
                        .min(xi_upper[j]);
                }
            } else {
                warn!("warm start has wrong size and is ignored");
            }
        }

        // difference constraints use fixed-block indices
        let constraints: Vec<LinearConstraint> = self
            .diff_constraints
            .iter()
            .map(|c| {
                let prior = &self.ctx.priors[c.prior_id];
                LinearConstraint {
                    plus: c.plus_var_id - n_random,
                    minus: c.minus_var_id - n_random,
                    lower: prior.lower_bound(),
                    upper: prior.upper_bound(),
                }
            })
            .collect();

        // shared state between the callbacks: the pack vector with the
        // last inner-optimal random effects
        let shared = std::cell::RefCell::new(pack.to_vec());
        let fixed_var_ids: Vec<usize> = (n_random..self.n_var).collect();

        let install_theta = |xi: &[f64]| -> Vec<f64> {
            let mut current = shared.borrow().clone();
            for j in 0..n_fixed {
                current[n_random + j] = self.unscale_value(j, xi[j]);
            }
            current
        };

        let mut value = |xi: &[f64]| -> Result<f64> {
            let mut current = install_theta(xi);
            if have_random {
                self.optimize_random(&mut current)?;
            }
            let mut total =
                self.objective.fix_like(&current)? + self.objective.ran_like(&current)?;
            if have_random {
                let (half_logdet, _) = self.laplace_term(&current)?;
                total += half_logdet;
            }
            *shared.borrow_mut() = current;
            Ok(total)
        };
        let mut gradient = |xi: &[f64]| -> Result<Vec<f64>> {
            let mut current = install_theta(xi);
            if have_random {
                self.optimize_random(&mut current)?;
            }
            let mut grad = self.objective.joint_grad(&current, &fixed_var_ids)?;
            if have_random {
                let (_, hess) = self.laplace_term(&current)?;
                let hess_inv = hess
                    .cholesky()
                    .expect("laplace_term checked positive definite")
                    .inverse();
                let lap = self
                    .objective
                    .laplace_grad(&current, &fixed_var_ids, &hess_inv)?;
                for j in 0..n_fixed {
                    grad[j] += lap[j];
                }
            }
            // chain rule through the log scaling
            for j in 0..n_fixed {
                grad[j] *= self.unscale_derivative(j, xi[j]);
            }
            *shared.borrow_mut() = current;
            Ok(grad)
        };
        // full Newton mode uses the profile Hessian (Schur complement of
        // the joint Hessian, without the Laplace curvature terms)
        let mut hessian = |xi: &[f64]| -> Result<DMatrix<f64>> {
            let mut current = install_theta(xi);
            if have_random {
                self.optimize_random(&mut current)?;
            }
            let h_theta = self.profile_hessian(&current, &fixed_var_ids)?;
            let g_theta = self.objective.joint_grad(&current, &fixed_var_ids)?;
            let mut h = h_theta;
            for a in 0..n_fixed {
                let da = self.unscale_derivative(a, xi[a]);
                for b in 0..n_fixed {
                    let db = self.unscale_derivative(b, xi[b]);
                    h[(a, b)] *= da * db;
                }
                // second-derivative term of theta(xi)
                if self.scale_eta[a].is_some() {
                    h[(a, a)] += g_theta[a] * da;
                }
            }
            *shared.borrow_mut() = current;
            Ok(h)
        };

        // optional finite-difference check of the dual-number gradient
        if self.options.fixed.derivative_test != "none" {
            let g = gradient(&xi_start)?;
            for j in 0..n_fixed {
                let h = 1e-6 * (1.0 + xi_start[j].abs());
                let mut plus = xi_start.clone();
                plus[j] += h;
                let mut minus = xi_start.clone();
                minus[j] -= h;
                let fd = (value(&plus)? - value(&minus)?) / (2.0 * h);
                let scale = g[j].abs().max(fd.abs()).max(1e-8);
                if (g[j] - fd).abs() > 1e-3 * scale {
                    warn!(
                        "derivative_test: fixed effect {j}: gradient {:.6e} vs \
                         finite difference {:.6e}",
                        g[j], fd
                    );
                }
            }
        }

        let mut nlp = BoxNlp {
            value: Box::new(&mut value),
            gradient: Box::new(&mut gradient),
            hessian: if self.options.quasi_fixed {
                None
            } else {
                Some(Box::new(&mut hessian))
            },
        };
        // the objective magnitude at scale_var calibrates the convergence
        // tolerance
        let obj_scale = self
            .joint_objective(&self.scale_var)
            .map(|f| f.abs().max(1.0))
            .unwrap_or(1.0);
        let result = optimize_box(
            &mut nlp,
            &xi_start,
            &xi_lower,
            &xi_upper,
            &constraints,
            &OptimizeOptions {
                tolerance: self.options.fixed.tolerance * obj_scale,
                max_iter: self.options.fixed.max_num_iter.max(0) as usize,
                print_level: self.options.fixed.print_level,
            },
        )?;
        drop(nlp);

        debug!(
            "fixed optimization: {} iterations, objective {:.6e}",
            result.iterations, result.objective
        );

        // write the optimum (unscaled) and its random effects back
        let current = shared.into_inner();
        pack.copy_from_slice(&current);
        for j in 0..n_fixed {
            pack[n_random + j] = self.unscale_value(j, result.x[j]);
        }
        Ok(result)
    }

    /// Hessian of the profile objective with respect to the fixed effects:
    /// `H_tt - H_tu H_uu^-1 H_ut` (Laplace curvature not included).
    fn profile_hessian(&self, pack_vec: &[f64], fixed_var_ids: &[usize]) -> Result<DMatrix<f64>> {
        let h_tt = self.objective.joint_hess(pack_vec, fixed_var_ids)?;
        if self.objective.random_free.is_empty() {
            return Ok(h_tt);
        }
        let h_uu = self.objective.ran_hess(pack_vec)?;
        let h_tu = self.objective.cross_hess(pack_vec, fixed_var_ids)?;
        match h_uu.cholesky() {
            Some(chol) => {
                let solved = chol.solve(&h_tu.transpose());
                Ok(h_tt - &h_tu * solved)
            }
            None => Ok(h_tt),
        }
    }

    /// Sparse lower-triangle Hessian of the random effects objective over
    /// the variable indexing; constant random effects are implicitly zero.
    pub fn random_obj_hes(&self, pack_vec: &[f64]) -> Result<Vec<(usize, usize, f64)>> {
        if self.objective.random_free.is_empty() {
            return Ok(Vec::new());
        }
        let hess = self.objective.ran_hess(pack_vec)?;
        let free = &self.objective.random_free;
        let mut triplets = Vec::new();
        for a in 0..free.len() {
            for b in 0..=a {
                let value = hess[(a, b)];
                if value != 0.0 {
                    triplets.push((free[a], free[b], value));
                }
            }
        }
        Ok(triplets)
    }

    /// Asymptotic posterior sampling at the fitted variables.
    ///
    /// Both Hessians are always returned; samples are withheld (with a
    /// warning) when a Hessian is not positive definite or its reciprocal
    /// condition number is below `asymptotic_rcond_lower`.
    pub fn sample_posterior<R: Rng>(
        &self,
        n_sample: usize,
        fit_var_value: &[f64],
        rng: &mut R,
    ) -> Result<PosteriorSamples> {
        let n_random = self.n_random;
        let n_fixed = self.n_var - n_random;

        // scaled fixed-effect coordinates at the fit
        let xi: Vec<f64> = (0..n_fixed)
            .map(|j| self.scale_value(j, fit_var_value[n_random + j]))
            .collect();

        // fixed effects that are genuine degrees of freedom
        let free_fixed: Vec<usize> = (0..n_fixed)
            .filter(|&j| self.var_lower[n_random + j] < self.var_upper[n_random + j])
            .collect();
        let free_fixed_var_ids: Vec<usize> = free_fixed.iter().map(|&j| n_random + j).collect();

        // Hessian of the fixed-effects objective in scaled coordinates
        let mut hes_fixed_mat = self.profile_hessian(fit_var_value, &free_fixed_var_ids)?;
        let g_theta = self
            .objective
            .joint_grad(fit_var_value, &free_fixed_var_ids)?;
        for (a, &ja) in free_fixed.iter().enumerate() {
            let da = self.unscale_derivative(ja, xi[ja]);
            for (b, &jb) in free_fixed.iter().enumerate() {
                let db = self.unscale_derivative(jb, xi[jb]);
                hes_fixed_mat[(a, b)] *= da * db;
            }
            if self.scale_eta[ja].is_some() {
                hes_fixed_mat[(a, a)] += g_theta[a] * da;
            }
        }

        let mut hes_fixed = Vec::new();
        for a in 0..free_fixed_var_ids.len() {
            for b in 0..=a {
                let value = hes_fixed_mat[(a, b)];
                if value != 0.0 {
                    hes_fixed.push((free_fixed_var_ids[a], free_fixed_var_ids[b], value));
                }
            }
        }
        let hes_random = self.random_obj_hes(fit_var_value)?;
        let hes_random_mat = if self.objective.random_free.is_empty() {
            None
        } else {
            Some(self.objective.ran_hess(fit_var_value)?)
        };

        // positive-definite and conditioning gate: a Hessian that is not
        // positive definite reads as reciprocal condition zero
        let mut warning = None;
        let rcond_check = |name: &str, mat: &DMatrix<f64>| -> Option<String> {
            let eigen = mat.clone().symmetric_eigen();
            let min = eigen.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = eigen.eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
            let rcond = if max > 0.0 { (min / max).max(0.0) } else { 0.0 };
            if min <= 0.0 || rcond < self.options.asymptotic_rcond_lower {
                return Some(format!(
                    "sample asymptotic: {name} Hessian rcond = {rcond:.3e} is less than \
                     asymptotic_rcond_lower = {:.3e}{}",
                    self.options.asymptotic_rcond_lower,
                    if min <= 0.0 {
                        " (Hessian is not positive definite)"
                    } else {
                        ""
                    }
                ));
            }
            None
        };
        if !free_fixed_var_ids.is_empty() {
            warning = rcond_check("fixed", &hes_fixed_mat);
        }
        if warning.is_none() {
            if let Some(mat) = &hes_random_mat {
                warning = rcond_check("random", mat);
            }
        }
        if let Some(msg) = &warning {
            warn!("{msg}");
            return Ok(PosteriorSamples {
                hes_fixed,
                hes_random,
                samples: None,
                warning,
            });
        }

        // draws: mean + L^-T z with H = L L^T, per effect block
        let chol_fixed = (!free_fixed_var_ids.is_empty())
            .then(|| hes_fixed_mat.cholesky())
            .flatten();
        let chol_random = hes_random_mat.and_then(|m| m.cholesky());

        let mut samples = Vec::with_capacity(n_sample * self.n_var);
        for _ in 0..n_sample {
            let mut draw = fit_var_value.to_vec();

            if let Some(chol) = &chol_fixed {
                let m = free_fixed_var_ids.len();
                let z = DVector::from_iterator(m, (0..m).map(|_| rng.sample::<f64, _>(StandardNormal)));
                let step = chol.l().transpose().solve_upper_triangular(&z)
                    .unwrap_or_else(|| DVector::zeros(m));
                for (a, &j) in free_fixed.iter().enumerate() {
                    let xi_sample = xi[j] + step[a];
                    let var_id = n_random + j;
                    draw[var_id] = self
                        .unscale_value(j, xi_sample)
                        .max(self.var_lower[var_id])
                        .min(self.var_upper[var_id]);
                }
            }
            if let Some(chol) = &chol_random {
                let free = &self.objective.random_free;
                let m = free.len();
                let z = DVector::from_iterator(m, (0..m).map(|_| rng.sample::<f64, _>(StandardNormal)));
                let step = chol.l().transpose().solve_upper_triangular(&z)
                    .unwrap_or_else(|| DVector::zeros(m));
                for (k, &var_id) in free.iter().enumerate() {
                    draw[var_id] = (fit_var_value[var_id] + step[k])
                        .max(self.var_lower[var_id])
                        .min(self.var_upper[var_id]);
                }
            }
            samples.extend_from_slice(&draw);
        }

        Ok(PosteriorSamples {
            hes_fixed,
            hes_random,
            samples: Some(samples),
            warning: None,
        })
    }

    pub fn var_limits(&self) -> (&[f64], &[f64]) {
        (&self.var_lower, &self.var_upper)
    }

    /// Objective value at a point (data plus priors; no Laplace term).
    pub fn joint_objective(&self, pack_vec: &[f64]) -> Result<f64> {
        self.objective.joint(pack_vec)
    }
}

/// Sum-to-zero variable sets from the zero_sum options: one set per grid
/// cell, summing over children (child rate grids) or over subgroups
/// (subgroup covariate grids of the named groups).
fn zero_sum_sets(ctx: &ModelContext, options: &Options) -> Vec<ZeroSumSet> {
    let mut sets = Vec::new();

    for &rate in &options.zero_sum_child_rate {
        let rate_id = rate.index();
        if ctx.n_child < 2 {
            continue;
        }
        // all children must share the smoothing for cellwise sums
        let infos: Vec<_> = (0..ctx.n_child)
            .filter_map(|c| ctx.pack.node_rate_value_info(rate_id, c))
            .collect();
        if infos.len() != ctx.n_child {
            continue;
        }
        let n_var = infos[0].n_var;
        if infos.iter().any(|i| i.n_var != n_var) {
            warn!(
                "zero_sum_child_rate {}: children use different smoothing sizes, skipped",
                rate.name()
            );
            continue;
        }
        for cell in 0..n_var {
            sets.push(ZeroSumSet {
                var_ids: infos.iter().map(|i| i.offset + cell).collect(),
            });
        }
    }

    for group_name in &options.zero_sum_mulcov_group {
        let group_id = match ctx.subgroups.iter().find(|s| &s.group_name == group_name) {
            Some(s) => s.group_id,
            None => continue,
        };
        for rate_id in 0..crate::table::types::N_RATE {
            for j in 0..ctx.pack.subgroup_rate_value_n_cov(rate_id) {
                let info0 = ctx.pack.subgroup_rate_value_info(rate_id, j, 0);
                if info0.group_id != Some(group_id) {
                    continue;
                }
                let n_sub = ctx.pack.subgroup_rate_value_n_sub(rate_id, j);
                for cell in 0..info0.n_var {
                    let var_ids = (0..n_sub)
                        .map(|k| ctx.pack.subgroup_rate_value_info(rate_id, j, k).offset + cell)
                        .collect();
                    sets.push(ZeroSumSet { var_ids });
                }
            }
        }
        for integrand_id in 0..ctx.integrands.len() {
            for j in 0..ctx.pack.subgroup_meas_value_n_cov(integrand_id) {
                let info0 = ctx.pack.subgroup_meas_value_info(integrand_id, j, 0);
                if info0.group_id != Some(group_id) {
                    continue;
                }
                let n_sub = ctx.pack.subgroup_meas_value_n_sub(integrand_id, j);
                for cell in 0..info0.n_var {
                    let var_ids = (0..n_sub)
                        .map(|k| {
                            ctx.pack.subgroup_meas_value_info(integrand_id, j, k).offset + cell
                        })
                        .collect();
                    sets.push(ZeroSumSet { var_ids });
                }
            }
        }
    }
    sets
}
