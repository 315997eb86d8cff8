//! Box-constrained smooth optimization
//!
//! A projected quasi-Newton (BFGS) solver with an optional exact-Hessian
//! Newton mode, plus an augmented-Lagrangian outer loop for the linear
//! difference constraints.  Recoverable numerical failures inside the
//! objective reject the trial step and shorten the line search instead of
//! aborting the fit.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::error::Result;

/// Objective callbacks.  `hessian` switches the step computation from BFGS
/// to regularized Newton.
pub struct BoxNlp<'f> {
    pub value: Box<dyn FnMut(&[f64]) -> Result<f64> + 'f>,
    pub gradient: Box<dyn FnMut(&[f64]) -> Result<Vec<f64>> + 'f>,
    pub hessian: Option<Box<dyn FnMut(&[f64]) -> Result<DMatrix<f64>> + 'f>>,
}

/// One linear constraint `x[plus] - x[minus] in [lower, upper]`.
#[derive(Debug, Clone, Copy)]
pub struct LinearConstraint {
    pub plus: usize,
    pub minus: usize,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    pub tolerance: f64,
    pub max_iter: usize,
    pub print_level: i32,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        OptimizeOptions {
            tolerance: 1e-8,
            max_iter: 100,
            print_level: 0,
        }
    }
}

/// One line of the iteration trace.
#[derive(Debug, Clone, Copy)]
pub struct TracePoint {
    pub iter: usize,
    pub obj_value: f64,
    /// Primal infeasibility: largest difference-constraint violation.
    pub inf_pr: f64,
    /// Dual infeasibility: projected gradient norm.
    pub inf_du: f64,
    pub step_size: f64,
}

#[derive(Debug, Clone)]
pub struct OptimizeResult {
    pub x: Vec<f64>,
    pub objective: f64,
    /// Gradient value at active box bounds, zero elsewhere.
    pub lagrange_box: Vec<f64>,
    /// Augmented-Lagrangian multiplier estimate per linear constraint.
    pub lagrange_constraint: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub trace: Vec<TracePoint>,
}

fn clip(x: &mut [f64], lower: &[f64], upper: &[f64]) {
    for j in 0..x.len() {
        x[j] = x[j].max(lower[j]).min(upper[j]);
    }
}

/// Projected gradient: `x - clip(x - g)`; zero iff KKT for the box holds.
fn projected_gradient(x: &[f64], g: &[f64], lower: &[f64], upper: &[f64]) -> Vec<f64> {
    let mut pg = Vec::with_capacity(x.len());
    for j in 0..x.len() {
        let step = (x[j] - g[j]).max(lower[j]).min(upper[j]);
        pg.push(x[j] - step);
    }
    pg
}

fn inf_norm(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, &x| m.max(x.abs()))
}

/// Signed violation of one constraint at `x` (zero when satisfied).
fn violation(c: &LinearConstraint, x: &[f64]) -> f64 {
    let g = x[c.plus] - x[c.minus];
    if g < c.lower {
        g - c.lower
    } else if g > c.upper {
        g - c.upper
    } else {
        0.0
    }
}

/// Minimize subject to box bounds and linear difference constraints.
pub fn optimize_box(
    nlp: &mut BoxNlp,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    constraints: &[LinearConstraint],
    options: &OptimizeOptions,
) -> Result<OptimizeResult> {
    let n = x0.len();
    let mut x = x0.to_vec();
    clip(&mut x, lower, upper);

    let mut lambda = vec![0.0; constraints.len()];
    let mut rho = 10.0;
    let n_outer = if constraints.is_empty() { 1 } else { 25 };

    let mut result = OptimizeResult {
        x: x.clone(),
        objective: f64::INFINITY,
        lagrange_box: vec![0.0; n],
        lagrange_constraint: vec![0.0; constraints.len()],
        iterations: 0,
        converged: false,
        trace: Vec::new(),
    };

    let mut previous_violation = f64::INFINITY;
    for outer in 0..n_outer {
        let inner = solve_inner(
            nlp,
            &mut x,
            lower,
            upper,
            constraints,
            &lambda,
            rho,
            options,
            &mut result.trace,
        )?;
        result.objective = inner.0;
        result.iterations += inner.1;
        result.converged = inner.2;

        if constraints.is_empty() {
            break;
        }
        // multiplier update and penalty escalation
        let mut max_violation = 0.0_f64;
        for (k, c) in constraints.iter().enumerate() {
            let v = violation(c, &x);
            lambda[k] += rho * v;
            max_violation = max_violation.max(v.abs());
        }
        let scale = 1.0_f64.max(inf_norm(&x));
        if max_violation <= 1e-10 * scale {
            break;
        }
        if max_violation > 0.25 * previous_violation {
            rho *= 10.0;
        }
        previous_violation = max_violation;
        debug!(
            "augmented lagrangian outer {outer}: violation {max_violation:.3e}, rho {rho:.1e}"
        );
    }

    // box multipliers from the gradient of the plain objective
    let g = (nlp.gradient)(&x)?;
    for j in 0..n {
        let at_lower = x[j] - lower[j] <= 1e-10 * (1.0 + lower[j].abs());
        let at_upper = upper[j] - x[j] <= 1e-10 * (1.0 + upper[j].abs());
        if lower[j] < upper[j] && (at_lower || at_upper) {
            result.lagrange_box[j] = g[j];
        }
    }
    result.lagrange_constraint = lambda;
    result.x = x;
    Ok(result)
}

/// One augmented-Lagrangian subproblem: minimize
/// `f(x) + sum_k lambda_k v_k(x) + rho/2 v_k(x)^2` over the box.
#[allow(clippy::too_many_arguments)]
fn solve_inner(
    nlp: &mut BoxNlp,
    x: &mut Vec<f64>,
    lower: &[f64],
    upper: &[f64],
    constraints: &[LinearConstraint],
    lambda: &[f64],
    rho: f64,
    options: &OptimizeOptions,
    trace: &mut Vec<TracePoint>,
) -> Result<(f64, usize, bool)> {
    let n = x.len();

    let aug_value = |nlp: &mut BoxNlp, x: &[f64]| -> Result<f64> {
        let mut f = (nlp.value)(x)?;
        for (k, c) in constraints.iter().enumerate() {
            let v = violation(c, x);
            f += lambda[k] * v + 0.5 * rho * v * v;
        }
        Ok(f)
    };
    let aug_gradient = |nlp: &mut BoxNlp, x: &[f64]| -> Result<Vec<f64>> {
        let mut g = (nlp.gradient)(x)?;
        for (k, c) in constraints.iter().enumerate() {
            let v = violation(c, x);
            if v != 0.0 || lambda[k] != 0.0 {
                // d v / d x is +1 on plus, -1 on minus while violated;
                // the multiplier term keeps pulling once active
                let w = lambda[k] + rho * v;
                if v != 0.0 {
                    g[c.plus] += w;
                    g[c.minus] -= w;
                } else if lambda[k] != 0.0 {
                    g[c.plus] += lambda[k];
                    g[c.minus] -= lambda[k];
                }
            }
        }
        Ok(g)
    };

    let mut f = aug_value(nlp, x)?;
    let mut g = aug_gradient(nlp, x)?;
    let mut h_inv = DMatrix::<f64>::identity(n, n);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..options.max_iter {
        let pg = projected_gradient(x, &g, lower, upper);
        let inf_du = inf_norm(&pg);
        let inf_pr = constraints
            .iter()
            .fold(0.0_f64, |m, c| m.max(violation(c, x).abs()));
        if inf_du <= options.tolerance * (1.0 + f.abs()) {
            converged = true;
            trace.push(TracePoint {
                iter,
                obj_value: f,
                inf_pr,
                inf_du,
                step_size: 0.0,
            });
            break;
        }

        // free variables: inside the box, or pushed inward by the gradient
        let free: Vec<bool> = (0..n)
            .map(|j| {
                if lower[j] >= upper[j] {
                    return false;
                }
                let at_lower = x[j] - lower[j] <= 1e-12 * (1.0 + lower[j].abs());
                let at_upper = upper[j] - x[j] <= 1e-12 * (1.0 + upper[j].abs());
                !(at_lower && g[j] > 0.0) && !(at_upper && g[j] < 0.0)
            })
            .collect();

        // search direction on the free variables
        let mut d = vec![0.0; n];
        let newton_ok = if let Some(hessian) = nlp.hessian.as_mut() {
            let mut h = hessian(x)?;
            for (k, c) in constraints.iter().enumerate() {
                let v = violation(c, x);
                if v != 0.0 || lambda[k] != 0.0 {
                    h[(c.plus, c.plus)] += rho;
                    h[(c.minus, c.minus)] += rho;
                    h[(c.plus, c.minus)] -= rho;
                    h[(c.minus, c.plus)] -= rho;
                }
            }
            newton_direction(&h, &g, &free, &mut d)
        } else {
            false
        };
        if !newton_ok {
            // BFGS direction, projected onto the free set
            let gv = DVector::from_column_slice(&g);
            let dir = -(&h_inv * gv);
            for j in 0..n {
                d[j] = if free[j] { dir[j] } else { 0.0 };
            }
            // safeguard against non-descent directions
            let slope: f64 = (0..n).map(|j| d[j] * g[j]).sum();
            if slope >= 0.0 {
                for j in 0..n {
                    d[j] = if free[j] { -g[j] } else { 0.0 };
                }
            }
        }

        // backtracking line search along the projected path; recoverable
        // numerical failures shorten the step like a rejected trial
        let slope: f64 = (0..n).map(|j| d[j] * g[j]).sum();
        let mut alpha = 1.0;
        let mut accepted = false;
        let mut x_new = x.clone();
        let mut f_new = f;
        while alpha >= 1e-12 {
            for j in 0..n {
                x_new[j] = x[j] + alpha * d[j];
            }
            clip(&mut x_new, lower, upper);
            match aug_value(nlp, &x_new) {
                Ok(candidate) if candidate <= f + 1e-4 * alpha * slope => {
                    f_new = candidate;
                    accepted = true;
                    break;
                }
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    debug!("trial step rejected: {e}");
                }
                Err(e) => return Err(e),
            }
            alpha /= 2.0;
        }
        iterations = iter + 1;
        trace.push(TracePoint {
            iter,
            obj_value: f_new,
            inf_pr,
            inf_du,
            step_size: if accepted { alpha } else { 0.0 },
        });
        if options.print_level > 0 {
            println!(
                "{iter:>5} {f_new:>14.6e} {inf_pr:>10.3e} {inf_du:>10.3e} {alpha:>9.2e}"
            );
        }
        if !accepted {
            warn!("line search failed at iteration {iter}; stopping");
            break;
        }

        let g_new = aug_gradient(nlp, &x_new)?;
        // BFGS update of the inverse Hessian approximation
        if nlp.hessian.is_none() {
            let s = DVector::from_iterator(n, (0..n).map(|j| x_new[j] - x[j]));
            let y = DVector::from_iterator(n, (0..n).map(|j| g_new[j] - g[j]));
            let sy = s.dot(&y);
            if sy > 1e-12 * s.norm() * y.norm() {
                let hy = &h_inv * &y;
                let yhy = y.dot(&hy);
                let ss = &s * s.transpose();
                let hys = &hy * s.transpose();
                h_inv = h_inv.clone() + ss * ((sy + yhy) / (sy * sy))
                    - (&hys + hys.transpose()) / sy;
            }
        }

        *x = x_new.clone();
        f = f_new;
        g = g_new;
    }

    Ok((f, iterations, converged))
}

/// Regularized Newton direction restricted to the free variables; false
/// when the reduced system cannot be factorized.
fn newton_direction(h: &DMatrix<f64>, g: &[f64], free: &[bool], d: &mut [f64]) -> bool {
    let idx: Vec<usize> = (0..g.len()).filter(|&j| free[j]).collect();
    if idx.is_empty() {
        return false;
    }
    let m = idx.len();
    let mut h_red = DMatrix::zeros(m, m);
    let mut g_red = DVector::zeros(m);
    for a in 0..m {
        g_red[a] = g[idx[a]];
        for b in 0..m {
            h_red[(a, b)] = h[(idx[a], idx[b])];
        }
    }
    // escalate Levenberg regularization until the factorization succeeds
    let mut tau = 0.0;
    let base = 1e-8 * (1.0 + h_red.diagonal().amax());
    for _ in 0..12 {
        let mut h_try = h_red.clone();
        for a in 0..m {
            h_try[(a, a)] += tau;
        }
        if let Some(chol) = h_try.cholesky() {
            let step = chol.solve(&g_red);
            for j in d.iter_mut() {
                *j = 0.0;
            }
            for a in 0..m {
                d[idx[a]] = -step[a];
            }
            return true;
        }
        tau = if tau == 0.0 { base } else { tau * 10.0 };
    }
    false
}

/// Minimize a smooth function over a box with Newton steps; thin wrapper
/// used by the inner (random effects) optimization.
pub fn optimize_newton_box(
    value: &mut dyn FnMut(&[f64]) -> Result<f64>,
    gradient: &mut dyn FnMut(&[f64]) -> Result<Vec<f64>>,
    hessian: &mut dyn FnMut(&[f64]) -> Result<DMatrix<f64>>,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    options: &OptimizeOptions,
) -> Result<OptimizeResult> {
    let mut nlp = BoxNlp {
        value: Box::new(|x| value(x)),
        gradient: Box::new(|x| gradient(x)),
        hessian: Some(Box::new(|x| hessian(x))),
    };
    optimize_box(&mut nlp, x0, lower, upper, &[], options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use approx::assert_relative_eq;

    fn quadratic(center: Vec<f64>) -> BoxNlp<'static> {
        let c = center.clone();
        let c2 = center;
        BoxNlp {
            value: Box::new(move |x| {
                Ok(x.iter().zip(&c).map(|(xi, ci)| (xi - ci).powi(2)).sum())
            }),
            gradient: Box::new(move |x| {
                Ok(x.iter().zip(&c2).map(|(xi, ci)| 2.0 * (xi - ci)).collect())
            }),
            hessian: None,
        }
    }

    #[test]
    fn test_unconstrained_quadratic() {
        let mut nlp = quadratic(vec![1.0, -2.0, 0.5]);
        let inf = f64::INFINITY;
        let result = optimize_box(
            &mut nlp,
            &[0.0, 0.0, 0.0],
            &[-inf, -inf, -inf],
            &[inf, inf, inf],
            &[],
            &OptimizeOptions::default(),
        )
        .unwrap();
        assert!(result.converged);
        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(result.x[1], -2.0, epsilon = 1e-6);
        assert_relative_eq!(result.x[2], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_active_box_bound_and_multiplier() {
        let mut nlp = quadratic(vec![2.0]);
        let result = optimize_box(
            &mut nlp,
            &[0.0],
            &[-1.0],
            &[1.0],
            &[],
            &OptimizeOptions::default(),
        )
        .unwrap();
        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-10);
        // gradient at the active upper bound is 2 (x - 2) = -2
        assert_relative_eq!(result.lagrange_box[0], -2.0, epsilon = 1e-8);
    }

    #[test]
    fn test_equality_difference_constraint() {
        // minimize (x0 - 1)^2 + (x1 - 3)^2 subject to x1 - x0 = 0;
        // the optimum is x0 = x1 = 2
        let mut nlp = quadratic(vec![1.0, 3.0]);
        let inf = f64::INFINITY;
        let constraint = LinearConstraint {
            plus: 1,
            minus: 0,
            lower: 0.0,
            upper: 0.0,
        };
        let result = optimize_box(
            &mut nlp,
            &[0.0, 0.0],
            &[-inf, -inf],
            &[inf, inf],
            &[constraint],
            &OptimizeOptions {
                tolerance: 1e-10,
                max_iter: 200,
                print_level: 0,
            },
        )
        .unwrap();
        assert_relative_eq!(result.x[0], 2.0, epsilon = 1e-8);
        assert_relative_eq!(result.x[1], 2.0, epsilon = 1e-8);
        assert!((result.x[1] - result.x[0]).abs() <= 1e-10);
        // the multiplier balances the gradient: 2 (x0 - 1) = lambda = 2
        assert_relative_eq!(result.lagrange_constraint[0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_newton_mode_on_quadratic() {
        let mut value = |x: &[f64]| -> Result<f64> {
            Ok(3.0 * (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2))
        };
        let mut gradient = |x: &[f64]| -> Result<Vec<f64>> {
            Ok(vec![6.0 * (x[0] - 1.0), 2.0 * (x[1] + 2.0)])
        };
        let mut hessian = |_x: &[f64]| -> Result<DMatrix<f64>> {
            Ok(DMatrix::from_row_slice(2, 2, &[6.0, 0.0, 0.0, 2.0]))
        };
        let inf = f64::INFINITY;
        let result = optimize_newton_box(
            &mut value,
            &mut gradient,
            &mut hessian,
            &[10.0, 10.0],
            &[-inf, -inf],
            &[inf, inf],
            &OptimizeOptions::default(),
        )
        .unwrap();
        // Newton converges in one step on a quadratic
        assert!(result.iterations <= 2);
        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(result.x[1], -2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_recoverable_failure_shortens_step() {
        // objective undefined for x > 1.5; the solver must still reach 1.0
        let mut nlp = BoxNlp {
            value: Box::new(|x: &[f64]| {
                if x[0] > 1.5 {
                    Err(Error::Numeric(crate::error::NumericContext::default()))
                } else {
                    Ok((x[0] - 1.0).powi(2))
                }
            }),
            gradient: Box::new(|x: &[f64]| Ok(vec![2.0 * (x[0] - 1.0)])),
            hessian: None,
        };
        let inf = f64::INFINITY;
        let result = optimize_box(
            &mut nlp,
            &[-4.0],
            &[-inf],
            &[inf],
            &[],
            &OptimizeOptions::default(),
        )
        .unwrap();
        assert!(result.converged);
        assert_relative_eq!(result.x[0], 1.0, epsilon = 1e-6);
    }
}
