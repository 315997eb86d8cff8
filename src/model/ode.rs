//! Cohort integration of the two-compartment disease ODE
//!
//! Along a cohort (constant time minus age) the susceptible/with-condition
//! pair satisfies `y' = A(a) y` with
//!
//! ```text
//!     A = [ -(iota + omega)          rho          ]
//!         [      iota          -(rho + chi + omega) ]
//! ```
//!
//! Rates are piecewise linear in age; over one step the system is advanced
//! with the closed-form matrix exponential of the step-average coefficient
//! matrix.  Both eigenvalues are real here because the off-diagonal product
//! `rho * iota` is non-negative.  The `rate_case` pins which off-diagonal
//! entries are structurally zero and selects the triangular branches.

use crate::ad::Scalar;
use crate::table::option::RateCase;

/// Relative tolerance below which two eigenvalues are treated as equal and
/// the confluent limit formula is used.
const EIGEN_NEAR_EQUAL: f64 = 1e-7;

/// Advance `(s, c)` by `step` under the constant matrix
/// `[[a11, a12], [a21, a22]]`.
fn expm_step<F: Scalar>(step: f64, a11: F, a12: F, a21: F, a22: F, s: F, c: F) -> (F, F) {
    let t = F::from_f64(step);
    let half = F::from_f64(0.5);
    let a12_zero = a12.value() == 0.0;
    let a21_zero = a21.value() == 0.0;

    if a12_zero && a21_zero {
        // decoupled compartments
        return ((a11 * t).exp() * s, (a22 * t).exp() * c);
    }

    let near_equal = {
        let scale = a11.value().abs().max(a22.value().abs()).max(1.0);
        (a11.value() - a22.value()).abs() <= EIGEN_NEAR_EQUAL * scale
    };

    if a12_zero {
        // lower triangular: s decouples, c picks up a21 * s
        let e1 = (a11 * t).exp();
        let e2 = (a22 * t).exp();
        let coupling = if near_equal {
            a21 * t * e1
        } else {
            a21 * (e1 - e2) / (a11 - a22)
        };
        return (e1 * s, e2 * c + coupling * s);
    }
    if a21_zero {
        // upper triangular: c decouples, s picks up a12 * c
        let e1 = (a11 * t).exp();
        let e2 = (a22 * t).exp();
        let coupling = if near_equal {
            a12 * t * e2
        } else {
            a12 * (e1 - e2) / (a11 - a22)
        };
        return (e1 * s + coupling * c, e2 * c);
    }

    // full 2x2: spectral decomposition with real eigenvalues
    let mean = (a11 + a22) * half;
    let disc = ((a11 - a22) * half) * ((a11 - a22) * half) + a12 * a21;
    let root = disc.max(F::zero()).sqrt();
    let lambda_plus = mean + root;
    let lambda_minus = mean - root;

    let scale = lambda_plus.value().abs().max(lambda_minus.value().abs()).max(1.0);
    if (lambda_plus.value() - lambda_minus.value()).abs() <= EIGEN_NEAR_EQUAL * scale {
        // confluent limit: exp(A t) = e^{lambda t} (I + (A - lambda I) t)
        let e = (mean * t).exp();
        let s_out = e * (s + ((a11 - mean) * s + a12 * c) * t);
        let c_out = e * (c + (a21 * s + (a22 - mean) * c) * t);
        return (s_out, c_out);
    }

    // exp(A t) = (e+ (A - l- I) - e- (A - l+ I)) / (l+ - l-)
    let e_plus = (lambda_plus * t).exp();
    let e_minus = (lambda_minus * t).exp();
    let denom = lambda_plus - lambda_minus;
    let w_s = (a11 - lambda_minus) * s + a12 * c;
    let w_c = a21 * s + (a22 - lambda_minus) * c;
    let v_s = (a11 - lambda_plus) * s + a12 * c;
    let v_c = a21 * s + (a22 - lambda_plus) * c;
    let s_out = (e_plus * w_s - e_minus * v_s) / denom;
    let c_out = (e_plus * w_c - e_minus * v_c) / denom;
    (s_out, c_out)
}

/// Solve the compartment ODE along one cohort.
///
/// `cohort_age` must be strictly increasing and start at the minimum age;
/// the rate slices give the adjusted rates at each cohort age.  Returns the
/// susceptible and with-condition fractions at every cohort age.
pub fn cohort_ode<F: Scalar>(
    rate_case: RateCase,
    cohort_age: &[f64],
    pini: F,
    iota: &[F],
    rho: &[F],
    chi: &[F],
    omega: &[F],
) -> (Vec<F>, Vec<F>) {
    let n = cohort_age.len();
    let mut s_out = Vec::with_capacity(n);
    let mut c_out = Vec::with_capacity(n);

    let mut s = F::one() - pini;
    let mut c = pini;
    s_out.push(s);
    c_out.push(c);

    let half = F::from_f64(0.5);
    for k in 1..n {
        let step = cohort_age[k] - cohort_age[k - 1];
        // rates are linear in age over the step; the step average is the
        // midpoint value
        let iota_mid = (iota[k - 1] + iota[k]) * half;
        let rho_mid = (rho[k - 1] + rho[k]) * half;
        let chi_mid = (chi[k - 1] + chi[k]) * half;
        let omega_mid = (omega[k - 1] + omega[k]) * half;

        // rate_case pins structurally-zero entries so triangular branches
        // are taken even when adjusted values carry derivative information
        let a21 = if rate_case.iota_zero() { F::zero() } else { iota_mid };
        let a12 = if rate_case.rho_zero() { F::zero() } else { rho_mid };
        let a11 = -(iota_mid + omega_mid);
        let a22 = -(rho_mid + chi_mid + omega_mid);

        let (s_next, c_next) = expm_step(step, a11, a12, a21, a22, s, c);
        s = s_next;
        c = c_next;
        s_out.push(s);
        c_out.push(c);
    }
    (s_out, c_out)
}
