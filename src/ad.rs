//! Forward-mode automatic differentiation scalar
//!
//! Every numeric kernel in the model layer is generic over [`Scalar`], with
//! instantiations for plain `f64` and for [`Dual`].  Duals nest:
//! `Dual<f64>` carries one exact first derivative, `Dual<Dual<f64>>` one
//! exact second derivative, and a third level supplies the mixed third
//! derivatives needed by the Laplace log-determinant gradient.

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// The closed set of operations the numeric kernels require.
///
/// Ordering and equality are defined on the primal value so that branch
/// decisions (clamping, censoring, near-equal eigenvalues) agree between the
/// `f64` and dual evaluations of the same expression.
pub trait Scalar:
    Copy
    + Clone
    + Debug
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
{
    fn from_f64(v: f64) -> Self;
    /// Primal value, recursing through all dual layers.
    fn value(&self) -> f64;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn abs(self) -> Self;
    fn erf(self) -> Self;
    fn is_finite(&self) -> bool;

    fn zero() -> Self {
        Self::from_f64(0.0)
    }
    fn one() -> Self {
        Self::from_f64(1.0)
    }
    /// Selects by primal value, like `f64::max`.
    fn max(self, other: Self) -> Self {
        if self.value() >= other.value() {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.value() <= other.value() {
            self
        } else {
            other
        }
    }
}

impl Scalar for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }
    fn value(&self) -> f64 {
        *self
    }
    fn exp(self) -> Self {
        f64::exp(self)
    }
    fn ln(self) -> Self {
        f64::ln(self)
    }
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    fn abs(self) -> Self {
        f64::abs(self)
    }
    fn erf(self) -> Self {
        statrs::function::erf::erf(self)
    }
    fn is_finite(&self) -> bool {
        f64::is_finite(*self)
    }
}

/// A dual number `val + dv * epsilon` over any scalar base type.
#[derive(Debug, Clone, Copy)]
pub struct Dual<T> {
    pub val: T,
    pub dv: T,
}

impl<T: Scalar> Dual<T> {
    pub fn new(val: T, dv: T) -> Self {
        Dual { val, dv }
    }

    /// A constant: derivative zero.
    pub fn constant(v: T) -> Self {
        Dual {
            val: v,
            dv: T::zero(),
        }
    }

    /// The variable of differentiation: derivative one.
    pub fn variable(v: T) -> Self {
        Dual {
            val: v,
            dv: T::one(),
        }
    }
}

impl<T: Scalar> PartialEq for Dual<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl<T: Scalar> PartialOrd for Dual<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.value().partial_cmp(&other.value())
    }
}

impl<T: Scalar> Add for Dual<T> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Dual::new(self.val + rhs.val, self.dv + rhs.dv)
    }
}

impl<T: Scalar> Sub for Dual<T> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Dual::new(self.val - rhs.val, self.dv - rhs.dv)
    }
}

impl<T: Scalar> Mul for Dual<T> {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Dual::new(
            self.val * rhs.val,
            self.val * rhs.dv + self.dv * rhs.val,
        )
    }
}

impl<T: Scalar> Div for Dual<T> {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Dual::new(
            self.val / rhs.val,
            (self.dv * rhs.val - self.val * rhs.dv) / (rhs.val * rhs.val),
        )
    }
}

impl<T: Scalar> Neg for Dual<T> {
    type Output = Self;
    fn neg(self) -> Self {
        Dual::new(-self.val, -self.dv)
    }
}

impl<T: Scalar> AddAssign for Dual<T> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl<T: Scalar> SubAssign for Dual<T> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl<T: Scalar> MulAssign for Dual<T> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}
impl<T: Scalar> DivAssign for Dual<T> {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl<T: Scalar> Scalar for Dual<T> {
    fn from_f64(v: f64) -> Self {
        Dual::constant(T::from_f64(v))
    }

    fn value(&self) -> f64 {
        self.val.value()
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        Dual::new(e, e * self.dv)
    }

    fn ln(self) -> Self {
        Dual::new(self.val.ln(), self.dv / self.val)
    }

    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        Dual::new(s, self.dv / (T::from_f64(2.0) * s))
    }

    fn abs(self) -> Self {
        if self.val.value() < 0.0 {
            -self
        } else {
            self
        }
    }

    fn erf(self) -> Self {
        // d/dx erf(x) = 2/sqrt(pi) * exp(-x^2)
        let d = T::from_f64(std::f64::consts::FRAC_2_SQRT_PI) * (-(self.val * self.val)).exp();
        Dual::new(self.val.erf(), d * self.dv)
    }

    fn is_finite(&self) -> bool {
        self.val.is_finite() && self.dv.is_finite()
    }
}

/// Second-order dual: one Hessian entry per evaluation.
pub type Dual2 = Dual<Dual<f64>>;

/// Third-order dual, used for derivatives of Hessian entries.
pub type Dual3 = Dual<Dual<Dual<f64>>>;

/// Seed a `Dual2` as variable in both differentiation directions `i` and
/// `j`; the `dv.dv` component of the result of an evaluation is then the
/// second partial with respect to those directions.
pub fn seed2(v: f64, in_i: bool, in_j: bool) -> Dual2 {
    let d_i = if in_i { 1.0 } else { 0.0 };
    let d_j = if in_j { 1.0 } else { 0.0 };
    Dual::new(Dual::new(v, d_j), Dual::new(d_i, 0.0))
}

/// Seed a `Dual3` as variable in up to three directions; the innermost
/// `dv.dv.dv` component of an evaluation is the mixed third partial.
pub fn seed3(v: f64, in_i: bool, in_j: bool, in_k: bool) -> Dual3 {
    let d = |b: bool| if b { 1.0 } else { 0.0 };
    Dual::new(
        Dual::new(Dual::new(v, d(in_k)), Dual::new(d(in_j), 0.0)),
        Dual::new(Dual::new(d(in_i), 0.0), Dual::new(0.0, 0.0)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x) = x^2 * exp(x) + ln(x)
    fn f<S: Scalar>(x: S) -> S {
        x * x * x.exp() + x.ln()
    }

    #[test]
    fn test_first_derivative() {
        let x = 1.3_f64;
        let y = f(Dual::variable(x));
        assert_relative_eq!(y.val, f(x), max_relative = 1e-14);
        // f'(x) = (2x + x^2) exp(x) + 1/x
        let expect = (2.0 * x + x * x) * x.exp() + 1.0 / x;
        assert_relative_eq!(y.dv, expect, max_relative = 1e-14);
    }

    #[test]
    fn test_second_derivative() {
        let x = 0.7_f64;
        let y = f(seed2(x, true, true));
        // f''(x) = (2 + 4x + x^2) exp(x) - 1/x^2
        let expect = (2.0 + 4.0 * x + x * x) * x.exp() - 1.0 / (x * x);
        assert_relative_eq!(y.dv.dv, expect, max_relative = 1e-13);
    }

    #[test]
    fn test_mixed_second_partial() {
        // g(x, y) = exp(x * y), d2g/dxdy = (1 + xy) exp(xy)
        let (x, y) = (0.4_f64, -0.9_f64);
        let gx = seed2(x, true, false);
        let gy = seed2(y, false, true);
        let g = (gx * gy).exp();
        let expect = (1.0 + x * y) * (x * y).exp();
        assert_relative_eq!(g.dv.dv, expect, max_relative = 1e-13);
    }

    #[test]
    fn test_third_derivative() {
        // h(x) = x^3: h'''(x) = 6 everywhere
        let x = seed3(2.5, true, true, true);
        let h = x * x * x;
        assert_relative_eq!(h.dv.dv.dv, 6.0, max_relative = 1e-13);
    }

    #[test]
    fn test_sqrt_abs_erf() {
        let x = Dual::variable(2.0_f64);
        let s = x.sqrt();
        assert_relative_eq!(s.dv, 0.5 / 2.0_f64.sqrt(), max_relative = 1e-14);

        let a = (-x).abs();
        assert_relative_eq!(a.val, 2.0);
        assert_relative_eq!(a.dv, -1.0);

        let e = x.erf();
        let expect = std::f64::consts::FRAC_2_SQRT_PI * (-4.0_f64).exp();
        assert_relative_eq!(e.dv, expect, max_relative = 1e-13);
    }

    #[test]
    fn test_ordering_uses_primal() {
        let a = Dual::new(1.0_f64, 100.0);
        let b = Dual::new(2.0_f64, -100.0);
        assert!(a < b);
        assert_eq!(a.max(b).val, 2.0);
    }
}
