//! Branch-free conditionals and safe arithmetic.
//!
//! A native `if` has no derivative, so every selection inside constraint
//! code is written as arithmetic over `sign(cond)` masked by `max`/`min`.
//! The result is defined everywhere and differentiable away from the
//! boundary; very close to (but not at) the boundary its derivative is
//! numerically noisy.
//!
//! Two families are provided, each deriving `>=`, `<`, `<=`, `==` and the
//! `*_zero` shortcuts from a single `>` primitive by operand swap and branch
//! swap, so ties resolve identically everywhere:
//!
//! | family     | primitive                                                | graph size |
//! |------------|----------------------------------------------------------|------------|
//! | [`stable`] | `max(0,s)·a − min(0,s)·b + (1−abs(s))·b`, one term per case | larger |
//! | [`fast`]   | `m·a + (1−m)·b` with `m = max(0,s)`                      | smaller    |
//!
//! Both pick exactly `a` or exactly `b` when the condition is at least one
//! ulp away from zero; their results are bit-identical there.  The stable
//! family is re-exported at module level.

use crate::ExprError;
use crate::expression::Expression;
use crate::scalar::Scalar;

pub use stable::*;

/// Generate the comparisons derived from a module-local `if_greater_zero`.
macro_rules! derived_comparisons {
    () => {
        /// `if_result` when `a > b`, else `else_result`.
        pub fn if_greater(a: &Scalar, b: &Scalar, if_result: &Scalar, else_result: &Scalar) -> Scalar {
            if_greater_zero(&(a - b), if_result, else_result)
        }

        /// `if_result` when `a < b`, else `else_result`.
        pub fn if_less(a: &Scalar, b: &Scalar, if_result: &Scalar, else_result: &Scalar) -> Scalar {
            if_greater(b, a, if_result, else_result)
        }

        /// `if_result` when `a >= b`, else `else_result`; the negation of `b > a`.
        pub fn if_greater_eq(a: &Scalar, b: &Scalar, if_result: &Scalar, else_result: &Scalar) -> Scalar {
            if_greater(b, a, else_result, if_result)
        }

        /// `if_result` when `a <= b`, else `else_result`; the negation of `a > b`.
        pub fn if_less_eq(a: &Scalar, b: &Scalar, if_result: &Scalar, else_result: &Scalar) -> Scalar {
            if_greater(a, b, else_result, if_result)
        }

        /// `if_result` when `a == b`, i.e. neither `a > b` nor `b > a`.
        pub fn if_eq(a: &Scalar, b: &Scalar, if_result: &Scalar, else_result: &Scalar) -> Scalar {
            let not_less = if_greater(b, a, else_result, if_result);
            if_greater(a, b, else_result, &not_less)
        }

        /// `if_result` when `condition >= 0`, else `else_result`.
        pub fn if_greater_eq_zero(condition: &Scalar, if_result: &Scalar, else_result: &Scalar) -> Scalar {
            if_greater_eq(condition, &Scalar::zero(), if_result, else_result)
        }

        /// `if_result` when `condition == 0`, else `else_result`.
        pub fn if_eq_zero(condition: &Scalar, if_result: &Scalar, else_result: &Scalar) -> Scalar {
            if_eq(condition, &Scalar::zero(), if_result, else_result)
        }

        /// `numerator / denominator`, or `fallback` when the denominator is
        /// exactly zero.
        pub fn safe_division(numerator: &Scalar, denominator: &Scalar, fallback: impl Into<Scalar>) -> Scalar {
            let guarded = if_eq_zero(denominator, &Scalar::one(), denominator);
            if_eq_zero(denominator, &fallback.into(), &(numerator / guarded))
        }
    };
}

/// Isolated-term selection; each case contributes through its own mask.
pub mod stable {
    use crate::scalar::Scalar;

    /// `if_result` when `condition > 0`, else `else_result`.
    pub fn if_greater_zero(condition: &Scalar, if_result: &Scalar, else_result: &Scalar) -> Scalar {
        let s = condition.sign();
        let take_if = s.max(0.0) * if_result;
        let take_else = -s.min(0.0) * else_result;
        let at_zero = (1.0 - s.abs()) * else_result;
        take_if + take_else + at_zero
    }

    derived_comparisons!();
}

/// Minimal-node selection with a single shared mask.
pub mod fast {
    use crate::scalar::Scalar;

    /// `if_result` when `condition > 0`, else `else_result`.
    pub fn if_greater_zero(condition: &Scalar, if_result: &Scalar, else_result: &Scalar) -> Scalar {
        let mask = condition.sign().max(0.0);
        &mask * if_result + (1.0 - &mask) * else_result
    }

    derived_comparisons!();
}

/// Apply a scalar selection entry by entry to two equally shaped branches.
///
/// ```rust
/// use kinesym_expr::{Expression, Scalar, conditionals};
///
/// let c = Scalar::symbol("c");
/// let a = Expression::zeros(4, 1);
/// let b = Expression::eye(4).block(0, 0, 4, 1).unwrap();
/// let picked = conditionals::select_with(&a, &b, |x, y| conditionals::if_greater_zero(&c, x, y)).unwrap();
/// assert_eq!(picked.shape(), (4, 1));
/// ```
pub fn select_with(
    if_result: &Expression,
    else_result: &Expression,
    select: impl Fn(&Scalar, &Scalar) -> Scalar,
) -> Result<Expression, ExprError> {
    if_result.zip_with(else_result, "select_with", select)
}
