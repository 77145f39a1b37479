//! Symbolic differentiation.
//!
//! Derivatives are new expression graphs built with the same constructors
//! as everything else, so they compile like any other expression.  Each
//! node is differentiated once per call thanks to a memo keyed on
//! [`Scalar::id`].
//!
//! Non-smooth primitives get their almost-everywhere derivative: `sign` is
//! flat, `abs` follows `sign`, and `min`/`max` route the derivative of the
//! active operand through the same `max(0, sign(·))` mask the fast
//! conditionals use (ties pick the second operand).

use std::collections::{HashMap, HashSet};

use crate::ExprError;
use crate::expression::Expression;
use crate::scalar::{BinaryOp, Node, Scalar, UnaryOp};

impl Scalar {
    /// Partial derivative with respect to the symbol called `symbol`.
    pub fn derivative(&self, symbol: &str) -> Scalar {
        Differentiator::new(symbol).run(self)
    }
}

/// Jacobian of a vector expression with respect to `symbols`.
///
/// The result has one row per entry of `expressions` and one column per
/// symbol.  The memo is shared across rows so common sub-graphs (frame
/// chains, for example) are differentiated once per symbol.
///
/// # Errors
///
/// [`ExprError::ShapeMismatch`] when `expressions` is not a vector.
pub fn jacobian(expressions: &Expression, symbols: &[&str]) -> Result<Expression, ExprError> {
    if !expressions.is_vector() {
        return Err(ExprError::ShapeMismatch {
            operation: "jacobian",
            lhs: expressions.shape(),
            rhs: (expressions.len(), 1),
        });
    }
    let rows = expressions.len();
    let mut data = vec![Scalar::zero(); rows * symbols.len()];
    for (col, symbol) in symbols.iter().enumerate() {
        let mut d = Differentiator::new(symbol);
        for (row, e) in expressions.iter().enumerate() {
            data[row * symbols.len() + col] = d.run(e);
        }
    }
    Expression::new(rows, symbols.len(), data)
}

/// Distinct symbol names in `expression`, in first-seen order.
pub fn free_symbols(expression: &Expression) -> Vec<String> {
    let mut seen_nodes = HashSet::new();
    let mut seen_names = HashSet::new();
    let mut names = Vec::new();
    let mut stack: Vec<Scalar> = expression.entries().iter().rev().cloned().collect();
    while let Some(s) = stack.pop() {
        if !seen_nodes.insert(s.id()) {
            continue;
        }
        match s.node() {
            Node::Constant(_) => {}
            Node::Symbol(name) => {
                if seen_names.insert(name.to_string()) {
                    names.push(name.to_string());
                }
            }
            Node::Unary(_, x) => stack.push(x.clone()),
            Node::Binary(_, a, b) => {
                stack.push(b.clone());
                stack.push(a.clone());
            }
        }
    }
    names
}

struct Differentiator<'a> {
    symbol: &'a str,
    memo: HashMap<usize, Scalar>,
}

impl<'a> Differentiator<'a> {
    fn new(symbol: &'a str) -> Self {
        Self {
            symbol,
            memo: HashMap::new(),
        }
    }

    /// Post-order walk with an explicit stack; operands are differentiated
    /// before the nodes that use them.
    fn run(&mut self, root: &Scalar) -> Scalar {
        let mut stack = vec![(root, false)];
        while let Some((s, ready)) = stack.pop() {
            if self.memo.contains_key(&s.id()) {
                continue;
            }
            if !ready {
                stack.push((s, true));
                stack.extend(s.children().rev().map(|c| (c, false)));
                continue;
            }
            let d = match s.node() {
                Node::Constant(_) => Scalar::zero(),
                Node::Symbol(name) => {
                    if &**name == self.symbol {
                        Scalar::one()
                    } else {
                        Scalar::zero()
                    }
                }
                Node::Unary(op, x) => {
                    let dx = &self.memo[&x.id()];
                    if dx.is_zero() {
                        Scalar::zero()
                    } else {
                        unary_rule(*op, s, x, dx)
                    }
                }
                Node::Binary(op, a, b) => {
                    let da = &self.memo[&a.id()];
                    let db = &self.memo[&b.id()];
                    if da.is_zero() && db.is_zero() {
                        Scalar::zero()
                    } else {
                        binary_rule(*op, s, a, b, da, db)
                    }
                }
            };
            self.memo.insert(s.id(), d);
        }
        self.memo[&root.id()].clone()
    }
}

/// `d op(x)` given `dx`; `y` is the node `op(x)` itself.
fn unary_rule(op: UnaryOp, y: &Scalar, x: &Scalar, dx: &Scalar) -> Scalar {
    match op {
        UnaryOp::Neg => -dx,
        UnaryOp::Abs => x.sign() * dx,
        UnaryOp::Sign => Scalar::zero(),
        UnaryOp::Sqrt => dx / (2.0 * y),
        UnaryOp::Sin => x.cos() * dx,
        UnaryOp::Cos => -(x.sin()) * dx,
        UnaryOp::Tan => (1.0 + y * y) * dx,
        UnaryOp::Asin => dx / (1.0 - x * x).sqrt(),
        UnaryOp::Acos => -dx / (1.0 - x * x).sqrt(),
        UnaryOp::Atan => dx / (1.0 + x * x),
        UnaryOp::Exp => y * dx,
        UnaryOp::Log => dx / x,
    }
}

/// `d op(a, b)` given `da` and `db`; `y` is the node `op(a, b)` itself.
fn binary_rule(op: BinaryOp, y: &Scalar, a: &Scalar, b: &Scalar, da: &Scalar, db: &Scalar) -> Scalar {
    match op {
        BinaryOp::Add => da + db,
        BinaryOp::Sub => da - db,
        BinaryOp::Mul => da * b + a * db,
        BinaryOp::Div => (da - y * db) / b,
        BinaryOp::Pow => match b.as_constant() {
            Some(exponent) => exponent * a.powf(exponent - 1.0) * da,
            None => y * (db * a.ln() + b * da / a),
        },
        BinaryOp::Min => active_operand((b - a).sign(), da, db),
        BinaryOp::Max => active_operand((a - b).sign(), da, db),
        BinaryOp::Atan2 => (b * da - a * db) / (a * a + b * b),
        BinaryOp::Fmod => da - (a - y) / b * db,
    }
}

/// `da` where `s > 0`, `db` elsewhere.
fn active_operand(s: Scalar, da: &Scalar, db: &Scalar) -> Scalar {
    let mask = s.max(0.0);
    &mask * da + (1.0 - &mask) * db
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditionals::if_greater_zero;
    use approx::assert_relative_eq;

    fn eval(s: &Scalar, vars: &[(&str, f64)]) -> f64 {
        let map: HashMap<&str, f64> = vars.iter().copied().collect();
        s.evaluate(&map).unwrap()
    }

    fn central_difference(f: &Scalar, symbol: &str, vars: &[(&str, f64)]) -> f64 {
        let h = 1e-6;
        let shifted = |delta: f64| {
            let moved: Vec<(&str, f64)> = vars
                .iter()
                .map(|&(n, v)| if n == symbol { (n, v + delta) } else { (n, v) })
                .collect();
            eval(f, &moved)
        };
        (shifted(h) - shifted(-h)) / (2.0 * h)
    }

    #[test]
    fn polynomial_and_trig_rules() {
        let x = Scalar::symbol("x");
        let y = Scalar::symbol("y");
        let f = &x * &x * &y + x.sin() * y.cos() + (&x / &y);
        let vars = [("x", 0.7), ("y", 1.3)];
        for sym in ["x", "y"] {
            assert_relative_eq!(
                eval(&f.derivative(sym), &vars),
                central_difference(&f, sym, &vars),
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn inverse_trig_sqrt_atan2_pow_rules() {
        let x = Scalar::symbol("x");
        let y = Scalar::symbol("y");
        let f = (&x * 0.5).acos() + (&x * 0.3).asin() + y.atan2(&x) + (&y + 2.0).sqrt()
            + x.powf(3.0)
            + y.powf(&x)
            + x.exp() * y.ln()
            + x.tan()
            + y.atan();
        let vars = [("x", 0.4), ("y", 1.7)];
        for sym in ["x", "y"] {
            assert_relative_eq!(
                eval(&f.derivative(sym), &vars),
                central_difference(&f, sym, &vars),
                epsilon = 1e-5
            );
        }
    }

    #[test]
    fn non_smooth_rules_away_from_kinks() {
        let x = Scalar::symbol("x");
        let y = Scalar::symbol("y");
        let f = x.abs() + x.max(&y) * 2.0 + x.min(&y) * 3.0 + x.fmod(&y) + x.sign();
        for vars in [[("x", -1.5), ("y", 0.4)], [("x", 2.5), ("y", 0.7)]] {
            for sym in ["x", "y"] {
                assert_relative_eq!(
                    eval(&f.derivative(sym), &vars),
                    central_difference(&f, sym, &vars),
                    epsilon = 1e-5
                );
            }
        }
    }

    #[test]
    fn smooth_conditionals_differentiate_the_selected_branch() {
        let x = Scalar::symbol("x");
        let f = if_greater_zero(&x, &(&x * &x), &(x.sin()));
        assert_relative_eq!(eval(&f.derivative("x"), &[("x", 2.0)]), 4.0, epsilon = 1e-12);
        assert_relative_eq!(
            eval(&f.derivative("x"), &[("x", -2.0)]),
            (-2.0f64).cos(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn derivative_of_unrelated_symbol_is_literal_zero() {
        let x = Scalar::symbol("x");
        let f = x.sin() * 3.0;
        assert!(f.derivative("q").is_zero());
    }

    #[test]
    fn jacobian_shape_and_values() {
        let x = Scalar::symbol("x");
        let y = Scalar::symbol("y");
        let v = Expression::column([&x * &y, &x + &y, x.sin()]);
        let j = jacobian(&v, &["x", "y"]).unwrap();
        assert_eq!(j.shape(), (3, 2));
        let values = j
            .evaluate(&HashMap::from([("x", 2.0), ("y", 5.0)]))
            .unwrap();
        assert_eq!(values, vec![5.0, 2.0, 1.0, 1.0, 2.0f64.cos(), 0.0]);
    }

    #[test]
    fn jacobian_rejects_matrices() {
        assert!(jacobian(&Expression::zeros(2, 2), &["x"]).is_err());
    }

    #[test]
    fn deep_chains_differentiate_without_recursion() {
        let x = Scalar::symbol("x");
        let mut s = x.clone();
        let mut expected = 1.0;
        for i in 0..100_000 {
            s = &s * 0.5 + &x * (i as f64);
            expected = expected * 0.5 + i as f64;
        }
        // s is linear in x, so ds/dx folds to the constant s(1).
        assert_eq!(s.derivative("x").as_constant(), Some(expected));
        assert!(s.derivative("y").is_zero());
    }

    #[test]
    fn free_symbols_in_first_seen_order() {
        let a = Scalar::symbol("a");
        let b = Scalar::symbol("b");
        let e = Expression::column([&b * &a, a.sin(), Scalar::constant(1.0)]);
        assert_eq!(free_symbols(&e), vec!["b".to_string(), "a".to_string()]);
    }
}
