//! Symbolic scalar nodes.
//!
//! A [`Scalar`] is a cheap handle onto an immutable, reference-counted
//! [`Node`].  Nodes only ever point at previously built nodes, so every graph
//! is acyclic by construction.  Sub-graphs are shared by cloning the handle;
//! compilers and differentiators key their memo tables on [`Scalar::id`] so a
//! shared sub-graph is visited once.
//!
//! Constant operands are folded on construction, together with the neutral
//! elements `x + 0`, `x - 0`, `x * 1`, `x / 1` and the annihilator `x * 0`.
//! Nothing else is simplified.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ExprError;

// ────────────────────────────────────────────────────────────────────────────
// Operators
// ────────────────────────────────────────────────────────────────────────────

/// Single-operand operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    /// `1` for positive, `-1` for negative, `0` for (signed) zero.
    Sign,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
    Log,
}

impl UnaryOp {
    /// Evaluate the operator on a number.
    #[inline]
    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    // zero stays zero, NaN stays NaN
                    x * 0.0
                }
            }
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tan => x.tan(),
            UnaryOp::Asin => x.asin(),
            UnaryOp::Acos => x.acos(),
            UnaryOp::Atan => x.atan(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Abs => "fabs",
            UnaryOp::Sign => "sign",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Asin => "asin",
            UnaryOp::Acos => "acos",
            UnaryOp::Atan => "atan",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
        }
    }
}

/// Two-operand operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Raw division.  Constraint code should go through
    /// [`safe_division`][crate::conditionals::safe_division] instead.
    Div,
    Pow,
    Min,
    Max,
    /// `atan2(lhs, rhs)` with `lhs` the y coordinate.
    Atan2,
    /// Truncated remainder, same sign as the dividend.
    Fmod,
}

impl BinaryOp {
    /// Evaluate the operator on two numbers.
    #[inline]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Atan2 => a.atan2(b),
            BinaryOp::Fmod => a % b,
        }
    }

    /// True when swapping the operands never changes the result.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::Min | BinaryOp::Max
        )
    }

    fn infix(self) -> Option<&'static str> {
        match self {
            BinaryOp::Add => Some("+"),
            BinaryOp::Sub => Some("-"),
            BinaryOp::Mul => Some("*"),
            BinaryOp::Div => Some("/"),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Pow => "pow",
            BinaryOp::Min => "fmin",
            BinaryOp::Max => "fmax",
            BinaryOp::Atan2 => "atan2",
            BinaryOp::Fmod => "fmod",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Node / Scalar
// ────────────────────────────────────────────────────────────────────────────

/// A single vertex of an expression graph.
#[derive(Debug)]
pub enum Node {
    Constant(f64),
    Symbol(Rc<str>),
    Unary(UnaryOp, Scalar),
    Binary(BinaryOp, Scalar, Scalar),
}

/// Handle onto a shared, immutable expression node.
///
/// Cloning is O(1).  Arithmetic operators are implemented for every mix of
/// `Scalar`, `&Scalar` and `f64`.
#[derive(Clone)]
pub struct Scalar(Rc<Node>);

impl Scalar {
    /// A literal.
    pub fn constant(value: f64) -> Self {
        Self(Rc::new(Node::Constant(value)))
    }

    /// A named free variable.  Symbols with equal names are the same variable.
    pub fn symbol(name: &str) -> Self {
        Self(Rc::new(Node::Symbol(Rc::from(name))))
    }

    pub fn zero() -> Self {
        Self::constant(0.0)
    }

    pub fn one() -> Self {
        Self::constant(1.0)
    }

    /// The underlying node.
    pub fn node(&self) -> &Node {
        &self.0
    }

    /// Direct operands, left to right.
    pub fn children(&self) -> impl DoubleEndedIterator<Item = &Scalar> {
        let (first, second) = match self.node() {
            Node::Constant(_) | Node::Symbol(_) => (None, None),
            Node::Unary(_, x) => (Some(x), None),
            Node::Binary(_, a, b) => (Some(a), Some(b)),
        };
        first.into_iter().chain(second)
    }

    /// Identity of the underlying node; equal for clones of the same handle.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    /// The literal value when this node is a constant.
    pub fn as_constant(&self) -> Option<f64> {
        match *self.0 {
            Node::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// The symbol name when this node is a free variable.
    pub fn as_symbol(&self) -> Option<&str> {
        match &*self.0 {
            Node::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// True for the literal `0` (either sign).
    pub fn is_zero(&self) -> bool {
        self.as_constant() == Some(0.0)
    }

    pub fn is_one(&self) -> bool {
        self.as_constant() == Some(1.0)
    }

    /// Apply a unary operator, folding constants.
    pub fn unary(op: UnaryOp, x: &Scalar) -> Scalar {
        if let Some(v) = x.as_constant() {
            return Scalar::constant(op.apply(v));
        }
        Scalar(Rc::new(Node::Unary(op, x.clone())))
    }

    /// Apply a binary operator, folding constants and neutral elements.
    pub fn binary(op: BinaryOp, a: &Scalar, b: &Scalar) -> Scalar {
        if let (Some(x), Some(y)) = (a.as_constant(), b.as_constant()) {
            return Scalar::constant(op.apply(x, y));
        }
        match op {
            BinaryOp::Add if b.is_zero() => return a.clone(),
            BinaryOp::Add if a.is_zero() => return b.clone(),
            BinaryOp::Sub if b.is_zero() => return a.clone(),
            BinaryOp::Sub if a.is_zero() => return Scalar::unary(UnaryOp::Neg, b),
            BinaryOp::Mul if a.is_zero() || b.is_zero() => return Scalar::zero(),
            BinaryOp::Mul if b.is_one() => return a.clone(),
            BinaryOp::Mul if a.is_one() => return b.clone(),
            BinaryOp::Div if b.is_one() => return a.clone(),
            _ => {}
        }
        Scalar(Rc::new(Node::Binary(op, a.clone(), b.clone())))
    }

    pub fn abs(&self) -> Scalar {
        Scalar::unary(UnaryOp::Abs, self)
    }

    pub fn sign(&self) -> Scalar {
        Scalar::unary(UnaryOp::Sign, self)
    }

    pub fn sqrt(&self) -> Scalar {
        Scalar::unary(UnaryOp::Sqrt, self)
    }

    pub fn sin(&self) -> Scalar {
        Scalar::unary(UnaryOp::Sin, self)
    }

    pub fn cos(&self) -> Scalar {
        Scalar::unary(UnaryOp::Cos, self)
    }

    pub fn tan(&self) -> Scalar {
        Scalar::unary(UnaryOp::Tan, self)
    }

    pub fn asin(&self) -> Scalar {
        Scalar::unary(UnaryOp::Asin, self)
    }

    pub fn acos(&self) -> Scalar {
        Scalar::unary(UnaryOp::Acos, self)
    }

    pub fn atan(&self) -> Scalar {
        Scalar::unary(UnaryOp::Atan, self)
    }

    pub fn exp(&self) -> Scalar {
        Scalar::unary(UnaryOp::Exp, self)
    }

    pub fn ln(&self) -> Scalar {
        Scalar::unary(UnaryOp::Log, self)
    }

    pub fn powf(&self, exponent: impl Into<Scalar>) -> Scalar {
        Scalar::binary(BinaryOp::Pow, self, &exponent.into())
    }

    /// `fmin`; piecewise linear, differentiable almost everywhere.
    pub fn min(&self, other: impl Into<Scalar>) -> Scalar {
        Scalar::binary(BinaryOp::Min, self, &other.into())
    }

    /// `fmax`; piecewise linear, differentiable almost everywhere.
    pub fn max(&self, other: impl Into<Scalar>) -> Scalar {
        Scalar::binary(BinaryOp::Max, self, &other.into())
    }

    /// `atan2(self, x)`, with `self` as the y coordinate.
    pub fn atan2(&self, x: impl Into<Scalar>) -> Scalar {
        Scalar::binary(BinaryOp::Atan2, self, &x.into())
    }

    pub fn fmod(&self, divisor: impl Into<Scalar>) -> Scalar {
        Scalar::binary(BinaryOp::Fmod, self, &divisor.into())
    }

    /// Evaluate the graph with a memoised walk.
    ///
    /// This is the one-shot, non-optimised path; per-cycle evaluation goes
    /// through a compiled function instead.
    ///
    /// # Errors
    ///
    /// [`ExprError::UnboundSymbol`] when a symbol has no value in `bindings`.
    pub fn evaluate(&self, bindings: &HashMap<&str, f64>) -> Result<f64, ExprError> {
        Evaluator::new(bindings).eval(self)
    }
}

pub(crate) struct Evaluator<'b> {
    bindings: &'b HashMap<&'b str, f64>,
    memo: HashMap<usize, f64>,
}

impl<'b> Evaluator<'b> {
    pub(crate) fn new(bindings: &'b HashMap<&'b str, f64>) -> Self {
        Self {
            bindings,
            memo: HashMap::new(),
        }
    }

    /// Post-order walk with an explicit stack, so graph depth is bounded by
    /// the heap rather than the thread stack.
    pub(crate) fn eval(&mut self, root: &Scalar) -> Result<f64, ExprError> {
        let mut stack = vec![(root, false)];
        while let Some((s, ready)) = stack.pop() {
            if self.memo.contains_key(&s.id()) {
                continue;
            }
            if !ready {
                stack.push((s, true));
                match s.node() {
                    Node::Unary(_, x) => stack.push((x, false)),
                    Node::Binary(_, a, b) => {
                        stack.push((b, false));
                        stack.push((a, false));
                    }
                    Node::Constant(_) | Node::Symbol(_) => {}
                }
                continue;
            }
            let value = match s.node() {
                Node::Constant(v) => *v,
                Node::Symbol(name) => *self
                    .bindings
                    .get(&**name)
                    .ok_or_else(|| ExprError::UnboundSymbol(name.to_string()))?,
                Node::Unary(op, x) => op.apply(self.memo[&x.id()]),
                Node::Binary(op, a, b) => op.apply(self.memo[&a.id()], self.memo[&b.id()]),
            };
            self.memo.insert(s.id(), value);
        }
        Ok(self.memo[&root.id()])
    }
}

impl Drop for Scalar {
    // Unlink uniquely owned children onto a heap stack so dropping a deep
    // chain never recurses.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_children(&mut self.0, &mut pending);
        while let Some(mut s) = pending.pop() {
            detach_children(&mut s.0, &mut pending);
        }
    }
}

fn detach_children(node: &mut Rc<Node>, out: &mut Vec<Scalar>) {
    let Some(node) = Rc::get_mut(node) else {
        return;
    };
    match std::mem::replace(node, Node::Constant(0.0)) {
        Node::Unary(_, x) => out.push(x),
        Node::Binary(_, a, b) => {
            out.push(a);
            out.push(b);
        }
        Node::Constant(_) | Node::Symbol(_) => {}
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Formatting
// ────────────────────────────────────────────────────────────────────────────

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Compound nodes reachable from `root` through more than one edge, in
/// dependency order.
fn shared_nodes(root: &Scalar) -> Vec<&Scalar> {
    let mut parents: HashMap<usize, usize> = HashMap::new();
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(s) = stack.pop() {
        if !seen.insert(s.id()) {
            continue;
        }
        for child in s.children() {
            *parents.entry(child.id()).or_default() += 1;
            stack.push(child);
        }
    }

    let mut order = Vec::new();
    let mut done = HashSet::new();
    let mut stack = vec![(root, false)];
    while let Some((s, ready)) = stack.pop() {
        if done.contains(&s.id()) {
            continue;
        }
        if ready {
            done.insert(s.id());
            if parents.get(&s.id()).is_some_and(|&n| n > 1) && s.children().next().is_some() {
                order.push(s);
            }
            continue;
        }
        stack.push((s, true));
        stack.extend(s.children().rev().map(|c| (c, false)));
    }
    order
}

enum Piece<'a> {
    Node(&'a Scalar),
    Text(&'static str),
}

/// Write `top` in full, with shared descendants printed by their binding
/// name.
fn write_expanded(f: &mut fmt::Formatter<'_>, top: &Scalar, names: &HashMap<usize, usize>) -> fmt::Result {
    let mut stack = vec![Piece::Node(top)];
    while let Some(piece) = stack.pop() {
        let s = match piece {
            Piece::Text(t) => {
                f.write_str(t)?;
                continue;
            }
            Piece::Node(s) => s,
        };
        if s.id() != top.id()
            && let Some(n) = names.get(&s.id())
        {
            write!(f, "@{n}")?;
            continue;
        }
        match s.node() {
            Node::Constant(v) => write!(f, "{v}")?,
            Node::Symbol(name) => f.write_str(name)?,
            Node::Unary(UnaryOp::Neg, x) => {
                stack.extend([Piece::Text(")"), Piece::Node(x), Piece::Text("(-")]);
            }
            Node::Unary(op, x) => {
                f.write_str(op.symbol())?;
                stack.extend([Piece::Text(")"), Piece::Node(x), Piece::Text("(")]);
            }
            Node::Binary(op, a, b) => {
                let separator = match op.infix() {
                    Some(sym) => sym,
                    None => {
                        f.write_str(op.name())?;
                        ","
                    }
                };
                stack.extend([
                    Piece::Text(")"),
                    Piece::Node(b),
                    Piece::Text(separator),
                    Piece::Node(a),
                    Piece::Text("("),
                ]);
            }
        }
    }
    Ok(())
}

/// Infix rendering.  Compound sub-graphs reached more than once are bound
/// first as `@0 = ...; ` and referenced by name, so output stays linear in
/// the number of distinct nodes.
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = shared_nodes(self);
        let names: HashMap<usize, usize> = shared.iter().enumerate().map(|(i, s)| (s.id(), i)).collect();
        for (i, s) in shared.iter().enumerate() {
            write!(f, "@{i} = ")?;
            write_expanded(f, s, &names)?;
            f.write_str("; ")?;
        }
        write_expanded(f, self, &names)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::constant(value)
    }
}

impl From<&Scalar> for Scalar {
    fn from(value: &Scalar) -> Self {
        value.clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Operator overloads
// ────────────────────────────────────────────────────────────────────────────

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<Scalar> for Scalar {
            type Output = Scalar;
            fn $method(self, rhs: Scalar) -> Scalar {
                Scalar::binary($op, &self, &rhs)
            }
        }
        impl $trait<&Scalar> for Scalar {
            type Output = Scalar;
            fn $method(self, rhs: &Scalar) -> Scalar {
                Scalar::binary($op, &self, rhs)
            }
        }
        impl $trait<Scalar> for &Scalar {
            type Output = Scalar;
            fn $method(self, rhs: Scalar) -> Scalar {
                Scalar::binary($op, self, &rhs)
            }
        }
        impl $trait<&Scalar> for &Scalar {
            type Output = Scalar;
            fn $method(self, rhs: &Scalar) -> Scalar {
                Scalar::binary($op, self, rhs)
            }
        }
        impl $trait<f64> for Scalar {
            type Output = Scalar;
            fn $method(self, rhs: f64) -> Scalar {
                Scalar::binary($op, &self, &Scalar::constant(rhs))
            }
        }
        impl $trait<f64> for &Scalar {
            type Output = Scalar;
            fn $method(self, rhs: f64) -> Scalar {
                Scalar::binary($op, self, &Scalar::constant(rhs))
            }
        }
        impl $trait<Scalar> for f64 {
            type Output = Scalar;
            fn $method(self, rhs: Scalar) -> Scalar {
                Scalar::binary($op, &Scalar::constant(self), &rhs)
            }
        }
        impl $trait<&Scalar> for f64 {
            type Output = Scalar;
            fn $method(self, rhs: &Scalar) -> Scalar {
                Scalar::binary($op, &Scalar::constant(self), rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, BinaryOp::Add);
impl_binary_operator!(Sub, sub, BinaryOp::Sub);
impl_binary_operator!(Mul, mul, BinaryOp::Mul);
impl_binary_operator!(Div, div, BinaryOp::Div);

impl Neg for Scalar {
    type Output = Scalar;
    fn neg(self) -> Scalar {
        Scalar::unary(UnaryOp::Neg, &self)
    }
}

impl Neg for &Scalar {
    type Output = Scalar;
    fn neg(self) -> Scalar {
        Scalar::unary(UnaryOp::Neg, self)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
