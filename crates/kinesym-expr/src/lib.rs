//! `kinesym-expr` – differentiable symbolic geometry.
//!
//! Kinematic quantities (frames, rotations, quaternions) are built as
//! expression graphs over named joint-position symbols.  Every operation
//! stays differentiable almost everywhere so velocity-level Jacobians can be
//! derived from the same graphs that are later compiled by
//! `kinesym-compile`.
//!
//! # Modules
//!
//! - [`scalar`] – [`Scalar`][scalar::Scalar]: a reference-counted DAG node
//!   (constant, symbol, or operator) with infallible operator overloads.
//! - [`expression`] – [`Expression`][expression::Expression]: a shaped,
//!   row-major grid of scalars.  Every operation checks shapes and fails with
//!   [`ExprError::ShapeMismatch`] at construction time.
//! - [`conditionals`] – branch-free selection built from `sign`, `max` and
//!   `min`, in a [`fast`][conditionals::fast] and a
//!   [`stable`][conditionals::stable] family, plus safe division.
//! - [`geometry`] – frames, rotation matrices, quaternions, axis-angle and
//!   roll-pitch-yaw conversions, slerp.
//! - [`diff`] – symbolic differentiation and Jacobians.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use kinesym_expr::{Scalar, geometry};
//!
//! let yaw = Scalar::symbol("yaw");
//! let frame = geometry::frame_rpy(&1.0.into(), &0.0.into(), &0.0.into(),
//!                                 &0.0.into(), &0.0.into(), &yaw);
//!
//! let values = HashMap::from([("yaw", std::f64::consts::FRAC_PI_2)]);
//! let numeric = frame.evaluate(&values).unwrap();
//! assert!((numeric[4] - 1.0).abs() < 1e-12); // R[1,0] = sin(yaw)
//! ```

pub mod conditionals;
pub mod diff;
pub mod expression;
pub mod geometry;
pub mod scalar;

pub use diff::{free_symbols, jacobian};
pub use expression::Expression;
pub use scalar::{BinaryOp, Node, Scalar, UnaryOp};

use thiserror::Error;

/// Errors raised while building or evaluating expression graphs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("shape mismatch in {operation}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        operation: &'static str,
        lhs: (usize, usize),
        rhs: (usize, usize),
    },

    #[error("index ({row}, {col}) out of bounds for shape {shape:?}")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        shape: (usize, usize),
    },

    #[error("expected {expected} entries for a {rows}x{cols} expression, got {actual}")]
    InvalidLength {
        rows: usize,
        cols: usize,
        expected: usize,
        actual: usize,
    },

    #[error("no value bound for symbol '{0}'")]
    UnboundSymbol(String),
}
