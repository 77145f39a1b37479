//! Named function inputs.
//!
//! Every parameter occupies a contiguous slice of the flat input vector:
//! parameters are concatenated in declared order and matrix parameters are
//! flattened row-major.  A scalar parameter `a` binds the symbol `a`; a
//! matrix parameter `m` binds the symbols `m[r,c]` created by
//! [`Expression::symbols`].

use kinesym_expr::expression::element_name;
use kinesym_expr::{Expression, Scalar};
use serde::{Deserialize, Serialize};

/// Shape of a [`Parameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterShape {
    Scalar,
    Matrix { rows: usize, cols: usize },
}

/// A named input of a compiled function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub shape: ParameterShape,
}

impl Parameter {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: ParameterShape::Scalar,
        }
    }

    pub fn matrix(name: impl Into<String>, rows: usize, cols: usize) -> Self {
        Self {
            name: name.into(),
            shape: ParameterShape::Matrix { rows, cols },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(rows, cols)`; `(1, 1)` for scalars.
    pub fn dims(&self) -> (usize, usize) {
        match self.shape {
            ParameterShape::Scalar => (1, 1),
            ParameterShape::Matrix { rows, cols } => (rows, cols),
        }
    }

    /// Number of flat input slots.
    pub fn len(&self) -> usize {
        let (rows, cols) = self.dims();
        rows * cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The symbols this parameter binds, shaped like the parameter.
    pub fn expression(&self) -> Expression {
        match self.shape {
            ParameterShape::Scalar => Expression::scalar(Scalar::symbol(&self.name)),
            ParameterShape::Matrix { rows, cols } => Expression::symbols(&self.name, rows, cols),
        }
    }

    /// Symbol names in input order.
    pub fn element_names(&self) -> Vec<String> {
        match self.shape {
            ParameterShape::Scalar => vec![self.name.clone()],
            ParameterShape::Matrix { rows, cols } => (0..rows)
                .flat_map(|r| (0..cols).map(move |c| (r, c)))
                .map(|(r, c)| element_name(&self.name, r, c))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_names_follow_row_major_order() {
        let m = Parameter::matrix("m", 2, 2);
        assert_eq!(m.element_names(), vec!["m[0,0]", "m[0,1]", "m[1,0]", "m[1,1]"]);
        assert_eq!(m.len(), 4);
        let e = m.expression();
        assert_eq!(e.get(0, 1).unwrap().as_symbol(), Some("m[0,1]"));
    }

    #[test]
    fn scalar_binds_its_own_name() {
        let a = Parameter::scalar("a");
        assert_eq!(a.dims(), (1, 1));
        assert_eq!(a.element_names(), vec!["a"]);
        assert_eq!(a.expression().to_scalar().unwrap().as_symbol(), Some("a"));
    }
}
