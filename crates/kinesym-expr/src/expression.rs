//! Shaped symbolic matrices.
//!
//! An [`Expression`] is a `rows × cols` grid of [`Scalar`] nodes stored in
//! row-major order.  The shape is fixed at construction; every operation
//! checks the shapes it combines and reports [`ExprError::ShapeMismatch`]
//! instead of reshaping or broadcasting.  The one documented exception is
//! [`Expression::set`], which assigns a scalar into a single entry.

use std::collections::HashMap;
use std::ops::{Mul, Neg};

use crate::ExprError;
use crate::scalar::{Evaluator, Scalar};

/// A symbolic matrix with a fixed shape.
#[derive(Debug, Clone)]
pub struct Expression {
    rows: usize,
    cols: usize,
    data: Vec<Scalar>,
}

impl Expression {
    /// Build from row-major entries.
    ///
    /// # Errors
    ///
    /// [`ExprError::InvalidLength`] when `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<Scalar>) -> Result<Self, ExprError> {
        if data.len() != rows * cols {
            return Err(ExprError::InvalidLength {
                rows,
                cols,
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from a fixed-size array of rows; the shape is checked by the
    /// type system.
    pub fn from_array<const R: usize, const C: usize>(rows: [[Scalar; C]; R]) -> Self {
        Self {
            rows: R,
            cols: C,
            data: rows.into_iter().flatten().collect(),
        }
    }

    /// Build from runtime-sized rows.
    ///
    /// # Errors
    ///
    /// [`ExprError::InvalidLength`] when the rows are ragged.
    pub fn from_rows(rows: Vec<Vec<Scalar>>) -> Result<Self, ExprError> {
        let cols = rows.first().map_or(0, Vec::len);
        let n = rows.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(ExprError::InvalidLength {
                rows: n,
                cols,
                expected: cols,
                actual: bad.len(),
            });
        }
        Self::new(n, cols, rows.into_iter().flatten().collect())
    }

    /// A column vector.
    pub fn column<const N: usize>(entries: [Scalar; N]) -> Self {
        Self {
            rows: N,
            cols: 1,
            data: entries.into(),
        }
    }

    /// A column vector from a runtime-sized list.
    pub fn column_from(entries: Vec<Scalar>) -> Self {
        Self {
            rows: entries.len(),
            cols: 1,
            data: entries,
        }
    }

    /// A 1×1 expression.
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Self {
            rows: 1,
            cols: 1,
            data: vec![value.into()],
        }
    }

    /// A matrix of fresh symbols named `name[r,c]`.
    pub fn symbols(name: &str, rows: usize, cols: usize) -> Self {
        let data = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .map(|(r, c)| Scalar::symbol(&element_name(name, r, c)))
            .collect();
        Self { rows, cols, data }
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![Scalar::zero(); rows * cols],
        }
    }

    pub fn eye(size: usize) -> Self {
        let mut m = Self::zeros(size, size);
        for i in 0..size {
            m.data[i * size + i] = Scalar::one();
        }
        m
    }

    /// Square matrix with `entries` on the diagonal.
    pub fn diag(entries: &[Scalar]) -> Self {
        let n = entries.len();
        let mut m = Self::zeros(n, n);
        for (i, e) in entries.iter().enumerate() {
            m.data[i * n + i] = e.clone();
        }
        m
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True for a single column or a single row.
    pub fn is_vector(&self) -> bool {
        self.rows == 1 || self.cols == 1
    }

    /// Row-major entries.
    pub fn entries(&self) -> &[Scalar] {
        &self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scalar> {
        self.data.iter()
    }

    /// Entry at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Result<&Scalar, ExprError> {
        if row >= self.rows || col >= self.cols {
            return Err(ExprError::IndexOutOfBounds {
                row,
                col,
                shape: self.shape(),
            });
        }
        Ok(&self.data[row * self.cols + col])
    }

    /// Entry at row-major position `index`; intended for vectors.
    pub fn at(&self, index: usize) -> Result<&Scalar, ExprError> {
        self.data.get(index).ok_or(ExprError::IndexOutOfBounds {
            row: index / self.cols.max(1),
            col: index % self.cols.max(1),
            shape: self.shape(),
        })
    }

    /// The single entry of a 1×1 expression.
    pub fn to_scalar(&self) -> Result<Scalar, ExprError> {
        if self.shape() != (1, 1) {
            return Err(ExprError::ShapeMismatch {
                operation: "to_scalar",
                lhs: self.shape(),
                rhs: (1, 1),
            });
        }
        Ok(self.data[0].clone())
    }

    /// Assign a scalar into one entry.
    pub fn set(&mut self, row: usize, col: usize, value: impl Into<Scalar>) -> Result<(), ExprError> {
        if row >= self.rows || col >= self.cols {
            return Err(ExprError::IndexOutOfBounds {
                row,
                col,
                shape: self.shape(),
            });
        }
        self.data[row * self.cols + col] = value.into();
        Ok(())
    }

    /// Copy of the `rows × cols` block starting at `(row, col)`.
    pub fn block(&self, row: usize, col: usize, rows: usize, cols: usize) -> Result<Self, ExprError> {
        if row + rows > self.rows || col + cols > self.cols {
            return Err(ExprError::IndexOutOfBounds {
                row: row + rows,
                col: col + cols,
                shape: self.shape(),
            });
        }
        let data = (row..row + rows)
            .flat_map(|r| (col..col + cols).map(move |c| (r, c)))
            .map(|(r, c)| self.data[r * self.cols + c].clone())
            .collect();
        Ok(Self { rows, cols, data })
    }

    /// Overwrite the block starting at `(row, col)` with `block`.
    pub fn set_block(&mut self, row: usize, col: usize, block: &Expression) -> Result<(), ExprError> {
        if row + block.rows > self.rows || col + block.cols > self.cols {
            return Err(ExprError::IndexOutOfBounds {
                row: row + block.rows,
                col: col + block.cols,
                shape: self.shape(),
            });
        }
        for r in 0..block.rows {
            for c in 0..block.cols {
                self.data[(row + r) * self.cols + col + c] = block.data[r * block.cols + c].clone();
            }
        }
        Ok(())
    }

    pub fn transpose(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..self.cols {
            for r in 0..self.rows {
                data.push(self.data[r * self.cols + c].clone());
            }
        }
        Self {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    /// Apply `f` to every entry.
    pub fn map(&self, f: impl Fn(&Scalar) -> Scalar) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(f).collect(),
        }
    }

    /// Combine two equally shaped expressions entry by entry.
    pub fn zip_with(
        &self,
        other: &Expression,
        operation: &'static str,
        f: impl Fn(&Scalar, &Scalar) -> Scalar,
    ) -> Result<Self, ExprError> {
        self.expect_same_shape(other, operation)?;
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().zip(&other.data).map(|(a, b)| f(a, b)).collect(),
        })
    }

    pub fn elementwise_add(&self, other: &Expression) -> Result<Self, ExprError> {
        self.zip_with(other, "elementwise_add", |a, b| a + b)
    }

    pub fn elementwise_sub(&self, other: &Expression) -> Result<Self, ExprError> {
        self.zip_with(other, "elementwise_sub", |a, b| a - b)
    }

    /// Entrywise (Hadamard) product.
    pub fn elementwise_product(&self, other: &Expression) -> Result<Self, ExprError> {
        self.zip_with(other, "elementwise_product", |a, b| a * b)
    }

    /// Multiply every entry by `factor`.
    pub fn scale(&self, factor: &Scalar) -> Self {
        self.map(|e| e * factor)
    }

    /// Matrix product.
    pub fn matmul(&self, other: &Expression) -> Result<Self, ExprError> {
        if self.cols != other.rows {
            return Err(ExprError::ShapeMismatch {
                operation: "matmul",
                lhs: self.shape(),
                rhs: other.shape(),
            });
        }
        let mut data = Vec::with_capacity(self.rows * other.cols);
        for r in 0..self.rows {
            for c in 0..other.cols {
                let mut acc = Scalar::zero();
                for k in 0..self.cols {
                    acc = acc + &self.data[r * self.cols + k] * &other.data[k * other.cols + c];
                }
                data.push(acc);
            }
        }
        Ok(Self {
            rows: self.rows,
            cols: other.cols,
            data,
        })
    }

    /// Inner product of two vectors with the same number of entries.
    pub fn dot(&self, other: &Expression) -> Result<Scalar, ExprError> {
        if !self.is_vector() || !other.is_vector() || self.len() != other.len() {
            return Err(ExprError::ShapeMismatch {
                operation: "dot",
                lhs: self.shape(),
                rhs: other.shape(),
            });
        }
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .fold(Scalar::zero(), |acc, (a, b)| acc + a * b))
    }

    /// Cross product of two 3-vectors, or of two homogeneous 4-vectors whose
    /// last entry is ignored (the result then gets a trailing 0).
    pub fn cross(&self, other: &Expression) -> Result<Self, ExprError> {
        let n = self.len();
        if !self.is_vector() || !other.is_vector() || n != other.len() || !(n == 3 || n == 4) {
            return Err(ExprError::ShapeMismatch {
                operation: "cross",
                lhs: self.shape(),
                rhs: other.shape(),
            });
        }
        let (u, v) = (&self.data, &other.data);
        let mut out = vec![
            &u[1] * &v[2] - &u[2] * &v[1],
            &u[2] * &v[0] - &u[0] * &v[2],
            &u[0] * &v[1] - &u[1] * &v[0],
        ];
        if n == 4 {
            out.push(Scalar::zero());
        }
        Ok(Self::column_from(out))
    }

    /// Euclidean (Frobenius) norm.
    pub fn norm(&self) -> Scalar {
        self.data
            .iter()
            .fold(Scalar::zero(), |acc, e| acc + e * e)
            .sqrt()
    }

    /// Sum of the diagonal of a square matrix.
    pub fn trace(&self) -> Result<Scalar, ExprError> {
        if self.rows != self.cols {
            return Err(ExprError::ShapeMismatch {
                operation: "trace",
                lhs: self.shape(),
                rhs: (self.rows, self.rows),
            });
        }
        Ok((0..self.rows).fold(Scalar::zero(), |acc, i| acc + &self.data[i * self.cols + i]))
    }

    /// Evaluate every entry, sharing one memo table across entries.
    ///
    /// Returns row-major values.
    pub fn evaluate(&self, bindings: &HashMap<&str, f64>) -> Result<Vec<f64>, ExprError> {
        let mut evaluator = Evaluator::new(bindings);
        self.data.iter().map(|e| evaluator.eval(e)).collect()
    }

    pub(crate) fn expect_same_shape(&self, other: &Expression, operation: &'static str) -> Result<(), ExprError> {
        if self.shape() != other.shape() {
            return Err(ExprError::ShapeMismatch {
                operation,
                lhs: self.shape(),
                rhs: other.shape(),
            });
        }
        Ok(())
    }
}

/// Name given to entry `(row, col)` of a symbol matrix called `name`.
pub fn element_name(name: &str, row: usize, col: usize) -> String {
    format!("{name}[{row},{col}]")
}

impl From<Scalar> for Expression {
    fn from(value: Scalar) -> Self {
        Expression::scalar(value)
    }
}

impl Neg for &Expression {
    type Output = Expression;
    fn neg(self) -> Expression {
        self.map(|e| -e)
    }
}

impl Neg for Expression {
    type Output = Expression;
    fn neg(self) -> Expression {
        -&self
    }
}

impl Mul<&Scalar> for &Expression {
    type Output = Expression;
    fn mul(self, rhs: &Scalar) -> Expression {
        self.scale(rhs)
    }
}

impl Mul<f64> for &Expression {
    type Output = Expression;
    fn mul(self, rhs: f64) -> Expression {
        self.scale(&Scalar::constant(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(e: &Expression) -> Vec<f64> {
        e.evaluate(&HashMap::new()).unwrap()
    }

    fn c(v: f64) -> Scalar {
        Scalar::constant(v)
    }

    #[test]
    fn new_rejects_wrong_length() {
        let err = Expression::new(2, 2, vec![c(1.0)]).unwrap_err();
        assert!(matches!(err, ExprError::InvalidLength { expected: 4, actual: 1, .. }));
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let ok = Expression::from_rows(vec![vec![c(1.0), c(2.0)], vec![c(3.0), c(4.0)]]).unwrap();
        assert_eq!(ok.shape(), (2, 2));
        assert!(Expression::from_rows(vec![vec![c(1.0), c(2.0)], vec![c(3.0)]]).is_err());
    }

    #[test]
    fn matmul_checks_inner_dimension() {
        let a = Expression::zeros(2, 3);
        let b = Expression::zeros(2, 3);
        assert!(matches!(
            a.matmul(&b),
            Err(ExprError::ShapeMismatch { operation: "matmul", .. })
        ));
        assert_eq!(a.matmul(&b.transpose()).unwrap().shape(), (2, 2));
    }

    #[test]
    fn matmul_values() {
        let a = Expression::from_array([[c(1.0), c(2.0)], [c(3.0), c(4.0)]]);
        let b = Expression::from_array([[c(5.0), c(6.0)], [c(7.0), c(8.0)]]);
        assert_eq!(numeric(&a.matmul(&b).unwrap()), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn elementwise_ops_require_equal_shapes() {
        let a = Expression::zeros(3, 1);
        let b = Expression::zeros(1, 3);
        assert!(a.elementwise_add(&b).is_err());
        assert!(a.elementwise_product(&b.transpose()).is_ok());
    }

    #[test]
    fn cross_of_homogeneous_vectors_appends_zero() {
        let x = Expression::column([c(1.0), c(0.0), c(0.0), c(0.0)]);
        let y = Expression::column([c(0.0), c(1.0), c(0.0), c(0.0)]);
        assert_eq!(numeric(&x.cross(&y).unwrap()), vec![0.0, 0.0, 1.0, 0.0]);
        assert!(x.cross(&Expression::zeros(3, 1)).is_err());
    }

    #[test]
    fn dot_norm_trace() {
        let v = Expression::column([c(3.0), c(4.0)]);
        assert_eq!(v.dot(&v).unwrap().as_constant(), Some(25.0));
        assert_eq!(v.norm().as_constant(), Some(5.0));
        assert_eq!(Expression::eye(4).trace().unwrap().as_constant(), Some(4.0));
        assert!(v.trace().is_err());
    }

    #[test]
    fn block_and_set_block() {
        let mut m = Expression::eye(4);
        let b = m.block(0, 0, 3, 3).unwrap();
        assert_eq!(b.shape(), (3, 3));
        m.set_block(0, 3, &Expression::column([c(1.0), c(2.0), c(3.0)])).unwrap();
        assert_eq!(numeric(&m.block(0, 3, 4, 1).unwrap()), vec![1.0, 2.0, 3.0, 1.0]);
        assert!(m.block(2, 2, 3, 3).is_err());
    }

    #[test]
    fn symbols_are_named_by_position() {
        let m = Expression::symbols("m", 2, 2);
        assert_eq!(m.get(1, 0).unwrap().as_symbol(), Some("m[1,0]"));
    }

    #[test]
    fn to_scalar_only_for_one_by_one() {
        assert!(Expression::zeros(2, 1).to_scalar().is_err());
        assert!(Expression::scalar(1.0).to_scalar().is_ok());
    }
}
