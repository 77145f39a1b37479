//! One-shot compile-and-execute for numeric arguments.
//!
//! Handy in tests and tools: describe the computation as a closure over
//! symbolic arguments, hand in numbers, get numbers back.  The function is
//! compiled fresh on every call and never cached.

use kinesym_expr::{ExprError, Expression};

use crate::CompileError;
use crate::function::CompiledFunction;
use crate::parameter::Parameter;

/// A numeric argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Scalar(f64),
    /// Column vector.
    Vector(Vec<f64>),
    /// Row-major matrix.
    Matrix { rows: usize, cols: usize, data: Vec<f64> },
}

impl Argument {
    fn parameter(&self, name: String) -> Parameter {
        match self {
            Self::Scalar(_) => Parameter::scalar(name),
            Self::Vector(v) => Parameter::matrix(name, v.len(), 1),
            Self::Matrix { rows, cols, .. } => Parameter::matrix(name, *rows, *cols),
        }
    }

    fn values(&self) -> &[f64] {
        match self {
            Self::Scalar(v) => std::slice::from_ref(v),
            Self::Vector(v) => v,
            Self::Matrix { data, .. } => data,
        }
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<Vec<f64>> for Argument {
    fn from(v: Vec<f64>) -> Self {
        Self::Vector(v)
    }
}

/// Result of [`compile_and_execute`], shaped after the returned expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// 1×1 result.
    Scalar(f64),
    /// n×1 result.
    Vector(Vec<f64>),
    Matrix { rows: usize, cols: usize, data: Vec<f64> },
}

/// Build the expression `f` over symbolic stand-ins for `args`, compile it,
/// evaluate it once on `args` and return the result.
///
/// Argument `i` is bound to a parameter named `arg{i}`: a scalar symbol for
/// [`Argument::Scalar`], an n×1 symbol matrix for vectors and a rows×cols
/// one for matrices.
///
/// # Errors
///
/// - [`CompileError::ArgumentShape`] when a matrix argument's data does not
///   match its declared shape.
/// - Any [`ExprError`] returned by `f`.
pub fn compile_and_execute<F>(f: F, args: &[Argument]) -> Result<Output, CompileError>
where
    F: FnOnce(&[Expression]) -> Result<Expression, ExprError>,
{
    let parameters: Vec<Parameter> = args
        .iter()
        .enumerate()
        .map(|(i, a)| a.parameter(format!("arg{i}")))
        .collect();

    let mut input = Vec::new();
    for (p, a) in parameters.iter().zip(args) {
        let values = a.values();
        if values.len() != p.len() {
            return Err(CompileError::ArgumentShape {
                name: p.name.clone(),
                expected: p.len(),
                actual: values.len(),
            });
        }
        input.extend_from_slice(values);
    }

    let symbolic: Vec<Expression> = parameters.iter().map(Parameter::expression).collect();
    let expression = f(&symbolic)?;
    let mut function = CompiledFunction::compile(&expression, &parameters)?;
    let data = function.call_flat(&input)?.to_vec();

    Ok(match expression.shape() {
        (1, 1) => Output::Scalar(data[0]),
        (_, 1) => Output::Vector(data),
        (rows, cols) => Output::Matrix { rows, cols, data },
    })
}
