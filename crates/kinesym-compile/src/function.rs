//! Compiled functions with bound buffers.

use std::collections::HashMap;
use std::ops::Range;
use std::time::Instant;

use kinesym_expr::Expression;
use tracing::debug;

use crate::CompileError;
use crate::lower::{CacheKey, GraphDescription};
use crate::parameter::Parameter;
use crate::tape::Tape;

/// A compiled expression with exclusively owned input, work and output
/// buffers.
///
/// The buffers are sized once; invoking the function only overwrites the
/// inputs and re-runs the tape, so the per-cycle path never allocates.
/// Invocation takes `&mut self`: one caller at a time.  Clone one instance
/// per caller for concurrent use.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    key: CacheKey,
    parameters: Vec<Parameter>,
    /// Start of each parameter in `input`.
    offsets: Vec<usize>,
    shape: (usize, usize),
    tape: Tape,
    input: Vec<f64>,
    work: Vec<f64>,
    output: Vec<f64>,
}

impl CompiledFunction {
    /// Compile `expression` over `parameters` (declared order is the input
    /// order).
    ///
    /// # Errors
    ///
    /// Lowering errors: symbols no parameter binds and duplicate parameter
    /// names.
    pub fn compile(expression: &Expression, parameters: &[Parameter]) -> Result<Self, CompileError> {
        Ok(Self::from_graph(&GraphDescription::lower(expression, parameters)?))
    }

    /// Compile an already lowered graph.
    pub fn from_graph(graph: &GraphDescription) -> Self {
        let started = Instant::now();
        let key = graph.key();
        let tape = Tape::compile(graph);
        debug!(
            key = %key,
            instructions = graph.instructions.len(),
            ops = tape.len(),
            registers = tape.registers(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "compiled expression graph"
        );
        Self::from_parts(key, graph.parameters.clone(), graph.shape, tape)
    }

    pub(crate) fn from_parts(key: CacheKey, parameters: Vec<Parameter>, shape: (usize, usize), tape: Tape) -> Self {
        let offsets = parameters
            .iter()
            .scan(0, |next, p| {
                let start = *next;
                *next += p.len();
                Some(start)
            })
            .collect();
        let input_len = parameters.iter().map(Parameter::len).sum();
        Self {
            key,
            parameters,
            offsets,
            shape,
            input: vec![0.0; input_len],
            work: vec![0.0; tape.registers()],
            output: vec![0.0; shape.0 * shape.1],
            tape,
        }
    }

    /// Content hash of the source graph.
    pub fn key(&self) -> CacheKey {
        self.key
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Output shape; [`output`](Self::output) is row-major.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn input_len(&self) -> usize {
        self.input.len()
    }

    /// Slots of `name` in the flat input vector.
    pub fn parameter_range(&self, name: &str) -> Option<Range<usize>> {
        self.parameters
            .iter()
            .zip(&self.offsets)
            .find(|(p, _)| p.name == name)
            .map(|(p, &start)| start..start + p.len())
    }

    /// Invoke with named arguments.
    ///
    /// Every declared parameter must be present with exactly as many values
    /// as it has entries (row-major for matrices).  Extra names are ignored.
    ///
    /// # Errors
    ///
    /// [`CompileError::MissingArgument`] or [`CompileError::ArgumentShape`];
    /// the inputs are left partially written in that case.
    pub fn call(&mut self, args: &HashMap<&str, &[f64]>) -> Result<&[f64], CompileError> {
        for (p, &start) in self.parameters.iter().zip(&self.offsets) {
            let values = args
                .get(p.name.as_str())
                .ok_or_else(|| CompileError::MissingArgument(p.name.clone()))?;
            if values.len() != p.len() {
                return Err(CompileError::ArgumentShape {
                    name: p.name.clone(),
                    expected: p.len(),
                    actual: values.len(),
                });
            }
            self.input[start..start + p.len()].copy_from_slice(values);
        }
        Ok(self.evaluate())
    }

    /// Invoke with an already flattened input vector.
    pub fn call_flat(&mut self, input: &[f64]) -> Result<&[f64], CompileError> {
        if input.len() != self.input.len() {
            return Err(CompileError::ArgumentShape {
                name: "<flat input>".to_string(),
                expected: self.input.len(),
                actual: input.len(),
            });
        }
        self.input.copy_from_slice(input);
        Ok(self.evaluate())
    }

    /// The bound input buffer, for callers that write inputs in place.
    pub fn input_mut(&mut self) -> &mut [f64] {
        &mut self.input
    }

    /// Re-run on the current contents of the input buffer.
    pub fn evaluate(&mut self) -> &[f64] {
        self.tape.run(&self.input, &mut self.work, &mut self.output);
        &self.output
    }

    /// Result of the most recent evaluation.
    pub fn output(&self) -> &[f64] {
        &self.output
    }
}
