//! Register tape: the executable form of a compiled function.
//!
//! [`Tape::compile`] runs three passes over a [`GraphDescription`]:
//!
//! 1. **Value numbering** – structurally equal instructions (commutative
//!    operands in canonical order) collapse into one value, and instructions
//!    whose operands are all constants are folded.
//! 2. **Liveness** – values not reachable from an output are dropped; every
//!    remaining value records the position of its last reader.
//! 3. **Register allocation** – a value's register is released after its
//!    last read and handed to the next definition, so the work buffer is as
//!    large as the peak number of simultaneously live values.  Output
//!    registers are never released.
//!
//! Execution is a single loop over [`Op`]s; it never allocates.

use std::collections::HashMap;

use kinesym_expr::{BinaryOp, UnaryOp};
use serde::{Deserialize, Serialize};

use crate::CompileError;
use crate::lower::{GraphDescription, Instruction};

/// Revision of the passes above.  Part of every cache key, so a change to
/// numbering, folding or allocation never reuses a tape built by an older
/// compiler.
pub const COMPILER_VERSION: u32 = 1;

/// One register-machine operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Load { dst: u32, input: u32 },
    /// Stored as raw bits so non-finite constants survive JSON.
    Const { dst: u32, bits: u64 },
    Unary { op: UnaryOp, dst: u32, src: u32 },
    Binary { op: BinaryOp, dst: u32, lhs: u32, rhs: u32 },
}

/// A compiled register program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tape {
    ops: Vec<Op>,
    registers: usize,
    outputs: Vec<u32>,
}

/// Structural identity of a value, used for numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ValueKey {
    Const(u64),
    Input(usize),
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
}

impl Tape {
    /// Compile a lowered graph.
    pub fn compile(graph: &GraphDescription) -> Self {
        let (values, outputs) = number_values(graph);
        let last_use = liveness(&values, &outputs);
        allocate(&values, &outputs, &last_use)
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Size of the work buffer.
    pub fn registers(&self) -> usize {
        self.registers
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn output_len(&self) -> usize {
        self.outputs.len()
    }

    /// Execute the tape.
    ///
    /// `work` must hold at least [`registers`](Self::registers) slots and the
    /// slices must match the layout checked by [`validate`](Self::validate).
    #[inline]
    pub fn run(&self, input: &[f64], work: &mut [f64], output: &mut [f64]) {
        for op in &self.ops {
            match *op {
                Op::Load { dst, input: slot } => work[dst as usize] = input[slot as usize],
                Op::Const { dst, bits } => work[dst as usize] = f64::from_bits(bits),
                Op::Unary { op, dst, src } => work[dst as usize] = op.apply(work[src as usize]),
                Op::Binary { op, dst, lhs, rhs } => {
                    work[dst as usize] = op.apply(work[lhs as usize], work[rhs as usize]);
                }
            }
        }
        for (out, &r) in output.iter_mut().zip(&self.outputs) {
            *out = work[r as usize];
        }
    }

    /// Check that every register is written before it is read and that all
    /// indices are in bounds, so [`run`](Self::run) cannot panic on a tape
    /// read back from disk.
    pub fn validate(&self, input_len: usize, output_len: usize) -> Result<(), CompileError> {
        let invalid = |msg: String| Err(CompileError::InvalidArtifact(msg));
        if self.outputs.len() != output_len {
            return invalid(format!("tape has {} outputs, expected {output_len}", self.outputs.len()));
        }
        let mut defined = vec![false; self.registers];
        let is_defined = |defined: &[bool], r: u32| defined.get(r as usize).copied().unwrap_or(false);
        for (i, op) in self.ops.iter().enumerate() {
            let (dst, reads): (u32, [Option<u32>; 2]) = match *op {
                Op::Load { dst, input } => {
                    if input as usize >= input_len {
                        return invalid(format!("op {i} loads input {input} of {input_len}"));
                    }
                    (dst, [None, None])
                }
                Op::Const { dst, .. } => (dst, [None, None]),
                Op::Unary { dst, src, .. } => (dst, [Some(src), None]),
                Op::Binary { dst, lhs, rhs, .. } => (dst, [Some(lhs), Some(rhs)]),
            };
            if let Some(r) = reads.into_iter().flatten().find(|&r| !is_defined(&defined, r)) {
                return invalid(format!("op {i} reads undefined register {r}"));
            }
            match defined.get_mut(dst as usize) {
                Some(slot) => *slot = true,
                None => return invalid(format!("op {i} writes register {dst} of {}", self.registers)),
            }
        }
        if let Some(r) = self.outputs.iter().find(|&&r| !is_defined(&defined, r)) {
            return invalid(format!("output register {r} is never written"));
        }
        Ok(())
    }
}

/// Pass 1: returns the numbered values in definition order and the value of
/// each output.
fn number_values(graph: &GraphDescription) -> (Vec<ValueKey>, Vec<usize>) {
    let mut values: Vec<ValueKey> = Vec::new();
    let mut numbering: HashMap<ValueKey, usize> = HashMap::new();
    let mut value_of = Vec::with_capacity(graph.instructions.len());

    let constant = |values: &[ValueKey], v: usize| match values[v] {
        ValueKey::Const(bits) => Some(f64::from_bits(bits)),
        _ => None,
    };

    for instruction in &graph.instructions {
        let key = match *instruction {
            Instruction::Constant(c) => ValueKey::Const(c.to_bits()),
            Instruction::Input(slot) => ValueKey::Input(slot),
            Instruction::Unary(op, x) => {
                let x = value_of[x];
                match constant(&values, x) {
                    Some(c) => ValueKey::Const(op.apply(c).to_bits()),
                    None => ValueKey::Unary(op, x),
                }
            }
            Instruction::Binary(op, a, b) => {
                let (a, b) = (value_of[a], value_of[b]);
                match (constant(&values, a), constant(&values, b)) {
                    (Some(x), Some(y)) => ValueKey::Const(op.apply(x, y).to_bits()),
                    _ if op.is_commutative() && b < a => ValueKey::Binary(op, b, a),
                    _ => ValueKey::Binary(op, a, b),
                }
            }
        };
        let v = *numbering.entry(key).or_insert_with(|| {
            values.push(key);
            values.len() - 1
        });
        value_of.push(v);
    }

    let outputs = graph.outputs.iter().map(|&i| value_of[i]).collect();
    (values, outputs)
}

/// Pass 2: position of the last reader of each value; `None` for dead values
/// and `Some(usize::MAX)` for outputs.
fn liveness(values: &[ValueKey], outputs: &[usize]) -> Vec<Option<usize>> {
    let mut last_use = vec![None; values.len()];
    for &o in outputs {
        last_use[o] = Some(usize::MAX);
    }
    // Readers come after their operands, so one backward sweep suffices.
    for v in (0..values.len()).rev() {
        if last_use[v].is_none() {
            continue;
        }
        for operand in operands(values[v]).into_iter().flatten() {
            if last_use[operand].is_none() {
                last_use[operand] = Some(v);
            }
        }
    }
    last_use
}

fn operands(key: ValueKey) -> [Option<usize>; 2] {
    match key {
        ValueKey::Const(_) | ValueKey::Input(_) => [None, None],
        ValueKey::Unary(_, x) => [Some(x), None],
        ValueKey::Binary(_, a, b) => [Some(a), Some(b)],
    }
}

/// Pass 3: emit ops with register reuse.
fn allocate(values: &[ValueKey], outputs: &[usize], last_use: &[Option<usize>]) -> Tape {
    let mut register_of: Vec<Option<u32>> = vec![None; values.len()];
    let mut free: Vec<u32> = Vec::new();
    let mut registers = 0u32;
    let mut ops = Vec::new();

    for (v, key) in values.iter().enumerate() {
        if last_use[v].is_none() {
            continue;
        }
        // Operands whose last reader is `v` can hand their register to `v`:
        // every op reads its operands before writing its destination.
        let mut reads = operands(*key);
        if reads[0] == reads[1] {
            reads[1] = None;
        }
        for operand in reads.into_iter().flatten() {
            if last_use[operand] == Some(v) {
                if let Some(r) = register_of[operand] {
                    free.push(r);
                }
            }
        }
        let dst = free.pop().unwrap_or_else(|| {
            registers += 1;
            registers - 1
        });
        register_of[v] = Some(dst);

        let reg = |operand: usize| register_of[operand].unwrap_or(0);
        ops.push(match *key {
            ValueKey::Const(bits) => Op::Const { dst, bits },
            ValueKey::Input(slot) => Op::Load { dst, input: slot as u32 },
            ValueKey::Unary(op, x) => Op::Unary { op, dst, src: reg(x) },
            ValueKey::Binary(op, a, b) => Op::Binary {
                op,
                dst,
                lhs: reg(a),
                rhs: reg(b),
            },
        });
    }

    let outputs = outputs
        .iter()
        .map(|&o| register_of[o].unwrap_or(0))
        .collect();
    Tape {
        ops,
        registers: registers as usize,
        outputs,
    }
}
