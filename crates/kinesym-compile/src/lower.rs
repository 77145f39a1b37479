//! Lowering of expression graphs into instruction lists.
//!
//! [`GraphDescription::lower`] walks the graph once, in post-order, keyed on
//! node identity, so a sub-graph shared through cloned handles becomes a
//! single instruction no matter how many paths reach it.  The resulting
//! description is plain data: it no longer borrows the expression and can be
//! hashed into a [`CacheKey`].

use std::collections::{HashMap, HashSet};
use std::fmt;

use kinesym_expr::{BinaryOp, Expression, Node, Scalar, UnaryOp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::CompileError;
use crate::parameter::{Parameter, ParameterShape};
use crate::tape::COMPILER_VERSION;

/// Bumped whenever the lowering or hashing scheme changes.
const KEY_DOMAIN: &[u8] = b"kinesym-graph/1";

/// One instruction; operands refer to earlier instructions by index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    Constant(f64),
    /// Flat input slot.
    Input(usize),
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
}

/// A lowered expression graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDescription {
    pub parameters: Vec<Parameter>,
    /// Output shape; outputs are row-major.
    pub shape: (usize, usize),
    pub instructions: Vec<Instruction>,
    /// Instruction index of each output entry.
    pub outputs: Vec<usize>,
}

impl GraphDescription {
    /// Lower `expression`, binding its symbols to `parameters`.
    ///
    /// # Errors
    ///
    /// - [`CompileError::DuplicateParameter`] when two parameters (or two
    ///   flattened matrix entries) share a name.
    /// - [`CompileError::UnknownSymbol`] when the graph uses a symbol no
    ///   parameter binds.
    pub fn lower(expression: &Expression, parameters: &[Parameter]) -> Result<Self, CompileError> {
        let slots = input_slots(parameters)?;

        let mut index: HashMap<usize, usize> = HashMap::new();
        let mut instructions = Vec::new();
        let mut outputs = Vec::with_capacity(expression.len());

        for root in expression.iter() {
            let mut stack: Vec<(&Scalar, bool)> = vec![(root, false)];
            while let Some((s, operands_done)) = stack.pop() {
                if index.contains_key(&s.id()) {
                    continue;
                }
                let instruction = match s.node() {
                    Node::Constant(v) => Instruction::Constant(*v),
                    Node::Symbol(name) => {
                        let slot = slots
                            .get(&**name)
                            .ok_or_else(|| CompileError::UnknownSymbol(name.to_string()))?;
                        Instruction::Input(*slot)
                    }
                    Node::Unary(op, x) => {
                        if !operands_done {
                            stack.push((s, true));
                            stack.push((x, false));
                            continue;
                        }
                        Instruction::Unary(*op, index[&x.id()])
                    }
                    Node::Binary(op, a, b) => {
                        if !operands_done {
                            stack.push((s, true));
                            stack.push((b, false));
                            stack.push((a, false));
                            continue;
                        }
                        Instruction::Binary(*op, index[&a.id()], index[&b.id()])
                    }
                };
                index.insert(s.id(), instructions.len());
                instructions.push(instruction);
            }
            outputs.push(index[&root.id()]);
        }

        Ok(Self {
            parameters: parameters.to_vec(),
            shape: expression.shape(),
            instructions,
            outputs,
        })
    }

    /// Length of the flat input vector.
    pub fn input_len(&self) -> usize {
        self.parameters.iter().map(Parameter::len).sum()
    }

    /// Content hash over the tape compiler revision, parameter layout, output
    /// shape and instructions.
    pub fn key(&self) -> CacheKey {
        self.key_for_compiler(COMPILER_VERSION)
    }

    fn key_for_compiler(&self, compiler_version: u32) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(KEY_DOMAIN);
        hasher.update(compiler_version.to_le_bytes());

        hasher.update((self.parameters.len() as u64).to_le_bytes());
        for p in &self.parameters {
            hasher.update((p.name.len() as u64).to_le_bytes());
            hasher.update(p.name.as_bytes());
            match p.shape {
                ParameterShape::Scalar => hasher.update([0u8]),
                ParameterShape::Matrix { rows, cols } => {
                    hasher.update([1u8]);
                    hasher.update((rows as u64).to_le_bytes());
                    hasher.update((cols as u64).to_le_bytes());
                }
            }
        }

        hasher.update((self.shape.0 as u64).to_le_bytes());
        hasher.update((self.shape.1 as u64).to_le_bytes());

        hasher.update((self.instructions.len() as u64).to_le_bytes());
        for instruction in &self.instructions {
            match *instruction {
                Instruction::Constant(v) => {
                    hasher.update([0u8]);
                    hasher.update(v.to_bits().to_le_bytes());
                }
                Instruction::Input(slot) => {
                    hasher.update([1u8]);
                    hasher.update((slot as u64).to_le_bytes());
                }
                Instruction::Unary(op, x) => {
                    hasher.update([2u8, op as u8]);
                    hasher.update((x as u64).to_le_bytes());
                }
                Instruction::Binary(op, a, b) => {
                    hasher.update([3u8, op as u8]);
                    hasher.update((a as u64).to_le_bytes());
                    hasher.update((b as u64).to_le_bytes());
                }
            }
        }

        hasher.update((self.outputs.len() as u64).to_le_bytes());
        for &o in &self.outputs {
            hasher.update((o as u64).to_le_bytes());
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        CacheKey(bytes)
    }
}

/// Symbol name → flat input slot.
fn input_slots(parameters: &[Parameter]) -> Result<HashMap<String, usize>, CompileError> {
    let mut declared = HashSet::new();
    for p in parameters {
        if !declared.insert(p.name.as_str()) {
            return Err(CompileError::DuplicateParameter(p.name.clone()));
        }
    }
    let mut slots = HashMap::new();
    for (slot, name) in parameters.iter().flat_map(Parameter::element_names).enumerate() {
        if slots.contains_key(&name) {
            return Err(CompileError::DuplicateParameter(name));
        }
        slots.insert(name, slot);
    }
    Ok(slots)
}

// ────────────────────────────────────────────────────────────────────────────
// CacheKey
// ────────────────────────────────────────────────────────────────────────────

/// SHA-256 of a [`GraphDescription`]; displayed and persisted as lowercase
/// hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for CacheKey {
    type Error = String;

    fn try_from(hex: String) -> Result<Self, Self::Error> {
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(format!("expected 64 hex digits, got '{hex}'"));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|e| format!("invalid hex in '{hex}': {e}"))?;
        }
        Ok(Self(bytes))
    }
}
