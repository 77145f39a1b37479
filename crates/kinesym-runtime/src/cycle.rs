//! Per-cycle bridge from collision bookkeeping to compiled functions.
//!
//! Each collision-avoiding joint contributes two parameters to a compiled
//! function: a `capacity × 10` block `collisions/<joint>` holding one
//! [`Collision::row`][kinesym_collision::Collision::row] per list entry, and a scalar `collisions/<joint>/count`
//! with the number of real entries.  Their shapes never change, so one
//! compiled function serves every cycle regardless of how many contacts
//! were reported.

use std::collections::HashMap;
use std::ops::Range;

use kinesym_collision::{CollisionRegistry, KinematicChain, ProximityList, ROW_LEN};
use kinesym_compile::{CompileError, CompiledFunction, FunctionCache, Parameter};
use kinesym_expr::Expression;
use tracing::{debug, trace};

use crate::RuntimeError;

/// Name of the collision block parameter of `joint`.
pub fn block_name(joint: &str) -> String {
    format!("collisions/{joint}")
}

/// Name of the real-entry count parameter of `joint`.
pub fn count_name(joint: &str) -> String {
    format!("collisions/{joint}/count")
}

/// The block and count parameters of `joint`, in input order.
pub fn collision_parameters(joint: &str, capacity: usize) -> [Parameter; 2] {
    [
        Parameter::matrix(block_name(joint), capacity, ROW_LEN),
        Parameter::scalar(count_name(joint)),
    ]
}

/// Flatten `list` row-major into `block` (`list.len() × 10` values).
pub fn write_collisions(list: &ProximityList, block: &mut [f64]) {
    for (row, collision) in block.chunks_exact_mut(ROW_LEN).zip(list.iter()) {
        row.copy_from_slice(&collision.row());
    }
}

#[derive(Debug, Clone)]
struct CollisionSlots {
    joint: String,
    block: Range<usize>,
    count: usize,
}

/// A compiled function whose inputs are joint state plus the collision
/// blocks of a fixed set of joints.
#[derive(Debug, Clone)]
pub struct CycleEvaluator {
    function: CompiledFunction,
    state: Vec<Parameter>,
    collisions: Vec<CollisionSlots>,
    capacity: usize,
}

impl CycleEvaluator {
    /// Compile (or load from `cache`) `expression` over `state` followed by
    /// the collision parameters of every joint in `joints`.
    ///
    /// Build the collision terms of `expression` from
    /// [`collision_parameters`]`(joint, capacity)`.
    pub fn new(
        cache: &FunctionCache,
        expression: &Expression,
        state: &[Parameter],
        joints: &[&str],
        capacity: usize,
    ) -> Result<Self, RuntimeError> {
        let parameters: Vec<Parameter> = state
            .iter()
            .cloned()
            .chain(joints.iter().flat_map(|j| collision_parameters(j, capacity)))
            .collect();
        let function = cache.get_or_compile(expression, &parameters)?;

        let collisions = joints
            .iter()
            .map(|&joint| {
                let block = function
                    .parameter_range(&block_name(joint))
                    .ok_or_else(|| CompileError::MissingArgument(block_name(joint)))?;
                let count = function
                    .parameter_range(&count_name(joint))
                    .ok_or_else(|| CompileError::MissingArgument(count_name(joint)))?
                    .start;
                Ok(CollisionSlots {
                    joint: joint.to_string(),
                    block,
                    count,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        debug!(
            key = %function.key(),
            inputs = function.input_len(),
            joints = joints.len(),
            capacity,
            "cycle evaluator ready"
        );
        Ok(Self {
            function,
            state: state.to_vec(),
            collisions,
            capacity,
        })
    }

    pub fn function(&self) -> &CompiledFunction {
        &self.function
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write `state` and the registry's collision lists into the inputs and
    /// evaluate.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::CapacityMismatch`] when the registry was built with
    ///   another list size.
    /// - [`CompileError::MissingArgument`] / [`CompileError::ArgumentShape`]
    ///   for missing or misshapen state values.
    pub fn run<K>(
        &mut self,
        state: &HashMap<&str, &[f64]>,
        registry: &CollisionRegistry<'_, K>,
    ) -> Result<&[f64], RuntimeError>
    where
        K: KinematicChain + ?Sized,
    {
        if registry.capacity() != self.capacity {
            return Err(RuntimeError::CapacityMismatch {
                expected: self.capacity,
                actual: registry.capacity(),
            });
        }

        for p in &self.state {
            let values = state
                .get(p.name())
                .ok_or_else(|| CompileError::MissingArgument(p.name.clone()))?;
            let range = self
                .function
                .parameter_range(p.name())
                .ok_or_else(|| CompileError::MissingArgument(p.name.clone()))?;
            if values.len() != range.len() {
                return Err(CompileError::ArgumentShape {
                    name: p.name.clone(),
                    expected: range.len(),
                    actual: values.len(),
                }
                .into());
            }
            self.function.input_mut()[range].copy_from_slice(values);
        }

        for slots in &self.collisions {
            let list = registry.get_external_collisions(&slots.joint);
            let input = self.function.input_mut();
            write_collisions(list, &mut input[slots.block.clone()]);
            input[slots.count] = list.count() as f64;
            trace!(joint = %slots.joint, count = list.count(), "wrote collision block");
        }

        Ok(self.function.evaluate())
    }
}

/// Distance column of a collision block expression.
pub fn distances(block: &Expression) -> Result<Expression, RuntimeError> {
    Ok(block.block(0, 0, block.rows(), 1)?)
}

/// The row layout used by [`write_collisions`], for building expressions
/// that index into a block.
pub const DISTANCE: usize = 0;
/// First of three columns: point on a in the controlling joint's child link.
pub const A_P_A: usize = 1;
/// First of three columns: point on b in the robot root frame.
pub const ROOT_P_B: usize = 4;
/// First of three columns: contact normal in the robot root frame.
pub const ROOT_V_N: usize = 7;

#[cfg(test)]
mod tests {
    use super::*;
    use kinesym_collision::{Collision, CollisionError, Contact, ControlledJoint};
    use nalgebra::Matrix4;

    struct Gripper;

    impl KinematicChain for Gripper {
        fn controlled_parent_joint(&self, link: &str) -> Result<ControlledJoint, CollisionError> {
            match link {
                "gripper" => Ok(ControlledJoint::new("elbow", "forearm")),
                other => Err(CollisionError::UnknownLink(other.to_string())),
            }
        }

        fn compute_fk(&self, _root: &str, _tip: &str) -> Result<Matrix4<f64>, CollisionError> {
            Ok(Matrix4::identity())
        }
    }

    fn contact(distance: f64) -> Contact {
        Contact::new("gripper", "table", "top", [0.1, 0.2, 0.3], [0.4, 0.5, 0.6], [0.0, 0.0, 1.0], distance)
    }

    /// `[2q, min distance(elbow), count(elbow), min distance(shoulder)]`
    fn evaluator(dir: &std::path::Path, capacity: usize) -> CycleEvaluator {
        let q = Parameter::scalar("q");
        let closest = |joint: &str| {
            let [block, count] = collision_parameters(joint, capacity);
            let d = distances(&block.expression()).unwrap();
            let min = d.iter().skip(1).fold(d.entries()[0].clone(), |m, x| m.min(x));
            (min, count.expression().to_scalar().unwrap())
        };
        let (elbow_min, elbow_count) = closest("elbow");
        let (shoulder_min, _) = closest("shoulder");
        let e = Expression::column([
            q.expression().to_scalar().unwrap() * 2.0,
            elbow_min,
            elbow_count,
            shoulder_min,
        ]);
        CycleEvaluator::new(&FunctionCache::new(dir), &e, &[q], &["elbow", "shoulder"], capacity).unwrap()
    }

    #[test]
    fn registry_output_feeds_the_compiled_function() {
        let dir = tempfile::tempdir().unwrap();
        let mut eval = evaluator(dir.path(), 3);
        let chain = Gripper;
        let mut registry = CollisionRegistry::new(&chain, "base", "map", 3).unwrap();
        registry.register_all([contact(0.3), contact(0.1)]).unwrap();

        let out = eval.run(&HashMap::from([("q", &[1.5][..])]), &registry).unwrap();
        assert_eq!(out, &[3.0, 0.1, 2.0, 100.0]);
    }

    #[test]
    fn the_same_function_serves_every_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut eval = evaluator(dir.path(), 2);
        let chain = Gripper;
        let state = HashMap::from([("q", &[0.0][..])]);

        let mut busy = CollisionRegistry::new(&chain, "base", "map", 2).unwrap();
        busy.register_all([contact(0.4), contact(0.05), contact(0.2)]).unwrap();
        assert_eq!(eval.run(&state, &busy).unwrap(), &[0.0, 0.05, 2.0, 100.0]);

        let quiet = CollisionRegistry::new(&chain, "base", "map", 2).unwrap();
        assert_eq!(eval.run(&state, &quiet).unwrap(), &[0.0, 100.0, 0.0, 100.0]);
    }

    #[test]
    fn capacity_and_state_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut eval = evaluator(dir.path(), 3);
        let chain = Gripper;

        let wrong = CollisionRegistry::new(&chain, "base", "map", 4).unwrap();
        assert!(matches!(
            eval.run(&HashMap::from([("q", &[0.0][..])]), &wrong),
            Err(RuntimeError::CapacityMismatch { expected: 3, actual: 4 })
        ));

        let registry = CollisionRegistry::new(&chain, "base", "map", 3).unwrap();
        assert!(matches!(
            eval.run(&HashMap::new(), &registry),
            Err(RuntimeError::Compile(CompileError::MissingArgument(_)))
        ));
        assert!(matches!(
            eval.run(&HashMap::from([("q", &[0.0, 1.0][..])]), &registry),
            Err(RuntimeError::Compile(CompileError::ArgumentShape { .. }))
        ));
    }

    #[test]
    fn rows_follow_the_column_layout() {
        let chain = Gripper;
        let mut registry = CollisionRegistry::new(&chain, "base", "map", 2).unwrap();
        registry.register(contact(0.25)).unwrap();
        let list = registry.get_external_collisions("elbow");

        let mut block = vec![f64::NAN; 2 * ROW_LEN];
        write_collisions(list, &mut block);
        assert_eq!(block[DISTANCE], 0.25);
        assert_eq!(&block[A_P_A..A_P_A + 3], &[0.1, 0.2, 0.3]);
        assert_eq!(&block[ROOT_P_B..ROOT_P_B + 3], &[0.4, 0.5, 0.6]);
        assert_eq!(&block[ROOT_V_N..ROOT_V_N + 3], &[0.0, 0.0, 1.0]);
        assert_eq!(&block[ROW_LEN..], &Collision::sentinel().row());
    }
}
