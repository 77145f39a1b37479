//! Forward-kinematics oracle.
//!
//! The registry never owns a robot model.  Whatever holds the kinematic tree
//! implements [`KinematicChain`] and is borrowed for the cycle.

use nalgebra::Matrix4;

use crate::CollisionError;

/// The joint that moves a link, and the link that joint moves directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlledJoint {
    pub joint: String,
    pub child_link: String,
}

impl ControlledJoint {
    pub fn new(joint: impl Into<String>, child_link: impl Into<String>) -> Self {
        Self {
            joint: joint.into(),
            child_link: child_link.into(),
        }
    }
}

/// Numeric forward kinematics at the current joint state.
pub trait KinematicChain {
    /// The closest controlled joint above `link` in the tree.
    ///
    /// # Errors
    ///
    /// [`CollisionError::UnknownLink`] or
    /// [`CollisionError::NoControlledJoint`].
    fn controlled_parent_joint(&self, link: &str) -> Result<ControlledJoint, CollisionError>;

    /// Homogeneous transform `root_T_tip`.
    ///
    /// # Errors
    ///
    /// [`CollisionError::UnresolvedTransform`] when either frame is unknown.
    fn compute_fk(&self, root: &str, tip: &str) -> Result<Matrix4<f64>, CollisionError>;
}
