//! `kinesym-collision` – per-cycle collision bookkeeping.
//!
//! Raw contacts reported by collision detection are transformed into the
//! frames the constraint layer needs and sorted into bounded, per-joint
//! proximity lists.  Every query returns data of a fixed shape, padded with
//! sentinel entries, so compiled constraint functions never see a varying
//! number of collisions.
//!
//! # Modules
//!
//! - [`contact`] – [`Contact`][contact::Contact] (the ingestion record) and
//!   [`Collision`][contact::Collision] (a contact resolved against the
//!   kinematic chain).
//! - [`kinematics`] – the [`KinematicChain`][kinematics::KinematicChain]
//!   forward-kinematics oracle implemented by the robot model.
//! - [`proximity`] – [`ProximityList`][proximity::ProximityList]: a fixed
//!   capacity list sorted by distance.
//! - [`registry`] – [`CollisionRegistry`][registry::CollisionRegistry]:
//!   ingestion and queries for one control cycle.
//!
//! # Example
//!
//! ```rust
//! use kinesym_collision::{
//!     CollisionError, CollisionRegistry, Contact, ControlledJoint, KinematicChain,
//! };
//! use nalgebra::Matrix4;
//!
//! struct Arm;
//!
//! impl KinematicChain for Arm {
//!     fn controlled_parent_joint(&self, link: &str) -> Result<ControlledJoint, CollisionError> {
//!         match link {
//!             "gripper" => Ok(ControlledJoint::new("wrist_joint", "wrist")),
//!             other => Err(CollisionError::UnknownLink(other.to_string())),
//!         }
//!     }
//!
//!     fn compute_fk(&self, _root: &str, _tip: &str) -> Result<Matrix4<f64>, CollisionError> {
//!         Ok(Matrix4::identity())
//!     }
//! }
//!
//! let arm = Arm;
//! let mut registry = CollisionRegistry::new(&arm, "base", "map", 3).unwrap();
//! registry
//!     .register(Contact::new("gripper", "table", "top", [0.0; 3], [0.0, 0.0, -0.02], [0.0, 0.0, 1.0], 0.02))
//!     .unwrap();
//!
//! let list = registry.get_external_collisions("wrist_joint");
//! assert_eq!(list.len(), 3);
//! assert_eq!(registry.get_count("wrist_joint"), 1);
//! assert_eq!(list.entries()[0].distance(), 0.02);
//! assert!(list.entries()[1].is_sentinel());
//! ```

pub mod contact;
pub mod kinematics;
pub mod proximity;
pub mod registry;

pub use contact::{Collision, Contact, ROW_LEN, SENTINEL_DISTANCE};
pub use kinematics::{ControlledJoint, KinematicChain};
pub use proximity::ProximityList;
pub use registry::CollisionRegistry;

use thiserror::Error;

/// Errors raised while resolving contacts against the kinematic chain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollisionError {
    #[error("unknown link '{0}'")]
    UnknownLink(String),

    #[error("link '{0}' has no controlled parent joint")]
    NoControlledJoint(String),

    #[error("cannot resolve transform {root} -> {tip}")]
    UnresolvedTransform { root: String, tip: String },

    #[error("contact between '{link_a}' and '{body_b}' has non-finite distance {distance}")]
    NonFiniteDistance {
        link_a: String,
        body_b: String,
        distance: f64,
    },
}
