//! [`CollisionRegistry`] – one cycle of collision bookkeeping.
//!
//! A registry is built fresh every control cycle: contacts are registered
//! through `&mut self`, then the constraint layer queries it through
//! `&self`.  Nothing survives into the next cycle.
//!
//! # Frames
//!
//! For a contact on link `a`, the registry resolves the controlled joint
//! moving `a` and that joint's child link `c`, then stores
//!
//! - `c_P_a = c_T_root · root_T_world · world_P_a`
//! - `root_P_b = root_T_world · world_P_b`
//! - `root_V_n = root_T_world · world_V_n`
//!
//! `root_T_world` is resolved once, in [`CollisionRegistry::new`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use nalgebra::{Matrix4, Point3, Vector3};
use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::CollisionError;
use crate::contact::{Collision, Contact};
use crate::kinematics::KinematicChain;
use crate::proximity::ProximityList;

/// `(link_a, body_b, link_b)`.
type PairKey = (String, String, String);

/// Per-joint proximity lists plus the closest contact per exact link pair.
pub struct CollisionRegistry<'k, K: KinematicChain + ?Sized> {
    kinematics: &'k K,
    robot_root: String,
    root_t_world: Matrix4<f64>,
    capacity: usize,
    external: HashMap<String, ProximityList>,
    closest_pair: HashMap<PairKey, Collision>,
    all: Vec<Collision>,
    default: OnceCell<Arc<ProximityList>>,
}

impl<'k, K: KinematicChain + ?Sized> CollisionRegistry<'k, K> {
    /// Start a cycle.  Every per-joint list holds exactly `capacity`
    /// entries.
    ///
    /// # Errors
    ///
    /// Propagates the oracle's failure to resolve `robot_root_T_world_root`.
    pub fn new(
        kinematics: &'k K,
        robot_root: impl Into<String>,
        world_root: &str,
        capacity: usize,
    ) -> Result<Self, CollisionError> {
        let robot_root = robot_root.into();
        let root_t_world = kinematics.compute_fk(&robot_root, world_root)?;
        Ok(Self {
            kinematics,
            robot_root,
            root_t_world,
            capacity,
            external: HashMap::new(),
            closest_pair: HashMap::new(),
            all: Vec::new(),
            default: OnceCell::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn robot_root(&self) -> &str {
        &self.robot_root
    }

    pub fn root_t_world(&self) -> &Matrix4<f64> {
        &self.root_t_world
    }

    /// Resolve `contact` and file it under its controlling joint and its
    /// exact link pair.
    ///
    /// # Errors
    ///
    /// [`CollisionError::NonFiniteDistance`] for a NaN or infinite distance,
    /// and oracle failures are propagated.  The registry is unchanged in
    /// either case.
    pub fn register(&mut self, contact: Contact) -> Result<(), CollisionError> {
        if !contact.distance.is_finite() {
            return Err(CollisionError::NonFiniteDistance {
                link_a: contact.link_a,
                body_b: contact.body_b,
                distance: contact.distance,
            });
        }
        let collision = self.resolve(contact)?;
        trace!(
            joint = %collision.joint,
            link_a = %collision.contact.link_a,
            body_b = %collision.contact.body_b,
            distance = collision.distance(),
            "registered collision"
        );

        let capacity = self.capacity;
        self.external
            .entry(collision.joint.clone())
            .or_insert_with(|| ProximityList::new(capacity))
            .insert(collision.clone());

        let key = (
            collision.contact.link_a.clone(),
            collision.contact.body_b.clone(),
            collision.contact.link_b.clone(),
        );
        match self.closest_pair.entry(key) {
            Entry::Occupied(mut closest) => {
                if collision.distance() < closest.get().distance() {
                    closest.insert(collision.clone());
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(collision.clone());
            }
        }

        self.all.push(collision);
        Ok(())
    }

    /// Register every contact of a cycle and log a summary.
    ///
    /// # Errors
    ///
    /// Stops at the first contact the oracle cannot resolve; contacts before
    /// it stay registered.
    pub fn register_all<I>(&mut self, contacts: I) -> Result<(), CollisionError>
    where
        I: IntoIterator<Item = Contact>,
    {
        for contact in contacts {
            self.register(contact)?;
        }
        debug!(
            collisions = self.all.len(),
            joints = self.external.len(),
            pairs = self.closest_pair.len(),
            closest = self.all.iter().map(Collision::distance).fold(f64::INFINITY, f64::min),
            "collision registry filled"
        );
        Ok(())
    }

    fn resolve(&self, contact: Contact) -> Result<Collision, CollisionError> {
        let controlled = self.kinematics.controlled_parent_joint(&contact.link_a)?;
        let link_t_root = self
            .kinematics
            .compute_fk(&controlled.child_link, &self.robot_root)?;
        let link_t_world = link_t_root * self.root_t_world;

        let a_p_a = transform_point(&link_t_world, &contact.position_on_a);
        let root_p_b = transform_point(&self.root_t_world, &contact.position_on_b);
        let root_v_n = transform_vector(&self.root_t_world, &contact.contact_normal);

        Ok(Collision::resolved(
            contact,
            controlled.joint,
            controlled.child_link,
            a_p_a,
            root_p_b,
            root_v_n,
        ))
    }

    /// The joint's proximity list, or the shared all-sentinel list when
    /// nothing was registered for it.
    pub fn get_external_collisions(&self, joint: &str) -> &ProximityList {
        match self.external.get(joint) {
            Some(list) => list,
            None => self.default_arc().as_ref(),
        }
    }

    /// The all-sentinel list returned for joints without contacts.
    pub fn default_collisions(&self) -> Arc<ProximityList> {
        Arc::clone(self.default_arc())
    }

    fn default_arc(&self) -> &Arc<ProximityList> {
        self.default
            .get_or_init(|| Arc::new(ProximityList::new(self.capacity)))
    }

    /// Number of real entries for `joint`, at most the capacity.
    pub fn get_count(&self, joint: &str) -> usize {
        self.external.get(joint).map_or(0, ProximityList::count)
    }

    /// Closest contact registered for exactly this link pair, or the
    /// sentinel.
    pub fn closest_for_pair(&self, link_a: &str, body_b: &str, link_b: &str) -> &Collision {
        self.closest_pair
            .get(&(link_a.to_string(), body_b.to_string(), link_b.to_string()))
            .unwrap_or(Collision::sentinel())
    }

    /// Every collision registered this cycle, in registration order.
    pub fn collisions(&self) -> impl Iterator<Item = &Collision> {
        self.all.iter()
    }

    /// Joints with at least one registered contact.
    pub fn joints(&self) -> impl Iterator<Item = &str> {
        self.external.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

fn transform_point(t: &Matrix4<f64>, p: &Point3<f64>) -> Point3<f64> {
    Point3::from((t * p.to_homogeneous()).xyz())
}

fn transform_vector(t: &Matrix4<f64>, v: &Vector3<f64>) -> Vector3<f64> {
    (t * v.to_homogeneous()).xyz()
}
