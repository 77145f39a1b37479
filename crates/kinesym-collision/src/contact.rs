//! Contact records and resolved collisions.

use nalgebra::{Point3, Vector3};
use once_cell::sync::Lazy;

/// Distance reported by padding entries.
pub const SENTINEL_DISTANCE: f64 = 100.0;

/// Number of values in [`Collision::row`].
pub const ROW_LEN: usize = 10;

static SENTINEL: Lazy<Collision> = Lazy::new(|| Collision {
    contact: Contact::new("", "", "", [0.0; 3], [0.0; 3], [0.0, 0.0, 1.0], SENTINEL_DISTANCE),
    joint: String::new(),
    link: String::new(),
    a_p_a: Point3::origin(),
    root_p_b: Point3::origin(),
    root_v_n: Vector3::z(),
    sentinel: true,
});

/// A closest-point pair reported by collision detection, in the world frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    /// Robot link.
    pub link_a: String,
    /// Body the robot link is close to.
    pub body_b: String,
    /// Link of `body_b`.
    pub link_b: String,
    pub position_on_a: Point3<f64>,
    pub position_on_b: Point3<f64>,
    /// Points from b towards a.
    pub contact_normal: Vector3<f64>,
    /// Signed; negative when penetrating.
    pub distance: f64,
}

impl Contact {
    pub fn new(
        link_a: impl Into<String>,
        body_b: impl Into<String>,
        link_b: impl Into<String>,
        position_on_a: [f64; 3],
        position_on_b: [f64; 3],
        contact_normal: [f64; 3],
        distance: f64,
    ) -> Self {
        Self {
            link_a: link_a.into(),
            body_b: body_b.into(),
            link_b: link_b.into(),
            position_on_a: Point3::from(position_on_a),
            position_on_b: Point3::from(position_on_b),
            contact_normal: Vector3::from(contact_normal),
            distance,
        }
    }
}

/// A [`Contact`] resolved against the kinematic chain.
///
/// The point on a is expressed in the child link of the controlling joint,
/// so it stays fixed while that joint moves; the point on b and the normal
/// are expressed in the robot root frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Collision {
    pub contact: Contact,
    /// Controlled joint that moves `contact.link_a`.
    pub joint: String,
    /// Child link of `joint`.
    pub link: String,
    pub a_p_a: Point3<f64>,
    pub root_p_b: Point3<f64>,
    pub root_v_n: Vector3<f64>,
    sentinel: bool,
}

impl Collision {
    pub(crate) fn resolved(
        contact: Contact,
        joint: String,
        link: String,
        a_p_a: Point3<f64>,
        root_p_b: Point3<f64>,
        root_v_n: Vector3<f64>,
    ) -> Self {
        Self {
            contact,
            joint,
            link,
            a_p_a,
            root_p_b,
            root_v_n,
            sentinel: false,
        }
    }

    /// The shared padding entry: distance 100, points at the origin, normal
    /// +z.
    pub fn sentinel() -> &'static Collision {
        &SENTINEL
    }

    pub fn is_sentinel(&self) -> bool {
        self.sentinel
    }

    pub fn distance(&self) -> f64 {
        self.contact.distance
    }

    /// `[distance, a_p_a.xyz, root_p_b.xyz, root_v_n.xyz]`.
    pub fn row(&self) -> [f64; ROW_LEN] {
        [
            self.contact.distance,
            self.a_p_a.x,
            self.a_p_a.y,
            self.a_p_a.z,
            self.root_p_b.x,
            self.root_p_b.y,
            self.root_p_b.z,
            self.root_v_n.x,
            self.root_v_n.y,
            self.root_v_n.z,
        ]
    }
}
