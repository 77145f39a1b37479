//! Fixed-capacity, distance-sorted collision lists.

use crate::contact::Collision;

/// Exactly `capacity` collisions in ascending distance order.
///
/// Real entries always precede the sentinel padding, so the real prefix is
/// sorted but a real contact farther than [`SENTINEL_DISTANCE`] still sits
/// ahead of the padding; [`count`](Self::count) marks the boundary.  When
/// full, inserting a collision evicts the farthest entry if the new one is
/// closer and is a no-op otherwise.  Equal distances keep insertion order.
///
/// [`SENTINEL_DISTANCE`]: crate::SENTINEL_DISTANCE
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityList {
    entries: Vec<Collision>,
    count: usize,
}

impl ProximityList {
    /// A list of `capacity` sentinels.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![Collision::sentinel().clone(); capacity],
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Always equal to [`capacity`](Self::capacity).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of real (non-sentinel) entries.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn entries(&self) -> &[Collision] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Collision> {
        self.entries.iter()
    }

    /// Real entries only.
    pub fn real(&self) -> &[Collision] {
        &self.entries[..self.count]
    }

    /// Closest real entry.
    pub fn closest(&self) -> Option<&Collision> {
        self.real().first()
    }

    /// Insert `collision` in distance order.  Returns `false` when the list
    /// is full and every entry is at least as close, or when the distance is
    /// not finite.
    pub fn insert(&mut self, collision: Collision) -> bool {
        let capacity = self.capacity();
        let distance = collision.distance();
        if !distance.is_finite() {
            return false;
        }
        let at = self.real().partition_point(|c| c.distance() <= distance);
        if at == capacity {
            return false;
        }
        self.entries.insert(at, collision);
        self.entries.truncate(capacity);
        self.count = (self.count + 1).min(capacity);
        true
    }
}

impl<'a> IntoIterator for &'a ProximityList {
    type Item = &'a Collision;
    type IntoIter = std::slice::Iter<'a, Collision>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
