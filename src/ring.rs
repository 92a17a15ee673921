//! Circular-buffer index math for trails.
//!
//! Each trail is a fixed-capacity ring. `head` is the physical slot of the
//! most recent write and `valid` the number of recorded nodes. An empty ring
//! has `head = capacity - 1`, so the first write lands in slot 0.
//!
//! Logical index 0 is the oldest valid node:
//!
//! ```text
//! physical = (head - valid + 1 + logical) mod capacity
//! ```
//!
//! The same mapping exists in WGSL as `trail_physical_index` for ribbon
//! shaders that walk the node texture directly.

use glam::{Vec3, Vec4};

use crate::shader_utils::host::DEFAULT_TANGENT;

/// Physical slot of logical node `logical`, or `None` if it is not valid.
pub fn physical_index(head: u32, valid: u32, logical: u32, capacity: u32) -> Option<u32> {
    if capacity == 0 || head >= capacity || valid > capacity || logical >= valid {
        return None;
    }
    Some((head + capacity - valid + 1 + logical) % capacity)
}

/// Logical index of physical slot `physical`, or `None` if the slot holds no
/// valid node.
pub fn logical_index(head: u32, valid: u32, physical: u32, capacity: u32) -> Option<u32> {
    if capacity == 0 || head >= capacity || valid > capacity || physical >= capacity {
        return None;
    }
    // Age of the slot: 0 for head, 1 for the write before, ...
    let age = (head + capacity - physical) % capacity;
    if age >= valid {
        return None;
    }
    Some(valid - 1 - age)
}

/// Host model of one ring, mirroring what the trail state pass does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursor {
    capacity: u32,
    head: u32,
    valid: u32,
}

impl RingCursor {
    /// Empty ring. A zero capacity is treated as one.
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            head: capacity - 1,
            valid: 0,
        }
    }

    /// Cursor from decoded state, rejecting impossible values.
    pub fn from_state(head: u32, valid: u32, capacity: u32) -> Option<Self> {
        if capacity == 0 || head >= capacity || valid > capacity {
            return None;
        }
        Some(Self { capacity, head, valid })
    }

    /// Record a node; returns the physical slot written.
    pub fn push(&mut self) -> u32 {
        self.head = (self.head + 1) % self.capacity;
        self.valid = (self.valid + 1).min(self.capacity);
        self.head
    }

    /// Forget every node.
    pub fn clear(&mut self) {
        *self = Self::new(self.capacity);
    }

    /// Physical slot of logical node `logical`.
    pub fn physical(&self, logical: u32) -> Option<u32> {
        physical_index(self.head, self.valid, logical, self.capacity)
    }

    /// Logical index of physical slot `physical`.
    pub fn logical(&self, physical: u32) -> Option<u32> {
        logical_index(self.head, self.valid, physical, self.capacity)
    }

    /// Slot of the most recent write.
    pub fn head(&self) -> u32 {
        self.head
    }

    /// Number of recorded nodes.
    pub fn valid(&self) -> u32 {
        self.valid
    }

    /// Ring capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Physical slots from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.valid).filter_map(move |i| self.physical(i))
    }
}

/// Host copy of a trail system's node and state textures.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailSnapshot {
    capacity: u32,
    trail_count: u32,
    /// `capacity x trail_count` texels of (x, y, z, time).
    nodes: Vec<Vec4>,
    /// `trail_count` texels of (head, valid, wrote, 0).
    state: Vec<Vec4>,
}

impl TrailSnapshot {
    /// Build from raw readbacks. Short inputs are padded with zeros.
    pub fn new(capacity: u32, trail_count: u32, mut nodes: Vec<Vec4>, mut state: Vec<Vec4>) -> Self {
        nodes.resize(capacity as usize * trail_count as usize, Vec4::ZERO);
        state.resize(trail_count as usize, Vec4::ZERO);
        Self {
            capacity,
            trail_count,
            nodes,
            state,
        }
    }

    /// Ring capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of trails.
    pub fn trail_count(&self) -> u32 {
        self.trail_count
    }

    /// Decoded ring state of `trail`.
    pub fn cursor(&self, trail: u32) -> Option<RingCursor> {
        let s = self.state.get(trail as usize)?;
        RingCursor::from_state(s.x as u32, s.y as u32, self.capacity)
    }

    /// Whether the last update recorded a node on `trail`.
    pub fn wrote_last_update(&self, trail: u32) -> bool {
        self.state.get(trail as usize).is_some_and(|s| s.z > 0.5)
    }

    /// Raw node at a physical slot.
    pub fn node(&self, trail: u32, physical: u32) -> Option<Vec4> {
        if trail >= self.trail_count || physical >= self.capacity {
            return None;
        }
        self.nodes.get((trail * self.capacity + physical) as usize).copied()
    }

    /// Valid nodes of `trail`, oldest first.
    pub fn ordered_nodes(&self, trail: u32) -> Vec<Vec4> {
        let Some(cursor) = self.cursor(trail) else {
            return Vec::new();
        };
        cursor.iter().filter_map(|p| self.node(trail, p)).collect()
    }

    /// Direction of the trail at logical node `logical`, from its
    /// neighbours. Falls back to [`DEFAULT_TANGENT`] when fewer than two
    /// nodes are valid or the segment is degenerate.
    pub fn tangent(&self, trail: u32, logical: u32) -> Vec3 {
        let nodes = self.ordered_nodes(trail);
        tangent_at(&nodes, logical as usize)
    }
}

fn tangent_at(nodes: &[Vec4], i: usize) -> Vec3 {
    if nodes.len() < 2 || i >= nodes.len() {
        return DEFAULT_TANGENT;
    }
    let prev = nodes[i.saturating_sub(1)].truncate();
    let next = nodes[(i + 1).min(nodes.len() - 1)].truncate();
    let d = next - prev;
    let len = d.length();
    if len < 1.0e-6 || !len.is_finite() {
        return DEFAULT_TANGENT;
    }
    d / len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ring_writes_slot_zero() {
        let mut ring = RingCursor::new(5);
        assert_eq!(ring.head(), 4);
        assert_eq!(ring.valid(), 0);
        assert_eq!(ring.push(), 0);
    }

    #[test]
    fn test_physical_logical_inverse() {
        for capacity in 1..8 {
            let mut ring = RingCursor::new(capacity);
            for _ in 0..(3 * capacity) {
                ring.push();
                for p in 0..capacity {
                    if let Some(l) = ring.logical(p) {
                        assert_eq!(ring.physical(l), Some(p));
                    }
                }
                for l in 0..ring.valid() {
                    let p = ring.physical(l).unwrap();
                    assert_eq!(ring.logical(p), Some(l));
                }
            }
        }
    }

    #[test]
    fn test_wraparound_order() {
        // After capacity + k writes, logical 0 is the (k + 1)-th write
        let capacity = 4;
        let k = 3;
        let mut ring = RingCursor::new(capacity);
        let mut slots = Vec::new();
        for _ in 0..(capacity + k) {
            slots.push(ring.push());
        }
        assert_eq!(ring.valid(), capacity);
        assert_eq!(ring.physical(0), Some(slots[k as usize]));
        assert_eq!(ring.physical(capacity - 1), Some(*slots.last().unwrap()));
    }

    #[test]
    fn test_out_of_range_indices() {
        assert_eq!(physical_index(0, 1, 1, 4), None);
        assert_eq!(physical_index(4, 1, 0, 4), None);
        assert_eq!(physical_index(0, 0, 0, 0), None);
        assert_eq!(logical_index(0, 1, 9, 4), None);
        assert!(RingCursor::from_state(2, 6, 5).is_none());
    }

    #[test]
    fn test_tangent_fallbacks() {
        let one = TrailSnapshot::new(3, 1, vec![Vec4::ONE, Vec4::ZERO, Vec4::ZERO], vec![Vec4::new(0.0, 1.0, 1.0, 0.0)]);
        assert_eq!(one.tangent(0, 0), DEFAULT_TANGENT);

        let same = TrailSnapshot::new(3, 1, vec![Vec4::ONE; 3], vec![Vec4::new(1.0, 2.0, 1.0, 0.0)]);
        assert_eq!(same.tangent(0, 1), DEFAULT_TANGENT);

        let line = TrailSnapshot::new(
            3,
            1,
            vec![Vec4::ZERO, Vec4::new(1.0, 0.0, 0.0, 0.1), Vec4::ZERO],
            vec![Vec4::new(1.0, 2.0, 1.0, 0.0)],
        );
        assert_eq!(line.ordered_nodes(0).len(), 2);
        assert_eq!(line.tangent(0, 0), Vec3::X);
    }
}
