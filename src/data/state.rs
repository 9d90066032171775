//! Particle state held by a node and, on the coordinator, for the whole system.

use crate::Vec3;

/// Per-node positions and velocities in local slot order: home atoms, ghost
/// zones, then extras. `v` is either empty or as long as the home range.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalState {
    pub x: Vec<Vec3>,
    pub v: Vec<Vec3>,
}

impl LocalState {
    pub fn has_velocities(&self) -> bool {
        !self.v.is_empty()
    }
}

/// Positions and velocities of every atom in global order. `v` may be empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlobalState {
    pub x: Vec<Vec3>,
    pub v: Vec<Vec3>,
}

impl GlobalState {
    pub fn new(x: Vec<Vec3>, v: Vec<Vec3>) -> Self {
        Self { x, v }
    }

    pub fn positions_only(x: Vec<Vec3>) -> Self {
        Self { x, v: Vec::new() }
    }

    pub fn natoms(&self) -> usize {
        self.x.len()
    }

    pub fn has_velocities(&self) -> bool {
        !self.v.is_empty()
    }
}
