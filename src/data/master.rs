//! Master assignment of charge groups to nodes, held by the coordinator.
//!
//! The assignment is tagged with the [`Epoch`] of the decomposition it was
//! computed for. Every migration or repartition bumps the epoch, so a stale
//! assignment can no longer be read: [`MasterAssignment::view`] refuses it.

use crate::Vec3;
use crate::dd_error::DomDecError;
use crate::topology::charge_groups::ChargeGroups;
use crate::topology::grid::CellGrid;
use crate::topology::ids::CgId;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Generation counter of the decomposition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Epoch(u64);

impl Epoch {
    pub const INITIAL: Epoch = Epoch(0);

    #[must_use]
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MasterAssignment {
    n_nodes: usize,
    /// Charge groups per node.
    ncg: Vec<usize>,
    /// Offsets into `cg`, `n_nodes + 1` entries.
    index: Vec<usize>,
    /// Global cg ids, grouped by node.
    cg: Vec<CgId>,
    /// Home atoms per node.
    nat: Vec<usize>,
    valid_for: Option<Epoch>,
}

impl MasterAssignment {
    /// An empty assignment, not valid for any epoch.
    pub fn new(n_nodes: usize) -> Self {
        Self {
            n_nodes,
            ncg: vec![0; n_nodes],
            index: vec![0; n_nodes + 1],
            cg: Vec::new(),
            nat: vec![0; n_nodes],
            valid_for: None,
        }
    }

    /// Assign every charge group to the cell containing its geometric center.
    ///
    /// Groups whose center lies outside the primary box are translated, all
    /// atoms by the same box vector, so that the center lies inside.
    pub fn assign_from_positions(
        &mut self,
        grid: &CellGrid,
        cgs: &ChargeGroups,
        x: &mut [Vec3],
        epoch: Epoch,
    ) -> Result<(), DomDecError> {
        if x.len() != cgs.natoms() {
            return Err(DomDecError::InvalidTopology(format!(
                "{} positions for {} atoms",
                x.len(),
                cgs.natoms()
            )));
        }
        if grid.n_nodes() != self.n_nodes {
            return Err(DomDecError::NodeCountMismatch {
                configured: self.n_nodes,
                actual: grid.n_nodes(),
            });
        }
        let centers = group_centers(cgs, x);
        let box_size = grid.box_size();
        let mut lists = vec![Vec::new(); self.n_nodes];
        for (g, c) in centers.iter().enumerate() {
            let cg = CgId::new(g as u32);
            let shift = grid.box_shift(*c);
            if shift != [0; 3] {
                for a in cgs.atoms(cg) {
                    for d in 0..3 {
                        x[a][d] -= shift[d] as f64 * box_size[d];
                    }
                }
            }
            let node = grid.node_of_cell(grid.cell_of_position(*c));
            lists[node].push(cg);
        }
        self.set_from_node_lists(&lists, cgs, epoch)
    }

    /// Rebuild from the home charge-group list of every node.
    ///
    /// Every charge group must appear exactly once over all lists.
    pub fn set_from_node_lists(
        &mut self,
        lists: &[Vec<CgId>],
        cgs: &ChargeGroups,
        epoch: Epoch,
    ) -> Result<(), DomDecError> {
        if lists.len() != self.n_nodes {
            return Err(DomDecError::NodeCountMismatch {
                configured: self.n_nodes,
                actual: lists.len(),
            });
        }
        let mut seen = vec![false; cgs.len()];
        let mut distinct = 0usize;
        for &cg in lists.iter().flatten() {
            cgs.check(cg)?;
            if !std::mem::replace(&mut seen[cg.index()], true) {
                distinct += 1;
            }
        }
        let total: usize = lists.iter().map(Vec::len).sum();
        if distinct != cgs.len() || total != cgs.len() {
            self.valid_for = None;
            return Err(DomDecError::PartitionCountMismatch {
                assigned: if total == cgs.len() { distinct } else { total },
                global: cgs.len(),
            });
        }

        self.cg.clear();
        self.index.clear();
        self.index.push(0);
        for (node, list) in lists.iter().enumerate() {
            self.ncg[node] = list.len();
            self.nat[node] = list.iter().map(|&g| cgs.size(g)).sum();
            self.cg.extend_from_slice(list);
            self.index.push(self.cg.len());
        }
        self.valid_for = Some(epoch);
        Ok(())
    }

    /// Read access, only if the assignment reflects `epoch`.
    pub fn view(&self, epoch: Epoch) -> Result<AssignmentView<'_>, DomDecError> {
        if self.valid_for == Some(epoch) {
            Ok(AssignmentView { a: self })
        } else {
            Err(DomDecError::StaleAssignment {
                have: self.valid_for,
                want: epoch,
            })
        }
    }

    /// True if the coordinator currently knows where every charge group lives.
    pub fn has_all_cg(&self, epoch: Epoch) -> bool {
        self.valid_for == Some(epoch)
    }

    pub fn invalidate(&mut self) {
        self.valid_for = None;
    }

    pub fn valid_for(&self) -> Option<Epoch> {
        self.valid_for
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }
}

/// Checked, read-only view of a current assignment.
#[derive(Copy, Clone, Debug)]
pub struct AssignmentView<'a> {
    a: &'a MasterAssignment,
}

impl<'a> AssignmentView<'a> {
    pub fn n_nodes(&self) -> usize {
        self.a.n_nodes
    }

    pub fn ncg(&self, node: usize) -> usize {
        self.a.ncg[node]
    }

    pub fn nat(&self, node: usize) -> usize {
        self.a.nat[node]
    }

    /// Home charge groups of `node`.
    pub fn cgs(&self, node: usize) -> &'a [CgId] {
        &self.a.cg[self.a.index[node]..self.a.index[node + 1]]
    }

    pub fn total_cg(&self) -> usize {
        self.a.cg.len()
    }
}

#[cfg(feature = "rayon")]
fn group_centers(cgs: &ChargeGroups, x: &[Vec3]) -> Vec<Vec3> {
    (0..cgs.len())
        .into_par_iter()
        .map(|g| cgs.center(CgId::new(g as u32), x))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn group_centers(cgs: &ChargeGroups, x: &[Vec3]) -> Vec<Vec3> {
    (0..cgs.len())
        .map(|g| cgs.center(CgId::new(g as u32), x))
        .collect()
}
