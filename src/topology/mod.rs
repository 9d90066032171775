//! Topology: global identities, the system's bonded structure, and the
//! geometric cell grid.

pub mod charge_groups;
pub mod grid;
pub mod ids;
pub mod interactions;
pub mod ns_cells;
pub mod reverse;

use crate::dd_error::DomDecError;
use charge_groups::ChargeGroups;
use interactions::{ConstraintTopology, InteractionList, check_atoms_in_range};

/// Read-only description of the whole system, shared by every node.
#[derive(Clone, Debug)]
pub struct GlobalTopology {
    cgs: ChargeGroups,
    bondeds: Vec<InteractionList>,
    constraints: ConstraintTopology,
}

impl GlobalTopology {
    /// Check that every atom referenced by a bonded term or constraint exists.
    pub fn new(
        cgs: ChargeGroups,
        bondeds: Vec<InteractionList>,
        constraints: ConstraintTopology,
    ) -> Result<Self, DomDecError> {
        check_atoms_in_range(cgs.natoms(), &bondeds, &constraints)?;
        Ok(Self {
            cgs,
            bondeds,
            constraints,
        })
    }

    /// Atoms only, one charge group each.
    pub fn atoms_only(natoms: usize) -> Self {
        Self {
            cgs: ChargeGroups::single_atoms(natoms),
            bondeds: Vec::new(),
            constraints: ConstraintTopology::new(),
        }
    }

    pub fn natoms(&self) -> usize {
        self.cgs.natoms()
    }

    pub fn charge_groups(&self) -> &ChargeGroups {
        &self.cgs
    }

    pub fn bondeds(&self) -> &[InteractionList] {
        &self.bondeds
    }

    pub fn constraints(&self) -> &ConstraintTopology {
        &self.constraints
    }
}
