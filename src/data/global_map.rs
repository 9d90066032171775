//! Global-to-local atom index map.
//!
//! A direct-indexed table over all global atoms gives O(1) lookups; a list of
//! the atoms currently resident lets [`GlobalToLocal::clear`] touch only those
//! entries, so a rebuild costs O(local atoms) rather than O(global atoms).

use crate::dd_error::DomDecError;
use crate::debug_invariants::DebugInvariants;
use crate::topology::ids::AtomId;

/// Where a resident atom lives: the zone (`cell`) and its local slot.
///
/// Home atoms are in cell 0, ghost atoms in cells `1..n_zones`, and extra
/// atoms held for constraints or split bonded terms use cell `n_zones`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalEntry {
    pub cell: u8,
    pub local: u32,
}

impl LocalEntry {
    pub fn new(cell: usize, local: usize) -> Self {
        Self {
            cell: cell as u8,
            local: local as u32,
        }
    }

    #[inline]
    pub fn local(self) -> usize {
        self.local as usize
    }

    #[inline]
    pub fn is_home(self) -> bool {
        self.cell == 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct GlobalToLocal {
    table: Vec<Option<LocalEntry>>,
    resident: Vec<AtomId>,
}

impl GlobalToLocal {
    pub fn new(natoms: usize) -> Self {
        Self {
            table: vec![None; natoms],
            resident: Vec::new(),
        }
    }

    /// Number of global atoms the table covers.
    pub fn natoms(&self) -> usize {
        self.table.len()
    }

    /// Number of resident atoms.
    pub fn len(&self) -> usize {
        self.resident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resident.is_empty()
    }

    /// Record `atom` as resident. An atom can be resident only once.
    pub fn insert(&mut self, atom: AtomId, entry: LocalEntry) -> Result<(), DomDecError> {
        let natoms = self.table.len();
        let slot = self
            .table
            .get_mut(atom.index())
            .ok_or(DomDecError::AtomOutOfRange { atom, natoms })?;
        if slot.is_some() {
            return Err(DomDecError::DuplicateResident(atom));
        }
        *slot = Some(entry);
        self.resident.push(atom);
        Ok(())
    }

    /// `None` for non-resident and out-of-range atoms.
    #[inline]
    pub fn get(&self, atom: AtomId) -> Option<LocalEntry> {
        self.table.get(atom.index()).copied().flatten()
    }

    #[inline]
    pub fn contains(&self, atom: AtomId) -> bool {
        self.get(atom).is_some()
    }

    /// Forget every resident atom at or after position `keep` in insertion order.
    pub fn truncate(&mut self, keep: usize) {
        for a in self.resident.drain(keep.min(self.resident.len())..) {
            self.table[a.index()] = None;
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Resident atoms in insertion order.
    pub fn resident(&self) -> &[AtomId] {
        &self.resident
    }
}

impl DebugInvariants for GlobalToLocal {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "GlobalToLocal invalid");
    }

    fn validate_invariants(&self) -> Result<(), DomDecError> {
        for &a in &self.resident {
            if self.get(a).is_none() {
                return Err(DomDecError::InvalidTopology(format!(
                    "atom {a} listed as resident but missing from the table"
                )));
            }
        }
        let filled = self.table.iter().filter(|e| e.is_some()).count();
        if filled != self.resident.len() {
            return Err(DomDecError::InvalidTopology(format!(
                "{filled} table entries for {} resident atoms",
                self.resident.len()
            )));
        }
        Ok(())
    }
}
