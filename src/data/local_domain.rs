//! Per-node view of the decomposed system.
//!
//! Local atom slots are laid out as: home atoms (zone 0), then each ghost zone
//! in zone order, then *extra* atoms that are held only because a local
//! constraint or split bonded interaction needs them. Charge groups are
//! contiguous in slot space, so a zone is a range of local charge groups and a
//! range of local atoms.

use crate::data::global_map::{GlobalToLocal, LocalEntry};
use crate::data::master::Epoch;
use crate::dd_error::DomDecError;
use crate::debug_invariants::DebugInvariants;
use crate::topology::charge_groups::ChargeGroups;
use crate::topology::grid::DD_MAXCELL;
use crate::topology::ids::{AtomId, CgId};
use arrayvec::ArrayVec;
use log::debug;
use std::ops::Range;

#[derive(Clone, Debug)]
pub struct LocalDomain {
    n_zones: usize,
    /// Global id of every local charge group.
    index_gl: Vec<CgId>,
    /// Local atom offset of every local charge group, plus the end.
    cgindex: Vec<usize>,
    /// Local charge-group offset of every pushed zone, plus the end.
    zone_cg: ArrayVec<usize, { DD_MAXCELL + 1 }>,
    /// Global id of every local atom slot, extras included.
    gatindex: Vec<AtomId>,
    nat_home: usize,
    nat_tot: usize,
    nat_tot_con: usize,
    ga2la: GlobalToLocal,
    epoch: Option<Epoch>,
}

impl LocalDomain {
    /// Empty domain over `natoms` global atoms with `n_zones` zones.
    pub fn new(natoms: usize, n_zones: usize) -> Self {
        Self {
            n_zones,
            index_gl: Vec::new(),
            cgindex: vec![0],
            zone_cg: ArrayVec::new(),
            gatindex: Vec::new(),
            nat_home: 0,
            nat_tot: 0,
            nat_tot_con: 0,
            ga2la: GlobalToLocal::new(natoms),
            epoch: None,
        }
    }

    /// Replace the local state with the home charge groups `home`.
    ///
    /// Ghost zones and extras are dropped; the index map is cleared touching
    /// only previously resident atoms.
    pub fn rebuild_from_assignment(
        &mut self,
        home: &[CgId],
        cgs: &ChargeGroups,
        epoch: Epoch,
    ) -> Result<(), DomDecError> {
        self.ga2la.clear();
        self.index_gl.clear();
        self.cgindex.clear();
        self.cgindex.push(0);
        self.zone_cg.clear();
        self.zone_cg.push(0);
        self.gatindex.clear();
        self.nat_home = 0;
        self.nat_tot = 0;
        self.nat_tot_con = 0;
        self.epoch = None;

        self.push_zone(home, cgs)?;
        self.nat_home = self.nat_tot;
        self.epoch = Some(epoch);
        debug!(
            "local domain rebuilt at epoch {}: {} home cgs, {} home atoms",
            epoch.get(),
            home.len(),
            self.nat_home
        );
        Ok(())
    }

    /// Append the next zone with charge groups `zone`; returns its local atom range.
    ///
    /// Extras appended earlier are dropped first, so zones always precede them.
    /// On error the domain is left as it was before the call, minus extras.
    pub fn push_zone(&mut self, zone: &[CgId], cgs: &ChargeGroups) -> Result<Range<usize>, DomDecError> {
        let cell = self.zone_cg.len() - 1;
        if cell >= self.n_zones || self.zone_cg.is_full() {
            return Err(DomDecError::CapacityExceeded {
                what: "zones of the local domain",
                max: self.n_zones.min(DD_MAXCELL),
            });
        }
        self.clear_extras();
        let start = self.nat_tot;
        let ncg = self.index_gl.len();
        if let Err(e) = self.append_zone_cgs(zone, cgs, cell) {
            self.ga2la.truncate(start);
            self.gatindex.truncate(start);
            self.index_gl.truncate(ncg);
            self.cgindex.truncate(ncg + 1);
            return Err(e);
        }
        self.zone_cg.push(self.index_gl.len());
        self.nat_tot = self.gatindex.len();
        self.nat_tot_con = self.nat_tot;
        Ok(start..self.nat_tot)
    }

    fn append_zone_cgs(&mut self, zone: &[CgId], cgs: &ChargeGroups, cell: usize) -> Result<(), DomDecError> {
        for &cg in zone {
            cgs.check(cg)?;
            for a in cgs.atoms(cg) {
                let atom = AtomId::new(a as u32);
                self.ga2la
                    .insert(atom, LocalEntry::new(cell, self.gatindex.len()))?;
                self.gatindex.push(atom);
            }
            self.index_gl.push(cg);
            self.cgindex.push(self.gatindex.len());
        }
        Ok(())
    }

    /// Append an atom needed only by a constraint or split bonded term.
    pub fn append_constraint_atom(&mut self, atom: AtomId) -> Result<usize, DomDecError> {
        let slot = self.gatindex.len();
        self.ga2la.insert(atom, LocalEntry::new(self.n_zones, slot))?;
        self.gatindex.push(atom);
        self.nat_tot_con = self.gatindex.len();
        Ok(slot)
    }

    /// Drop all extra atoms.
    pub fn clear_extras(&mut self) {
        self.ga2la.truncate(self.nat_tot);
        self.gatindex.truncate(self.nat_tot);
        self.nat_tot_con = self.nat_tot;
    }

    /// Home or ghost entry of `atom`; extras are not reported.
    #[inline]
    pub fn resolve(&self, atom: AtomId) -> Option<LocalEntry> {
        self.ga2la
            .get(atom)
            .filter(|e| (e.cell as usize) < self.n_zones)
    }

    /// Local slot of `atom`, extras included.
    #[inline]
    pub fn resolve_slot_including_extras(&self, atom: AtomId) -> Option<usize> {
        self.ga2la.get(atom).map(LocalEntry::local)
    }

    #[inline]
    pub fn is_home(&self, atom: AtomId) -> bool {
        self.ga2la.get(atom).is_some_and(LocalEntry::is_home)
    }

    /// Global atom held in local slot `local`.
    pub fn global_atom(&self, local: usize) -> Option<AtomId> {
        self.gatindex.get(local).copied()
    }

    pub fn gatindex(&self) -> &[AtomId] {
        &self.gatindex
    }

    pub fn n_zones(&self) -> usize {
        self.n_zones
    }

    /// Zones pushed so far, home included.
    pub fn zones_filled(&self) -> usize {
        self.zone_cg.len().saturating_sub(1)
    }

    /// Local charge-group offsets per pushed zone, plus the end.
    pub fn zone_cg_bounds(&self) -> &[usize] {
        &self.zone_cg
    }

    /// Local charge-group range of zone `c`.
    pub fn zone_cg_range(&self, c: usize) -> Range<usize> {
        self.zone_cg[c]..self.zone_cg[c + 1]
    }

    /// Global ids of the charge groups in zone `c`.
    pub fn zone_cgs(&self, c: usize) -> &[CgId] {
        &self.index_gl[self.zone_cg_range(c)]
    }

    pub fn home_cgs(&self) -> &[CgId] {
        if self.zone_cg.len() < 2 {
            return &[];
        }
        self.zone_cgs(0)
    }

    /// Local atom range of zone `c`.
    pub fn zone_atoms(&self, c: usize) -> Range<usize> {
        let r = self.zone_cg_range(c);
        self.cgindex[r.start]..self.cgindex[r.end]
    }

    /// Local atom range of local charge group `lcg`.
    pub fn cg_atoms(&self, lcg: usize) -> Range<usize> {
        self.cgindex[lcg]..self.cgindex[lcg + 1]
    }

    pub fn nat_home(&self) -> usize {
        self.nat_home
    }

    /// Home plus ghost atoms.
    pub fn total_local_atoms(&self) -> usize {
        self.nat_tot
    }

    /// Home, ghost and extra atoms.
    pub fn total_local_atoms_including_constraint_extras(&self) -> usize {
        self.nat_tot_con
    }

    /// Extra atoms in slot order.
    pub fn extras(&self) -> &[AtomId] {
        &self.gatindex[self.nat_tot..]
    }

    /// Decomposition the local state was built for.
    pub fn epoch(&self) -> Option<Epoch> {
        self.epoch
    }

    pub fn index_map(&self) -> &GlobalToLocal {
        &self.ga2la
    }
}

/// Fail unless a per-atom array of `len` entries covers `want` local slots.
pub fn expect_slots(what: &str, len: usize, want: usize) -> Result<(), DomDecError> {
    if len < want {
        return Err(DomDecError::InvalidTopology(format!(
            "{len} {what} for {want} local atom slots"
        )));
    }
    Ok(())
}

impl DebugInvariants for LocalDomain {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "LocalDomain invalid");
    }

    fn validate_invariants(&self) -> Result<(), DomDecError> {
        self.ga2la.validate_invariants()?;
        if self.gatindex.len() != self.nat_tot_con || self.ga2la.len() != self.nat_tot_con {
            return Err(DomDecError::InvalidTopology(format!(
                "{} slots, {} resident atoms, nat_tot_con {}",
                self.gatindex.len(),
                self.ga2la.len(),
                self.nat_tot_con
            )));
        }
        for (slot, &atom) in self.gatindex.iter().enumerate() {
            if self.resolve_slot_including_extras(atom) != Some(slot) {
                return Err(DomDecError::InvalidTopology(format!(
                    "slot {slot} holds atom {atom} but the index map disagrees"
                )));
            }
        }
        if self.cgindex.last() != Some(&self.nat_tot) {
            return Err(DomDecError::InvalidTopology(
                "charge-group index does not end at nat_tot".into(),
            ));
        }
        Ok(())
    }
}
