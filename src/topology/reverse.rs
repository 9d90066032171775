//! Reverse topology: from an atom to the bonded interactions it takes part in.
//!
//! After every decomposition change the reverse topology decides which bonded
//! interactions a node computes. An interaction belongs to the node on which
//! its first atom is home, so every interaction is assigned exactly once. If
//! some of its atoms are neither home nor ghost on that node, the interaction
//! is *split*: its missing atoms are fetched as extras by the constraint
//! resolver and the interaction is completed afterwards.

use crate::data::local_domain::LocalDomain;
use crate::dd_error::DomDecError;
use crate::topology::ids::AtomId;
use crate::topology::interactions::{FunctionType, InteractionList, MAX_INTERACTION_ATOMS};
use arrayvec::ArrayVec;
use log::debug;

/// Handle of one interaction: list number and position in that list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InteractionRecord {
    pub list: u32,
    pub index: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ReverseTopology {
    index: Vec<usize>,
    records: Vec<InteractionRecord>,
    nbonded_global: usize,
}

impl ReverseTopology {
    /// Index every atom of every interaction in `lists`.
    pub fn build(natoms: usize, lists: &[InteractionList]) -> Result<Self, DomDecError> {
        let mut count = vec![0usize; natoms + 1];
        for list in lists {
            for (_, atoms) in list.iter() {
                for a in atoms {
                    if a.index() >= natoms {
                        return Err(DomDecError::AtomOutOfRange { atom: *a, natoms });
                    }
                    count[a.index() + 1] += 1;
                }
            }
        }
        for i in 0..natoms {
            count[i + 1] += count[i];
        }
        let mut fill = count.clone();
        let mut records = vec![InteractionRecord { list: 0, index: 0 }; count[natoms]];
        for (l, list) in lists.iter().enumerate() {
            for i in 0..list.len() {
                for a in list.atoms(i) {
                    records[fill[a.index()]] = InteractionRecord {
                        list: l as u32,
                        index: i as u32,
                    };
                    fill[a.index()] += 1;
                }
            }
        }
        Ok(Self {
            index: count,
            records,
            nbonded_global: lists.iter().map(InteractionList::len).sum(),
        })
    }

    /// Interactions involving `atom`, in list then index order.
    pub fn records(&self, atom: AtomId) -> &[InteractionRecord] {
        let a = atom.index();
        if a + 1 >= self.index.len() {
            return &[];
        }
        &self.records[self.index[a]..self.index[a + 1]]
    }

    /// Total number of bonded interactions in the system.
    pub fn nbonded_global(&self) -> usize {
        self.nbonded_global
    }

    /// Assign the bonded interactions of this node's home atoms.
    pub fn make_local_bondeds(&self, lists: &[InteractionList], domain: &LocalDomain) -> LocalBondeds {
        let mut out = LocalBondeds::default();
        for &atom in &domain.gatindex()[..domain.nat_home()] {
            for &rec in self.records(atom) {
                let list = &lists[rec.list as usize];
                let atoms = list.atoms(rec.index as usize);
                if atoms[0] != atom {
                    continue;
                }
                let slots: Option<ArrayVec<u32, MAX_INTERACTION_ATOMS>> = atoms
                    .iter()
                    .map(|&a| domain.resolve(a).map(|e| e.local))
                    .collect();
                match slots {
                    Some(atoms) => out.local.push(LocalInteraction {
                        ftype: list.ftype(),
                        record: rec,
                        param: list.param(rec.index as usize),
                        atoms,
                    }),
                    None => {
                        for &a in atoms {
                            if domain.resolve(a).is_none() && !out.missing.contains(&a) {
                                out.missing.push(a);
                            }
                        }
                        out.split.push(rec);
                    }
                }
            }
        }
        debug!(
            "{} local bonded interactions, {} split across cells needing {} extra atoms",
            out.local.len(),
            out.split.len(),
            out.missing.len()
        );
        out
    }
}

/// A bonded interaction with its atoms translated to local slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalInteraction {
    pub ftype: FunctionType,
    pub record: InteractionRecord,
    pub param: u32,
    pub atoms: ArrayVec<u32, MAX_INTERACTION_ATOMS>,
}

/// Bonded interactions assigned to this node.
#[derive(Clone, Debug, Default)]
pub struct LocalBondeds {
    local: Vec<LocalInteraction>,
    split: Vec<InteractionRecord>,
    missing: Vec<AtomId>,
}

impl LocalBondeds {
    /// Interactions ready to compute.
    pub fn local(&self) -> &[LocalInteraction] {
        &self.local
    }

    /// Interactions still waiting for extra atoms.
    pub fn split(&self) -> &[InteractionRecord] {
        &self.split
    }

    /// Atoms the split interactions need from other nodes, without repeats.
    pub fn missing_atoms(&self) -> &[AtomId] {
        &self.missing
    }

    /// Global atoms of each split interaction, in assignment order.
    pub fn split_atoms<'a>(&'a self, lists: &'a [InteractionList]) -> impl Iterator<Item = &'a [AtomId]> + 'a {
        self.split
            .iter()
            .map(move |rec| lists[rec.list as usize].atoms(rec.index as usize))
    }

    /// All interactions assigned to this node, split ones included.
    pub fn count(&self) -> usize {
        self.local.len() + self.split.len()
    }

    /// Complete the split interactions once their atoms are extras of `domain`.
    pub fn resolve_split(&mut self, lists: &[InteractionList], domain: &LocalDomain) -> Result<(), DomDecError> {
        for rec in self.split.drain(..) {
            let list = &lists[rec.list as usize];
            let mut atoms = ArrayVec::new();
            for &a in list.atoms(rec.index as usize) {
                let slot = domain
                    .resolve_slot_including_extras(a)
                    .ok_or(DomDecError::UnresolvedConstraintAtom { atom: a })?;
                atoms.push(slot as u32);
            }
            self.local.push(LocalInteraction {
                ftype: list.ftype(),
                record: rec,
                param: list.param(rec.index as usize),
                atoms,
            });
        }
        self.missing.clear();
        Ok(())
    }
}
