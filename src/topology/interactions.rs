//! Bonded interaction lists and the constraint topology.
//!
//! An [`InteractionList`] stores fixed-arity records flat, as
//! `[param, a0, .., a(n-1)]` per interaction. Constraints have variable arity
//! and are kept in a block index like charge groups.

use crate::dd_error::DomDecError;
use crate::topology::ids::AtomId;
use serde::{Deserialize, Serialize};

/// Largest number of atoms in one bonded interaction.
pub const MAX_INTERACTION_ATOMS: usize = 6;

/// Kind of a bonded interaction; fixes its arity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionType {
    Bond,
    Angle,
    ProperDihedral,
    ImproperDihedral,
    Pair,
    Cmap,
    /// Any other term with the given number of atoms.
    Other(u8),
}

impl FunctionType {
    pub fn nratoms(self) -> usize {
        match self {
            FunctionType::Bond | FunctionType::Pair => 2,
            FunctionType::Angle => 3,
            FunctionType::ProperDihedral | FunctionType::ImproperDihedral => 4,
            FunctionType::Cmap => 5,
            FunctionType::Other(n) => n as usize,
        }
    }
}

/// All interactions of one function type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionList {
    ftype: FunctionType,
    iatoms: Vec<u32>,
}

impl InteractionList {
    pub fn new(ftype: FunctionType) -> Result<Self, DomDecError> {
        let n = ftype.nratoms();
        if n == 0 || n > MAX_INTERACTION_ATOMS {
            return Err(DomDecError::InvalidTopology(format!(
                "{ftype:?} has {n} atoms, supported are 1..={MAX_INTERACTION_ATOMS}"
            )));
        }
        Ok(Self {
            ftype,
            iatoms: Vec::new(),
        })
    }

    pub fn ftype(&self) -> FunctionType {
        self.ftype
    }

    pub fn nratoms(&self) -> usize {
        self.ftype.nratoms()
    }

    #[inline]
    fn stride(&self) -> usize {
        1 + self.nratoms()
    }

    pub fn len(&self) -> usize {
        self.iatoms.len() / self.stride()
    }

    pub fn is_empty(&self) -> bool {
        self.iatoms.is_empty()
    }

    /// Append one interaction with parameter index `param`.
    pub fn push(&mut self, param: u32, atoms: &[AtomId]) -> Result<(), DomDecError> {
        if atoms.len() != self.nratoms() {
            return Err(DomDecError::InvalidTopology(format!(
                "{:?} takes {} atoms, got {}",
                self.ftype,
                self.nratoms(),
                atoms.len()
            )));
        }
        self.iatoms.push(param);
        self.iatoms.extend(atoms.iter().map(|a| a.get()));
        Ok(())
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, param: u32, atoms: &[AtomId]) -> Result<Self, DomDecError> {
        self.push(param, atoms)?;
        Ok(self)
    }

    pub fn param(&self, i: usize) -> u32 {
        self.iatoms[i * self.stride()]
    }

    /// Atoms of interaction `i`.
    #[inline]
    pub fn atoms(&self, i: usize) -> &[AtomId] {
        let s = i * self.stride() + 1;
        bytemuck::cast_slice(&self.iatoms[s..s + self.nratoms()])
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[AtomId])> + '_ {
        (0..self.len()).map(move |i| (self.param(i), self.atoms(i)))
    }
}

/// One constraint: its atoms, reference length and whether it is flexible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintTopology {
    index: Vec<usize>,
    atoms: Vec<AtomId>,
    length: Vec<f64>,
    flexible: Vec<bool>,
}

impl Default for ConstraintTopology {
    fn default() -> Self {
        Self {
            index: vec![0],
            atoms: Vec::new(),
            length: Vec::new(),
            flexible: Vec::new(),
        }
    }
}

impl ConstraintTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a constraint over at least two atoms.
    pub fn push(&mut self, atoms: &[AtomId], length: f64, flexible: bool) -> Result<(), DomDecError> {
        if atoms.len() < 2 {
            return Err(DomDecError::InvalidTopology(format!(
                "a constraint needs at least two atoms, got {}",
                atoms.len()
            )));
        }
        self.atoms.extend_from_slice(atoms);
        self.index.push(self.atoms.len());
        self.length.push(length);
        self.flexible.push(flexible);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn atoms(&self, k: usize) -> &[AtomId] {
        &self.atoms[self.index[k]..self.index[k + 1]]
    }

    pub fn length(&self, k: usize) -> f64 {
        self.length[k]
    }

    pub fn is_flexible(&self, k: usize) -> bool {
        self.flexible[k]
    }

    pub fn n_flexible(&self) -> usize {
        self.flexible.iter().filter(|&&f| f).count()
    }

    /// Atom → constraint index over `natoms` atoms.
    pub fn atom_to_constraints(&self, natoms: usize) -> AtomToConstraints {
        let mut count = vec![0usize; natoms + 1];
        for a in &self.atoms {
            count[a.index() + 1] += 1;
        }
        for i in 0..natoms {
            count[i + 1] += count[i];
        }
        let mut fill = count.clone();
        let mut con = vec![0u32; self.atoms.len()];
        for k in 0..self.len() {
            for a in self.atoms(k) {
                con[fill[a.index()]] = k as u32;
                fill[a.index()] += 1;
            }
        }
        AtomToConstraints { index: count, con }
    }

    fn all_atoms(&self) -> &[AtomId] {
        &self.atoms
    }
}

/// Block index from atoms to the constraints they take part in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AtomToConstraints {
    index: Vec<usize>,
    con: Vec<u32>,
}

impl AtomToConstraints {
    /// Constraints that `atom` takes part in, ascending.
    pub fn of(&self, atom: AtomId) -> &[u32] {
        let a = atom.index();
        if a + 1 >= self.index.len() {
            return &[];
        }
        &self.con[self.index[a]..self.index[a + 1]]
    }
}

/// Fail with `AtomOutOfRange` if any atom in the topology is `>= natoms`.
pub(crate) fn check_atoms_in_range(
    natoms: usize,
    bondeds: &[InteractionList],
    constraints: &ConstraintTopology,
) -> Result<(), DomDecError> {
    let check = |atom: AtomId| {
        if atom.index() < natoms {
            Ok(())
        } else {
            Err(DomDecError::AtomOutOfRange { atom, natoms })
        }
    };
    for list in bondeds {
        for (_, atoms) in list.iter() {
            atoms.iter().copied().try_for_each(check)?;
        }
    }
    constraints.all_atoms().iter().copied().try_for_each(check)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[u32]) -> Vec<AtomId> {
        v.iter().copied().map(AtomId::new).collect()
    }

    #[test]
    fn flat_records() {
        let l = InteractionList::new(FunctionType::Angle)
            .unwrap()
            .with(7, &ids(&[0, 1, 2]))
            .unwrap()
            .with(8, &ids(&[3, 4, 5]))
            .unwrap();
        assert_eq!(l.len(), 2);
        assert_eq!(l.param(1), 8);
        assert_eq!(l.atoms(1), &ids(&[3, 4, 5])[..]);
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let mut l = InteractionList::new(FunctionType::Bond).unwrap();
        assert!(l.push(0, &ids(&[1, 2, 3])).is_err());
        assert!(InteractionList::new(FunctionType::Other(7)).is_err());
    }

    #[test]
    fn constraints_index_atoms() {
        let mut c = ConstraintTopology::new();
        c.push(&ids(&[0, 1]), 0.1, false).unwrap();
        c.push(&ids(&[1, 2, 3]), 0.1, true).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.n_flexible(), 1);
        let at2con = c.atom_to_constraints(5);
        assert_eq!(at2con.of(AtomId::new(1)), &[0, 1]);
        assert_eq!(at2con.of(AtomId::new(3)), &[1]);
        assert!(at2con.of(AtomId::new(4)).is_empty());
        assert!(c.push(&ids(&[2]), 0.1, false).is_err());
    }

    #[test]
    fn out_of_range_atom() {
        let l = InteractionList::new(FunctionType::Bond)
            .unwrap()
            .with(0, &ids(&[0, 9]))
            .unwrap();
        assert_eq!(
            check_atoms_in_range(5, &[l], &ConstraintTopology::new()),
            Err(DomDecError::AtomOutOfRange {
                atom: AtomId::new(9),
                natoms: 5
            })
        );
    }
}
