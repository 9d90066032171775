//! Charge groups: contiguous atom ranges that move between nodes as a unit.

use crate::Vec3;
use crate::dd_error::DomDecError;
use crate::topology::ids::CgId;
use std::ops::Range;

/// Block index over the global atoms: charge group `g` owns atoms
/// `index[g]..index[g + 1]`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChargeGroups {
    index: Vec<usize>,
}

impl ChargeGroups {
    /// Build from a block index. `index[0]` must be 0 and the index must be
    /// non-decreasing; empty groups are rejected.
    pub fn from_index(index: Vec<usize>) -> Result<Self, DomDecError> {
        if index.first() != Some(&0) {
            return Err(DomDecError::InvalidTopology(
                "charge-group index must start at 0".into(),
            ));
        }
        if let Some(g) = index.windows(2).position(|w| w[1] <= w[0]) {
            return Err(DomDecError::InvalidTopology(format!(
                "charge group {g} is empty or the index decreases"
            )));
        }
        if index.len() - 1 > u32::MAX as usize || index[index.len() - 1] > u32::MAX as usize {
            return Err(DomDecError::InvalidTopology(
                "charge-group or atom count does not fit in u32".into(),
            ));
        }
        Ok(Self { index })
    }

    /// Build from per-group atom counts.
    pub fn from_sizes(sizes: &[usize]) -> Result<Self, DomDecError> {
        let mut index = Vec::with_capacity(sizes.len() + 1);
        index.push(0);
        let mut acc = 0usize;
        for &s in sizes {
            acc += s;
            index.push(acc);
        }
        Self::from_index(index)
    }

    /// One charge group per atom.
    pub fn single_atoms(natoms: usize) -> Self {
        Self {
            index: (0..=natoms).collect(),
        }
    }

    /// Number of charge groups.
    pub fn len(&self) -> usize {
        self.index.len() - 1
    }

    /// True if there are no charge groups.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of atoms.
    pub fn natoms(&self) -> usize {
        self.index[self.index.len() - 1]
    }

    /// Global atom range of a charge group.
    #[inline]
    pub fn atoms(&self, cg: CgId) -> Range<usize> {
        let g = cg.index();
        self.index[g]..self.index[g + 1]
    }

    /// Number of atoms in a charge group.
    #[inline]
    pub fn size(&self, cg: CgId) -> usize {
        let g = cg.index();
        self.index[g + 1] - self.index[g]
    }

    /// Fail with `CgOutOfRange` unless `cg` is a valid group.
    pub fn check(&self, cg: CgId) -> Result<(), DomDecError> {
        if cg.index() < self.len() {
            Ok(())
        } else {
            Err(DomDecError::CgOutOfRange {
                cg,
                ncg: self.len(),
            })
        }
    }

    /// Geometric center of a charge group, reading global positions.
    pub fn center(&self, cg: CgId, x: &[Vec3]) -> Vec3 {
        geometric_center(&x[self.atoms(cg)])
    }
}

/// Geometric center of a set of positions (the origin for an empty slice).
pub fn geometric_center(x: &[Vec3]) -> Vec3 {
    if x.is_empty() {
        return [0.0; 3];
    }
    let mut c = [0.0; 3];
    for p in x {
        for d in 0..3 {
            c[d] += p[d];
        }
    }
    let inv = 1.0 / x.len() as f64;
    [c[0] * inv, c[1] * inv, c[2] * inv]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_ranges() {
        let cgs = ChargeGroups::from_sizes(&[3, 1, 2]).unwrap();
        assert_eq!(cgs.len(), 3);
        assert_eq!(cgs.natoms(), 6);
        assert_eq!(cgs.atoms(CgId::new(0)), 0..3);
        assert_eq!(cgs.atoms(CgId::new(2)), 4..6);
        assert_eq!(cgs.size(CgId::new(1)), 1);
    }

    #[test]
    fn rejects_empty_group() {
        assert!(matches!(
            ChargeGroups::from_index(vec![0, 2, 2, 3]),
            Err(DomDecError::InvalidTopology(_))
        ));
        assert!(ChargeGroups::from_index(vec![1, 2]).is_err());
    }

    #[test]
    fn center_of_group() {
        let cgs = ChargeGroups::from_sizes(&[2]).unwrap();
        let x = [[0.0, 0.0, 0.0], [2.0, 4.0, -2.0]];
        assert_eq!(cgs.center(CgId::new(0), &x), [1.0, 2.0, -1.0]);
    }

    #[test]
    fn check_range() {
        let cgs = ChargeGroups::single_atoms(4);
        assert!(cgs.check(CgId::new(3)).is_ok());
        assert!(matches!(
            cgs.check(CgId::new(4)),
            Err(DomDecError::CgOutOfRange { ncg: 4, .. })
        ));
    }
}
