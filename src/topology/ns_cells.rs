//! Neighbor-search map over the zones of one node.
//!
//! For every i-zone the map gives the range of j-zones it interacts with, the
//! local charge-group ranges of both, and the range of periodic image shifts
//! the pair search has to consider.

use crate::IVec;
use crate::dd_error::DomDecError;
use crate::topology::grid::{CellGrid, DD_MAXICELL};
use arrayvec::ArrayVec;

/// Search parameters of one i-zone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NsCell {
    /// j-zones `j0..j1`.
    pub j0: usize,
    pub j1: usize,
    /// End of the i-zone's local charge groups.
    pub cg1: usize,
    /// j charge groups are local cgs `jcg0..jcg1`.
    pub jcg0: usize,
    pub jcg1: usize,
    /// Smallest and largest image shift per axis.
    pub shift0: IVec,
    pub shift1: IVec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NsCellMap {
    cells: ArrayVec<NsCell, DD_MAXICELL>,
}

impl NsCellMap {
    /// Build from the grid and the local charge-group offsets of every zone
    /// (`n_zones + 1` entries).
    pub fn build(grid: &CellGrid, zone_cg_bounds: &[usize], cutoff: f64) -> Result<Self, DomDecError> {
        let n_zones = grid.n_zones();
        if zone_cg_bounds.len() != n_zones + 1 {
            return Err(DomDecError::InvalidTopology(format!(
                "{} zone bounds for {n_zones} zones",
                zone_cg_bounds.len()
            )));
        }
        let box_size = grid.box_size();
        let shifts = grid.zone_shifts();
        let mut cells = ArrayVec::new();
        for &[i, j0, j1] in grid.i_zones() {
            let mut shift0 = [0; 3];
            let mut shift1 = [0; 3];
            for d in 0..3 {
                if grid.nc()[d] > 1 {
                    let rel = (j0..j1).map(|j| shifts[j][d] - shifts[i][d]);
                    shift0[d] = rel.clone().min().unwrap_or(0);
                    shift1[d] = rel.max().unwrap_or(0);
                } else {
                    let s = ((cutoff / box_size[d]).ceil() as i32).max(1);
                    shift0[d] = -s;
                    shift1[d] = s;
                }
            }
            cells
                .try_push(NsCell {
                    j0,
                    j1,
                    cg1: zone_cg_bounds[i + 1],
                    jcg0: zone_cg_bounds[j0],
                    jcg1: zone_cg_bounds[j1],
                    shift0,
                    shift1,
                })
                .map_err(|_| DomDecError::CapacityExceeded {
                    what: "neighbor-search i-zones",
                    max: DD_MAXICELL,
                })?;
        }
        Ok(Self { cells })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, i: usize) -> &NsCell {
        &self.cells[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &NsCell> {
        self.cells.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_searches_own_zone_with_images() {
        let g = CellGrid::new([1, 1, 1], [3.0, 3.0, 1.0]).unwrap();
        let m = NsCellMap::build(&g, &[0, 10], 1.5).unwrap();
        assert_eq!(m.len(), 1);
        let c = m.cell(0);
        assert_eq!((c.j0, c.j1, c.cg1, c.jcg0, c.jcg1), (0, 1, 10, 0, 10));
        assert_eq!(c.shift0, [-1, -1, -2]);
        assert_eq!(c.shift1, [1, 1, 2]);
    }

    #[test]
    fn three_d_zone_ranges() {
        let g = CellGrid::new([2, 2, 2], [4.0; 3]).unwrap();
        let bounds = [0, 5, 7, 8, 10, 11, 13, 14, 15];
        let m = NsCellMap::build(&g, &bounds, 1.0).unwrap();
        assert_eq!(m.len(), 4);
        let c1 = m.cell(1);
        assert_eq!((c1.j0, c1.j1), (3, 6));
        assert_eq!((c1.cg1, c1.jcg0, c1.jcg1), (7, 8, 13));
        // zone 1 is (1,0,0); zones 3..6 are (0,1,0),(0,1,1),(0,0,1)
        assert_eq!(c1.shift0, [-1, 0, 0]);
        assert_eq!(c1.shift1, [-1, 1, 1]);
        assert!(NsCellMap::build(&g, &bounds[..5], 1.0).is_err());
    }
}
