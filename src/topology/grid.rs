//! Cell topology: the cartesian grid of cells, one per node, and the
//! eighth-shell zones each node holds.
//!
//! Node ids are x-major over cell coordinates, `node = (cx * ny + cy) * nz + cz`.
//! Only axes with more than one cell are *decomposed*; zones and neighbors are
//! defined over the decomposed axes in x, y, z order.

use crate::dd_error::DomDecError;
use crate::{IVec, Vec3};
use arrayvec::ArrayVec;
use itertools::iproduct;
use log::info;

/// Maximum number of zones (home + ghost) on a node.
pub const DD_MAXCELL: usize = 8;
/// Maximum number of i-zones for neighbor search.
pub const DD_MAXICELL: usize = 4;

/// Zone shifts in eighth-shell order, in decomposed-axis coordinates.
const ZONE_ORDER: [[i32; 3]; DD_MAXCELL] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 1, 1],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
];

/// `(i, j0, j1)` per i-zone: zone `i` interacts with zones `j0..j1`.
const IZONES_0D: [[usize; 3]; 1] = [[0, 0, 1]];
const IZONES_1D: [[usize; 3]; 1] = [[0, 0, 2]];
const IZONES_2D: [[usize; 3]; 2] = [[0, 0, 4], [1, 3, 4]];
const IZONES_3D: [[usize; 3]; DD_MAXICELL] = [[0, 0, 8], [1, 3, 6], [2, 5, 6], [3, 5, 7]];

/// Side of a decomposed axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward = 0,
    Backward = 1,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Forward, Direction::Backward];

    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    /// `+1` forward, `-1` backward.
    pub fn sign(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellGrid {
    nc: [usize; 3],
    box_size: Vec3,
    dims: ArrayVec<usize, 3>,
    shifts: ArrayVec<IVec, DD_MAXCELL>,
}

impl CellGrid {
    /// Validate an explicit grid.
    pub fn new(nc: [usize; 3], box_size: Vec3) -> Result<Self, DomDecError> {
        if nc.iter().any(|&n| n == 0 || n > DD_MAXCELL) {
            return Err(DomDecError::InvalidGrid(format!(
                "every axis needs 1..={DD_MAXCELL} cells, got {nc:?}"
            )));
        }
        if box_size.iter().any(|&l| !(l.is_finite() && l > 0.0)) {
            return Err(DomDecError::InvalidGrid(format!(
                "box edges must be positive, got {box_size:?}"
            )));
        }
        let dims: ArrayVec<usize, 3> = (0..3).filter(|&d| nc[d] > 1).collect();
        let shifts = ZONE_ORDER[..1 << dims.len()]
            .iter()
            .map(|z| {
                let mut s = [0; 3];
                for (i, &d) in dims.iter().enumerate() {
                    s[d] = z[i];
                }
                s
            })
            .collect();
        Ok(Self {
            nc,
            box_size,
            dims,
            shifts,
        })
    }

    /// Factor `n_nodes` into the grid with the smallest halo surface.
    ///
    /// A candidate is valid if every axis has at most [`DD_MAXCELL`] cells, at
    /// most `target_ndim` axes are decomposed and every decomposed cell is at
    /// least `cutoff` wide. Ties keep the first candidate in x-major order.
    pub fn choose(
        n_nodes: usize,
        target_ndim: usize,
        box_size: Vec3,
        cutoff: f64,
    ) -> Result<Self, DomDecError> {
        if !(1..=3).contains(&target_ndim) {
            return Err(DomDecError::InvalidConfig(format!(
                "target_ndim must be in 1..=3, got {target_ndim}"
            )));
        }
        if n_nodes == 0 {
            return Err(DomDecError::InvalidConfig("n_nodes must be at least 1".into()));
        }
        let mut best: Option<([usize; 3], f64)> = None;
        for (nx, ny, nz) in iproduct!(1..=DD_MAXCELL, 1..=DD_MAXCELL, 1..=DD_MAXCELL) {
            if nx * ny * nz != n_nodes {
                continue;
            }
            let nc = [nx, ny, nz];
            let decomposed: ArrayVec<usize, 3> = (0..3).filter(|&d| nc[d] > 1).collect();
            if decomposed.len() > target_ndim {
                continue;
            }
            let len = [
                box_size[0] / nx as f64,
                box_size[1] / ny as f64,
                box_size[2] / nz as f64,
            ];
            if decomposed.iter().any(|&d| len[d] < cutoff) {
                continue;
            }
            let cost: f64 = decomposed
                .iter()
                .map(|&d| cutoff * (0..3).filter(|&e| e != d).map(|e| len[e]).product::<f64>())
                .sum();
            if best.is_none_or(|(_, c)| cost < c) {
                best = Some((nc, cost));
            }
        }
        let (nc, cost) = best.ok_or(DomDecError::NoValidGrid {
            n_nodes,
            max_ndim: target_ndim,
            max_cells: DD_MAXCELL,
        })?;
        info!("domain decomposition grid {} x {} x {} (halo surface {cost:.4})", nc[0], nc[1], nc[2]);
        Self::new(nc, box_size)
    }

    pub fn nc(&self) -> [usize; 3] {
        self.nc
    }

    pub fn box_size(&self) -> Vec3 {
        self.box_size
    }

    pub fn n_nodes(&self) -> usize {
        self.nc.iter().product()
    }

    /// Decomposed axes in x, y, z order.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Number of zones including the home zone, `2^ndim`.
    pub fn n_zones(&self) -> usize {
        self.shifts.len()
    }

    /// Cell-space shift of zone `c` relative to the home cell.
    pub fn zone_shift(&self, c: usize) -> IVec {
        self.shifts[c]
    }

    pub fn zone_shifts(&self) -> &[IVec] {
        &self.shifts
    }

    /// `(i, j0, j1)` per i-zone.
    pub fn i_zones(&self) -> &'static [[usize; 3]] {
        match self.ndim() {
            0 => &IZONES_0D,
            1 => &IZONES_1D,
            2 => &IZONES_2D,
            _ => &IZONES_3D,
        }
    }

    pub fn cell_of_node(&self, node: usize) -> [usize; 3] {
        let [_, ny, nz] = self.nc;
        [node / (ny * nz), (node / nz) % ny, node % nz]
    }

    pub fn node_of_cell(&self, cell: [usize; 3]) -> usize {
        let [_, ny, nz] = self.nc;
        (cell[0] * ny + cell[1]) * nz + cell[2]
    }

    /// Node whose cell is `shift` cells away from `node`'s, wrapping periodically.
    pub fn shifted_node(&self, node: usize, shift: IVec) -> usize {
        let c = self.cell_of_node(node);
        let mut t = [0usize; 3];
        for d in 0..3 {
            let n = self.nc[d] as i64;
            t[d] = (c[d] as i64 + shift[d] as i64).rem_euclid(n) as usize;
        }
        self.node_of_cell(t)
    }

    /// Forward or backward neighbor of `node` along decomposed axis `dims()[dim_index]`.
    pub fn neighbor(&self, node: usize, dim_index: usize, dir: Direction) -> usize {
        let mut shift = [0; 3];
        shift[self.dims[dim_index]] = dir.sign();
        self.shifted_node(node, shift)
    }

    /// Edge lengths of one cell.
    pub fn cell_size(&self) -> Vec3 {
        [
            self.box_size[0] / self.nc[0] as f64,
            self.box_size[1] / self.nc[1] as f64,
            self.box_size[2] / self.nc[2] as f64,
        ]
    }

    /// Lower and upper corner of a cell.
    pub fn cell_bounds(&self, cell: [usize; 3]) -> (Vec3, Vec3) {
        let s = self.cell_size();
        let lo = [
            cell[0] as f64 * s[0],
            cell[1] as f64 * s[1],
            cell[2] as f64 * s[2],
        ];
        (lo, [lo[0] + s[0], lo[1] + s[1], lo[2] + s[2]])
    }

    /// Number of box vectors to subtract from `x` to bring it into `[0, L)`.
    pub fn box_shift(&self, x: Vec3) -> IVec {
        let mut s = [0; 3];
        for d in 0..3 {
            s[d] = (x[d] / self.box_size[d]).floor() as i32;
        }
        s
    }

    /// `x` wrapped into the primary box.
    pub fn wrap(&self, x: Vec3) -> Vec3 {
        let s = self.box_shift(x);
        let mut w = x;
        for d in 0..3 {
            w[d] -= s[d] as f64 * self.box_size[d];
            // rounding can leave x == L
            if w[d] >= self.box_size[d] {
                w[d] = 0.0;
            }
        }
        w
    }

    /// Cell containing `x` after periodic wrapping.
    pub fn cell_of_position(&self, x: Vec3) -> [usize; 3] {
        let w = self.wrap(x);
        let s = self.cell_size();
        let mut c = [0usize; 3];
        for d in 0..3 {
            c[d] = ((w[d] / s[d]).floor() as usize).min(self.nc[d] - 1);
        }
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_of_eight_nodes() {
        let g = CellGrid::choose(8, 3, [3.0; 3], 1.0).unwrap();
        assert_eq!(g.nc(), [2, 2, 2]);
        assert_eq!(g.n_zones(), 8);
        assert_eq!(g.i_zones().len(), 4);
    }

    #[test]
    fn single_node_has_one_zone() {
        let g = CellGrid::choose(1, 3, [2.0; 3], 1.0).unwrap();
        assert_eq!(g.ndim(), 0);
        assert_eq!(g.n_zones(), 1);
        assert_eq!(g.i_zones(), &[[0, 0, 1]]);
    }

    #[test]
    fn prime_above_max_cells_fails() {
        assert_eq!(
            CellGrid::choose(11, 3, [10.0; 3], 0.5).unwrap_err(),
            DomDecError::NoValidGrid {
                n_nodes: 11,
                max_ndim: 3,
                max_cells: DD_MAXCELL
            }
        );
    }

    #[test]
    fn cutoff_limits_cells() {
        // 4 cells along one axis would be 0.75 wide, below the cutoff
        let g = CellGrid::choose(4, 3, [3.0, 3.0, 3.0], 1.0).unwrap();
        assert_eq!(g.nc(), [1, 2, 2]);
        assert!(CellGrid::choose(4, 1, [3.0; 3], 1.0).is_err());
    }

    #[test]
    fn elongated_box_prefers_long_axis() {
        let g = CellGrid::choose(4, 3, [8.0, 2.0, 2.0], 0.5).unwrap();
        assert_eq!(g.nc(), [4, 1, 1]);
    }

    #[test]
    fn zone_shifts_follow_decomposed_axes() {
        let g = CellGrid::new([2, 1, 3], [1.0; 3]).unwrap();
        assert_eq!(g.dims(), &[0, 2]);
        assert_eq!(g.zone_shifts(), &[[0, 0, 0], [1, 0, 0], [1, 0, 1], [0, 0, 1]]);
    }

    #[test]
    fn node_numbering_is_x_major() {
        let g = CellGrid::new([2, 3, 4], [1.0; 3]).unwrap();
        assert_eq!(g.node_of_cell([1, 2, 3]), 23);
        assert_eq!(g.cell_of_node(23), [1, 2, 3]);
        assert_eq!(g.neighbor(0, 0, Direction::Backward), 12);
        assert_eq!(g.neighbor(0, 2, Direction::Backward), 3);
    }

    #[test]
    fn positions_wrap_into_cells() {
        let g = CellGrid::new([2, 2, 1], [2.0, 2.0, 2.0]).unwrap();
        assert_eq!(g.cell_of_position([1.5, 0.5, 0.5]), [1, 0, 0]);
        assert_eq!(g.cell_of_position([-0.5, 2.5, 7.0]), [1, 0, 0]);
        assert_eq!(g.box_shift([-0.5, 2.5, 0.1]), [-1, 1, 0]);
    }

    #[test]
    fn invalid_explicit_grid() {
        assert!(matches!(
            CellGrid::new([9, 1, 1], [1.0; 3]),
            Err(DomDecError::InvalidGrid(_))
        ));
    }
}
