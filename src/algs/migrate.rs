//! Move home charge groups whose center left the node's cell.
//!
//! Decomposed axes are handled one at a time in x, y, z order. Along each axis
//! a group goes to the forward or backward neighbor, one cell at most; a group
//! arriving from one axis is re-examined along the next one, so diagonal moves
//! take several hops. Along each decomposed axis every group is translated by
//! whole box vectors so that its center lies inside the box.

use crate::Vec3;
use crate::algs::collective::sendrecv;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::distribute::GroupPayload;
use crate::dd_error::DomDecError;
use crate::topology::charge_groups::{ChargeGroups, geometric_center};
use crate::topology::grid::{CellGrid, Direction};
use crate::topology::ids::CgId;
use bytes::BytesMut;
use log::debug;

/// True if any of the groups `home`, with atom positions `x` in group order,
/// has its center outside `node`'s cell.
pub fn any_outside_cell(
    grid: &CellGrid,
    node: usize,
    cgs: &ChargeGroups,
    home: &[CgId],
    x: &[Vec3],
) -> Result<bool, DomDecError> {
    let nat = home_atom_count(cgs, home)?;
    if x.len() < nat {
        return Err(DomDecError::InvalidTopology(format!(
            "{} positions for {nat} home atoms",
            x.len()
        )));
    }
    let cell = grid.cell_of_node(node);
    let mut at = 0usize;
    Ok(home.iter().any(|&g| {
        let n = cgs.size(g);
        let c = geometric_center(&x[at..at + n]);
        at += n;
        grid.cell_of_position(c) != cell
    }))
}

fn home_atom_count(cgs: &ChargeGroups, home: &[CgId]) -> Result<usize, DomDecError> {
    home.iter().try_fold(0usize, |n, &g| {
        cgs.check(g)?;
        Ok(n + cgs.size(g))
    })
}

/// Pass groups to neighbors until each is on the node owning its cell.
///
/// Returns the new home set of this node.
pub fn migrate_home_groups<C: Communicator>(
    comm: &C,
    tag: CommTag,
    grid: &CellGrid,
    cgs: &ChargeGroups,
    home: GroupPayload,
) -> Result<GroupPayload, DomDecError> {
    let node = comm.rank();
    let my_cell = grid.cell_of_node(node);
    let box_size = grid.box_size();
    let mut current = home;
    let mut maybe_err = None;

    for (i, &d) in grid.dims().iter().enumerate() {
        let nc = grid.nc()[d];
        let mut keep = GroupPayload::default();
        let mut out = [GroupPayload::default(), GroupPayload::default()];
        let mut at = 0usize;
        for &g in &current.cgs {
            let n = cgs.size(g);
            let span = at..at + n;
            at += n;
            let center = geometric_center(&current.x[span.clone()]);
            let target = grid.cell_of_position(center)[d];
            let dir = if target == my_cell[d] {
                None
            } else if nc == 2 || target == (my_cell[d] + 1) % nc {
                Some(Direction::Forward)
            } else if target == (my_cell[d] + nc - 1) % nc {
                Some(Direction::Backward)
            } else {
                maybe_err.get_or_insert(DomDecError::CgMovedTooFar { cg: g, dim: d });
                None
            };
            let dst = match dir {
                None => &mut keep,
                Some(dir) => &mut out[dir as usize],
            };
            dst.cgs.push(g);
            let wrap = grid.box_shift(center)[d] as f64 * box_size[d];
            for k in span {
                let mut p = current.x[k];
                p[d] -= wrap;
                dst.x.push(p);
                if !current.v.is_empty() {
                    dst.v.push(current.v[k]);
                }
            }
        }

        let fwd = grid.neighbor(node, i, Direction::Forward);
        let bwd = grid.neighbor(node, i, Direction::Backward);
        let mut buf = BytesMut::new();
        // forward-moving groups arrive from the backward neighbor and vice versa
        for (dir, to, from) in [(Direction::Forward, fwd, bwd), (Direction::Backward, bwd, fwd)] {
            buf.clear();
            out[dir as usize].encode_into(&mut buf);
            let t = tag.offset((2 * i + dir as usize) as u16);
            let data = sendrecv(comm, to, from, t, &buf)?;
            let got = GroupPayload::decode(from, &data, cgs)?;
            if let Err(e) = append(&mut keep, got, from) {
                maybe_err.get_or_insert(e);
            }
        }
        debug!(
            "migration along axis {d}: node {node} sent {}/{} cgs forward/backward, now holds {}",
            out[0].cgs.len(),
            out[1].cgs.len(),
            keep.cgs.len()
        );
        current = keep;
    }

    match maybe_err {
        Some(e) => Err(e),
        None => Ok(current),
    }
}

/// Append `got` to `keep`; both must carry velocities or neither.
fn append(keep: &mut GroupPayload, got: GroupPayload, from: usize) -> Result<(), DomDecError> {
    if !keep.x.is_empty() && !got.x.is_empty() && keep.v.is_empty() != got.v.is_empty() {
        return Err(DomDecError::malformed(from, "migrated groups disagree on carrying velocities"));
    }
    keep.cgs.extend(got.cgs);
    keep.x.extend(got.x);
    keep.v.extend(got.v);
    Ok(())
}
