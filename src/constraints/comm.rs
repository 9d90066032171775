//! Request, delivery and per-step exchange of extra atoms.
//!
//! Setup runs two passes over the decomposed axes:
//!
//! * **requests**, axes ascending, both directions: each node sends its list
//!   of pending atoms to the neighbor; a node that cannot serve a request
//!   itself adds it to its own pending list for the higher axes;
//! * **delivery**, axes descending: each node answers every request it can
//!   now serve, and the requester appends the atoms it did not have yet as
//!   extras.
//!
//! The answers of the delivery pass fix the [`AtomSend`] descriptors that all
//! later position and force exchanges follow.

use super::{ConstraintPhase, ConstraintResolver};
use crate::Vec3;
use crate::algs::collective::sendrecv;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{cast_slice, copy_vec3s, decode_atom_ids, encode_atom_ids};
use crate::data::local_domain::LocalDomain;
use crate::dd_error::DomDecError;
use crate::topology::grid::{CellGrid, Direction};
use crate::topology::ids::AtomId;
use hashbrown::HashSet;
use log::{debug, trace};

/// Transfers on one axis and direction.
///
/// Positions of the `send` slots go to the neighbor opposite the direction;
/// positions from the neighbor in the direction land in the `recv` slots.
/// A `None` receive slot is an atom this node already had: its data is
/// discarded, and zero force is returned for it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AtomSend {
    pub send: Vec<u32>,
    pub recv: Vec<Option<u32>>,
}

impl AtomSend {
    fn clear(&mut self) {
        self.send.clear();
        self.recv.clear();
    }
}

/// Tag slot of a request/delivery/exchange on axis `i`, direction `dir`.
fn slot(i: usize, dir: Direction) -> u16 {
    (2 * i + dir as usize) as u16
}

/// Periodic image of `x` nearest to `reference` along the decomposed axes.
fn nearest_image(mut x: Vec3, reference: Vec3, grid: &CellGrid) -> Vec3 {
    let l = grid.box_size();
    for &d in grid.dims() {
        x[d] -= l[d] * ((x[d] - reference[d]) / l[d]).round();
    }
    x
}

impl ConstraintResolver {
    /// Exchange requests with the neighbors and append the delivered atoms
    /// to `domain` as extras.
    pub fn setup_communication<C: Communicator>(
        &mut self,
        comm: &C,
        tag: CommTag,
        grid: &CellGrid,
        domain: &mut LocalDomain,
    ) -> Result<(), DomDecError> {
        self.expect_phase(ConstraintPhase::ExchangeRequests)?;
        self.expect_current(domain)?;
        let node = comm.rank();
        let ndim = grid.ndim();
        domain.clear_extras();
        for row in self.cas.iter_mut() {
            for a in row.iter_mut() {
                a.clear();
            }
        }
        self.nreq = Default::default();

        // requests, axes ascending
        self.ibuf.clear();
        for a in &self.ind_req {
            self.ibuf.push(a.get())?;
        }
        let mut pending_set: HashSet<u32> = self.ibuf.as_slice().iter().copied().collect();
        let mut requests_in: [[Vec<AtomId>; 2]; 3] = Default::default();
        for i in 0..ndim {
            let mut relay = Vec::new();
            for dir in Direction::BOTH {
                let to = grid.neighbor(node, i, dir);
                let from = grid.neighbor(node, i, dir.opposite());
                let out: Vec<AtomId> = self.ibuf.as_slice().iter().map(|&a| AtomId::new(a)).collect();
                let data = sendrecv(comm, to, from, tag.offset(slot(i, dir)), &encode_atom_ids(&out))?;
                let got = decode_atom_ids(from, &data)?;
                for &a in &got {
                    if domain.resolve(a).is_none() && !pending_set.contains(&a.get()) {
                        pending_set.insert(a.get());
                        relay.push(a.get());
                    }
                }
                self.nreq[i][dir as usize] = [out.len(), got.len()];
                requests_in[i][dir as usize] = got;
            }
            self.ibuf.extend_from_slice(&relay)?;
        }
        self.request_rounds += 1;

        // delivery, axes descending
        for i in (0..ndim).rev() {
            for dir in Direction::BOTH {
                let requester = grid.neighbor(node, i, dir.opposite());
                let server = grid.neighbor(node, i, dir);
                self.send_atom.clear();
                self.send_atom
                    .resize(domain.total_local_atoms_including_constraint_extras(), false);
                let cas = &mut self.cas[i][dir as usize];
                let mut served = Vec::new();
                for &a in &requests_in[i][dir as usize] {
                    if let Some(s) = domain.resolve_slot_including_extras(a) {
                        if !std::mem::replace(&mut self.send_atom[s], true) {
                            served.push(a);
                            cas.send.push(s as u32);
                        }
                    }
                }
                let t = tag.offset(8 + slot(i, dir));
                let data = sendrecv(comm, requester, server, t, &encode_atom_ids(&served))?;
                for a in decode_atom_ids(server, &data)? {
                    if domain.resolve_slot_including_extras(a).is_some() {
                        cas.recv.push(None);
                    } else {
                        cas.recv.push(Some(domain.append_constraint_atom(a)? as u32));
                    }
                }
                trace!(
                    "axis {i} dir {dir:?}: node {node} serves {} atoms to {requester}, receives {} from {server}",
                    cas.send.len(),
                    cas.recv.len()
                );
            }
        }

        if let Some(&atom) = self
            .ind_req
            .iter()
            .find(|&&a| domain.resolve_slot_including_extras(a).is_none())
        {
            return Err(DomDecError::UnresolvedConstraintAtom { atom });
        }
        self.map_local_constraints(domain)?;
        self.plan_images(domain)?;
        self.phase = ConstraintPhase::ReceiveRemoteState;
        debug!(
            "constraint setup on node {node}: {} extra atoms",
            domain.extras().len()
        );
        Ok(())
    }

    /// Refresh the positions of extra atoms from their owners.
    ///
    /// Runs every step; `x` must cover home, ghost and extra atoms and hold
    /// current home and ghost positions. Each extra lands at the periodic
    /// image nearest to a partner it shares a constraint or bonded term with.
    pub fn communicate_positions<C: Communicator>(
        &mut self,
        comm: &C,
        tag: CommTag,
        grid: &CellGrid,
        domain: &LocalDomain,
        x: &mut [Vec3],
    ) -> Result<(), DomDecError> {
        if self.phase != ConstraintPhase::ReceiveRemoteState && self.phase != ConstraintPhase::Solve {
            return Err(DomDecError::ConstraintPhase {
                expected: ConstraintPhase::ReceiveRemoteState.name(),
                found: self.phase.name(),
            });
        }
        self.expect_current(domain)?;
        let node = comm.rank();
        let (lo, hi) = grid.cell_bounds(grid.cell_of_node(node));
        let center = [
            0.5 * (lo[0] + hi[0]),
            0.5 * (lo[1] + hi[1]),
            0.5 * (lo[2] + hi[2]),
        ];
        for i in (0..grid.ndim()).rev() {
            for dir in Direction::BOTH {
                let cas = &self.cas[i][dir as usize];
                self.vbuf.clear();
                for &s in &cas.send {
                    self.vbuf.push(x[s as usize])?;
                }
                let requester = grid.neighbor(node, i, dir.opposite());
                let server = grid.neighbor(node, i, dir);
                let data = sendrecv(
                    comm,
                    requester,
                    server,
                    tag.offset(slot(i, dir)),
                    cast_slice(self.vbuf.as_slice()),
                )?;
                let incoming = self.vbuf.resize(cas.recv.len())?;
                copy_vec3s(server, &data, incoming)?;
                for (k, s) in cas.recv.iter().enumerate() {
                    if let Some(s) = s {
                        x[*s as usize] = self.vbuf.as_slice()[k];
                    }
                }
            }
        }
        for &(s, anchor) in &self.image_plan {
            let reference = anchor.map_or(center, |a| x[a as usize]);
            x[s as usize] = nearest_image(x[s as usize], reference, grid);
        }
        self.phase = ConstraintPhase::Solve;
        Ok(())
    }

    /// Return forces accumulated on extra atoms to the nodes that served them.
    pub fn reverse_forces<C: Communicator>(
        &mut self,
        comm: &C,
        tag: CommTag,
        grid: &CellGrid,
        domain: &LocalDomain,
        f: &mut [Vec3],
    ) -> Result<(), DomDecError> {
        self.expect_phase(ConstraintPhase::Solve)?;
        self.expect_current(domain)?;
        let node = comm.rank();
        for i in 0..grid.ndim() {
            for dir in Direction::BOTH {
                let cas = &self.cas[i][dir as usize];
                self.vbuf.clear();
                for s in &cas.recv {
                    self.vbuf.push(s.map_or([0.0; 3], |s| f[s as usize]))?;
                }
                let requester = grid.neighbor(node, i, dir.opposite());
                let server = grid.neighbor(node, i, dir);
                let data = sendrecv(
                    comm,
                    server,
                    requester,
                    tag.offset(slot(i, dir)),
                    cast_slice(self.vbuf.as_slice()),
                )?;
                let incoming = self.vbuf.resize(cas.send.len())?;
                copy_vec3s(requester, &data, incoming)?;
                for (k, &s) in cas.send.iter().enumerate() {
                    let v = self.vbuf.as_slice()[k];
                    for d in 0..3 {
                        f[s as usize][d] += v[d];
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_follows_cell_center() {
        let grid = CellGrid::new([2, 1, 1], [4.0, 4.0, 4.0]).unwrap();
        let c = [3.0, 2.0, 2.0];
        assert_eq!(nearest_image([0.5, 0.5, 0.5], c, &grid), [4.5, 0.5, 0.5]);
        assert_eq!(nearest_image([2.5, 3.9, 0.5], c, &grid), [2.5, 3.9, 0.5]);
    }
}
