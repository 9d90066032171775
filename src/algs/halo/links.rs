//! Ghost links: which home charge groups go to which node for every zone.
//!
//! Zone `c` of node N holds home charge groups of node `N + shift[c]`; node N
//! therefore *sends* zone `c` to `N - shift[c]` and *receives* it from
//! `N + shift[c]`. A charge group is sent for zone `c` if its center lies
//! within the cutoff of the sender's lower cell face along every axis where
//! `shift[c]` is one.

use crate::Vec3;
use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{self, WireLinkHeader, cast_slice};
use crate::data::buffer::{BufferPool, GrowBuf};
use crate::data::local_domain::{LocalDomain, expect_slots};
use crate::dd_error::DomDecError;
use crate::topology::charge_groups::{ChargeGroups, geometric_center};
use crate::topology::grid::{CellGrid, DD_MAXCELL};
use crate::topology::ids::CgId;
use arrayvec::ArrayVec;
use log::trace;

/// One direction of a ghost link for a single zone.
#[derive(Clone, Debug, Default)]
pub struct GhostLink {
    /// Node at the other end.
    pub peer: usize,
    pub ncg: usize,
    pub nat: usize,
    /// Global ids of the linked charge groups.
    pub index_gl: GrowBuf<u32>,
    /// Local charge-group indices of the linked charge groups.
    pub index: GrowBuf<u32>,
    /// Box translation added to positions on the way out (send side only).
    pub pbc: Vec3,
}

impl GhostLink {
    fn clear(&mut self) {
        self.peer = 0;
        self.ncg = 0;
        self.nat = 0;
        self.index_gl.clear();
        self.index.clear();
        self.pbc = [0.0; 3];
    }

    /// Tracked capacities of the id buffers.
    pub fn capacities(&self) -> [usize; 2] {
        [self.index_gl.nalloc(), self.index.nalloc()]
    }
}

/// Send and receive link per ghost zone. Slot 0 (home) is unused.
#[derive(Clone, Debug, Default)]
pub struct GhostLinks {
    pub(crate) send: ArrayVec<GhostLink, DD_MAXCELL>,
    pub(crate) recv: ArrayVec<GhostLink, DD_MAXCELL>,
    n_zones: usize,
}

impl GhostLinks {
    pub fn new() -> Self {
        Self::default()
    }

    fn prepare(&mut self, n_zones: usize) {
        while self.send.len() < n_zones {
            self.send.push(GhostLink::default());
            self.recv.push(GhostLink::default());
        }
        for l in self.send.iter_mut().chain(self.recv.iter_mut()) {
            l.clear();
        }
        self.n_zones = n_zones;
    }

    pub fn n_zones(&self) -> usize {
        self.n_zones
    }

    /// Link sending home charge groups for zone `c`.
    pub fn send_link(&self, c: usize) -> &GhostLink {
        &self.send[c]
    }

    /// Link receiving zone `c`.
    pub fn recv_link(&self, c: usize) -> &GhostLink {
        &self.recv[c]
    }

    /// Charge groups sent over all zones.
    pub fn total_sent_cg(&self) -> usize {
        self.send.iter().map(|l| l.ncg).sum()
    }
}

/// Build the ghost links for the current decomposition and append the
/// received zones to `domain`.
///
/// `x` holds the positions of the home atoms in local slot order. Zones are
/// processed in ascending order on every node.
#[allow(clippy::too_many_arguments)]
pub fn setup_ghost_links<C: Communicator>(
    links: &mut GhostLinks,
    comm: &C,
    tag: CommTag,
    grid: &CellGrid,
    cgs: &ChargeGroups,
    domain: &mut LocalDomain,
    x: &[Vec3],
    cutoff: f64,
    pool: &mut BufferPool,
) -> Result<(), DomDecError> {
    let n_zones = grid.n_zones();
    links.prepare(n_zones);
    let node = comm.rank();
    let my_cell = grid.cell_of_node(node);
    let (lo, _) = grid.cell_bounds(my_cell);
    let box_size = grid.box_size();
    let home_lcgs = domain.zone_cg_range(0);
    let home_ids: Vec<CgId> = domain.home_cgs().to_vec();
    expect_slots("home positions", x.len(), domain.nat_home())?;
    let mut maybe_err = None;

    for c in 1..n_zones {
        let shift = grid.zone_shift(c);
        let back = [-shift[0], -shift[1], -shift[2]];
        let send_to = grid.shifted_node(node, back);
        let recv_from = grid.shifted_node(node, shift);

        // select what this node contributes to zone c of `send_to`
        let link = &mut links.send[c];
        link.peer = send_to;
        for d in 0..3 {
            if shift[d] == 1 && my_cell[d] == 0 {
                link.pbc[d] = box_size[d];
            }
        }
        pool.int1.clear();
        for (k, lcg) in home_lcgs.clone().enumerate() {
            let center = geometric_center(&x[domain.cg_atoms(lcg)]);
            let near = (0..3).all(|d| shift[d] == 0 || center[d] - lo[d] < cutoff);
            if near {
                let g = home_ids[k];
                link.index.push(lcg as u32)?;
                link.index_gl.push(g.get())?;
                pool.int1.push(g.get())?;
                link.nat += cgs.size(g);
            }
        }
        link.ncg = link.index.len();

        // header, then ids
        let header = WireLinkHeader::new(link.ncg, link.nat);
        let h_recv = comm.irecv(recv_from, tag.offset(2 * c as u16).as_u16());
        let h_send = comm.isend(
            send_to,
            tag.offset(2 * c as u16).as_u16(),
            cast_slice(std::slice::from_ref(&header)),
        );
        let id_recv = comm.irecv(recv_from, tag.offset(2 * c as u16 + 1).as_u16());
        let mut ids_out = Vec::with_capacity(4 * pool.int1.len());
        wire::put_u32s(&mut ids_out, pool.int1.as_slice().iter().copied());
        let id_send = comm.isend(send_to, tag.offset(2 * c as u16 + 1).as_u16(), &ids_out);

        let got_header = h_recv.wait();
        let got_ids = id_recv.wait();
        let _ = h_send.wait();
        let _ = id_send.wait();

        // keep exchanging after a bad zone; only the first error is returned
        if maybe_err.is_some() {
            continue;
        }
        match accept_zone(domain, cgs, &mut links.recv[c], c, recv_from, got_header, got_ids) {
            Ok(()) => trace!(
                "zone {c}: node {node} sends {} cgs ({} atoms) to {send_to}, receives {} cgs ({} atoms) from {recv_from}",
                links.send[c].ncg,
                links.send[c].nat,
                links.recv[c].ncg,
                links.recv[c].nat
            ),
            Err(e) => maybe_err = Some(e),
        }
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Check a received zone against its header and append it to `domain`.
fn accept_zone(
    domain: &mut LocalDomain,
    cgs: &ChargeGroups,
    link: &mut GhostLink,
    c: usize,
    from: usize,
    header: Option<Vec<u8>>,
    ids: Option<Vec<u8>>,
) -> Result<(), DomDecError> {
    let header = WireLinkHeader::decode(
        from,
        &header.ok_or_else(|| DomDecError::comm(from, "no ghost link header"))?,
    )?;
    let ids = wire::decode_cg_ids(
        from,
        &ids.ok_or_else(|| DomDecError::comm(from, "no ghost link id list"))?,
        header.ncg(),
    )?;
    let mut implied = 0usize;
    for &g in &ids {
        cgs.check(g)?;
        implied += cgs.size(g);
    }
    if implied != header.nat() {
        return Err(DomDecError::LinkCountMismatch {
            neighbor: from,
            zone: c,
            declared: header.nat(),
            expected: implied,
        });
    }

    let atoms = domain.push_zone(&ids, cgs)?;
    debug_assert_eq!(atoms.len(), implied);
    link.peer = from;
    link.ncg = ids.len();
    link.nat = implied;
    let first = domain.zone_cg_range(c).start;
    for (k, g) in ids.iter().enumerate() {
        link.index_gl.push(g.get())?;
        link.index.push((first + k) as u32)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::master::Epoch;

    #[test]
    fn short_home_positions_are_an_error() {
        let grid = CellGrid::new([1, 1, 1], [4.0; 3]).unwrap();
        let cgs = ChargeGroups::single_atoms(2);
        let mut domain = LocalDomain::new(2, grid.n_zones());
        domain
            .rebuild_from_assignment(&[CgId::new(0), CgId::new(1)], &cgs, Epoch::INITIAL)
            .unwrap();
        let mut links = GhostLinks::new();
        let mut pool = BufferPool::new();
        let res = setup_ghost_links(
            &mut links,
            &NoComm,
            CommTag::new(0x80),
            &grid,
            &cgs,
            &mut domain,
            &[[1.0; 3]],
            0.5,
            &mut pool,
        );
        assert!(matches!(res, Err(DomDecError::InvalidTopology(_))));
        assert_eq!(domain.zones_filled(), 1);
    }
}
