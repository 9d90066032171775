//! Per-step halo traffic along the ghost links.
//!
//! Forward (owner → ghost) runs zones in ascending order; reverse (ghost →
//! owner) runs them in descending order. Every receive must carry exactly the
//! number of atoms recorded on the link.

use crate::Vec3;
use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::delta::{AddDelta, CopyDelta, Delta, fuse_all};
use crate::algs::halo::links::GhostLinks;
use crate::algs::wire::{cast_slice, copy_vec3s};
use crate::data::buffer::BufferPool;
use crate::data::local_domain::{LocalDomain, expect_slots};
use crate::dd_error::DomDecError;

/// Send home values to the nodes holding them as ghosts and fuse the received
/// ghost values with `D`.
pub fn exchange_forward<C, D>(
    links: &GhostLinks,
    comm: &C,
    tag: CommTag,
    domain: &LocalDomain,
    vals: &mut [Vec3],
    pool: &mut BufferPool,
    add_pbc: bool,
) -> Result<(), DomDecError>
where
    C: Communicator,
    D: Delta<Vec3>,
{
    expect_slots("halo values", vals.len(), domain.total_local_atoms())?;
    for c in 1..links.n_zones() {
        let (out, inc) = (&links.send[c], &links.recv[c]);
        pool.vec_send.clear();
        pool.vec_send.ensure(out.nat)?;
        for &lcg in out.index.as_slice() {
            for a in domain.cg_atoms(lcg as usize) {
                let mut v = D::restrict(&vals[a]);
                if add_pbc {
                    for d in 0..3 {
                        v[d] += out.pbc[d];
                    }
                }
                pool.vec_send.push(v)?;
            }
        }
        let t = tag.offset(c as u16).as_u16();
        let recv = comm.irecv(inc.peer, t);
        let send = comm.isend(out.peer, t, cast_slice(pool.vec_send.as_slice()));
        let data = recv.wait();
        let _ = send.wait();
        let data = data.ok_or_else(|| DomDecError::comm(inc.peer, "no halo data received"))?;

        let incoming = pool.vec_recv.resize(inc.nat)?;
        copy_vec3s(inc.peer, &data, incoming)?;
        fuse_all::<D>(&mut vals[domain.zone_atoms(c)], pool.vec_recv.as_slice());
    }
    Ok(())
}

/// Send ghost values back to their owners and fuse them into the home values with `D`.
pub fn exchange_reverse<C, D>(
    links: &GhostLinks,
    comm: &C,
    tag: CommTag,
    domain: &LocalDomain,
    vals: &mut [Vec3],
    pool: &mut BufferPool,
) -> Result<(), DomDecError>
where
    C: Communicator,
    D: Delta<Vec3>,
{
    expect_slots("halo values", vals.len(), domain.total_local_atoms())?;
    for c in (1..links.n_zones()).rev() {
        let (owner_side, ghost_side) = (&links.send[c], &links.recv[c]);
        let zone = domain.zone_atoms(c);
        pool.vec_send.clear();
        pool.vec_send.ensure(zone.len())?;
        for v in &vals[zone] {
            pool.vec_send.push(D::restrict(v))?;
        }
        let t = tag.offset(c as u16).as_u16();
        let recv = comm.irecv(owner_side.peer, t);
        let send = comm.isend(ghost_side.peer, t, cast_slice(pool.vec_send.as_slice()));
        let data = recv.wait();
        let _ = send.wait();
        let data = data.ok_or_else(|| DomDecError::comm(owner_side.peer, "no halo data received"))?;

        let incoming = pool.vec_recv.resize(owner_side.nat)?;
        copy_vec3s(owner_side.peer, &data, incoming)?;
        let mut k = 0usize;
        for &lcg in owner_side.index.as_slice() {
            for a in domain.cg_atoms(lcg as usize) {
                D::fuse(&mut vals[a], pool.vec_recv.as_slice()[k]);
                k += 1;
            }
        }
    }
    Ok(())
}

/// Refresh ghost coordinates from their owners.
pub fn move_x<C: Communicator>(
    links: &GhostLinks,
    comm: &C,
    tag: CommTag,
    domain: &LocalDomain,
    x: &mut [Vec3],
    pool: &mut BufferPool,
) -> Result<(), DomDecError> {
    exchange_forward::<C, CopyDelta>(links, comm, tag, domain, x, pool, true)
}

/// Accumulate ghost forces onto their owners.
pub fn move_f<C: Communicator>(
    links: &GhostLinks,
    comm: &C,
    tag: CommTag,
    domain: &LocalDomain,
    f: &mut [Vec3],
    pool: &mut BufferPool,
) -> Result<(), DomDecError> {
    exchange_reverse::<C, AddDelta>(links, comm, tag, domain, f, pool)
}
