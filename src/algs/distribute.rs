//! Scatter charge groups from the coordinator and gather them back.
//!
//! Each node's share travels as one [`GroupPayload`] message, framed as counts
//! followed by payloads of those counts:
//!
//! ```text
//! u32 ncg | u32 nat | u32 has_v | ncg x u32 cg id | nat x 3 f64 x | [nat x 3 f64 v]
//! ```
//!
//! all little-endian.

use crate::Vec3;
use crate::algs::collective::{gather_to_root, scatter_from_root};
use crate::algs::communicator::{CommTag, Communicator};
use crate::data::master::AssignmentView;
use crate::data::state::GlobalState;
use crate::dd_error::DomDecError;
use crate::topology::charge_groups::ChargeGroups;
use crate::topology::ids::CgId;
use bytes::{Buf, BufMut, BytesMut};
use log::{debug, info};

const HEADER_BYTES: usize = 12;

/// Charge groups together with the state of their atoms, in cg order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupPayload {
    pub cgs: Vec<CgId>,
    pub x: Vec<Vec3>,
    /// Empty when velocities are not carried.
    pub v: Vec<Vec3>,
}

impl GroupPayload {
    pub fn nat(&self) -> usize {
        self.x.len()
    }

    /// Copy the atoms of `ids` out of global arrays.
    pub fn from_global(ids: &[CgId], cgs: &ChargeGroups, x: &[Vec3], v: &[Vec3]) -> Self {
        let mut p = GroupPayload {
            cgs: ids.to_vec(),
            ..Default::default()
        };
        for &g in ids {
            p.x.extend_from_slice(&x[cgs.atoms(g)]);
            if !v.is_empty() {
                p.v.extend_from_slice(&v[cgs.atoms(g)]);
            }
        }
        p
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        let has_v = !self.v.is_empty();
        buf.reserve(HEADER_BYTES + 4 * self.cgs.len() + 24 * self.nat() * (1 + has_v as usize));
        buf.put_u32_le(self.cgs.len() as u32);
        buf.put_u32_le(self.nat() as u32);
        buf.put_u32_le(has_v as u32);
        for g in &self.cgs {
            buf.put_u32_le(g.get());
        }
        for p in self.x.iter().chain(self.v.iter()) {
            for &c in p {
                buf.put_f64_le(c);
            }
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Decode and check against the topology: ids in range, atom count consistent.
    pub fn decode(neighbor: usize, data: &[u8], cgs: &ChargeGroups) -> Result<Self, DomDecError> {
        let mut buf = data;
        if buf.remaining() < HEADER_BYTES {
            return Err(DomDecError::malformed(neighbor, "truncated group header"));
        }
        let ncg = buf.get_u32_le() as usize;
        let nat = buf.get_u32_le() as usize;
        let has_v = match buf.get_u32_le() {
            0 => false,
            1 => true,
            f => return Err(DomDecError::malformed(neighbor, format!("bad velocity flag {f}"))),
        };
        let body = 4 * ncg + 24 * nat * (1 + has_v as usize);
        if buf.remaining() != body {
            return Err(DomDecError::BufferSizeMismatch {
                neighbor,
                expected: HEADER_BYTES + body,
                got: data.len(),
            });
        }
        let mut out = GroupPayload {
            cgs: Vec::with_capacity(ncg),
            x: Vec::with_capacity(nat),
            v: Vec::with_capacity(if has_v { nat } else { 0 }),
        };
        let mut implied = 0usize;
        for _ in 0..ncg {
            let g = CgId::new(buf.get_u32_le());
            cgs.check(g)?;
            implied += cgs.size(g);
            out.cgs.push(g);
        }
        if implied != nat {
            return Err(DomDecError::malformed(
                neighbor,
                format!("header declares {nat} atoms, charge groups hold {implied}"),
            ));
        }
        let mut read = |n: usize, dst: &mut Vec<Vec3>| {
            for _ in 0..n {
                dst.push([buf.get_f64_le(), buf.get_f64_le(), buf.get_f64_le()]);
            }
        };
        read(nat, &mut out.x);
        if has_v {
            read(nat, &mut out.v);
        }
        Ok(out)
    }
}

/// Send every node its home charge groups with positions (and velocities).
///
/// On `root`, `view` and `global` must be given; elsewhere they are ignored.
pub fn distribute_from_master<C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    view: Option<AssignmentView<'_>>,
    cgs: &ChargeGroups,
    global: Option<&GlobalState>,
) -> Result<GroupPayload, DomDecError> {
    let payloads = if comm.rank() == root {
        let view = view.ok_or(DomDecError::NotCoordinator)?;
        let global = global.ok_or(DomDecError::NotCoordinator)?;
        if global.natoms() != cgs.natoms() {
            return Err(DomDecError::InvalidTopology(format!(
                "{} positions for {} atoms",
                global.natoms(),
                cgs.natoms()
            )));
        }
        let all: Vec<Vec<u8>> = (0..view.n_nodes())
            .map(|node| {
                GroupPayload::from_global(view.cgs(node), cgs, &global.x, &global.v)
                    .encode()
                    .to_vec()
            })
            .collect();
        info!(
            "distributing {} charge groups over {} nodes",
            view.total_cg(),
            view.n_nodes()
        );
        Some(all)
    } else {
        None
    };
    let mine = scatter_from_root(comm, root, tag, payloads.as_deref())?;
    let home = GroupPayload::decode(root, &mine, cgs)?;
    debug!(
        "node {} received {} home charge groups ({} atoms)",
        comm.rank(),
        home.cgs.len(),
        home.nat()
    );
    Ok(home)
}

/// Gather every node's home charge groups and state on `root`.
///
/// Returns, on `root` only, the per-node charge-group lists and the state in
/// global atom order.
pub fn collect_to_master<C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    cgs: &ChargeGroups,
    home: &GroupPayload,
) -> Result<Option<(Vec<Vec<CgId>>, GlobalState)>, DomDecError> {
    let bytes = home.encode();
    let Some(all) = gather_to_root(comm, root, tag, &bytes)? else {
        return Ok(None);
    };
    let natoms = cgs.natoms();
    let mut global = GlobalState::positions_only(vec![[0.0; 3]; natoms]);
    let mut lists = Vec::with_capacity(all.len());
    for (node, data) in all.iter().enumerate() {
        let part = GroupPayload::decode(node, data, cgs)?;
        if !part.v.is_empty() && global.v.is_empty() {
            global.v = vec![[0.0; 3]; natoms];
        }
        let mut at = 0usize;
        for &g in &part.cgs {
            let r = cgs.atoms(g);
            let n = r.len();
            global.x[r.clone()].copy_from_slice(&part.x[at..at + n]);
            if !part.v.is_empty() {
                global.v[r].copy_from_slice(&part.v[at..at + n]);
            }
            at += n;
        }
        lists.push(part.cgs);
    }
    Ok(Some((lists, global)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_checks_atom_count() {
        let cgs = ChargeGroups::from_sizes(&[2, 1]).unwrap();
        let p = GroupPayload {
            cgs: vec![CgId::new(0)],
            x: vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            v: vec![],
        };
        let bytes = p.encode();
        assert_eq!(GroupPayload::decode(0, &bytes, &cgs).unwrap(), p);

        let wrong = GroupPayload {
            cgs: vec![CgId::new(1)],
            ..p.clone()
        };
        assert!(matches!(
            GroupPayload::decode(3, &wrong.encode(), &cgs),
            Err(DomDecError::MalformedMessage { neighbor: 3, .. })
        ));
        assert!(matches!(
            GroupPayload::decode(3, &bytes[..bytes.len() - 1], &cgs),
            Err(DomDecError::BufferSizeMismatch { .. })
        ));
    }

    #[test]
    fn unknown_group_is_rejected() {
        let cgs = ChargeGroups::single_atoms(2);
        let p = GroupPayload {
            cgs: vec![CgId::new(5)],
            x: vec![[0.0; 3]],
            v: vec![],
        };
        assert!(matches!(
            GroupPayload::decode(0, &p.encode(), &cgs),
            Err(DomDecError::CgOutOfRange { .. })
        ));
    }
}
