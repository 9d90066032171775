//! Collectives built from point-to-point messages.
//!
//! Every routine follows the same discipline: post all receives, post all
//! sends, wait on the receives while remembering only the first error, then
//! drain every send handle before returning. A failing peer therefore never
//! leaves an unfinished handle behind.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::expect_exact_len;
use crate::dd_error::DomDecError;

/// Send `payload` to `send_to` while receiving one message from `recv_from`.
pub fn sendrecv<C: Communicator>(
    comm: &C,
    send_to: usize,
    recv_from: usize,
    tag: CommTag,
    payload: &[u8],
) -> Result<Vec<u8>, DomDecError> {
    let recv = comm.irecv(recv_from, tag.as_u16());
    let send = comm.isend(send_to, tag.as_u16(), payload);
    let data = recv.wait();
    let _ = send.wait();
    data.ok_or_else(|| DomDecError::comm(recv_from, "no message received"))
}

/// Collect one payload from every node on `root`.
///
/// Returns `Some(payloads)` indexed by rank on `root`, `None` elsewhere.
pub fn gather_to_root<C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    payload: &[u8],
) -> Result<Option<Vec<Vec<u8>>>, DomDecError> {
    let (rank, size) = (comm.rank(), comm.size());
    if rank != root {
        let _ = comm.isend(root, tag.as_u16(), payload).wait();
        return Ok(None);
    }
    let pending: Vec<_> = (0..size)
        .filter(|&p| p != root)
        .map(|p| (p, comm.irecv(p, tag.as_u16())))
        .collect();
    let mut out = vec![Vec::new(); size];
    out[root] = payload.to_vec();
    let mut maybe_err = None;
    for (p, h) in pending {
        match h.wait() {
            Some(data) => out[p] = data,
            None if maybe_err.is_none() => {
                maybe_err = Some(DomDecError::comm(p, "no message received during gather"));
            }
            None => {}
        }
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(Some(out)),
    }
}

/// Send `payloads[p]` from `root` to every node `p`; every node returns its own.
pub fn scatter_from_root<C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    payloads: Option<&[Vec<u8>]>,
) -> Result<Vec<u8>, DomDecError> {
    let (rank, size) = (comm.rank(), comm.size());
    if rank != root {
        return comm
            .irecv(root, tag.as_u16())
            .wait()
            .ok_or_else(|| DomDecError::comm(root, "no message received during scatter"));
    }
    let payloads = payloads.ok_or(DomDecError::NotCoordinator)?;
    if payloads.len() != size {
        return Err(DomDecError::NodeCountMismatch {
            configured: payloads.len(),
            actual: size,
        });
    }
    let pending: Vec<_> = (0..size)
        .filter(|&p| p != root)
        .map(|p| comm.isend(p, tag.as_u16(), &payloads[p]))
        .collect();
    for s in pending {
        let _ = s.wait();
    }
    Ok(payloads[root].clone())
}

/// Every node returns `root`'s payload.
pub fn broadcast_from_root<C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    payload: Option<&[u8]>,
) -> Result<Vec<u8>, DomDecError> {
    let (rank, size) = (comm.rank(), comm.size());
    if rank != root {
        return comm
            .irecv(root, tag.as_u16())
            .wait()
            .ok_or_else(|| DomDecError::comm(root, "no message received during broadcast"));
    }
    let payload = payload.ok_or(DomDecError::NotCoordinator)?;
    let pending: Vec<_> = (0..size)
        .filter(|&p| p != root)
        .map(|p| comm.isend(p, tag.as_u16(), payload))
        .collect();
    for s in pending {
        let _ = s.wait();
    }
    Ok(payload.to_vec())
}

/// Sum of `value` over all nodes, known to every node. Uses `tag` and `tag + 1`.
pub fn allreduce_sum_u64<C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    value: u64,
) -> Result<u64, DomDecError> {
    let gathered = gather_to_root(comm, root, tag, &value.to_le_bytes())?;
    let total = match gathered {
        Some(all) => {
            let mut sum = 0u64;
            for (p, data) in all.iter().enumerate() {
                sum += decode_u64(p, data)?;
            }
            Some(sum.to_le_bytes())
        }
        None => None,
    };
    let out = broadcast_from_root(comm, root, tag.offset(1), total.as_ref().map(|b| &b[..]))?;
    decode_u64(root, &out)
}

/// Logical OR of `flag` over all nodes, known to every node.
pub fn allreduce_or<C: Communicator>(
    comm: &C,
    root: usize,
    tag: CommTag,
    flag: bool,
) -> Result<bool, DomDecError> {
    Ok(allreduce_sum_u64(comm, root, tag, flag as u64)? > 0)
}

fn decode_u64(neighbor: usize, data: &[u8]) -> Result<u64, DomDecError> {
    expect_exact_len(neighbor, data.len(), 8)?;
    let mut b = [0u8; 8];
    b.copy_from_slice(data);
    Ok(u64::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};

    #[test]
    fn single_node_collectives_are_local() {
        let t = CommTag::new(10);
        assert_eq!(allreduce_sum_u64(&NoComm, 0, t, 7).unwrap(), 7);
        assert!(allreduce_or(&NoComm, 0, t, true).unwrap());
        assert_eq!(
            gather_to_root(&NoComm, 0, t, &[1]).unwrap(),
            Some(vec![vec![1]])
        );
    }

    #[test]
    fn sum_and_or_over_threads() {
        let world = ThreadComm::world(4);
        let results: Vec<(u64, bool)> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let t = CommTag::new(100);
                        let sum = allreduce_sum_u64(c, 1, t, c.rank() as u64 + 1).unwrap();
                        let any = allreduce_or(c, 1, t.offset(2), c.rank() == 3).unwrap();
                        (sum, any)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(results.iter().all(|&r| r == (10, true)));
    }

    #[test]
    fn scatter_gives_each_node_its_part() {
        let world = ThreadComm::world(3);
        let got: Vec<Vec<u8>> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|c| {
                    s.spawn(move || {
                        let parts = vec![vec![0], vec![1, 1], vec![2, 2, 2]];
                        let mine = (c.rank() == 0).then_some(&parts[..]);
                        scatter_from_root(c, 0, CommTag::new(5), mine).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(got, vec![vec![0], vec![1, 1], vec![2, 2, 2]]);
    }
}
