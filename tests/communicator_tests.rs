use domdec::algs::collective::{allreduce_or, allreduce_sum_u64, broadcast_from_root, gather_to_root, sendrecv};
use domdec::algs::communicator::{CommTag, Communicator, ThreadComm, Wait};
use serial_test::serial;

mod util;
use util::run_nodes;

// `ThreadComm::new` shares one process-global mailbox; keep those tests serial.

#[test]
#[serial]
fn global_mailbox_round_trip() {
    let tag = CommTag::new(0x1000);
    let c0 = ThreadComm::new(0, 2);
    let c1 = ThreadComm::new(1, 2);

    let h = c1.irecv(0, tag.as_u16());
    c0.isend(1, tag.as_u16(), b"hello").wait();
    assert_eq!(h.wait().unwrap(), b"hello");
}

#[test]
#[serial]
fn global_mailbox_fifo_order() {
    let tag = CommTag::new(0x1001);
    let c0 = ThreadComm::new(0, 2);
    let c1 = ThreadComm::new(1, 2);

    for i in 0..10u8 {
        c0.isend(1, tag.as_u16(), &[i]);
    }
    let got: Vec<u8> = (0..10).map(|_| c1.irecv(0, tag.as_u16()).wait().unwrap()[0]).collect();
    assert_eq!(got, (0u8..10).collect::<Vec<_>>());
}

#[test]
fn ring_sendrecv() {
    let got = run_nodes(5, |comm| {
        let (r, n) = (comm.rank(), comm.size());
        sendrecv(&comm, (r + 1) % n, (r + n - 1) % n, CommTag::new(3), &[r as u8]).unwrap()
    });
    for (r, data) in got.iter().enumerate() {
        assert_eq!(data, &vec![((r + 4) % 5) as u8]);
    }
}

#[test]
fn gather_and_broadcast() {
    let got = run_nodes(4, |comm| {
        let mine = [comm.rank() as u8; 2];
        let all = gather_to_root(&comm, 2, CommTag::new(10), &mine).unwrap();
        let root_msg = all.as_ref().map(|v| v.concat());
        let b = broadcast_from_root(&comm, 2, CommTag::new(11), root_msg.as_deref()).unwrap();
        (all.is_some(), b)
    });
    for (r, (is_root, b)) in got.iter().enumerate() {
        assert_eq!(*is_root, r == 2);
        assert_eq!(b, &vec![0, 0, 1, 1, 2, 2, 3, 3]);
    }
}

#[test]
fn reductions_agree_everywhere() {
    let got = run_nodes(6, |comm| {
        let sum = allreduce_sum_u64(&comm, 0, CommTag::new(20), comm.rank() as u64 + 1).unwrap();
        let any = allreduce_or(&comm, 0, CommTag::new(22), comm.rank() == 4).unwrap();
        let none = allreduce_or(&comm, 0, CommTag::new(24), false).unwrap();
        (sum, any, none)
    });
    assert!(got.iter().all(|&g| g == (21, true, false)));
}

#[test]
fn barrier_completes() {
    run_nodes(3, |comm| comm.barrier());
}
