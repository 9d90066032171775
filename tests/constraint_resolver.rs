use domdec::algs::communicator::Communicator;
use domdec::constraints::ConstraintPhase;
use domdec::prelude::*;
use std::sync::Arc;

mod util;
use util::{config, dist, min_image_dist, pairs, run_nodes};

/// One constraint between atom 0 (cell [0, 2)) and atom 1 (cell [2, 4)), far
/// enough from the shared faces that neither is a ghost on the other node.
fn straddling_pair() -> (Arc<GlobalTopology>, GlobalState) {
    let mut con = ConstraintTopology::new();
    con.push(&[AtomId::new(0), AtomId::new(1)], 1.1, false).unwrap();
    let top = GlobalTopology::new(ChargeGroups::single_atoms(2), vec![], con).unwrap();
    let x = vec![[1.6, 1.0, 1.0], [2.7, 1.0, 1.0]];
    (Arc::new(top), GlobalState::positions_only(x))
}

#[test]
fn two_atom_constraint_across_nodes() {
    let (top, global) = straddling_pair();
    let out = run_nodes(2, |comm| {
        let rank = comm.rank();
        let mut dd = DomainDecomposition::new(config(2, [2, 1, 1], 4.0, 0.5), comm, top.clone()).unwrap();
        let mut g = global.clone();
        let mut state = dd
            .partition_from_master(dd.role().is_coordinator().then_some(&mut g))
            .unwrap();
        let other = AtomId::new(1 - rank as u32);

        let r = dd.constraints();
        assert_eq!(r.phase(), ConstraintPhase::Solve);
        assert_eq!(r.required_atoms(), &[other]);
        assert_eq!(r.request_rounds(), 1);
        assert_eq!(dd.domain().extras(), &[other]);
        assert_eq!(dd.domain().resolve(other), None);

        let lc: Vec<_> = r.local_constraints().unwrap().map(|c| c.atoms.to_vec()).collect();
        assert_eq!(lc.len(), 1);
        let (a, b) = (lc[0][0] as usize, lc[0][1] as usize);
        assert!((dist(state.x[a], state.x[b]) - 1.1).abs() < 1e-12);

        // steps within the same decomposition only move positions
        for step in 0..3 {
            let nat_home = dd.domain().nat_home();
            for p in &mut state.x[..nat_home] {
                p[1] += 0.05;
            }
            dd.move_x(&mut state.x).unwrap();
            let extra = dd.domain().resolve_slot_including_extras(other).unwrap();
            assert!((state.x[extra][1] - (1.0 + 0.05 * (step + 1) as f64)).abs() < 1e-12);
            assert_eq!(dd.constraints().request_rounds(), 1);
            assert_eq!(dd.constraints().local_constraints().unwrap().count(), 1);
        }

        // the force on the extra goes back to its owner
        let mut f = vec![[0.0; 3]; state.x.len()];
        let extra = dd.domain().resolve_slot_including_extras(other).unwrap();
        f[extra] = [0.0, 0.0, 1.0 + rank as f64];
        dd.move_f(&mut f).unwrap();
        f[0]
    });
    // node 0 owns atom 0 and receives node 1's force on it, and vice versa
    assert_eq!(out[0], [0.0, 0.0, 2.0]);
    assert_eq!(out[1], [0.0, 0.0, 1.0]);
}

#[test]
fn extra_atoms_take_the_nearest_image() {
    // atom 1 sits just below the upper box face; its partner just above zero
    let mut con = ConstraintTopology::new();
    con.push(&[AtomId::new(0), AtomId::new(1)], 0.8, false).unwrap();
    let top = Arc::new(GlobalTopology::new(ChargeGroups::single_atoms(2), vec![], con).unwrap());
    let global = GlobalState::positions_only(vec![[0.1, 1.0, 1.0], [3.3, 1.0, 1.0]]);
    let out = run_nodes(2, |comm| {
        let mut dd = DomainDecomposition::new(config(2, [2, 1, 1], 4.0, 0.5), comm, top.clone()).unwrap();
        let mut g = global.clone();
        let state = dd
            .partition_from_master(dd.role().is_coordinator().then_some(&mut g))
            .unwrap();
        let lc: Vec<_> = dd
            .constraints()
            .local_constraints()
            .unwrap()
            .map(|c| c.atoms.to_vec())
            .collect();
        dist(state.x[lc[0][0] as usize], state.x[lc[0][1] as usize])
    });
    for d in out {
        assert!((d - 0.8).abs() < 1e-12);
    }
}

#[test]
fn closure_holds_on_a_cube_of_nodes() {
    let (top, global) = pairs(200, 3.0, 0.25, 17);
    let counts = run_nodes(8, |comm| {
        let mut dd = DomainDecomposition::new(config(8, [2, 2, 2], 3.0, 0.5), comm, top.clone()).unwrap();
        let mut g = global.clone();
        let state = dd
            .partition_from_master(dd.role().is_coordinator().then_some(&mut g))
            .unwrap();
        let d = dd.domain();
        let mut n = 0;
        for lc in dd.constraints().local_constraints().unwrap() {
            for &s in lc.atoms {
                assert!(d.global_atom(s as usize).is_some());
            }
            assert!((dist(state.x[lc.atoms[0] as usize], state.x[lc.atoms[1] as usize]) - lc.length).abs() < 1e-9);
            n += lc.nlocat as usize;
        }
        // every required atom arrived
        for &a in dd.constraints().required_atoms() {
            assert!(d.resolve_slot_including_extras(a).is_some());
        }
        n
    });
    // every atom is home exactly once over all nodes
    assert_eq!(counts.iter().sum::<usize>(), 400);
}

#[test]
fn operations_out_of_order_are_rejected() {
    let (top, global) = straddling_pair();
    let cfg = config(1, [1, 1, 1], 4.0, 0.5);
    let mut dd = DomainDecomposition::new(cfg, NoComm, top).unwrap();
    assert!(matches!(
        dd.constraints().local_constraints(),
        Err(DomDecError::ConstraintPhase { .. })
    ));
    let mut g = global;
    dd.partition_from_master(Some(&mut g)).unwrap();
    assert_eq!(dd.constraints().n_local(), 1);
    assert!(dd.domain().extras().is_empty());
}

const L: f64 = 4.0;

/// Atoms 0 and 1 sit on either side of the periodic face at x = 0, atom 2
/// further inside node 0's cell. Node 1 sees atom 1 as a ghost shifted by L.
fn across_periodic_face() -> Vec<Vec3> {
    vec![[3.95, 1.0, 1.0], [0.4, 1.0, 1.0], [1.2, 1.0, 1.0]]
}

#[test]
fn split_angle_across_the_periodic_face_keeps_its_geometry() {
    let atoms = [AtomId::new(0), AtomId::new(1), AtomId::new(2)];
    let angles = InteractionList::new(FunctionType::Angle).unwrap().with(0, &atoms).unwrap();
    let top = Arc::new(
        GlobalTopology::new(ChargeGroups::single_atoms(3), vec![angles], ConstraintTopology::new()).unwrap(),
    );
    let global = GlobalState::positions_only(across_periodic_face());
    let counts = run_nodes(2, |comm| {
        let rank = comm.rank();
        let mut dd = DomainDecomposition::new(config(2, [2, 1, 1], L, 0.5), comm, top.clone()).unwrap();
        let mut g = global.clone();
        let mut state = dd
            .partition_from_master(dd.role().is_coordinator().then_some(&mut g))
            .unwrap();
        for step in 0..3 {
            for bi in dd.bondeds().local() {
                for w in bi.atoms.windows(2) {
                    let (a, b) = (w[0] as usize, w[1] as usize);
                    let ga = dd.domain().global_atom(a).unwrap();
                    let gb = dd.domain().global_atom(b).unwrap();
                    let want = min_image_dist(global.x[ga.index()], global.x[gb.index()], L);
                    assert!(
                        (dist(state.x[a], state.x[b]) - want).abs() < 1e-9,
                        "rank {rank} step {step}: atoms {ga} {gb}"
                    );
                }
            }
            let nat_home = dd.domain().nat_home();
            for p in &mut state.x[..nat_home] {
                p[2] += 0.01;
            }
            dd.move_x(&mut state.x).unwrap();
        }
        dd.bondeds().local().len()
    });
    assert_eq!(counts.iter().sum::<usize>(), 1);
}

#[test]
fn coupled_constraints_across_the_periodic_face_keep_their_lengths() {
    let mut con = ConstraintTopology::new();
    con.push(&[AtomId::new(0), AtomId::new(1)], 0.45, false).unwrap();
    con.push(&[AtomId::new(1), AtomId::new(2)], 0.8, false).unwrap();
    let top = Arc::new(GlobalTopology::new(ChargeGroups::single_atoms(3), vec![], con).unwrap());
    let global = GlobalState::positions_only(across_periodic_face());
    let cfg = DdConfig {
        constraints: ConstraintConfig { coupling_depth: 1 },
        ..config(2, [2, 1, 1], L, 0.5)
    };
    let out = run_nodes(2, |comm| {
        let rank = comm.rank();
        let mut dd = DomainDecomposition::new(cfg.clone(), comm, top.clone()).unwrap();
        let mut g = global.clone();
        let mut state = dd
            .partition_from_master(dd.role().is_coordinator().then_some(&mut g))
            .unwrap();
        let mut n = 0;
        for step in 0..3 {
            n = 0;
            for lc in dd.constraints().local_constraints().unwrap() {
                let (a, b) = (lc.atoms[0] as usize, lc.atoms[1] as usize);
                assert!(
                    (dist(state.x[a], state.x[b]) - lc.length).abs() < 1e-9,
                    "rank {rank} step {step}: constraint {}",
                    lc.global
                );
                n += 1;
            }
            let nat_home = dd.domain().nat_home();
            for p in &mut state.x[..nat_home] {
                p[1] -= 0.01;
            }
            dd.move_x(&mut state.x).unwrap();
        }
        n
    });
    assert_eq!(out, vec![2, 2]);
}
