use domdec::algs::communicator::{CommTag, Communicator};
use domdec::algs::distribute::{collect_to_master, distribute_from_master};
use domdec::data::master::{Epoch, MasterAssignment};
use domdec::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

mod util;
use util::{config, random_positions, run_nodes};

#[test]
fn every_charge_group_lands_on_exactly_one_node() {
    let cgs = ChargeGroups::from_sizes(&[1, 3, 2, 2, 1, 4, 1, 1, 2, 3]).unwrap();
    let x = random_positions(cgs.natoms(), 4.0, 7);
    let grid = CellGrid::new([2, 2, 1], [4.0; 3]).unwrap();

    let homes = run_nodes(4, |comm| {
        let mut global = GlobalState::positions_only(x.clone());
        let mut master = MasterAssignment::new(4);
        let view = if comm.rank() == 0 {
            master
                .assign_from_positions(&grid, &cgs, &mut global.x, Epoch::INITIAL)
                .unwrap();
            Some(master.view(Epoch::INITIAL).unwrap())
        } else {
            None
        };
        let global = (comm.rank() == 0).then_some(&global);
        distribute_from_master(&comm, 0, CommTag::new(0x100), view, &cgs, global).unwrap()
    });

    let total: usize = homes.iter().map(|h| h.cgs.len()).sum();
    assert_eq!(total, cgs.len());
    let mut all: Vec<CgId> = homes.iter().flat_map(|h| h.cgs.iter().copied()).collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), cgs.len());
    for (node, h) in homes.iter().enumerate() {
        assert_eq!(h.nat(), h.cgs.iter().map(|&g| cgs.size(g)).sum::<usize>());
        let mut at = 0;
        for &g in &h.cgs {
            let n = cgs.size(g);
            let c = domdec::topology::charge_groups::geometric_center(&h.x[at..at + n]);
            assert_eq!(grid.node_of_cell(grid.cell_of_position(c)), node);
            at += n;
        }
    }
}

#[test]
fn collect_restores_global_order() {
    let cgs = ChargeGroups::single_atoms(12);
    let x = random_positions(12, 2.0, 11);
    let v: Vec<Vec3> = (0..12).map(|i| [i as f64, 0.0, -1.0]).collect();
    let grid = CellGrid::new([3, 1, 1], [2.0; 3]).unwrap();

    let got = run_nodes(3, |comm| {
        let mut master = MasterAssignment::new(3);
        let mut global = GlobalState::new(x.clone(), v.clone());
        if comm.rank() == 1 {
            master
                .assign_from_positions(&grid, &cgs, &mut global.x, Epoch::INITIAL)
                .unwrap();
        }
        let view = (comm.rank() == 1).then(|| master.view(Epoch::INITIAL).unwrap());
        let g = (comm.rank() == 1).then_some(&global);
        let home = distribute_from_master(&comm, 1, CommTag::new(0x200), view, &cgs, g).unwrap();
        assert_eq!(home.v.len(), home.x.len());
        collect_to_master(&comm, 1, CommTag::new(0x240), &cgs, &home).unwrap()
    });
    assert!(got[0].is_none() && got[2].is_none());
    let (lists, back) = got[1].clone().unwrap();
    assert_eq!(lists.iter().map(Vec::len).sum::<usize>(), 12);
    assert_eq!(back.x, x);
    assert_eq!(back.v, v);
}

#[test]
fn decomposition_conserves_groups() {
    let natoms = 64;
    let top = Arc::new(GlobalTopology::atoms_only(natoms));
    let x = random_positions(natoms, 3.0, 3);
    let counts = run_nodes(4, |comm| {
        let cfg = config(4, [2, 2, 1], 3.0, 0.5);
        let mut dd = DomainDecomposition::new(cfg, comm, top.clone()).unwrap();
        let mut g = GlobalState::positions_only(x.clone());
        let global = dd.role().is_coordinator().then_some(&mut g);
        dd.partition_from_master(global).unwrap();
        dd.domain().home_cgs().len()
    });
    assert_eq!(counts.iter().sum::<usize>(), natoms);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn assignment_conserves_groups(sizes in proptest::collection::vec(1usize..4, 1..40), seed in any::<u64>()) {
        let cgs = ChargeGroups::from_sizes(&sizes).unwrap();
        let mut x = random_positions(cgs.natoms(), 5.0, seed);
        // push some groups out of the box
        for p in x.iter_mut().step_by(3) {
            p[0] += 5.0;
        }
        let grid = CellGrid::new([2, 3, 1], [5.0; 3]).unwrap();
        let mut m = MasterAssignment::new(6);
        m.assign_from_positions(&grid, &cgs, &mut x, Epoch::INITIAL).unwrap();
        let view = m.view(Epoch::INITIAL).unwrap();
        let total: usize = (0..6).map(|n| view.ncg(n)).sum();
        prop_assert_eq!(total, cgs.len());
        let nat: usize = (0..6).map(|n| view.nat(n)).sum();
        prop_assert_eq!(nat, cgs.natoms());
        prop_assert!(m.view(Epoch::INITIAL.next()).is_err());
    }
}
