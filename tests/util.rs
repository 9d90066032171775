#![allow(dead_code)]
use domdec::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Run `f` once per node, each on its own thread, over a private mailbox.
/// Results are returned in rank order.
pub fn run_nodes<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadComm) -> T + Sync,
{
    let world = ThreadComm::world(n);
    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| s.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("node thread panicked"))
            .collect()
    })
}

/// `n` positions uniformly inside a box of edge `l`.
pub fn random_positions(n: usize, l: f64, seed: u64) -> Vec<Vec3> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n)
        .map(|_| [rng.gen_range(0.0..l), rng.gen_range(0.0..l), rng.gen_range(0.0..l)])
        .collect()
}

/// `2 * npairs` single-atom charge groups; atom `2i + 1` sits at `offset` from
/// atom `2i` (wrapped into the box). Every pair is bonded and constrained.
pub fn pairs(npairs: usize, l: f64, offset: f64, seed: u64) -> (Arc<GlobalTopology>, GlobalState) {
    let first = random_positions(npairs, l, seed);
    let mut x = Vec::with_capacity(2 * npairs);
    for p in first {
        x.push(p);
        x.push(p.map(|c| (c + offset).rem_euclid(l)));
    }
    let mut bonds = InteractionList::new(FunctionType::Bond).unwrap();
    let mut con = ConstraintTopology::new();
    for i in 0..npairs as u32 {
        let atoms = [AtomId::new(2 * i), AtomId::new(2 * i + 1)];
        bonds.push(0, &atoms).unwrap();
        con.push(&atoms, offset * 3f64.sqrt(), false).unwrap();
    }
    let top = GlobalTopology::new(ChargeGroups::single_atoms(2 * npairs), vec![bonds], con).unwrap();
    (Arc::new(top), GlobalState::positions_only(x))
}

pub fn config(n_nodes: usize, grid: [usize; 3], l: f64, cutoff: f64) -> DdConfig {
    DdConfig {
        n_nodes,
        grid: Some(grid),
        box_size: [l; 3],
        cutoff,
        ..DdConfig::default()
    }
}

/// True if `a` and `b` differ by whole box vectors.
pub fn same_image_class(a: Vec3, b: Vec3, l: f64) -> bool {
    (0..3).all(|d| {
        let k = (a[d] - b[d]) / l;
        (k - k.round()).abs() < 1e-9
    })
}

pub fn dist(a: Vec3, b: Vec3) -> f64 {
    (0..3).map(|d| (a[d] - b[d]).powi(2)).sum::<f64>().sqrt()
}

/// Distance between `a` and the nearest periodic image of `b`.
pub fn min_image_dist(a: Vec3, b: Vec3, l: f64) -> f64 {
    (0..3)
        .map(|d| {
            let dx = b[d] - a[d];
            (dx - l * (dx / l).round()).powi(2)
        })
        .sum::<f64>()
        .sqrt()
}
