//! Cross-boundary constraint resolution.
//!
//! A constraint whose atoms straddle a cell boundary is computed on every node
//! that owns one of its atoms. The atoms such a node does not hold as home or
//! ghost are fetched from neighbors and kept as *extra* atoms after the ghost
//! zones. The resolver walks a fixed sequence of phases:
//!
//! ```text
//! BuildLocalSubset -> CollectRequiredRemote -> ExchangeRequests -> ReceiveRemoteState -> Solve
//! ```
//!
//! The first three run once per decomposition; afterwards only positions move
//! each step (`ReceiveRemoteState -> Solve`). Any change of the decomposition
//! sends the resolver back to `BuildLocalSubset` via [`ConstraintResolver::invalidate`].

mod comm;

pub use comm::AtomSend;

use crate::config::ConstraintConfig;
use crate::data::buffer::GrowBuf;
use crate::data::local_domain::LocalDomain;
use crate::data::master::Epoch;
use crate::dd_error::DomDecError;
use crate::topology::ids::AtomId;
use crate::topology::interactions::{AtomToConstraints, ConstraintTopology};
use crate::{DIM, Vec3};
use hashbrown::{HashMap, HashSet};
use log::debug;
use std::sync::Arc;

/// Phase of the resolver state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintPhase {
    BuildLocalSubset,
    CollectRequiredRemote,
    ExchangeRequests,
    ReceiveRemoteState,
    Solve,
}

impl ConstraintPhase {
    pub fn name(self) -> &'static str {
        match self {
            ConstraintPhase::BuildLocalSubset => "BuildLocalSubset",
            ConstraintPhase::CollectRequiredRemote => "CollectRequiredRemote",
            ConstraintPhase::ExchangeRequests => "ExchangeRequests",
            ConstraintPhase::ReceiveRemoteState => "ReceiveRemoteState",
            ConstraintPhase::Solve => "Solve",
        }
    }
}

/// A local constraint with its atoms as local slots.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LocalConstraint<'a> {
    /// Global constraint index.
    pub global: u32,
    pub atoms: &'a [u32],
    pub length: f64,
    pub flexible: bool,
    /// Number of the constraint's atoms that are home on this node.
    pub nlocat: u8,
}

#[derive(Clone, Debug)]
pub struct ConstraintResolver {
    topology: Arc<ConstraintTopology>,
    config: ConstraintConfig,
    ncon_global: usize,
    nflexcon_global: usize,
    at2con: AtomToConstraints,
    /// Global indices of local constraints.
    con: Vec<u32>,
    con_nlocat: Vec<u8>,
    gc2lc: HashMap<u32, usize>,
    /// Atoms required locally but not resident, without repeats.
    ind_req: Vec<AtomId>,
    /// `[dim][dir][0]` ids requested, `[dim][dir][1]` ids received as requests.
    nreq: [[[usize; 2]; 2]; DIM],
    cas: [[AtomSend; 2]; DIM],
    send_atom: Vec<bool>,
    ibuf: GrowBuf<u32>,
    vbuf: GrowBuf<Vec3>,
    /// Local slots of every local constraint's atoms, block-indexed.
    lcon_index: Vec<usize>,
    lcon_atoms: Vec<u32>,
    /// Global atoms of the split bonded terms, block-indexed.
    split_index: Vec<usize>,
    split_atoms: Vec<AtomId>,
    /// Extra slots in imaging order, each with the slot it is imaged against.
    image_plan: Vec<(u32, Option<u32>)>,
    phase: ConstraintPhase,
    built_for: Option<Epoch>,
    request_rounds: usize,
}

impl ConstraintResolver {
    pub fn new(topology: Arc<ConstraintTopology>, natoms: usize, config: ConstraintConfig) -> Self {
        let at2con = topology.atom_to_constraints(natoms);
        Self {
            ncon_global: topology.len(),
            nflexcon_global: topology.n_flexible(),
            at2con,
            topology,
            config,
            con: Vec::new(),
            con_nlocat: Vec::new(),
            gc2lc: HashMap::new(),
            ind_req: Vec::new(),
            nreq: [[[0; 2]; 2]; DIM],
            cas: Default::default(),
            send_atom: Vec::new(),
            ibuf: GrowBuf::new(),
            vbuf: GrowBuf::new(),
            lcon_index: vec![0],
            lcon_atoms: Vec::new(),
            split_index: vec![0],
            split_atoms: Vec::new(),
            image_plan: Vec::new(),
            phase: ConstraintPhase::BuildLocalSubset,
            built_for: None,
            request_rounds: 0,
        }
    }

    pub fn phase(&self) -> ConstraintPhase {
        self.phase
    }

    pub fn ncon_global(&self) -> usize {
        self.ncon_global
    }

    pub fn nflexcon_global(&self) -> usize {
        self.nflexcon_global
    }

    /// Number of request exchanges performed so far.
    pub fn request_rounds(&self) -> usize {
        self.request_rounds
    }

    /// Atoms this node asked its neighbors for.
    pub fn required_atoms(&self) -> &[AtomId] {
        &self.ind_req
    }

    /// Request counts `[sent, received]` for decomposed axis `dim_index` and direction.
    pub fn nreq(&self, dim_index: usize, dir: usize) -> [usize; 2] {
        self.nreq[dim_index][dir]
    }

    /// Send descriptor for decomposed axis `dim_index` and direction.
    pub fn atom_send(&self, dim_index: usize, dir: usize) -> &AtomSend {
        &self.cas[dim_index][dir]
    }

    /// Local index of global constraint `k`, if it is local.
    pub fn local_index(&self, k: u32) -> Option<usize> {
        self.gc2lc.get(&k).copied()
    }

    /// Number of local constraints.
    pub fn n_local(&self) -> usize {
        self.con.len()
    }

    /// Forget everything derived from the previous decomposition.
    pub fn invalidate(&mut self) {
        self.phase = ConstraintPhase::BuildLocalSubset;
        self.built_for = None;
    }

    pub(crate) fn expect_phase(&self, expected: ConstraintPhase) -> Result<(), DomDecError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(DomDecError::ConstraintPhase {
                expected: expected.name(),
                found: self.phase.name(),
            })
        }
    }

    pub(crate) fn expect_current(&self, domain: &LocalDomain) -> Result<Epoch, DomDecError> {
        match (self.built_for, domain.epoch()) {
            (Some(b), Some(cur)) if b == cur => Ok(cur),
            (built, cur) => Err(DomDecError::StaleConstraints {
                built,
                current: cur.unwrap_or_default(),
            }),
        }
    }

    /// Select the constraints this node computes.
    ///
    /// A constraint is local if at least one of its atoms is home; with a
    /// coupling depth `k > 0`, constraints reachable through up to `k` shared
    /// atoms are added as well.
    pub fn build_local_subset(&mut self, domain: &LocalDomain) -> Result<(), DomDecError> {
        self.expect_phase(ConstraintPhase::BuildLocalSubset)?;
        let epoch = domain
            .epoch()
            .ok_or(DomDecError::StaleConstraints {
                built: None,
                current: Epoch::INITIAL,
            })?;
        self.con.clear();
        self.con_nlocat.clear();
        self.gc2lc.clear();

        for &atom in &domain.gatindex()[..domain.nat_home()] {
            for &k in self.at2con.of(atom) {
                if !self.gc2lc.contains_key(&k) {
                    self.gc2lc.insert(k, self.con.len());
                    self.con.push(k);
                }
            }
        }
        let mut frontier_start = 0;
        for _ in 0..self.config.coupling_depth {
            let frontier_end = self.con.len();
            for i in frontier_start..frontier_end {
                let k = self.con[i];
                for &a in self.topology.atoms(k as usize) {
                    for &k2 in self.at2con.of(a) {
                        if !self.gc2lc.contains_key(&k2) {
                            self.gc2lc.insert(k2, self.con.len());
                            self.con.push(k2);
                        }
                    }
                }
            }
            if frontier_end == self.con.len() {
                break;
            }
            frontier_start = frontier_end;
        }
        for &k in &self.con {
            let n = self
                .topology
                .atoms(k as usize)
                .iter()
                .filter(|&&a| domain.is_home(a))
                .count();
            self.con_nlocat.push(n as u8);
        }
        self.built_for = Some(epoch);
        self.phase = ConstraintPhase::CollectRequiredRemote;
        debug!(
            "{} of {} constraints local ({} flexible globally)",
            self.con.len(),
            self.ncon_global,
            self.nflexcon_global
        );
        Ok(())
    }

    /// Gather the atoms local constraints need that are neither home nor
    /// ghost, together with the atoms of the split bonded terms in
    /// `split_groups` (one slice of global atoms per term).
    pub fn collect_required_remote<'a>(
        &mut self,
        domain: &LocalDomain,
        split_groups: impl IntoIterator<Item = &'a [AtomId]>,
    ) -> Result<(), DomDecError> {
        self.expect_phase(ConstraintPhase::CollectRequiredRemote)?;
        self.expect_current(domain)?;
        self.split_index.clear();
        self.split_index.push(0);
        self.split_atoms.clear();
        for group in split_groups {
            self.split_atoms.extend_from_slice(group);
            self.split_index.push(self.split_atoms.len());
        }
        self.ind_req.clear();
        let mut seen = HashSet::new();
        let con_atoms = self
            .con
            .iter()
            .flat_map(|&k| self.topology.atoms(k as usize).iter().copied());
        for a in con_atoms.chain(self.split_atoms.iter().copied()) {
            if domain.resolve(a).is_none() && seen.insert(a) {
                self.ind_req.push(a);
            }
        }
        self.phase = ConstraintPhase::ExchangeRequests;
        debug!("{} remote atoms required", self.ind_req.len());
        Ok(())
    }

    /// Translate every local constraint's atoms to local slots.
    fn map_local_constraints(&mut self, domain: &LocalDomain) -> Result<(), DomDecError> {
        self.lcon_index.clear();
        self.lcon_index.push(0);
        self.lcon_atoms.clear();
        for &k in &self.con {
            for &a in self.topology.atoms(k as usize) {
                let slot = domain
                    .resolve_slot_including_extras(a)
                    .ok_or(DomDecError::UnresolvedConstraintAtom { atom: a })?;
                self.lcon_atoms.push(slot as u32);
            }
            self.lcon_index.push(self.lcon_atoms.len());
        }
        Ok(())
    }

    /// Fix the order in which extras are imaged every step.
    ///
    /// An extra is imaged against an atom it shares a local constraint or a
    /// split bonded term with, once that atom has a position in this node's
    /// frame (home, ghost, or an extra imaged earlier). Extras with no such
    /// partner are imaged against the cell center.
    fn plan_images(&mut self, domain: &LocalDomain) -> Result<(), DomDecError> {
        let nat_tot = domain.total_local_atoms();
        let nslots = domain.total_local_atoms_including_constraint_extras();
        let mut index = self.lcon_index.clone();
        let mut slots = self.lcon_atoms.clone();
        for g in 0..self.split_index.len() - 1 {
            for &a in &self.split_atoms[self.split_index[g]..self.split_index[g + 1]] {
                let s = domain
                    .resolve_slot_including_extras(a)
                    .ok_or(DomDecError::UnresolvedConstraintAtom { atom: a })?;
                slots.push(s as u32);
            }
            index.push(slots.len());
        }

        let mut placed = vec![false; nslots - nat_tot];
        let is_placed = |placed: &[bool], s: u32| (s as usize) < nat_tot || placed[s as usize - nat_tot];
        self.image_plan.clear();
        loop {
            let before = self.image_plan.len();
            for g in 0..index.len() - 1 {
                let atoms = &slots[index[g]..index[g + 1]];
                let Some(&anchor) = atoms.iter().find(|&&s| is_placed(&placed, s)) else {
                    continue;
                };
                for &s in atoms {
                    if !is_placed(&placed, s) {
                        placed[s as usize - nat_tot] = true;
                        self.image_plan.push((s, Some(anchor)));
                    }
                }
            }
            if self.image_plan.len() == before {
                break;
            }
        }
        for s in nat_tot..nslots {
            if !placed[s - nat_tot] {
                self.image_plan.push((s as u32, None));
            }
        }
        Ok(())
    }

    /// The local constraints with their atoms as local slots.
    pub fn local_constraints(&self) -> Result<impl Iterator<Item = LocalConstraint<'_>>, DomDecError> {
        self.expect_phase(ConstraintPhase::Solve)?;
        Ok(self.con.iter().enumerate().map(move |(i, &k)| LocalConstraint {
            global: k,
            atoms: &self.lcon_atoms[self.lcon_index[i]..self.lcon_index[i + 1]],
            length: self.topology.length(k as usize),
            flexible: self.topology.is_flexible(k as usize),
            nlocat: self.con_nlocat[i],
        }))
    }
}
