//! The per-node decomposition: grid, local domain, ghost links, bonded and
//! constraint bookkeeping, tied together behind one owner.
//!
//! A typical run:
//!
//! ```text
//! new -> partition_from_master -> { move_x, (forces), move_f,
//!                                   repartition_needed? -> migrate }*
//!     -> collect_state
//! ```
//!
//! Every method that talks to other nodes is collective: all nodes must call
//! it in the same order.

use crate::Vec3;
use crate::algs::collective::{allreduce_or, allreduce_sum_u64};
use crate::algs::communicator::{CommTag, Communicator, DdCommTags};
use crate::algs::distribute::{GroupPayload, collect_to_master, distribute_from_master};
use crate::algs::halo::{self, GhostLinks, setup_ghost_links};
use crate::algs::migrate::{any_outside_cell, migrate_home_groups};
use crate::config::DdConfig;
use crate::constraints::ConstraintResolver;
use crate::data::buffer::BufferPool;
use crate::data::local_domain::LocalDomain;
use crate::data::master::{Epoch, MasterAssignment};
use crate::data::state::{GlobalState, LocalState};
use crate::dd_error::DomDecError;
use crate::debug_invariants::DebugInvariants;
use crate::topology::GlobalTopology;
use crate::topology::grid::CellGrid;
use crate::topology::ns_cells::NsCellMap;
use crate::topology::reverse::{LocalBondeds, ReverseTopology};
use log::{debug, info};
use std::sync::Arc;

/// What this node does beyond owning its cell.
#[derive(Clone, Debug)]
pub enum Role {
    /// Holds the assignment of every charge group to a node.
    Coordinator(MasterAssignment),
    Worker,
}

impl Role {
    pub fn is_coordinator(&self) -> bool {
        matches!(self, Role::Coordinator(_))
    }
}

pub struct DomainDecomposition<C: Communicator> {
    config: DdConfig,
    comm: C,
    topology: Arc<GlobalTopology>,
    grid: CellGrid,
    tags: DdCommTags,
    epoch: Epoch,
    domain: LocalDomain,
    links: GhostLinks,
    pool: BufferPool,
    ns_cells: NsCellMap,
    rtop: ReverseTopology,
    bondeds: LocalBondeds,
    constraints: ConstraintResolver,
    role: Role,
}

impl<C: Communicator> DomainDecomposition<C> {
    /// Validate `config` against `comm` and set up the cell grid.
    ///
    /// Nothing is distributed yet; call [`Self::partition_from_master`] next.
    pub fn new(config: DdConfig, comm: C, topology: Arc<GlobalTopology>) -> Result<Self, DomDecError> {
        config.validate()?;
        if comm.size() != config.n_nodes {
            return Err(DomDecError::NodeCountMismatch {
                configured: config.n_nodes,
                actual: comm.size(),
            });
        }
        let grid = match config.grid {
            Some(nc) => {
                let grid = CellGrid::new(nc, config.box_size)?;
                let len = grid.cell_size();
                if let Some(&d) = grid.dims().iter().find(|&&d| len[d] < config.cutoff) {
                    return Err(DomDecError::InvalidGrid(format!(
                        "cells along axis {d} are {:.4} wide, below the cutoff {}",
                        len[d], config.cutoff
                    )));
                }
                grid
            }
            None => CellGrid::choose(config.n_nodes, config.target_ndim, config.box_size, config.cutoff)?,
        };
        let natoms = topology.natoms();
        let rtop = ReverseTopology::build(natoms, topology.bondeds())?;
        let constraints = ConstraintResolver::new(
            Arc::new(topology.constraints().clone()),
            natoms,
            config.constraints.clone(),
        );
        let role = if comm.rank() == config.master_rank {
            Role::Coordinator(MasterAssignment::new(config.n_nodes))
        } else {
            Role::Worker
        };
        if role.is_coordinator() {
            info!(
                "decomposing {natoms} atoms in {} charge groups over {} nodes, {} zones per node",
                topology.charge_groups().len(),
                config.n_nodes,
                grid.n_zones()
            );
        }
        Ok(Self {
            tags: DdCommTags::from_base(CommTag::new(config.tag_base)),
            domain: LocalDomain::new(natoms, grid.n_zones()),
            links: GhostLinks::new(),
            pool: BufferPool::new(),
            ns_cells: NsCellMap::default(),
            bondeds: LocalBondeds::default(),
            epoch: Epoch::INITIAL,
            config,
            comm,
            topology,
            grid,
            rtop,
            constraints,
            role,
        })
    }

    /// Assign charge groups to cells on the coordinator, distribute them and
    /// rebuild every node's local state.
    ///
    /// `global` is required on the coordinator; its charge groups are wrapped
    /// into the box in place. Other nodes pass `None`.
    pub fn partition_from_master(&mut self, global: Option<&mut GlobalState>) -> Result<LocalState, DomDecError> {
        self.epoch = self.epoch.next();
        let epoch = self.epoch;
        let global = match &mut self.role {
            Role::Coordinator(master) => {
                let global = global.ok_or(DomDecError::NotCoordinator)?;
                master.assign_from_positions(&self.grid, self.topology.charge_groups(), &mut global.x, epoch)?;
                Some(&*global)
            }
            Role::Worker => None,
        };
        self.distribute_and_rebuild(global)
    }

    fn distribute_and_rebuild(&mut self, global: Option<&GlobalState>) -> Result<LocalState, DomDecError> {
        let view = match &self.role {
            Role::Coordinator(master) => Some(master.view(self.epoch)?),
            Role::Worker => None,
        };
        let home = distribute_from_master(
            &self.comm,
            self.config.master_rank,
            self.tags.distribute,
            view,
            self.topology.charge_groups(),
            global,
        )?;
        self.rebuild(home)
    }

    /// Rebuild everything derived from the home set `home`: local domain,
    /// ghost links and zones, neighbor-search map, local bonded terms and
    /// constraint extras. Returns the state with every local slot filled.
    fn rebuild(&mut self, home: GroupPayload) -> Result<LocalState, DomDecError> {
        let cgs = self.topology.charge_groups();
        self.domain.rebuild_from_assignment(&home.cgs, cgs, self.epoch)?;
        let mut x = home.x;
        setup_ghost_links(
            &mut self.links,
            &self.comm,
            self.tags.halo_setup,
            &self.grid,
            cgs,
            &mut self.domain,
            &x,
            self.config.cutoff,
            &mut self.pool,
        )?;
        x.resize(self.domain.total_local_atoms(), [0.0; 3]);
        halo::move_x(&self.links, &self.comm, self.tags.halo_x, &self.domain, &mut x, &mut self.pool)?;
        self.ns_cells = NsCellMap::build(&self.grid, self.domain.zone_cg_bounds(), self.config.cutoff)?;

        self.bondeds = self.rtop.make_local_bondeds(self.topology.bondeds(), &self.domain);
        self.constraints.invalidate();
        self.constraints.build_local_subset(&self.domain)?;
        self.constraints
            .collect_required_remote(&self.domain, self.bondeds.split_atoms(self.topology.bondeds()))?;
        self.constraints
            .setup_communication(&self.comm, self.tags.con_setup, &self.grid, &mut self.domain)?;
        x.resize(self.domain.total_local_atoms_including_constraint_extras(), [0.0; 3]);
        self.constraints
            .communicate_positions(&self.comm, self.tags.con_x, &self.grid, &self.domain, &mut x)?;
        self.bondeds.resolve_split(self.topology.bondeds(), &self.domain)?;
        self.domain.debug_assert_invariants();

        if self.config.check_bondeds {
            self.check_bonded_count()?;
        }
        debug!(
            "node {} rebuilt at epoch {}: {} home, {} local, {} extra atoms; {} bonded, {} constraints",
            self.comm.rank(),
            self.epoch.get(),
            self.domain.nat_home(),
            self.domain.total_local_atoms(),
            self.domain.extras().len(),
            self.bondeds.count(),
            self.constraints.n_local()
        );
        Ok(LocalState { x, v: home.v })
    }

    /// True if a home charge group of this node has left its cell.
    pub fn needs_repartition(&self, state: &LocalState) -> Result<bool, DomDecError> {
        let nat_home = self.expect_home_state(state)?;
        any_outside_cell(
            &self.grid,
            self.comm.rank(),
            self.topology.charge_groups(),
            self.domain.home_cgs(),
            &state.x[..nat_home],
        )
    }

    /// [`Self::needs_repartition`] over all nodes.
    ///
    /// A state that does not match the home set is an error on this node only;
    /// it still takes part in the reduction so the others do not block.
    pub fn repartition_needed(&self, state: &LocalState) -> Result<bool, DomDecError> {
        let local = self.needs_repartition(state);
        let any = allreduce_or(
            &self.comm,
            self.config.master_rank,
            self.tags.reduce,
            matches!(local, Ok(true)),
        )?;
        local.map(|_| any)
    }

    /// Hand home charge groups that left the cell to the neighbors and rebuild.
    ///
    /// The master assignment becomes stale; [`Self::collect_state`] refreshes it.
    pub fn migrate(&mut self, state: &mut LocalState) -> Result<(), DomDecError> {
        let home = self.home_payload(state)?;
        let home = migrate_home_groups(
            &self.comm,
            self.tags.migrate,
            &self.grid,
            self.topology.charge_groups(),
            home,
        )?;
        self.epoch = self.epoch.next();
        if let Role::Coordinator(master) = &mut self.role {
            master.invalidate();
        }
        *state = self.rebuild(home)?;
        Ok(())
    }

    /// Full redistribution: gather every home set on the coordinator, reassign
    /// all charge groups by position and distribute again.
    pub fn redistribute_via_master(&mut self, state: &mut LocalState) -> Result<(), DomDecError> {
        let home = self.home_payload(state)?;
        let collected = collect_to_master(
            &self.comm,
            self.config.master_rank,
            self.tags.collect,
            self.topology.charge_groups(),
            &home,
        )?;
        self.epoch = self.epoch.next();
        let epoch = self.epoch;
        let mut global = None;
        if let Role::Coordinator(master) = &mut self.role {
            let (_, mut g) = collected.ok_or(DomDecError::NotCoordinator)?;
            master.assign_from_positions(&self.grid, self.topology.charge_groups(), &mut g.x, epoch)?;
            global = Some(g);
        }
        *state = self.distribute_and_rebuild(global.as_ref())?;
        Ok(())
    }

    /// Gather the home state of every node in global atom order.
    ///
    /// Returns `Some` on the coordinator, whose master assignment is then
    /// current again.
    pub fn collect_state(&mut self, state: &LocalState) -> Result<Option<GlobalState>, DomDecError> {
        let home = self.home_payload(state)?;
        let collected = collect_to_master(
            &self.comm,
            self.config.master_rank,
            self.tags.collect,
            self.topology.charge_groups(),
            &home,
        )?;
        match (&mut self.role, collected) {
            (Role::Coordinator(master), Some((lists, global))) => {
                master.set_from_node_lists(&lists, self.topology.charge_groups(), self.epoch)?;
                Ok(Some(global))
            }
            _ => Ok(None),
        }
    }

    /// Refresh ghost and extra positions from their owners.
    pub fn move_x(&mut self, x: &mut [Vec3]) -> Result<(), DomDecError> {
        self.expect_len("positions", x.len())?;
        halo::move_x(&self.links, &self.comm, self.tags.halo_x, &self.domain, x, &mut self.pool)?;
        self.constraints
            .communicate_positions(&self.comm, self.tags.con_x, &self.grid, &self.domain, x)
    }

    /// Return forces on extra and ghost atoms to their owners.
    pub fn move_f(&mut self, f: &mut [Vec3]) -> Result<(), DomDecError> {
        self.expect_len("forces", f.len())?;
        self.constraints
            .reverse_forces(&self.comm, self.tags.con_f, &self.grid, &self.domain, f)?;
        halo::move_f(&self.links, &self.comm, self.tags.halo_f, &self.domain, f, &mut self.pool)
    }

    /// Verify that every bonded interaction is assigned to exactly one node.
    pub fn check_bonded_count(&self) -> Result<(), DomDecError> {
        let assigned = allreduce_sum_u64(
            &self.comm,
            self.config.master_rank,
            self.tags.reduce.offset(2),
            self.bondeds.count() as u64,
        )? as usize;
        let global = self.rtop.nbonded_global();
        if assigned != global {
            return Err(DomDecError::BondedCountMismatch { assigned, global });
        }
        Ok(())
    }

    /// Check that `state` covers the home atoms; returns their count.
    fn expect_home_state(&self, state: &LocalState) -> Result<usize, DomDecError> {
        let nat_home = self.domain.nat_home();
        if state.x.len() < nat_home || (state.has_velocities() && state.v.len() != nat_home) {
            return Err(DomDecError::InvalidTopology(format!(
                "state holds {} positions and {} velocities for {nat_home} home atoms",
                state.x.len(),
                state.v.len()
            )));
        }
        Ok(nat_home)
    }

    fn home_payload(&self, state: &LocalState) -> Result<GroupPayload, DomDecError> {
        let nat_home = self.expect_home_state(state)?;
        Ok(GroupPayload {
            cgs: self.domain.home_cgs().to_vec(),
            x: state.x[..nat_home].to_vec(),
            v: state.v.clone(),
        })
    }

    fn expect_len(&self, what: &str, len: usize) -> Result<(), DomDecError> {
        let want = self.domain.total_local_atoms_including_constraint_extras();
        if len != want {
            return Err(DomDecError::InvalidTopology(format!(
                "{len} {what} for {want} local atom slots"
            )));
        }
        Ok(())
    }

    pub fn config(&self) -> &DdConfig {
        &self.config
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn topology(&self) -> &GlobalTopology {
        &self.topology
    }

    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    pub fn tags(&self) -> &DdCommTags {
        &self.tags
    }

    /// Current decomposition; bumped by every partition and migration.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn domain(&self) -> &LocalDomain {
        &self.domain
    }

    pub fn links(&self) -> &GhostLinks {
        &self.links
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.pool
    }

    pub fn ns_cells(&self) -> &NsCellMap {
        &self.ns_cells
    }

    pub fn reverse_topology(&self) -> &ReverseTopology {
        &self.rtop
    }

    pub fn bondeds(&self) -> &LocalBondeds {
        &self.bondeds
    }

    pub fn constraints(&self) -> &ConstraintResolver {
        &self.constraints
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// The master assignment, on the coordinator only.
    pub fn master(&self) -> Result<&MasterAssignment, DomDecError> {
        match &self.role {
            Role::Coordinator(m) => Ok(m),
            Role::Worker => Err(DomDecError::NotCoordinator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::topology::charge_groups::ChargeGroups;
    use crate::topology::ids::AtomId;
    use crate::topology::interactions::{ConstraintTopology, FunctionType, InteractionList};

    fn water_like() -> Arc<GlobalTopology> {
        let cgs = ChargeGroups::from_sizes(&[3, 3]).unwrap();
        let a = |i: u32| AtomId::new(i);
        let bonds = InteractionList::new(FunctionType::Bond)
            .unwrap()
            .with(0, &[a(0), a(1)])
            .unwrap()
            .with(0, &[a(3), a(4)])
            .unwrap();
        let mut con = ConstraintTopology::new();
        con.push(&[a(1), a(2)], 0.1, false).unwrap();
        con.push(&[a(4), a(5)], 0.1, false).unwrap();
        Arc::new(GlobalTopology::new(cgs, vec![bonds], con).unwrap())
    }

    fn positions() -> GlobalState {
        GlobalState::positions_only(vec![
            [0.1, 0.1, 0.1],
            [0.2, 0.1, 0.1],
            [0.3, 0.1, 0.1],
            [1.1, 1.5, 0.5],
            [1.2, 1.5, 0.5],
            [1.3, 1.5, 0.5],
        ])
    }

    #[test]
    fn single_node_owns_everything() {
        let cfg = DdConfig {
            box_size: [2.0; 3],
            cutoff: 0.5,
            ..DdConfig::default()
        };
        let mut dd = DomainDecomposition::new(cfg, NoComm, water_like()).unwrap();
        assert_eq!(dd.grid().n_zones(), 1);
        let mut g = positions();
        let mut state = dd.partition_from_master(Some(&mut g)).unwrap();
        assert_eq!(state.x.len(), 6);
        assert_eq!(dd.domain().nat_home(), 6);
        assert!(dd.links().total_sent_cg() == 0);
        assert_eq!(dd.bondeds().local().len(), 2);
        assert_eq!(dd.constraints().local_constraints().unwrap().count(), 2);
        assert!(dd.domain().extras().is_empty());

        assert!(!dd.repartition_needed(&state).unwrap());
        dd.move_x(&mut state.x).unwrap();
        let mut f = vec![[1.0; 3]; state.x.len()];
        dd.move_f(&mut f).unwrap();
        assert_eq!(f[0], [1.0; 3]);

        let back = dd.collect_state(&state).unwrap().unwrap();
        assert_eq!(back, positions());
        assert!(dd.master().unwrap().has_all_cg(dd.epoch()));
    }

    #[test]
    fn short_state_is_rejected_everywhere() {
        let cfg = DdConfig {
            box_size: [2.0; 3],
            cutoff: 0.5,
            ..DdConfig::default()
        };
        let mut dd = DomainDecomposition::new(cfg, NoComm, water_like()).unwrap();
        let mut g = positions();
        let state = dd.partition_from_master(Some(&mut g)).unwrap();
        let mut short = LocalState {
            x: state.x[..1].to_vec(),
            v: Vec::new(),
        };
        assert!(matches!(dd.needs_repartition(&short), Err(DomDecError::InvalidTopology(_))));
        assert!(matches!(dd.repartition_needed(&short), Err(DomDecError::InvalidTopology(_))));
        assert!(matches!(dd.migrate(&mut short), Err(DomDecError::InvalidTopology(_))));
        assert!(!dd.needs_repartition(&state).unwrap());
    }

    #[test]
    fn wrong_communicator_size_is_rejected() {
        let cfg = DdConfig {
            n_nodes: 2,
            box_size: [2.0; 3],
            cutoff: 0.5,
            ..DdConfig::default()
        };
        let err = DomainDecomposition::new(cfg, NoComm, water_like()).err().unwrap();
        assert!(err.is_configuration());
        assert!(matches!(err, DomDecError::NodeCountMismatch { configured: 2, actual: 1 }));
    }

    #[test]
    fn explicit_grid_must_fit_cutoff() {
        let cfg = DdConfig {
            n_nodes: 1,
            grid: Some([1, 1, 1]),
            box_size: [2.0; 3],
            cutoff: 5.0,
            ..DdConfig::default()
        };
        // nothing is decomposed, so a long cutoff is fine
        assert!(DomainDecomposition::new(cfg, NoComm, water_like()).is_ok());
    }

    #[test]
    fn worker_requires_no_global_state() {
        let cfg = DdConfig {
            box_size: [2.0; 3],
            cutoff: 0.5,
            ..DdConfig::default()
        };
        let mut dd = DomainDecomposition::new(cfg, NoComm, water_like()).unwrap();
        assert!(matches!(
            dd.partition_from_master(None),
            Err(DomDecError::NotCoordinator)
        ));
    }
}
