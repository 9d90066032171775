#![cfg_attr(docsrs, feature(doc_cfg))]
//! # domdec
//!
//! domdec is the spatial domain-decomposition layer of a parallel particle
//! simulator. It splits a periodic rectangular box into a grid of cells, one per
//! node, keeps track of which charge groups each node owns as they move, and
//! maintains the structures a node needs to compute interactions across cell
//! boundaries without holding global data:
//!
//! - the cell grid and its eighth-shell zones ([`topology::grid`]);
//! - coordinator-side assignment and distribution ([`data::master`], [`algs::distribute`]);
//! - the per-node local domain with an O(1) global-to-local index map ([`data::local_domain`]);
//! - ghost links and per-step halo traffic ([`algs::halo`]);
//! - the reverse bonded topology ([`topology::reverse`]);
//! - cross-boundary constraint resolution ([`constraints`]);
//! - neighbor-search zone pairs ([`topology::ns_cells`]);
//! - migration of charge groups between neighbors ([`algs::migrate`]).
//!
//! [`decomposition::DomainDecomposition`] ties them together.
//!
//! ## Communication
//!
//! All traffic goes through the [`algs::communicator::Communicator`] trait.
//! `NoComm` serves single-node runs, `ThreadComm` runs several nodes as threads
//! of one process, and `MpiComm` (feature `mpi-support`) runs on MPI.
//!
//! ## Features
//! - `mpi-support`: the MPI backend.
//! - `rayon`: parallel charge-group centers on the coordinator.
//! - `check-invariants`: structural self-checks in release builds too.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! domdec = "0.1"
//! # features = ["mpi-support", "rayon"]
//! ```

pub mod algs;
pub mod config;
pub mod constraints;
pub mod data;
pub mod dd_error;
pub mod debug_invariants;
pub mod decomposition;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// Number of spatial dimensions.
pub const DIM: usize = 3;

/// Position, velocity or force of one atom.
pub type Vec3 = [f64; DIM];

/// Integer shift vector, in cells or box images.
pub type IVec = [i32; DIM];

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, DdCommTags, NoComm, ThreadComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::delta::{AddDelta, CopyDelta, Delta};
    pub use crate::config::{ConstraintConfig, DdConfig};
    pub use crate::constraints::{ConstraintPhase, ConstraintResolver, LocalConstraint};
    pub use crate::data::{GlobalState, LocalDomain, LocalState};
    pub use crate::dd_error::DomDecError;
    pub use crate::decomposition::{DomainDecomposition, Role};
    pub use crate::topology::GlobalTopology;
    pub use crate::topology::charge_groups::ChargeGroups;
    pub use crate::topology::grid::{CellGrid, Direction};
    pub use crate::topology::ids::{AtomId, CgId};
    pub use crate::topology::interactions::{ConstraintTopology, FunctionType, InteractionList};
    pub use crate::{IVec, Vec3};
}
