//! DomDecError: unified error type for the domdec public APIs.
//!
//! Every failure at this layer is unrecoverable for the run: a decomposition
//! that cannot be built, a peer that violates the exchange protocol, state used
//! after the decomposition changed under it, or an allocation that fails.
//! Callers propagate these with `?` and abort; nothing is downgraded to a warning.

use crate::data::master::Epoch;
use crate::topology::ids::{AtomId, CgId};
use thiserror::Error;

/// Unified error type for domain-decomposition operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomDecError {
    // ----- configuration -------------------------------------------------
    /// The node count cannot be factored into a valid cell grid.
    #[error(
        "cannot decompose {n_nodes} node(s) into a grid with at most {max_ndim} decomposed dimension(s), \
         at most {max_cells} cells per axis and cells no smaller than the cutoff"
    )]
    NoValidGrid {
        n_nodes: usize,
        max_ndim: usize,
        max_cells: usize,
    },
    /// An explicitly requested grid is malformed.
    #[error("invalid cell grid: {0}")]
    InvalidGrid(String),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The communicator size disagrees with the configured node count.
    #[error("configured for {configured} node(s) but the communicator has {actual}")]
    NodeCountMismatch { configured: usize, actual: usize },
    /// A rank outside `[0, size)` was supplied.
    #[error("rank {rank} is out of range for {size} node(s)")]
    RankOutOfRange { rank: usize, size: usize },
    /// The global topology is inconsistent.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    // ----- protocol --------------------------------------------------------
    /// A point-to-point transfer failed or returned nothing.
    #[error("communication with node {neighbor} failed: {message}")]
    CommError { neighbor: usize, message: String },
    /// A peer sent a payload of unexpected byte length.
    #[error("buffer size mismatch with node {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
    /// The atom count a peer declared for a ghost link disagrees with its cg list.
    #[error("ghost link for zone {zone} from node {neighbor} declares {declared} atoms, cg list implies {expected}")]
    LinkCountMismatch {
        neighbor: usize,
        zone: usize,
        declared: usize,
        expected: usize,
    },
    /// A peer sent a message that cannot be decoded.
    #[error("malformed message from node {neighbor}: {reason}")]
    MalformedMessage { neighbor: usize, reason: String },
    /// An atom required by a local constraint or bonded term could not be obtained.
    #[error("atom {atom} is required locally but is not owned by any reachable neighbor")]
    UnresolvedConstraintAtom { atom: AtomId },
    /// A charge group moved more than one cell along an axis between repartitions.
    #[error("charge group {cg} moved more than one cell along dimension {dim}")]
    CgMovedTooFar { cg: CgId, dim: usize },
    /// The same atom was made resident twice.
    #[error("atom {0} is already resident on this node")]
    DuplicateResident(AtomId),
    /// An atom id is outside the global atom range.
    #[error("atom {atom} is out of range for {natoms} atom(s)")]
    AtomOutOfRange { atom: AtomId, natoms: usize },
    /// A charge group id is outside the global charge-group range.
    #[error("charge group {cg} is out of range for {ncg} charge group(s)")]
    CgOutOfRange { cg: CgId, ncg: usize },
    /// The bonded interactions assigned over all nodes do not add up.
    #[error("{assigned} bonded interaction(s) assigned over all nodes, expected {global}")]
    BondedCountMismatch { assigned: usize, global: usize },
    /// The per-node charge-group counts do not add up to the global count.
    #[error("{assigned} charge group(s) assigned over all nodes, expected {global}")]
    PartitionCountMismatch { assigned: usize, global: usize },

    // ----- staleness -------------------------------------------------------
    /// The master assignment does not reflect the current decomposition.
    #[error("master assignment is stale: valid for {have:?}, decomposition is at {want:?}")]
    StaleAssignment { have: Option<Epoch>, want: Epoch },
    /// Constraint state was built for another decomposition.
    #[error("constraint state was built for {built:?}, decomposition is at {current:?}")]
    StaleConstraints { built: Option<Epoch>, current: Epoch },
    /// A constraint operation was invoked out of order.
    #[error("constraint resolver is in phase {found}, operation requires {expected}")]
    ConstraintPhase {
        expected: &'static str,
        found: &'static str,
    },
    /// A coordinator-only operation was invoked on another node.
    #[error("operation is only valid on the coordinator node")]
    NotCoordinator,

    // ----- capacity --------------------------------------------------------
    /// Growing a buffer failed.
    #[error("failed to grow buffer to {requested} element(s)")]
    Capacity { requested: usize },
    /// A bounded container would overflow.
    #[error("{what} exceeds its fixed capacity of {max}")]
    CapacityExceeded { what: &'static str, max: usize },
}

impl DomDecError {
    /// Shorthand for a [`DomDecError::CommError`].
    pub fn comm(neighbor: usize, message: impl Into<String>) -> Self {
        DomDecError::CommError {
            neighbor,
            message: message.into(),
        }
    }

    /// Shorthand for a [`DomDecError::MalformedMessage`].
    pub fn malformed(neighbor: usize, reason: impl Into<String>) -> Self {
        DomDecError::MalformedMessage {
            neighbor,
            reason: reason.into(),
        }
    }

    /// True for errors raised by misconfiguration at startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DomDecError::NoValidGrid { .. }
                | DomDecError::InvalidGrid(_)
                | DomDecError::InvalidConfig(_)
                | DomDecError::NodeCountMismatch { .. }
                | DomDecError::RankOutOfRange { .. }
                | DomDecError::InvalidTopology(_)
        )
    }
}
