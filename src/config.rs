//! Run-time configuration of a domain decomposition.
//!
//! Plain structs with `Default`; all fields are `#[serde(default)]` so a driver
//! can load a partial JSON or TOML table and fill the rest.

use crate::Vec3;
use crate::dd_error::DomDecError;
use crate::topology::grid::DD_MAXCELL;
use serde::{Deserialize, Serialize};

/// Settings of the constraint resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintConfig {
    /// Also make local every constraint reachable from a home constraint
    /// through up to this many shared-atom hops. `0` keeps only constraints
    /// touching a home atom.
    pub coupling_depth: usize,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self { coupling_depth: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DdConfig {
    /// Number of cooperating nodes; must equal the communicator size.
    pub n_nodes: usize,
    /// Maximum number of decomposed axes (1..=3) used when choosing a grid.
    pub target_ndim: usize,
    /// Explicit cell grid, overriding the automatic choice.
    pub grid: Option<[usize; 3]>,
    /// Edge lengths of the rectangular periodic box.
    pub box_size: Vec3,
    /// Interaction cutoff; also the ghost-zone depth.
    pub cutoff: f64,
    /// Node that holds the master assignment.
    pub master_rank: usize,
    /// First message tag used by the decomposition.
    pub tag_base: u16,
    pub constraints: ConstraintConfig,
    /// Verify after each rebuild that every bonded interaction is assigned once.
    pub check_bondeds: bool,
}

impl Default for DdConfig {
    fn default() -> Self {
        Self {
            n_nodes: 1,
            target_ndim: 3,
            grid: None,
            box_size: [1.0, 1.0, 1.0],
            cutoff: 0.1,
            master_rank: 0,
            tag_base: 0x2000,
            constraints: ConstraintConfig::default(),
            check_bondeds: true,
        }
    }
}

impl DdConfig {
    pub fn validate(&self) -> Result<(), DomDecError> {
        if self.n_nodes == 0 {
            return Err(DomDecError::InvalidConfig("n_nodes must be at least 1".into()));
        }
        if !(1..=3).contains(&self.target_ndim) {
            return Err(DomDecError::InvalidConfig(format!(
                "target_ndim must be in 1..=3, got {}",
                self.target_ndim
            )));
        }
        if self.box_size.iter().any(|&l| !(l.is_finite() && l > 0.0)) {
            return Err(DomDecError::InvalidConfig(format!(
                "box edges must be positive, got {:?}",
                self.box_size
            )));
        }
        if !(self.cutoff.is_finite() && self.cutoff > 0.0) {
            return Err(DomDecError::InvalidConfig(format!(
                "cutoff must be positive, got {}",
                self.cutoff
            )));
        }
        if self.master_rank >= self.n_nodes {
            return Err(DomDecError::RankOutOfRange {
                rank: self.master_rank,
                size: self.n_nodes,
            });
        }
        if let Some(nc) = self.grid {
            if nc.iter().any(|&n| n == 0 || n > DD_MAXCELL) {
                return Err(DomDecError::InvalidGrid(format!(
                    "every axis needs 1..={DD_MAXCELL} cells, got {nc:?}"
                )));
            }
            if nc.iter().product::<usize>() != self.n_nodes {
                return Err(DomDecError::InvalidGrid(format!(
                    "grid {nc:?} does not have {} cells",
                    self.n_nodes
                )));
            }
        }
        // Leave room for every phase above the base tag.
        if self.tag_base as u32 + 10 * crate::algs::communicator::DdCommTags::PHASE_STRIDE as u32
            > u16::MAX as u32
        {
            return Err(DomDecError::InvalidConfig(format!(
                "tag_base {:#x} leaves no room for the exchange phases",
                self.tag_base
            )));
        }
        Ok(())
    }
}
