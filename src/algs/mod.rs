//! Re-export public algorithms.

pub mod collective;
pub mod communicator;
pub mod delta;
pub mod distribute;
pub mod halo;
pub mod migrate;
pub mod wire;

pub use collective::{allreduce_or, allreduce_sum_u64, broadcast_from_root, gather_to_root, sendrecv};
pub use distribute::{GroupPayload, collect_to_master, distribute_from_master};
pub use halo::{move_f, move_x, setup_ghost_links};
pub use migrate::migrate_home_groups;
