//! Ghost (halo) exchange between neighboring cells.

pub mod exchange;
pub mod links;

pub use exchange::{exchange_forward, exchange_reverse, move_f, move_x};
pub use links::{GhostLink, GhostLinks, setup_ghost_links};
