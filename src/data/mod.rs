//! Data module: per-node decomposition state and the buffers it exchanges through.

pub mod buffer;
pub mod global_map;
pub mod local_domain;
pub mod master;
pub mod state;

pub use buffer::{BufferPool, GrowBuf};
pub use global_map::{GlobalToLocal, LocalEntry};
pub use local_domain::LocalDomain;
pub use master::{AssignmentView, Epoch, MasterAssignment};
pub use state::{GlobalState, LocalState};
