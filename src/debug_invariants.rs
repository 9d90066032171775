//! Self-checks of the per-node index structures.
//!
//! `validate_invariants` is always available and returns the first violation.
//! `debug_assert_invariants` panics on one, but only in debug builds or with
//! the `check-invariants` feature; release builds skip the walk entirely.

use crate::dd_error::DomDecError;

pub trait DebugInvariants {
    /// Panic on the first violated invariant when checking is compiled in.
    fn debug_assert_invariants(&self);

    /// Walk the structure and report the first violated invariant.
    fn validate_invariants(&self) -> Result<(), DomDecError>;
}

/// Run `$check` (a `Result<(), DomDecError>`) and panic with `$what` as
/// context if it fails. Compiles to nothing unless checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($check:expr, $($what:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        {
            if let Err(err) = $check {
                panic!(concat!("domain decomposition invariant broken: ", $($what)*, ": {}"), err);
            }
        }
    };
}
