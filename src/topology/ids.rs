//! `AtomId` and `CgId`: strong, zero-cost handles for global particle identity.
//!
//! Every atom and every charge group of the simulated system has one global
//! index that never changes during a run. Local slots, by contrast, are
//! renumbered at every repartition, so global and local indices are kept in
//! distinct types and never mixed up.
//!
//! Both ids are `repr(transparent)` over `u32` and `Pod`, so id lists can be
//! cast to bytes and sent over the wire without copying.

use bytemuck::{Pod, Zeroable};
use std::fmt;

macro_rules! global_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
            Pod, Zeroable, serde::Serialize, serde::Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Wrap a raw global index.
            #[inline]
            pub const fn new(raw: u32) -> Self {
                $name(raw)
            }

            /// Build an id from a `usize` index, failing if it does not fit in `u32`.
            #[inline]
            pub fn from_index(idx: usize) -> Option<Self> {
                u32::try_from(idx).ok().map($name)
            }

            /// The raw `u32` value.
            #[inline]
            pub const fn get(self) -> u32 {
                self.0
            }

            /// The value as an index into global arrays.
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.0).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for usize {
            #[inline]
            fn from(id: $name) -> usize {
                id.index()
            }
        }
    };
}

global_id!(
    /// Global atom index.
    AtomId
);
global_id!(
    /// Global charge-group index.
    CgId
);

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::{assert_eq_align, assert_eq_size};

    assert_eq_size!(AtomId, u32);
    assert_eq_size!(CgId, u32);
    assert_eq_align!(AtomId, u32);
}


#[cfg(test)]
mod serde_tests {
    use super::*;

    #[test]
    fn json_roundtrip() {
        let a = AtomId::new(123);
        let s = serde_json::to_string(&a).unwrap();
        assert_eq!(s, "123");
        let back: AtomId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn bincode_roundtrip() {
        let c = CgId::new(456);
        let bytes = bincode::serialize(&c).unwrap();
        let back: CgId = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, c);
    }
}
