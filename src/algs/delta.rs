//! Delta trait: how an incoming halo value is merged into the local slot.
//!
//! Coordinates flow owner → ghost and overwrite ([`CopyDelta`]); forces flow
//! ghost → owner and accumulate ([`AddDelta`]).

use crate::Vec3;

/// *Delta* encapsulates restriction & fusion for a per-atom value `V`.
pub trait Delta<V>: Sized {
    /// Extract the value that travels for one atom.
    fn restrict(v: &V) -> V;

    /// Merge an incoming value into the local one.
    fn fuse(local: &mut V, incoming: V);
}

/// Copy-overwrites-local.
#[derive(Copy, Clone, Debug, Default)]
pub struct CopyDelta;

impl<V: Clone> Delta<V> for CopyDelta {
    #[inline]
    fn restrict(v: &V) -> V {
        v.clone()
    }
    #[inline]
    fn fuse(local: &mut V, incoming: V) {
        *local = incoming;
    }
}

/// Additive delta for force-like fields.
#[derive(Copy, Clone, Debug, Default)]
pub struct AddDelta;

impl Delta<f64> for AddDelta {
    #[inline]
    fn restrict(v: &f64) -> f64 {
        *v
    }
    #[inline]
    fn fuse(local: &mut f64, incoming: f64) {
        *local += incoming;
    }
}

impl Delta<Vec3> for AddDelta {
    #[inline]
    fn restrict(v: &Vec3) -> Vec3 {
        *v
    }
    #[inline]
    fn fuse(local: &mut Vec3, incoming: Vec3) {
        for d in 0..3 {
            local[d] += incoming[d];
        }
    }
}

/// Fuse `incoming` element-wise into `local`.
#[inline]
pub fn fuse_all<D: Delta<Vec3>>(local: &mut [Vec3], incoming: &[Vec3]) {
    for (l, i) in local.iter_mut().zip(incoming) {
        D::fuse(l, *i);
    }
}
