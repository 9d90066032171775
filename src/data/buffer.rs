//! Growable communication buffers with an explicit, monotone capacity.
//!
//! A [`GrowBuf`] tracks its own `nalloc` next to the `Vec`: the tracked
//! capacity only ever grows (geometrically) until [`GrowBuf::reset`] is called.
//! Growth goes through `try_reserve` so an allocation failure surfaces as
//! [`DomDecError::Capacity`] instead of aborting.

use crate::Vec3;
use crate::dd_error::DomDecError;

const MIN_ALLOC: usize = 16;

#[derive(Clone, Debug, Default)]
pub struct GrowBuf<T> {
    data: Vec<T>,
    nalloc: usize,
}

impl<T: Clone + Default> GrowBuf<T> {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            nalloc: 0,
        }
    }

    /// Tracked capacity.
    pub fn nalloc(&self) -> usize {
        self.nalloc
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Drop the contents, keeping the capacity.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Make room for at least `n` elements.
    pub fn ensure(&mut self, n: usize) -> Result<(), DomDecError> {
        if n <= self.nalloc {
            return Ok(());
        }
        let target = n.max(2 * self.nalloc).max(MIN_ALLOC);
        self.data
            .try_reserve_exact(target - self.data.len())
            .map_err(|_| DomDecError::Capacity { requested: target })?;
        self.nalloc = target;
        Ok(())
    }

    /// Set the length to `n`, filling new slots with `T::default()`.
    pub fn resize(&mut self, n: usize) -> Result<&mut [T], DomDecError> {
        self.ensure(n)?;
        self.data.resize(n, T::default());
        Ok(&mut self.data)
    }

    pub fn push(&mut self, v: T) -> Result<(), DomDecError> {
        self.ensure(self.data.len() + 1)?;
        self.data.push(v);
        Ok(())
    }

    pub fn extend_from_slice(&mut self, v: &[T]) -> Result<(), DomDecError> {
        self.ensure(self.data.len() + v.len())?;
        self.data.extend_from_slice(v);
        Ok(())
    }

    /// Release the storage; the only way the capacity shrinks.
    pub fn reset(&mut self) {
        self.data = Vec::new();
        self.nalloc = 0;
    }
}

/// The scratch buffers shared by all exchanges of one decomposition.
#[derive(Clone, Debug, Default)]
pub struct BufferPool {
    /// Integer scratch: charge-group and atom id lists.
    pub int1: GrowBuf<u32>,
    pub vec_send: GrowBuf<Vec3>,
    pub vec_recv: GrowBuf<Vec3>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracked capacities `[int1, vec_send, vec_recv]`.
    pub fn capacities(&self) -> [usize; 3] {
        [
            self.int1.nalloc(),
            self.vec_send.nalloc(),
            self.vec_recv.nalloc(),
        ]
    }

    pub fn reset(&mut self) {
        self.int1.reset();
        self.vec_send.reset();
        self.vec_recv.reset();
    }
}
