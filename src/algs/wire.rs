//! Fixed little-endian wire records and slice helpers for the exchange paths.
//!
//! Counts and ids are stored pre-LE with `.to_le()` and decoded with
//! `.from_le()`. Coordinate payloads travel in host byte order; every node of
//! a run is assumed to share one architecture.
//!
//! Received payloads are plain `Vec<u8>` with no alignment guarantee, so
//! decoding never casts the received bytes in place: ids are read
//! chunk-by-chunk and vectors are copied into an aligned destination.

use crate::Vec3;
use crate::dd_error::DomDecError;
use crate::topology::ids::{AtomId, CgId};
use bytemuck::{Pod, Zeroable};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Fail with `BufferSizeMismatch` unless `actual == expected`.
pub fn expect_exact_len(neighbor: usize, actual: usize, expected: usize) -> Result<(), DomDecError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DomDecError::BufferSizeMismatch {
            neighbor,
            expected,
            got: actual,
        })
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }

    /// Decode from exactly four bytes.
    pub fn decode(neighbor: usize, data: &[u8]) -> Result<Self, DomDecError> {
        expect_exact_len(neighbor, data.len(), size_of::<Self>())?;
        let mut c = WireCount::zeroed();
        cast_slice_mut(std::slice::from_mut(&mut c)).copy_from_slice(data);
        Ok(c)
    }
}

/// Header of one ghost link: charge groups and atoms that follow.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireLinkHeader {
    pub ncg_le: u32,
    pub nat_le: u32,
}

impl WireLinkHeader {
    pub fn new(ncg: usize, nat: usize) -> Self {
        Self {
            ncg_le: (ncg as u32).to_le(),
            nat_le: (nat as u32).to_le(),
        }
    }
    pub fn ncg(&self) -> usize {
        u32::from_le(self.ncg_le) as usize
    }
    pub fn nat(&self) -> usize {
        u32::from_le(self.nat_le) as usize
    }

    pub fn decode(neighbor: usize, data: &[u8]) -> Result<Self, DomDecError> {
        expect_exact_len(neighbor, data.len(), size_of::<Self>())?;
        let mut h = WireLinkHeader::zeroed();
        cast_slice_mut(std::slice::from_mut(&mut h)).copy_from_slice(data);
        Ok(h)
    }
}

/// Append `ids` as little-endian `u32`s.
pub fn put_u32s(out: &mut Vec<u8>, ids: impl IntoIterator<Item = u32>) {
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
}

/// Decode a payload of little-endian `u32`s, checking the exact count.
pub fn read_u32s(neighbor: usize, data: &[u8], count: usize) -> Result<Vec<u32>, DomDecError> {
    expect_exact_len(neighbor, data.len(), count * 4)?;
    Ok(data
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn encode_atom_ids(ids: &[AtomId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ids.len() * 4);
    put_u32s(&mut out, ids.iter().map(|a| a.get()));
    out
}

pub fn decode_atom_ids(neighbor: usize, data: &[u8]) -> Result<Vec<AtomId>, DomDecError> {
    if data.len() % 4 != 0 {
        return Err(DomDecError::malformed(neighbor, "atom id list is not a multiple of 4 bytes"));
    }
    Ok(read_u32s(neighbor, data, data.len() / 4)?
        .into_iter()
        .map(AtomId::new)
        .collect())
}

pub fn encode_cg_ids(ids: &[CgId]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ids.len() * 4);
    put_u32s(&mut out, ids.iter().map(|g| g.get()));
    out
}

pub fn decode_cg_ids(neighbor: usize, data: &[u8], count: usize) -> Result<Vec<CgId>, DomDecError> {
    Ok(read_u32s(neighbor, data, count)?
        .into_iter()
        .map(CgId::new)
        .collect())
}

/// Bytes occupied by `n` vectors on the wire.
#[inline]
pub const fn vec3_bytes(n: usize) -> usize {
    n * size_of::<Vec3>()
}

/// Copy a received vector payload into `out`, which must hold exactly the
/// expected number of vectors.
pub fn copy_vec3s(neighbor: usize, data: &[u8], out: &mut [Vec3]) -> Result<(), DomDecError> {
    expect_exact_len(neighbor, data.len(), vec3_bytes(out.len()))?;
    cast_slice_mut(out).copy_from_slice(data);
    Ok(())
}

/// Decode a vector payload of exactly `count` vectors.
pub fn read_vec3s(neighbor: usize, data: &[u8], count: usize) -> Result<Vec<Vec3>, DomDecError> {
    let mut out = vec![[0.0; 3]; count];
    copy_vec3s(neighbor, data, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<WireCount>(), 4);
    const_assert_eq!(size_of::<WireLinkHeader>(), 8);

    #[test]
    fn header_is_little_endian() {
        let h = WireLinkHeader::new(3, 0x0102);
        let bytes = cast_slice(std::slice::from_ref(&h));
        assert_eq!(bytes, &[3, 0, 0, 0, 2, 1, 0, 0]);
        let back = WireLinkHeader::decode(0, bytes).unwrap();
        assert_eq!((back.ncg(), back.nat()), (3, 0x0102));
    }

    #[test]
    fn short_header_is_size_mismatch() {
        assert_eq!(
            WireCount::decode(5, &[1, 0]).unwrap_err(),
            DomDecError::BufferSizeMismatch {
                neighbor: 5,
                expected: 4,
                got: 2
            }
        );
    }

    #[test]
    fn unaligned_ids_decode() {
        let ids = [AtomId::new(9), AtomId::new(70_000)];
        let mut raw = vec![0u8];
        raw.extend(encode_atom_ids(&ids));
        assert_eq!(decode_atom_ids(0, &raw[1..]).unwrap(), ids);
        assert!(decode_atom_ids(0, &raw[..3]).is_err());
    }

    #[test]
    fn vec3_count_must_match() {
        let x = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let bytes = cast_slice(&x).to_vec();
        assert_eq!(read_vec3s(1, &bytes, 2).unwrap(), x);
        assert!(matches!(
            read_vec3s(1, &bytes, 3),
            Err(DomDecError::BufferSizeMismatch { expected: 72, got: 48, .. })
        ));
    }
}
