// SPDX-License-Identifier: MIT OR Apache-2.0
//! Packed per-key vector storage with a small-dimension fast path.
//!
//! Sparse tables hold one record per key across potentially billions of
//! keys, so the per-key footprint matters. For very small dimensions the
//! vector fits in the record itself; anything larger spills to a separately
//! allocated buffer. [`CompactVector`] hides that choice behind uniform
//! slice accessors so optimizer code never branches on representation, and
//! both representations have bit-identical read/write semantics.
//!
//! The boundary is the compile-time constant [`MINI_DIM`], a policy of the
//! layout rather than per-instance configuration.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Largest dimension stored inline; larger vectors spill to the heap.
pub const MINI_DIM: usize = 2;

/// A fixed-length f32 vector stored inline when it fits in [`MINI_DIM`]
/// components and on the heap otherwise.
///
/// The length is fixed at construction; [`as_slice`](Self::as_slice) and
/// [`as_mut_slice`](Self::as_mut_slice) always view exactly that many
/// contiguous floats regardless of representation.
#[derive(Debug, Clone, PartialEq)]
pub enum CompactVector {
    /// Vector embedded in the record, no separate allocation.
    Inline {
        /// Number of live components in `buf`.
        len: u8,
        /// Inline storage; components past `len` are unused.
        buf: [f32; MINI_DIM],
    },
    /// Vector spilled to its own allocation.
    Heap(Box<[f32]>),
}

impl CompactVector {
    /// Whether a vector of `dim` components is stored inline.
    #[must_use]
    pub const fn is_inline(dim: usize) -> bool {
        dim <= MINI_DIM
    }

    /// An all-zero vector of `dim` components.
    #[must_use]
    pub fn zeros(dim: usize) -> Self {
        if Self::is_inline(dim) {
            Self::Inline {
                len: dim as u8,
                buf: [0.0; MINI_DIM],
            }
        } else {
            Self::Heap(vec![0.0f32; dim].into_boxed_slice())
        }
    }

    /// Builds a vector from `values`, choosing the representation by length.
    #[must_use]
    pub fn from_vec(values: Vec<f32>) -> Self {
        if Self::is_inline(values.len()) {
            let mut buf = [0.0f32; MINI_DIM];
            buf[..values.len()].copy_from_slice(&values);
            Self::Inline {
                len: values.len() as u8,
                buf,
            }
        } else {
            Self::Heap(values.into_boxed_slice())
        }
    }

    /// Number of components.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Inline { len, .. } => usize::from(*len),
            Self::Heap(buf) => buf.len(),
        }
    }

    /// Whether the vector has zero components.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The components as a contiguous slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        match self {
            Self::Inline { len, buf } => &buf[..usize::from(*len)],
            Self::Heap(buf) => buf,
        }
    }

    /// The components as a mutable contiguous slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        match self {
            Self::Inline { len, buf } => &mut buf[..usize::from(*len)],
            Self::Heap(buf) => buf,
        }
    }

    /// Bytes allocated outside the record for a vector of `dim` components.
    ///
    /// Zero below the mini-dim boundary. Together with
    /// `size_of::<CompactVector>()` this makes the per-key record footprint
    /// a pure function of `dim`.
    #[must_use]
    pub const fn spill_bytes(dim: usize) -> usize {
        if Self::is_inline(dim) {
            0
        } else {
            dim * std::mem::size_of::<f32>()
        }
    }
}

// Serialized as a plain float sequence; the representation is rebuilt from
// the length on deserialization, so snapshots are representation-agnostic.
impl Serialize for CompactVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.as_slice())
    }
}

impl<'de> Deserialize<'de> for CompactVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<f32>::deserialize(deserializer)?;
        Ok(Self::from_vec(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_selects_representation_by_dim() {
        assert!(matches!(
            CompactVector::zeros(1),
            CompactVector::Inline { len: 1, .. }
        ));
        assert!(matches!(
            CompactVector::zeros(MINI_DIM),
            CompactVector::Inline { .. }
        ));
        assert!(matches!(
            CompactVector::zeros(MINI_DIM + 1),
            CompactVector::Heap(_)
        ));
    }

    #[test]
    fn zeros_reads_back_zero() {
        for dim in [1, 2, 8] {
            let v = CompactVector::zeros(dim);
            assert_eq!(v.len(), dim);
            assert!(v.as_slice().iter().all(|&x| x == 0.0));
        }
    }

    #[test]
    fn writes_read_back_identically_in_both_representations() {
        for dim in [1, 2, 8] {
            let mut v = CompactVector::zeros(dim);
            for (i, x) in v.as_mut_slice().iter_mut().enumerate() {
                *x = i as f32 + 0.5;
            }
            let expected: Vec<f32> = (0..dim).map(|i| i as f32 + 0.5).collect();
            assert_eq!(v.as_slice(), expected.as_slice());
        }
    }

    #[test]
    fn from_vec_roundtrips_values() {
        let inline = CompactVector::from_vec(vec![1.5]);
        assert_eq!(inline.as_slice(), &[1.5]);
        assert!(matches!(inline, CompactVector::Inline { .. }));

        let heap = CompactVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert_eq!(heap.as_slice(), &[1.0, 2.0, 3.0]);
        assert!(matches!(heap, CompactVector::Heap(_)));
    }

    #[test]
    fn spill_bytes_is_zero_only_below_boundary() {
        assert_eq!(CompactVector::spill_bytes(1), 0);
        assert_eq!(CompactVector::spill_bytes(MINI_DIM), 0);
        assert_eq!(
            CompactVector::spill_bytes(8),
            8 * std::mem::size_of::<f32>()
        );
    }

    #[test]
    fn serde_roundtrip_preserves_values_and_representation() {
        for dim in [1, 2, 8] {
            let mut v = CompactVector::zeros(dim);
            for (i, x) in v.as_mut_slice().iter_mut().enumerate() {
                *x = (i as f32).exp();
            }
            let bytes = bincode::serialize(&v).unwrap();
            let back: CompactVector = bincode::deserialize(&bytes).unwrap();
            assert_eq!(back, v);
            assert_eq!(
                matches!(back, CompactVector::Inline { .. }),
                CompactVector::is_inline(dim)
            );
        }
    }

    #[test]
    fn empty_vector() {
        let v = CompactVector::zeros(0);
        assert!(v.is_empty());
        assert_eq!(v.as_slice(), &[] as &[f32]);
    }
}
