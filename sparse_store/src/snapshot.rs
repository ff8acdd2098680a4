// SPDX-License-Identifier: MIT OR Apache-2.0
//! Binary snapshot framing.
//!
//! Layout: magic bytes, format version, bincode header (family tag,
//! dimension, entry count), family globals, then `entry_count` bincode
//! `(sign, value)` pairs. The header is validated on open so a snapshot
//! can never be silently loaded into a kernel of the wrong family or
//! dimension. Floats travel as raw IEEE-754 bits, so round-trips are
//! bit-exact.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::Sign;

const MAGIC: [u8; 4] = *b"SPST";
const VERSION: u32 = 1;

/// Self-describing snapshot header following the magic and version bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Optimizer family that wrote the snapshot.
    pub family: String,
    /// Weight vector dimension of the key-space.
    pub dim: u64,
    /// Number of `(sign, value)` entries that follow the globals.
    pub entry_count: u64,
}

/// Streams one kernel snapshot to disk.
pub struct SnapshotWriter {
    out: BufWriter<File>,
}

impl SnapshotWriter {
    /// Creates the snapshot file (and its parent directories) and writes
    /// the framing header.
    pub fn create(path: &Path, family: &str, dim: usize, entry_count: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        bincode::serialize_into(
            &mut out,
            &SnapshotHeader {
                family: family.to_string(),
                dim: dim as u64,
                entry_count,
            },
        )?;
        Ok(Self { out })
    }

    /// Writes the family-global scalars; call once, before any entry.
    pub fn write_globals<G: Serialize>(&mut self, globals: &G) -> Result<()> {
        bincode::serialize_into(&mut self.out, globals)?;
        Ok(())
    }

    /// Appends one `(sign, value)` entry.
    pub fn write_entry<V: Serialize>(&mut self, sign: Sign, value: &V) -> Result<()> {
        bincode::serialize_into(&mut self.out, &(sign, value))?;
        Ok(())
    }

    /// Flushes buffered bytes to the file.
    pub fn finish(mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Streams one kernel snapshot from disk, validating the header on open.
#[derive(Debug)]
pub struct SnapshotReader {
    input: BufReader<File>,
    header: SnapshotHeader,
}

impl SnapshotReader {
    /// Opens `path` and checks magic, version, family, and dimension.
    pub fn open(path: &Path, family: &str, dim: usize) -> Result<Self> {
        let mut input = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(StoreError::InvalidMagic);
        }

        let mut version = [0u8; 4];
        input.read_exact(&mut version)?;
        let version = u32::from_le_bytes(version);
        if version != VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }

        let header: SnapshotHeader = bincode::deserialize_from(&mut input)?;
        if header.family != family {
            return Err(StoreError::FamilyMismatch {
                expected: family.to_string(),
                found: header.family,
            });
        }
        if header.dim as usize != dim {
            return Err(StoreError::DimensionMismatch {
                expected: dim,
                found: header.dim as usize,
            });
        }

        Ok(Self { input, header })
    }

    /// Number of entries recorded in the header.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.header.entry_count
    }

    /// Reads the family-global scalars; call once, before any entry.
    pub fn read_globals<G: DeserializeOwned>(&mut self) -> Result<G> {
        Ok(bincode::deserialize_from(&mut self.input)?)
    }

    /// Reads the next `(sign, value)` entry.
    pub fn read_entry<V: DeserializeOwned>(&mut self) -> Result<(Sign, V)> {
        Ok(bincode::deserialize_from(&mut self.input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_framed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rank_3");

        let mut writer = SnapshotWriter::create(&path, "adam", 4, 2).unwrap();
        writer.write_globals(&(0.5f32, 0.25f32)).unwrap();
        writer.write_entry(10, &vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        writer.write_entry(20, &vec![5.0f32, 6.0, 7.0, 8.0]).unwrap();
        writer.finish().unwrap();

        let mut reader = SnapshotReader::open(&path, "adam", 4).unwrap();
        assert_eq!(reader.entry_count(), 2);
        let globals: (f32, f32) = reader.read_globals().unwrap();
        assert_eq!(globals, (0.5, 0.25));
        let (sign, values): (Sign, Vec<f32>) = reader.read_entry().unwrap();
        assert_eq!((sign, values), (10, vec![1.0, 2.0, 3.0, 4.0]));
        let (sign, _): (Sign, Vec<f32>) = reader.read_entry().unwrap();
        assert_eq!(sign, 20);
    }

    #[test]
    fn rejects_garbage_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk");
        fs::write(&path, b"not a snapshot at all").unwrap();

        let err = SnapshotReader::open(&path, "adam", 4).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMagic));
    }

    #[test]
    fn rejects_future_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future");
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&99u32.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        let err = SnapshotReader::open(&path, "adam", 4).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion(99)));
    }

    #[test]
    fn truncated_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rank_0");

        let mut writer = SnapshotWriter::create(&path, "adam", 2, 5).unwrap();
        writer.write_globals(&()).unwrap();
        writer.write_entry(1, &vec![1.0f32, 2.0]).unwrap();
        writer.finish().unwrap();

        // Header promises 5 entries; only one was written.
        let mut reader = SnapshotReader::open(&path, "adam", 2).unwrap();
        reader.read_globals::<()>().unwrap();
        reader.read_entry::<Vec<f32>>().unwrap();
        assert!(reader.read_entry::<Vec<f32>>().is_err());
    }
}
