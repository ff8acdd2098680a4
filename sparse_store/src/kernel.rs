// SPDX-License-Identifier: MIT OR Apache-2.0
//! Generic sparse kernel: the concurrent key-space shared by all optimizer
//! families.
//!
//! [`SparseKernel`] owns a sharded concurrent map from sign to per-key
//! record. The map's per-bucket locks are the store's concurrency
//! boundary: lazy create-on-read and gradient application for the same key
//! serialize on the key's bucket, while traffic on other keys proceeds in
//! parallel. A single global lock would serialize all pulls against the
//! background worker, so none is used.

use std::path::Path;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::optimizer::{GradientRecord, SparseOptKernel};
use crate::snapshot::{SnapshotReader, SnapshotWriter};
use crate::Sign;

/// Update rule and per-key state shape of one optimizer family.
///
/// Implementations hold only hyperparameters; all mutable state lives in
/// the per-key `Value` records and the kernel-wide `Globals`.
pub trait OptimizerFamily: Send + Sync + 'static {
    /// Family tag written into snapshot headers and validated on load.
    const FAMILY: &'static str;

    /// Per-key record: weight vector, auxiliary state, exposure count.
    type Value: Send + Sync + Serialize + DeserializeOwned;

    /// Scalars shared across all keys of one kernel; `()` for families
    /// without any.
    type Globals: Send + Clone + Default + Serialize + DeserializeOwned;

    /// Default-initialized record for a newly created key.
    fn init_value(&self, dim: usize) -> Self::Value;

    /// The record's weight vector.
    fn weight<'a>(&self, value: &'a Self::Value) -> &'a [f32];

    /// One optimizer step for one record.
    fn apply(&self, value: &mut Self::Value, globals: &mut Self::Globals, record: &GradientRecord);

    /// Per-key decay policy for the maintenance pass.
    fn show_decay(&self, value: &mut Self::Value);

    /// Per-key record footprint in bytes; a pure function of `dim`.
    fn value_bytes(&self, dim: usize) -> usize;
}

/// Concurrent key-space plus family-global scalars for one table.
pub struct SparseKernel<F: OptimizerFamily> {
    opt: F,
    dim: usize,
    globals: Mutex<F::Globals>,
    values: DashMap<Sign, F::Value>,
}

impl<F: OptimizerFamily> SparseKernel<F> {
    /// Creates an empty kernel for vectors of `dim` components.
    #[must_use]
    pub fn new(opt: F, dim: usize) -> Self {
        assert!(dim > 0, "sparse kernel dimension must be positive");
        Self {
            opt,
            dim,
            globals: Mutex::new(F::Globals::default()),
            values: DashMap::new(),
        }
    }
}

impl<F: OptimizerFamily> SparseOptKernel for SparseKernel<F> {
    fn dim(&self) -> usize {
        self.dim
    }

    fn pull_weight(&self, sign: Sign, dst: &mut [f32]) {
        assert_eq!(
            dst.len(),
            self.dim,
            "weight buffer has {} slots, kernel dimension is {}",
            dst.len(),
            self.dim
        );
        // Fast path: existing keys copy under the bucket's read lock.
        if let Some(entry) = self.values.get(&sign) {
            dst.copy_from_slice(self.opt.weight(entry.value()));
            return;
        }
        // The entry API holds the bucket's write lock, so concurrent first
        // accesses of the same sign insert exactly one record and a
        // concurrent apply on this sign cannot interleave with the copy.
        let entry = self
            .values
            .entry(sign)
            .or_insert_with(|| self.opt.init_value(self.dim));
        dst.copy_from_slice(self.opt.weight(entry.value()));
    }

    fn apply(&self, record: &GradientRecord) {
        assert_eq!(
            record.grad.len(),
            self.dim,
            "gradient for sign {} has {} components, kernel dimension is {}",
            record.sign,
            record.grad.len(),
            self.dim
        );
        let mut globals = self.globals.lock();
        let mut entry = self
            .values
            .entry(record.sign)
            .or_insert_with(|| self.opt.init_value(self.dim));
        self.opt.apply(entry.value_mut(), &mut globals, record);
    }

    fn key_count(&self) -> usize {
        self.values.len()
    }

    fn show_decay(&self) {
        for mut entry in self.values.iter_mut() {
            self.opt.show_decay(entry.value_mut());
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        let globals = self.globals.lock().clone();
        let mut writer =
            SnapshotWriter::create(path, F::FAMILY, self.dim, self.values.len() as u64)?;
        writer.write_globals(&globals)?;
        for entry in self.values.iter() {
            writer.write_entry(*entry.key(), entry.value())?;
        }
        writer.finish()
    }

    fn load(&self, path: &Path) -> Result<()> {
        let mut reader = SnapshotReader::open(path, F::FAMILY, self.dim)?;
        let globals: F::Globals = reader.read_globals()?;

        self.values.clear();
        for _ in 0..reader.entry_count() {
            let (sign, value): (Sign, F::Value) = reader.read_entry()?;
            self.values.insert(sign, value);
        }
        *self.globals.lock() = globals;
        Ok(())
    }

    fn memory_bytes(&self) -> usize {
        self.values.len() * (std::mem::size_of::<Sign>() + self.opt.value_bytes(self.dim))
    }
}
