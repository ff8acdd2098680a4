// SPDX-License-Identifier: MIT OR Apache-2.0
//! Optimizer families for the sparse store.
//!
//! A table owns exactly one kernel, created from an [`OptimizerConfig`]
//! descriptor, and talks to it only through [`SparseOptKernel`]. Concrete
//! families ([`adam`], [`ada_grad`]) supply the per-key state shape and
//! update rule; the shared key-space plumbing lives in
//! [`crate::kernel::SparseKernel`].

pub mod ada_grad;
pub mod adam;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kernel::{OptimizerFamily, SparseKernel};
use crate::Sign;

pub use ada_grad::AdaGrad;
pub use adam::Adam;

/// One queued gradient update for one key.
///
/// The gradient buffer is exclusively owned by the record: the pushing
/// caller copies into it, the background worker reads it once during apply,
/// and it is released when the record is dropped.
#[derive(Debug, Clone)]
pub struct GradientRecord {
    /// Key the gradient applies to.
    pub sign: Sign,
    /// Gradient values, one per weight component.
    pub grad: Box<[f32]>,
    /// How many times the key was observed in the batch that produced
    /// this gradient.
    pub batch_show: f32,
}

/// Capability set of a sparse optimizer kernel.
///
/// All methods take `&self`; kernels synchronize internally. `pull_weight`
/// and `apply` on the same key serialize against each other, and
/// `pull_weight` on a never-seen key creates a default-initialized record
/// exactly once even under concurrent callers.
pub trait SparseOptKernel: Send + Sync {
    /// Weight vector dimension, fixed at construction.
    fn dim(&self) -> usize;

    /// Copies the key's weight vector into `dst`, creating and
    /// zero-initializing the record on first access.
    ///
    /// Panics if `dst.len()` differs from the kernel dimension.
    fn pull_weight(&self, sign: Sign, dst: &mut [f32]);

    /// Applies exactly one optimizer step for the record's key.
    fn apply(&self, record: &GradientRecord);

    /// Number of distinct keys currently held.
    fn key_count(&self) -> usize;

    /// Maintenance pass over the full key-space decaying exposure state;
    /// driven by an external scheduler, never self-invoked.
    fn show_decay(&self);

    /// Writes the full key-space to `path`. Callers quiesce pushes first.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replaces the in-memory key-space with the snapshot at `path`.
    /// Intended to run before the table starts serving.
    fn load(&self, path: &Path) -> Result<()>;

    /// Approximate bytes held by per-key records.
    fn memory_bytes(&self) -> usize;
}

/// Optimizer descriptor: which family a table runs and its hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizerConfig {
    /// Adam-style rule with moment estimates and bias correction.
    Adam(Adam),
    /// AdaGrad rule with an accumulated squared-gradient scalar.
    AdaGrad(AdaGrad),
}

impl OptimizerConfig {
    /// Tag identifying the family, as written into snapshot headers.
    #[must_use]
    pub fn family_name(&self) -> &'static str {
        match self {
            Self::Adam(_) => Adam::FAMILY,
            Self::AdaGrad(_) => AdaGrad::FAMILY,
        }
    }

    /// Creates a sparse kernel of this family for the given dimension.
    #[must_use]
    pub fn create_sparse_kernel(&self, dim: usize) -> Arc<dyn SparseOptKernel> {
        match self {
            Self::Adam(opt) => Arc::new(SparseKernel::new(opt.clone(), dim)),
            Self::AdaGrad(opt) => Arc::new(SparseKernel::new(opt.clone(), dim)),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam(Adam::default())
    }
}
