// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-shard sparse parameter store for a distributed parameter server.
//!
//! The store is a concurrent sign → weight-vector map. Each [`SparseTable`]
//! owns one optimizer kernel and serves four kinds of traffic:
//!
//! - **Pull**: read weight vectors for a batch of signs, lazily creating
//!   zero-initialized records for signs never seen before.
//! - **Push**: enqueue gradient records; a dedicated background worker
//!   drains the queue and applies exactly one optimizer step per record.
//! - **Save/Load**: snapshot the full key-space to a deterministic per-shard
//!   path and restore it bit-for-bit.
//! - **ShowDecay**: a maintenance pass that ages exposure counters so
//!   rarely-seen keys lose confidence over time.
//!
//! Tables are registered in a [`TableRegistry`] which assigns each a stable
//! integer handle used by the external request layer for routing.
//!
//! Dimension mismatches, double handle assignment, and unknown handles are
//! protocol bugs between collaborators and panic with a diagnostic rather
//! than returning errors; snapshot I/O failures are surfaced as
//! [`StoreError`] so callers can retry or alert.

pub mod compact;
pub mod config;
pub mod error;
pub mod kernel;
pub mod optimizer;
pub mod registry;
pub mod snapshot;
pub mod table;
pub mod wire;

pub use compact::{CompactVector, MINI_DIM};
pub use config::SparseTableConfig;
pub use error::{Result, StoreError};
pub use kernel::{OptimizerFamily, SparseKernel};
pub use optimizer::ada_grad::AdaGrad;
pub use optimizer::adam::{Adam, AdamGlobals};
pub use optimizer::{GradientRecord, OptimizerConfig, SparseOptKernel};
pub use registry::{TableHandle, TableRegistry};
pub use snapshot::SnapshotHeader;
pub use table::{SparseTable, TableStats, TableStatsSnapshot};
pub use wire::{
    SparsePullRequest, SparsePullResponse, SparsePushRequest, SparsePushResponse,
    SparsePushVarInfo,
};

/// Unsigned 64-bit feature signature identifying one sparse key.
///
/// Signs are globally unique within a table; only equality/hash lookup is
/// ever performed on them.
pub type Sign = u64;
