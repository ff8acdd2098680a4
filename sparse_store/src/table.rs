// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sparse table: pull/push serving plus the background gradient pipeline.
//!
//! Pulls read (and lazily create) weight vectors directly from the kernel.
//! Pushes never touch the optimizer: each entry is copied into an owned
//! [`GradientRecord`] and enqueued on an MPSC channel, and a single
//! dedicated worker thread drains the channel and applies one optimizer
//! step per record. Per-producer FIFO order is preserved by the channel;
//! same-key applies are serialized by the single consumer.
//!
//! Dropping the table closes the channel; the worker applies everything
//! still queued, then exits and is joined. Queued gradients are never
//! discarded.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::config::SparseTableConfig;
use crate::error::Result;
use crate::optimizer::{GradientRecord, SparseOptKernel};
use crate::registry::TableHandle;
use crate::wire::{SparsePullRequest, SparsePullResponse, SparsePushRequest, SparsePushResponse};

/// Gradient pipeline counters, shared between the table and its worker.
#[derive(Debug, Default)]
pub struct TableStats {
    pushed: AtomicU64,
    applied: AtomicU64,
}

impl TableStats {
    /// Gradient records enqueued so far.
    #[must_use]
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Gradient records applied by the worker so far.
    ///
    /// Every optimizer write a record produced is visible once this
    /// counter covers it, so `applied() == pushed()` is a drain barrier.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    /// Point-in-time copy of both counters.
    #[must_use]
    pub fn snapshot(&self) -> TableStatsSnapshot {
        TableStatsSnapshot {
            pushed: self.pushed(),
            applied: self.applied(),
        }
    }
}

/// Plain copy of [`TableStats`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatsSnapshot {
    /// Gradient records enqueued.
    pub pushed: u64,
    /// Gradient records applied.
    pub applied: u64,
}

/// One shard of one logical sparse table.
///
/// Owns its optimizer kernel and background worker. Constructed from a
/// [`SparseTableConfig`], registered in a
/// [`TableRegistry`](crate::TableRegistry) which assigns the handle, then
/// serves pull/push/save/load/decay until dropped.
pub struct SparseTable {
    dim: usize,
    shard_num: usize,
    shard_id: usize,
    handle: OnceLock<TableHandle>,
    kernel: Arc<dyn SparseOptKernel>,
    stats: Arc<TableStats>,
    grad_tx: Option<Sender<GradientRecord>>,
    worker: Option<JoinHandle<()>>,
}

impl SparseTable {
    /// Creates the table and spawns its gradient worker.
    #[must_use]
    pub fn new(config: SparseTableConfig) -> Self {
        assert!(config.dimension > 0, "table dimension must be positive");
        assert!(
            config.shard_id < config.shard_num,
            "shard index {} out of range for {} shards",
            config.shard_id,
            config.shard_num
        );

        let kernel = config.optimizer.create_sparse_kernel(config.dimension);
        let stats = Arc::new(TableStats::default());
        let (grad_tx, grad_rx) = crossbeam_channel::unbounded();
        let worker = spawn_grad_worker(Arc::clone(&kernel), Arc::clone(&stats), grad_rx);

        Self {
            dim: config.dimension,
            shard_num: config.shard_num,
            shard_id: config.shard_id,
            handle: OnceLock::new(),
            kernel,
            stats,
            grad_tx: Some(grad_tx),
            worker: Some(worker),
        }
    }

    /// Reads one weight vector per requested sign, creating
    /// zero-initialized records for signs never seen before.
    ///
    /// The response preserves request order 1:1. Panics if the request
    /// dimension differs from the table's.
    #[must_use]
    pub fn pull(&self, req: &SparsePullRequest) -> SparsePullResponse {
        assert_eq!(
            req.dim, self.dim,
            "pull request dim {} does not match table dim {}",
            req.dim, self.dim
        );

        let mut weights = Vec::with_capacity(req.signs.len());
        for &sign in &req.signs {
            let mut w = vec![0.0f32; self.dim];
            self.kernel.pull_weight(sign, &mut w);
            weights.push(w);
        }

        SparsePullResponse {
            table_handle: req.table_handle,
            dim: self.dim,
            weights,
        }
    }

    /// Copies each entry into an owned gradient record and enqueues it for
    /// the background worker; returns once all entries are enqueued,
    /// without waiting for optimizer application.
    ///
    /// Panics if the request dimension or any entry's gradient length
    /// differs from the table's dimension.
    pub fn push(&self, req: &SparsePushRequest) -> SparsePushResponse {
        assert_eq!(
            req.dim, self.dim,
            "push request dim {} does not match table dim {}",
            req.dim, self.dim
        );

        let grad_tx = self.grad_tx.as_ref().expect("gradient queue closed");
        for var_info in &req.var_infos {
            assert_eq!(
                var_info.grad.len(),
                self.dim,
                "push gradient for sign {} has {} components, table dim is {}",
                var_info.sign,
                var_info.grad.len(),
                self.dim
            );
            let record = GradientRecord {
                sign: var_info.sign,
                grad: var_info.grad.clone().into_boxed_slice(),
                batch_show: var_info.batch_show,
            };
            grad_tx
                .send(record)
                .expect("gradient worker exited while table is live");
            self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        }

        SparsePushResponse::default()
    }

    /// Serializes the full key-space to
    /// `{base_dir}/sparse_table/{handle}/rank_{shard_id}`.
    ///
    /// Callers must quiesce push producers (and let the queue drain)
    /// first; no internal synchronization is performed against concurrent
    /// traffic.
    pub fn save(&self, base_dir: impl AsRef<Path>) -> Result<()> {
        let start = Instant::now();
        let path = self.shard_path(base_dir.as_ref());
        self.kernel.save(&path)?;
        tracing::info!(
            table_handle = self.handle().as_u32(),
            rank = self.shard_id,
            elapsed_s = start.elapsed().as_secs_f64(),
            key_count = self.kernel.key_count(),
            "sparse table saved"
        );
        Ok(())
    }

    /// Restores the key-space from the same deterministic path, replacing
    /// in-memory state. Intended to run before the table starts serving.
    pub fn load(&self, base_dir: impl AsRef<Path>) -> Result<()> {
        let start = Instant::now();
        let path = self.shard_path(base_dir.as_ref());
        self.kernel.load(&path)?;
        tracing::info!(
            table_handle = self.handle().as_u32(),
            rank = self.shard_id,
            elapsed_s = start.elapsed().as_secs_f64(),
            key_count = self.kernel.key_count(),
            "sparse table loaded"
        );
        Ok(())
    }

    /// Runs the kernel's exposure-decay pass over the full key-space.
    pub fn show_decay(&self) {
        self.kernel.show_decay();
    }

    /// Assigns the table's handle; called exactly once, by the registry.
    ///
    /// Panics on a second call.
    pub fn set_handle(&self, handle: TableHandle) {
        if self.handle.set(handle).is_err() {
            panic!(
                "sparse table handle already set to {}",
                self.handle.get().expect("handle present")
            );
        }
    }

    /// The handle assigned at registration.
    ///
    /// Panics if the table was never registered.
    #[must_use]
    pub fn handle(&self) -> TableHandle {
        *self
            .handle
            .get()
            .expect("sparse table handle has not been assigned")
    }

    /// Snapshot location for this shard under `base_dir`.
    #[must_use]
    pub fn shard_path(&self, base_dir: &Path) -> PathBuf {
        base_dir
            .join("sparse_table")
            .join(self.handle().as_u32().to_string())
            .join(format!("rank_{}", self.shard_id))
    }

    /// Weight vector dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of shards the parameter space is partitioned into.
    #[must_use]
    pub fn shard_num(&self) -> usize {
        self.shard_num
    }

    /// This shard's index.
    #[must_use]
    pub fn shard_id(&self) -> usize {
        self.shard_id
    }

    /// Number of distinct keys currently held.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.kernel.key_count()
    }

    /// Approximate bytes held by per-key records.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.kernel.memory_bytes()
    }

    /// Shared pipeline counters; the handle stays valid after the table
    /// is dropped.
    #[must_use]
    pub fn stats(&self) -> Arc<TableStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for SparseTable {
    fn drop(&mut self) {
        // Closing the channel stops the worker after it drains the queue.
        drop(self.grad_tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn spawn_grad_worker(
    kernel: Arc<dyn SparseOptKernel>,
    stats: Arc<TableStats>,
    grad_rx: Receiver<GradientRecord>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("sparse-grad".to_string())
        .spawn(move || {
            tracing::debug!("gradient worker started");
            while let Ok(record) = grad_rx.recv() {
                kernel.apply(&record);
                stats.applied.fetch_add(1, Ordering::Release);
            }
            tracing::debug!("gradient worker drained and stopped");
        })
        .expect("failed to spawn gradient worker thread")
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::optimizer::{Adam, OptimizerConfig};
    use crate::registry::TableRegistry;
    use crate::wire::SparsePushVarInfo;
    use crate::Sign;

    fn adam_table(dim: usize) -> SparseTable {
        SparseTable::new(SparseTableConfig {
            dimension: dim,
            ..SparseTableConfig::default()
        })
    }

    fn pull_req(signs: Vec<Sign>, dim: usize) -> SparsePullRequest {
        SparsePullRequest {
            table_handle: TableHandle::new(0),
            dim,
            signs,
        }
    }

    fn push_req(entries: Vec<(Sign, Vec<f32>, f32)>, dim: usize) -> SparsePushRequest {
        SparsePushRequest {
            dim,
            var_infos: entries
                .into_iter()
                .map(|(sign, grad, batch_show)| SparsePushVarInfo {
                    sign,
                    grad,
                    batch_show,
                })
                .collect(),
        }
    }

    fn wait_applied(stats: &TableStats, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while stats.applied() < n {
            assert!(
                Instant::now() < deadline,
                "gradient worker did not drain: {:?}",
                stats.snapshot()
            );
            thread::yield_now();
        }
    }

    #[test]
    fn pull_lazily_creates_and_preserves_order() {
        let table = adam_table(4);
        let resp = table.pull(&pull_req(vec![9, 3, 9, 1], 4));

        assert_eq!(resp.dim, 4);
        assert_eq!(resp.weights.len(), 4);
        for w in &resp.weights {
            assert_eq!(w, &vec![0.0; 4]);
        }
        // Duplicate sign 9 creates one record.
        assert_eq!(table.key_count(), 3);
    }

    #[test]
    #[should_panic(expected = "pull request dim 3 does not match table dim 4")]
    fn pull_rejects_dimension_mismatch() {
        let table = adam_table(4);
        let _ = table.pull(&pull_req(vec![1], 3));
    }

    #[test]
    #[should_panic(expected = "push request dim 2 does not match table dim 4")]
    fn push_rejects_request_dimension_mismatch() {
        let table = adam_table(4);
        let _ = table.push(&push_req(vec![(1, vec![0.1, 0.2], 1.0)], 2));
    }

    #[test]
    #[should_panic(expected = "push gradient for sign 8 has 2 components")]
    fn push_rejects_entry_length_mismatch() {
        let table = adam_table(4);
        let _ = table.push(&push_req(vec![(8, vec![0.1, 0.2], 1.0)], 4));
    }

    #[test]
    fn push_applies_exactly_one_step_per_record() {
        let table = adam_table(4);
        let stats = table.stats();

        // Reference: the same records applied synchronously to a bare
        // kernel with identical hyperparameters.
        let reference = OptimizerConfig::default().create_sparse_kernel(4);

        let entries: Vec<(Sign, Vec<f32>, f32)> = (0..32)
            .map(|i| (i as Sign, vec![0.01 * (i + 1) as f32; 4], 1.0))
            .collect();
        for (sign, grad, batch_show) in &entries {
            reference.apply(&GradientRecord {
                sign: *sign,
                grad: grad.clone().into_boxed_slice(),
                batch_show: *batch_show,
            });
        }

        table.push(&push_req(entries.clone(), 4));
        wait_applied(&stats, entries.len() as u64);

        let signs: Vec<Sign> = entries.iter().map(|(sign, _, _)| *sign).collect();
        let resp = table.pull(&pull_req(signs.clone(), 4));
        for (i, sign) in signs.iter().enumerate() {
            let mut expected = vec![0.0f32; 4];
            reference.pull_weight(*sign, &mut expected);
            assert_eq!(resp.weights[i], expected, "sign {sign} diverged");
        }
    }

    #[test]
    fn single_step_scenario_dim4() {
        let table = adam_table(4);
        let stats = table.stats();

        let before = table.pull(&pull_req(vec![42], 4));
        assert_eq!(before.weights[0], vec![0.0; 4]);

        let grad = vec![0.1f32, 0.2, 0.3, 0.4];
        table.push(&push_req(vec![(42, grad.clone(), 1.0)], 4));
        wait_applied(&stats, 1);

        // First Adam step from all-zero state, per the documented formula.
        let opt = Adam::default();
        let alpha = opt.learning_rate * (1.0 - opt.beta2).sqrt() / (1.0 - opt.beta1);
        let after = table.pull(&pull_req(vec![42], 4));
        for (i, &g) in grad.iter().enumerate() {
            let m = (1.0 - opt.beta1) * g;
            let v = (1.0 - opt.beta2) * g * g;
            let expected = -alpha * m / (v.sqrt() + opt.epsilon);
            assert!(
                (after.weights[0][i] - expected).abs() < 1e-9,
                "component {i}: got {}, expected {expected}",
                after.weights[0][i]
            );
        }
    }

    #[test]
    fn drop_drains_queued_gradients() {
        let table = adam_table(2);
        let stats = table.stats();

        let entries: Vec<(Sign, Vec<f32>, f32)> =
            (0..500).map(|i| (i as Sign, vec![0.1, 0.1], 1.0)).collect();
        table.push(&push_req(entries, 2));
        drop(table);

        assert_eq!(stats.snapshot(), TableStatsSnapshot {
            pushed: 500,
            applied: 500,
        });
    }

    #[test]
    fn concurrent_pull_and_push() {
        let table = Arc::new(adam_table(8));
        let stats = table.stats();
        let mut handles = vec![];

        for t in 0..4u64 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..200u64 {
                    let sign = t * 1_000 + i;
                    table.push(&SparsePushRequest {
                        dim: 8,
                        var_infos: vec![SparsePushVarInfo {
                            sign,
                            grad: vec![0.01; 8],
                            batch_show: 1.0,
                        }],
                    });
                }
            }));
        }
        for _ in 0..4 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let resp = table.pull(&SparsePullRequest {
                        table_handle: TableHandle::new(0),
                        dim: 8,
                        signs: vec![i, i + 1, 5_000],
                    });
                    assert_eq!(resp.weights.len(), 3);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        wait_applied(&stats, 800);
        assert_eq!(stats.pushed(), 800);
    }

    #[test]
    fn set_handle_assigns_once() {
        let table = adam_table(4);
        table.set_handle(TableHandle::new(5));
        assert_eq!(table.handle(), TableHandle::new(5));
    }

    #[test]
    #[should_panic(expected = "sparse table handle already set to 5")]
    fn set_handle_twice_panics() {
        let table = adam_table(4);
        table.set_handle(TableHandle::new(5));
        table.set_handle(TableHandle::new(6));
    }

    #[test]
    fn save_then_load_through_registry_tables() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TableRegistry::new();
        let config = SparseTableConfig {
            dimension: 4,
            ..SparseTableConfig::default()
        };

        let source = registry.create_sparse_table(config.clone());
        let stats = source.stats();
        source.push(&push_req(
            (0..20)
                .map(|i| (i as Sign, vec![0.05 * (i + 1) as f32; 4], 1.0))
                .collect(),
            4,
        ));
        wait_applied(&stats, 20);
        source.save(dir.path()).unwrap();

        // A fresh process would rebuild the registry in the same order, so
        // the target table gets the same handle and resolves the same path.
        let other_registry = TableRegistry::new();
        let target = other_registry.create_sparse_table(config);
        target.load(dir.path()).unwrap();

        assert_eq!(target.key_count(), source.key_count());
        let signs: Vec<Sign> = (0..20).collect();
        assert_eq!(
            target.pull(&pull_req(signs.clone(), 4)).weights,
            source.pull(&pull_req(signs, 4)).weights
        );
    }

    #[test]
    fn shard_path_is_deterministic() {
        let registry = TableRegistry::new();
        let table = registry.create_sparse_table(SparseTableConfig {
            dimension: 2,
            shard_num: 4,
            shard_id: 3,
            ..SparseTableConfig::default()
        });
        assert_eq!(
            table.shard_path(Path::new("/data/ckpt")),
            Path::new("/data/ckpt/sparse_table/0/rank_3")
        );
    }

    #[test]
    fn show_decay_delegates_to_kernel() {
        let table = SparseTable::new(SparseTableConfig {
            optimizer: OptimizerConfig::AdaGrad(crate::optimizer::AdaGrad::default()),
            dimension: 2,
            ..SparseTableConfig::default()
        });
        let stats = table.stats();
        table.push(&push_req(vec![(1, vec![0.1, 0.1], 8.0)], 2));
        wait_applied(&stats, 1);

        // Decay touches exposure state only; weights stay put.
        let before = table.pull(&pull_req(vec![1], 2));
        table.show_decay();
        let after = table.pull(&pull_req(vec![1], 2));
        assert_eq!(before.weights, after.weights);
    }

    #[test]
    fn memory_bytes_grows_with_keys() {
        let table = adam_table(8);
        assert_eq!(table.memory_bytes(), 0);
        let _ = table.pull(&pull_req(vec![1, 2, 3], 8));
        assert!(table.memory_bytes() > 0);
    }
}
