// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only directory assigning handles to sparse tables.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::SparseTableConfig;
use crate::table::SparseTable;

/// Stable integer identifier for a registered table.
///
/// Assigned once at registration, never reused, never revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableHandle(u32);

impl TableHandle {
    /// Wraps a raw handle value.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The raw handle value as an index.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory resolving handles to tables for the process lifetime.
///
/// One instance is constructed at process start and shared with whatever
/// component performs handle resolution; there is no ambient global.
/// Registration is append-only: handles are sequential from zero and a
/// registered table is never removed.
#[derive(Default)]
pub struct TableRegistry {
    tables: RwLock<Vec<Arc<SparseTable>>>,
}

impl TableRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table and returns its newly assigned handle.
    pub fn register(&self, table: Arc<SparseTable>) -> TableHandle {
        let mut tables = self.tables.write();
        let handle = TableHandle::new(tables.len() as u32);
        tables.push(table);
        handle
    }

    /// Resolves a handle to its table in O(1).
    ///
    /// Panics if the handle was never registered; an unknown handle means
    /// the routing layer and this shard disagree about the table set.
    #[must_use]
    pub fn get(&self, handle: TableHandle) -> Arc<SparseTable> {
        let tables = self.tables.read();
        assert!(
            handle.as_usize() < tables.len(),
            "table handle {} out of range, {} tables registered",
            handle,
            tables.len()
        );
        Arc::clone(&tables[handle.as_usize()])
    }

    /// Number of registered tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Whether no table has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Constructs a table, registers it, and assigns its handle.
    ///
    /// The single entry point callers should use, so construction and
    /// handle assignment are atomic from their perspective.
    pub fn create_sparse_table(&self, config: SparseTableConfig) -> Arc<SparseTable> {
        let table = Arc::new(SparseTable::new(config));
        let handle = self.register(Arc::clone(&table));
        table.set_handle(handle);
        table
    }
}
