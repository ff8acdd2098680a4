// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pull/push payloads carried by the external request layer.
//!
//! The store neither sends nor receives these itself; the surrounding RPC
//! layer resolves a [`crate::TableHandle`] through the registry and hands
//! the payloads to [`crate::SparseTable::pull`] / [`crate::SparseTable::push`].

use serde::{Deserialize, Serialize};

use crate::registry::TableHandle;
use crate::Sign;

/// Batched weight read for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsePullRequest {
    /// Table the request is routed to.
    pub table_handle: TableHandle,
    /// Expected weight vector dimension; must equal the table's.
    pub dim: usize,
    /// Keys to read, in response order.
    pub signs: Vec<Sign>,
}

/// Weight vectors answering a [`SparsePullRequest`], 1:1 with its signs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsePullResponse {
    /// Echo of the request handle.
    pub table_handle: TableHandle,
    /// Weight vector dimension of every entry in `weights`.
    pub dim: usize,
    /// One weight vector per requested sign, in request order.
    pub weights: Vec<Vec<f32>>,
}

/// One gradient entry of a push batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsePushVarInfo {
    /// Key the gradient applies to.
    pub sign: Sign,
    /// Gradient values; length must equal the request dimension.
    pub grad: Vec<f32>,
    /// Exposure count of the key in the producing batch.
    pub batch_show: f32,
}

/// Batched gradient write for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsePushRequest {
    /// Expected weight vector dimension; must equal the table's.
    pub dim: usize,
    /// Gradient entries to enqueue.
    pub var_infos: Vec<SparsePushVarInfo>,
}

/// Acknowledgement that a push batch was fully enqueued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparsePushResponse {}
