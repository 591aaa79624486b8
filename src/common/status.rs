// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use thiserror::Error;

use crate::common::ids::{TabletId, TxnId};

/// Engine-wide error kinds.
///
/// Initialization errors are fatal to startup; background sweeps log and
/// swallow per-item errors; user-initiated transaction operations return
/// these to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("os error: {0}")]
    Os(String),

    #[error("memory alloc failed: {0}")]
    MemoryAllocFailed(String),

    #[error("exceeded limit: {0}")]
    ExceededLimit(String),

    #[error("invalid command parameters: {0}")]
    CeCmdParamsError(String),

    #[error("no available root path: {0}")]
    NoAvailableRootPath(String),

    #[error("invalid root path: {0}")]
    InvalidRootPath(String),

    /// Idempotent begin retry: the label and request id match an existing
    /// PREPARE/PRECOMMITTED transaction, whose id is carried back.
    #[error("duplicated request {request_id}, existing txn id {txn_id}")]
    DuplicatedRequest { request_id: String, txn_id: TxnId },

    #[error("label [{label}] has already been used, txn status: {status}")]
    LabelAlreadyUsed { label: String, status: String },

    #[error("transaction [{0}] not found: {1}")]
    TransactionNotFound(TxnId, String),

    #[error("transaction commit failed: {0}")]
    TransactionCommitFailed(String),

    #[error("tablet {tablet_id} quorum failed for txn {txn_id}: {detail}")]
    TabletQuorumFailed {
        txn_id: TxnId,
        tablet_id: TabletId,
        detail: String,
    },

    #[error("database [{db}] data quota exceeded, quota: {quota_bytes} bytes")]
    QuotaExceeded { db: String, quota_bytes: i64 },

    #[error("begin transaction limit exceeded: {0}")]
    BeginTxnLimitExceeded(String),

    #[error("meta not found: {0}")]
    MetaNotFound(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
