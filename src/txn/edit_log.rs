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
use std::sync::Mutex;

use crate::common::ids::{DbId, TxnId};
use crate::txn::state::{TransactionState, TransactionStatus};

/// Batched removal of expired final transactions: everything at the head of
/// each deque up to and including the recorded id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchRemoveTransactionsOperation {
    pub db_id: DbId,
    pub latest_txn_id_for_short: TxnId,
    pub latest_txn_id_for_long: TxnId,
}

/// Durability seam of the transaction manager. The real implementation
/// replicates to the metadata journal; the in-memory one backs tests and
/// single-node setups.
pub trait EditLog: Send + Sync {
    fn log_insert_transaction_state(&self, txn: &TransactionState);

    fn log_batch_remove_transactions(&self, op: &BatchRemoveTransactionsOperation);

    fn log_clean_label(&self, db_id: DbId, label: &str);
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EditLogEntry {
    InsertTransactionState {
        txn_id: TxnId,
        status: TransactionStatus,
        label: String,
    },
    BatchRemoveTransactions(BatchRemoveTransactionsOperation),
    CleanLabel {
        db_id: DbId,
        label: String,
    },
}

/// Records entries in memory.
#[derive(Default)]
pub struct MemoryEditLog {
    entries: Mutex<Vec<EditLogEntry>>,
}

impl MemoryEditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<EditLogEntry> {
        self.entries.lock().expect("edit log lock").clone()
    }
}

impl EditLog for MemoryEditLog {
    fn log_insert_transaction_state(&self, txn: &TransactionState) {
        self.entries
            .lock()
            .expect("edit log lock")
            .push(EditLogEntry::InsertTransactionState {
                txn_id: txn.transaction_id(),
                status: txn.status(),
                label: txn.label().to_string(),
            });
    }

    fn log_batch_remove_transactions(&self, op: &BatchRemoveTransactionsOperation) {
        self.entries
            .lock()
            .expect("edit log lock")
            .push(EditLogEntry::BatchRemoveTransactions(op.clone()));
    }

    fn log_clean_label(&self, db_id: DbId, label: &str) {
        self.entries
            .lock()
            .expect("edit log lock")
            .push(EditLogEntry::CleanLabel {
                db_id,
                label: label.to_string(),
            });
    }
}
